//! Final standings, computed once per run and fanned out to every player

use crate::error::SessionError;
use crate::network::Connection;
use crate::registry::{SessionId, SessionRecord, SessionRegistry};
use log::{info, warn};
use shared::ServerMessage;
use std::time::Duration;
use tokio::time::timeout;

/// How long one player may take to accept the whole ranking.
pub const RANKING_SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankingEntry {
    /// 1-based
    pub position: usize,
    pub session_id: SessionId,
    pub nickname: String,
    /// `None` for players who never found their number
    pub guesses: Option<u32>,
}

/// Orders every started session: correct guessers first by guess count,
/// then everyone else; ties go to the lower session id.
pub fn compute_ranking(sessions: &[SessionRecord]) -> Vec<RankingEntry> {
    let mut started: Vec<&SessionRecord> = sessions
        .iter()
        .filter(|session| session.was_started())
        .collect();

    started.sort_by_key(|session| {
        let guesses = if session.guessed_correct {
            session.guess_count
        } else {
            0
        };
        (!session.guessed_correct, guesses, session.id)
    });

    started
        .into_iter()
        .enumerate()
        .map(|(index, session)| RankingEntry {
            position: index + 1,
            session_id: session.id,
            nickname: session.nickname.clone(),
            guesses: session.guessed_correct.then_some(session.guess_count),
        })
        .collect()
}

/// The exact message sequence every participant receives.
pub fn ranking_messages(ranking: &[RankingEntry]) -> Vec<ServerMessage> {
    let mut messages = Vec::with_capacity(ranking.len() + 3);
    messages.push(ServerMessage::RankingStart);
    messages.extend(ranking.iter().map(|entry| ServerMessage::Rank {
        position: entry.position,
        nickname: entry.nickname.clone(),
        guesses: entry.guesses,
    }));
    messages.push(ServerMessage::RankingEnd);
    messages.push(ServerMessage::Bye);
    messages
}

/// Sends the standings to every started session, in registry order, and
/// closes each connection afterwards. Must only be called by the task that
/// won [`SessionRegistry::claim_ranking`].
///
/// Returns how many players received the full ranking.
pub async fn broadcast_ranking(registry: &SessionRegistry) -> usize {
    let sessions = registry.snapshot().await;
    let ranking = compute_ranking(&sessions);
    let messages = ranking_messages(&ranking);

    info!("Broadcasting ranking of {} players", ranking.len());
    for entry in &ranking {
        info!(
            "  #{} {} ({})",
            entry.position,
            entry.nickname,
            entry.guesses.map_or_else(
                || "did not guess".to_string(),
                |count| format!("{} guesses", count)
            )
        );
    }

    let mut delivered = 0;
    for session in sessions.iter().filter(|session| session.was_started()) {
        if session.is_closed() {
            continue;
        }

        match timeout(RANKING_SEND_TIMEOUT, send_all(&session.connection, &messages)).await {
            Ok(Ok(())) => delivered += 1,
            Ok(Err(e)) => warn!("Failed to send ranking to session {}: {}", session.id, e),
            Err(_) => warn!(
                "Session {} did not take the ranking within {:?}",
                session.id, RANKING_SEND_TIMEOUT
            ),
        }
        session.connection.close().await;
    }

    delivered
}

async fn send_all(connection: &Connection, messages: &[ServerMessage]) -> Result<(), SessionError> {
    for message in messages {
        connection.send(message).await?;
    }
    Ok(())
}
