//! Shared session store for the guessing service
//!
//! The registry is the single source of truth for every accepted connection:
//! - Session lifecycle (Registered, Started, Finished)
//! - Secrets, guess counts and nicknames
//! - A broadcast change signal that waiters use to re-check a predicate
//! - The one-shot gate that elects the ranking coordinator
//!
//! Every mutation and every cross-session read goes through one lock, and
//! every state transition bumps the change signal.

use crate::game::{GameRules, SecretSource};
use crate::network::{open_connection, BoxedReader, BoxedWriter, Connection, LineReader};
use log::{debug, info};
use shared::GuessResult;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

pub type SessionId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Registered,
    Started,
    Finished,
}

/// Point-in-time copy of one session, as returned by [`SessionRegistry::snapshot`].
#[derive(Debug, Clone)]
pub struct SessionRecord {
    /// Assigned at accept time, starting at 1, never reused
    pub id: SessionId,
    pub peer: SocketAddr,
    pub nickname: String,
    /// Set exactly when the session leaves `Registered`
    pub secret: Option<i64>,
    pub state: SessionState,
    pub guess_count: u32,
    pub guessed_correct: bool,
    pub connection: Arc<Connection>,
}

impl SessionRecord {
    /// True for every session the operator ever started.
    pub fn was_started(&self) -> bool {
        self.secret.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }
}

/// A session just promoted to `Started`, handed to its worker.
pub struct StartedSession {
    pub id: SessionId,
    pub connection: Arc<Connection>,
    pub reader: LineReader,
}

struct Inner {
    /// Insertion (and therefore id) ordered
    sessions: Vec<SessionRecord>,
    /// Read halves of sessions nobody is serving yet
    readers: HashMap<SessionId, LineReader>,
    next_id: SessionId,
}

impl Inner {
    fn get_mut(&mut self, id: SessionId) -> Option<&mut SessionRecord> {
        self.sessions.iter_mut().find(|session| session.id == id)
    }
}

struct Shared {
    inner: Mutex<Inner>,
    changes: watch::Sender<u64>,
    ranking_sent: AtomicBool,
}

/// Cheaply cloneable handle to the shared session store.
#[derive(Clone)]
pub struct SessionRegistry {
    shared: Arc<Shared>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    sessions: Vec::new(),
                    readers: HashMap::new(),
                    next_id: 1,
                }),
                changes,
                ranking_sent: AtomicBool::new(false),
            }),
        }
    }

    /// Records a freshly accepted connection as a `Registered` session with
    /// the default nickname `player-<id>`.
    pub async fn register(
        &self,
        peer: SocketAddr,
        reader: BoxedReader,
        writer: BoxedWriter,
    ) -> SessionId {
        let (connection, reader) = open_connection(peer, reader, writer);

        let id = {
            let mut inner = self.shared.inner.lock().await;
            let id = inner.next_id;
            inner.next_id += 1;
            inner.sessions.push(SessionRecord {
                id,
                peer,
                nickname: format!("player-{}", id),
                secret: None,
                state: SessionState::Registered,
                guess_count: 0,
                guessed_correct: false,
                connection,
            });
            inner.readers.insert(id, reader);
            id
        };

        self.notify_all();
        id
    }

    /// Returns a consistent copy of every session.
    pub async fn snapshot(&self) -> Vec<SessionRecord> {
        self.shared.inner.lock().await.sessions.clone()
    }

    pub async fn get(&self, id: SessionId) -> Option<SessionRecord> {
        let inner = self.shared.inner.lock().await;
        inner.sessions.iter().find(|session| session.id == id).cloned()
    }

    /// Promotes every waiting session whose connection is still open to
    /// `Started`, drawing its secret. Kicked sessions are skipped, and
    /// nobody is started once the ranking has been claimed.
    pub async fn start_registered(
        &self,
        rules: &GameRules,
        secrets: &dyn SecretSource,
    ) -> Vec<StartedSession> {
        let mut started = Vec::new();
        {
            let mut inner = self.shared.inner.lock().await;
            if self.ranking_sent() {
                return started;
            }
            let Inner {
                sessions, readers, ..
            } = &mut *inner;

            for session in sessions.iter_mut() {
                if session.state != SessionState::Registered || session.is_closed() {
                    continue;
                }
                let Some(reader) = readers.remove(&session.id) else {
                    continue;
                };

                session.secret = Some(secrets.draw(session.id, rules.low, rules.high));
                session.state = SessionState::Started;
                info!("Session {} ({}) started", session.id, session.nickname);

                started.push(StartedSession {
                    id: session.id,
                    connection: Arc::clone(&session.connection),
                    reader,
                });
            }
        }

        if !started.is_empty() {
            self.notify_all();
        }
        started
    }

    /// Adopts a nickname chosen during the handshake.
    pub async fn set_nickname(&self, id: SessionId, nickname: String) {
        let mut inner = self.shared.inner.lock().await;
        if let Some(session) = inner.get_mut(id) {
            if session.state == SessionState::Started {
                debug!("Session {} is now known as {}", id, nickname);
                session.nickname = nickname;
            }
        }
    }

    /// Counts one well-formed guess and compares it against the secret.
    ///
    /// Returns the comparison and the updated count, or `None` if the
    /// session is not currently `Started`. A correct guess does not finish
    /// the session; the worker calls [`finish`](Self::finish) once its
    /// replies are on the wire.
    pub async fn record_guess(&self, id: SessionId, value: i64) -> Option<(GuessResult, u32)> {
        let mut inner = self.shared.inner.lock().await;
        let session = inner.get_mut(id)?;
        if session.state != SessionState::Started {
            return None;
        }
        let secret = session.secret?;

        session.guess_count += 1;
        let result = match value.cmp(&secret) {
            Ordering::Less => GuessResult::Low,
            Ordering::Greater => GuessResult::High,
            Ordering::Equal => GuessResult::Correct,
        };
        Some((result, session.guess_count))
    }

    /// Moves a started session to `Finished`. Returns false if it was not
    /// `Started` (already finished, or never started).
    pub async fn finish(&self, id: SessionId, guessed_correct: bool) -> bool {
        let finished = {
            let mut inner = self.shared.inner.lock().await;
            match inner.get_mut(id) {
                Some(session) if session.state == SessionState::Started => {
                    session.state = SessionState::Finished;
                    session.guessed_correct = guessed_correct;
                    info!(
                        "Session {} finished after {} guesses (correct: {})",
                        id, session.guess_count, guessed_correct
                    );
                    true
                }
                _ => false,
            }
        };

        if finished {
            self.notify_all();
        }
        finished
    }

    /// Force-closes one session's connection and returns the state it was
    /// in. A waiting session loses its reader so it can never be started.
    pub async fn kick(&self, id: SessionId) -> Option<SessionState> {
        let (connection, state) = {
            let mut inner = self.shared.inner.lock().await;
            inner.readers.remove(&id);
            let session = inner.get_mut(id)?;
            (Arc::clone(&session.connection), session.state)
        };

        info!("Kicking session {}", id);
        connection.close().await;
        self.notify_all();
        Some(state)
    }

    /// Force-closes every connection, e.g. on shutdown.
    pub async fn close_all(&self) {
        let connections: Vec<Arc<Connection>> = {
            let mut inner = self.shared.inner.lock().await;
            inner.readers.clear();
            inner
                .sessions
                .iter()
                .map(|session| Arc::clone(&session.connection))
                .collect()
        };

        for connection in connections {
            connection.close().await;
        }
        self.notify_all();
    }

    /// Watches the change signal; `changed()` on the receiver is the
    /// "await change" primitive.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.changes.subscribe()
    }

    /// Wakes every task waiting for a change.
    pub fn notify_all(&self) {
        self.shared.changes.send_modify(|version| *version += 1);
    }

    /// Blocks until `predicate` holds for the current sessions.
    ///
    /// The predicate is re-evaluated under the lock after every change, and
    /// the subscription is taken before the first check so no change can
    /// slip in between.
    pub async fn wait_until<F>(&self, predicate: F)
    where
        F: Fn(&[SessionRecord]) -> bool,
    {
        let mut changes = self.subscribe();
        loop {
            {
                let inner = self.shared.inner.lock().await;
                if predicate(&inner.sessions) {
                    return;
                }
            }
            if changes.changed().await.is_err() {
                return;
            }
        }
    }

    /// Waits until every session that was ever started has finished.
    pub async fn wait_for_ranking_barrier(&self) {
        self.wait_until(all_started_finished).await;
    }

    /// Flips the one-shot ranking gate. Exactly one caller per run gets
    /// `true` and becomes responsible for broadcasting the ranking.
    ///
    /// The barrier is re-checked under the lock, so a `start` racing with
    /// the claim either lands before it (and the claim fails) or after it
    /// (and starts nobody).
    pub async fn claim_ranking(&self) -> bool {
        let claimed = {
            let inner = self.shared.inner.lock().await;
            all_started_finished(&inner.sessions)
                && self
                    .shared
                    .ranking_sent
                    .compare_exchange(false, true, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
                    .is_ok()
        };

        if claimed {
            self.notify_all();
        }
        claimed
    }

    /// Waits until some worker has claimed the ranking.
    pub async fn wait_for_ranking_claim(&self) {
        let mut changes = self.subscribe();
        while !self.ranking_sent() {
            if changes.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn ranking_sent(&self) -> bool {
        self.shared.ranking_sent.load(AtomicOrdering::Acquire)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Barrier predicate: at least one session was started and all started
/// sessions are finished.
pub fn all_started_finished(sessions: &[SessionRecord]) -> bool {
    let mut started = sessions.iter().filter(|session| session.was_started()).peekable();
    started.peek().is_some() && started.all(|session| session.state == SessionState::Finished)
}
