//! Per-session protocol state machine
//!
//! A worker owns one started session from `START` until the ranking has
//! gone out: handshake, guessing, finishing, then the ranking barrier.

use crate::error::SessionError;
use crate::game::{GameRules, ScoreRecorder};
use crate::network::{Connection, LineReader};
use crate::ranking::broadcast_ranking;
use crate::registry::{SessionId, SessionRegistry, StartedSession};
use log::{debug, info};
use shared::{sanitize_nickname, ClientMessage, GuessResult, ServerMessage};
use std::sync::Arc;

/// How a session stopped guessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    GuessedCorrectly,
    Quit,
}

pub struct SessionWorker {
    id: SessionId,
    registry: SessionRegistry,
    connection: Arc<Connection>,
    reader: LineReader,
    rules: GameRules,
    scores: Arc<dyn ScoreRecorder>,
}

impl SessionWorker {
    pub fn new(
        session: StartedSession,
        registry: SessionRegistry,
        rules: GameRules,
        scores: Arc<dyn ScoreRecorder>,
    ) -> Self {
        Self {
            id: session.id,
            registry,
            connection: session.connection,
            reader: session.reader,
            rules,
            scores,
        }
    }

    /// Spawns the worker onto the runtime.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Plays the session to the end, then waits at the ranking barrier.
    /// The one worker that wins the ranking gate broadcasts the standings.
    pub async fn run(mut self) {
        let guessed_correct = match self.play().await {
            Ok(SessionEnd::GuessedCorrectly) => true,
            Ok(SessionEnd::Quit) => {
                info!("Session {} quit", self.id);
                false
            }
            Err(e) => {
                info!("Session {} ended: {}", self.id, e);
                false
            }
        };

        if !guessed_correct {
            self.connection.close().await;
        }
        self.registry.finish(self.id, guessed_correct).await;
        drop(self.reader);

        self.registry.wait_for_ranking_barrier().await;
        if self.registry.claim_ranking().await {
            debug!("Session {} broadcasts the ranking", self.id);
            broadcast_ranking(&self.registry).await;
        }
    }

    async fn play(&mut self) -> Result<SessionEnd, SessionError> {
        self.connection
            .send(&ServerMessage::Start {
                low: self.rules.low,
                high: self.rules.high,
            })
            .await?;

        let mut pending = self.handshake().await?;

        loop {
            let line = match pending.take() {
                Some(line) => line,
                None => self.reader.next_line().await?,
            };

            match line.parse::<ClientMessage>() {
                Ok(ClientMessage::Guess(value)) => {
                    let (result, count) = self
                        .registry
                        .record_guess(self.id, value)
                        .await
                        .ok_or(SessionError::Closed)?;
                    debug!("Session {} guess #{}: {} -> {:?}", self.id, count, value, result);

                    if result == GuessResult::Correct {
                        self.scores.record(&self.rules.range_label(), count);
                        if let Err(e) = Self::acknowledge_correct(&self.connection).await {
                            debug!("Session {} left before its result arrived: {}", self.id, e);
                            self.connection.close().await;
                        }
                        return Ok(SessionEnd::GuessedCorrectly);
                    }
                    self.connection.send(&ServerMessage::Result(result)).await?;
                }
                Ok(ClientMessage::Quit) => {
                    self.connection.send(&ServerMessage::Bye).await?;
                    return Ok(SessionEnd::Quit);
                }
                Ok(ClientMessage::Nick(_)) => {
                    debug!("Session {} sent a nickname after the handshake", self.id);
                    Self::reject(&self.connection).await?;
                }
                Err(e) => {
                    debug!("Session {} sent an invalid message: {}", self.id, e);
                    Self::reject(&self.connection).await?;
                }
            }
        }
    }

    /// Reads the optional nickname line.
    ///
    /// Anything other than `NICK:` is handed back so the guessing loop
    /// treats it as the first command. A timeout just means no nickname.
    async fn handshake(&mut self) -> Result<Option<String>, SessionError> {
        let line = match self
            .reader
            .next_line_within(self.rules.handshake_timeout)
            .await
        {
            Ok(line) => line,
            Err(SessionError::Timeout(bound)) => {
                debug!("Session {} sent no nickname within {:?}", self.id, bound);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        match line.parse::<ClientMessage>() {
            Ok(ClientMessage::Nick(name)) => {
                match sanitize_nickname(&name) {
                    Some(nickname) => self.registry.set_nickname(self.id, nickname).await,
                    None => debug!("Session {} sent an empty nickname", self.id),
                }
                Ok(None)
            }
            _ => Ok(Some(line)),
        }
    }

    async fn acknowledge_correct(connection: &Connection) -> Result<(), SessionError> {
        connection
            .send(&ServerMessage::Result(GuessResult::Correct))
            .await?;
        connection.send(&ServerMessage::Wait).await
    }

    async fn reject(connection: &Connection) -> Result<(), SessionError> {
        connection
            .send(&ServerMessage::Result(GuessResult::Error))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::SecretSource;
    use crate::registry::SessionState;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::{
        duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines,
        ReadHalf, WriteHalf,
    };

    struct FixedSecrets(i64);

    impl SecretSource for FixedSecrets {
        fn draw(&self, _session: SessionId, _low: i64, _high: i64) -> i64 {
            self.0
        }
    }

    #[derive(Default)]
    struct RecordingScores(Mutex<Vec<(String, u32)>>);

    impl ScoreRecorder for RecordingScores {
        fn record(&self, label: &str, attempts: u32) {
            self.0.lock().unwrap().push((label.to_string(), attempts));
        }
    }

    struct TestPlayer {
        lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl TestPlayer {
        async fn send(&mut self, line: &str) {
            self.writer
                .write_all(format!("{}\n", line).as_bytes())
                .await
                .unwrap();
        }

        async fn expect(&mut self, line: &str) {
            assert_eq!(self.lines.next_line().await.unwrap().as_deref(), Some(line));
        }

        async fn expect_eof(&mut self) {
            assert_eq!(self.lines.next_line().await.unwrap(), None);
        }
    }

    fn rules() -> GameRules {
        GameRules {
            low: 0,
            high: 100,
            handshake_timeout: Duration::from_secs(5),
        }
    }

    async fn start_player(
        registry: &SessionRegistry,
        secret: i64,
        scores: Arc<RecordingScores>,
    ) -> (TestPlayer, tokio::task::JoinHandle<()>) {
        start_player_with_buffer(registry, secret, scores, 1024).await
    }

    async fn start_player_with_buffer(
        registry: &SessionRegistry,
        secret: i64,
        scores: Arc<RecordingScores>,
        buffer: usize,
    ) -> (TestPlayer, tokio::task::JoinHandle<()>) {
        let (client, server) = duplex(buffer);
        let (reader, writer) = split(server);
        let peer = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9000);
        registry
            .register(peer, Box::new(reader), Box::new(writer))
            .await;

        let mut started = registry
            .start_registered(&rules(), &FixedSecrets(secret))
            .await;
        let session = started.pop().unwrap();
        let handle = SessionWorker::new(session, registry.clone(), rules(), scores).spawn();

        let (reader, writer) = split(client);
        let player = TestPlayer {
            lines: BufReader::new(reader).lines(),
            writer,
        };
        (player, handle)
    }

    #[tokio::test]
    async fn test_first_guess_correct() {
        let registry = SessionRegistry::new();
        let scores = Arc::new(RecordingScores::default());
        let (mut player, handle) = start_player(&registry, 50, Arc::clone(&scores)).await;

        player.expect("START:0:100").await;
        player.send("GUESS:50").await;
        player.expect("RESULT:CORRECT").await;
        player.expect("WAIT").await;
        player.expect("RANKING_START").await;
        player.expect("RANK:1:player-1:1").await;
        player.expect("RANKING_END").await;
        player.expect("BYE").await;
        player.expect_eof().await;

        handle.await.unwrap();
        let session = registry.get(1).await.unwrap();
        assert_eq!(session.state, SessionState::Finished);
        assert_eq!(session.guess_count, 1);
        assert!(session.guessed_correct);
        assert_eq!(
            *scores.0.lock().unwrap(),
            vec![("0-100".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn test_nickname_handshake_is_consumed() {
        let registry = SessionRegistry::new();
        let scores = Arc::new(RecordingScores::default());
        let (mut player, handle) = start_player(&registry, 10, scores).await;

        player.expect("START:0:100").await;
        player.send("NICK:  frank ").await;
        player.send("GUESS:3").await;
        player.expect("RESULT:LOW").await;
        player.send("GUESS:10").await;
        player.expect("RESULT:CORRECT").await;
        player.expect("WAIT").await;
        player.expect("RANKING_START").await;
        player.expect("RANK:1:frank:2").await;

        handle.await.unwrap();
        assert_eq!(registry.get(1).await.unwrap().guess_count, 2);
    }

    #[tokio::test]
    async fn test_first_line_without_nickname_is_a_command() {
        let registry = SessionRegistry::new();
        let scores = Arc::new(RecordingScores::default());
        let (mut player, handle) = start_player(&registry, 10, scores).await;

        player.expect("START:0:100").await;
        player.send("GUESS:20").await;
        player.expect("RESULT:HIGH").await;
        player.send("GUESS:10").await;
        player.expect("RESULT:CORRECT").await;
        player.expect("WAIT").await;

        handle.await.unwrap();
        let session = registry.get(1).await.unwrap();
        assert_eq!(session.nickname, "player-1");
        assert_eq!(session.guess_count, 2);
    }

    #[tokio::test]
    async fn test_empty_nickname_keeps_default() {
        let registry = SessionRegistry::new();
        let scores = Arc::new(RecordingScores::default());
        let (mut player, handle) = start_player(&registry, 10, scores).await;

        player.expect("START:0:100").await;
        player.send("NICK:   ").await;
        player.send("GUESS:10").await;
        player.expect("RESULT:CORRECT").await;

        handle.await.unwrap();
        let session = registry.get(1).await.unwrap();
        assert_eq!(session.nickname, "player-1");
        assert_eq!(session.guess_count, 1);
    }

    #[tokio::test]
    async fn test_malformed_guess_does_not_count() {
        let registry = SessionRegistry::new();
        let scores = Arc::new(RecordingScores::default());
        let (mut player, handle) = start_player(&registry, 42, scores).await;

        player.expect("START:0:100").await;
        player.send("abc").await;
        player.expect("RESULT:ERROR").await;
        player.send("GUESS:4x").await;
        player.expect("RESULT:ERROR").await;
        player.send("NICK:late").await;
        player.expect("RESULT:ERROR").await;
        assert_eq!(registry.get(1).await.unwrap().guess_count, 0);

        player.send("GUESS:42").await;
        player.expect("RESULT:CORRECT").await;

        handle.await.unwrap();
        let session = registry.get(1).await.unwrap();
        assert_eq!(session.guess_count, 1);
        assert_eq!(session.nickname, "player-1");
    }

    #[tokio::test]
    async fn test_quit_finishes_without_ranking() {
        let registry = SessionRegistry::new();
        let scores = Arc::new(RecordingScores::default());
        let (mut player, handle) = start_player(&registry, 42, Arc::clone(&scores)).await;

        player.expect("START:0:100").await;
        player.send("GUESS:1").await;
        player.expect("RESULT:LOW").await;
        player.send("QUIT").await;
        player.expect("BYE").await;
        player.expect_eof().await;

        handle.await.unwrap();
        let session = registry.get(1).await.unwrap();
        assert_eq!(session.state, SessionState::Finished);
        assert!(!session.guessed_correct);
        assert_eq!(session.guess_count, 1);
        assert!(registry.ranking_sent());
        assert!(scores.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_finishes_session() {
        let registry = SessionRegistry::new();
        let scores = Arc::new(RecordingScores::default());
        let (mut player, handle) = start_player(&registry, 42, scores).await;

        player.expect("START:0:100").await;
        player.send("GUESS:1").await;
        player.expect("RESULT:LOW").await;
        drop(player);

        handle.await.unwrap();
        let session = registry.get(1).await.unwrap();
        assert_eq!(session.state, SessionState::Finished);
        assert!(!session.guessed_correct);
    }

    #[tokio::test]
    async fn test_kick_unblocks_guessing_session() {
        let registry = SessionRegistry::new();
        let scores = Arc::new(RecordingScores::default());
        let (mut player, handle) = start_player(&registry, 42, scores).await;

        player.expect("START:0:100").await;
        player.send("GUESS:99").await;
        player.expect("RESULT:HIGH").await;

        assert_eq!(registry.kick(1).await, Some(SessionState::Started));
        player.expect_eof().await;

        handle.await.unwrap();
        let session = registry.get(1).await.unwrap();
        assert_eq!(session.state, SessionState::Finished);
        assert!(!session.guessed_correct);
    }

    /// Starts a player that sends invalid lines but never reads the
    /// replies, leaving its worker stuck in a write.
    async fn start_stalled_player(
        registry: &SessionRegistry,
    ) -> (TestPlayer, tokio::task::JoinHandle<()>) {
        let scores = Arc::new(RecordingScores::default());
        let (mut player, handle) = start_player_with_buffer(registry, 42, scores, 64).await;
        for _ in 0..10 {
            player.send("abc").await;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        (player, handle)
    }

    async fn drain_to_eof(player: &mut TestPlayer) {
        player.expect("START:0:100").await;
        while let Ok(Some(_)) = player.lines.next_line().await {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_kick_does_not_wait_for_stalled_player() {
        let registry = SessionRegistry::new();
        let (mut player, handle) = start_stalled_player(&registry).await;

        let kicked = tokio::time::timeout(Duration::from_secs(3), registry.kick(1)).await;
        assert_eq!(kicked.unwrap(), Some(SessionState::Started));

        drain_to_eof(&mut player).await;
        handle.await.unwrap();
        let session = registry.get(1).await.unwrap();
        assert_eq!(session.state, SessionState::Finished);
        assert!(!session.guessed_correct);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_does_not_wait_for_stalled_player() {
        let registry = SessionRegistry::new();
        let (mut player, handle) = start_stalled_player(&registry).await;

        tokio::time::timeout(Duration::from_secs(3), registry.close_all())
            .await
            .expect("close_all should not block on a full socket");

        drain_to_eof(&mut player).await;
        handle.await.unwrap();
        assert_eq!(registry.get(1).await.unwrap().state, SessionState::Finished);
    }

    #[tokio::test]
    async fn test_correct_guess_counts_when_player_hangs_up() {
        let registry = SessionRegistry::new();
        let scores = Arc::new(RecordingScores::default());
        let (mut player, handle) = start_player(&registry, 5, Arc::clone(&scores)).await;

        player.expect("START:0:100").await;
        player.send("GUESS:5").await;
        drop(player);

        handle.await.unwrap();
        let session = registry.get(1).await.unwrap();
        assert_eq!(session.state, SessionState::Finished);
        assert_eq!(session.guess_count, 1);
        assert!(session.guessed_correct);
        assert_eq!(
            *scores.0.lock().unwrap(),
            vec![("0-100".to_string(), 1)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout_then_guess() {
        let registry = SessionRegistry::new();
        let scores = Arc::new(RecordingScores::default());
        let (mut player, handle) = start_player(&registry, 7, scores).await;

        player.expect("START:0:100").await;
        tokio::time::sleep(Duration::from_secs(6)).await;
        player.send("GUESS:7").await;
        player.expect("RESULT:CORRECT").await;
        player.expect("WAIT").await;

        handle.await.unwrap();
        assert_eq!(registry.get(1).await.unwrap().guess_count, 1);
    }

    #[tokio::test]
    async fn test_secret_never_sent_on_wire() {
        let registry = SessionRegistry::new();
        let scores = Arc::new(RecordingScores::default());
        let (mut player, handle) = start_player(&registry, 37, scores).await;

        let mut received = Vec::new();
        for guess in ["GUESS:50", "GUESS:25", "GUESS:37"] {
            player.send(guess).await;
        }
        while let Some(line) = player.lines.next_line().await.unwrap() {
            received.push(line);
        }
        handle.await.unwrap();

        assert_eq!(received[0], "START:0:100");
        assert_eq!(
            &received[1..4],
            &["RESULT:HIGH", "RESULT:LOW", "RESULT:CORRECT"]
        );
        assert!(received.iter().all(|line| !line.contains("37")));
    }
}
