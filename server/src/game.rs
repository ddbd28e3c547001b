use crate::registry::SessionId;
use log::info;
use rand::Rng;
use shared::{DEFAULT_HIGH, DEFAULT_LOW, HANDSHAKE_TIMEOUT};
use std::time::Duration;

/// Range and timing shared by every session of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameRules {
    pub low: i64,
    pub high: i64,
    pub handshake_timeout: Duration,
}

impl GameRules {
    /// Label under which finished games are reported, e.g. `0-100`.
    pub fn range_label(&self) -> String {
        format!("{}-{}", self.low, self.high)
    }
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            low: DEFAULT_LOW,
            high: DEFAULT_HIGH,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }
}

/// Picks the hidden number for a session when it is started.
pub trait SecretSource: Send + Sync {
    /// Returns a value in `low..=high`.
    fn draw(&self, session: SessionId, low: i64, high: i64) -> i64;
}

/// Uniformly random secrets from the thread-local generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSecrets;

impl SecretSource for RandomSecrets {
    fn draw(&self, _session: SessionId, low: i64, high: i64) -> i64 {
        rand::thread_rng().gen_range(low..=high)
    }
}

/// Receives the attempt count of every session that found its number.
///
/// Persisting statistics is left to the implementor; the service itself
/// never touches storage.
pub trait ScoreRecorder: Send + Sync {
    fn record(&self, label: &str, attempts: u32);
}

/// Default recorder that only writes the score to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogScoreRecorder;

impl ScoreRecorder for LogScoreRecorder {
    fn record(&self, label: &str, attempts: u32) {
        info!("Score for range {}: {} attempts", label, attempts);
    }
}
