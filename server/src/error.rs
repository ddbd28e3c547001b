//! Error taxonomy for the session service.

use shared::ProtocolError;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Failures that end (or are answered within) a single player session.
///
/// Protocol errors are answered with `RESULT:ERROR` and the session keeps
/// going. Everything else folds into the finished, not-guessed path for that
/// session only.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("connection error: {0}")]
    Connection(#[from] io::Error),
    #[error("connection closed")]
    Closed,
    #[error("no data within {0:?}")]
    Timeout(Duration),
}

/// Failures while setting the service up or running the acceptor.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}
