//! Server network layer: player connections and the connection acceptor

use crate::console::HostConsole;
use crate::error::{ServerError, SessionError};
use crate::game::{GameRules, LogScoreRecorder, RandomSecrets, ScoreRecorder, SecretSource};
use crate::registry::SessionRegistry;
use log::{debug, info, warn};
use shared::ServerMessage;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;

pub type BoxedReader = Box<dyn AsyncRead + Send + Sync + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Resolves once the latch behind `rx` has been set, or its sender is gone.
pub(crate) async fn latch_set(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Write half and close latch of one player connection.
///
/// The read half lives in a [`LineReader`] owned by whoever is currently
/// serving the session. Closing the connection sets the latch, which wakes
/// any pending read on that reader, and shuts the write half down so the
/// peer sees end-of-stream.
pub struct Connection {
    peer: SocketAddr,
    writer: Mutex<BoxedWriter>,
    closed: watch::Sender<bool>,
}

impl Connection {
    pub fn new(peer: SocketAddr, writer: BoxedWriter) -> Arc<Self> {
        let (closed, _) = watch::channel(false);
        Arc::new(Self {
            peer,
            writer: Mutex::new(writer),
            closed,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Sends one protocol line and flushes it.
    ///
    /// A pending write gives up as soon as the connection is closed, so a
    /// peer that stopped reading cannot block kicks or shutdown.
    pub async fn send(&self, message: &ServerMessage) -> Result<(), SessionError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(SessionError::Closed);
        }

        let line = format!("{}\n", message);
        let mut writer = tokio::select! {
            writer = self.writer.lock() => writer,
            _ = latch_set(&mut closed) => return Err(SessionError::Closed),
        };
        let result = tokio::select! {
            result = write_line(&mut writer, &line) => result.map_err(SessionError::from),
            _ = latch_set(&mut closed) => Err(SessionError::Closed),
        };

        // close() could not take the writer while we held it
        if self.is_closed() {
            self.shutdown_writer(&mut writer).await;
        }
        result
    }

    /// Force-closes the connection. Closing twice is a no-op.
    ///
    /// Never waits for the writer: if a send holds it, that send sees the
    /// latch and shuts the write half down itself.
    pub async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }

        if let Ok(mut writer) = self.writer.try_lock() {
            self.shutdown_writer(&mut writer).await;
        }
    }

    async fn shutdown_writer(&self, writer: &mut BoxedWriter) {
        if let Err(e) = writer.shutdown().await {
            debug!("Shutdown of connection to {} failed: {}", self.peer, e);
        }
    }

    fn reader(&self, reader: BoxedReader) -> LineReader {
        LineReader {
            lines: BufReader::new(reader).lines(),
            closed: self.closed.subscribe(),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Line-oriented read half of a player connection.
pub struct LineReader {
    lines: Lines<BufReader<BoxedReader>>,
    closed: watch::Receiver<bool>,
}

impl LineReader {
    /// Reads the next line, failing once the peer hangs up or the
    /// connection is force-closed.
    pub async fn next_line(&mut self) -> Result<String, SessionError> {
        if *self.closed.borrow() {
            return Err(SessionError::Closed);
        }

        tokio::select! {
            line = self.lines.next_line() => match line? {
                Some(line) => Ok(line),
                None => Err(SessionError::Closed),
            },
            _ = latch_set(&mut self.closed) => Err(SessionError::Closed),
        }
    }

    /// Like [`next_line`](Self::next_line) but gives up after `bound`.
    ///
    /// A partially received line is kept and returned by the next read.
    pub async fn next_line_within(&mut self, bound: Duration) -> Result<String, SessionError> {
        timeout(bound, self.next_line())
            .await
            .map_err(|_| SessionError::Timeout(bound))?
    }
}

async fn write_line(writer: &mut BoxedWriter, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

/// Wraps raw stream halves into a connection handle and its reader.
pub fn open_connection(
    peer: SocketAddr,
    reader: BoxedReader,
    writer: BoxedWriter,
) -> (Arc<Connection>, LineReader) {
    let connection = Connection::new(peer, writer);
    let reader = connection.reader(reader);
    (connection, reader)
}

/// Validated service settings, usually built from command line arguments.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub max_players: usize,
    pub rules: GameRules,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.max_players == 0 {
            return Err(ServerError::Config(
                "max players must be at least 1".to_string(),
            ));
        }
        if self.rules.low > self.rules.high {
            return Err(ServerError::Config(format!(
                "empty range {}..={}",
                self.rules.low, self.rules.high
            )));
        }
        Ok(())
    }
}

/// The session service: listener, registry and the collaborators handed to
/// every session worker.
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    registry: SessionRegistry,
    secrets: Arc<dyn SecretSource>,
    scores: Arc<dyn ScoreRecorder>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let listener = TcpListener::bind(&config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.bind_addr.clone(),
                source,
            })?;
        info!("Server listening on {}", listener.local_addr()?);

        let (shutdown, _) = watch::channel(false);

        Ok(Server {
            listener,
            config,
            registry: SessionRegistry::new(),
            secrets: Arc::new(RandomSecrets),
            scores: Arc::new(LogScoreRecorder),
            shutdown: Arc::new(shutdown),
        })
    }

    pub fn with_secret_source(mut self, secrets: Arc<dyn SecretSource>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn with_score_recorder(mut self, scores: Arc<dyn ScoreRecorder>) -> Self {
        self.scores = scores;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> SessionRegistry {
        self.registry.clone()
    }

    /// Builds the operator console bound to this service.
    pub fn console(&self) -> HostConsole {
        HostConsole::new(
            self.registry.clone(),
            self.config.rules,
            Arc::clone(&self.secrets),
            Arc::clone(&self.scores),
            Arc::clone(&self.shutdown),
        )
    }

    /// Accepts connections until capacity is reached, the listener fails, or
    /// the console shuts the service down. Returns how many were accepted.
    ///
    /// The listener is dropped on return, so later connection attempts are
    /// refused by the OS.
    pub async fn run_acceptor(self) -> usize {
        let mut shutdown = self.shutdown.subscribe();
        let max_players = self.config.max_players;
        let mut accepted = 0;

        while accepted < max_players {
            tokio::select! {
                result = self.listener.accept() => match result {
                    Ok((stream, peer)) => {
                        let (reader, writer) = stream.into_split();
                        let id = self
                            .registry
                            .register(peer, Box::new(reader), Box::new(writer))
                            .await;
                        info!("Player {} connected from {}", id, peer);
                        accepted += 1;
                    }
                    Err(e) => {
                        warn!("Listener error, no longer accepting: {}", e);
                        break;
                    }
                },
                _ = latch_set(&mut shutdown) => {
                    info!("Listener closed");
                    break;
                }
            }
        }

        if accepted >= max_players {
            info!("Reached capacity of {} players", max_players);
        }
        accepted
    }
}
