//! Operator console: lifecycle control over the running service

use crate::game::{GameRules, ScoreRecorder, SecretSource};
use crate::registry::{SessionId, SessionRegistry, SessionState};
use crate::worker::SessionWorker;
use log::{info, warn};
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

pub const HELP: &str = "\
commands:
  help                  show this summary
  list                  show every session
  reveal <id>           print the secret of a session
  kick <id>             close a session's connection
  start                 start every waiting player
  shutdown|quit-server  stop accepting and close every connection";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Help,
    List,
    Reveal(SessionId),
    Kick(SessionId),
    Start,
    Shutdown,
}

/// Console input that could not be turned into a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command `{0}`, type `help` for a list")]
    Unknown(String),
    #[error("usage: {0} <id>")]
    MissingArgument(&'static str),
    #[error("`{1}` is not a valid session id; usage: {0} <id>")]
    InvalidId(&'static str, String),
}

fn parse_id(verb: &'static str, argument: Option<&str>) -> Result<SessionId, CommandError> {
    let argument = argument.ok_or(CommandError::MissingArgument(verb))?;
    argument
        .parse()
        .map_err(|_| CommandError::InvalidId(verb, argument.to_string()))
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or_default().to_lowercase();
        let argument = words.next();

        match verb.as_str() {
            "help" => Ok(Command::Help),
            "list" => Ok(Command::List),
            "reveal" => parse_id("reveal", argument).map(Command::Reveal),
            "kick" => parse_id("kick", argument).map(Command::Kick),
            "start" => Ok(Command::Start),
            "shutdown" | "quit-server" => Ok(Command::Shutdown),
            _ => Err(CommandError::Unknown(line.trim().to_string())),
        }
    }
}

/// What the console prints for one command, and whether it keeps reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub keep_running: bool,
}

impl Reply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keep_running: true,
        }
    }
}

pub struct HostConsole {
    registry: SessionRegistry,
    rules: GameRules,
    secrets: Arc<dyn SecretSource>,
    scores: Arc<dyn ScoreRecorder>,
    shutdown: Arc<watch::Sender<bool>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl HostConsole {
    pub fn new(
        registry: SessionRegistry,
        rules: GameRules,
        secrets: Arc<dyn SecretSource>,
        scores: Arc<dyn ScoreRecorder>,
        shutdown: Arc<watch::Sender<bool>>,
    ) -> Self {
        Self {
            registry,
            rules,
            secrets,
            scores,
            shutdown,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Reads commands until `shutdown` or end of input, writing every reply
    /// to `output`. End of input shuts the service down as well.
    pub async fn run<R, W>(&self, input: R, mut output: W) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let mut lines = input.lines();
        writeln!(output, "type `help` for commands")?;

        loop {
            write!(output, "> ")?;
            output.flush()?;

            let Some(line) = lines.next_line().await? else {
                self.shutdown().await;
                writeln!(output, "console closed, shutting down")?;
                return Ok(());
            };
            if line.trim().is_empty() {
                continue;
            }

            let reply = match line.parse::<Command>() {
                Ok(command) => self.execute(command).await,
                Err(e) => Reply::text(e.to_string()),
            };
            writeln!(output, "{}", reply.text)?;
            if !reply.keep_running {
                return Ok(());
            }
        }
    }

    pub async fn execute(&self, command: Command) -> Reply {
        match command {
            Command::Help => Reply::text(HELP),
            Command::List => Reply::text(self.list().await),
            Command::Reveal(id) => Reply::text(self.reveal(id).await),
            Command::Kick(id) => Reply::text(self.kick(id).await),
            Command::Start => Reply::text(self.start().await),
            Command::Shutdown => {
                self.shutdown().await;
                Reply {
                    text: "server shut down".to_string(),
                    keep_running: false,
                }
            }
        }
    }

    async fn list(&self) -> String {
        let sessions = self.registry.snapshot().await;
        if sessions.is_empty() {
            return "no sessions".to_string();
        }

        let mut text = format!(
            "{:<4} {:<16} {:<22} {:<7} {:<8} {}",
            "ID", "NICKNAME", "ADDRESS", "SECRET", "STARTED", "FINISHED"
        );
        for session in &sessions {
            text.push_str(&format!(
                "\n{:<4} {:<16} {:<22} {:<7} {:<8} {}",
                session.id,
                session.nickname,
                session.peer,
                yes_no(session.secret.is_some()),
                yes_no(session.state != SessionState::Registered),
                yes_no(session.state == SessionState::Finished),
            ));
        }
        text
    }

    async fn reveal(&self, id: SessionId) -> String {
        match self.registry.get(id).await {
            Some(session) => match session.secret {
                Some(secret) => format!("session {} secret: {}", id, secret),
                None => format!("session {}: not assigned yet", id),
            },
            None => format!("no session with id {}", id),
        }
    }

    async fn kick(&self, id: SessionId) -> String {
        match self.registry.kick(id).await {
            Some(SessionState::Finished) => format!("session {} closed (already finished)", id),
            Some(_) => format!("session {} kicked", id),
            None => format!("no session with id {}", id),
        }
    }

    async fn start(&self) -> String {
        // Held until every handle is stored so `wait_for_completion` sees them.
        let mut workers = self.workers.lock().await;

        let started = self
            .registry
            .start_registered(&self.rules, self.secrets.as_ref())
            .await;
        if started.is_empty() {
            return if self.registry.ranking_sent() {
                "ranking already sent, no new players can start".to_string()
            } else {
                "no waiting players".to_string()
            };
        }

        let count = started.len();
        for session in started {
            let worker = SessionWorker::new(
                session,
                self.registry.clone(),
                self.rules,
                Arc::clone(&self.scores),
            );
            workers.push(worker.spawn());
        }
        info!("Started {} sessions", count);
        format!("started {} player(s)", count)
    }

    /// Resolves once the ranking has gone out and every worker started from
    /// this console has exited.
    pub async fn wait_for_completion(&self) {
        self.registry.wait_for_ranking_claim().await;

        let workers = std::mem::take(&mut *self.workers.lock().await);
        for worker in workers {
            if let Err(e) = worker.await {
                warn!("Session worker failed: {}", e);
            }
        }
        info!("All player sessions ended");
    }

    /// Closes the listener and every connection. Does not wait for the
    /// session workers to exit.
    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.shutdown.send_replace(true);
        self.registry.close_all().await;
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
