//! Client side of the guessing protocol

use crate::input::{InputManager, PlayerInput};
use crate::rendering::{RankRow, Renderer};
use log::{debug, info};
use shared::{ClientMessage, GuessResult, ProtocolError, ServerMessage, WAIT_TIMEOUT};
use std::io::{self, Write};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpStream;
use tokio::time::timeout;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("expected START from the server, got `{0}`")]
    UnexpectedGreeting(String),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("server closed the connection")]
    Closed,
    #[error("no message from the server within {0:?}, assuming it is gone")]
    Timeout(Duration),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: String,
    pub nickname: Option<String>,
    pub wait_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: format!("127.0.0.1:{}", shared::DEFAULT_PORT),
            nickname: None,
            wait_timeout: WAIT_TIMEOUT,
        }
    }
}

/// How a game ended from the player's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The server said goodbye; `ranking` is empty if none was received
    Finished { guesses: u32, ranking: Vec<RankRow> },
    Quit,
}

pub struct Client<S> {
    stream: BufReader<S>,
    wait_timeout: Duration,
    waiting: bool,
    guesses: u32,
    ranking: Vec<RankRow>,
}

impl Client<TcpStream> {
    /// Connects and, if configured, announces the nickname right away so the
    /// server finds it as the first line of the session.
    pub async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(&config.server).await?;
        info!("Connected to {}", config.server);

        let mut client = Client::new(stream, config.wait_timeout);
        if let Some(nickname) = &config.nickname {
            client.send_nickname(nickname).await?;
        }
        Ok(client)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Client<S> {
    pub fn new(stream: S, wait_timeout: Duration) -> Self {
        Self {
            stream: BufReader::new(stream),
            wait_timeout,
            waiting: false,
            guesses: 0,
            ranking: Vec::new(),
        }
    }

    pub async fn send_nickname(&mut self, nickname: &str) -> Result<(), ClientError> {
        self.send(&ClientMessage::Nick(nickname.to_string())).await
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<(), ClientError> {
        debug!("-> {}", message);
        let line = format!("{}\n", message);
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Reads one line; bounded by the wait timeout while waiting for others.
    async fn read_line(&mut self) -> Result<String, ClientError> {
        let mut line = String::new();
        let read = if self.waiting {
            timeout(self.wait_timeout, self.stream.read_line(&mut line))
                .await
                .map_err(|_| ClientError::Timeout(self.wait_timeout))??
        } else {
            self.stream.read_line(&mut line).await?
        };

        if read == 0 {
            return Err(ClientError::Closed);
        }
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        debug!("<- {}", line);
        Ok(line)
    }

    /// Reads the opening `START:<low>:<high>` message.
    pub async fn wait_for_start(&mut self) -> Result<(i64, i64), ClientError> {
        let line = match self.read_line().await {
            Ok(line) => line,
            Err(ClientError::Closed) => return Err(ProtocolError::Empty.into()),
            Err(e) => return Err(e),
        };

        match line.parse::<ServerMessage>()? {
            ServerMessage::Start { low, high } => Ok((low, high)),
            _ => Err(ClientError::UnexpectedGreeting(line)),
        }
    }

    /// Plays one game: prompts for guesses until the number is found, then
    /// waits for the final ranking and the server's goodbye.
    pub async fn play<R, W>(
        &mut self,
        input: &mut InputManager<R>,
        renderer: &mut Renderer<W>,
    ) -> Result<SessionOutcome, ClientError>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let (low, high) = self.wait_for_start().await?;
        renderer.welcome(low, high)?;

        loop {
            if !self.waiting {
                renderer.prompt(low, high)?;
                match input.next().await? {
                    PlayerInput::Quit => {
                        self.send(&ClientMessage::Quit).await?;
                        renderer.goodbye()?;
                        return Ok(SessionOutcome::Quit);
                    }
                    PlayerInput::Invalid(text) => {
                        renderer.input_rejected(&text)?;
                        continue;
                    }
                    PlayerInput::Guess(value) => {
                        self.send(&ClientMessage::Guess(value)).await?;
                        self.guesses += 1;
                    }
                }
            }

            let line = self.read_line().await?;
            match line.parse::<ServerMessage>() {
                Ok(ServerMessage::Result(result)) => {
                    if result == GuessResult::Correct {
                        self.waiting = true;
                    }
                    renderer.result(result)?;
                }
                Ok(ServerMessage::Wait) => {
                    self.waiting = true;
                    renderer.waiting()?;
                }
                Ok(ServerMessage::RankingStart) => {
                    self.ranking = self.collect_ranking(renderer).await?;
                }
                Ok(ServerMessage::Bye) => {
                    renderer.goodbye()?;
                    return Ok(SessionOutcome::Finished {
                        guesses: self.guesses,
                        ranking: std::mem::take(&mut self.ranking),
                    });
                }
                _ => renderer.unrecognized(&line)?,
            }
        }
    }

    async fn collect_ranking<W: Write>(
        &mut self,
        renderer: &mut Renderer<W>,
    ) -> Result<Vec<RankRow>, ClientError> {
        renderer.ranking_header()?;
        let mut rows = Vec::new();

        loop {
            let line = self.read_line().await?;
            match line.parse::<ServerMessage>() {
                Ok(ServerMessage::Rank {
                    position,
                    nickname,
                    guesses,
                }) => {
                    let row = RankRow {
                        position,
                        nickname,
                        guesses,
                    };
                    renderer.rank(&row)?;
                    rows.push(row);
                }
                Ok(ServerMessage::RankingEnd) => {
                    renderer.ranking_footer()?;
                    return Ok(rows);
                }
                _ => renderer.unrecognized(&line)?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    async fn play_script(
        mock: tokio_test::io::Mock,
        typed: &'static [u8],
    ) -> (Result<SessionOutcome, ClientError>, String) {
        let mut client = Client::new(mock, Duration::from_secs(30));
        let mut input = InputManager::new(typed);
        let mut renderer = Renderer::new(Vec::new());

        let outcome = client.play(&mut input, &mut renderer).await;
        let output = String::from_utf8(renderer.into_inner()).unwrap();
        (outcome, output)
    }

    #[tokio::test]
    async fn test_full_game_with_ranking() {
        let mock = Builder::new()
            .read(b"START:1:10\n")
            .write(b"GUESS:5\n")
            .read(b"RESULT:LOW\n")
            .write(b"GUESS:7\n")
            .read(b"RESULT:CORRECT\n")
            .read(b"WAIT\n")
            .read(b"RANKING_START\n")
            .read(b"RANK:1:me:2\n")
            .read(b"RANK:2:other:-\n")
            .read(b"RANKING_END\n")
            .read(b"BYE\n")
            .build();

        let (outcome, output) = play_script(mock, b"5\nabc\n7\n").await;

        let expected_ranking = vec![
            RankRow {
                position: 1,
                nickname: "me".to_string(),
                guesses: Some(2),
            },
            RankRow {
                position: 2,
                nickname: "other".to_string(),
                guesses: None,
            },
        ];
        assert_eq!(
            outcome.unwrap(),
            SessionOutcome::Finished {
                guesses: 2,
                ranking: expected_ranking,
            }
        );
        assert!(output.contains("Too low!"));
        assert!(output.contains("`abc` is not a number"));
        assert!(output.contains("Correct!"));
        assert!(output.contains("Please wait"));
        assert!(output.contains("1. me - 2 guesses"));
        assert!(output.contains("2. other - did not guess"));
        assert!(output.ends_with("Goodbye!\n"));
    }

    #[tokio::test]
    async fn test_wait_behaves_like_correct() {
        let mock = Builder::new()
            .read(b"START:1:10\n")
            .write(b"GUESS:3\n")
            .read(b"WAIT\n")
            .read(b"BYE\n")
            .build();

        let (outcome, output) = play_script(mock, b"3\n").await;
        assert_eq!(
            outcome.unwrap(),
            SessionOutcome::Finished {
                guesses: 1,
                ranking: Vec::new(),
            }
        );
        assert_eq!(output.matches("Your guess").count(), 1);
    }

    #[tokio::test]
    async fn test_quit_sends_quit() {
        let mock = Builder::new()
            .read(b"START:1:10\n")
            .write(b"GUESS:2\n")
            .read(b"RESULT:HIGH\n")
            .write(b"QUIT\n")
            .build();

        let (outcome, output) = play_script(mock, b"2\nq\n").await;
        assert_eq!(outcome.unwrap(), SessionOutcome::Quit);
        assert!(output.contains("Too high!"));
    }

    #[tokio::test]
    async fn test_end_of_input_quits() {
        let mock = Builder::new()
            .read(b"START:1:10\n")
            .write(b"QUIT\n")
            .build();

        let (outcome, _) = play_script(mock, b"").await;
        assert_eq!(outcome.unwrap(), SessionOutcome::Quit);
    }

    #[tokio::test]
    async fn test_unrecognized_message_is_shown_verbatim() {
        let mock = Builder::new()
            .read(b"START:1:10\n")
            .write(b"GUESS:4\n")
            .read(b"NEWS:server restarting soon\n")
            .write(b"GUESS:4\n")
            .read(b"RESULT:ERROR\n")
            .write(b"QUIT\n")
            .build();

        let (outcome, output) = play_script(mock, b"4\n4\nq\n").await;
        assert_eq!(outcome.unwrap(), SessionOutcome::Quit);
        assert!(output.contains("NEWS:server restarting soon\n"));
        assert!(output.contains("The server rejected that guess."));
    }

    #[tokio::test]
    async fn test_nickname_sent_before_start() {
        let mock = Builder::new()
            .write(b"NICK:zoe\n")
            .read(b"START:0:100\n")
            .build();

        let mut client = Client::new(mock, Duration::from_secs(30));
        client.send_nickname("zoe").await.unwrap();
        assert_eq!(client.wait_for_start().await.unwrap(), (0, 100));
    }

    #[tokio::test]
    async fn test_missing_greeting_is_protocol_error() {
        let mock = Builder::new().build();
        let mut client = Client::new(mock, Duration::from_secs(30));

        assert!(matches!(
            client.wait_for_start().await,
            Err(ClientError::Protocol(ProtocolError::Empty))
        ));
    }

    #[tokio::test]
    async fn test_malformed_greeting_is_protocol_error() {
        let mock = Builder::new().read(b"START:one:ten\n").build();
        let mut client = Client::new(mock, Duration::from_secs(30));
        assert!(matches!(
            client.wait_for_start().await,
            Err(ClientError::Protocol(ProtocolError::InvalidNumber(_)))
        ));

        let mock = Builder::new().read(b"WAIT\n").build();
        let mut client = Client::new(mock, Duration::from_secs(30));
        assert!(matches!(
            client.wait_for_start().await,
            Err(ClientError::UnexpectedGreeting(line)) if line == "WAIT"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_server_times_out_while_waiting() {
        let mock = Builder::new()
            .read(b"START:1:10\n")
            .write(b"GUESS:6\n")
            .read(b"RESULT:CORRECT\n")
            .wait(Duration::from_secs(120))
            .build();

        let (outcome, output) = play_script(mock, b"6\n").await;
        assert!(matches!(outcome, Err(ClientError::Timeout(t)) if t == Duration::from_secs(30)));
        assert!(output.contains("Correct!"));
    }

    #[tokio::test]
    async fn test_server_hangup_while_guessing() {
        let mock = Builder::new()
            .read(b"START:1:10\n")
            .write(b"GUESS:6\n")
            .build();

        let (outcome, _) = play_script(mock, b"6\n").await;
        assert!(matches!(outcome, Err(ClientError::Closed)));
    }
}
