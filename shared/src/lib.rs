use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 7878;
pub const DEFAULT_LOW: i64 = 0;
pub const DEFAULT_HIGH: i64 = 100;
pub const DEFAULT_MAX_PLAYERS: usize = 8;
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Placeholder sent in a `RANK` row for a player who never found their number.
pub const NO_GUESSES: &str = "-";

/// Errors produced when a line does not decode into a protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty message")]
    Empty,
    #[error("unknown message `{0}`")]
    UnknownMessage(String),
    #[error("malformed {kind} message `{line}`")]
    Malformed { kind: &'static str, line: String },
    #[error("invalid number `{0}`")]
    InvalidNumber(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuessResult {
    Low,
    High,
    Correct,
    Error,
}

impl GuessResult {
    fn as_str(self) -> &'static str {
        match self {
            GuessResult::Low => "LOW",
            GuessResult::High => "HIGH",
            GuessResult::Correct => "CORRECT",
            GuessResult::Error => "ERROR",
        }
    }
}

/// Messages sent from the server to a player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Start {
        low: i64,
        high: i64,
    },
    Result(GuessResult),
    Wait,
    RankingStart,
    Rank {
        position: usize,
        nickname: String,
        guesses: Option<u32>,
    },
    RankingEnd,
    Bye,
}

/// Messages sent from a player to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Only honoured as the very first line of a session.
    Nick(String),
    Guess(i64),
    Quit,
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMessage::Start { low, high } => write!(f, "START:{}:{}", low, high),
            ServerMessage::Result(result) => write!(f, "RESULT:{}", result.as_str()),
            ServerMessage::Wait => f.write_str("WAIT"),
            ServerMessage::RankingStart => f.write_str("RANKING_START"),
            ServerMessage::Rank {
                position,
                nickname,
                guesses,
            } => match guesses {
                Some(count) => write!(f, "RANK:{}:{}:{}", position, nickname, count),
                None => write!(f, "RANK:{}:{}:{}", position, nickname, NO_GUESSES),
            },
            ServerMessage::RankingEnd => f.write_str("RANKING_END"),
            ServerMessage::Bye => f.write_str("BYE"),
        }
    }
}

impl fmt::Display for ClientMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientMessage::Nick(name) => write!(f, "NICK:{}", name),
            ClientMessage::Guess(value) => write!(f, "GUESS:{}", value),
            ClientMessage::Quit => f.write_str("QUIT"),
        }
    }
}

fn parse_number<T: FromStr>(field: &str) -> Result<T, ProtocolError> {
    field
        .trim()
        .parse()
        .map_err(|_| ProtocolError::InvalidNumber(field.to_string()))
}

/// Strips the line terminator (`\n` or `\r\n`) left by a line reader.
fn strip_terminator(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}

impl FromStr for ServerMessage {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = strip_terminator(line);
        if line.is_empty() {
            return Err(ProtocolError::Empty);
        }

        let (kind, rest) = match line.split_once(':') {
            Some((kind, rest)) => (kind, Some(rest)),
            None => (line, None),
        };

        match (kind, rest) {
            ("START", Some(rest)) => {
                let (low, high) = rest.split_once(':').ok_or(ProtocolError::Malformed {
                    kind: "START",
                    line: line.to_string(),
                })?;
                Ok(ServerMessage::Start {
                    low: parse_number(low)?,
                    high: parse_number(high)?,
                })
            }
            ("RESULT", Some(rest)) => match rest {
                "LOW" => Ok(ServerMessage::Result(GuessResult::Low)),
                "HIGH" => Ok(ServerMessage::Result(GuessResult::High)),
                "CORRECT" => Ok(ServerMessage::Result(GuessResult::Correct)),
                "ERROR" => Ok(ServerMessage::Result(GuessResult::Error)),
                _ => Err(ProtocolError::Malformed {
                    kind: "RESULT",
                    line: line.to_string(),
                }),
            },
            ("RANK", Some(rest)) => {
                // The nickname sits between the position and the count.
                let malformed = || ProtocolError::Malformed {
                    kind: "RANK",
                    line: line.to_string(),
                };
                let (position, rest) = rest.split_once(':').ok_or_else(malformed)?;
                let (nickname, guesses) = rest.rsplit_once(':').ok_or_else(malformed)?;
                let guesses = if guesses == NO_GUESSES {
                    None
                } else {
                    Some(parse_number(guesses)?)
                };
                Ok(ServerMessage::Rank {
                    position: parse_number(position)?,
                    nickname: nickname.to_string(),
                    guesses,
                })
            }
            ("WAIT", None) => Ok(ServerMessage::Wait),
            ("RANKING_START", None) => Ok(ServerMessage::RankingStart),
            ("RANKING_END", None) => Ok(ServerMessage::RankingEnd),
            ("BYE", None) => Ok(ServerMessage::Bye),
            _ => Err(ProtocolError::UnknownMessage(line.to_string())),
        }
    }
}

impl FromStr for ClientMessage {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = strip_terminator(line);
        if line.trim().is_empty() {
            return Err(ProtocolError::Empty);
        }

        match line.split_once(':') {
            Some(("NICK", name)) => Ok(ClientMessage::Nick(name.to_string())),
            Some(("GUESS", value)) => Ok(ClientMessage::Guess(parse_number(value)?)),
            None if line.trim() == "QUIT" => Ok(ClientMessage::Quit),
            _ => Err(ProtocolError::UnknownMessage(line.to_string())),
        }
    }
}

/// Normalizes a requested nickname so it can travel inside a `RANK` row.
///
/// Returns `None` when nothing usable is left, in which case the caller keeps
/// the generated default name.
pub fn sanitize_nickname(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| if c == ':' || c.is_control() { '_' } else { c })
        .collect();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}
