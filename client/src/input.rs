//! Player keyboard input for the guessing client

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

/// One line typed by the player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerInput {
    Guess(i64),
    Quit,
    /// Anything else; rejected locally without consuming a turn
    Invalid(String),
}

impl PlayerInput {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.eq_ignore_ascii_case("q") {
            return PlayerInput::Quit;
        }
        match trimmed.parse() {
            Ok(value) => PlayerInput::Guess(value),
            Err(_) => PlayerInput::Invalid(trimmed.to_string()),
        }
    }
}

/// Reads player input line by line from any buffered source (stdin in the
/// binary, byte slices in tests).
pub struct InputManager<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin> InputManager<R> {
    pub fn new(source: R) -> Self {
        Self {
            lines: source.lines(),
        }
    }

    /// Returns the next input. End of input counts as quitting.
    pub async fn next(&mut self) -> io::Result<PlayerInput> {
        Ok(match self.lines.next_line().await? {
            Some(line) => PlayerInput::parse(&line),
            None => PlayerInput::Quit,
        })
    }
}
