//! Terminal output for the guessing client

use shared::GuessResult;
use std::io::{self, Write};

/// One row of the final standings as received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankRow {
    pub position: usize,
    pub nickname: String,
    pub guesses: Option<u32>,
}

impl RankRow {
    pub fn describe(&self) -> String {
        match self.guesses {
            Some(count) => format!("{}. {} - {} guesses", self.position, self.nickname, count),
            None => format!("{}. {} - did not guess", self.position, self.nickname),
        }
    }
}

/// Writes everything the player sees. Generic over the sink so tests can
/// capture the output.
pub struct Renderer<W> {
    out: W,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn welcome(&mut self, low: i64, high: i64) -> io::Result<()> {
        writeln!(self.out, "Guess the number between {} and {}.", low, high)
    }

    pub fn prompt(&mut self, low: i64, high: i64) -> io::Result<()> {
        write!(self.out, "Your guess ({}-{}, q to quit): ", low, high)?;
        self.out.flush()
    }

    pub fn input_rejected(&mut self, text: &str) -> io::Result<()> {
        writeln!(
            self.out,
            "`{}` is not a number; enter a whole number or q to quit.",
            text
        )
    }

    pub fn result(&mut self, result: GuessResult) -> io::Result<()> {
        let text = match result {
            GuessResult::Low => "Too low!",
            GuessResult::High => "Too high!",
            GuessResult::Correct => "Correct!",
            GuessResult::Error => "The server rejected that guess.",
        };
        writeln!(self.out, "{}", text)
    }

    pub fn waiting(&mut self) -> io::Result<()> {
        writeln!(self.out, "Please wait for the other players to finish...")
    }

    pub fn ranking_header(&mut self) -> io::Result<()> {
        writeln!(self.out, "=== Final ranking ===")
    }

    pub fn rank(&mut self, row: &RankRow) -> io::Result<()> {
        writeln!(self.out, "{}", row.describe())
    }

    pub fn ranking_footer(&mut self) -> io::Result<()> {
        writeln!(self.out, "=====================")
    }

    /// Shows a message the client does not understand, unchanged.
    pub fn unrecognized(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.out, "{}", line)
    }

    pub fn goodbye(&mut self) -> io::Result<()> {
        writeln!(self.out, "Goodbye!")?;
        self.out.flush()
    }
}
