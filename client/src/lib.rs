//! # Guessing Game Client Library
//!
//! Terminal client for the multiplayer number-guessing game. It connects to
//! the server, optionally announces a nickname, and then drives one game:
//! prompting for guesses, showing the server's answers, and printing the
//! final ranking once every player has finished.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! The protocol engine. Owns the connection, tracks whether the player is
//! still guessing or waiting for the others, and gives up when a waiting
//! player hears nothing from the server for too long.
//!
//! ### Input Module (`input`)
//! Turns typed lines into guesses, quit requests, or locally rejected input.
//!
//! ### Rendering Module (`rendering`)
//! Everything the player reads: prompts, guess results, and ranking rows.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::input::InputManager;
//! use client::network::{Client, ClientConfig};
//! use client::rendering::Renderer;
//! use tokio::io::BufReader;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig {
//!         nickname: Some("alice".to_string()),
//!         ..ClientConfig::default()
//!     };
//!     let mut client = Client::connect(&config).await?;
//!
//!     let mut input = InputManager::new(BufReader::new(tokio::io::stdin()));
//!     let mut renderer = Renderer::new(std::io::stdout());
//!     let outcome = client.play(&mut input, &mut renderer).await?;
//!     println!("{:?}", outcome);
//!
//!     Ok(())
//! }
//! ```

pub mod input;
pub mod network;
pub mod rendering;

pub use network::{Client, ClientConfig, ClientError, SessionOutcome};
