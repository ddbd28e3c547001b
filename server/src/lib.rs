//! # Guessing Game Server Library
//!
//! This library provides the session orchestrator for the multiplayer
//! number-guessing game. Every accepted connection becomes a session with its
//! own hidden number drawn from a shared range. Players guess independently;
//! once everyone the operator started has finished, one final ranking is
//! computed and sent to all of them.
//!
//! ## Core Responsibilities
//!
//! ### Session Registry (`registry`)
//! The single source of truth for every session:
//! - Registered, Started and Finished lifecycle states
//! - Secrets, guess counts and nicknames
//! - A broadcast change signal for tasks waiting on a predicate
//! - The one-shot gate that elects the ranking coordinator
//!
//! ### Network Layer (`network`)
//! - TCP listener and connection acceptor, bounded by a player capacity
//! - Line-oriented connection handles that can be force-closed from any task
//! - Service configuration
//!
//! ### Session Workers (`worker`)
//! One task per started session running the protocol state machine:
//! `START`, optional `NICK:` handshake, guesses, then the ranking barrier.
//!
//! ### Ranking (`ranking`)
//! Orders the finished sessions and broadcasts the result exactly once.
//!
//! ### Host Console (`console`)
//! Operator commands: `help`, `list`, `reveal <id>`, `kick <id>`, `start`,
//! `shutdown`.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::game::GameRules;
//! use server::network::{Server, ServerConfig};
//! use tokio::io::BufReader;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         bind_addr: "127.0.0.1:7878".to_string(),
//!         max_players: 4,
//!         rules: GameRules::default(),
//!     };
//!     let server = Server::bind(config).await?;
//!     let console = server.console();
//!
//!     // Accepts players in the background while the operator types commands.
//!     tokio::spawn(server.run_acceptor());
//!     console
//!         .run(BufReader::new(tokio::io::stdin()), std::io::stdout())
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency Model
//!
//! All session state lives behind one lock in the registry. Every state
//! transition bumps a `watch` channel, so tasks blocked at the ranking
//! barrier wake up and re-check it. Kicks and shutdown close connections
//! through a per-connection latch that also wakes the worker's pending read.

pub mod console;
pub mod error;
pub mod game;
pub mod network;
pub mod ranking;
pub mod registry;
pub mod worker;

pub use error::{ServerError, SessionError};
pub use network::{Server, ServerConfig};
