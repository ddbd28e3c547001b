use clap::Parser;
use log::{error, info};
use server::game::GameRules;
use server::network::{Server, ServerConfig};
use shared::{DEFAULT_HIGH, DEFAULT_LOW, DEFAULT_MAX_PLAYERS, DEFAULT_PORT};
use std::time::Duration;
use tokio::io::BufReader;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Maximum number of players accepted
    #[arg(short, long, default_value_t = DEFAULT_MAX_PLAYERS)]
    max_players: usize,

    /// Lowest possible secret
    #[arg(long, default_value_t = DEFAULT_LOW, allow_hyphen_values = true)]
    low: i64,

    /// Highest possible secret
    #[arg(long, default_value_t = DEFAULT_HIGH, allow_hyphen_values = true)]
    high: i64,

    /// How long a started player may take to send a nickname
    #[arg(long, default_value = "5000")]
    handshake_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ServerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        max_players: args.max_players,
        rules: GameRules {
            low: args.low,
            high: args.high,
            handshake_timeout: Duration::from_millis(args.handshake_timeout_ms),
        },
    };

    let server = Server::bind(config).await?;
    info!(
        "Accepting up to {} players, secrets in {}..={}",
        args.max_players, args.low, args.high
    );

    let console = server.console();
    let acceptor = tokio::spawn(server.run_acceptor());

    tokio::select! {
        result = console.run(BufReader::new(tokio::io::stdin()), std::io::stdout()) => {
            if let Err(e) = result {
                error!("Console failed: {}", e);
                console.shutdown().await;
            }
        }
        _ = console.wait_for_completion() => {
            println!("All player sessions ended, shutting down");
            console.shutdown().await;
        }
        _ = tokio::signal::ctrl_c() => {
            println!("Received Ctrl+C, shutting down...");
            console.shutdown().await;
        }
    }

    match acceptor.await {
        Ok(accepted) => info!("Acceptor stopped after {} players", accepted),
        Err(e) => error!("Acceptor task panicked: {}", e),
    }

    // A pending stdin read cannot be cancelled and would keep the runtime alive.
    std::process::exit(0)
}
