use clap::Parser;
use client::input::InputManager;
use client::network::{Client, ClientConfig, ClientError, SessionOutcome};
use client::rendering::Renderer;
use log::info;
use shared::DEFAULT_PORT;
use std::time::Duration;
use tokio::io::BufReader;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value_t = format!("127.0.0.1:{}", DEFAULT_PORT))]
    server: String,

    /// Nickname announced to the server
    #[arg(short = 'n', long)]
    nick: Option<String>,

    /// Seconds to wait for the ranking before giving up
    #[arg(short = 'w', long, default_value = "30")]
    wait_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = ClientConfig {
        server: args.server,
        nickname: args.nick,
        wait_timeout: Duration::from_secs(args.wait_timeout_secs),
    };

    info!("Connecting to: {}", config.server);
    let mut client = Client::connect(&config).await?;

    let mut input = InputManager::new(BufReader::new(tokio::io::stdin()));
    let mut renderer = Renderer::new(std::io::stdout());

    match client.play(&mut input, &mut renderer).await {
        Ok(SessionOutcome::Finished { guesses, .. }) => {
            info!("Game over after {} guesses", guesses);
            Ok(())
        }
        Ok(SessionOutcome::Quit) => Ok(()),
        Err(ClientError::Timeout(waited)) => {
            eprintln!(
                "No word from the server for {}s; it may have crashed.",
                waited.as_secs()
            );
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}
