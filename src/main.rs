use clap::Parser;
use tracing_subscriber::EnvFilter;

use zenon_connect::cli::handlers;
use zenon_connect::cli::{Cli, Commands};
use zenon_connect::utils::Notice;
use zenon_connect::{Config, Result};

#[tokio::main]
async fn main() {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("zenon_connect=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(Cli::parse()).await {
        Notice::error(&e).show();
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    // Handle commands
    match cli.command {
        Commands::Connect { open } => handlers::connect(config, open).await,
        Commands::Info => handlers::info(config).await,
        Commands::Sign { block } => handlers::sign(config, block).await,
        Commands::SendDummy => handlers::send_dummy(config).await,
        Commands::SignDummy => handlers::sign_dummy(config).await,
        Commands::Status => handlers::status(config).await,
        Commands::Watch => handlers::watch(config).await,
        Commands::DisconnectSession {
            topic,
            message,
            data,
        } => handlers::disconnect_session(config, topic, message, data).await,
        Commands::DisconnectPairing { topic } => handlers::disconnect_pairing(config, topic).await,
        Commands::DisconnectAll { message, data } => {
            handlers::disconnect_all(config, message, data).await
        }
        Commands::Config { init } => handlers::show_config(&config, init),
    }
}
