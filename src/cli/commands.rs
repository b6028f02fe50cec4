use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "zenon-connect")]
#[command(about = "Pair a dApp with the Syrius wallet and issue Zenon requests", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reuse or negotiate a pairing and session, then fetch wallet info
    Connect {
        /// Open the wallet deep link when a new pairing URI is generated
        #[arg(short, long)]
        open: bool,
    },
    /// Ask the wallet for its address, chain id and node URL
    Info,
    /// Ask the wallet to sign an account block
    Sign {
        /// Account block as JSON, or @path to read it from a file
        block: String,
    },
    /// Send 1 ZNN from the connected address to itself
    SendDummy,
    /// Have the wallet sign, but not send, 1.1 ZNN from the connected address to itself
    SignDummy,
    /// Show known pairings and sessions without contacting the wallet
    Status,
    /// Print state changes and wallet events until interrupted
    Watch,
    /// Delete a session (the current one when no topic is given)
    DisconnectSession {
        topic: Option<String>,
        #[arg(long)]
        message: Option<String>,
        #[arg(long)]
        data: Option<String>,
    },
    /// Disconnect a pairing (the current one when no topic is given)
    DisconnectPairing { topic: Option<String> },
    /// Disconnect every known pairing
    DisconnectAll {
        #[arg(long)]
        message: Option<String>,
        #[arg(long)]
        data: Option<String>,
    },
    /// Show the active configuration
    Config {
        /// Write the defaults to the config file
        #[arg(long)]
        init: bool,
    },
}
