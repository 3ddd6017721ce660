//! `pcsc-watch`: watch PC/SC readers and talk to smart cards from the command line

use clap::{Parser, Subcommand};
use nexum_pcsc::{Client, ClientConfig};
use std::time::Duration;
use tracing::debug;

mod commands;
mod utils;

use commands::*;

#[derive(Parser)]
#[command(version, about = "Watch PC/SC readers and talk to smart cards")]
struct Cli {
    /// Only use the reader with this name
    #[arg(short, long, global = true)]
    reader: Option<String>,

    /// How long to wait for readers or cards, in milliseconds
    #[arg(long, default_value_t = 1000, global = true)]
    timeout_ms: u64,

    /// Trace level output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List attached readers and their status
    List,

    /// Watch readers until interrupted, probing every inserted card
    Watch,

    /// Send an APDU to the first card that shows up
    Send {
        /// Command APDU as a hex string
        #[arg(required = true)]
        apdu: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose);

    let client = Client::with_config(ClientConfig::new())?;
    let timeout = Duration::from_millis(cli.timeout_ms);
    debug!(config = ?client.config(), "client created");

    match &cli.command {
        Commands::List => list_command(&client, cli.reader.as_deref(), timeout).await?,
        Commands::Watch => watch_command(&client, cli.reader.clone()).await?,
        Commands::Send { apdu } => {
            send_command(&client, cli.reader.clone(), apdu, timeout).await?
        }
    }

    Ok(())
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_ansi(true)
        .init();
}
