//! NetPulse CLI
//!
//! A command-line tool for reading the monitor's status and history and for
//! controlling its session.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::session;

/// NetPulse CLI
#[derive(Parser)]
#[command(name = "pulsectl")]
#[command(author, version, about = "CLI for the NetPulse network monitor", long_about = None)]
pub struct Cli {
    /// Daemon URL (can also be set via PULSE_API_URL env var)
    #[arg(long, env = "PULSE_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the current reading, tier and session flags
    Status,

    /// Show the rolling latency and jitter history
    History,

    /// Start a monitoring session
    Start,

    /// Stop the monitoring session
    Stop,

    /// Run a timed stress test on the running session
    Stress,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;
    let format = config.format(cli.format);

    let client = client::ApiClient::new(&config.api_url(cli.api_url))?;

    match cli.command {
        Commands::Status => session::show_status(&client, format).await?,
        Commands::History => session::show_history(&client, format).await?,
        Commands::Start => session::start(&client, format).await?,
        Commands::Stop => session::stop(&client, format).await?,
        Commands::Stress => session::stress(&client, format).await?,
    }

    Ok(())
}
