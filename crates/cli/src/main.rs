//! NEO hazard prediction CLI
//!
//! A command-line tool for scoring record batches against the prediction
//! service and checking its health.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{health, predict};
use std::path::PathBuf;

/// NEO hazard prediction CLI
#[derive(Parser)]
#[command(name = "neoctl")]
#[command(author, version, about = "CLI for the NEO hazard prediction service", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via NEO_API_URL env var)
    #[arg(long, env = "NEO_API_URL", default_value = "http://localhost:9696")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Score a batch of NEO records
    Predict {
        /// JSON file holding an array of records
        #[arg(long)]
        file: PathBuf,
    },

    /// Show service health and readiness
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let client = client::ApiClient::new(&cli.api_url)?;

    match cli.command {
        Commands::Predict { file } => predict::run_predict(&client, &file, cli.format).await?,
        Commands::Health => health::show_health(&client, cli.format).await?,
    }

    Ok(())
}
