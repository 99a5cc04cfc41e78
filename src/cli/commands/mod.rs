//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod providers;
mod scan;
mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "receiptflow")]
#[command(about = "Receipt scanning with OCR and LLM fallback")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Host to bind (default from config, 0.0.0.0)
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (default from config, 5000)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run one receipt image or PDF through the provider chain
    Scan {
        /// File to scan
        file: PathBuf,
        /// Print the raw JSON result
        #[arg(long)]
        json: bool,
    },

    /// Show the configured provider chain
    Providers,
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Serve { host, port } => serve::cmd_serve(&config, host, port).await,
        Commands::Scan { file, json } => scan::cmd_scan(&config, &file, json).await,
        Commands::Providers => providers::cmd_providers(&config),
    }
}
