//! Cardmap CLI - Offline pictogram taxonomy pipeline.
//!
//! Cardmap takes a set of pictogram cards (image + keyword) and produces a
//! navigable taxonomy: filtered cards, joint image-text embeddings, a
//! cluster tree, and a theme tag per leaf.
//!
//! # Usage
//!
//! ```bash
//! # Run the full pipeline over a card directory or manifest
//! cardmap run ./cards/
//!
//! # Review and approve the filter output when the checkpoint is enabled
//! cardmap approve
//!
//! # View configuration
//! cardmap config show
//! ```

use clap::{Parser, Subcommand};

mod cli;
mod logging;

/// Cardmap - Offline pipeline that turns a pictogram card set into a navigable taxonomy.
#[derive(Parser, Debug)]
#[command(name = "cardmap")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the pipeline: filter, embed, cluster, tag, assemble
    Run(cli::run::RunArgs),

    /// Review and approve the filter output checkpoint
    Approve(cli::approve::ApproveArgs),

    /// View and manage configuration
    Config(cli::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging from config, with CLI verbose override.
    // Note: logging isn't initialized yet, so use eprintln for config warnings.
    let config = match cardmap_core::Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Warning: Failed to load config: {e}\n  \
                 Using default configuration. Check your config file with `cardmap config path`."
            );
            cardmap_core::Config::default()
        }
    };
    logging::init_from_config(&config, cli.verbose, cli.json_logs);

    tracing::debug!("Cardmap v{}", cardmap_core::VERSION);

    // Dispatch to the appropriate command handler
    match cli.command {
        Commands::Run(args) => cli::run::execute(args).await,
        Commands::Approve(args) => cli::approve::execute(args).await,
        Commands::Config(args) => cli::config::execute(args).await,
    }
}
