//! Nexus Import - command-line bulk importer
//!
//! Loads pre-resolved JSON-lines node and relationship files into a new
//! record store, and reads back the counts of finished stores.

pub mod commands;
pub mod input;
pub mod settings;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Bulk importer for Nexus record stores
#[derive(Parser, Debug)]
#[command(name = "nexus-import")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Import input files into a new store
    Import(commands::ImportArgs),
    /// Print counts of a finished store
    Counts(commands::CountsArgs),
}

/// Install the global subscriber logging to stderr; `RUST_LOG` wins over `--verbose`
pub fn init_tracing(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            "nexus_store=debug,nexus_import=debug".into()
        } else {
            "nexus_store=info,nexus_import=info".into()
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_writer(std::io::stderr)))
        .init();
}

/// Run a parsed command line, printing its result as JSON
pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Import(args) => {
            let summary = commands::import(args)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Counts(args) => {
            let report = commands::counts(&args)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
