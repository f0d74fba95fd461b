//! mnemos - memoizing retrieval-augmented answering
//!
//! Main entry point for the mnemos CLI.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};

mod commands;

use commands::{ask, clear, init, memory, stats, thread};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// mnemos - answers questions from your documents, remembering what it already knows
#[derive(Parser)]
#[command(name = "mnemos")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Directory holding the user config.toml
    #[arg(long, global = true, env = "MNEMOS_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    /// Directory holding the stores and logs
    #[arg(long, global = true, env = "MNEMOS_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Index a folder of documents into the vector cache
    Init(init::InitArgs),

    /// Ask a question
    Ask(ask::AskArgs),

    /// Show statistics for every tier
    Stats(stats::StatsArgs),

    /// Clear the caches (and optionally the memory store)
    Clear(clear::ClearArgs),

    /// Memory store operations
    Memory(memory::MemoryArgs),

    /// Conversation thread operations
    Thread(thread::ThreadArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = mnemos_config::load_config_with_options(None, cli.config_dir.as_deref())
        .context("loading configuration")?;

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => loaded.config.storage().resolve_data_dir()?,
    };
    let paths = mnemos_config::StoragePaths::new(data_dir);

    // Initialize tracing: console (human-readable) + rotating JSON file
    let filter = if cli.verbose {
        "mnemos=debug,mnemos_rag=debug,mnemos_cache=debug,mnemos_llm=debug,mnemos_config=debug,info"
    } else {
        "mnemos=info,mnemos_rag=warn,mnemos_cache=warn,mnemos_llm=warn,warn"
    };

    let file_appender = tracing_appender::rolling::daily(&paths.logs, "mnemos.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "mnemos=trace,mnemos_rag=trace,mnemos_cache=debug,mnemos_llm=debug,mnemos_config=debug,info",
                )),
        )
        .init();

    for warning in &loaded.warnings {
        tracing::warn!("{}", warning);
    }
    tracing::debug!(
        sources = ?loaded.loaded_from(),
        data_dir = %paths.data_dir.display(),
        "Configuration loaded"
    );

    let ctx = commands::Context {
        json_output: cli.json,
        verbose: cli.verbose,
        config_base: loaded.base_dir().map(|p| p.to_path_buf()),
        config: loaded.config,
        paths,
    };

    // Dispatch to command handlers
    match cli.command {
        Commands::Init(args) => init::run(args, &ctx).await,
        Commands::Ask(args) => ask::run(args, &ctx).await,
        Commands::Stats(args) => stats::run(args, &ctx).await,
        Commands::Clear(args) => clear::run(args, &ctx).await,
        Commands::Memory(args) => memory::run(args, &ctx).await,
        Commands::Thread(args) => thread::run(args, &ctx).await,
    }
}
