//! Ferrule CLI: the main entry point.
//!
//! Commands:
//! - `run`    : Answer one query with the agent loop
//! - `tools`  : Discover and list the configured tools
//! - `ingest` : Add a document to the retrieval memory
//! - `recall` : Query the retrieval memory
//! - `memory` : Memory statistics and eviction
//! - `config` : Show the effective configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "ferrule",
    about = "Ferrule: tool-using agent with retrieval memory",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.ferrule/config.toml)
    #[arg(short, long, global = true, env = "FERRULE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a query with the agent loop
    Run {
        /// The natural-language query
        query: String,

        /// Override agent.max_steps
        #[arg(long)]
        max_steps: Option<u32>,

        /// Print the full session record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Discover the configured transports and list their tools
    Tools {
        /// Print the catalog as JSON
        #[arg(long)]
        json: bool,
    },

    /// Chunk, embed, and store a document ("-" reads stdin)
    Ingest {
        path: PathBuf,

        /// Source identifier (defaults to the path)
        #[arg(short, long)]
        source: Option<String>,
    },

    /// Retrieve the chunks most similar to a text
    Recall {
        text: String,

        #[arg(short = 'k', long, default_value_t = 5)]
        top_k: usize,
    },

    /// Memory index maintenance
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },

    /// Show the effective configuration
    Config {
        /// Print the config file path instead
        #[arg(long)]
        path: bool,
    },
}

#[derive(Subcommand)]
enum MemoryAction {
    /// Show index statistics
    Stats,

    /// Remove every chunk from a source
    Forget { source: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so command output stays pipeable.
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            query,
            max_steps,
            json,
        } => commands::run::run(config, &query, max_steps, json).await?,
        Commands::Tools { json } => commands::tools::run(config, json).await?,
        Commands::Ingest { path, source } => {
            commands::memory::ingest(&config, &path, source).await?
        }
        Commands::Recall { text, top_k } => commands::memory::recall(&config, &text, top_k).await?,
        Commands::Memory { action } => match action {
            MemoryAction::Stats => commands::memory::stats(&config).await?,
            MemoryAction::Forget { source } => commands::memory::forget(&config, &source).await?,
        },
        Commands::Config { path } => commands::config_cmd::run(&config, cli.config.as_deref(), path)?,
    }

    Ok(())
}
