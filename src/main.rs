//! # Mantis Search CLI (`msearch`)
//!
//! Builds and queries the full-text search index over a MantisBT database.
//!
//! ## Usage
//!
//! ```bash
//! msearch --config ./config/msearch.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `msearch init` | Create (or refresh) the search index |
//! | `msearch search "<query>"` | Ranked search across issues, notes, and attachments |
//! | `msearch attachments` | Extract text from attachments not yet indexed |
//! | `msearch serve` | Start the HTTP search API |
//!
//! ## Examples
//!
//! ```bash
//! msearch init
//! msearch search '"connection timeout" -printer'
//! msearch search timeout --limit 5 --json
//! msearch attachments --tika http://localhost:9998 --limit 200
//! msearch serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mantis_search::{attachments, config, index_cmd, search, server};

/// Mantis Search: ranked full-text search for MantisBT.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/msearch.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "msearch", about = "Ranked full-text search for MantisBT", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/msearch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the search index, or refresh it if it already exists.
    ///
    /// Safe to run repeatedly, e.g. from cron.
    Init,

    /// Search issues, notes, and attachment text.
    ///
    /// Accepts web-search syntax: bare words are ANDed, `"quoted phrases"`
    /// must appear in order, `or` separates alternatives, and a leading `-`
    /// excludes a term.
    Search {
        /// The search query.
        query: String,

        /// Maximum number of results (values below 1 mean the default, 10).
        #[arg(long, allow_hyphen_values = true)]
        limit: Option<i64>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Extract and index text from attachments that have none yet.
    Attachments {
        /// Process at most this many files.
        #[arg(long)]
        limit: Option<usize>,

        /// Only count the pending files.
        #[arg(long)]
        dry_run: bool,

        /// Use the Tika server at this URL, overriding the configured extractor.
        #[arg(long)]
        tika: Option<String>,
    },

    /// Start the HTTP search API on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mantis_search=info,mantis_search_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            index_cmd::run_build(&cfg).await?;
        }
        Commands::Search { query, limit, json } => {
            search::run_search(&cfg, &query, limit, json).await?;
        }
        Commands::Attachments {
            limit,
            dry_run,
            tika,
        } => {
            attachments::run_index_attachments(&cfg, limit, dry_run, tika.as_deref()).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
