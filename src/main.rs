//! # Index Harness CLI (`ixh`)
//!
//! ## Usage
//!
//! ```bash
//! ixh --config ./config/ixh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ixh init` | Create the SQLite database and run schema migrations |
//! | `ixh index <type> <identifier>` | Index one source at its current version |
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`
//! (default `info`).

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use index_harness::config;
use index_harness::db;
use index_harness::ingest::IndexPipeline;
use index_harness::migrate;
use index_harness::sources::{history_for, provider_for, SourceKind};
use index_harness_core::models::SourceParams;

/// Index Harness: incremental indexing of versioned sources.
#[derive(Parser)]
#[command(name = "ixh", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ixh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Index the current state of a source.
    ///
    /// Re-running against an unchanged version is a no-op.
    Index {
        /// Source type: git or filesystem.
        kind: SourceKind,

        /// Repository URL or directory path.
        identifier: String,

        /// Branch, tag, or commit (git only). Defaults to `sources.git.branch`.
        #[arg(long = "ref")]
        git_ref: Option<String>,

        /// Reprocess every document instead of diffing.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Index {
            kind,
            identifier,
            git_ref,
            force,
        } => {
            let pool = db::connect(&cfg).await?;
            migrate::migrate_pool(&pool).await?;

            let pipeline = IndexPipeline::from_config(&cfg, pool.clone())?;
            let provider = provider_for(kind, &cfg)?;
            let history = history_for(kind);
            let params = SourceParams {
                identifier,
                git_ref,
                force,
            };

            let run = pipeline.run(provider.as_ref(), history.as_deref(), &params);
            let (result, interrupted) = tokio::select! {
                result = run => (result, false),
                _ = tokio::signal::ctrl_c() => {
                    tracing::warn!("interrupted; uncommitted work discarded");
                    (Err(anyhow::anyhow!("interrupted")), true)
                }
            };
            if interrupted {
                // A dropped lock guard releases its row on a spawned task.
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            }

            pool.close().await;
            let summary = result?;
            print!("{}", summary);
            println!("ok");
        }
    }

    Ok(())
}
