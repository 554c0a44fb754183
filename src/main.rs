//! # dicom-sink CLI (`dcmsink`)
//!
//! ## Usage
//!
//! ```bash
//! dcmsink --config ./config/dcmsink.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dcmsink init` | Create the SQLite schema (and the CouchDB database if configured) |
//! | `dcmsink ingest [PATH]` | Ingest every matching file under `PATH` (default `ingest.root`) |
//! | `dcmsink stats` | Print table counts and a modality breakdown |
//! | `dcmsink get <uid>` | Print the stored document for one SOP Instance UID |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dicom_sink::ingest::IngestFlags;
use dicom_sink::{backend, config, get, ingest, migrate, stats};

/// Ingest DICOM files as JSON documents into SQLite or CouchDB.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/dcmsink.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "dcmsink",
    about = "Ingest DICOM files as JSON documents into SQLite or CouchDB",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/dcmsink.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all tables. With the CouchDB
    /// document store configured, also creates the CouchDB database.
    /// Safe to run repeatedly.
    Init,

    /// Ingest DICOM files.
    ///
    /// Walks PATH (or `ingest.root`), transcodes every file with the
    /// configured extension and persists it with the configured backend.
    Ingest {
        /// File or directory to ingest. Defaults to `ingest.root`.
        path: Option<PathBuf>,

        /// Record failing files and continue; exit non-zero at the end.
        #[arg(long)]
        keep_going: bool,

        /// Read and transcode only; nothing is written.
        #[arg(long)]
        dry_run: bool,

        /// Include binary values (base64) and bulk-data references.
        #[arg(long)]
        include_binary: bool,
    },

    /// Show database statistics.
    Stats,

    /// Print the stored document for a SOP Instance UID.
    Get {
        /// SOP Instance UID (0008,0018).
        sop_instance_uid: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            if cfg.uses_couchdb() {
                backend::couch_store(&cfg)?.ensure_database().await?;
            }
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            path,
            keep_going,
            dry_run,
            include_binary,
        } => {
            let flags = IngestFlags {
                keep_going,
                dry_run,
                include_binary,
            };
            ingest::run_ingest(&cfg, path, flags).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Get { sop_instance_uid } => {
            get::run_get(&cfg, &sop_instance_uid).await?;
        }
    }

    Ok(())
}
