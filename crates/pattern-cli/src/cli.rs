//! CLI argument parsing for the index admin tool.

use clap::{Parser, Subcommand};

/// Pattern Index Admin
///
/// Offline administration for pattern-vector index snapshots.
#[derive(Parser, Debug)]
#[command(name = "pattern-cli")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a TOML file with index parameters (overrides snapshot
    /// header defaults)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Admin commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build an index snapshot from a JSONL vector file
    Build {
        /// Input JSONL file: one {"vector": [...], "metadata": "..."} per line
        #[arg(short, long)]
        input: String,

        /// Output snapshot path
        #[arg(long)]
        index: String,

        /// Vector dimensionality (inferred from the first record if omitted)
        #[arg(short, long)]
        dimension: Option<usize>,
    },

    /// Query an index snapshot
    Search {
        /// Snapshot path
        #[arg(long)]
        index: String,

        /// Query vector as comma-separated numbers
        #[arg(short, long)]
        vector: String,

        /// Number of results
        #[arg(short, default_value = "10")]
        k: usize,

        /// Beam width override (defaults to the configured ef_search)
        #[arg(long)]
        ef: Option<usize>,
    },

    /// Print index statistics as JSON
    Stats {
        /// Snapshot path
        #[arg(long)]
        index: String,
    },

    /// Audit index structure; exits non-zero on violations
    Verify {
        /// Snapshot path
        #[arg(long)]
        index: String,
    },
}
