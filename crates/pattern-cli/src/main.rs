//! Pattern Index Admin CLI
//!
//! Offline tooling for pattern-vector snapshots.
//!
//! # Usage
//!
//! ```bash
//! pattern-cli build --input vectors.jsonl --index patterns.pvix
//! pattern-cli search --index patterns.pvix --vector "0.1,0.2,0.3" -k 5
//! pattern-cli stats --index patterns.pvix
//! pattern-cli verify --index patterns.pvix
//! ```

use anyhow::Result;
use clap::Parser;

use pattern_cli::{
    handle_build, handle_search, handle_stats, handle_verify, init_logging, Cli, Commands,
};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    match cli.command {
        Commands::Build {
            input,
            index,
            dimension,
        } => handle_build(&input, &index, dimension, cli.config.as_deref()),
        Commands::Search {
            index,
            vector,
            k,
            ef,
        } => handle_search(&index, &vector, k, ef, cli.config.as_deref()),
        Commands::Stats { index } => handle_stats(&index, cli.config.as_deref()),
        Commands::Verify { index } => handle_verify(&index, cli.config.as_deref()),
    }
}
