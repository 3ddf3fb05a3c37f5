//! Offline administration for pattern-vector index snapshots.

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
pub use commands::{handle_build, handle_search, handle_stats, handle_verify, init_logging};
