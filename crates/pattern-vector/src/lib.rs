//! # pattern-vector
//!
//! HNSW (Hierarchical Navigable Small World) index for pattern embeddings.
//!
//! Stores high-dimensional feature vectors with opaque metadata and answers
//! approximate k-nearest-neighbor queries over a multi-layer proximity
//! graph. Insert- and query-only by design: there is no online deletion.
//!
//! ## Features
//! - Native multi-layer graph with diversity-aware neighbor pruning
//! - Cosine and Euclidean metrics, fixed dimensionality per index
//! - Single-writer/multi-reader discipline with insert deadlines,
//!   backpressure, and cooperative search cancellation
//! - Versioned, checksummed binary snapshots with atomic writes and
//!   degraded linear-scan salvage on corruption
//! - Seedable layer sampling for reproducible insertion sequences

pub mod config;
pub mod distance;
pub mod error;
pub mod hnsw;
pub mod index;
pub mod level;
pub mod node;
pub mod snapshot;
pub mod stats;

pub use config::IndexConfig;
pub use distance::{validate_vector, DistanceMetric};
pub use error::IndexError;
pub use hnsw::{CancelToken, HnswGraph, SearchHit};
pub use index::{PatternIndex, SearchOptions};
pub use level::LevelGenerator;
pub use node::{Node, NodeStore};
pub use snapshot::{SnapshotInfo, SNAPSHOT_MAGIC, SNAPSHOT_VERSION};
pub use stats::{IndexStats, ValidationReport};
