//! Index statistics and health reporting.
//!
//! Polled by observers on their own schedule; the index never pushes
//! metrics anywhere.

use serde::Serialize;

/// Point-in-time index statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    /// Number of live nodes.
    pub count: u64,
    /// Rough in-memory footprint of vectors, metadata, and adjacency.
    pub memory_estimate_bytes: u64,
    /// Node counts per top level, base layer first.
    pub layer_histogram: Vec<u64>,
    /// Level of the current entry point, if any.
    pub entry_point_level: Option<u32>,
    /// True when the index was salvaged from a corrupt snapshot and serves
    /// brute-force results.
    pub degraded: bool,
}

/// Result of a structural audit (`PatternIndex::validate`).
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub count: u64,
    /// Nodes reachable from the entry point over base-layer edges.
    pub reachable_from_entry: u64,
    /// Neighbor lists exceeding their per-layer capacity.
    pub degree_violations: u64,
    /// Human-readable findings; empty means healthy.
    pub issues: Vec<String>,
}

impl ValidationReport {
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty() && self.degree_violations == 0
    }
}
