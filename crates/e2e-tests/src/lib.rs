//! End-to-end test infrastructure for the pattern index.
//!
//! Provides a shared TestHarness and helper functions for tests covering
//! the full insert-to-query-to-snapshot pipeline.

use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use pattern_vector::{DistanceMetric, IndexConfig};

/// Shared test harness: a temp directory and a snapshot path inside it.
pub struct TestHarness {
    /// Keeps the temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    /// Path for the index snapshot file
    pub snapshot_path: PathBuf,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let snapshot_path = temp_dir.path().join("patterns.pvix");
        Self {
            _temp_dir: temp_dir,
            snapshot_path,
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Euclidean config with a fixed layer-sampler seed for reproducible runs.
pub fn euclidean_config(dimension: usize, seed: u64) -> IndexConfig {
    IndexConfig::new(dimension)
        .with_metric(DistanceMetric::Euclidean)
        .with_seed(seed)
}

/// Generate `count` uniform random vectors in [-0.5, 0.5)^dimension.
pub fn random_vectors(seed: u64, count: usize, dimension: usize) -> Vec<Vec<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| (0..dimension).map(|_| rng.random::<f64>() - 0.5).collect())
        .collect()
}

/// Exact top-k ids by brute force, distance ties broken by ascending id.
pub fn brute_force_top_k(
    metric: DistanceMetric,
    corpus: &[(u64, Vec<f64>)],
    query: &[f64],
    k: usize,
) -> Vec<u64> {
    let mut scored: Vec<(u64, f64)> = corpus
        .iter()
        .map(|(id, v)| {
            let d = metric.compute(query, v).expect("corpus vector valid");
            (*id, d)
        })
        .collect();
    scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    scored.into_iter().take(k).map(|(id, _)| id).collect()
}

/// Fraction of the expected ids present in the approximate result.
pub fn recall_at_k(expected: &[u64], got: &[u64]) -> f64 {
    if expected.is_empty() {
        return 1.0;
    }
    let hits = got.iter().filter(|id| expected.contains(id)).count();
    hits as f64 / expected.len() as f64
}
