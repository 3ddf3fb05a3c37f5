//! Build/search performance and recall measurement.
//!
//! Builds a 10k x 128 index, then reports build throughput, Recall@10
//! against brute force, and query latency at several beam widths.
//!
//! ```bash
//! cargo run -p e2e-tests --bin perf_bench --release
//! ```

use std::time::Instant;

use e2e_tests::{brute_force_top_k, euclidean_config, random_vectors, recall_at_k};
use pattern_vector::{DistanceMetric, PatternIndex, SearchOptions};

const CORPUS: usize = 10_000;
const DIMENSION: usize = 128;
const QUERIES: usize = 100;

fn main() {
    let index = PatternIndex::open(None, euclidean_config(DIMENSION, 20_000)).unwrap();

    let vectors = random_vectors(20_001, CORPUS, DIMENSION);
    let build_start = Instant::now();
    let mut corpus = Vec::with_capacity(CORPUS);
    for v in vectors {
        let id = index.insert(v.clone(), vec![]).unwrap();
        corpus.push((id, v));
    }
    let build_elapsed = build_start.elapsed();
    println!(
        "build: {} vectors in {:.2?} ({:.0} inserts/s)",
        CORPUS,
        build_elapsed,
        CORPUS as f64 / build_elapsed.as_secs_f64()
    );

    let probes = random_vectors(20_002, QUERIES, DIMENSION);
    let ground_truth: Vec<Vec<u64>> = probes
        .iter()
        .map(|q| brute_force_top_k(DistanceMetric::Euclidean, &corpus, q, 10))
        .collect();

    for ef in [50, 100, 200, 400] {
        let mut total_recall = 0.0;
        let query_start = Instant::now();
        for (query, expected) in probes.iter().zip(&ground_truth) {
            let hits = index
                .search_with_options(
                    query,
                    10,
                    SearchOptions {
                        ef: Some(ef),
                        ..Default::default()
                    },
                )
                .unwrap();
            let got: Vec<u64> = hits.iter().map(|h| h.id).collect();
            total_recall += recall_at_k(expected, &got);
        }
        let per_query = query_start.elapsed() / QUERIES as u32;
        println!(
            "ef={:<4} Recall@10={:.3}  mean latency {:?}",
            ef,
            total_recall / QUERIES as f64,
            per_query
        );
    }

    let stats = index.stats();
    println!(
        "stats: count={} entry_level={:?} memory~{}KiB layers={:?}",
        stats.count,
        stats.entry_point_level,
        stats.memory_estimate_bytes / 1024,
        stats.layer_histogram
    );
}
