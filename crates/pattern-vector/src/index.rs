//! Public index facade and the single-writer/multi-reader discipline.
//!
//! Any number of readers run `search` in parallel against the current
//! graph. Inserts are admitted one at a time through a writer gate: the
//! expensive candidate discovery runs under the shared read lock, then a
//! short write-lock critical section publishes the node, so a concurrent
//! reader observes either the pre-insert or the fully-post-insert state
//! and never a partially linked node.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::IndexConfig;
use crate::distance::validate_vector;
use crate::error::IndexError;
use crate::hnsw::{CancelToken, HnswGraph, SearchHit};
use crate::level::LevelGenerator;
use crate::snapshot;
use crate::stats::{IndexStats, ValidationReport};

/// Per-query knobs for `search_with_options`.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Beam width override; defaults to the configured `expansion_search`
    /// and is always clamped to at least `k`.
    pub ef: Option<usize>,
    /// Give up (with `Cancelled`) once this much time has elapsed.
    pub deadline: Option<Duration>,
    /// Cooperative cancellation signal.
    pub cancel: Option<CancelToken>,
}

/// Shared handle to a pattern index.
///
/// Cloning is cheap; all clones address the same index.
#[derive(Clone)]
pub struct PatternIndex {
    inner: Arc<Inner>,
}

struct Inner {
    config: IndexConfig,
    graph: RwLock<HnswGraph>,
    /// Writer admission gate. Also owns the level sampler, so layer draws
    /// are serialized with the inserts that consume them.
    writer: Mutex<WriterState>,
    /// Inserts currently admitted or waiting on the gate.
    pending: AtomicUsize,
    path: Option<PathBuf>,
}

struct WriterState {
    levels: LevelGenerator,
}

/// Decrements the pending-insert counter on every exit path.
struct PendingGuard<'a>(&'a AtomicUsize);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl PatternIndex {
    /// Open an index: empty, or restored from a snapshot at `path`.
    ///
    /// A snapshot that fails validation degrades to a salvaged linear-scan
    /// index, then to an empty one; `open` only fails on IO errors or
    /// invalid configuration, never on corrupt data.
    pub fn open(path: Option<PathBuf>, config: IndexConfig) -> Result<Self, IndexError> {
        config.validate()?;

        let graph = match path.as_deref() {
            Some(snapshot_path) if snapshot_path.exists() => {
                match snapshot::load(snapshot_path, &config) {
                    Ok(store) => {
                        info!(path = ?snapshot_path, nodes = store.len(), "restored index snapshot");
                        HnswGraph::from_parts(config.clone(), store, false)
                    }
                    Err(IndexError::Corrupted(reason)) => {
                        warn!(path = ?snapshot_path, %reason, "snapshot failed validation, attempting salvage");
                        match snapshot::salvage(snapshot_path, &config) {
                            Ok(store) if !store.is_empty() => {
                                warn!(
                                    recovered = store.len(),
                                    "serving degraded linear-scan index"
                                );
                                HnswGraph::from_parts(config.clone(), store, true)
                            }
                            _ => {
                                warn!("salvage yielded nothing, starting empty");
                                HnswGraph::new(config.clone())
                            }
                        }
                    }
                    Err(other) => return Err(other),
                }
            }
            _ => HnswGraph::new(config.clone()),
        };

        let levels = LevelGenerator::new(config.level_multiplier, config.rng_seed);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                graph: RwLock::new(graph),
                writer: Mutex::new(WriterState { levels }),
                pending: AtomicUsize::new(0),
                path,
            }),
        })
    }

    /// Insert with the configured default writer deadline.
    pub fn insert(&self, vector: Vec<f64>, metadata: Vec<u8>) -> Result<u64, IndexError> {
        let deadline = Duration::from_millis(self.inner.config.insert_deadline_ms);
        self.insert_with_deadline(vector, metadata, deadline)
    }

    /// Insert one vector, waiting at most `deadline` for the writer gate.
    ///
    /// Returns `Busy` on gate timeout and `Backpressure` when too many
    /// inserts are already queued; neither mutates the index. Inserts are
    /// applied in gate-admission order and are not cancellable mid-flight.
    pub fn insert_with_deadline(
        &self,
        vector: Vec<f64>,
        metadata: Vec<u8>,
        deadline: Duration,
    ) -> Result<u64, IndexError> {
        validate_vector(&vector, self.inner.config.dimension, self.inner.config.metric)?;

        let pending = self.inner.pending.fetch_add(1, Ordering::SeqCst);
        let _guard = PendingGuard(&self.inner.pending);
        if pending >= self.inner.config.max_pending_inserts {
            return Err(IndexError::Backpressure { pending });
        }

        let mut writer = self
            .inner
            .writer
            .try_lock_for(deadline)
            .ok_or(IndexError::Busy)?;

        if self.inner.graph.read().len() as u64 >= self.inner.config.capacity {
            if self.inner.config.emergency_prune_fraction > 0.0 {
                let dropped = self
                    .inner
                    .graph
                    .write()
                    .rebuild_dropping_oldest(self.inner.config.emergency_prune_fraction);
                warn!(dropped, "index at capacity, emergency prune executed");
            } else {
                return Err(IndexError::ResourceExhausted {
                    capacity: self.inner.config.capacity,
                });
            }
        }

        let level = writer.levels.next_level();
        // Candidate discovery under the shared lock; the gate keeps the
        // plan valid until commit
        let plan = {
            let graph = self.inner.graph.read();
            if graph.is_empty() || graph.is_degraded() {
                None
            } else {
                Some(graph.plan_insert(&vector, level))
            }
        };
        let id = self
            .inner
            .graph
            .write()
            .commit_insert(vector, metadata, level, plan);
        debug!(id, level, "vector inserted");
        Ok(id)
    }

    /// Insert many vectors, one writer admission each.
    ///
    /// Failures are collected per item; the batch never aborts early.
    pub fn insert_batch(
        &self,
        items: Vec<(Vec<f64>, Vec<u8>)>,
    ) -> Vec<Result<u64, IndexError>> {
        items
            .into_iter()
            .map(|(vector, metadata)| self.insert(vector, metadata))
            .collect()
    }

    /// k-NN search with default options.
    pub fn search(&self, query: &[f64], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        self.search_with_options(query, k, SearchOptions::default())
    }

    /// k-NN search with explicit beam width, deadline, or cancellation.
    ///
    /// Returns at most `min(k, len)` hits sorted by ascending distance,
    /// distance ties broken by ascending id. An empty index yields an
    /// empty result, not an error.
    pub fn search_with_options(
        &self,
        query: &[f64],
        k: usize,
        options: SearchOptions,
    ) -> Result<Vec<SearchHit>, IndexError> {
        validate_vector(query, self.inner.config.dimension, self.inner.config.metric)?;
        let ef = options
            .ef
            .unwrap_or(self.inner.config.expansion_search)
            .max(k);
        let deadline = options.deadline.map(|d| Instant::now() + d);
        let graph = self.inner.graph.read();
        graph.search(query, k, ef, options.cancel.as_ref(), deadline)
    }

    pub fn len(&self) -> usize {
        self.inner.graph.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> IndexStats {
        let graph = self.inner.graph.read();
        IndexStats {
            count: graph.len() as u64,
            memory_estimate_bytes: graph.memory_estimate_bytes(),
            layer_histogram: graph.layer_histogram(),
            entry_point_level: graph.entry_level(),
            degraded: graph.is_degraded(),
        }
    }

    /// Structural audit: degree bounds, edge validity, connectivity.
    pub fn validate(&self) -> ValidationReport {
        self.inner.graph.read().validate()
    }

    /// Persist to the path the index was opened with.
    pub fn save(&self) -> Result<(), IndexError> {
        match &self.inner.path {
            Some(path) => {
                let path = path.clone();
                self.save_to(&path)
            }
            None => Err(IndexError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no snapshot path configured",
            ))),
        }
    }

    /// Persist to an explicit path.
    ///
    /// The snapshot is serialized under a short read lock, then written
    /// and atomically renamed off the lock, so readers are only briefly
    /// paused and writers queue behind the gate as usual.
    pub fn save_to(&self, path: &Path) -> Result<(), IndexError> {
        let bytes = {
            let graph = self.inner.graph.read();
            snapshot::encode(&graph)
        };
        snapshot::write_atomic(path, &bytes)?;
        info!(path = ?path, "saved index snapshot");
        Ok(())
    }

    /// Flush to the configured path (if any) and release the handle.
    pub fn close(self) -> Result<(), IndexError> {
        if self.inner.path.is_some() {
            self.save()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::DistanceMetric;
    use tempfile::TempDir;

    fn euclidean_config(dimension: usize) -> IndexConfig {
        IndexConfig::new(dimension)
            .with_metric(DistanceMetric::Euclidean)
            .with_seed(1234)
    }

    #[test]
    fn test_open_empty_and_insert_search() {
        let index = PatternIndex::open(None, euclidean_config(3)).unwrap();
        assert!(index.is_empty());

        let id = index.insert(vec![1.0, 0.0, 0.0], b"alpha".to_vec()).unwrap();
        let hits = index.search(&[1.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, id);
        assert_eq!(hits[0].metadata, b"alpha");
        assert!(hits[0].distance < 1e-12);
    }

    #[test]
    fn test_search_empty_index_returns_empty() {
        let index = PatternIndex::open(None, euclidean_config(3)).unwrap();
        let hits = index.search(&[0.0, 0.0, 0.0], 5).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_dimension_mismatch_leaves_count_unchanged() {
        let index = PatternIndex::open(None, euclidean_config(3)).unwrap();
        index.insert(vec![1.0, 2.0, 3.0], vec![]).unwrap();

        let result = index.insert(vec![1.0, 2.0], vec![]);
        assert!(matches!(
            result,
            Err(IndexError::DimensionMismatch { expected: 3, actual: 2 })
        ));
        assert_eq!(index.stats().count, 1);

        let result = index.search(&[1.0], 1);
        assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_zero_norm_rejected_under_cosine() {
        let config = IndexConfig::new(2).with_seed(9);
        let index = PatternIndex::open(None, config).unwrap();
        let result = index.insert(vec![0.0, 0.0], vec![]);
        assert!(matches!(result, Err(IndexError::InvalidVector(_))));
        assert_eq!(index.stats().count, 0);
    }

    #[test]
    fn test_batch_collects_per_item_results() {
        let index = PatternIndex::open(None, euclidean_config(2)).unwrap();
        let results = index.insert_batch(vec![
            (vec![1.0, 0.0], vec![]),
            (vec![1.0, 0.0, 0.0], vec![]),
            (vec![0.0, 1.0], vec![]),
        ]);
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(IndexError::DimensionMismatch { .. })
        ));
        assert!(results[2].is_ok());
        assert_eq!(index.stats().count, 2);
    }

    #[test]
    fn test_stats_shape() {
        let index = PatternIndex::open(None, euclidean_config(4)).unwrap();
        for i in 0..50 {
            index
                .insert(vec![i as f64, 0.0, 0.0, 1.0], vec![])
                .unwrap();
        }

        let stats = index.stats();
        assert_eq!(stats.count, 50);
        assert_eq!(stats.layer_histogram.iter().sum::<u64>(), 50);
        assert!(stats.memory_estimate_bytes > 50 * 4 * 8);
        assert!(!stats.degraded);
        let top = stats.layer_histogram.len() as u32 - 1;
        assert_eq!(stats.entry_point_level, Some(top));
    }

    #[test]
    fn test_capacity_exhausted_without_pruning() {
        let config = euclidean_config(2).with_capacity(3);
        let index = PatternIndex::open(None, config).unwrap();
        for i in 0..3 {
            index.insert(vec![i as f64, 1.0], vec![]).unwrap();
        }

        let result = index.insert(vec![9.0, 1.0], vec![]);
        assert!(matches!(
            result,
            Err(IndexError::ResourceExhausted { capacity: 3 })
        ));
        assert_eq!(index.stats().count, 3);
    }

    #[test]
    fn test_emergency_prune_frees_room() {
        let config = euclidean_config(2)
            .with_capacity(10)
            .with_emergency_prune(0.3);
        let index = PatternIndex::open(None, config).unwrap();
        for i in 0..10 {
            index.insert(vec![i as f64, 1.0], vec![]).unwrap();
        }

        let id = index.insert(vec![99.0, 1.0], vec![]).unwrap();
        assert_eq!(id, 10);
        // 3 oldest dropped, one new admitted
        assert_eq!(index.stats().count, 8);
        assert!(index.validate().is_healthy());
    }

    #[test]
    fn test_save_close_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("patterns.pvix");
        let config = euclidean_config(2);

        let probe = [0.31, 0.7];
        let expected = {
            let index =
                PatternIndex::open(Some(path.clone()), config.clone()).unwrap();
            for i in 0..40 {
                let angle = i as f64 / 40.0;
                index
                    .insert(vec![angle, 1.0 - angle], format!("p{i}").into_bytes())
                    .unwrap();
            }
            let expected = index.search(&probe, 5).unwrap();
            index.close().unwrap();
            expected
        };

        let index = PatternIndex::open(Some(path), config).unwrap();
        assert_eq!(index.stats().count, 40);
        let hits = index.search(&probe, 5).unwrap();
        assert_eq!(hits, expected);
    }

    #[test]
    fn test_corrupt_snapshot_degrades() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("patterns.pvix");
        let config = euclidean_config(2);

        {
            let index =
                PatternIndex::open(Some(path.clone()), config.clone()).unwrap();
            for i in 0..20 {
                index.insert(vec![i as f64, 1.0], vec![]).unwrap();
            }
            index.close().unwrap();
        }

        // Flip a byte in the record stream
        let mut bytes = std::fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x01;
        std::fs::write(&path, &bytes).unwrap();

        let index = PatternIndex::open(Some(path), config).unwrap();
        let stats = index.stats();
        assert!(stats.degraded);
        assert!(stats.count > 0);

        // Linear-scan results still come back ranked
        let hits = index.search(&[0.0, 1.0], 3).unwrap();
        assert!(!hits.is_empty());
        for pair in hits.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[test]
    fn test_missing_snapshot_starts_empty() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("absent.pvix");
        let index = PatternIndex::open(Some(path), euclidean_config(2)).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_save_without_path_fails() {
        let index = PatternIndex::open(None, euclidean_config(2)).unwrap();
        assert!(matches!(index.save(), Err(IndexError::Io(_))));
    }
}
