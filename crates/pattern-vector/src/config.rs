//! Index configuration.
//!
//! Parameters are fixed per index instance at creation time and validated
//! against the snapshot header on reload.

use serde::{Deserialize, Serialize};

use crate::distance::DistanceMetric;
use crate::error::IndexError;

/// Index configuration.
///
/// Defaults are tuned for quality over speed: M = 16, ef_construction =
/// 200, ef_search = 100.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Vector dimensionality, fixed at creation time.
    pub dimension: usize,

    /// Max bidirectional edges per node per layer (the base layer allows
    /// twice this).
    #[serde(default = "default_connectivity")]
    pub connectivity: usize,

    /// Build-time beam width (ef_construction).
    #[serde(default = "default_expansion_add")]
    pub expansion_add: usize,

    /// Default query-time beam width (ef_search).
    #[serde(default = "default_expansion_search")]
    pub expansion_search: usize,

    /// Level-decay multiplier for layer assignment.
    #[serde(default = "default_level_multiplier")]
    pub level_multiplier: f64,

    /// Distance metric.
    #[serde(default = "default_metric")]
    pub metric: DistanceMetric,

    /// Maximum element count before inserts fail (or emergency-prune).
    #[serde(default = "default_capacity")]
    pub capacity: u64,

    /// Inserts allowed to wait on the writer path before new ones are
    /// rejected with backpressure.
    #[serde(default = "default_max_pending_inserts")]
    pub max_pending_inserts: usize,

    /// Default writer-admission deadline for `insert`, in milliseconds.
    #[serde(default = "default_insert_deadline_ms")]
    pub insert_deadline_ms: u64,

    /// Fraction of oldest nodes dropped when the index is full.
    /// Zero disables emergency pruning.
    #[serde(default)]
    pub emergency_prune_fraction: f64,

    /// Seed for the layer sampler. `None` draws from OS entropy; set it
    /// for reproducible insertion sequences.
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

fn default_connectivity() -> usize {
    16
}

fn default_expansion_add() -> usize {
    200
}

fn default_expansion_search() -> usize {
    100
}

fn default_level_multiplier() -> f64 {
    1.0 / std::f64::consts::LN_2
}

fn default_metric() -> DistanceMetric {
    DistanceMetric::Cosine
}

fn default_capacity() -> u64 {
    1_000_000
}

fn default_max_pending_inserts() -> usize {
    64
}

fn default_insert_deadline_ms() -> u64 {
    5_000
}

impl IndexConfig {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            connectivity: default_connectivity(),
            expansion_add: default_expansion_add(),
            expansion_search: default_expansion_search(),
            level_multiplier: default_level_multiplier(),
            metric: default_metric(),
            capacity: default_capacity(),
            max_pending_inserts: default_max_pending_inserts(),
            insert_deadline_ms: default_insert_deadline_ms(),
            emergency_prune_fraction: 0.0,
            rng_seed: None,
        }
    }

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_connectivity(mut self, m: usize) -> Self {
        self.connectivity = m;
        self
    }

    pub fn with_expansion(mut self, ef_add: usize, ef_search: usize) -> Self {
        self.expansion_add = ef_add;
        self.expansion_search = ef_search;
        self
    }

    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn with_emergency_prune(mut self, fraction: f64) -> Self {
        self.emergency_prune_fraction = fraction;
        self
    }

    /// Max neighbors a node may keep at a layer.
    pub(crate) fn max_neighbors(&self, layer: u32) -> usize {
        if layer == 0 {
            self.connectivity * 2
        } else {
            self.connectivity
        }
    }

    pub fn validate(&self) -> Result<(), IndexError> {
        if self.dimension == 0 {
            return Err(IndexError::InvalidVector(
                "dimension must be > 0".to_string(),
            ));
        }
        if self.connectivity == 0 {
            return Err(IndexError::InvalidVector(
                "connectivity must be > 0".to_string(),
            ));
        }
        if self.expansion_add == 0 || self.expansion_search == 0 {
            return Err(IndexError::InvalidVector(
                "expansion parameters must be > 0".to_string(),
            ));
        }
        if self.capacity == 0 {
            return Err(IndexError::InvalidVector(
                "capacity must be > 0".to_string(),
            ));
        }
        if !self.level_multiplier.is_finite() || self.level_multiplier <= 0.0 {
            return Err(IndexError::InvalidVector(
                "level_multiplier must be positive and finite".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.emergency_prune_fraction) {
            return Err(IndexError::InvalidVector(
                "emergency_prune_fraction must be in [0, 1)".to_string(),
            ));
        }
        Ok(())
    }
}
