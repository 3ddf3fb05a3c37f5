//! Layer assignment for new nodes.
//!
//! Levels follow an exponential decay: `floor(-ln(U(0,1)) * multiplier)`,
//! so with the default multiplier of `1/ln(2)` roughly half of all nodes
//! stay on the base layer and each higher layer halves again.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Hard cap on generated levels. With the default multiplier a draw this
/// high has probability below 2^-32; the cap bounds per-node allocation.
pub(crate) const MAX_LEVEL: u32 = 32;

/// Draws insertion levels from an owned, seedable random source.
///
/// The generator is owned by the index writer path, never global, so
/// insertion sequences are reproducible when a seed is supplied.
pub struct LevelGenerator {
    rng: StdRng,
    multiplier: f64,
}

impl LevelGenerator {
    /// Create a generator. `seed = None` draws from OS entropy.
    pub fn new(multiplier: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { rng, multiplier }
    }

    /// Draw the top layer for the next inserted node.
    pub fn next_level(&mut self) -> u32 {
        // U in (0, 1]; a draw of exactly 0 would make ln() blow up
        let unit: f64 = loop {
            let u = self.rng.random::<f64>();
            if u > 0.0 {
                break u;
            }
        };
        let level = (-unit.ln() * self.multiplier).floor() as u32;
        level.min(MAX_LEVEL)
    }
}
