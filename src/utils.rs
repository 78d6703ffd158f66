//! Shared utilities
//!
//! Currently just the injectable random source. Anything that draws random
//! numbers (allocation, backoff jitter, simulated probes) takes a
//! [`SharedRng`] handle instead of reaching for an ambient generator, so
//! tests can seed it and fix outcomes.

use std::sync::{Arc, Mutex};

/// Cloneable, seedable pseudo-random source shared across components.
#[derive(Debug, Clone)]
pub struct SharedRng {
    inner: Arc<Mutex<fastrand::Rng>>,
}

impl SharedRng {
    /// Deterministic generator for tests and reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(fastrand::Rng::with_seed(seed))),
        }
    }

    /// Entropy-seeded generator for production use.
    pub fn from_entropy() -> Self {
        Self {
            inner: Arc::new(Mutex::new(fastrand::Rng::new())),
        }
    }

    /// Uniform u64 in `range`.
    pub fn u64(&self, range: std::ops::Range<u64>) -> u64 {
        let mut rng = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        rng.u64(range)
    }

    /// Uniform f64 in `[0, 1)`.
    pub fn f64(&self) -> f64 {
        let mut rng = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        rng.f64()
    }
}

impl Default for SharedRng {
    fn default() -> Self {
        Self::from_entropy()
    }
}
