use std::sync::Arc;

use parking_lot::Mutex;
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Random source shared by weighted selection and retry jitter
///
/// Seeding it makes every random decision in the engine reproducible.
#[derive(Debug, Clone)]
pub struct SharedRng {
    inner: Arc<Mutex<StdRng>>,
}

impl SharedRng {
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    #[must_use]
    pub fn from_os() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StdRng::from_os_rng())),
        }
    }

    /// Uniform integer in `0..upper`; `upper` must be non-zero
    pub fn below(&self, upper: u64) -> u64 {
        self.inner.lock().random_range(0..upper)
    }

    /// Uniform float in `low..=high`
    pub fn between(&self, low: f64, high: f64) -> f64 {
        self.inner.lock().random_range(low..=high)
    }
}

impl Default for SharedRng {
    fn default() -> Self {
        Self::from_os()
    }
}
