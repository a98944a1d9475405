//! Seeded RNG for reproducible mock behaviour.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Thread-safe seeded random source shared by fault injection and the
/// sensor's noise model.
pub struct MockRng {
    inner: Mutex<ChaCha8Rng>,
}

impl MockRng {
    /// `None` seeds from the OS.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            inner: Mutex::new(rng),
        }
    }

    /// True with probability `rate` (clamped to `[0, 1]`).
    pub fn should_fail(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        self.inner.lock().gen::<f64>() < rate
    }

    /// Uniform integer noise in `[-amplitude, amplitude]`.
    pub fn noise(&self, amplitude: i32) -> i32 {
        if amplitude <= 0 {
            return 0;
        }
        self.inner.lock().gen_range(-amplitude..=amplitude)
    }
}

impl Default for MockRng {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for MockRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRng").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_is_reproducible() {
        let a = MockRng::new(Some(7));
        let b = MockRng::new(Some(7));
        let xs: Vec<i32> = (0..16).map(|_| a.noise(100)).collect();
        let ys: Vec<i32> = (0..16).map(|_| b.noise(100)).collect();
        assert_eq!(xs, ys);
        assert!(xs.iter().all(|v| (-100..=100).contains(v)));
    }

    #[test]
    fn test_rate_extremes() {
        let rng = MockRng::new(Some(1));
        assert!(!rng.should_fail(0.0));
        assert!(rng.should_fail(1.0));
        assert_eq!(rng.noise(0), 0);
    }
}
