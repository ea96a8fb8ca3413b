//! Deterministic random number stream.
//!
//! One [`SimRng`] drives everything stochastic inside a replication:
//! interarrival draws, service durations, routing decisions, batch sizes,
//! failure clocks. Identical seed, identical model, identical event order
//! implies a bit-identical sample sequence, which is the foundation of
//! reproducible runs. The stream is never re-seeded mid-replication.

use rand::rngs::SmallRng;
use rand::{Rng as _, SeedableRng};

/// Seed offset between consecutive replications.
///
/// Replication `k` of a batch runs with `base + k * 1000`, an injective
/// mapping that keeps replications statistically independent while staying
/// reproducible from a single base seed.
pub const REPLICATION_SEED_STRIDE: u64 = 1000;

/// Deterministic, seedable uniform stream.
///
/// Wraps a `SmallRng` seeded from a single `u64`. All variates the engine
/// draws are derived from this one stream, in strict event-time order.
#[derive(Debug, Clone)]
pub struct SimRng {
    rng: SmallRng,
    seed: u64,
}

impl SimRng {
    /// Creates a stream from a user-facing seed.
    ///
    /// Seeds `<= 0` fall back to a wall-clock-derived seed. Such a run is
    /// NOT reproducible; the fallback is logged so the loss of determinism
    /// is visible in diagnostics.
    pub fn new(seed: i64) -> Self {
        if seed <= 0 {
            let fallback = time_seed();
            tracing::warn!(
                requested = seed,
                effective = fallback,
                "nonpositive seed, falling back to a time-based seed; run is not reproducible"
            );
            Self::from_raw(fallback)
        } else {
            Self::from_raw(seed as u64)
        }
    }

    /// Creates a stream from an exact raw seed, with no fallback logic.
    ///
    /// This is the entry point the replication runner uses for substreams.
    pub fn from_raw(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
            seed,
        }
    }

    /// The raw seed this stream was created with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Seed for replication `index` of a batch rooted at `base`.
    pub fn replication_seed(base: u64, index: u64) -> u64 {
        base.wrapping_add(index.wrapping_mul(REPLICATION_SEED_STRIDE))
    }

    /// Uniform draw on the open interval (0, 1).
    ///
    /// The endpoints are excluded so callers can take `ln(u)` and
    /// `ln(1 - u)` without guarding. Exclusion costs one extra draw every
    /// ~2^53 samples.
    pub fn uniform(&mut self) -> f64 {
        loop {
            let u: f64 = self.rng.r#gen();
            if u > 0.0 && u < 1.0 {
                return u;
            }
        }
    }

    /// Uniform draw on the half-open interval [0, 1).
    pub fn next_f64(&mut self) -> f64 {
        self.rng.r#gen()
    }

    /// Uniform draw on `[min, max)`.
    pub fn next_range(&mut self, min: f64, max: f64) -> f64 {
        min + self.next_f64() * (max - min)
    }

    /// Uniform index draw on `[0, bound)`. `bound` must be nonzero.
    pub fn next_index(&mut self, bound: usize) -> usize {
        self.rng.gen_range(0..bound)
    }
}

/// Wall-clock nanoseconds, for the documented nonpositive-seed fallback.
fn time_seed() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(1);
    (nanos as u64) | 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_seeds_produce_identical_streams() {
        let mut a = SimRng::from_raw(12345);
        let mut b = SimRng::from_raw(12345);
        for _ in 0..10_000 {
            assert_eq!(a.uniform().to_bits(), b.uniform().to_bits());
        }
    }

    #[test]
    fn different_seeds_diverge() {
        let mut a = SimRng::from_raw(1);
        let mut b = SimRng::from_raw(2);
        let same = (0..100).filter(|_| a.uniform() == b.uniform()).count();
        assert!(same < 5, "streams from different seeds should not track");
    }

    #[test]
    fn uniform_stays_in_open_interval() {
        let mut rng = SimRng::from_raw(7);
        for _ in 0..100_000 {
            let u = rng.uniform();
            assert!(u > 0.0 && u < 1.0);
        }
    }

    #[test]
    fn replication_seeds_are_distinct() {
        let seeds: Vec<u64> = (0..100).map(|k| SimRng::replication_seed(42, k)).collect();
        let mut unique = seeds.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), seeds.len());
        assert_eq!(seeds[0], 42);
        assert_eq!(seeds[1], 1042);
    }

    #[test]
    fn nonpositive_seed_falls_back_without_panicking() {
        // Not reproducible by design; we only check it yields a working stream.
        let mut rng = SimRng::new(0);
        let u = rng.uniform();
        assert!(u > 0.0 && u < 1.0);
    }
}
