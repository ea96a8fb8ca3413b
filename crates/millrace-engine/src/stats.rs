//! Statistics accumulators and per-run results.
//!
//! Two accumulator families, mirroring the two kinds of performance
//! measures a queueing model produces:
//!
//! - [`Tally`]: observation-based (cycle times, waits). Standard deviation
//!   uses the population form within a run; dispersion *between* runs is
//!   the replication analyzer's job and uses n-1 there.
//! - [`TimeWeighted`]: piecewise-constant integrals over simulated time
//!   (queue lengths, busy units, failed state), for time-averaged queue
//!   length and utilization.
//!
//! Warmup deletion resets every accumulator at the boundary; levels of
//! time-weighted accumulators carry across the reset so integrals restart
//! from the true state of the system, not from zero.

use millrace_types::SimTime;
use serde::{Deserialize, Serialize};

// ============================================================================
// Observation-Based Accumulator
// ============================================================================

/// Observation list with running extremes.
#[derive(Debug, Clone, Default)]
pub struct Tally {
    values: Vec<f64>,
    sum: f64,
}

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, value: f64) {
        self.sum += value;
        self.values.push(value);
    }

    pub fn n(&self) -> u64 {
        self.values.len() as u64
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            0.0
        } else {
            self.sum / self.values.len() as f64
        }
    }

    /// Population standard deviation of the observations so far.
    pub fn std_dev(&self) -> f64 {
        let n = self.values.len();
        if n == 0 {
            return 0.0;
        }
        let mean = self.mean();
        let ss: f64 = self.values.iter().map(|v| (v - mean) * (v - mean)).sum();
        (ss / n as f64).sqrt()
    }

    pub fn min(&self) -> f64 {
        self.values.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn max(&self) -> f64 {
        self.values
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Sample quantile by linear interpolation over the sorted values.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        let mut sorted = self.values.clone();
        sorted.sort_by(f64::total_cmp);
        let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
        let lower = position.floor() as usize;
        let upper = position.ceil() as usize;
        let frac = position - lower as f64;
        Some(sorted[lower] + frac * (sorted[upper] - sorted[lower]))
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn reset(&mut self) {
        self.values.clear();
        self.sum = 0.0;
    }

    pub fn summary(&self) -> TallySummary {
        let n = self.n();
        TallySummary {
            n,
            mean: self.mean(),
            std_dev: self.std_dev(),
            min: if n == 0 { 0.0 } else { self.min() },
            max: if n == 0 { 0.0 } else { self.max() },
        }
    }
}

/// Snapshot of a [`Tally`], serialized into run results.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TallySummary {
    pub n: u64,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

// ============================================================================
// Time-Weighted Accumulator
// ============================================================================

/// Integral of a piecewise-constant level over simulated time.
#[derive(Debug, Clone, Default)]
pub struct TimeWeighted {
    level: f64,
    last_time: SimTime,
    integral: f64,
    max_level: f64,
}

impl TimeWeighted {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the level at `now`, accruing the previous level first.
    pub fn set_level(&mut self, now: SimTime, level: f64) {
        self.integral += self.level * (now - self.last_time);
        self.last_time = now;
        self.level = level;
        if level > self.max_level {
            self.max_level = level;
        }
    }

    /// Adjusts the level by `delta` at `now`.
    pub fn add(&mut self, now: SimTime, delta: f64) {
        let level = self.level + delta;
        self.set_level(now, level);
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn max_level(&self) -> f64 {
        self.max_level
    }

    /// Integral accrued through `end` (without mutating).
    pub fn integral_until(&self, end: SimTime) -> f64 {
        self.integral + self.level * (end - self.last_time)
    }

    /// Time average of the level over `[origin, end]`.
    pub fn time_average(&self, origin: SimTime, end: SimTime) -> f64 {
        let span = end - origin;
        if span <= 0.0 {
            0.0
        } else {
            self.integral_until(end) / span
        }
    }

    /// Warmup reset: discard the integral, keep the current level.
    pub fn reset(&mut self, now: SimTime) {
        self.integral = 0.0;
        self.last_time = now;
        self.max_level = self.level;
    }
}

// ============================================================================
// Per-Resource and Per-System Accumulators
// ============================================================================

/// Accumulators attached to one resource pool.
#[derive(Debug, Clone, Default)]
pub struct ResourceAccum {
    /// Busy units (the in-use count) over time.
    pub busy: TimeWeighted,
    /// Waiting entities over time.
    pub queue: TimeWeighted,
    /// Failed indicator (0/1) over time.
    pub down: TimeWeighted,
    /// Per-visit waiting times at this pool.
    pub wait: Tally,
    /// Number of successful seize operations.
    pub seize_count: u64,
}

impl ResourceAccum {
    fn reset(&mut self, now: SimTime) {
        self.busy.reset(now);
        self.queue.reset(now);
        self.down.reset(now);
        self.wait.reset();
        self.seize_count = 0;
    }
}

/// System-wide accumulators.
#[derive(Debug, Clone, Default)]
pub struct SystemAccum {
    pub created: u64,
    pub departed: u64,
    /// Entities currently in the network, over time.
    pub in_system: TimeWeighted,
    /// Arrival-to-departure cycle times.
    pub cycle: Tally,
    /// Per-entity total waiting time, observed at departure.
    pub total_wait: Tally,
    /// Per-entity total in-process (holding-and-delaying) time.
    pub processing: Tally,
}

impl SystemAccum {
    fn reset(&mut self, now: SimTime) {
        self.created = 0;
        self.departed = 0;
        self.in_system.reset(now);
        self.cycle.reset();
        self.total_wait.reset();
        self.processing.reset();
    }
}

/// All accumulators of one run, owned by the kernel's collector side.
#[derive(Debug, Clone, Default)]
pub struct StatsCollector {
    /// Start of the observation window: 0, or the warmup boundary after
    /// the reset.
    pub origin: SimTime,
    pub system: SystemAccum,
    pub resources: Vec<ResourceAccum>,
}

impl StatsCollector {
    pub fn new(resource_count: usize) -> Self {
        Self {
            origin: 0.0,
            system: SystemAccum::default(),
            resources: vec![ResourceAccum::default(); resource_count],
        }
    }

    /// Warmup deletion: clears every accumulator at the boundary.
    pub fn reset_at(&mut self, now: SimTime) {
        self.origin = now;
        self.system.reset(now);
        for accum in &mut self.resources {
            accum.reset(now);
        }
    }
}

// ============================================================================
// Run Results
// ============================================================================

/// Statistics of one resource pool over the observation window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRunStats {
    pub name: String,
    pub capacity: u32,
    /// busy-integral / (capacity * observed span).
    pub utilization: f64,
    /// Time-averaged wait-queue length (Lq at this station).
    pub avg_queue_length: f64,
    pub max_queue_length: f64,
    /// Mean of per-visit waits (Wq at this station).
    pub wait_time: TallySummary,
    pub seize_count: u64,
    pub busy_time: f64,
    pub down_time: f64,
}

/// Little's Law self-consistency figures for the run.
///
/// Informational: large residuals flag short runs or non-stationarity,
/// they do not fail the run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LittlesLaw {
    /// Observed arrival rate over the window.
    pub arrival_rate: f64,
    pub l: f64,
    pub w: f64,
    pub lq: f64,
    pub wq: f64,
}

impl LittlesLaw {
    /// Relative residual |L - lambda * W| / L (0 when L is 0).
    pub fn l_residual(&self) -> f64 {
        relative_residual(self.l, self.arrival_rate * self.w)
    }

    /// Relative residual |Lq - lambda * Wq| / Lq (0 when Lq is 0).
    pub fn lq_residual(&self) -> f64 {
        relative_residual(self.lq, self.arrival_rate * self.wq)
    }
}

fn relative_residual(observed: f64, predicted: f64) -> f64 {
    if observed.abs() < 1e-12 {
        (observed - predicted).abs()
    } else {
        (observed - predicted).abs() / observed.abs()
    }
}

/// Everything one replication reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStats {
    pub seed: u64,
    pub horizon: SimTime,
    pub warmup: SimTime,
    /// Length of the observation window (horizon minus warmup boundary).
    pub observed: SimTime,
    pub final_time: SimTime,
    pub events_processed: u64,
    pub entities_created: u64,
    pub entities_departed: u64,
    /// Departures per unit time over the window.
    pub throughput: f64,
    pub cycle_time: TallySummary,
    /// Per-entity total wait (sum over all queues visited).
    pub wait_time: TallySummary,
    pub processing_time: TallySummary,
    /// Time-averaged entities in system (L).
    pub avg_in_system: f64,
    /// Time-averaged entities waiting, summed over stations (Lq).
    pub avg_in_queue: f64,
    pub resources: Vec<ResourceRunStats>,
    pub littles_law: LittlesLaw,
}

impl RunStats {
    /// Flattens the run into named scalar metrics for cross-replication
    /// aggregation. Resource metrics are prefixed with the pool name.
    pub fn metrics(&self) -> Vec<(String, f64)> {
        let mut out = vec![
            ("throughput".to_string(), self.throughput),
            ("entities_created".to_string(), self.entities_created as f64),
            (
                "entities_departed".to_string(),
                self.entities_departed as f64,
            ),
            ("cycle_time_mean".to_string(), self.cycle_time.mean),
            ("wait_time_mean".to_string(), self.wait_time.mean),
            (
                "processing_time_mean".to_string(),
                self.processing_time.mean,
            ),
            ("avg_in_system".to_string(), self.avg_in_system),
            ("avg_in_queue".to_string(), self.avg_in_queue),
        ];
        for res in &self.resources {
            out.push((format!("{}.utilization", res.name), res.utilization));
            out.push((
                format!("{}.queue_length", res.name),
                res.avg_queue_length,
            ));
            out.push((
                format!("{}.wait_time_mean", res.name),
                res.wait_time.mean,
            ));
        }
        out
    }
}
