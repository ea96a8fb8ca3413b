//! Arrival sources.
//!
//! Each source is a self-rescheduling state machine: dispatching one
//! Arrival event asks the source for the next arrival time, and the
//! kernel schedules it, so exactly one arrival per source is ever
//! pending. All draws happen in event-time order on the replication
//! stream, keeping the arrival sequence deterministic per seed.

use millrace_types::{ArrivalPattern, Distribution, RatePeriod, SimTime, SourceSpec};

use crate::rng::SimRng;
use crate::sample::Sample;

/// A planned arrival: when, and how many entities to create.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannedArrival {
    pub time: SimTime,
    pub quantity: u32,
}

/// Runtime state of one arrival source.
#[derive(Debug, Clone)]
pub struct ArrivalSource {
    pub spec: SourceSpec,
    /// Resolved index of the process serving this source's entity type.
    pub process: usize,
    /// Cursor into `Schedule` batches.
    next_batch: usize,
}

impl ArrivalSource {
    pub fn new(spec: SourceSpec, process: usize) -> Self {
        Self {
            spec,
            process,
            next_batch: 0,
        }
    }

    /// Computes the arrival after `now`, or `None` when the source is
    /// exhausted (schedules run out; rate schedules run past their last
    /// period). The kernel additionally stops rescheduling past the
    /// horizon.
    pub fn next_arrival(&mut self, now: SimTime, rng: &mut SimRng) -> Option<PlannedArrival> {
        match &self.spec.pattern {
            ArrivalPattern::Interarrival { duration } => Some(PlannedArrival {
                time: now + duration.sample_duration(rng),
                quantity: self.spec.batch_size,
            }),
            ArrivalPattern::Poisson { rate } => {
                let gap = Distribution::Exponential { rate: *rate }.sample(rng);
                Some(PlannedArrival {
                    time: now + gap,
                    quantity: self.spec.batch_size,
                })
            }
            ArrivalPattern::NonHomogeneousPoisson { periods } => {
                nhpp_next(periods, now, rng).map(|time| PlannedArrival {
                    time,
                    quantity: self.spec.batch_size,
                })
            }
            ArrivalPattern::Schedule { batches } => {
                let batch = batches.get(self.next_batch)?;
                self.next_batch += 1;
                Some(PlannedArrival {
                    time: batch.time.max(now),
                    quantity: batch.quantity,
                })
            }
        }
    }
}

/// Next arrival of a piecewise-constant-rate Poisson process.
///
/// Inside a positive-rate period the interarrival is exponential at the
/// period's rate. A draw that overshoots the period boundary (or a `now`
/// sitting in a gap or zero-rate period) is rescheduled at the start of
/// the next period with positive rate; no next period means the source
/// is exhausted. Periods are sorted and non-overlapping (model
/// validation enforces this).
fn nhpp_next(periods: &[RatePeriod], now: SimTime, rng: &mut SimRng) -> Option<SimTime> {
    let active = periods
        .iter()
        .find(|p| p.rate > 0.0 && p.start <= now && now < p.end);

    if let Some(period) = active {
        let candidate =
            now + Distribution::Exponential { rate: period.rate }.sample(rng);
        if candidate < period.end {
            return Some(candidate);
        }
        return next_positive_start(periods, period.end);
    }
    next_positive_start(periods, now)
}

/// Start of the first positive-rate period at or after `from`.
fn next_positive_start(periods: &[RatePeriod], from: SimTime) -> Option<SimTime> {
    periods
        .iter()
        .filter(|p| p.rate > 0.0 && p.start >= from)
        .map(|p| p.start)
        .fold(None, |best, start| match best {
            Some(b) if b <= start => Some(b),
            _ => Some(start),
        })
}
