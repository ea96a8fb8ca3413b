//! The replication runner.
//!
//! Executes N independent replications of a model, each on its own
//! kernel and RNG stream, and aggregates one value per metric per run
//! into summaries, confidence intervals, and a convergence check.
//!
//! Replications are embarrassingly parallel: each gets the deterministic
//! seed for its index (`base + index * stride`) no matter which worker
//! runs it or when it finishes, so the sequential and rayon paths
//! produce identical reports.

use std::collections::BTreeMap;
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use millrace_engine::{Diagnostic, ModelBuilder, RunStats, SimRng, Simulation};
use millrace_types::{ConfigError, SimTime};

use crate::summary::{ConfidenceInterval, ConfidenceLevel, Convergence, MetricSummary};

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for a replication batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Number of independent replications.
    pub replications: usize,
    /// Base seed; replication k runs with `base + k * 1000`.
    pub base_seed: u64,
    /// Simulated end time of each replication.
    pub run_length: SimTime,
    /// Warmup boundary of each replication.
    pub warmup: SimTime,
    /// Confidence level for the per-metric intervals.
    pub confidence: ConfidenceLevel,
    /// Target relative half-width for the convergence check.
    pub relative_precision: f64,
    /// Run replications on the rayon worker pool. Results are identical
    /// to the sequential path; only wall time and progress-callback
    /// ordering differ.
    pub parallel: bool,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            replications: 30,
            base_seed: 12345,
            run_length: 10_000.0,
            warmup: 0.0,
            confidence: ConfidenceLevel::NinetyFive,
            relative_precision: 0.1,
            parallel: false,
        }
    }
}

impl ReplicationConfig {
    pub fn with_replications(mut self, replications: usize) -> Self {
        self.replications = replications;
        self
    }

    pub fn with_base_seed(mut self, base_seed: u64) -> Self {
        self.base_seed = base_seed;
        self
    }

    pub fn with_run_length(mut self, run_length: SimTime) -> Self {
        self.run_length = run_length;
        self
    }

    pub fn with_warmup(mut self, warmup: SimTime) -> Self {
        self.warmup = warmup;
        self
    }

    pub fn with_confidence(mut self, confidence: ConfidenceLevel) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_relative_precision(mut self, relative_precision: f64) -> Self {
        self.relative_precision = relative_precision;
        self
    }

    pub fn with_parallel(mut self) -> Self {
        self.parallel = true;
        self
    }
}

// ============================================================================
// Results
// ============================================================================

/// One finished replication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationOutcome {
    pub index: usize,
    pub seed: u64,
    pub stats: RunStats,
    pub diagnostics: Vec<Diagnostic>,
    /// Wall-clock seconds this replication took.
    pub wall_secs: f64,
}

/// Analyzer output for one metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricReport {
    pub summary: MetricSummary,
    pub interval: ConfidenceInterval,
    pub convergence: Convergence,
}

/// Everything a replication batch produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationReport {
    pub replications: usize,
    /// Per-metric analysis, keyed by metric name.
    pub outputs: BTreeMap<String, MetricReport>,
    /// Per-metric raw values, one per replication, in replication order.
    pub raw: BTreeMap<String, Vec<f64>>,
    /// Per-replication results, in replication order.
    pub runs: Vec<ReplicationOutcome>,
    /// Wall-clock seconds for the whole batch.
    pub elapsed_secs: f64,
}

impl ReplicationReport {
    pub fn metric(&self, name: &str) -> Option<&MetricReport> {
        self.outputs.get(name)
    }

    /// Raw per-replication values of one metric.
    pub fn values(&self, name: &str) -> Option<&[f64]> {
        self.raw.get(name).map(Vec::as_slice)
    }
}

// ============================================================================
// Runner
// ============================================================================

/// Runs `config.replications` independent replications of the model the
/// `build` closure describes.
///
/// `build` returns a [`ModelBuilder`]; the runner stamps the batch's run
/// length and warmup onto it and validates it once per replication (each
/// kernel owns its model). The first configuration error aborts the
/// batch before any further work.
///
/// `progress` fires after each replication completes. Under `parallel`
/// the calls arrive in completion order, not index order; the report
/// itself is always in index order.
pub fn run_replications<B, P>(
    build: B,
    config: &ReplicationConfig,
    progress: P,
) -> Result<ReplicationReport, ConfigError>
where
    B: Fn() -> ModelBuilder + Sync,
    P: Fn(&ReplicationOutcome) + Sync,
{
    let batch_start = Instant::now();

    let run_one = |index: usize| -> Result<ReplicationOutcome, ConfigError> {
        let model = build()
            .horizon(config.run_length)
            .warmup(config.warmup)
            .build()?;
        let seed = SimRng::replication_seed(config.base_seed, index as u64);

        let start = Instant::now();
        let mut sim = Simulation::from_raw_seed(model, seed);
        let stats = sim.run();
        let wall_secs = start.elapsed().as_secs_f64();
        tracing::info!(replication = index, seed, wall_secs, "replication complete");

        let outcome = ReplicationOutcome {
            index,
            seed,
            stats,
            diagnostics: sim.diagnostics().entries().to_vec(),
            wall_secs,
        };
        progress(&outcome);
        Ok(outcome)
    };

    let runs: Result<Vec<ReplicationOutcome>, ConfigError> = if config.parallel {
        (0..config.replications)
            .into_par_iter()
            .map(run_one)
            .collect()
    } else {
        (0..config.replications).map(run_one).collect()
    };
    let runs = runs?;

    let mut raw: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for outcome in &runs {
        for (name, value) in outcome.stats.metrics() {
            raw.entry(name).or_default().push(value);
        }
    }

    let outputs = raw
        .iter()
        .map(|(name, values)| {
            let summary = MetricSummary::from_values(values);
            let interval = ConfidenceInterval::from_summary(&summary, config.confidence);
            let convergence = Convergence::assess(&summary, &interval, config.relative_precision);
            (
                name.clone(),
                MetricReport {
                    summary,
                    interval,
                    convergence,
                },
            )
        })
        .collect();

    Ok(ReplicationReport {
        replications: runs.len(),
        outputs,
        raw,
        runs,
        elapsed_secs: batch_start.elapsed().as_secs_f64(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use millrace_types::{
        ArrivalPattern, Distribution, ProcessId, ProcessSpec, ResourceDemand, ResourceId,
        ResourceSpec, SourceId, SourceSpec, Step,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn mm1_builder(lambda: f64, mu: f64) -> impl Fn() -> ModelBuilder + Sync {
        move || {
            let server = ResourceId::new(1);
            ModelBuilder::new()
                .resource(ResourceSpec::new(server, "server", 1))
                .process(
                    ProcessSpec::new(ProcessId::new(1), "serve", "customer").step(Step::Service {
                        demands: vec![ResourceDemand::one(server)],
                        duration: Distribution::Exponential { rate: mu },
                        routes: vec![],
                    }),
                )
                .source(SourceSpec::new(
                    SourceId::new(1),
                    "customer",
                    ArrivalPattern::Poisson { rate: lambda },
                ))
        }
    }

    fn quick_config() -> ReplicationConfig {
        ReplicationConfig::default()
            .with_replications(5)
            .with_run_length(500.0)
            .with_base_seed(7)
    }

    #[test]
    fn report_carries_every_metric_in_replication_order() {
        let report =
            run_replications(mm1_builder(0.5, 1.0), &quick_config(), |_| {}).expect("runs");

        assert_eq!(report.replications, 5);
        assert_eq!(report.runs.len(), 5);
        for (index, outcome) in report.runs.iter().enumerate() {
            assert_eq!(outcome.index, index);
            assert_eq!(outcome.seed, SimRng::replication_seed(7, index as u64));
        }
        for name in ["wait_time_mean", "throughput", "server.utilization"] {
            let values = report.values(name).expect(name);
            assert_eq!(values.len(), 5);
            assert!(report.metric(name).is_some());
        }
    }

    #[test]
    fn progress_fires_once_per_replication() {
        let count = AtomicUsize::new(0);
        let report = run_replications(mm1_builder(0.5, 1.0), &quick_config(), |_| {
            count.fetch_add(1, Ordering::Relaxed);
        })
        .expect("runs");
        assert_eq!(count.load(Ordering::Relaxed), report.replications);
    }

    #[test]
    fn parallel_and_sequential_reports_are_identical() {
        let sequential =
            run_replications(mm1_builder(0.5, 1.0), &quick_config(), |_| {}).expect("runs");
        let parallel = run_replications(
            mm1_builder(0.5, 1.0),
            &quick_config().with_parallel(),
            |_| {},
        )
        .expect("runs");

        for (name, values) in &sequential.raw {
            let other = parallel.values(name).expect(name);
            for (a, b) in values.iter().zip(other) {
                assert_eq!(a.to_bits(), b.to_bits(), "metric {name} diverged");
            }
        }
    }

    #[test]
    fn configuration_errors_abort_the_batch() {
        // Zero-capacity resource: every build fails, the first aborts.
        let build = || {
            ModelBuilder::new()
                .resource(ResourceSpec::new(ResourceId::new(1), "broken", 0))
                .process(
                    ProcessSpec::new(ProcessId::new(1), "serve", "customer").step(Step::Seize {
                        resource: ResourceId::new(1),
                        quantity: 1,
                    }),
                )
                .source(SourceSpec::new(
                    SourceId::new(1),
                    "customer",
                    ArrivalPattern::Poisson { rate: 1.0 },
                ))
        };
        let err = run_replications(build, &quick_config(), |_| {}).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroCapacity { .. }));
    }

    #[test]
    fn wall_time_is_recorded() {
        let report =
            run_replications(mm1_builder(0.5, 1.0), &quick_config(), |_| {}).expect("runs");
        assert!(report.elapsed_secs >= 0.0);
        assert!(report.runs.iter().all(|r| r.wall_secs >= 0.0));
    }
}
