//! # Millrace
//!
//! A discrete-event simulation engine for queueing networks: entities
//! flow through a directed network of steps, seizing and releasing
//! finite-capacity resources under stochastic service times, while the
//! engine estimates throughput, cycle time, queue lengths, and
//! utilization with confidence intervals across independent
//! replications.
//!
//! The workspace splits into three layers, re-exported here:
//!
//! - [`millrace_types`]: the model vocabulary (ids, distribution
//!   descriptors, steps, arrival patterns, configuration errors).
//! - [`millrace_engine`]: the kernel (seeded RNG stream, variate
//!   sampling, event queue with FIFO tie-break, dispatch loop,
//!   statistics accumulators).
//! - [`millrace_replication`]: the replication runner and output
//!   analyzer (summaries, Student-t intervals, convergence).
//!
//! [`theory`] adds closed-form M/M/1 and Erlang-C baselines for sanity
//! checks and acceptance tests.
//!
//! ## Example: an M/M/1 study with confidence intervals
//!
//! ```
//! use millrace::prelude::*;
//!
//! let server = ResourceId::new(1);
//! let build = move || {
//!     ModelBuilder::new()
//!         .resource(ResourceSpec::new(server, "server", 1))
//!         .process(
//!             ProcessSpec::new(ProcessId::new(1), "serve", "customer").step(Step::Service {
//!                 demands: vec![ResourceDemand::one(server)],
//!                 duration: Distribution::Exponential { rate: 1.0 },
//!                 routes: vec![],
//!             }),
//!         )
//!         .source(SourceSpec::new(
//!             SourceId::new(1),
//!             "customer",
//!             ArrivalPattern::Poisson { rate: 0.5 },
//!         ))
//! };
//!
//! let config = ReplicationConfig::default()
//!     .with_replications(10)
//!     .with_run_length(2_000.0)
//!     .with_warmup(200.0)
//!     .with_base_seed(42);
//! let report = run_replications(build, &config, |_| {}).expect("valid model");
//!
//! let wq = report.metric("wait_time_mean").expect("metric");
//! // Theoretical Wq at rho = 0.5 is 1.0; a short pilot study lands in
//! // the right neighborhood (the acceptance tests pin this down with
//! // 30 full-length replications).
//! let theory = millrace::theory::mm1_wq(0.5, 1.0);
//! assert!((wq.summary.mean - theory).abs() < 0.5);
//! assert!(wq.interval.lower < wq.interval.upper);
//! ```

pub mod theory;

pub use millrace_engine as engine;
pub use millrace_replication as replication;
pub use millrace_types as types;

pub use millrace_engine::{
    Model, ModelBuilder, RunStats, SimRng, Simulation, TallySummary,
};
pub use millrace_replication::{
    run_replications, ConfidenceInterval, ConfidenceLevel, Convergence, MetricReport,
    MetricSummary, ReplicationConfig, ReplicationReport,
};
pub use millrace_types::{
    ArrivalPattern, ConfigError, Distribution, EntityId, ProcessId, ProcessSpec, QueueDiscipline,
    ResourceDemand, ResourceId, ResourceSpec, SimTime, SourceId, SourceSpec, Step,
};

/// One-stop imports for model building and replication studies.
pub mod prelude {
    pub use millrace_engine::{Model, ModelBuilder, RunStats, Simulation};
    pub use millrace_replication::{
        run_replications, ConfidenceLevel, ReplicationConfig, ReplicationReport,
    };
    pub use millrace_types::{
        ArrivalBatch, ArrivalPattern, Branch, Distribution, ProcessId, ProcessSpec,
        QueueDiscipline, RatePeriod, ResourceDemand, ResourceId, ResourceSpec, RouteTarget,
        SourceId, SourceSpec, Step,
    };
}
