//! # millrace-engine: Discrete-event simulation kernel for `Millrace`
//!
//! This crate is the simulation core: it advances a virtual clock through
//! a time-ordered event stream, routes entities through a network of
//! steps that seize and release finite resources under stochastic service
//! times, and accumulates the statistics a queueing analyst cares about.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Simulation Kernel                          │
//! │  ┌─────────────┐   ┌──────────────┐   ┌─────────────────────┐    │
//! │  │ SimClock    │   │ EventQueue   │   │ SimRng              │    │
//! │  │ (discrete)  │   │ (min-heap,   │   │ (seeded,            │    │
//! │  │             │   │  FIFO ties)  │   │  deterministic)     │    │
//! │  └─────────────┘   └──────────────┘   └─────────────────────┘    │
//! │                                                                   │
//! │  ┌──────────────────────────────────────────────────────────────┐ │
//! │  │                    Simulated Components                       │ │
//! │  │  Entities    ResourcePools    ArrivalSources    Processes    │ │
//! │  └──────────────────────────────────────────────────────────────┘ │
//! │                                                                   │
//! │  ┌──────────────────────────────────────────────────────────────┐ │
//! │  │                    Statistics Collector                       │ │
//! │  │  Tally (observations)    TimeWeighted (integrals)    Warmup  │ │
//! │  └──────────────────────────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism
//!
//! Same seed, same model, same binary: bit-identical results. Three rules
//! make that hold:
//!
//! - Every random draw flows through the one [`SimRng`] stream, in strict
//!   event-time order.
//! - Simultaneous events dispatch in schedule order (the event queue's
//!   FIFO tie-break).
//! - A single replication is single-threaded; nothing races.
//!
//! ## Quick Start
//!
//! ```
//! use millrace_engine::{ModelBuilder, Simulation};
//! use millrace_types::{
//!     ArrivalPattern, Distribution, ProcessId, ProcessSpec, ResourceDemand, ResourceId,
//!     ResourceSpec, SourceId, SourceSpec, Step,
//! };
//!
//! // M/M/1: Poisson arrivals at 0.8, exponential service at 1.0.
//! let server = ResourceId::new(1);
//! let model = ModelBuilder::new()
//!     .resource(ResourceSpec::new(server, "server", 1))
//!     .process(ProcessSpec::new(ProcessId::new(1), "serve", "customer").step(
//!         Step::Service {
//!             demands: vec![ResourceDemand::one(server)],
//!             duration: Distribution::Exponential { rate: 1.0 },
//!             routes: vec![],
//!         },
//!     ))
//!     .source(SourceSpec::new(
//!         SourceId::new(1),
//!         "customer",
//!         ArrivalPattern::Poisson { rate: 0.8 },
//!     ))
//!     .horizon(10_000.0)
//!     .warmup(1_000.0)
//!     .build()
//!     .expect("valid model");
//!
//! let mut sim = Simulation::from_raw_seed(model, 42);
//! let stats = sim.run();
//! assert!(stats.entities_departed > 0);
//! ```

mod arrivals;
mod clock;
mod diag;
mod entity;
mod event;
mod kernel;
mod model;
mod resource;
mod rng;
mod sample;
mod stats;

pub use arrivals::{ArrivalSource, PlannedArrival};
pub use clock::SimClock;
pub use diag::{Diagnostic, DiagnosticKind, RunDiagnostics};
pub use entity::{Entity, EntityState};
pub use event::{Event, EventKind, EventQueue};
pub use kernel::Simulation;
pub use model::{Model, ModelBuilder, ModelConfig};
pub use resource::{ResourcePool, Waiter};
pub use rng::{SimRng, REPLICATION_SEED_STRIDE};
pub use sample::Sample;
pub use stats::{
    LittlesLaw, ResourceAccum, ResourceRunStats, RunStats, StatsCollector, SystemAccum, Tally,
    TallySummary, TimeWeighted,
};
