//! Model construction and validation.
//!
//! A [`ModelBuilder`] collects resource, process, and source
//! specifications, then `build()` validates the whole network and
//! compiles it into the dense form the kernel executes: resource ids
//! become vector indices, routing labels become step indices, and every
//! distribution's parameter vector is checked. Configuration errors
//! surface here, before a single event is dispatched.

use std::collections::BTreeMap;

use millrace_types::{
    ArrivalPattern, Branch, ConfigError, Distribution, Predicate, ProcessId, ProcessSpec,
    ResourceId, ResourceSpec, RouteTarget, SimTime, SourceId, SourceSpec, Step,
    BRANCH_PROB_TOLERANCE,
};

// ============================================================================
// Run Configuration
// ============================================================================

/// Fixed parameters of a run.
#[derive(Debug, Clone, Copy)]
pub struct ModelConfig {
    /// Simulated end time. Events beyond it are left undispatched.
    pub horizon: SimTime,
    /// Warmup boundary; accumulators reset when the clock first reaches
    /// it. Zero disables warmup deletion.
    pub warmup: SimTime,
    /// Guard against runaway event loops.
    pub max_events: u64,
}

// ============================================================================
// Compiled Network
// ============================================================================

/// Routing target with labels resolved away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompiledTarget {
    Step(usize),
    Depart,
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledBranch {
    pub probability: Option<f64>,
    pub predicate: Option<Predicate>,
    pub target: CompiledTarget,
}

/// A step with resource ids and labels resolved to dense indices.
#[derive(Debug, Clone)]
pub(crate) enum CompiledStep {
    Seize {
        resource: usize,
        quantity: u32,
    },
    Delay {
        duration: Distribution,
    },
    Release {
        resource: usize,
        quantity: u32,
    },
    Decision {
        branches: Vec<CompiledBranch>,
    },
    Service {
        demands: Vec<(usize, u32)>,
        duration: Distribution,
        routes: Vec<CompiledBranch>,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledProcess {
    pub id: ProcessId,
    pub name: String,
    pub entity_type: String,
    pub steps: Vec<CompiledStep>,
}

/// A validated, compiled model, ready to hand to the kernel.
#[derive(Debug, Clone)]
pub struct Model {
    pub(crate) resources: Vec<ResourceSpec>,
    pub(crate) processes: Vec<CompiledProcess>,
    /// (source spec, index of the process serving its entity type).
    pub(crate) sources: Vec<(SourceSpec, usize)>,
    pub(crate) config: ModelConfig,
}

impl Model {
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn resource_specs(&self) -> &[ResourceSpec] {
        &self.resources
    }
}

// ============================================================================
// Builder
// ============================================================================

const DEFAULT_MAX_EVENTS: u64 = 1_000_000_000;

/// Collects a model definition and validates it on `build()`.
#[derive(Debug, Default)]
pub struct ModelBuilder {
    resources: Vec<ResourceSpec>,
    processes: Vec<ProcessSpec>,
    sources: Vec<SourceSpec>,
    horizon: Option<SimTime>,
    warmup: SimTime,
    max_events: u64,
    check_stability: bool,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self {
            max_events: DEFAULT_MAX_EVENTS,
            ..Self::default()
        }
    }

    /// Adds a resource pool.
    pub fn resource(mut self, spec: ResourceSpec) -> Self {
        self.resources.push(spec);
        self
    }

    /// Adds a process (an entity type's step sequence).
    pub fn process(mut self, spec: ProcessSpec) -> Self {
        self.processes.push(spec);
        self
    }

    /// Adds an arrival source.
    pub fn source(mut self, spec: SourceSpec) -> Self {
        self.sources.push(spec);
        self
    }

    /// Sets the simulated end time. Required.
    pub fn horizon(mut self, horizon: SimTime) -> Self {
        self.horizon = Some(horizon);
        self
    }

    /// Sets the warmup boundary (statistics before it are discarded).
    pub fn warmup(mut self, warmup: SimTime) -> Self {
        self.warmup = warmup;
        self
    }

    /// Overrides the runaway-loop event guard.
    pub fn max_events(mut self, max_events: u64) -> Self {
        self.max_events = max_events;
        self
    }

    /// Requests the analytical stability check: stations whose offered
    /// load reaches capacity fail the build. The check covers sources
    /// with a known arrival rate and service distributions with a
    /// closed-form mean, and assumes each station is visited once per
    /// entity; rework loops make it an underestimate.
    pub fn check_stability(mut self) -> Self {
        self.check_stability = true;
        self
    }

    /// Validates and compiles the model.
    pub fn build(self) -> Result<Model, ConfigError> {
        let horizon = self.horizon.unwrap_or(0.0);
        if horizon <= 0.0 || !horizon.is_finite() {
            return Err(ConfigError::NonPositiveHorizon(horizon));
        }
        if self.warmup < 0.0 || !self.warmup.is_finite() {
            return Err(ConfigError::NegativeWarmup(self.warmup));
        }

        let resource_index = validate_resources(&self.resources)?;

        let mut entity_type_process: BTreeMap<String, usize> = BTreeMap::new();
        let mut seen_process_ids: Vec<ProcessId> = Vec::new();
        let mut processes = Vec::with_capacity(self.processes.len());
        for spec in &self.processes {
            if seen_process_ids.contains(&spec.id) {
                return Err(ConfigError::DuplicateProcess(spec.id));
            }
            seen_process_ids.push(spec.id);
            let compiled = compile_process(spec, &resource_index)?;
            entity_type_process
                .entry(spec.entity_type.clone())
                .or_insert(processes.len());
            processes.push(compiled);
        }

        let mut seen_source_ids: Vec<SourceId> = Vec::new();
        let mut sources = Vec::with_capacity(self.sources.len());
        for spec in self.sources {
            if seen_source_ids.contains(&spec.id) {
                return Err(ConfigError::DuplicateSource(spec.id));
            }
            seen_source_ids.push(spec.id);
            if spec.batch_size == 0 {
                return Err(ConfigError::ZeroBatchSize(spec.id));
            }
            validate_pattern(&spec)?;
            let process = *entity_type_process.get(&spec.entity_type).ok_or_else(|| {
                ConfigError::UnservedEntityType(spec.id, spec.entity_type.clone())
            })?;
            sources.push((spec, process));
        }

        if self.check_stability {
            check_station_stability(&self.resources, &processes, &sources)?;
        }

        Ok(Model {
            resources: self.resources,
            processes,
            sources,
            config: ModelConfig {
                horizon,
                warmup: self.warmup,
                max_events: self.max_events,
            },
        })
    }
}

// ============================================================================
// Validation
// ============================================================================

fn validate_resources(
    resources: &[ResourceSpec],
) -> Result<BTreeMap<ResourceId, usize>, ConfigError> {
    let mut index = BTreeMap::new();
    for (position, spec) in resources.iter().enumerate() {
        if index.insert(spec.id, position).is_some() {
            return Err(ConfigError::DuplicateResource(spec.id));
        }
        if spec.capacity == 0 {
            return Err(ConfigError::ZeroCapacity {
                resource: spec.id,
                name: spec.name.clone(),
            });
        }
        if spec.failure.is_some() != spec.repair.is_some() {
            return Err(ConfigError::FailureWithoutRepair(spec.id));
        }
        if let Some(failure) = &spec.failure {
            failure.validate()?;
        }
        if let Some(repair) = &spec.repair {
            repair.validate()?;
        }
    }
    Ok(index)
}

fn compile_process(
    spec: &ProcessSpec,
    resource_index: &BTreeMap<ResourceId, usize>,
) -> Result<CompiledProcess, ConfigError> {
    if spec.steps.is_empty() {
        return Err(ConfigError::EmptyProcess(spec.id));
    }

    let resolve = |step: usize, resource: ResourceId| {
        resource_index
            .get(&resource)
            .copied()
            .ok_or(ConfigError::UnknownResource {
                process: spec.id,
                step,
                resource,
            })
    };

    let mut steps = Vec::with_capacity(spec.steps.len());
    for (position, step) in spec.steps.iter().enumerate() {
        let compiled = match step {
            Step::Seize { resource, quantity } => CompiledStep::Seize {
                resource: resolve(position, *resource)?,
                quantity: *quantity,
            },
            Step::Release { resource, quantity } => CompiledStep::Release {
                resource: resolve(position, *resource)?,
                quantity: *quantity,
            },
            Step::Delay { duration } => {
                duration.validate()?;
                CompiledStep::Delay {
                    duration: duration.clone(),
                }
            }
            Step::Decision { branches } => CompiledStep::Decision {
                branches: compile_branches(spec, position, branches)?,
            },
            Step::Service {
                demands,
                duration,
                routes,
            } => {
                duration.validate()?;
                let mut compiled_demands = Vec::with_capacity(demands.len());
                for demand in demands {
                    compiled_demands.push((resolve(position, demand.resource)?, demand.quantity));
                }
                CompiledStep::Service {
                    demands: compiled_demands,
                    duration: duration.clone(),
                    routes: compile_branches(spec, position, routes)?,
                }
            }
        };
        steps.push(compiled);
    }

    Ok(CompiledProcess {
        id: spec.id,
        name: spec.name.clone(),
        entity_type: spec.entity_type.clone(),
        steps,
    })
}

fn compile_branches(
    spec: &ProcessSpec,
    position: usize,
    branches: &[Branch],
) -> Result<Vec<CompiledBranch>, ConfigError> {
    let mut compiled = Vec::with_capacity(branches.len());
    let mut probability_sum = 0.0;
    let mut has_probability_branch = false;

    for branch in branches {
        if branch.probability.is_none() && branch.predicate.is_none() {
            return Err(ConfigError::BranchUnderSpecified {
                process: spec.id,
                step: position,
            });
        }
        // A branch carrying both acts as a predicate branch; its
        // probability participates in the sum check all the same so a
        // mistyped model cannot hide behind a predicate.
        if let Some(p) = branch.probability {
            probability_sum += p;
            has_probability_branch = true;
        }
        let target = match &branch.target {
            RouteTarget::Depart => CompiledTarget::Depart,
            RouteTarget::Step(index) => {
                if *index >= spec.steps.len() {
                    return Err(ConfigError::RouteOutOfRange {
                        process: spec.id,
                        step: position,
                        target: *index,
                    });
                }
                CompiledTarget::Step(*index)
            }
            RouteTarget::Label(label) => {
                let index =
                    spec.labels
                        .get(label)
                        .copied()
                        .ok_or_else(|| ConfigError::UnknownLabel {
                            process: spec.id,
                            step: position,
                            label: label.clone(),
                        })?;
                if index >= spec.steps.len() {
                    return Err(ConfigError::RouteOutOfRange {
                        process: spec.id,
                        step: position,
                        target: index,
                    });
                }
                CompiledTarget::Step(index)
            }
        };
        compiled.push(CompiledBranch {
            probability: branch.probability,
            predicate: branch.predicate.clone(),
            target,
        });
    }

    if has_probability_branch && (probability_sum - 1.0).abs() > BRANCH_PROB_TOLERANCE {
        return Err(ConfigError::BranchProbabilitySum {
            process: spec.id,
            step: position,
            sum: probability_sum,
        });
    }

    Ok(compiled)
}

fn validate_pattern(spec: &SourceSpec) -> Result<(), ConfigError> {
    let bad = |detail: &str| {
        Err(ConfigError::InvalidArrivalPattern {
            source_id: spec.id,
            detail: detail.to_string(),
        })
    };
    match &spec.pattern {
        ArrivalPattern::Interarrival { duration } => duration.validate(),
        ArrivalPattern::Poisson { rate } => {
            if !rate.is_finite() || *rate <= 0.0 {
                return bad("poisson rate must be positive");
            }
            Ok(())
        }
        ArrivalPattern::NonHomogeneousPoisson { periods } => {
            if periods.is_empty() {
                return bad("rate schedule has no periods");
            }
            for period in periods {
                if !(period.start.is_finite() && period.end.is_finite())
                    || period.start < 0.0
                    || period.start >= period.end
                {
                    return bad("each period needs 0 <= start < end");
                }
                if !period.rate.is_finite() || period.rate < 0.0 {
                    return bad("period rates must be nonnegative");
                }
            }
            let ordered = periods
                .windows(2)
                .all(|w| w[0].end <= w[1].start);
            if !ordered {
                return bad("periods must be sorted and non-overlapping");
            }
            Ok(())
        }
        ArrivalPattern::Schedule { batches } => {
            if batches.is_empty() {
                return bad("schedule has no batches");
            }
            for batch in batches {
                if !batch.time.is_finite() || batch.time < 0.0 {
                    return bad("batch times must be nonnegative");
                }
                if batch.quantity == 0 {
                    return bad("batch quantities must be at least 1");
                }
            }
            let ordered = batches.windows(2).all(|w| w[0].time <= w[1].time);
            if !ordered {
                return bad("batches must be sorted by time");
            }
            Ok(())
        }
    }
}

// ============================================================================
// Stability Check
// ============================================================================

/// Arrival rate of a source, when it has one in closed form.
fn source_rate(spec: &SourceSpec) -> Option<f64> {
    match &spec.pattern {
        ArrivalPattern::Poisson { rate } => Some(*rate),
        ArrivalPattern::Interarrival { duration } => {
            let mean = duration.mean()?;
            (mean > 0.0).then(|| 1.0 / mean)
        }
        ArrivalPattern::NonHomogeneousPoisson { .. } | ArrivalPattern::Schedule { .. } => None,
    }
}

/// Rejects stations whose offered load `lambda * E[S] * quantity` reaches
/// capacity. A `Seize` contributes the mean of the `Delay` that follows
/// it; a `Service` contributes its own duration.
fn check_station_stability(
    resources: &[ResourceSpec],
    processes: &[CompiledProcess],
    sources: &[(SourceSpec, usize)],
) -> Result<(), ConfigError> {
    let mut process_rate = vec![0.0f64; processes.len()];
    for (spec, process) in sources {
        if let Some(rate) = source_rate(spec) {
            process_rate[*process] += rate * f64::from(spec.batch_size);
        }
    }

    let mut offered = vec![0.0f64; resources.len()];
    let mut station_rate = vec![0.0f64; resources.len()];
    for (process, rate) in processes.iter().zip(&process_rate) {
        if *rate <= 0.0 {
            continue;
        }
        for (position, step) in process.steps.iter().enumerate() {
            match step {
                CompiledStep::Service {
                    demands, duration, ..
                } => {
                    if let Some(mean) = duration.mean() {
                        for (resource, quantity) in demands {
                            offered[*resource] += rate * mean * f64::from(*quantity);
                            station_rate[*resource] += rate;
                        }
                    }
                }
                CompiledStep::Seize { resource, quantity } => {
                    let next = process.steps.get(position + 1);
                    if let Some(CompiledStep::Delay { duration }) = next {
                        if let Some(mean) = duration.mean() {
                            offered[*resource] += rate * mean * f64::from(*quantity);
                            station_rate[*resource] += rate;
                        }
                    }
                }
                _ => {}
            }
        }
    }

    for (index, spec) in resources.iter().enumerate() {
        if offered[index] >= f64::from(spec.capacity) {
            let lambda = station_rate[index];
            return Err(ConfigError::UnstableStation {
                name: spec.name.clone(),
                offered: offered[index],
                capacity: spec.capacity,
                lambda,
                service: if lambda > 0.0 {
                    offered[index] / lambda
                } else {
                    0.0
                },
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use millrace_types::ResourceDemand;

    fn server() -> ResourceSpec {
        ResourceSpec::new(ResourceId::new(1), "server", 1)
    }

    fn mm1_process(service_rate: f64) -> ProcessSpec {
        ProcessSpec::new(ProcessId::new(1), "serve", "job").step(Step::Service {
            demands: vec![ResourceDemand::one(ResourceId::new(1))],
            duration: Distribution::Exponential { rate: service_rate },
            routes: vec![],
        })
    }

    fn poisson_source(rate: f64) -> SourceSpec {
        SourceSpec::new(SourceId::new(1), "job", ArrivalPattern::Poisson { rate })
    }

    #[test]
    fn minimal_model_builds() {
        let model = ModelBuilder::new()
            .resource(server())
            .process(mm1_process(1.0))
            .source(poisson_source(0.5))
            .horizon(100.0)
            .build()
            .expect("model should build");
        assert_eq!(model.resources.len(), 1);
        assert_eq!(model.sources.len(), 1);
        assert_eq!(model.config.horizon, 100.0);
    }

    #[test]
    fn missing_horizon_is_rejected() {
        let err = ModelBuilder::new()
            .resource(server())
            .process(mm1_process(1.0))
            .source(poisson_source(0.5))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::NonPositiveHorizon(_)));
    }

    #[test]
    fn unknown_resource_reference_is_rejected() {
        let process = ProcessSpec::new(ProcessId::new(1), "serve", "job").step(Step::Seize {
            resource: ResourceId::new(99),
            quantity: 1,
        });
        let err = ModelBuilder::new()
            .resource(server())
            .process(process)
            .horizon(10.0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownResource { .. }));
    }

    #[test]
    fn branch_probabilities_must_sum_to_one() {
        let process = ProcessSpec::new(ProcessId::new(1), "route", "job").step(Step::Decision {
            branches: vec![
                Branch::with_probability(0.5, RouteTarget::Depart),
                Branch::with_probability(0.2, RouteTarget::Depart),
            ],
        });
        let err = ModelBuilder::new()
            .process(process)
            .horizon(10.0)
            .build()
            .unwrap_err();
        match err {
            ConfigError::BranchProbabilitySum { sum, .. } => {
                assert!((sum - 0.7).abs() < 1e-12);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn labels_resolve_to_indices_including_loops() {
        let process = ProcessSpec::new(ProcessId::new(1), "rework", "job")
            .labeled_step(
                "station",
                Step::Delay {
                    duration: Distribution::Constant { value: 1.0 },
                },
            )
            .step(Step::Decision {
                branches: vec![
                    Branch::with_probability(0.3, RouteTarget::Label("station".to_string())),
                    Branch::with_probability(0.7, RouteTarget::Depart),
                ],
            });
        let model = ModelBuilder::new()
            .process(process)
            .horizon(10.0)
            .build()
            .expect("loops are legal");
        match &model.processes[0].steps[1] {
            CompiledStep::Decision { branches } => {
                assert_eq!(branches[0].target, CompiledTarget::Step(0));
                assert_eq!(branches[1].target, CompiledTarget::Depart);
            }
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn unknown_label_is_rejected() {
        let process = ProcessSpec::new(ProcessId::new(1), "route", "job").step(Step::Decision {
            branches: vec![Branch::with_probability(
                1.0,
                RouteTarget::Label("nowhere".to_string()),
            )],
        });
        let err = ModelBuilder::new()
            .process(process)
            .horizon(10.0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownLabel { .. }));
    }

    #[test]
    fn unstable_station_is_rejected_when_checked() {
        // lambda = 1.0 >= c * mu = 1.0: the M/M/1 boundary case.
        let err = ModelBuilder::new()
            .resource(server())
            .process(mm1_process(1.0))
            .source(poisson_source(1.0))
            .horizon(10_000.0)
            .check_stability()
            .build()
            .unwrap_err();
        match err {
            ConfigError::UnstableStation { offered, capacity, .. } => {
                assert!(offered >= 1.0);
                assert_eq!(capacity, 1);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn stable_station_passes_the_check() {
        ModelBuilder::new()
            .resource(server())
            .process(mm1_process(1.0))
            .source(poisson_source(0.8))
            .horizon(10_000.0)
            .check_stability()
            .build()
            .expect("rho = 0.8 is stable");
    }

    #[test]
    fn unserved_entity_type_is_rejected() {
        let err = ModelBuilder::new()
            .resource(server())
            .process(mm1_process(1.0))
            .source(SourceSpec::new(
                SourceId::new(1),
                "widget",
                ArrivalPattern::Poisson { rate: 1.0 },
            ))
            .horizon(10.0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnservedEntityType(_, _)));
    }

    #[test]
    fn overlapping_rate_periods_are_rejected() {
        let source = SourceSpec::new(
            SourceId::new(1),
            "job",
            ArrivalPattern::NonHomogeneousPoisson {
                periods: vec![
                    millrace_types::RatePeriod {
                        start: 0.0,
                        end: 10.0,
                        rate: 1.0,
                    },
                    millrace_types::RatePeriod {
                        start: 5.0,
                        end: 15.0,
                        rate: 2.0,
                    },
                ],
            },
        );
        let err = ModelBuilder::new()
            .process(mm1_process(1.0))
            .resource(server())
            .source(source)
            .horizon(10.0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidArrivalPattern { .. }));
    }
}
