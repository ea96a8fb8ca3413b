//! The simulation kernel: clock, dispatch loop, and the entity /
//! resource / process state machines.
//!
//! A [`Simulation`] owns everything a replication touches: the event
//! queue, the deterministic RNG stream, every entity, pool, and
//! accumulator. One replication is strictly single-threaded and
//! event-driven; the dispatch loop is the only active context, so no
//! locking exists anywhere below this line.
//!
//! Ordering guarantees:
//! - The clock never moves backwards; simultaneous events share a value.
//! - Simultaneous events dispatch in schedule order (the queue's FIFO
//!   tie-break).
//! - A release and the wake-ups it causes complete at the same clock
//!   instant, before the next event is popped.

use std::collections::BTreeMap;

use millrace_types::{Distribution, EntityId, ResourceId, SimTime, SourceId};

use crate::arrivals::ArrivalSource;
use crate::clock::SimClock;
use crate::diag::{DiagnosticKind, RunDiagnostics};
use crate::entity::{Entity, EntityState};
use crate::event::{Event, EventKind, EventQueue};
use crate::model::{
    CompiledBranch, CompiledProcess, CompiledStep, CompiledTarget, Model, ModelConfig,
};
use crate::resource::{ResourcePool, Waiter};
use crate::rng::SimRng;
use crate::sample::Sample;
use crate::stats::{LittlesLaw, ResourceRunStats, RunStats, StatsCollector};

// ============================================================================
// Simulation
// ============================================================================

/// One replication's kernel.
pub struct Simulation {
    config: ModelConfig,
    processes: Vec<CompiledProcess>,
    clock: SimClock,
    events: EventQueue,
    rng: SimRng,
    entities: BTreeMap<EntityId, Entity>,
    next_entity_id: u64,
    resources: Vec<ResourcePool>,
    resource_index: BTreeMap<ResourceId, usize>,
    sources: Vec<ArrivalSource>,
    source_index: BTreeMap<SourceId, usize>,
    /// Entities the pending arrival of each source will create.
    pending_arrivals: Vec<u32>,
    stats: StatsCollector,
    diagnostics: RunDiagnostics,
    /// Unknown-family tags already reported, so a long run warns once
    /// per tag instead of once per sample.
    warned_unknown_tags: std::collections::BTreeSet<String>,
    events_processed: u64,
    warmup_done: bool,
    initialized: bool,
}

impl Simulation {
    /// Creates a kernel from a validated model and a user-facing seed.
    ///
    /// Seeds `<= 0` fall back to a time-based seed (see [`SimRng::new`]);
    /// such a run is not reproducible.
    pub fn new(model: Model, seed: i64) -> Self {
        Self::with_rng(model, SimRng::new(seed))
    }

    /// Creates a kernel with an exact raw seed. The replication runner
    /// uses this for its deterministic substreams.
    pub fn from_raw_seed(model: Model, seed: u64) -> Self {
        Self::with_rng(model, SimRng::from_raw(seed))
    }

    fn with_rng(model: Model, rng: SimRng) -> Self {
        let resource_count = model.resources.len();
        let resource_index: BTreeMap<ResourceId, usize> = model
            .resources
            .iter()
            .enumerate()
            .map(|(index, spec)| (spec.id, index))
            .collect();
        let source_index: BTreeMap<SourceId, usize> = model
            .sources
            .iter()
            .enumerate()
            .map(|(index, (spec, _))| (spec.id, index))
            .collect();
        let resources = model.resources.into_iter().map(ResourcePool::new).collect();
        let sources: Vec<ArrivalSource> = model
            .sources
            .into_iter()
            .map(|(spec, process)| ArrivalSource::new(spec, process))
            .collect();
        let pending_arrivals = sources.iter().map(|s| s.spec.batch_size).collect();

        Self {
            config: model.config,
            processes: model.processes,
            clock: SimClock::new(),
            events: EventQueue::new(),
            rng,
            entities: BTreeMap::new(),
            next_entity_id: 1,
            resources,
            resource_index,
            sources,
            source_index,
            pending_arrivals,
            stats: StatsCollector::new(resource_count),
            diagnostics: RunDiagnostics::new(),
            warned_unknown_tags: std::collections::BTreeSet::new(),
            events_processed: 0,
            warmup_done: false,
            initialized: false,
        }
    }

    /// Current simulated time.
    pub fn now(&self) -> SimTime {
        self.clock.now()
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    pub fn seed(&self) -> u64 {
        self.rng.seed()
    }

    pub fn diagnostics(&self) -> &RunDiagnostics {
        &self.diagnostics
    }

    /// Pre-schedules first arrivals and first resource failures.
    /// Idempotent; `step` calls it lazily.
    pub fn initialize(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;

        if self.config.warmup <= 0.0 {
            self.warmup_done = true;
        } else if self.config.warmup >= self.config.horizon {
            self.diagnostics.warn(
                0.0,
                DiagnosticKind::EmptyStatisticsWindow,
                format!(
                    "warmup {} reaches horizon {}; all statistics will be empty",
                    self.config.warmup, self.config.horizon
                ),
            );
        }

        for index in 0..self.sources.len() {
            if let Some(planned) = self.sources[index].next_arrival(0.0, &mut self.rng) {
                if planned.time <= self.config.horizon {
                    self.pending_arrivals[index] = planned.quantity;
                    let source = self.sources[index].spec.id;
                    self.events.schedule(planned.time, EventKind::Arrival { source });
                }
            }
        }

        for index in 0..self.resources.len() {
            if let Some(failure) = self.resources[index].spec.failure.clone() {
                let delay = self.draw_duration(&failure);
                let resource = self.resources[index].spec.id;
                self.events
                    .schedule(delay, EventKind::ResourceFailed { resource });
            }
        }
    }

    /// Pops and dispatches one event. Returns false when the run is
    /// over: queue drained, next event past the horizon, or the
    /// max-events guard tripped.
    pub fn step(&mut self) -> bool {
        self.initialize();

        if self.events_processed >= self.config.max_events {
            return false;
        }
        let Some(next_time) = self.events.peek_time() else {
            return false;
        };
        if next_time > self.config.horizon {
            return false;
        }

        // Warmup boundary: the first event at or past the boundary
        // triggers the reset, timed exactly at the boundary so
        // time-weighted integrals restart there.
        if !self.warmup_done && next_time >= self.config.warmup {
            self.stats.reset_at(self.config.warmup);
            self.warmup_done = true;
        }

        let event = self.events.pop().expect("peeked event vanished");
        self.clock.advance_to(event.time);
        self.events_processed += 1;
        self.dispatch(event);
        true
    }

    /// Drives the run to completion and returns its statistics.
    pub fn run(&mut self) -> RunStats {
        while self.step() {}
        self.stats()
    }

    fn is_done(&self) -> bool {
        if !self.initialized {
            return false;
        }
        if self.events_processed >= self.config.max_events {
            return true;
        }
        self.events
            .peek_time()
            .is_none_or(|t| t > self.config.horizon)
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    fn dispatch(&mut self, event: Event) {
        match event.kind {
            EventKind::Arrival { source } => {
                let index = self.source_index[&source];
                self.handle_arrival(index);
            }
            EventKind::EndDelay { entity, step } => self.handle_end_delay(entity, step),
            EventKind::ResourceFailed { resource } => {
                let index = self.resource_index[&resource];
                self.handle_failure(index);
            }
            EventKind::ResourceRepaired { resource } => {
                let index = self.resource_index[&resource];
                self.handle_repair(index);
            }
            EventKind::Custom(tag) => {
                self.diagnostics.warn(
                    self.clock.now(),
                    DiagnosticKind::UnhandledCustomEvent,
                    format!("custom event {tag} reached the kernel, ignoring"),
                );
            }
        }
    }

    fn handle_arrival(&mut self, index: usize) {
        let now = self.clock.now();
        let quantity = self.pending_arrivals[index];
        let process = self.sources[index].process;
        let entity_type = self.sources[index].spec.entity_type.clone();

        for _ in 0..quantity {
            let id = EntityId::new(self.next_entity_id);
            self.next_entity_id += 1;
            let mut entity = Entity::new(id, process, entity_type.clone(), now, !self.warmup_done);
            entity.priority = self.sources[index].spec.priority;
            entity.attributes = self.sources[index].spec.attributes.clone();
            tracing::debug!(entity = %id, time = now, "arrival");
            self.entities.insert(id, entity);
            self.stats.system.created += 1;
            self.stats.system.in_system.add(now, 1.0);
            self.advance(id);
        }

        if let Some(planned) = self.sources[index].next_arrival(now, &mut self.rng) {
            if planned.time <= self.config.horizon {
                self.pending_arrivals[index] = planned.quantity;
                let source = self.sources[index].spec.id;
                self.events.schedule(planned.time, EventKind::Arrival { source });
            }
        }
    }

    fn handle_end_delay(&mut self, id: EntityId, step_index: usize) {
        let process = self
            .entities
            .get(&id)
            .unwrap_or_else(|| panic!("end of delay for unknown entity {id}"))
            .process;
        let step = self.processes[process].steps[step_index].clone();

        match step {
            CompiledStep::Delay { .. } => {
                self.entities.get_mut(&id).expect("entity").step_index = step_index + 1;
                self.advance(id);
            }
            CompiledStep::Service {
                demands, routes, ..
            } => {
                // Free the whole seize set first: waiters wake at this
                // same instant, before this entity routes onward.
                for (resource, quantity) in demands {
                    self.do_release(id, resource, quantity);
                }
                match self.pick_branch(id, &routes) {
                    Some(CompiledTarget::Depart) => {
                        self.depart(id);
                        return;
                    }
                    Some(CompiledTarget::Step(target)) => {
                        self.entities.get_mut(&id).expect("entity").step_index = target;
                    }
                    None => {
                        self.entities.get_mut(&id).expect("entity").step_index = step_index + 1;
                    }
                }
                self.advance(id);
            }
            _ => unreachable!("end-of-delay event for a non-delaying step"),
        }
    }

    fn handle_failure(&mut self, index: usize) {
        let now = self.clock.now();
        self.resources[index].set_failed(true);
        self.stats.resources[index].down.set_level(now, 1.0);
        tracing::debug!(resource = %self.resources[index].spec.name, time = now, "failed");

        let repair = self.resources[index]
            .spec
            .repair
            .clone()
            .expect("failure without repair passed validation");
        let delay = self.draw_duration(&repair);
        let resource = self.resources[index].spec.id;
        self.events
            .schedule(now + delay, EventKind::ResourceRepaired { resource });
    }

    fn handle_repair(&mut self, index: usize) {
        let now = self.clock.now();
        self.resources[index].set_failed(false);
        self.stats.resources[index].down.set_level(now, 0.0);
        tracing::debug!(resource = %self.resources[index].spec.name, time = now, "repaired");

        // Restored capacity wakes the queue exactly like a release.
        self.drain_queue(index);

        let failure = self.resources[index]
            .spec
            .failure
            .clone()
            .expect("repair without failure passed validation");
        let delay = self.draw_duration(&failure);
        let resource = self.resources[index].spec.id;
        self.events
            .schedule(now + delay, EventKind::ResourceFailed { resource });
    }

    // ========================================================================
    // Entity State Machine
    // ========================================================================

    /// Executes steps for `id` until it blocks on a seize, suspends in a
    /// delay, or departs.
    fn advance(&mut self, id: EntityId) {
        loop {
            let (process, step_index) = {
                let entity = self
                    .entities
                    .get(&id)
                    .unwrap_or_else(|| panic!("advance of unknown entity {id}"));
                assert!(
                    entity.state != EntityState::Departed,
                    "advance of departed entity {id}"
                );
                (entity.process, entity.step_index)
            };

            if step_index >= self.processes[process].steps.len() {
                self.depart(id);
                return;
            }

            let step = self.processes[process].steps[step_index].clone();
            match step {
                CompiledStep::Seize { resource, quantity } => {
                    if !self.try_seize(id, &[(resource, quantity)]) {
                        return;
                    }
                    self.entities.get_mut(&id).expect("entity").step_index += 1;
                }

                CompiledStep::Delay { duration } => {
                    let delay = self.draw_duration(&duration);
                    let now = self.clock.now();
                    let entity = self.entities.get_mut(&id).expect("entity");
                    if entity.holds_any() {
                        entity.state = EntityState::Processing;
                        entity.processing_accum += delay;
                    } else {
                        entity.state = EntityState::Traveling;
                    }
                    self.events.schedule(
                        now + delay,
                        EventKind::EndDelay {
                            entity: id,
                            step: step_index,
                        },
                    );
                    return;
                }

                CompiledStep::Release { resource, quantity } => {
                    // A release consumes no simulated time: the entity
                    // continues to its next step at this same instant.
                    self.do_release(id, resource, quantity);
                    self.entities.get_mut(&id).expect("entity").step_index += 1;
                }

                CompiledStep::Decision { branches } => {
                    self.entities.get_mut(&id).expect("entity").state = EntityState::Deciding;
                    match self.pick_branch(id, &branches) {
                        Some(CompiledTarget::Depart) => {
                            self.depart(id);
                            return;
                        }
                        Some(CompiledTarget::Step(target)) => {
                            self.entities.get_mut(&id).expect("entity").step_index = target;
                        }
                        None => {
                            self.entities.get_mut(&id).expect("entity").step_index += 1;
                        }
                    }
                }

                CompiledStep::Service {
                    demands, duration, ..
                } => {
                    if !self.try_seize(id, &demands) {
                        return;
                    }
                    let delay = self.draw_duration(&duration);
                    let now = self.clock.now();
                    let entity = self.entities.get_mut(&id).expect("entity");
                    entity.state = EntityState::Processing;
                    entity.processing_accum += delay;
                    self.events.schedule(
                        now + delay,
                        EventKind::EndDelay {
                            entity: id,
                            step: step_index,
                        },
                    );
                    return;
                }
            }
        }
    }

    /// All-or-nothing seize of every demand. On failure the entity parks
    /// on the first unavailable pool and will re-attempt the full set
    /// when woken; starvation under adversarial schedules is a known
    /// limitation of this policy.
    fn try_seize(&mut self, id: EntityId, demands: &[(usize, u32)]) -> bool {
        let blocking = demands
            .iter()
            .find(|(resource, quantity)| !self.resources[*resource].can_seize(*quantity));
        if let Some((blocked, _)) = blocking {
            self.park(id, *blocked);
            return false;
        }

        let now = self.clock.now();

        // Leaving a wait queue: close out the wait observation.
        let entity = self.entities.get_mut(&id).expect("entity");
        if let Some(entered) = entity.queue_entered_at.take() {
            let waited = now - entered;
            entity.wait_accum += waited;
            if let Some(waited_on) = entity.waiting_on.take() {
                if self.warmup_done {
                    self.stats.resources[waited_on].wait.record(waited);
                }
            }
        }

        for (resource, quantity) in demands {
            self.resources[*resource].seize(id, *quantity);
            let in_use = f64::from(self.resources[*resource].in_use());
            self.stats.resources[*resource].busy.set_level(now, in_use);
            self.stats.resources[*resource].seize_count += 1;
            self.entities
                .get_mut(&id)
                .expect("entity")
                .hold(*resource, *quantity);
        }
        true
    }

    /// Parks `id` in a pool's wait queue. A re-park after a failed
    /// wake-up keeps the original queue-entry time so the eventual wait
    /// observation covers the whole wait.
    fn park(&mut self, id: EntityId, pool: usize) {
        let now = self.clock.now();
        let entity = self.entities.get_mut(&id).expect("entity");
        entity.state = EntityState::Waiting;
        entity.waiting_on = Some(pool);
        let entered = *entity.queue_entered_at.get_or_insert(now);
        let waiter = Waiter {
            entity: id,
            priority: entity.priority,
            entered_at: entered,
        };
        self.resources[pool].enqueue(waiter);
        let depth = self.resources[pool].queue_len() as f64;
        self.stats.resources[pool].queue.set_level(now, depth);
    }

    /// Returns units to a pool and wakes its queue, all at the current
    /// clock instant.
    fn do_release(&mut self, id: EntityId, pool: usize, quantity: u32) {
        let now = self.clock.now();
        self.resources[pool].release(id, quantity);
        self.entities
            .get_mut(&id)
            .expect("entity")
            .unhold(pool, quantity);
        let in_use = f64::from(self.resources[pool].in_use());
        self.stats.resources[pool].busy.set_level(now, in_use);
        self.drain_queue(pool);
    }

    /// Wakes waiters head-first while free capacity remains. A woken
    /// waiter that immediately re-parks here (a multi-resource seize
    /// still blocked elsewhere) goes back to the head and the drain
    /// stops, preserving queue order without spinning.
    fn drain_queue(&mut self, pool: usize) {
        let now = self.clock.now();
        loop {
            if self.resources[pool].available() == 0 {
                return;
            }
            let Some(waiter) = self.resources[pool].dequeue() else {
                return;
            };
            let depth = self.resources[pool].queue_len() as f64;
            self.stats.resources[pool].queue.set_level(now, depth);

            let woken = waiter.entity;
            self.advance(woken);

            let reparked = self
                .entities
                .get(&woken)
                .is_some_and(|e| e.state == EntityState::Waiting && e.waiting_on == Some(pool));
            if reparked {
                if let Some(restored) = self.resources[pool].remove_waiter(woken) {
                    self.resources[pool].requeue_front(restored);
                }
                return;
            }
        }
    }

    /// Walks routing branches: predicates first in declaration order,
    /// then the probability branches by cumulative draw. `None` means no
    /// branch applied (no predicates matched and no probability
    /// branches); the caller falls through to the next step.
    fn pick_branch(&mut self, id: EntityId, branches: &[CompiledBranch]) -> Option<CompiledTarget> {
        if branches.is_empty() {
            return None;
        }
        {
            let entity = self.entities.get(&id).expect("entity");
            for branch in branches {
                if let Some(predicate) = &branch.predicate {
                    if predicate.matches(&entity.attributes) {
                        return Some(branch.target);
                    }
                }
            }
        }

        let probability_branches: Vec<&CompiledBranch> = branches
            .iter()
            .filter(|b| b.predicate.is_none() && b.probability.is_some())
            .collect();
        if probability_branches.is_empty() {
            return None;
        }

        let u = self.rng.uniform();
        let mut cumulative = 0.0;
        for branch in &probability_branches {
            cumulative += branch.probability.expect("filtered");
            if cumulative >= u {
                return Some(branch.target);
            }
        }
        // Floating-point shortfall inside the validated tolerance.
        Some(probability_branches[probability_branches.len() - 1].target)
    }

    /// Ends an entity's life: residual holds are released, cycle-time
    /// statistics recorded (unless the entity arrived during warmup),
    /// and the token is destroyed.
    fn depart(&mut self, id: EntityId) {
        let holdings: Vec<(usize, u32)> = self
            .entities
            .get(&id)
            .expect("entity")
            .holdings
            .iter()
            .map(|(resource, quantity)| (*resource, *quantity))
            .collect();
        for (resource, quantity) in holdings {
            self.do_release(id, resource, quantity);
        }

        let now = self.clock.now();
        let entity = self.entities.get_mut(&id).expect("entity");
        entity.state = EntityState::Departed;
        let cycle = now - entity.arrived_at;
        let during_warmup = entity.during_warmup;
        let total_wait = entity.wait_accum;
        let processing = entity.processing_accum;
        tracing::debug!(entity = %id, time = now, cycle, "departure");

        self.stats.system.in_system.add(now, -1.0);
        if self.warmup_done {
            self.stats.system.departed += 1;
            if !during_warmup {
                self.stats.system.cycle.record(cycle);
                self.stats.system.total_wait.record(total_wait);
                self.stats.system.processing.record(processing);
            }
        }
        self.entities.remove(&id);
    }

    fn draw_duration(&mut self, duration: &Distribution) -> f64 {
        if let Distribution::Unknown { tag } = duration {
            if self.warned_unknown_tags.insert(tag.clone()) {
                self.diagnostics.warn(
                    self.clock.now(),
                    DiagnosticKind::UnknownDistribution,
                    format!("unknown distribution family '{tag}', sampling 1"),
                );
            }
        }
        duration.sample_duration(&mut self.rng)
    }

    // ========================================================================
    // Statistics Snapshot
    // ========================================================================

    /// Statistics over the observation window `[warmup boundary, horizon]`.
    ///
    /// Callable mid-run (the window then ends at the current clock); after
    /// `run()` the window closes exactly at the horizon, with levels held
    /// constant from the last event onward.
    pub fn stats(&self) -> RunStats {
        let horizon = self.config.horizon;
        let warmup = self.config.warmup;

        if warmup >= horizon {
            return self.empty_stats();
        }

        let origin = self.stats.origin;
        let end = if self.is_done() {
            horizon
        } else {
            self.clock.now().min(horizon)
        };
        let observed = (end - origin).max(0.0);

        let mut resources = Vec::with_capacity(self.resources.len());
        let mut lq_total = 0.0;
        for (pool, accum) in self.resources.iter().zip(&self.stats.resources) {
            let capacity = f64::from(pool.spec.capacity);
            let busy_time = accum.busy.integral_until(end);
            let avg_queue_length = accum.queue.time_average(origin, end);
            lq_total += avg_queue_length;
            resources.push(ResourceRunStats {
                name: pool.spec.name.clone(),
                capacity: pool.spec.capacity,
                utilization: if observed > 0.0 {
                    busy_time / (capacity * observed)
                } else {
                    0.0
                },
                avg_queue_length,
                max_queue_length: accum.queue.max_level(),
                wait_time: accum.wait.summary(),
                seize_count: accum.seize_count,
                busy_time,
                down_time: accum.down.integral_until(end),
            });
        }

        let system = &self.stats.system;
        let arrival_rate = if observed > 0.0 {
            system.created as f64 / observed
        } else {
            0.0
        };
        let throughput = if observed > 0.0 {
            system.departed as f64 / observed
        } else {
            0.0
        };
        let l = system.in_system.time_average(origin, end);

        RunStats {
            seed: self.rng.seed(),
            horizon,
            warmup,
            observed,
            final_time: self.clock.now(),
            events_processed: self.events_processed,
            entities_created: system.created,
            entities_departed: system.departed,
            throughput,
            cycle_time: system.cycle.summary(),
            wait_time: system.total_wait.summary(),
            processing_time: system.processing.summary(),
            avg_in_system: l,
            avg_in_queue: lq_total,
            resources,
            littles_law: LittlesLaw {
                arrival_rate,
                l,
                w: system.cycle.mean(),
                lq: lq_total,
                wq: system.total_wait.mean(),
            },
        }
    }

    /// The all-zero result of a run whose statistics window is empty.
    fn empty_stats(&self) -> RunStats {
        RunStats {
            seed: self.rng.seed(),
            horizon: self.config.horizon,
            warmup: self.config.warmup,
            observed: 0.0,
            final_time: self.clock.now(),
            events_processed: self.events_processed,
            entities_created: 0,
            entities_departed: 0,
            throughput: 0.0,
            cycle_time: Default::default(),
            wait_time: Default::default(),
            processing_time: Default::default(),
            avg_in_system: 0.0,
            avg_in_queue: 0.0,
            resources: self
                .resources
                .iter()
                .map(|pool| ResourceRunStats {
                    name: pool.spec.name.clone(),
                    capacity: pool.spec.capacity,
                    utilization: 0.0,
                    avg_queue_length: 0.0,
                    max_queue_length: 0.0,
                    wait_time: Default::default(),
                    seize_count: 0,
                    busy_time: 0.0,
                    down_time: 0.0,
                })
                .collect(),
            littles_law: LittlesLaw {
                arrival_rate: 0.0,
                l: 0.0,
                w: 0.0,
                lq: 0.0,
                wq: 0.0,
            },
        }
    }
}
