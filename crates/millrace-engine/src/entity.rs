//! Entities: the tokens flowing through the network.

use std::collections::BTreeMap;

use millrace_types::{AttrValue, EntityId, SimTime};

/// Lifecycle state of an entity.
///
/// Invariants the kernel maintains:
/// - `Processing` holds at least one resource unit.
/// - `Waiting` holds zero units and sits in exactly one wait queue.
/// - `Departed` holds nothing and sits in no queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    Arriving,
    Waiting,
    Processing,
    Deciding,
    Traveling,
    Departed,
}

/// A token flowing through the simulated network.
#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,
    /// Index of the process driving this entity.
    pub process: usize,
    pub entity_type: String,
    pub arrived_at: SimTime,
    /// Position in the process's step sequence.
    pub step_index: usize,
    pub state: EntityState,
    /// Resource units currently held, by resource index.
    pub holdings: BTreeMap<usize, u32>,
    /// User-defined per-entity data, consulted by predicate branches.
    pub attributes: BTreeMap<String, AttrValue>,
    /// Ordering key for priority wait queues; higher is served first.
    pub priority: i32,
    /// True when the entity arrived before the warmup boundary. Such
    /// entities are excluded from cycle-time statistics even when they
    /// depart after the boundary.
    pub during_warmup: bool,
    /// Index of the pool whose wait queue holds this entity, when Waiting.
    pub waiting_on: Option<usize>,
    /// When the entity entered its current wait queue. Survives a failed
    /// wake-up so the eventual wait observation spans the whole wait.
    pub queue_entered_at: Option<SimTime>,
    /// Total time spent waiting, accumulated across queues.
    pub wait_accum: f64,
    /// Total in-process time, accumulated across delays and services.
    pub processing_accum: f64,
}

impl Entity {
    pub fn new(
        id: EntityId,
        process: usize,
        entity_type: impl Into<String>,
        arrived_at: SimTime,
        during_warmup: bool,
    ) -> Self {
        Self {
            id,
            process,
            entity_type: entity_type.into(),
            arrived_at,
            step_index: 0,
            state: EntityState::Arriving,
            holdings: BTreeMap::new(),
            attributes: BTreeMap::new(),
            priority: 0,
            during_warmup,
            waiting_on: None,
            queue_entered_at: None,
            wait_accum: 0.0,
            processing_accum: 0.0,
        }
    }

    /// Units of resource `resource` currently held.
    pub fn held(&self, resource: usize) -> u32 {
        self.holdings.get(&resource).copied().unwrap_or(0)
    }

    pub fn holds_any(&self) -> bool {
        !self.holdings.is_empty()
    }

    /// Records acquisition of `quantity` units.
    pub fn hold(&mut self, resource: usize, quantity: u32) {
        *self.holdings.entry(resource).or_insert(0) += quantity;
    }

    /// Records return of `quantity` units. Returning more than held is a
    /// kernel bug.
    pub fn unhold(&mut self, resource: usize, quantity: u32) {
        let held = self.holdings.get_mut(&resource);
        let held = held.unwrap_or_else(|| {
            panic!("entity {} releasing resource {resource} it does not hold", self.id)
        });
        assert!(
            *held >= quantity,
            "entity {} releasing {quantity} of resource {resource}, holds {held}",
            self.id
        );
        *held -= quantity;
        if *held == 0 {
            self.holdings.remove(&resource);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holdings_accumulate_and_release() {
        let mut entity = Entity::new(EntityId::new(1), 0, "job", 0.0, false);
        assert!(!entity.holds_any());
        entity.hold(2, 1);
        entity.hold(2, 2);
        entity.hold(5, 1);
        assert_eq!(entity.held(2), 3);
        entity.unhold(2, 3);
        assert_eq!(entity.held(2), 0);
        assert!(entity.holds_any());
        entity.unhold(5, 1);
        assert!(!entity.holds_any());
    }

    #[test]
    #[should_panic(expected = "does not hold")]
    fn releasing_unheld_resource_is_fatal() {
        let mut entity = Entity::new(EntityId::new(1), 0, "job", 0.0, false);
        entity.unhold(3, 1);
    }
}
