//! Resource pools: finite interchangeable capacity with a wait queue.

use std::collections::VecDeque;

use millrace_types::{EntityId, QueueDiscipline, ResourceSpec, SimTime};

/// One entry in a pool's wait queue.
#[derive(Debug, Clone, Copy)]
pub struct Waiter {
    pub entity: EntityId,
    pub priority: i32,
    pub entered_at: SimTime,
}

/// A pool of interchangeable capacity units.
///
/// Failure policy is lenient: a failed pool admits no new seizes (its
/// effective free capacity is zero) but in-flight service runs to
/// completion and releases normally.
#[derive(Debug, Clone)]
pub struct ResourcePool {
    pub spec: ResourceSpec,
    in_use: u32,
    failed: bool,
    queue: VecDeque<Waiter>,
    busy: Vec<EntityId>,
}

impl ResourcePool {
    pub fn new(spec: ResourceSpec) -> Self {
        Self {
            spec,
            in_use: 0,
            failed: false,
            queue: VecDeque::new(),
            busy: Vec::new(),
        }
    }

    pub fn in_use(&self) -> u32 {
        self.in_use
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn set_failed(&mut self, failed: bool) {
        self.failed = failed;
    }

    /// Free units available to a new seize. Zero while failed.
    pub fn available(&self) -> u32 {
        if self.failed {
            0
        } else {
            self.spec.capacity - self.in_use
        }
    }

    /// Whether a seize of `quantity` units would succeed right now.
    pub fn can_seize(&self, quantity: u32) -> bool {
        self.available() >= quantity
    }

    /// Takes `quantity` units for `entity`. Caller must have checked
    /// `can_seize`; overcommitting is a kernel bug.
    pub fn seize(&mut self, entity: EntityId, quantity: u32) {
        assert!(
            self.can_seize(quantity),
            "pool '{}' overcommitted: in_use {} + {quantity} > capacity {} (failed: {})",
            self.spec.name,
            self.in_use,
            self.spec.capacity,
            self.failed
        );
        self.in_use += quantity;
        self.busy.push(entity);
    }

    /// Returns `quantity` units from `entity`.
    pub fn release(&mut self, entity: EntityId, quantity: u32) {
        assert!(
            self.in_use >= quantity,
            "pool '{}' released below zero: in_use {} - {quantity}",
            self.spec.name,
            self.in_use
        );
        self.in_use -= quantity;
        if let Some(pos) = self.busy.iter().position(|id| *id == entity) {
            self.busy.swap_remove(pos);
        }
    }

    /// Parks a waiter according to the pool's discipline.
    ///
    /// FIFO appends at the tail; LIFO pushes at the head; Priority keeps
    /// the queue sorted by descending priority, FIFO among equals.
    pub fn enqueue(&mut self, waiter: Waiter) {
        match self.spec.discipline {
            QueueDiscipline::Fifo => self.queue.push_back(waiter),
            QueueDiscipline::Lifo => self.queue.push_front(waiter),
            QueueDiscipline::Priority => {
                let position = self
                    .queue
                    .iter()
                    .position(|w| w.priority < waiter.priority)
                    .unwrap_or(self.queue.len());
                self.queue.insert(position, waiter);
            }
        }
    }

    /// Pops the head waiter.
    pub fn dequeue(&mut self) -> Option<Waiter> {
        self.queue.pop_front()
    }

    /// Restores a waiter to the head after a failed wake-up, preserving
    /// its place in line.
    pub fn requeue_front(&mut self, waiter: Waiter) {
        self.queue.push_front(waiter);
    }

    /// Removes a specific entity from the wait queue, wherever it sits.
    pub fn remove_waiter(&mut self, entity: EntityId) -> Option<Waiter> {
        let pos = self.queue.iter().position(|w| w.entity == entity)?;
        self.queue.remove(pos)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn busy_entities(&self) -> &[EntityId] {
        &self.busy
    }
}
