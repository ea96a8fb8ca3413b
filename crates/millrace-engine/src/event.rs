//! Scheduled events and the time-ordered event queue.
//!
//! The queue is a binary min-heap keyed on `(time, insertion sequence)`.
//! The insertion sequence implements the FIFO tie-break: events scheduled
//! at the same simulated time dispatch in the order they were scheduled.
//! That rule is the determinism anchor of the whole engine; identical
//! seeds and models must dispatch simultaneous events identically run to
//! run. The sequence number is queue-internal and is stripped before an
//! event is handed back to the kernel.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use millrace_types::{EntityId, ResourceId, SimTime, SourceId};

// ============================================================================
// Events
// ============================================================================

/// What a scheduled event does when dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// An arrival source fires: create entities, reschedule the source.
    Arrival { source: SourceId },
    /// A delay (or composite service hold) elapses for an entity parked
    /// at `step`.
    EndDelay { entity: EntityId, step: usize },
    /// A resource pool goes down.
    ResourceFailed { resource: ResourceId },
    /// A resource pool comes back up.
    ResourceRepaired { resource: ResourceId },
    /// Host-scheduled marker event. The kernel ignores it.
    Custom(u64),
}

/// A dispatched event: time plus kind. The insertion sequence used for
/// tie-breaking is not observable here.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub time: SimTime,
    pub kind: EventKind,
}

// ============================================================================
// Event Queue
// ============================================================================

/// Heap entry. Orders by earliest time first, then lowest sequence.
#[derive(Debug)]
struct ScheduledEvent {
    time: SimTime,
    seq: u64,
    kind: EventKind,
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the earliest (time, seq)
        // surfaces at the top. Sequence numbers are unique, so two
        // distinct entries never compare Equal.
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScheduledEvent {}

/// Time-ordered queue of pending events with FIFO tie-break.
///
/// `schedule` and `pop` are `O(log n)`; the queue tolerates mixed
/// insert/pop workloads without degrading (see the `event_queue` bench
/// for the million-operation target).
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<ScheduledEvent>,
    next_seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `kind` at `time`, stamping the next insertion sequence.
    ///
    /// `time` must be finite and nonnegative; scheduling into the past of
    /// an already-popped event is the caller's bug and surfaces as a
    /// clock-regression assertion at dispatch.
    pub fn schedule(&mut self, time: SimTime, kind: EventKind) {
        debug_assert!(time.is_finite() && time >= 0.0, "bad event time {time}");
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(ScheduledEvent { time, seq, kind });
    }

    /// Removes and returns the earliest event, FIFO among ties.
    pub fn pop(&mut self) -> Option<Event> {
        self.heap.pop().map(|e| Event {
            time: e.time,
            kind: e.kind,
        })
    }

    /// Time of the earliest pending event, without removing it.
    ///
    /// The kernel uses this for the horizon check: peeking (rather than
    /// popping and re-scheduling) keeps the original insertion sequence
    /// intact, so the FIFO tie-break survives a paused run.
    pub fn peek_time(&self) -> Option<SimTime> {
        self.heap.peek().map(|e| e.time)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(n: u64) -> EventKind {
        EventKind::Custom(n)
    }

    #[test]
    fn pops_in_ascending_time_order() {
        let mut queue = EventQueue::new();
        queue.schedule(3.0, marker(3));
        queue.schedule(1.0, marker(1));
        queue.schedule(2.0, marker(2));

        let times: Vec<f64> = std::iter::from_fn(|| queue.pop()).map(|e| e.time).collect();
        assert_eq!(times, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn equal_times_pop_in_insertion_order() {
        let mut queue = EventQueue::new();
        for n in 0..50 {
            queue.schedule(7.5, marker(n));
        }
        for expected in 0..50 {
            let event = queue.pop().expect("event");
            assert_eq!(event.kind, marker(expected));
        }
    }

    #[test]
    fn fifo_tie_break_survives_interleaved_pops() {
        let mut queue = EventQueue::new();
        queue.schedule(1.0, marker(0));
        queue.schedule(5.0, marker(1));
        queue.schedule(5.0, marker(2));
        assert_eq!(queue.pop().unwrap().kind, marker(0));
        // Insert another tie after popping; it must come out last.
        queue.schedule(5.0, marker(3));
        assert_eq!(queue.pop().unwrap().kind, marker(1));
        assert_eq!(queue.pop().unwrap().kind, marker(2));
        assert_eq!(queue.pop().unwrap().kind, marker(3));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn peek_does_not_disturb_order() {
        let mut queue = EventQueue::new();
        queue.schedule(2.0, marker(1));
        queue.schedule(2.0, marker(2));
        assert_eq!(queue.peek_time(), Some(2.0));
        assert_eq!(queue.pop().unwrap().kind, marker(1));
        assert_eq!(queue.pop().unwrap().kind, marker(2));
    }

    #[test]
    fn mixed_workload_never_regresses() {
        let mut queue = EventQueue::new();
        // Deterministic pseudo-random times without pulling in the engine RNG.
        let mut state = 0x2545F491_4F6CDD1Du64;
        let mut last_popped = 0.0f64;
        for round in 0..10_000u64 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let t = last_popped + (state % 1000) as f64 / 100.0;
            queue.schedule(t, marker(round));
            if round % 3 == 0 {
                let event = queue.pop().expect("queue cannot be empty here");
                assert!(event.time >= last_popped);
                last_popped = event.time;
            }
        }
        while let Some(event) = queue.pop() {
            assert!(event.time >= last_popped);
            last_popped = event.time;
        }
    }
}
