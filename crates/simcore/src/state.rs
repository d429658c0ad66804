use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use rand::prelude::*;
use rand_pcg::Pcg64;

use crate::component::Id;
use crate::event::{Event, EventData, EventId};

/// Queue entry popping the earliest event first, ties broken by creation order.
struct Pending(Event);

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Pending {}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.time.total_cmp(&self.0.time).then_with(|| other.0.id.cmp(&self.0.id))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Shared mutable part of a simulation: clock, random generator, component names and the event queue.
pub(crate) struct SimulationState {
    clock: f64,
    rand: Pcg64,
    names: Vec<String>,
    events: BinaryHeap<Pending>,
    canceled_events: HashSet<EventId>,
    event_count: u64,
}

impl SimulationState {
    pub fn new(seed: u64) -> Self {
        Self {
            clock: 0.0,
            rand: Pcg64::seed_from_u64(seed),
            names: Vec::new(),
            events: BinaryHeap::new(),
            canceled_events: HashSet::new(),
            event_count: 0,
        }
    }

    pub fn time(&self) -> f64 {
        self.clock
    }

    pub fn rand(&mut self) -> f64 {
        self.rand.gen_range(0.0..1.0)
    }

    /// Certain outcomes (`p <= 0` or `p >= 1`) are decided without drawing.
    pub fn gen_bool(&mut self, p: f64) -> bool {
        if p <= 0. {
            false
        } else if p >= 1. {
            true
        } else {
            self.rand() < p
        }
    }

    pub fn add_name(&mut self, name: &str) -> Id {
        self.names.push(name.to_owned());
        (self.names.len() - 1) as Id
    }

    pub fn name(&self, id: Id) -> &str {
        &self.names[id as usize]
    }

    pub fn add_event<T>(&mut self, data: T, src: Id, dst: Id, delay: f64) -> EventId
    where
        T: EventData,
    {
        assert!(delay >= 0., "event delay must be non-negative, got {}", delay);
        let id = self.event_count;
        self.events.push(Pending(Event {
            id,
            time: self.clock + delay,
            src,
            dst,
            data: Box::new(data),
        }));
        self.event_count += 1;
        id
    }

    fn drop_canceled_head(&mut self) {
        while let Some(head) = self.events.peek() {
            if !self.canceled_events.remove(&head.0.id) {
                return;
            }
            self.events.pop();
        }
    }

    /// Removes the earliest pending event from the queue and advances the clock to its time.
    pub fn next_event(&mut self) -> Option<Event> {
        self.drop_canceled_head();
        let Pending(event) = self.events.pop()?;
        self.clock = event.time;
        Some(event)
    }

    pub fn peek_time(&mut self) -> Option<f64> {
        self.drop_canceled_head();
        self.events.peek().map(|head| head.0.time)
    }

    pub fn cancel_event(&mut self, id: EventId) {
        self.canceled_events.insert(id);
    }

    pub fn advance_to(&mut self, time: f64) {
        if time > self.clock {
            self.clock = time;
        }
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }
}
