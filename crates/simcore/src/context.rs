//! Accessing simulation from components.

use std::cell::RefCell;
use std::rc::Rc;

use crate::component::Id;
use crate::event::{EventData, EventId};
use crate::state::SimulationState;

/// Handle through which a component (cloud, data center, engine) reads the clock, draws random numbers
/// and schedules events.
///
/// Every event emitted through a context carries the context id as its source.
pub struct SimulationContext {
    id: Id,
    name: String,
    sim_state: Rc<RefCell<SimulationState>>,
}

impl SimulationContext {
    pub(crate) fn new(id: Id, name: &str, sim_state: Rc<RefCell<SimulationState>>) -> Self {
        Self {
            id,
            name: name.to_owned(),
            sim_state,
        }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn time(&self) -> f64 {
        self.sim_state.borrow().time()
    }

    /// Uniform float in _[0, 1)_ from the simulation-wide generator.
    pub fn rand(&mut self) -> f64 {
        self.sim_state.borrow_mut().rand()
    }

    /// Returns `true` with probability `p`.
    ///
    /// Probabilities of 0 or less and 1 or more do not consume a random number, so components with
    /// disabled failures leave the random sequence of the others untouched.
    pub fn gen_bool(&mut self, p: f64) -> bool {
        self.sim_state.borrow_mut().gen_bool(p)
    }

    /// Schedules an event for component `dst` after `delay` time units.
    pub fn emit<T>(&mut self, data: T, dst: Id, delay: f64) -> EventId
    where
        T: EventData,
    {
        self.sim_state.borrow_mut().add_event(data, self.id, dst, delay)
    }

    pub fn emit_now<T>(&mut self, data: T, dst: Id) -> EventId
    where
        T: EventData,
    {
        self.emit(data, dst, 0.)
    }

    /// Schedules a timer: an event the component sends to itself.
    pub fn emit_self<T>(&mut self, data: T, delay: f64) -> EventId
    where
        T: EventData,
    {
        self.emit(data, self.id, delay)
    }

    /// Cancels a pending event. Canceling a delivered or unknown event has no effect.
    pub fn cancel_event(&mut self, id: EventId) {
        self.sim_state.borrow_mut().cancel_event(id);
    }

    pub fn lookup_name(&self, id: Id) -> String {
        self.sim_state.borrow().name(id).to_owned()
    }
}
