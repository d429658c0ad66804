//! Simulation configuration and execution.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::Level::Trace;
use log::{debug, log_enabled, trace};
use serde_json::json;

use crate::component::Id;
use crate::context::SimulationContext;
use crate::handler::EventHandler;
use crate::log::{get_colored, log_undelivered_event};
use crate::state::SimulationState;

/// Represents a simulation, provides methods for its configuration and execution.
pub struct Simulation {
    sim_state: Rc<RefCell<SimulationState>>,
    name_to_id: HashMap<String, Id>,
    handlers: Vec<Option<Rc<RefCell<dyn EventHandler>>>>,
}

impl Simulation {
    /// Creates a new simulation with specified random seed.
    pub fn new(seed: u64) -> Self {
        Self {
            sim_state: Rc::new(RefCell::new(SimulationState::new(seed))),
            name_to_id: HashMap::new(),
            handlers: Vec::new(),
        }
    }

    fn register(&mut self, name: &str) -> Id {
        if let Some(&id) = self.name_to_id.get(name) {
            return id;
        }
        let id = self.sim_state.borrow_mut().add_name(name);
        self.name_to_id.insert(name.to_owned(), id);
        self.handlers.push(None);
        id
    }

    /// Returns the identifier of component by its name.
    ///
    /// Panics if component with such name does not exist.
    pub fn lookup_id(&self, name: &str) -> Id {
        *self
            .name_to_id
            .get(name)
            .unwrap_or_else(|| panic!("unknown component {}", name))
    }

    /// Returns the name of component by its identifier.
    ///
    /// Panics if component with such Id does not exist.
    pub fn lookup_name(&self, id: Id) -> String {
        self.sim_state.borrow().name(id).to_owned()
    }

    /// Creates a new simulation context with specified name.
    ///
    /// Component ids are assigned sequentially starting from 0.
    /// Calling this method again with the same name returns a context with the same id.
    pub fn create_context<S>(&mut self, name: S) -> SimulationContext
    where
        S: AsRef<str>,
    {
        let ctx = SimulationContext::new(self.register(name.as_ref()), name.as_ref(), self.sim_state.clone());
        debug!(
            target: "simulation",
            "[{:.3} {} simulation] Created context: {}",
            self.time(),
            get_colored("DEBUG", colored::Color::Blue),
            json!({"name": ctx.name(), "id": ctx.id()})
        );
        ctx
    }

    /// Registers the event handler implementation for component with specified name, returns the component Id.
    ///
    /// If a context with this name was created before, its id is reused.
    pub fn add_handler<S>(&mut self, name: S, handler: Rc<RefCell<dyn EventHandler>>) -> Id
    where
        S: AsRef<str>,
    {
        let id = self.register(name.as_ref());
        self.handlers[id as usize] = Some(handler);
        debug!(
            target: "simulation",
            "[{:.3} {} simulation] Added handler: {}",
            self.time(),
            get_colored("DEBUG", colored::Color::Blue),
            json!({"name": name.as_ref(), "id": id})
        );
        id
    }

    /// Returns the current simulation time.
    pub fn time(&self) -> f64 {
        self.sim_state.borrow().time()
    }

    /// Performs a single step through the simulation.
    ///
    /// Takes the next event from the queue, advances the simulation time to event time and passes it
    /// to the handler of the destination component. Events for components without a handler are logged
    /// and discarded.
    ///
    /// Returns `true` if some pending event was found and `false` otherwise.
    pub fn step(&mut self) -> bool {
        let next = self.sim_state.borrow_mut().next_event();
        let Some(event) = next else {
            return false;
        };
        if log_enabled!(Trace) {
            let dst_name = self.lookup_name(event.dst);
            trace!(
                target: &dst_name,
                "[{:.3} {} {}] {} from {}: {}",
                event.time,
                get_colored("EVENT", colored::Color::BrightBlack),
                dst_name,
                event.type_name(),
                self.lookup_name(event.src),
                json!(event.data)
            );
        }
        match self.handlers.get(event.dst as usize) {
            Some(Some(handler)) => {
                let handler = handler.clone();
                handler.borrow_mut().on(event);
            }
            _ => log_undelivered_event(event),
        }
        true
    }

    /// Performs up to the specified number of steps.
    ///
    /// Returns `true` if there could be more pending events and `false` otherwise.
    pub fn steps(&mut self, step_count: u64) -> bool {
        for _ in 0..step_count {
            if !self.step() {
                return false;
            }
        }
        true
    }

    /// Steps through the simulation until there are no pending events left.
    pub fn step_until_no_events(&mut self) {
        while self.step() {}
    }

    /// Steps through the simulation until the specified time.
    ///
    /// Events scheduled exactly at `time` are processed. Afterwards the clock is set to `time`
    /// even if the last processed event happened earlier.
    ///
    /// Returns `true` if there are pending events left.
    pub fn step_until_time(&mut self, time: f64) -> bool {
        loop {
            let next_time = self.sim_state.borrow_mut().peek_time();
            match next_time {
                Some(t) if t <= time => {
                    self.step();
                }
                Some(_) => {
                    self.sim_state.borrow_mut().advance_to(time);
                    return true;
                }
                None => {
                    self.sim_state.borrow_mut().advance_to(time);
                    return false;
                }
            }
        }
    }

    /// Steps through the simulation for the specified duration from the current time.
    ///
    /// See [`step_until_time()`](Self::step_until_time()).
    pub fn step_for_duration(&mut self, duration: f64) -> bool {
        let end_time = self.time() + duration;
        self.step_until_time(end_time)
    }

    /// Returns the total number of created events.
    pub fn event_count(&self) -> u64 {
        self.sim_state.borrow().event_count()
    }
}
