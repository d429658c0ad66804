//! Minimal discrete-event simulation kernel.
//!
//! Components implement [`EventHandler`] and are registered in a [`Simulation`].
//! Each component owns a [`SimulationContext`] used to read the clock and to emit events
//! to other components (or to itself) with a delay. Events are delivered one at a time
//! in the order of their time, ties are broken by creation order.

pub mod component;
pub mod context;
pub mod event;
pub mod handler;
pub mod log;
pub mod simulation;
mod state;

pub use colored;
pub use component::Id;
pub use context::SimulationContext;
pub use event::{Event, EventData, EventId};
pub use handler::EventHandler;
pub use simulation::Simulation;
