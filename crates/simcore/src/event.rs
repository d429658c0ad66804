//! Simulation events.

use downcast_rs::{impl_downcast, Downcast};
use serde::ser::Serialize;
use serde_json::json;
use serde_type_name::type_name;

use crate::component::Id;

/// Event identifier, unique within a simulation. Also the creation order of events.
pub type EventId = u64;

/// Payload of an event.
///
/// Any `Serialize + 'static` type is a payload. Payloads are recovered with the [`cast!`](crate::cast!) macro.
pub trait EventData: Downcast + erased_serde::Serialize {}

impl_downcast!(EventData);

erased_serde::serialize_trait_object!(EventData);

impl<T: Serialize + 'static> EventData for T {}

/// Event delivered to a simulation component.
pub struct Event {
    pub id: EventId,
    /// Time of event delivery.
    pub time: f64,
    pub src: Id,
    pub dst: Id,
    pub data: Box<dyn EventData>,
}

impl Event {
    /// Name of the payload type.
    pub fn type_name(&self) -> &'static str {
        type_name(&self.data).unwrap_or("unknown")
    }

    /// JSON description of the event with payload fields, as written to the log.
    pub fn describe(&self) -> serde_json::Value {
        json!({"type": self.type_name(), "data": self.data, "src": self.src, "dst": self.dst})
    }
}
