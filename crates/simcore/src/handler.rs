//! Event handling.

use crate::event::Event;

/// Trait for consuming events in simulation components.
pub trait EventHandler {
    /// Processes event.
    fn on(&mut self, event: Event);
}

/// Pattern matching over event payload types.
///
/// Each arm names a payload struct and destructures its fields. Arms need not be exhaustive:
/// a payload that matches no arm is logged as unhandled under `ERROR` level.
///
/// ```ignore
/// cast!(match event.data {
///     Ping { seq } => {
///         self.on_ping(seq);
///     }
///     Pong {} => {}
/// })
/// ```
#[macro_export]
macro_rules! cast {
    ( match $event:ident.data { $( $type:ident { $($tt:tt)* } => { $($expr:tt)* } )+ } ) => {
        $(
            if $event.data.is::<$type>() {
                if let Ok(__value) = $event.data.downcast::<$type>() {
                    let $type { $($tt)* } = *__value;
                    $($expr)*
                }
            } else
        )*
        {
            $crate::log::log_unhandled_event($event);
        }
    }
}
