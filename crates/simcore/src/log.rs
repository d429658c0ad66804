//! Logging facilities.
//!
//! The macros prefix every message with the simulation time, a colored level tag and the component name,
//! and use the component name as the log target, so output can be filtered per component with `RUST_LOG`.

use atty::Stream;
use colored::{Color, ColoredString, Colorize};
use log::error;

use crate::event::Event;

/// Applies the color to the string if stderr (log) goes to console.
pub fn get_colored(s: &str, color: Color) -> ColoredString {
    if atty::is(Stream::Stderr) {
        s.color(color)
    } else {
        s.normal()
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! __log_with_ctx {
    ($level:ident, $tag:expr, $color:ident, $ctx:expr, $msg:expr) => (
        log::$level!(
            target: $ctx.name(),
            "[{:.3} {} {}] {}",
            $ctx.time(), $crate::log::get_colored($tag, $crate::colored::Color::$color), $ctx.name(), $msg
        )
    );
    ($level:ident, $tag:expr, $color:ident, $ctx:expr, $format:expr, $($arg:tt)+) => (
        log::$level!(
            target: $ctx.name(),
            concat!("[{:.3} {} {}] ", $format),
            $ctx.time(), $crate::log::get_colored($tag, $crate::colored::Color::$color), $ctx.name(), $($arg)+
        )
    );
}

/// Logs a message at the info level.
///
/// ```ignore
/// log_info!(self.ctx, "created vm {} in {}", vm_id, dc_name);
/// ```
#[macro_export]
macro_rules! log_info {
    ($ctx:expr, $($arg:tt)+) => ($crate::__log_with_ctx!(info, "INFO ", Green, $ctx, $($arg)+));
}

/// Logs a message at the debug level.
#[macro_export]
macro_rules! log_debug {
    ($ctx:expr, $($arg:tt)+) => ($crate::__log_with_ctx!(debug, "DEBUG", Blue, $ctx, $($arg)+));
}

/// Logs a message at the trace level.
#[macro_export]
macro_rules! log_trace {
    ($ctx:expr, $($arg:tt)+) => ($crate::__log_with_ctx!(trace, "TRACE", Cyan, $ctx, $($arg)+));
}

/// Logs a message at the warn level.
#[macro_export]
macro_rules! log_warn {
    ($ctx:expr, $($arg:tt)+) => ($crate::__log_with_ctx!(warn, "WARN ", Yellow, $ctx, $($arg)+));
}

/// Logs a message at the error level.
#[macro_export]
macro_rules! log_error {
    ($ctx:expr, $($arg:tt)+) => ($crate::__log_with_ctx!(error, "ERROR", Red, $ctx, $($arg)+));
}

/// Logs an event which did not match any arm of [`cast!`](crate::cast!).
pub fn log_unhandled_event(event: Event) {
    error!(
        target: "simulation",
        "[{:.3} {} simulation] Unhandled event: {}",
        event.time,
        get_colored("ERROR", Color::Red),
        event.describe()
    );
}

/// Logs an event destined to a component without registered handler.
pub(crate) fn log_undelivered_event(event: Event) {
    error!(
        target: "simulation",
        "[{:.3} {} simulation] Undelivered event: {}",
        event.time,
        get_colored("ERROR", Color::Red),
        event.describe()
    );
}
