//! Observability subsystem
//!
//! Provides:
//! - Structured logging (JSON on stderr)
//! - Typed lifecycle events
//! - Scope-based begin/complete tracing
//!
//! Observability is read-only and never changes the outcome of an operation.

mod events;
mod logger;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use scope::ObservationScope;

/// Log a lifecycle event
pub fn log_event(event: Event) {
    log_event_with_fields(event, &[]);
}

/// Log a lifecycle event with fields
///
/// Severity follows the event: FATAL for fatal events, WARN for events that
/// need operator attention, INFO otherwise.
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    let severity = if event.is_fatal() {
        Severity::Fatal
    } else if event.is_warning() {
        Severity::Warn
    } else {
        Severity::Info
    };
    Logger::log(severity, event.as_str(), fields);
}
