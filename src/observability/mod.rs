//! Observability
//!
//! - Structured logging: one JSON line per event on stderr
//! - Counters for queries, rows and cache traffic
//! - Scopes that log begin/complete/error around an operation
//!
//! Observability never changes query results and never fails a query: a
//! write error on the log stream is dropped.
//!
//! ```ignore
//! use shardql::observability::{log_event_with_fields, Event, ObservationScope};
//!
//! log_event_with_fields(Event::QueryPrepared, &[("table", "//t")]);
//!
//! let scope = ObservationScope::new("EXECUTE");
//! // ... run ...
//! scope.complete();
//! ```

mod events;
mod logger;
mod metrics;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use scope::{ObservationScope, Timer};

pub fn log_event(event: Event) {
    Logger::log(event.severity(), event.as_str(), &[]);
}

pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event() {
        log_event(Event::EngineStarted);
        log_event_with_fields(Event::QueryRejected, &[("code", "QL_SYNTAX_ERROR")]);
    }
}
