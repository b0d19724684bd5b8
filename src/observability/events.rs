//! Typed lifecycle events
//!
//! Every event the engine logs is one of these; the string form is the
//! `event` field of the log line.

use std::fmt;

use super::logger::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Engine constructed from a configuration
    EngineStarted,
    ConfigLoaded,
    /// Catalog file read and validated
    CatalogLoaded,
    /// User-defined function module compiled and registered
    UdfRegistered,

    QueryReceived,
    QueryPrepared,
    /// Preparation failed
    QueryRejected,
    /// Key ranges computed for the primary or a foreign table
    QueryPruned,
    FragmentStarted,
    FragmentCompleted,
    /// Foreign-lookup subquery issued by a join stage
    JoinSubqueryIssued,
    QueryEvaluated,
    /// Evaluation failed after preparation succeeded
    QueryFailed,

    ExplainComplete,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::EngineStarted => "ENGINE_STARTED",
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::CatalogLoaded => "CATALOG_LOADED",
            Event::UdfRegistered => "UDF_REGISTERED",
            Event::QueryReceived => "QUERY_RECEIVED",
            Event::QueryPrepared => "QUERY_PREPARED",
            Event::QueryRejected => "QUERY_REJECTED",
            Event::QueryPruned => "QUERY_PRUNED",
            Event::FragmentStarted => "FRAGMENT_STARTED",
            Event::FragmentCompleted => "FRAGMENT_COMPLETED",
            Event::JoinSubqueryIssued => "JOIN_SUBQUERY_ISSUED",
            Event::QueryEvaluated => "QUERY_EVALUATED",
            Event::QueryFailed => "QUERY_FAILED",
            Event::ExplainComplete => "EXPLAIN_COMPLETE",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Event::QueryRejected => Severity::Warn,
            Event::QueryFailed => Severity::Error,
            Event::FragmentStarted | Event::FragmentCompleted | Event::JoinSubqueryIssued => Severity::Trace,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_upper_snake_case() {
        let events = [
            Event::EngineStarted,
            Event::ConfigLoaded,
            Event::CatalogLoaded,
            Event::UdfRegistered,
            Event::QueryReceived,
            Event::QueryPrepared,
            Event::QueryRejected,
            Event::QueryPruned,
            Event::FragmentStarted,
            Event::FragmentCompleted,
            Event::JoinSubqueryIssued,
            Event::QueryEvaluated,
            Event::QueryFailed,
            Event::ExplainComplete,
        ];
        for event in events {
            assert!(event.as_str().chars().all(|c| c.is_ascii_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_event_severity() {
        assert_eq!(Event::QueryFailed.severity(), Severity::Error);
        assert_eq!(Event::QueryRejected.severity(), Severity::Warn);
        assert_eq!(Event::FragmentStarted.severity(), Severity::Trace);
        assert_eq!(format!("{}", Event::QueryPruned), "QUERY_PRUNED");
    }
}
