//! Engine counters
//!
//! Counters only, monotonic within a process. Relaxed atomics: a snapshot
//! taken while queries run may mix values from different instants.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::evaluator::QueryStatistics;

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    queries_prepared: AtomicU64,
    queries_rejected: AtomicU64,
    queries_evaluated: AtomicU64,
    queries_failed: AtomicU64,
    rows_read: AtomicU64,
    rows_written: AtomicU64,
    ranges_scanned: AtomicU64,
    join_subqueries: AtomicU64,
    /// Mirrors of the compiled query cache counters, refreshed on snapshot
    compiled_cache_hits: AtomicU64,
    compiled_cache_misses: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_queries_prepared(&self) {
        self.queries_prepared.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_queries_rejected(&self) {
        self.queries_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_queries_failed(&self) {
        self.queries_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_ranges_scanned(&self, ranges: u64) {
        self.ranges_scanned.fetch_add(ranges, Ordering::Relaxed);
    }

    /// Counts one successful evaluation and its row traffic
    pub fn record_evaluation(&self, statistics: &QueryStatistics) {
        self.queries_evaluated.fetch_add(1, Ordering::Relaxed);
        self.rows_read.fetch_add(statistics.rows_read, Ordering::Relaxed);
        self.rows_written.fetch_add(statistics.rows_written, Ordering::Relaxed);
        self.join_subqueries.fetch_add(statistics.join_subqueries, Ordering::Relaxed);
    }

    pub fn set_compiled_cache(&self, hits: u64, misses: u64) {
        self.compiled_cache_hits.store(hits, Ordering::Relaxed);
        self.compiled_cache_misses.store(misses, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queries_prepared: self.queries_prepared.load(Ordering::Relaxed),
            queries_rejected: self.queries_rejected.load(Ordering::Relaxed),
            queries_evaluated: self.queries_evaluated.load(Ordering::Relaxed),
            queries_failed: self.queries_failed.load(Ordering::Relaxed),
            rows_read: self.rows_read.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            ranges_scanned: self.ranges_scanned.load(Ordering::Relaxed),
            join_subqueries: self.join_subqueries.load(Ordering::Relaxed),
            compiled_cache_hits: self.compiled_cache_hits.load(Ordering::Relaxed),
            compiled_cache_misses: self.compiled_cache_misses.load(Ordering::Relaxed),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub queries_prepared: u64,
    pub queries_rejected: u64,
    pub queries_evaluated: u64,
    pub queries_failed: u64,
    pub rows_read: u64,
    pub rows_written: u64,
    pub ranges_scanned: u64,
    pub join_subqueries: u64,
    pub compiled_cache_hits: u64,
    pub compiled_cache_misses: u64,
}
