//! Execution statistics

use std::time::Duration;

use serde::Serialize;

/// Counters reported alongside a result set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryStatistics {
    pub rows_read: u64,
    pub rows_written: u64,
    pub batches_read: u64,
    /// Peak bytes of row storage held at once
    pub memory_high_water_mark: usize,
    /// Time spent evaluating closures
    pub sync_time_us: u64,
    /// Time spent awaiting readers, writers and join subqueries
    pub async_wait_time_us: u64,
    pub join_subqueries: u64,
    /// Set when LIMIT stopped reading before the input was exhausted
    pub incomplete_output: bool,
}

impl QueryStatistics {
    pub fn add_sync_time(&mut self, elapsed: Duration) {
        self.sync_time_us += elapsed.as_micros() as u64;
    }

    pub fn add_async_wait(&mut self, elapsed: Duration) {
        self.async_wait_time_us += elapsed.as_micros() as u64;
    }

    /// Folds the counters of a sub-execution into these
    pub fn merge(&mut self, other: &QueryStatistics) {
        self.rows_read += other.rows_read;
        self.rows_written += other.rows_written;
        self.batches_read += other.batches_read;
        self.memory_high_water_mark = self.memory_high_water_mark.max(other.memory_high_water_mark);
        self.sync_time_us += other.sync_time_us;
        self.async_wait_time_us += other.async_wait_time_us;
        self.join_subqueries += other.join_subqueries;
        self.incomplete_output |= other.incomplete_output;
    }
}
