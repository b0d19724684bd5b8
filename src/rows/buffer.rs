//! Memory-accounted row storage
//!
//! A `MemoryTracker` is shared by every buffer of one query execution and
//! enforces the per-query memory budget. A `RowBuffer` belongs to a single
//! pipeline stage; it is handed to the next stage by move and releases its
//! accounted bytes when dropped or cleared.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::evaluator::{EvaluationError, EvaluationResult};

use super::row::{Row, RowBatch};

/// Per-query allocation budget
#[derive(Debug)]
pub struct MemoryTracker {
    limit: usize,
    used: AtomicUsize,
    high_water: AtomicUsize,
}

impl MemoryTracker {
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            limit,
            used: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
        })
    }

    /// Reserves `bytes`, failing if the budget would be exceeded
    pub fn acquire(&self, bytes: usize) -> EvaluationResult<()> {
        let previous = self.used.fetch_add(bytes, Ordering::Relaxed);
        let now = previous + bytes;
        if now > self.limit {
            self.used.fetch_sub(bytes, Ordering::Relaxed);
            return Err(EvaluationError::memory_limit(self.limit, bytes));
        }
        self.high_water.fetch_max(now, Ordering::Relaxed);
        Ok(())
    }

    pub fn release(&self, bytes: usize) {
        self.used.fetch_sub(bytes, Ordering::Relaxed);
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    pub fn high_water_mark(&self) -> usize {
        self.high_water.load(Ordering::Relaxed)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// Row arena owned by one pipeline stage
#[derive(Debug)]
pub struct RowBuffer {
    tracker: Arc<MemoryTracker>,
    allocated: usize,
}

impl RowBuffer {
    pub fn new(tracker: Arc<MemoryTracker>) -> Self {
        Self {
            tracker,
            allocated: 0,
        }
    }

    /// Takes ownership of a row, accounting its size against the budget
    pub fn capture(&mut self, row: Row) -> EvaluationResult<Row> {
        let size = row.estimated_size();
        self.tracker.acquire(size)?;
        self.allocated += size;
        Ok(row)
    }

    /// Captures every row and seals them into a batch
    pub fn capture_batch(&mut self, rows: Vec<Row>) -> EvaluationResult<RowBatch> {
        let size: usize = rows.iter().map(Row::estimated_size).sum();
        self.tracker.acquire(size)?;
        self.allocated += size;
        Ok(RowBatch::new(rows))
    }

    /// Releases everything accounted so far
    pub fn clear(&mut self) {
        self.tracker.release(self.allocated);
        self.allocated = 0;
    }

    pub fn allocated(&self) -> usize {
        self.allocated
    }

    pub fn tracker(&self) -> &Arc<MemoryTracker> {
        &self.tracker
    }
}

impl Drop for RowBuffer {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::EvaluationErrorCode;
    use crate::value::Value;

    #[test]
    fn test_buffer_accounts_and_releases() {
        let tracker = MemoryTracker::new(1 << 20);
        {
            let mut buffer = RowBuffer::new(tracker.clone());
            buffer.capture(Row::new(vec![Value::from("hello")])).unwrap();
            assert!(tracker.used() > 0);
            assert_eq!(tracker.used(), buffer.allocated());
        }
        assert_eq!(tracker.used(), 0);
        assert!(tracker.high_water_mark() > 0);
    }

    #[test]
    fn test_budget_exceeded() {
        let tracker = MemoryTracker::new(16);
        let mut buffer = RowBuffer::new(tracker.clone());
        let err = buffer
            .capture(Row::new(vec![Value::from("a long string value")]))
            .unwrap_err();
        assert_eq!(err.code(), EvaluationErrorCode::MemoryLimitExceeded);
        assert_eq!(tracker.used(), 0);
    }
}
