//! Row source capability
//!
//! A reader hands out batches without blocking. `read` returns:
//! - `Ok(Some(batch))` with rows when data is available
//! - `Ok(Some(empty))` when nothing is ready yet; await `ready_event`
//! - `Ok(None)` at end of stream

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt};
use tokio::sync::mpsc;

use crate::evaluator::EvaluationResult;

use super::row::{Row, RowBatch};

/// Asynchronous row-batch source
pub trait RowReader: Send {
    /// Returns up to `max_rows` rows
    fn read(&mut self, max_rows: usize) -> EvaluationResult<Option<RowBatch>>;

    /// Resolves once `read` may return rows or end of stream
    fn ready_event(&mut self) -> BoxFuture<'_, EvaluationResult<()>>;
}

/// Reader over rows held in memory
pub struct MemoryReader {
    rows: Arc<Vec<Row>>,
    position: usize,
    end: usize,
}

impl MemoryReader {
    pub fn new(rows: Vec<Row>) -> Self {
        let end = rows.len();
        Self {
            rows: Arc::new(rows),
            position: 0,
            end,
        }
    }

    /// Reader over `rows[start..end]` of a shared row set
    pub fn slice(rows: Arc<Vec<Row>>, start: usize, end: usize) -> Self {
        let end = end.min(rows.len());
        Self {
            rows,
            position: start.min(end),
            end,
        }
    }
}

impl RowReader for MemoryReader {
    fn read(&mut self, max_rows: usize) -> EvaluationResult<Option<RowBatch>> {
        if self.position >= self.end {
            return Ok(None);
        }
        let next = (self.position + max_rows.max(1)).min(self.end);
        let rows = self.rows[self.position..next].to_vec();
        self.position = next;
        Ok(Some(RowBatch::new(rows)))
    }

    fn ready_event(&mut self) -> BoxFuture<'_, EvaluationResult<()>> {
        future::ready(Ok(())).boxed()
    }
}

/// Item carried by fragment channels
pub type BatchMessage = EvaluationResult<RowBatch>;

/// Reader draining one or more channels
///
/// Channels are consumed strictly in order: the next channel is polled only
/// after the previous one is closed. A single channel shared by several
/// producers yields batches in arrival order.
pub struct ChannelReader {
    receivers: VecDeque<mpsc::Receiver<BatchMessage>>,
    pending: VecDeque<Row>,
}

impl ChannelReader {
    pub fn new(receiver: mpsc::Receiver<BatchMessage>) -> Self {
        Self::ordered(vec![receiver])
    }

    pub fn ordered(receivers: Vec<mpsc::Receiver<BatchMessage>>) -> Self {
        Self {
            receivers: receivers.into(),
            pending: VecDeque::new(),
        }
    }

    fn take_pending(&mut self, max_rows: usize) -> RowBatch {
        let count = max_rows.max(1).min(self.pending.len());
        RowBatch::new(self.pending.drain(..count).collect())
    }
}

impl RowReader for ChannelReader {
    fn read(&mut self, max_rows: usize) -> EvaluationResult<Option<RowBatch>> {
        loop {
            if !self.pending.is_empty() {
                return Ok(Some(self.take_pending(max_rows)));
            }
            let Some(receiver) = self.receivers.front_mut() else {
                return Ok(None);
            };
            match receiver.try_recv() {
                Ok(message) => self.pending.extend(message?.into_rows()),
                Err(mpsc::error::TryRecvError::Empty) => return Ok(Some(RowBatch::empty())),
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.receivers.pop_front();
                }
            }
        }
    }

    fn ready_event(&mut self) -> BoxFuture<'_, EvaluationResult<()>> {
        async move {
            while self.pending.is_empty() {
                let Some(receiver) = self.receivers.front_mut() else {
                    break;
                };
                let message = receiver.recv().await;
                match message {
                    Some(message) => self.pending.extend(message?.into_rows()),
                    None => {
                        self.receivers.pop_front();
                    }
                }
            }
            Ok(())
        }
        .boxed()
    }
}

/// Drains a reader into a vector, awaiting readiness as needed
pub async fn read_all(reader: &mut dyn RowReader, rows_per_read: usize) -> EvaluationResult<Vec<Row>> {
    let mut rows = Vec::new();
    loop {
        match reader.read(rows_per_read)? {
            None => return Ok(rows),
            Some(batch) if batch.is_empty() => reader.ready_event().await?,
            Some(batch) => rows.extend(batch.into_rows()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::{EvaluationError, EvaluationErrorCode};
    use crate::value::Value;

    fn rows(values: &[i64]) -> Vec<Row> {
        values.iter().map(|v| Row::new(vec![Value::Int64(*v)])).collect()
    }

    #[test]
    fn test_memory_reader_batches() {
        let mut reader = MemoryReader::new(rows(&[1, 2, 3, 4, 5]));
        assert_eq!(reader.read(2).unwrap().unwrap().len(), 2);
        assert_eq!(reader.read(2).unwrap().unwrap().len(), 2);
        assert_eq!(reader.read(2).unwrap().unwrap().len(), 1);
        assert!(reader.read(2).unwrap().is_none());
    }

    #[test]
    fn test_memory_reader_slice() {
        let shared = Arc::new(rows(&[1, 2, 3, 4, 5]));
        let mut reader = MemoryReader::slice(shared, 1, 3);
        let batch = reader.read(10).unwrap().unwrap();
        assert_eq!(batch.rows()[0][0], Value::Int64(2));
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn test_channel_reader_ordered() {
        let (tx1, rx1) = mpsc::channel(4);
        let (tx2, rx2) = mpsc::channel(4);
        tx2.send(Ok(RowBatch::new(rows(&[3])))).await.unwrap();
        tx1.send(Ok(RowBatch::new(rows(&[1, 2])))).await.unwrap();
        drop(tx1);
        drop(tx2);

        let mut reader = ChannelReader::ordered(vec![rx1, rx2]);
        let all = read_all(&mut reader, 16).await.unwrap();
        let values: Vec<_> = all.iter().map(|r| r[0].clone()).collect();
        assert_eq!(values, vec![Value::Int64(1), Value::Int64(2), Value::Int64(3)]);
    }

    #[tokio::test]
    async fn test_channel_reader_waits_for_producer() {
        let (tx, rx) = mpsc::channel(1);
        let mut reader = ChannelReader::new(rx);
        assert!(reader.read(8).unwrap().unwrap().is_empty());

        tokio::spawn(async move {
            tx.send(Ok(RowBatch::new(rows(&[7])))).await.unwrap();
        });
        let all = read_all(&mut reader, 8).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_channel_reader_propagates_error() {
        let (tx, rx) = mpsc::channel(1);
        tx.send(Err(EvaluationError::evaluation_failed("reader broke")))
            .await
            .unwrap();
        drop(tx);
        let mut reader = ChannelReader::new(rx);
        let err = read_all(&mut reader, 8).await.unwrap_err();
        assert_eq!(err.code(), EvaluationErrorCode::EvaluationFailed);
    }
}
