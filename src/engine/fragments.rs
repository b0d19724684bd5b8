//! Fragment scans
//!
//! One fragment per pruned key range. Fragments run as tokio tasks and
//! send row batches over bounded channels; a semaphore caps how many run
//! at once. Permits are taken in range order, so an ordered consumer that
//! drains the first channel always has a running producer behind it.
//!
//! Dropping the `FragmentScan` aborts every fragment still running.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use super::catalog::MemoryTable;
use crate::observability::{log_event_with_fields, Event};
use crate::rows::{BatchMessage, ChannelReader, MemoryReader, RowReader};
use crate::schema::KeyRange;

#[derive(Debug, Clone, Copy)]
pub struct FragmentSettings {
    pub worker_pool_size: usize,
    pub channel_capacity: usize,
    pub rows_per_read: usize,
    /// Consumer sees fragments in range order instead of arrival order
    pub ordered: bool,
}

pub struct FragmentScan {
    driver: JoinHandle<()>,
}

impl FragmentScan {
    /// Starts scanning `ranges` of `table`. Must be called inside a tokio runtime.
    pub fn start(
        table: Arc<MemoryTable>,
        ranges: Vec<KeyRange>,
        settings: FragmentSettings,
    ) -> (ChannelReader, FragmentScan) {
        let capacity = settings.channel_capacity.max(1);
        let mut senders = Vec::with_capacity(ranges.len());
        let reader = if settings.ordered {
            let mut receivers = Vec::with_capacity(ranges.len());
            for _ in &ranges {
                let (sender, receiver) = mpsc::channel(capacity);
                senders.push(sender);
                receivers.push(receiver);
            }
            ChannelReader::ordered(receivers)
        } else {
            let (sender, receiver) = mpsc::channel(capacity);
            senders.extend(ranges.iter().map(|_| sender.clone()));
            ChannelReader::new(receiver)
        };

        let semaphore = Arc::new(Semaphore::new(settings.worker_pool_size.max(1)));
        let driver = tokio::spawn(async move {
            let mut tasks = JoinSet::new();
            for (index, (range, sender)) in ranges.into_iter().zip(senders).enumerate() {
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    return;
                };
                let table = table.clone();
                tasks.spawn(async move {
                    scan(index, &table, &range, settings.rows_per_read, sender).await;
                    drop(permit);
                });
            }
            while tasks.join_next().await.is_some() {}
        });
        (reader, FragmentScan { driver })
    }
}

impl Drop for FragmentScan {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

async fn scan(
    index: usize,
    table: &MemoryTable,
    range: &KeyRange,
    rows_per_read: usize,
    sender: mpsc::Sender<BatchMessage>,
) {
    let fragment = index.to_string();
    let bounds = range.to_string();
    log_event_with_fields(
        Event::FragmentStarted,
        &[("fragment", fragment.as_str()), ("range", bounds.as_str()), ("table", table.path())],
    );
    let (start, end) = table.slice(range);
    let mut reader = MemoryReader::slice(table.rows().clone(), start, end);
    let mut sent = 0usize;
    loop {
        let message = match reader.read(rows_per_read.max(1)) {
            Ok(Some(batch)) => Ok(batch),
            Ok(None) => break,
            Err(err) => Err(err),
        };
        let failed = message.is_err();
        if let Ok(batch) = &message {
            sent += batch.len();
        }
        // A closed channel means the consumer is done with this query
        if sender.send(message).await.is_err() || failed {
            return;
        }
    }
    let sent = sent.to_string();
    log_event_with_fields(
        Event::FragmentCompleted,
        &[("fragment", fragment.as_str()), ("rows", sent.as_str()), ("table", table.path())],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Catalog;
    use crate::functions::FunctionRegistry;
    use crate::rows::{read_all, Row};
    use crate::schema::{ColumnSchema, Key, KeyPart, TableSchema};
    use crate::value::{Value, ValueType};

    fn table(count: i64) -> Arc<MemoryTable> {
        let mut catalog = Catalog::new(Arc::new(FunctionRegistry::builtin()), 50);
        let schema = TableSchema::new(vec![ColumnSchema::new("k", ValueType::Int64).sorted()]).unwrap();
        let rows = (0..count).rev().map(|k| Row::new(vec![Value::Int64(k)])).collect();
        catalog.add_table("//t", schema, rows, Vec::new()).unwrap()
    }

    fn point(k: i64) -> KeyRange {
        let key = Key::from_values(vec![Value::Int64(k)]);
        KeyRange::new(key.clone(), key.with(KeyPart::Max))
    }

    fn settings(ordered: bool) -> FragmentSettings {
        FragmentSettings {
            worker_pool_size: 1,
            channel_capacity: 1,
            rows_per_read: 2,
            ordered,
        }
    }

    #[tokio::test]
    async fn test_ordered_scan_keeps_range_order() {
        let table = table(100);
        let ranges = vec![
            KeyRange::new(Key::min(), Key::from_values(vec![Value::Int64(10)])),
            point(50),
            point(70),
        ];
        let (mut reader, _scan) = FragmentScan::start(table, ranges, settings(true));
        let rows = read_all(&mut reader, 3).await.unwrap();
        let keys: Vec<_> = rows.iter().map(|r| r[0].clone()).collect();
        let mut expected: Vec<_> = (0..10).map(Value::Int64).collect();
        expected.extend([Value::Int64(50), Value::Int64(70)]);
        assert_eq!(keys, expected);
    }

    #[tokio::test]
    async fn test_unordered_scan_reads_everything() {
        let table = table(20);
        let ranges = (0..20).map(point).collect();
        let (mut reader, _scan) = FragmentScan::start(table, ranges, FragmentSettings {
            worker_pool_size: 4,
            ..settings(false)
        });
        let mut keys: Vec<_> = read_all(&mut reader, 5).await.unwrap().into_iter().map(|r| r[0].clone()).collect();
        keys.sort();
        assert_eq!(keys, (0..20).map(Value::Int64).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_dropping_reader_stops_fragments() {
        let table = table(1000);
        let (mut reader, scan) = FragmentScan::start(table, vec![KeyRange::universal()], settings(true));
        reader.ready_event().await.unwrap();
        assert!(!reader.read(1).unwrap().unwrap().is_empty());
        drop(reader);
        drop(scan);
    }
}
