//! Query evaluation pipeline
//!
//! Stages, per input batch: prefilter, joins, postfilter, then either
//! grouping, buffering for ORDER BY, or streaming straight to the writer.
//! Grouped and ordered queries finish after the input is exhausted;
//! streaming queries stop reading once LIMIT is satisfied.

use std::sync::Arc;
use std::time::Instant;

use super::cache::CompiledQueryCache;
use super::compiler::eval_all;
use super::errors::{EvaluationError, EvaluationResult};
use super::filters::RowFilter;
use super::fingerprint::canonical_join_order;
use super::grouping::GroupAccumulator;
use super::join::{JoinInput, JoinStage, JoinSubquery};
use super::program::CompiledQuery;
use super::sorter::RowSorter;
use super::statistics::QueryStatistics;
use crate::config::QueryOptions;
use crate::functions::FunctionRegistry;
use crate::planner::Query;
use crate::rows::{write_all, BatchSizer, MemoryTracker, Row, RowBuffer, RowReader, RowWriter};

/// Offset and limit applied while rows stream past
#[derive(Debug, Clone, Copy)]
struct Window {
    skip: u64,
    remaining: Option<u64>,
    /// Rows were cut by the limit
    truncated: bool,
}

impl Window {
    fn new(offset: u64, limit: Option<u64>) -> Self {
        Self {
            skip: offset,
            remaining: limit,
            truncated: false,
        }
    }

    /// Cuts a batch down to the rows inside the window
    fn take(&mut self, mut rows: Vec<Row>) -> Vec<Row> {
        let skipped = (self.skip as usize).min(rows.len());
        rows.drain(..skipped);
        self.skip -= skipped as u64;
        if let Some(remaining) = &mut self.remaining {
            if rows.len() as u64 > *remaining {
                rows.truncate(*remaining as usize);
                self.truncated = true;
            }
            *remaining -= rows.len() as u64;
        }
        rows
    }

    fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }
}

/// Where filtered and joined rows go
enum Sink<'a> {
    Group(GroupAccumulator<'a>),
    Collect(Vec<Row>),
    Stream(Window),
}

/// Evaluates compiled queries over row readers
pub struct Evaluator {
    registry: Arc<FunctionRegistry>,
    cache: Arc<CompiledQueryCache>,
    options: QueryOptions,
}

impl Evaluator {
    pub fn new(registry: Arc<FunctionRegistry>, cache: Arc<CompiledQueryCache>, options: QueryOptions) -> Self {
        Self {
            registry,
            cache,
            options,
        }
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    /// Runs `query` reading scan rows from `reader` and writing result rows
    /// to `writer`.
    ///
    /// `joins` holds one entry per join clause, indexed like `query.joins`.
    pub async fn run(
        &self,
        query: &Query,
        reader: &mut dyn RowReader,
        writer: &mut dyn RowWriter,
        joins: &[JoinInput],
    ) -> EvaluationResult<QueryStatistics> {
        if joins.len() != query.joins.len() {
            return Err(EvaluationError::evaluation_failed(format!(
                "Expected {} join inputs, got {}",
                query.joins.len(),
                joins.len()
            )));
        }
        let (program, _) = self.cache.get_or_compile(query, &self.registry)?;
        let tracker = MemoryTracker::new(self.options.memory_limit);
        let mut run = Run {
            program: &program,
            options: &self.options,
            stages: join_stages(query, &program, joins, self.options.rows_per_read),
            tracker: tracker.clone(),
            stats: QueryStatistics::default(),
        };
        run.execute(query, reader, writer).await?;
        run.stats.memory_high_water_mark = tracker.high_water_mark();
        Ok(run.stats)
    }
}

fn join_stages<'a>(
    query: &Query,
    program: &'a CompiledQuery,
    joins: &[JoinInput],
    rows_per_read: usize,
) -> Vec<JoinStage<'a>> {
    canonical_join_order(query)
        .into_iter()
        .zip(&program.joins)
        .map(|(index, join)| {
            let input = joins[index].clone();
            JoinStage {
                join,
                subquery: JoinSubquery::from_clause(index, &query.joins[index], input.strategy),
                input,
                rows_per_read,
            }
        })
        .collect()
}

/// Whether the reader still holds rows, waiting out empty batches
async fn has_more_rows(reader: &mut dyn RowReader) -> EvaluationResult<bool> {
    loop {
        match reader.read(1)? {
            None => return Ok(false),
            Some(batch) if batch.is_empty() => reader.ready_event().await?,
            Some(_) => return Ok(true),
        }
    }
}

/// State of one execution
struct Run<'a> {
    program: &'a CompiledQuery,
    options: &'a QueryOptions,
    stages: Vec<JoinStage<'a>>,
    tracker: Arc<MemoryTracker>,
    stats: QueryStatistics,
}

impl<'a> Run<'a> {
    async fn execute(
        &mut self,
        query: &Query,
        reader: &mut dyn RowReader,
        writer: &mut dyn RowWriter,
    ) -> EvaluationResult<()> {
        let program = self.program;
        let mut sink = match &program.group {
            Some(group) => {
                // Distinct keys may be cut early only when nothing reorders
                // or drops groups afterwards
                let group_limit = match (&query.limit, program.having.is_none() && program.order.is_empty()) {
                    (Some(limit), true) => {
                        let total = query.offset.saturating_add(*limit);
                        Some(usize::try_from(total).unwrap_or(usize::MAX))
                    }
                    _ => None,
                };
                Sink::Group(GroupAccumulator::new(group, group_limit)?)
            }
            None if !program.order.is_empty() => Sink::Collect(Vec::new()),
            None => Sink::Stream(Window::new(query.offset, query.limit)),
        };
        let mut retained = RowBuffer::new(self.tracker.clone());
        let mut sizer = BatchSizer::new(self.options.rows_per_read);

        loop {
            let batch = match reader.read(sizer.next_size())? {
                None => break,
                Some(batch) if batch.is_empty() => {
                    let waited = Instant::now();
                    reader.ready_event().await?;
                    self.stats.add_async_wait(waited.elapsed());
                    continue;
                }
                Some(batch) => batch,
            };
            self.stats.rows_read += batch.len() as u64;
            self.stats.batches_read += 1;
            if self.stats.rows_read > self.options.input_row_limit {
                return Err(EvaluationError::input_row_limit(self.options.input_row_limit));
            }

            let mut scratch = RowBuffer::new(self.tracker.clone());
            let rows = scratch.capture_batch(batch.into_rows())?.into_rows();
            let rows = self.filter_and_join(rows).await?;

            let started = Instant::now();
            match &mut sink {
                Sink::Group(accumulator) => {
                    for row in &rows {
                        accumulator.add(row)?;
                    }
                }
                Sink::Collect(collected) => {
                    let rows = retained.capture_batch(rows)?.into_rows();
                    collected.extend(rows);
                }
                Sink::Stream(window) => {
                    let rows = window.take(rows);
                    let projected = self.project(&rows)?;
                    self.stats.add_sync_time(started.elapsed());
                    self.emit(writer, &projected).await?;
                    if window.is_exhausted() {
                        self.stats.incomplete_output = window.truncated || has_more_rows(reader).await?;
                        break;
                    }
                    continue;
                }
            }
            self.stats.add_sync_time(started.elapsed());
        }

        match sink {
            Sink::Group(accumulator) => {
                let started = Instant::now();
                let (rows, totals) = accumulator.finish(program.having.as_ref())?;
                let rows = retained.capture_batch(rows)?.into_rows();
                let rows = RowSorter::sort(rows, &program.order)?;
                let mut window = Window::new(query.offset, query.limit);
                let mut rows = window.take(rows);
                self.stats.incomplete_output = window.truncated;
                rows.extend(totals);
                let projected = self.project(&rows)?;
                self.stats.add_sync_time(started.elapsed());
                self.emit(writer, &projected).await?;
            }
            Sink::Collect(collected) => {
                let started = Instant::now();
                let rows = RowSorter::sort(collected, &program.order)?;
                let mut window = Window::new(query.offset, query.limit);
                let rows = window.take(rows);
                self.stats.incomplete_output = window.truncated;
                let projected = self.project(&rows)?;
                self.stats.add_sync_time(started.elapsed());
                self.emit(writer, &projected).await?;
            }
            Sink::Stream(_) => {}
        }

        let waited = Instant::now();
        writer.close().await?;
        self.stats.add_async_wait(waited.elapsed());
        Ok(())
    }

    async fn filter_and_join(&mut self, rows: Vec<Row>) -> EvaluationResult<Vec<Row>> {
        let program = self.program;
        let started = Instant::now();
        let mut rows = RowFilter::new(program.prefilter.as_ref()).apply(rows)?;
        self.stats.add_sync_time(started.elapsed());

        if !self.stages.is_empty() && !rows.is_empty() {
            let mut joined = Vec::with_capacity(rows.len());
            let batch_size = self.options.join_batch_size.max(1);
            while !rows.is_empty() {
                let rest = rows.split_off(batch_size.min(rows.len()));
                let mut chunk = std::mem::replace(&mut rows, rest);
                for stage in &self.stages {
                    let mut buffer = RowBuffer::new(self.tracker.clone());
                    chunk = stage.run(chunk, &mut buffer, &mut self.stats).await?;
                }
                joined.extend(chunk);
            }
            rows = joined;
        }

        let started = Instant::now();
        let rows = RowFilter::new(program.postfilter.as_ref()).apply(rows)?;
        self.stats.add_sync_time(started.elapsed());
        Ok(rows)
    }

    fn project(&self, rows: &[Row]) -> EvaluationResult<Vec<Row>> {
        rows.iter()
            .map(|row| Ok(Row::new(eval_all(&self.program.projection, row.values())?)))
            .collect()
    }

    async fn emit(&mut self, writer: &mut dyn RowWriter, rows: &[Row]) -> EvaluationResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.stats.rows_written += rows.len() as u64;
        if self.stats.rows_written > self.options.output_row_limit {
            return Err(EvaluationError::output_row_limit(self.options.output_row_limit));
        }
        let waited = Instant::now();
        write_all(writer, rows).await?;
        self.stats.add_async_wait(waited.elapsed());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::EvaluationErrorCode;
    use crate::parser::Placeholders;
    use crate::planner::{prepare, PrepareResult, SplitProvider};
    use crate::rows::{ChannelReader, MemoryReader, MemoryWriter, RowBatch};
    use crate::schema::{ColumnSchema, DataSplit, TableSchema};
    use crate::value::{Value, ValueType};
    use futures_util::future::{self, BoxFuture, FutureExt};
    use uuid::Uuid;

    struct Single;

    impl SplitProvider for Single {
        fn get_initial_split<'a>(&'a self, _path: &'a str) -> BoxFuture<'a, PrepareResult<DataSplit>> {
            let schema = TableSchema::new(vec![
                ColumnSchema::new("a", ValueType::Int64).sorted(),
                ColumnSchema::new("b", ValueType::Int64),
                ColumnSchema::new("s", ValueType::String),
            ])
            .map(|schema| DataSplit::new(Uuid::new_v4(), Arc::new(schema)));
            future::ready(Ok(schema.unwrap())).boxed()
        }
    }

    fn input() -> Vec<Row> {
        (0..10)
            .map(|i| {
                Row::new(vec![
                    Value::Int64(i),
                    Value::Int64(i % 3),
                    Value::from(format!("row{}", i)),
                ])
            })
            .collect()
    }

    async fn run_with(source: &str, options: QueryOptions) -> EvaluationResult<(Vec<Row>, QueryStatistics)> {
        let evaluator = Evaluator::new(
            Arc::new(FunctionRegistry::builtin()),
            Arc::new(CompiledQueryCache::new(8)),
            options.clone(),
        );
        let query = prepare(source, &Single, &Placeholders::empty(), evaluator.registry(), &options)
            .await
            .unwrap();
        let mut reader = MemoryReader::new(input());
        let mut writer = MemoryWriter::new();
        let stats = evaluator.run(&query, &mut reader, &mut writer, &[]).await?;
        assert!(writer.is_closed());
        Ok((writer.into_rows(), stats))
    }

    async fn run(source: &str) -> (Vec<Row>, QueryStatistics) {
        run_with(source, QueryOptions::default()).await.unwrap()
    }

    fn ints(rows: &[Row], column: usize) -> Vec<i64> {
        rows.iter().filter_map(|r| r[column].as_i64()).collect()
    }

    #[tokio::test]
    async fn test_filter_and_project() {
        let (rows, stats) = run("a * 10 as x from [//t] where b = 1").await;
        assert_eq!(ints(&rows, 0), vec![10, 40, 70]);
        assert_eq!(stats.rows_read, 10);
        assert_eq!(stats.rows_written, 3);
        assert!(!stats.incomplete_output);
    }

    #[tokio::test]
    async fn test_streaming_limit_stops_early() {
        let (rows, stats) = run("a from [//t] where a >= 2 offset 1 limit 2").await;
        assert_eq!(ints(&rows, 0), vec![3, 4]);
        assert!(stats.incomplete_output);
    }

    #[tokio::test]
    async fn test_order_by_desc() {
        let (rows, _) = run("a from [//t] order by a desc limit 3").await;
        assert_eq!(ints(&rows, 0), vec![9, 8, 7]);
    }

    #[tokio::test]
    async fn test_group_having_order() {
        let (rows, _) =
            run("b, sum(a) as total from [//t] group by b having total > 12 order by total desc limit 10").await;
        assert_eq!(ints(&rows, 0), vec![0, 2]);
        assert_eq!(ints(&rows, 1), vec![18, 15]);
    }

    #[tokio::test]
    async fn test_group_with_totals() {
        let (rows, _) = run("b, sum(a) as total from [//t] group by b with totals").await;
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[3][0], Value::Null);
        assert_eq!(rows[3][1], Value::Int64(45));
    }

    #[tokio::test]
    async fn test_grouped_limit_totals_cover_all_rows() {
        let (rows, stats) = run("b, sum(a) as total from [//t] group by b with totals limit 1").await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].values(), &[Value::Int64(0), Value::Int64(18)]);
        assert_eq!(rows[1][1], Value::Int64(45));
        assert!(!stats.incomplete_output);
    }

    #[tokio::test]
    async fn test_grouped_limit_near_u64_max() {
        let (rows, stats) = run("b from [//t] group by b offset 1 limit 18446744073709551615u").await;
        assert_eq!(rows.len(), 2);
        assert!(!stats.incomplete_output);
    }

    #[tokio::test]
    async fn test_exact_limit_over_open_channel_is_complete() {
        let options = QueryOptions::default();
        let evaluator = Evaluator::new(
            Arc::new(FunctionRegistry::builtin()),
            Arc::new(CompiledQueryCache::new(8)),
            options.clone(),
        );
        let query = prepare("a from [//t] limit 4", &Single, &Placeholders::empty(), evaluator.registry(), &options)
            .await
            .unwrap();

        let (sender, receiver) = tokio::sync::mpsc::channel(4);
        sender.send(Ok(RowBatch::new(input()[..4].to_vec()))).await.unwrap();
        // The channel stays open until the evaluator waits on it
        let producer = tokio::spawn(async move {
            tokio::task::yield_now().await;
            drop(sender);
        });

        let mut reader = ChannelReader::new(receiver);
        let mut writer = MemoryWriter::new();
        let stats = evaluator.run(&query, &mut reader, &mut writer, &[]).await.unwrap();
        producer.await.unwrap();

        assert_eq!(ints(&writer.into_rows(), 0), vec![0, 1, 2, 3]);
        assert!(!stats.incomplete_output);
    }

    #[tokio::test]
    async fn test_input_row_limit() {
        let options = QueryOptions {
            input_row_limit: 5,
            ..Default::default()
        };
        let err = run_with("a from [//t]", options).await.unwrap_err();
        assert_eq!(err.code(), EvaluationErrorCode::RowLimitExceeded);
    }

    #[tokio::test]
    async fn test_output_row_limit() {
        let options = QueryOptions {
            output_row_limit: 3,
            ..Default::default()
        };
        let err = run_with("a from [//t]", options).await.unwrap_err();
        assert_eq!(err.code(), EvaluationErrorCode::RowLimitExceeded);
    }

    #[tokio::test]
    async fn test_memory_limit() {
        let options = QueryOptions {
            memory_limit: 64,
            ..Default::default()
        };
        let err = run_with("a from [//t] order by a limit 10", options).await.unwrap_err();
        assert_eq!(err.code(), EvaluationErrorCode::MemoryLimitExceeded);
    }

    #[tokio::test]
    async fn test_statistics_high_water_mark() {
        let (_, stats) = run("a from [//t] order by a limit 10").await;
        assert!(stats.memory_high_water_mark > 0);
        assert!(stats.batches_read >= 1);
    }

    #[tokio::test]
    async fn test_missing_join_inputs() {
        let evaluator = Evaluator::new(
            Arc::new(FunctionRegistry::builtin()),
            Arc::new(CompiledQueryCache::new(8)),
            QueryOptions::default(),
        );
        let query = prepare(
            "a from [//t] join [//t] as f using a",
            &Single,
            &Placeholders::empty(),
            evaluator.registry(),
            &QueryOptions::default(),
        )
        .await
        .unwrap();
        let mut reader = MemoryReader::new(input());
        let mut writer = MemoryWriter::new();
        let err = evaluator.run(&query, &mut reader, &mut writer, &[]).await.unwrap_err();
        assert_eq!(err.code(), EvaluationErrorCode::EvaluationFailed);
    }
}
