//! Row sink capability

use futures_util::future::{self, BoxFuture, FutureExt};
use tokio::sync::mpsc;

use crate::evaluator::{EvaluationError, EvaluationResult};

use super::row::{Row, RowBatch};

/// Asynchronous row-batch sink
pub trait RowWriter: Send {
    /// Accepts rows; `false` asks the caller to await `ready` before writing more
    fn write(&mut self, rows: &[Row]) -> EvaluationResult<bool>;

    /// Resolves once the writer accepts more rows
    fn ready(&mut self) -> BoxFuture<'_, EvaluationResult<()>>;

    /// Flushes and closes the sink
    fn close(&mut self) -> BoxFuture<'_, EvaluationResult<()>>;
}

/// Writer collecting rows in memory
#[derive(Debug, Default)]
pub struct MemoryWriter {
    rows: Vec<Row>,
    closed: bool,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl RowWriter for MemoryWriter {
    fn write(&mut self, rows: &[Row]) -> EvaluationResult<bool> {
        if self.closed {
            return Err(EvaluationError::evaluation_failed("Write to a closed writer"));
        }
        self.rows.extend_from_slice(rows);
        Ok(true)
    }

    fn ready(&mut self) -> BoxFuture<'_, EvaluationResult<()>> {
        future::ready(Ok(())).boxed()
    }

    fn close(&mut self) -> BoxFuture<'_, EvaluationResult<()>> {
        self.closed = true;
        future::ready(Ok(())).boxed()
    }
}

/// Writer forwarding batches over a bounded channel
pub struct ChannelWriter {
    sender: Option<mpsc::Sender<RowBatch>>,
    pending: Option<RowBatch>,
}

impl ChannelWriter {
    pub fn new(sender: mpsc::Sender<RowBatch>) -> Self {
        Self {
            sender: Some(sender),
            pending: None,
        }
    }

    fn sender(&self) -> EvaluationResult<&mpsc::Sender<RowBatch>> {
        self.sender
            .as_ref()
            .ok_or_else(|| EvaluationError::evaluation_failed("Write to a closed writer"))
    }
}

impl RowWriter for ChannelWriter {
    fn write(&mut self, rows: &[Row]) -> EvaluationResult<bool> {
        if self.pending.is_some() {
            return Ok(false);
        }
        let batch = RowBatch::new(rows.to_vec());
        match self.sender()?.try_send(batch) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(batch)) => {
                self.pending = Some(batch);
                Ok(false)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(EvaluationError::evaluation_failed("Output channel closed by consumer"))
            }
        }
    }

    fn ready(&mut self) -> BoxFuture<'_, EvaluationResult<()>> {
        async move {
            if let Some(batch) = self.pending.take() {
                self.sender()?
                    .send(batch)
                    .await
                    .map_err(|_| EvaluationError::evaluation_failed("Output channel closed by consumer"))?;
            }
            Ok(())
        }
        .boxed()
    }

    fn close(&mut self) -> BoxFuture<'_, EvaluationResult<()>> {
        async move {
            self.ready().await?;
            self.sender = None;
            Ok(())
        }
        .boxed()
    }
}

/// Writes rows honoring backpressure
pub async fn write_all(writer: &mut dyn RowWriter, rows: &[Row]) -> EvaluationResult<()> {
    if rows.is_empty() {
        return Ok(());
    }
    if !writer.write(rows)? {
        writer.ready().await?;
    }
    Ok(())
}
