//! Row storage and the reader/writer capabilities of the pipeline
//!
//! - `Row`, `RowBatch`: values and immutable shared batches
//! - `RowBuffer`, `MemoryTracker`: per-stage arena and per-query budget
//! - `RowReader`, `RowWriter`: small fixed capability traits with in-memory
//!   and channel-backed implementations

mod buffer;
mod reader;
mod row;
mod writer;

pub use buffer::{MemoryTracker, RowBuffer};
pub use reader::{read_all, BatchMessage, ChannelReader, MemoryReader, RowReader};
pub use row::{BatchSizer, Row, RowBatch};
pub use writer::{write_all, ChannelWriter, MemoryWriter, RowWriter};
