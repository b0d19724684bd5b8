//! Schemas, keys and data splits
//!
//! # Invariants
//!
//! - Sort-ordered columns form a contiguous prefix starting at index 0
//! - Schemas are immutable once built and shared through `Arc`
//! - Splits are never mutated by the query pipeline

mod errors;
mod key;
mod split;
mod types;
mod validator;

pub use errors::{SchemaError, SchemaErrorCode, SchemaResult, ValidationDetails};
pub use key::{merge_ranges, Key, KeyPart, KeyRange};
pub use split::DataSplit;
pub use types::{ColumnSchema, SortOrder, TableSchema};
pub use validator::RowValidator;
