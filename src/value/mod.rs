//! Value model shared by every stage of the query pipeline

mod types;
mod value;

pub use types::{LogicalType, StructField, ValueType};
pub use value::{CompareError, Value};
