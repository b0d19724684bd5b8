//! # Functions
//!
//! Built-in scalar and aggregate functions plus WebAssembly user-defined
//! functions, all resolved through an explicit `FunctionRegistry` value.

pub mod aggregates;
pub mod builtins;
pub mod errors;
pub mod registry;
pub mod signature;
pub mod udf;

pub use aggregates::{AggregateImpl, AggregateKind, AggregateState, StateAggregate};
pub use builtins::hash64;
pub use errors::{FunctionError, FunctionResult};
pub use registry::{
    AggregateFunction, FunctionDescriptor, FunctionRegistry, NativeFn, NullPolicy, ScalarFunction, ScalarImpl,
};
pub use signature::{ResolvedSignature, Signature, TypeSpec};
pub use udf::{UdfDescriptor, WasmAggregate, WasmFunction};
