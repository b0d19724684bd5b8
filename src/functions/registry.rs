//! # Function Registry
//!
//! An explicit, cloneable registry value. The process builds one from
//! `FunctionRegistry::builtin()` and shares it; per-query UDFs are merged
//! into a clone via `with_udfs`, the shared value is never mutated.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use super::aggregates::{AggregateImpl, AggregateKind};
use super::builtins::register_builtins;
use super::errors::{FunctionError, FunctionResult};
use super::signature::{Signature, TypeSpec, COMPARABLE_TYPES, NUMERIC_TYPES};
use super::udf::{UdfDescriptor, WasmAggregate, WasmFunction};
use crate::value::{Value, ValueType};

/// Native scalar implementation
pub type NativeFn = Arc<dyn Fn(&[Value]) -> FunctionResult<Value> + Send + Sync>;

/// How a function treats null arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullPolicy {
    /// Any null argument makes the result null without calling the body
    Propagate,
    /// The body sees nulls
    Aware,
}

#[derive(Clone)]
pub enum ScalarImpl {
    Native(NativeFn),
    Wasm(Arc<WasmFunction>),
}

#[derive(Clone)]
pub struct ScalarFunction {
    pub name: String,
    pub signature: Signature,
    pub null_policy: NullPolicy,
    pub implementation: ScalarImpl,
}

impl ScalarFunction {
    pub fn invoke(&self, args: &[Value]) -> FunctionResult<Value> {
        if self.null_policy == NullPolicy::Propagate && args.iter().any(Value::is_null) {
            return Ok(Value::Null);
        }
        match &self.implementation {
            ScalarImpl::Native(f) => f(args),
            ScalarImpl::Wasm(udf) => udf.invoke(args),
        }
    }

    pub fn is_udf(&self) -> bool {
        matches!(self.implementation, ScalarImpl::Wasm(_))
    }
}

impl fmt::Debug for ScalarFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScalarFunction")
            .field("name", &self.name)
            .field("null_policy", &self.null_policy)
            .field("udf", &self.is_udf())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AggregateFunction {
    pub name: String,
    pub signature: Signature,
    /// Fixed accumulator type, or `None` when it follows the argument
    pub state_type: Option<ValueType>,
    pub implementation: AggregateImpl,
}

impl AggregateFunction {
    pub fn state_type(&self, argument: ValueType) -> ValueType {
        match (&self.implementation, self.state_type) {
            (_, Some(ty)) => ty,
            (AggregateImpl::Builtin(kind), None) => kind.state_type(argument),
            (AggregateImpl::Custom(_), None) => ValueType::Any,
        }
    }
}

#[derive(Debug, Clone)]
pub enum FunctionDescriptor {
    Scalar(ScalarFunction),
    Aggregate(AggregateFunction),
}

impl FunctionDescriptor {
    pub fn name(&self) -> &str {
        match self {
            FunctionDescriptor::Scalar(f) => &f.name,
            FunctionDescriptor::Aggregate(f) => &f.name,
        }
    }

    pub fn signature(&self) -> &Signature {
        match self {
            FunctionDescriptor::Scalar(f) => &f.signature,
            FunctionDescriptor::Aggregate(f) => &f.signature,
        }
    }
}

/// Registry of scalar and aggregate functions, keyed by lowercase name
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<FunctionDescriptor>>,
    /// Digests of registered UDFs by name
    udfs: HashMap<String, String>,
}

impl FunctionRegistry {
    /// Create a registry with no functions
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in scalar and aggregate
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry
            .register_all_builtins()
            .expect("Built-in function names cannot clash");
        registry
    }

    fn register_all_builtins(&mut self) -> FunctionResult<()> {
        register_builtins(self)?;

        let same_type = |allowed: &[ValueType]| {
            Signature::new(vec![TypeSpec::Generic(0)], TypeSpec::Generic(0)).with_constraint(0, allowed)
        };
        self.register_aggregate("sum", same_type(NUMERIC_TYPES), None, AggregateImpl::Builtin(AggregateKind::Sum))?;
        self.register_aggregate("min", same_type(COMPARABLE_TYPES), None, AggregateImpl::Builtin(AggregateKind::Min))?;
        self.register_aggregate("max", same_type(COMPARABLE_TYPES), None, AggregateImpl::Builtin(AggregateKind::Max))?;
        self.register_aggregate(
            "avg",
            Signature::new(vec![TypeSpec::Generic(0)], TypeSpec::Concrete(ValueType::Double))
                .with_constraint(0, NUMERIC_TYPES),
            None,
            AggregateImpl::Builtin(AggregateKind::Avg),
        )?;
        self.register_aggregate(
            "first",
            Signature::new(vec![TypeSpec::Generic(0)], TypeSpec::Generic(0)),
            None,
            AggregateImpl::Builtin(AggregateKind::First),
        )?;
        self.register_aggregate(
            "cardinality",
            Signature::new(vec![TypeSpec::Generic(0)], TypeSpec::Concrete(ValueType::Uint64))
                .with_constraint(0, COMPARABLE_TYPES),
            None,
            AggregateImpl::Builtin(AggregateKind::Cardinality),
        )?;
        Ok(())
    }

    fn insert(&mut self, descriptor: FunctionDescriptor) -> FunctionResult<()> {
        let key = descriptor.name().to_ascii_lowercase();
        if self.functions.contains_key(&key) {
            return Err(FunctionError::AlreadyExists(key));
        }
        self.functions.insert(key, Arc::new(descriptor));
        Ok(())
    }

    /// Register a scalar function
    pub fn register_scalar(
        &mut self,
        name: &str,
        signature: Signature,
        null_policy: NullPolicy,
        implementation: ScalarImpl,
    ) -> FunctionResult<()> {
        self.insert(FunctionDescriptor::Scalar(ScalarFunction {
            name: name.to_ascii_lowercase(),
            signature,
            null_policy,
            implementation,
        }))
    }

    /// Register a scalar function backed by a Rust closure
    pub fn register_native<F>(
        &mut self,
        name: &str,
        signature: Signature,
        null_policy: NullPolicy,
        body: F,
    ) -> FunctionResult<()>
    where
        F: Fn(&[Value]) -> FunctionResult<Value> + Send + Sync + 'static,
    {
        self.register_scalar(name, signature, null_policy, ScalarImpl::Native(Arc::new(body)))
    }

    /// Register an aggregate function; it must take exactly one argument
    pub fn register_aggregate(
        &mut self,
        name: &str,
        signature: Signature,
        state_type: Option<ValueType>,
        implementation: AggregateImpl,
    ) -> FunctionResult<()> {
        if signature.arity() != 1 || signature.is_variadic() {
            return Err(FunctionError::InvalidSignature {
                function: name.to_string(),
                reason: "aggregates take exactly one argument".into(),
            });
        }
        self.insert(FunctionDescriptor::Aggregate(AggregateFunction {
            name: name.to_ascii_lowercase(),
            signature,
            state_type,
            implementation,
        }))
    }

    /// Register a scalar WebAssembly UDF
    pub fn register_udf(&mut self, descriptor: UdfDescriptor) -> FunctionResult<()> {
        let digest = descriptor.digest();
        let name = descriptor.name.to_ascii_lowercase();
        let signature = Signature::fixed(&descriptor.arguments, descriptor.result);
        let function = WasmFunction::new(descriptor)?;
        self.register_scalar(&name, signature, NullPolicy::Propagate, ScalarImpl::Wasm(Arc::new(function)))?;
        self.udfs.insert(name, digest);
        Ok(())
    }

    /// Register an aggregate WebAssembly UDF
    pub fn register_udaf(&mut self, descriptor: UdfDescriptor) -> FunctionResult<()> {
        let digest = descriptor.digest();
        let name = descriptor.name.to_ascii_lowercase();
        let signature = Signature::fixed(&descriptor.arguments, descriptor.result);
        let aggregate = WasmAggregate::new(descriptor)?;
        let state_type = aggregate.state_type();
        self.register_aggregate(
            &name,
            signature,
            Some(state_type),
            AggregateImpl::Custom(Arc::new(aggregate)),
        )?;
        self.udfs.insert(name, digest);
        Ok(())
    }

    /// Clone of this registry extended with per-query UDFs
    pub fn with_udfs(&self, descriptors: &[UdfDescriptor]) -> FunctionResult<Self> {
        let mut registry = self.clone();
        for descriptor in descriptors {
            if descriptor.is_aggregate() {
                registry.register_udaf(descriptor.clone())?;
            } else {
                registry.register_udf(descriptor.clone())?;
            }
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDescriptor> {
        self.functions.get(&name.to_ascii_lowercase()).map(|f| f.as_ref())
    }

    pub fn scalar(&self, name: &str) -> Option<&ScalarFunction> {
        match self.get(name)? {
            FunctionDescriptor::Scalar(f) => Some(f),
            FunctionDescriptor::Aggregate(_) => None,
        }
    }

    pub fn aggregate(&self, name: &str) -> Option<&AggregateFunction> {
        match self.get(name)? {
            FunctionDescriptor::Aggregate(f) => Some(f),
            FunctionDescriptor::Scalar(_) => None,
        }
    }

    pub fn is_aggregate(&self, name: &str) -> bool {
        self.aggregate(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Digest of the registered UDF set; empty without UDFs.
    ///
    /// Compiled queries are cached per fingerprint and this digest, so the
    /// same query text over different UDF code compiles separately.
    pub fn fingerprint(&self) -> String {
        if self.udfs.is_empty() {
            return String::new();
        }
        let mut entries: Vec<_> = self.udfs.iter().collect();
        entries.sort();
        let mut hasher = Sha256::new();
        for (name, digest) in entries {
            hasher.update(name.as_bytes());
            hasher.update(digest.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inc_udf() -> UdfDescriptor {
        UdfDescriptor {
            name: "Inc".into(),
            symbol: Some("inc".into()),
            arguments: vec![ValueType::Int64],
            result: ValueType::Int64,
            state: None,
            module: r#"(module (func (export "inc") (param i64) (result i64)
                local.get 0 i64.const 1 i64.add))"#
                .into(),
        }
    }

    #[test]
    fn test_builtin_lookup() {
        let registry = FunctionRegistry::builtin();
        assert!(registry.is_aggregate("SUM"));
        assert!(!registry.is_aggregate("lower"));
        assert!(registry.scalar("is_prefix").is_some());
        assert!(registry.get("no_such_function").is_none());
        assert_eq!(registry.fingerprint(), "");
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = FunctionRegistry::builtin();
        let result = registry.register_native(
            "lower",
            Signature::fixed(&[ValueType::String], ValueType::String),
            NullPolicy::Propagate,
            |args| Ok(args[0].clone()),
        );
        assert!(matches!(result, Err(FunctionError::AlreadyExists(_))));
    }

    #[test]
    fn test_with_udfs_does_not_touch_base() {
        let base = FunctionRegistry::builtin();
        let extended = base.with_udfs(&[inc_udf()]).unwrap();
        assert!(base.get("inc").is_none());
        let inc = extended.scalar("inc").unwrap();
        assert!(inc.is_udf());
        assert_eq!(inc.invoke(&[Value::Int64(41)]).unwrap(), Value::Int64(42));
        assert_eq!(inc.invoke(&[Value::Null]).unwrap(), Value::Null);
        assert_ne!(extended.fingerprint(), base.fingerprint());
    }

    #[test]
    fn test_aggregate_requires_single_argument() {
        let mut registry = FunctionRegistry::new();
        let result = registry.register_aggregate(
            "pair_sum",
            Signature::fixed(&[ValueType::Int64, ValueType::Int64], ValueType::Int64),
            None,
            AggregateImpl::Builtin(AggregateKind::Sum),
        );
        assert!(matches!(result, Err(FunctionError::InvalidSignature { .. })));
    }

    #[test]
    fn test_aggregate_state_types() {
        let registry = FunctionRegistry::builtin();
        assert_eq!(
            registry.aggregate("avg").unwrap().state_type(ValueType::Int64),
            ValueType::Any
        );
        assert_eq!(
            registry.aggregate("sum").unwrap().state_type(ValueType::Double),
            ValueType::Double
        );
    }
}
