//! # WebAssembly user-defined functions
//!
//! A UDF is a WebAssembly module (binary or text format) exporting one
//! function per UDF. Arguments and results are limited to the types with a
//! direct WebAssembly representation:
//!
//! | value type | wasm type |
//! |---|---|
//! | int64, uint64 | i64 |
//! | double | f64 |
//! | boolean | i32 |
//!
//! An aggregate UDF with symbol `s` exports `s_init`, `s_update`, `s_merge`
//! and `s_finalize`; its state is a single value of the declared state type.
//!
//! Modules are compiled on first call and the instance is reused afterwards.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use wasmtime::{Engine, Instance, Module, Store, Val};

use super::aggregates::StateAggregate;
use super::errors::{FunctionError, FunctionResult};
use crate::value::{Value, ValueType};

/// Declaration of a user-defined function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdfDescriptor {
    pub name: String,
    /// Exported symbol; defaults to the function name
    #[serde(default)]
    pub symbol: Option<String>,
    pub arguments: Vec<ValueType>,
    pub result: ValueType,
    /// Accumulator type, present for aggregate UDFs only
    #[serde(default)]
    pub state: Option<ValueType>,
    /// Module source, WebAssembly text or binary
    pub module: String,
}

impl UdfDescriptor {
    pub fn symbol(&self) -> &str {
        self.symbol.as_deref().unwrap_or(&self.name)
    }

    pub fn is_aggregate(&self) -> bool {
        self.state.is_some()
    }

    /// Digest identifying the declaration and its code
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update(self.symbol().as_bytes());
        for arg in &self.arguments {
            hasher.update(arg.as_str().as_bytes());
        }
        hasher.update(self.result.as_str().as_bytes());
        if let Some(state) = &self.state {
            hasher.update(state.as_str().as_bytes());
        }
        hasher.update(self.module.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn check_types(&self) -> FunctionResult<()> {
        let types = self
            .arguments
            .iter()
            .chain(std::iter::once(&self.result))
            .chain(self.state.iter());
        for ty in types {
            if !matches!(
                ty,
                ValueType::Int64 | ValueType::Uint64 | ValueType::Double | ValueType::Boolean
            ) {
                return Err(FunctionError::UnsupportedUdfType {
                    function: self.name.clone(),
                    value_type: ty.to_string(),
                });
            }
        }
        Ok(())
    }
}

struct LoadedModule {
    store: Store<()>,
    instance: Instance,
}

/// Lazily instantiated module shared by the exports of one UDF
struct WasmModule {
    function: String,
    source: Vec<u8>,
    loaded: Mutex<Option<LoadedModule>>,
}

impl WasmModule {
    fn new(function: &str, source: &str) -> Self {
        Self {
            function: function.to_string(),
            source: source.as_bytes().to_vec(),
            loaded: Mutex::new(None),
        }
    }

    fn call(&self, export: &str, params: &[Val], result_type: ValueType) -> FunctionResult<Val> {
        let mut guard = self
            .loaded
            .lock()
            .map_err(|_| FunctionError::udf(&self.function, "Lock poisoned"))?;
        if guard.is_none() {
            *guard = Some(self.load()?);
        }
        let loaded = match guard.as_mut() {
            Some(loaded) => loaded,
            None => return Err(FunctionError::udf(&self.function, "Module is not loaded")),
        };

        let func = loaded
            .instance
            .get_func(&mut loaded.store, export)
            .ok_or_else(|| FunctionError::udf(&self.function, format!("Missing export \"{}\"", export)))?;
        let mut results = [zero_val(result_type)];
        func.call(&mut loaded.store, params, &mut results)
            .map_err(|e| FunctionError::udf(&self.function, e.to_string()))?;
        let [result] = results;
        Ok(result)
    }

    fn load(&self) -> FunctionResult<LoadedModule> {
        let engine = Engine::default();
        let module = Module::new(&engine, &self.source)
            .map_err(|e| FunctionError::udf(&self.function, format!("Compilation failed: {}", e)))?;
        let mut store = Store::new(&engine, ());
        let instance = Instance::new(&mut store, &module, &[])
            .map_err(|e| FunctionError::udf(&self.function, format!("Instantiation failed: {}", e)))?;
        Ok(LoadedModule { store, instance })
    }
}

/// Scalar UDF
pub struct WasmFunction {
    descriptor: UdfDescriptor,
    module: WasmModule,
}

impl WasmFunction {
    pub fn new(descriptor: UdfDescriptor) -> FunctionResult<Self> {
        descriptor.check_types()?;
        if descriptor.is_aggregate() {
            return Err(FunctionError::InvalidSignature {
                function: descriptor.name.clone(),
                reason: "aggregate UDF registered as scalar".into(),
            });
        }
        let module = WasmModule::new(&descriptor.name, &descriptor.module);
        Ok(Self { descriptor, module })
    }

    pub fn descriptor(&self) -> &UdfDescriptor {
        &self.descriptor
    }

    pub fn invoke(&self, args: &[Value]) -> FunctionResult<Value> {
        let name = &self.descriptor.name;
        if args.len() != self.descriptor.arguments.len() {
            return Err(FunctionError::udf(
                name,
                format!(
                    "Expected {} arguments, got {}",
                    self.descriptor.arguments.len(),
                    args.len()
                ),
            ));
        }
        let params = args
            .iter()
            .zip(&self.descriptor.arguments)
            .map(|(value, ty)| to_val(name, value, *ty))
            .collect::<FunctionResult<Vec<_>>>()?;
        let result = self.module.call(self.descriptor.symbol(), &params, self.descriptor.result)?;
        from_val(name, &result, self.descriptor.result)
    }
}

/// Aggregate UDF
pub struct WasmAggregate {
    descriptor: UdfDescriptor,
    state_type: ValueType,
    module: WasmModule,
}

impl WasmAggregate {
    pub fn new(descriptor: UdfDescriptor) -> FunctionResult<Self> {
        descriptor.check_types()?;
        let state_type = descriptor.state.ok_or_else(|| FunctionError::InvalidSignature {
            function: descriptor.name.clone(),
            reason: "aggregate UDF requires a state type".into(),
        })?;
        if descriptor.arguments.len() != 1 {
            return Err(FunctionError::InvalidSignature {
                function: descriptor.name.clone(),
                reason: "aggregate UDF takes exactly one argument".into(),
            });
        }
        let module = WasmModule::new(&descriptor.name, &descriptor.module);
        Ok(Self {
            descriptor,
            state_type,
            module,
        })
    }

    pub fn descriptor(&self) -> &UdfDescriptor {
        &self.descriptor
    }

    pub fn state_type(&self) -> ValueType {
        self.state_type
    }

    fn export(&self, suffix: &str) -> String {
        format!("{}_{}", self.descriptor.symbol(), suffix)
    }

    fn call(&self, suffix: &str, args: &[(Value, ValueType)], result: ValueType) -> FunctionResult<Value> {
        let name = &self.descriptor.name;
        let params = args
            .iter()
            .map(|(value, ty)| to_val(name, value, *ty))
            .collect::<FunctionResult<Vec<_>>>()?;
        let raw = self.module.call(&self.export(suffix), &params, result)?;
        from_val(name, &raw, result)
    }
}

impl StateAggregate for WasmAggregate {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn init(&self) -> FunctionResult<Value> {
        self.call("init", &[], self.state_type)
    }

    fn update(&self, state: Value, input: &Value) -> FunctionResult<Value> {
        let arg_type = self.descriptor.arguments[0];
        self.call(
            "update",
            &[(state, self.state_type), (input.clone(), arg_type)],
            self.state_type,
        )
    }

    fn merge(&self, left: Value, right: &Value) -> FunctionResult<Value> {
        self.call(
            "merge",
            &[(left, self.state_type), (right.clone(), self.state_type)],
            self.state_type,
        )
    }

    fn finalize(&self, state: &Value) -> FunctionResult<Value> {
        self.call("finalize", &[(state.clone(), self.state_type)], self.descriptor.result)
    }
}

fn zero_val(ty: ValueType) -> Val {
    match ty {
        ValueType::Double => Val::F64(0f64.to_bits()),
        ValueType::Boolean => Val::I32(0),
        _ => Val::I64(0),
    }
}

fn to_val(function: &str, value: &Value, ty: ValueType) -> FunctionResult<Val> {
    let coerced = value
        .cast(ty)
        .map_err(|reason| FunctionError::udf(function, reason))?;
    match coerced {
        Value::Int64(v) => Ok(Val::I64(v)),
        Value::Uint64(v) => Ok(Val::I64(v as i64)),
        Value::Double(d) => Ok(Val::F64(d.to_bits())),
        Value::Boolean(b) => Ok(Val::I32(i32::from(b))),
        other => Err(FunctionError::udf(
            function,
            format!("Cannot pass {} value to WebAssembly", other.value_type()),
        )),
    }
}

fn from_val(function: &str, val: &Val, ty: ValueType) -> FunctionResult<Value> {
    match (val, ty) {
        (Val::I64(v), ValueType::Int64) => Ok(Value::Int64(*v)),
        (Val::I64(v), ValueType::Uint64) => Ok(Value::Uint64(*v as u64)),
        (Val::F64(bits), ValueType::Double) => Ok(Value::Double(f64::from_bits(*bits))),
        (Val::I32(v), ValueType::Boolean) => Ok(Value::Boolean(*v != 0)),
        _ => Err(FunctionError::udf(
            function,
            format!("Unexpected result {:?} for type {}", val, ty),
        )),
    }
}
