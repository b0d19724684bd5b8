//! Function signatures and argument type inference
//!
//! A signature is a list of parameter type specs, an optional repeated tail
//! and a result spec. Generic parameters share a type variable; a variable
//! may be constrained to a union of allowed types.

use std::collections::HashMap;

use crate::value::ValueType;

/// Type of one parameter or of the result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeSpec {
    Concrete(ValueType),
    /// Type variable, identified by number
    Generic(usize),
    /// Accepts any argument type as is
    Any,
}

/// Types a generic variable may be bound to when it is constrained
pub const NUMERIC_TYPES: &[ValueType] = &[ValueType::Int64, ValueType::Uint64, ValueType::Double];

pub const COMPARABLE_TYPES: &[ValueType] = &[
    ValueType::Int64,
    ValueType::Uint64,
    ValueType::Double,
    ValueType::Boolean,
    ValueType::String,
];

pub const CASTABLE_TYPES: &[ValueType] = COMPARABLE_TYPES;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    params: Vec<TypeSpec>,
    repeated: Option<TypeSpec>,
    result: TypeSpec,
    constraints: HashMap<usize, Vec<ValueType>>,
}

/// Outcome of inference: the type each argument must have and the result type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSignature {
    pub arg_types: Vec<ValueType>,
    pub result: ValueType,
}

impl Signature {
    pub fn new(params: Vec<TypeSpec>, result: TypeSpec) -> Self {
        Self {
            params,
            repeated: None,
            result,
            constraints: HashMap::new(),
        }
    }

    /// Fixed signature of concrete types
    pub fn fixed(params: &[ValueType], result: ValueType) -> Self {
        Self::new(
            params.iter().map(|ty| TypeSpec::Concrete(*ty)).collect(),
            TypeSpec::Concrete(result),
        )
    }

    pub fn with_repeated(mut self, spec: TypeSpec) -> Self {
        self.repeated = Some(spec);
        self
    }

    pub fn with_constraint(mut self, variable: usize, allowed: &[ValueType]) -> Self {
        self.constraints.insert(variable, allowed.to_vec());
        self
    }

    pub fn params(&self) -> &[TypeSpec] {
        &self.params
    }

    pub fn result(&self) -> TypeSpec {
        self.result
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn is_variadic(&self) -> bool {
        self.repeated.is_some()
    }

    /// Resolves argument and result types for a call.
    ///
    /// `literal[i]` tells whether argument `i` is a literal whose numeric type
    /// may still be adjusted. Nulls fit any parameter. Errors are returned as
    /// plain messages, the preparer attaches its own error code.
    pub fn infer(&self, args: &[ValueType], literal: &[bool]) -> Result<ResolvedSignature, String> {
        if args.len() < self.params.len() || (self.repeated.is_none() && args.len() > self.params.len()) {
            return Err(format!(
                "Expected {}{} arguments, got {}",
                if self.repeated.is_some() { "at least " } else { "" },
                self.params.len(),
                args.len()
            ));
        }

        let spec_of = |index: usize| -> TypeSpec {
            self.params
                .get(index)
                .copied()
                .or(self.repeated)
                .unwrap_or(TypeSpec::Any)
        };
        let is_literal = |index: usize| literal.get(index).copied().unwrap_or(false);

        // Bind each type variable, preferring non-literal arguments
        let mut bindings: HashMap<usize, ValueType> = HashMap::new();
        for pass_literals in [false, true] {
            for (index, ty) in args.iter().enumerate() {
                if let TypeSpec::Generic(var) = spec_of(index) {
                    if *ty == ValueType::Null || is_literal(index) != pass_literals {
                        continue;
                    }
                    bindings.entry(var).or_insert(*ty);
                }
            }
        }

        let mut arg_types = Vec::with_capacity(args.len());
        for (index, ty) in args.iter().enumerate() {
            let expected = match spec_of(index) {
                TypeSpec::Any => *ty,
                TypeSpec::Concrete(expected) => expected,
                TypeSpec::Generic(var) => bindings.get(&var).copied().unwrap_or(ValueType::Null),
            };
            let fits = *ty == expected
                || *ty == ValueType::Null
                || expected == ValueType::Any
                || (is_literal(index) && ty.is_numeric() && expected.is_numeric());
            if !fits {
                return Err(format!(
                    "Wrong type for argument {}: expected {}, got {}",
                    index + 1,
                    expected,
                    ty
                ));
            }
            arg_types.push(expected);
        }

        for (var, bound) in &bindings {
            if let Some(allowed) = self.constraints.get(var) {
                if !allowed.contains(bound) {
                    return Err(format!("Type {} is not allowed here", bound));
                }
            }
        }

        let result = match self.result {
            TypeSpec::Concrete(ty) => ty,
            TypeSpec::Generic(var) => bindings.get(&var).copied().unwrap_or(ValueType::Null),
            TypeSpec::Any => ValueType::Any,
        };

        Ok(ResolvedSignature { arg_types, result })
    }
}
