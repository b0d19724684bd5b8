//! # Built-in scalar functions

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use regex::Regex;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

use super::errors::{FunctionError, FunctionResult};
use super::registry::{FunctionRegistry, NullPolicy};
use super::signature::{Signature, TypeSpec, CASTABLE_TYPES, NUMERIC_TYPES};
use crate::value::{Value, ValueType};

const REGEX_CACHE_CAPACITY: usize = 256;

/// Compiled patterns shared by the regex functions of one registry
#[derive(Default)]
struct RegexCache {
    compiled: Mutex<HashMap<String, Arc<Regex>>>,
}

impl RegexCache {
    fn get(&self, function: &str, pattern: &str) -> FunctionResult<Arc<Regex>> {
        let mut compiled = self
            .compiled
            .lock()
            .map_err(|_| FunctionError::invalid_argument(function, "Lock poisoned"))?;
        if let Some(regex) = compiled.get(pattern) {
            return Ok(regex.clone());
        }
        let regex = Arc::new(
            Regex::new(pattern)
                .map_err(|e| FunctionError::invalid_argument(function, format!("Bad pattern: {}", e)))?,
        );
        if compiled.len() >= REGEX_CACHE_CAPACITY {
            compiled.clear();
        }
        compiled.insert(pattern.to_string(), regex.clone());
        Ok(regex)
    }
}

fn string_arg<'a>(function: &str, args: &'a [Value], index: usize) -> FunctionResult<&'a str> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| FunctionError::invalid_argument(function, format!("Argument {} must be a string", index + 1)))
}

fn int_arg(function: &str, args: &[Value], index: usize) -> FunctionResult<i64> {
    match args.get(index) {
        Some(Value::Int64(v)) => Ok(*v),
        Some(Value::Uint64(v)) => i64::try_from(*v)
            .map_err(|_| FunctionError::invalid_argument(function, "Timestamp is out of range")),
        _ => Err(FunctionError::invalid_argument(
            function,
            format!("Argument {} must be an integer", index + 1),
        )),
    }
}

/// Converts the `\N` group syntax of rewrite strings into `${N}`
fn rewrite_template(rewrite: &str) -> String {
    let mut out = String::with_capacity(rewrite.len());
    let mut chars = rewrite.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek().copied() {
                Some(d) if d.is_ascii_digit() => {
                    chars.next();
                    out.push_str(&format!("${{{}}}", d));
                }
                Some('\\') => {
                    chars.next();
                    out.push('\\');
                }
                _ => out.push('\\'),
            },
            '$' => out.push_str("$$"),
            other => out.push(other),
        }
    }
    out
}

fn timestamp(function: &str, seconds: i64) -> FunctionResult<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| FunctionError::invalid_argument(function, format!("Invalid timestamp {}", seconds)))
}

fn floor_timestamp(function: &str, seconds: i64, unit: &str) -> FunctionResult<i64> {
    let ts = timestamp(function, seconds)?;
    let day_start = ts
        .with_hour(0)
        .and_then(|t| t.with_minute(0))
        .and_then(|t| t.with_second(0));
    let floored = match unit {
        "hour" => ts.with_minute(0).and_then(|t| t.with_second(0)),
        "day" => day_start,
        "week" => day_start.map(|t| t - Duration::days(i64::from(t.weekday().num_days_from_monday()))),
        "month" => day_start.and_then(|t| t.with_day(1)),
        "year" => day_start.and_then(|t| t.with_day(1)).and_then(|t| t.with_month(1)),
        _ => None,
    };
    floored
        .map(|t| t.timestamp())
        .ok_or_else(|| FunctionError::invalid_argument(function, format!("Cannot floor {} to {}", seconds, unit)))
}

fn hash_value(hasher: &mut Sha256, value: &Value) {
    hasher.update([value.value_type() as u8]);
    match value {
        Value::Null => {}
        Value::Int64(v) => hasher.update(v.to_le_bytes()),
        Value::Uint64(v) => hasher.update(v.to_le_bytes()),
        Value::Double(d) => hasher.update(d.to_bits().to_le_bytes()),
        Value::Boolean(b) => hasher.update([u8::from(*b)]),
        Value::String(s) => {
            hasher.update((s.len() as u64).to_le_bytes());
            hasher.update(s.as_bytes());
        }
        Value::Any(json) => hasher.update(json.to_string().as_bytes()),
    }
}

/// 64-bit hash of a value tuple, stable across processes
pub fn hash64(values: &[Value]) -> u64 {
    let mut hasher = Sha256::new();
    for value in values {
        hash_value(&mut hasher, value);
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

fn cast_fn(target: ValueType) -> impl Fn(&[Value]) -> FunctionResult<Value> + Send + Sync + 'static {
    move |args: &[Value]| {
        let value = args.first().cloned().unwrap_or(Value::Null);
        value.cast(target).map_err(FunctionError::Cast)
    }
}

pub(crate) fn register_builtins(registry: &mut FunctionRegistry) -> FunctionResult<()> {
    let any_to_bool = Signature::new(vec![TypeSpec::Any], TypeSpec::Concrete(ValueType::Boolean));
    registry.register_native("is_null", any_to_bool, NullPolicy::Aware, |args| {
        Ok(Value::Boolean(args.first().map_or(true, Value::is_null)))
    })?;

    // evaluated lazily by the compiler; this body serves direct calls
    let if_sig = Signature::new(
        vec![
            TypeSpec::Concrete(ValueType::Boolean),
            TypeSpec::Generic(0),
            TypeSpec::Generic(0),
        ],
        TypeSpec::Generic(0),
    );
    registry.register_native("if", if_sig, NullPolicy::Aware, |args| {
        let branch = if args.first().and_then(Value::as_bool) == Some(true) { 1 } else { 2 };
        Ok(args.get(branch).cloned().unwrap_or(Value::Null))
    })?;

    for (name, target) in [
        ("int64", ValueType::Int64),
        ("uint64", ValueType::Uint64),
        ("double", ValueType::Double),
        ("boolean", ValueType::Boolean),
        ("string", ValueType::String),
    ] {
        let sig = Signature::new(vec![TypeSpec::Generic(0)], TypeSpec::Concrete(target))
            .with_constraint(0, CASTABLE_TYPES);
        registry.register_native(name, sig, NullPolicy::Propagate, cast_fn(target))?;
    }

    let numeric_to_string = Signature::new(vec![TypeSpec::Generic(0)], TypeSpec::Concrete(ValueType::String))
        .with_constraint(0, NUMERIC_TYPES);
    registry.register_native("numeric_to_string", numeric_to_string, NullPolicy::Propagate, |args| {
        Ok(Value::String(match &args[0] {
            Value::Int64(v) => v.to_string(),
            Value::Uint64(v) => v.to_string(),
            Value::Double(d) if d.fract() == 0.0 && d.is_finite() => format!("{:.1}", d),
            Value::Double(d) => d.to_string(),
            other => {
                return Err(FunctionError::invalid_argument(
                    "numeric_to_string",
                    format!("{} is not numeric", other),
                ))
            }
        }))
    })?;

    let str2_bool = Signature::fixed(&[ValueType::String, ValueType::String], ValueType::Boolean);
    registry.register_native("is_prefix", str2_bool.clone(), NullPolicy::Propagate, |args| {
        Ok(Value::Boolean(
            string_arg("is_prefix", args, 1)?.starts_with(string_arg("is_prefix", args, 0)?),
        ))
    })?;
    registry.register_native("is_substr", str2_bool, NullPolicy::Propagate, |args| {
        Ok(Value::Boolean(
            string_arg("is_substr", args, 1)?.contains(string_arg("is_substr", args, 0)?),
        ))
    })?;

    let str_str = Signature::fixed(&[ValueType::String], ValueType::String);
    registry.register_native("lower", str_str.clone(), NullPolicy::Propagate, |args| {
        Ok(Value::String(string_arg("lower", args, 0)?.to_lowercase()))
    })?;
    registry.register_native("upper", str_str, NullPolicy::Propagate, |args| {
        Ok(Value::String(string_arg("upper", args, 0)?.to_uppercase()))
    })?;
    registry.register_native(
        "length",
        Signature::fixed(&[ValueType::String], ValueType::Int64),
        NullPolicy::Propagate,
        |args| Ok(Value::Int64(string_arg("length", args, 0)?.len() as i64)),
    )?;
    registry.register_native(
        "concat",
        Signature::fixed(&[ValueType::String], ValueType::String)
            .with_repeated(TypeSpec::Concrete(ValueType::String)),
        NullPolicy::Propagate,
        |args| {
            let mut out = String::new();
            for index in 0..args.len() {
                out.push_str(string_arg("concat", args, index)?);
            }
            Ok(Value::String(out))
        },
    )?;

    registry.register_native(
        "hash64",
        Signature::new(vec![TypeSpec::Any], TypeSpec::Concrete(ValueType::Uint64)).with_repeated(TypeSpec::Any),
        NullPolicy::Aware,
        |args| Ok(Value::Uint64(hash64(args))),
    )?;

    register_regex_functions(registry)?;
    register_timestamp_functions(registry)?;

    registry.register_native(
        "list_contains",
        Signature::new(
            vec![TypeSpec::Concrete(ValueType::Any), TypeSpec::Any],
            TypeSpec::Concrete(ValueType::Boolean),
        ),
        NullPolicy::Propagate,
        |args| match &args[0] {
            Value::Any(JsonValue::Array(items)) => {
                let needle = args[1].to_json();
                Ok(Value::Boolean(items.iter().any(|item| {
                    item == &needle
                        || matches!((item.as_f64(), needle.as_f64()), (Some(a), Some(b)) if a == b)
                })))
            }
            other => Err(FunctionError::invalid_argument(
                "list_contains",
                format!("Expected a list, got {}", other),
            )),
        },
    )?;

    Ok(())
}

fn register_regex_functions(registry: &mut FunctionRegistry) -> FunctionResult<()> {
    let cache = Arc::new(RegexCache::default());
    let match_sig = Signature::fixed(&[ValueType::String, ValueType::String], ValueType::Boolean);
    let rewrite_sig = Signature::fixed(
        &[ValueType::String, ValueType::String, ValueType::String],
        ValueType::String,
    );

    let c = cache.clone();
    registry.register_native("regex_full_match", match_sig.clone(), NullPolicy::Propagate, move |args| {
        let name = "regex_full_match";
        let anchored = format!("^(?:{})$", string_arg(name, args, 0)?);
        let regex = c.get(name, &anchored)?;
        Ok(Value::Boolean(regex.is_match(string_arg(name, args, 1)?)))
    })?;

    let c = cache.clone();
    registry.register_native("regex_partial_match", match_sig, NullPolicy::Propagate, move |args| {
        let name = "regex_partial_match";
        let regex = c.get(name, string_arg(name, args, 0)?)?;
        Ok(Value::Boolean(regex.is_match(string_arg(name, args, 1)?)))
    })?;

    let c = cache.clone();
    registry.register_native("regex_replace_first", rewrite_sig.clone(), NullPolicy::Propagate, move |args| {
        let name = "regex_replace_first";
        let regex = c.get(name, string_arg(name, args, 0)?)?;
        let template = rewrite_template(string_arg(name, args, 2)?);
        Ok(Value::String(
            regex.replace(string_arg(name, args, 1)?, template.as_str()).into_owned(),
        ))
    })?;

    let c = cache.clone();
    registry.register_native("regex_replace_all", rewrite_sig.clone(), NullPolicy::Propagate, move |args| {
        let name = "regex_replace_all";
        let regex = c.get(name, string_arg(name, args, 0)?)?;
        let template = rewrite_template(string_arg(name, args, 2)?);
        Ok(Value::String(
            regex.replace_all(string_arg(name, args, 1)?, template.as_str()).into_owned(),
        ))
    })?;

    let c = cache;
    registry.register_native("regex_extract", rewrite_sig, NullPolicy::Propagate, move |args| {
        let name = "regex_extract";
        let regex = c.get(name, string_arg(name, args, 0)?)?;
        let template = rewrite_template(string_arg(name, args, 2)?);
        let mut out = String::new();
        if let Some(caps) = regex.captures(string_arg(name, args, 1)?) {
            caps.expand(&template, &mut out);
        }
        Ok(Value::String(out))
    })?;

    registry.register_native(
        "regex_escape",
        Signature::fixed(&[ValueType::String], ValueType::String),
        NullPolicy::Propagate,
        |args| Ok(Value::String(regex::escape(string_arg("regex_escape", args, 0)?))),
    )?;
    Ok(())
}

fn register_timestamp_functions(registry: &mut FunctionRegistry) -> FunctionResult<()> {
    registry.register_native(
        "format_timestamp",
        Signature::fixed(&[ValueType::Int64, ValueType::String], ValueType::String),
        NullPolicy::Propagate,
        |args| {
            let name = "format_timestamp";
            let ts = timestamp(name, int_arg(name, args, 0)?)?;
            let format = string_arg(name, args, 1)?;
            let items: Vec<_> = chrono::format::StrftimeItems::new(format).collect();
            if items.iter().any(|item| matches!(item, chrono::format::Item::Error)) {
                return Err(FunctionError::invalid_argument(name, format!("Bad format \"{}\"", format)));
            }
            Ok(Value::String(ts.format_with_items(items.into_iter()).to_string()))
        },
    )?;

    for unit in ["hour", "day", "week", "month", "year"] {
        let name = format!("timestamp_floor_{}", unit);
        let function_name = name.clone();
        registry.register_native(
            &name,
            Signature::fixed(&[ValueType::Int64], ValueType::Int64),
            NullPolicy::Propagate,
            move |args| {
                let seconds = int_arg(&function_name, args, 0)?;
                Ok(Value::Int64(floor_timestamp(&function_name, seconds, unit)?))
            },
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: Vec<Value>) -> FunctionResult<Value> {
        let registry = FunctionRegistry::builtin();
        registry
            .scalar(name)
            .unwrap_or_else(|| panic!("missing {}", name))
            .invoke(&args)
    }

    #[test]
    fn test_null_propagation_and_awareness() {
        assert_eq!(call("lower", vec![Value::Null]).unwrap(), Value::Null);
        assert_eq!(call("is_null", vec![Value::Null]).unwrap(), Value::Boolean(true));
        assert_eq!(call("is_null", vec![Value::Int64(1)]).unwrap(), Value::Boolean(false));
    }

    #[test]
    fn test_casts() {
        assert_eq!(call("int64", vec![Value::Double(4.7)]).unwrap(), Value::Int64(4));
        assert_eq!(call("double", vec![Value::String("2.5".into())]).unwrap(), Value::Double(2.5));
        assert!(matches!(
            call("int64", vec![Value::String("abc".into())]),
            Err(FunctionError::Cast(_))
        ));
        assert!(matches!(
            call("uint64", vec![Value::Int64(-1)]),
            Err(FunctionError::Cast(_))
        ));
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(
            call("is_prefix", vec!["ab".into(), "abc".into()]).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            call("is_substr", vec!["x".into(), "abc".into()]).unwrap(),
            Value::Boolean(false)
        );
        assert_eq!(
            call("concat", vec!["a".into(), "b".into(), "c".into()]).unwrap(),
            Value::from("abc")
        );
        assert_eq!(call("length", vec!["abcd".into()]).unwrap(), Value::Int64(4));
        assert_eq!(
            call("numeric_to_string", vec![Value::Double(3.0)]).unwrap(),
            Value::from("3.0")
        );
    }

    #[test]
    fn test_hash64_is_stable_and_null_aware() {
        let a = call("hash64", vec![Value::Int64(1), Value::Null]).unwrap();
        let b = call("hash64", vec![Value::Int64(1), Value::Null]).unwrap();
        let c = call("hash64", vec![Value::Uint64(1), Value::Null]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(matches!(a, Value::Uint64(_)));
    }

    #[test]
    fn test_regex_functions() {
        assert_eq!(
            call("regex_full_match", vec!["a.c".into(), "abc".into()]).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            call("regex_full_match", vec!["a.c".into(), "abcd".into()]).unwrap(),
            Value::Boolean(false)
        );
        assert_eq!(
            call("regex_partial_match", vec!["b".into(), "abc".into()]).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            call("regex_replace_all", vec!["(\\d)".into(), "a1b2".into(), "<\\1>".into()]).unwrap(),
            Value::from("a<1>b<2>")
        );
        assert_eq!(
            call("regex_replace_first", vec!["\\d".into(), "a1b2".into(), "_".into()]).unwrap(),
            Value::from("a_b2")
        );
        assert_eq!(
            call("regex_extract", vec!["([a-z]+)@(\\w+)".into(), "x foo@bar".into(), "\\2/\\1".into()])
                .unwrap(),
            Value::from("bar/foo")
        );
        assert!(matches!(
            call("regex_partial_match", vec!["(".into(), "abc".into()]),
            Err(FunctionError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_timestamp_functions() {
        // 2021-03-17T13:45:10Z, a Wednesday
        let ts = 1_615_988_710i64;
        assert_eq!(
            call("timestamp_floor_hour", vec![Value::Int64(ts)]).unwrap(),
            Value::Int64(1_615_986_000)
        );
        assert_eq!(
            call("timestamp_floor_day", vec![Value::Int64(ts)]).unwrap(),
            Value::Int64(1_615_939_200)
        );
        assert_eq!(
            call("timestamp_floor_week", vec![Value::Int64(ts)]).unwrap(),
            Value::Int64(1_615_766_400)
        );
        assert_eq!(
            call("timestamp_floor_month", vec![Value::Int64(ts)]).unwrap(),
            Value::Int64(1_614_556_800)
        );
        assert_eq!(
            call("timestamp_floor_year", vec![Value::Int64(ts)]).unwrap(),
            Value::Int64(1_609_459_200)
        );
        assert_eq!(
            call("format_timestamp", vec![Value::Int64(ts), "%Y-%m-%d".into()]).unwrap(),
            Value::from("2021-03-17")
        );
    }

    #[test]
    fn test_list_contains() {
        let list = Value::Any(serde_json::json!([1, 2, "x"]));
        assert_eq!(
            call("list_contains", vec![list.clone(), Value::Int64(2)]).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            call("list_contains", vec![list, Value::from("y")]).unwrap(),
            Value::Boolean(false)
        );
    }

    #[test]
    fn test_rewrite_template() {
        assert_eq!(rewrite_template("\\1-\\2"), "${1}-${2}");
        assert_eq!(rewrite_template("$5"), "$$5");
    }
}
