//! Methods exposed by strings, arrays and maps.

use std::collections::{BTreeMap, HashMap};
use std::sync::{OnceLock, RwLock};

use regex::Regex;

use crate::error::{AccessError, RuleError, RuleResult, TypeError};
use crate::math;
use crate::value::{MapKey, Value};

const REGEX_CACHE_MAX: usize = 1024;

static REGEX_CACHE: OnceLock<RwLock<HashMap<String, Regex>>> = OnceLock::new();

fn cached_regex(pattern: &str) -> RuleResult<Regex> {
    let cache = REGEX_CACHE.get_or_init(|| RwLock::new(HashMap::new()));

    {
        let guard = cache
            .read()
            .map_err(|_| RuleError::internal("regex cache lock poisoned"))?;
        if let Some(re) = guard.get(pattern) {
            return Ok(re.clone());
        }
    }

    let compiled = Regex::new(pattern).map_err(|e| TypeError::InvalidArgument {
        function: "MatchString".to_string(),
        position: 0,
        reason: format!("invalid regex '{pattern}': {e}"),
    })?;

    let mut guard = cache
        .write()
        .map_err(|_| RuleError::internal("regex cache lock poisoned"))?;
    if guard.len() >= REGEX_CACHE_MAX {
        guard.clear();
    }
    guard
        .entry(pattern.to_string())
        .or_insert_with(|| compiled.clone());
    Ok(compiled)
}

fn expect_arity(method: &str, args: &[Value], expected: usize) -> Result<(), AccessError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(AccessError::Arity {
            function: method.to_string(),
            expected: expected.to_string(),
            actual: args.len(),
        })
    }
}

fn str_arg<'a>(method: &str, args: &'a [Value], position: usize) -> Result<&'a str, TypeError> {
    args[position].as_str().ok_or_else(|| TypeError::InvalidArgument {
        function: method.to_string(),
        position,
        reason: format!("expected string, got {}", args[position].type_name()),
    })
}

fn int_arg(method: &str, args: &[Value], position: usize) -> Result<i64, TypeError> {
    args[position].as_i64().ok_or_else(|| TypeError::InvalidArgument {
        function: method.to_string(),
        position,
        reason: format!("expected integer, got {}", args[position].type_name()),
    })
}

#[allow(clippy::cast_possible_wrap)]
fn position(found: Option<usize>) -> Value {
    Value::from(found.map_or(-1, |i| i as i64))
}

#[allow(clippy::cast_possible_wrap)]
fn length(len: usize) -> Value {
    Value::from(len as i64)
}

fn unknown(path: &str, method: &str) -> RuleError {
    AccessError::UnknownMethod {
        path: path.to_string(),
        method: method.to_string(),
    }
    .into()
}

/// Invokes a string method. Strings are immutable, so nothing is written back.
pub(crate) fn call_string(path: &str, s: &str, method: &str, args: &[Value]) -> RuleResult<Value> {
    let value = match method {
        "Len" => {
            expect_arity(method, args, 0)?;
            length(s.len())
        }
        "Compare" => {
            expect_arity(method, args, 1)?;
            let other = str_arg(method, args, 0)?;
            Value::from(match s.cmp(other) {
                std::cmp::Ordering::Less => -1_i64,
                std::cmp::Ordering::Equal => 0,
                std::cmp::Ordering::Greater => 1,
            })
        }
        "Contains" => {
            expect_arity(method, args, 1)?;
            Value::from(s.contains(str_arg(method, args, 0)?))
        }
        "Count" => {
            expect_arity(method, args, 1)?;
            let needle = str_arg(method, args, 0)?;
            if needle.is_empty() {
                length(s.chars().count() + 1)
            } else {
                length(s.matches(needle).count())
            }
        }
        "HasPrefix" => {
            expect_arity(method, args, 1)?;
            Value::from(s.starts_with(str_arg(method, args, 0)?))
        }
        "HasSuffix" => {
            expect_arity(method, args, 1)?;
            Value::from(s.ends_with(str_arg(method, args, 0)?))
        }
        "Index" => {
            expect_arity(method, args, 1)?;
            position(s.find(str_arg(method, args, 0)?))
        }
        "LastIndex" => {
            expect_arity(method, args, 1)?;
            position(s.rfind(str_arg(method, args, 0)?))
        }
        "Repeat" => {
            expect_arity(method, args, 1)?;
            let times = int_arg(method, args, 0)?;
            let times = usize::try_from(times).map_err(|_| TypeError::InvalidArgument {
                function: method.to_string(),
                position: 0,
                reason: format!("negative repeat count {times}"),
            })?;
            Value::from(s.repeat(times))
        }
        "Replace" => {
            expect_arity(method, args, 2)?;
            Value::from(s.replace(str_arg(method, args, 0)?, str_arg(method, args, 1)?))
        }
        "Split" => {
            expect_arity(method, args, 1)?;
            let sep = str_arg(method, args, 0)?;
            Value::Array(s.split(sep).map(Value::from).collect())
        }
        "ToLower" => {
            expect_arity(method, args, 0)?;
            Value::from(s.to_lowercase())
        }
        "ToUpper" => {
            expect_arity(method, args, 0)?;
            Value::from(s.to_uppercase())
        }
        "Trim" => {
            expect_arity(method, args, 0)?;
            Value::from(s.trim())
        }
        "In" => {
            let mut found = false;
            for i in 0..args.len() {
                if str_arg(method, args, i)? == s {
                    found = true;
                    break;
                }
            }
            Value::from(found)
        }
        "MatchString" => {
            expect_arity(method, args, 1)?;
            let re = cached_regex(str_arg(method, args, 0)?)?;
            Value::from(re.is_match(s))
        }
        _ => return Err(unknown(path, method)),
    };
    Ok(value)
}

/// Invokes an array method. The flag reports whether `items` changed.
pub(crate) fn call_array(
    path: &str,
    items: &mut Vec<Value>,
    method: &str,
    args: &[Value],
) -> RuleResult<(Value, bool)> {
    match method {
        "Len" => {
            expect_arity(method, args, 0)?;
            Ok((length(items.len()), false))
        }
        "Append" => {
            let template = items.first().cloned();
            items.extend(args.iter().cloned().map(|v| match &template {
                Some(t) => v.coerce_like(t),
                None => v,
            }));
            Ok((Value::Null, !args.is_empty()))
        }
        "Clear" => {
            expect_arity(method, args, 0)?;
            let changed = !items.is_empty();
            items.clear();
            Ok((Value::Null, changed))
        }
        _ => Err(unknown(path, method)),
    }
}

/// Invokes a map method. The flag reports whether `map` changed.
pub(crate) fn call_map(
    path: &str,
    map: &mut BTreeMap<MapKey, Value>,
    method: &str,
    args: &[Value],
) -> RuleResult<(Value, bool)> {
    match method {
        "Len" => {
            expect_arity(method, args, 0)?;
            Ok((length(map.len()), false))
        }
        "Clear" => {
            expect_arity(method, args, 0)?;
            let changed = !map.is_empty();
            map.clear();
            Ok((Value::Null, changed))
        }
        "EqualValues" => {
            expect_arity(method, args, 0)?;
            let mut values = map.values();
            let all_equal = match values.next() {
                Some(first) => values.all(|v| math::equals(first, v).unwrap_or(false)),
                None => false,
            };
            Ok((Value::from(all_equal), false))
        }
        "CountValue" => {
            expect_arity(method, args, 1)?;
            let count = map
                .values()
                .filter(|v| math::equals(v, &args[0]).unwrap_or(false))
                .count();
            Ok((length(count), false))
        }
        _ => Err(unknown(path, method)),
    }
}
