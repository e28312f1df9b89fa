//! Operator semantics over [`Value`]s.
//!
//! Numeric promotion is table driven. Two integers of any kind are compared
//! exactly after widening to `i128`; any pairing that involves a float is
//! compared as `f64`. Arithmetic results land in `u64` when both operands are
//! unsigned, in `f64` when either is a float and in `i64` otherwise.

use std::cmp::Ordering;

use crate::error::TypeError;
use crate::value::{Number, NumericKind, Value};

/// Two numbers brought to a common representation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Promoted {
    /// Both operands are integers.
    Int(i128, i128),
    /// At least one operand is a float.
    Float(f64, f64),
}

fn widen(n: Number) -> i128 {
    if n.kind().is_unsigned() {
        i128::from(n.as_u64())
    } else {
        i128::from(n.as_i64())
    }
}

/// Promotes two numbers to a common representation for comparison.
#[must_use]
pub fn promote(left: Number, right: Number) -> Promoted {
    if left.is_integer() && right.is_integer() {
        Promoted::Int(widen(left), widen(right))
    } else {
        Promoted::Float(left.as_f64(), right.as_f64())
    }
}

/// Kind of the result of `+ - * %` between two numeric kinds.
#[must_use]
pub const fn arithmetic_kind(left: NumericKind, right: NumericKind) -> NumericKind {
    if left.is_float() || right.is_float() {
        NumericKind::F64
    } else if left.is_unsigned() && right.is_unsigned() {
        NumericKind::U64
    } else {
        NumericKind::I64
    }
}

/// `==` semantics.
///
/// Strings and booleans compare false against any other kind, `nil` equals
/// only `nil`, numbers compare after promotion and times by instant.
pub fn equals(left: &Value, right: &Value) -> Result<bool, TypeError> {
    match (left, right) {
        (Value::Null, Value::Null) => Ok(true),
        (Value::Null, _) | (_, Value::Null) => Ok(false),
        (Value::String(l), Value::String(r)) => Ok(l == r),
        (Value::String(_), _) | (_, Value::String(_)) => Ok(false),
        (Value::Bool(l), Value::Bool(r)) => Ok(l == r),
        (Value::Bool(_), _) | (_, Value::Bool(_)) => Ok(false),
        (Value::Number(l), Value::Number(r)) => Ok(match promote(*l, *r) {
            Promoted::Int(a, b) => a == b,
            #[allow(clippy::float_cmp)]
            Promoted::Float(a, b) => a == b,
        }),
        (Value::Time(l), Value::Time(r)) => Ok(l == r),
        (Value::Object(l), Value::Object(r)) => Ok(l.ptr_eq(r)),
        (Value::Array(l), Value::Array(r)) => {
            if l.len() != r.len() {
                return Ok(false);
            }
            for (a, b) in l.iter().zip(r) {
                if !equals(a, b).unwrap_or(false) {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Value::Map(l), Value::Map(r)) => {
            if l.len() != r.len() {
                return Ok(false);
            }
            for (k, a) in l {
                match r.get(k) {
                    Some(b) if equals(a, b).unwrap_or(false) => {}
                    _ => return Ok(false),
                }
            }
            Ok(true)
        }
        _ => Err(TypeError::IncompatibleOperands {
            op: "==",
            left: left.type_name(),
            right: right.type_name(),
        }),
    }
}

/// Ordering for `< <= > >=`. Only numbers and times are ordered.
///
/// `Ok(None)` means the operands are unordered (a NaN is involved).
pub fn compare(op: &'static str, left: &Value, right: &Value) -> Result<Option<Ordering>, TypeError> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => Ok(match promote(*l, *r) {
            Promoted::Int(a, b) => Some(a.cmp(&b)),
            Promoted::Float(a, b) => a.partial_cmp(&b),
        }),
        (Value::Time(l), Value::Time(r)) => Ok(Some(l.cmp(r))),
        _ => Err(TypeError::IncompatibleOperands {
            op,
            left: left.type_name(),
            right: right.type_name(),
        }),
    }
}

fn incompatible(op: &'static str, left: &Value, right: &Value) -> TypeError {
    TypeError::IncompatibleOperands {
        op,
        left: left.type_name(),
        right: right.type_name(),
    }
}

fn numeric_pair(op: &'static str, left: &Value, right: &Value) -> Result<(Number, Number), TypeError> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => Ok((*l, *r)),
        _ => Err(incompatible(op, left, right)),
    }
}

macro_rules! wrapping_arith {
    ($l:expr, $r:expr, $wrapping:ident, $float:tt) => {
        match arithmetic_kind($l.kind(), $r.kind()) {
            NumericKind::F64 => Number::F64($l.as_f64() $float $r.as_f64()),
            NumericKind::U64 => Number::U64($l.as_u64().$wrapping($r.as_u64())),
            _ => Number::I64($l.as_i64().$wrapping($r.as_i64())),
        }
    };
}

/// `+` semantics, including string concatenation.
pub fn add(left: &Value, right: &Value) -> Result<Value, TypeError> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => Ok(Value::Number(wrapping_arith!(l, r, wrapping_add, +))),
        (Value::String(l), Value::String(r)) => Ok(Value::String(format!("{l}{r}"))),
        (
            Value::String(_),
            Value::Number(_) | Value::Bool(_) | Value::Time(_),
        )
        | (
            Value::Number(_) | Value::Bool(_) | Value::Time(_),
            Value::String(_),
        ) => Ok(Value::String(format!("{left}{right}"))),
        _ => Err(incompatible("+", left, right)),
    }
}

/// `-` semantics.
pub fn sub(left: &Value, right: &Value) -> Result<Value, TypeError> {
    let (l, r) = numeric_pair("-", left, right)?;
    Ok(Value::Number(wrapping_arith!(l, r, wrapping_sub, -)))
}

/// `*` semantics.
pub fn mul(left: &Value, right: &Value) -> Result<Value, TypeError> {
    let (l, r) = numeric_pair("*", left, right)?;
    Ok(Value::Number(wrapping_arith!(l, r, wrapping_mul, *)))
}

/// `/` semantics. Division always yields `f64`; an integer zero divisor
/// is an error, a float zero follows IEEE 754.
pub fn div(left: &Value, right: &Value) -> Result<Value, TypeError> {
    let (l, r) = numeric_pair("/", left, right)?;
    if l.is_integer() && r.is_integer() && r.as_i64() == 0 {
        return Err(TypeError::DivisionByZero { op: "/" });
    }
    Ok(Value::Number(Number::F64(l.as_f64() / r.as_f64())))
}

fn integer_pair(op: &'static str, left: &Value, right: &Value) -> Result<(i64, i64), TypeError> {
    let (l, r) = numeric_pair(op, left, right)?;
    if l.is_float() || r.is_float() {
        return Err(incompatible(op, left, right));
    }
    Ok((l.as_i64(), r.as_i64()))
}

/// `%` semantics. Integers only.
pub fn rem(left: &Value, right: &Value) -> Result<Value, TypeError> {
    let (l, r) = integer_pair("%", left, right)?;
    if r == 0 {
        return Err(TypeError::DivisionByZero { op: "%" });
    }
    Ok(Value::Number(Number::I64(l.wrapping_rem(r))))
}

/// `&` semantics. Integers only.
pub fn bit_and(left: &Value, right: &Value) -> Result<Value, TypeError> {
    let (l, r) = integer_pair("&", left, right)?;
    Ok(Value::Number(Number::I64(l & r)))
}

/// `|` semantics. Integers only.
pub fn bit_or(left: &Value, right: &Value) -> Result<Value, TypeError> {
    let (l, r) = integer_pair("|", left, right)?;
    Ok(Value::Number(Number::I64(l | r)))
}

/// Operand of `&&`, `||` and `!`.
pub fn truthy(op: &'static str, value: &Value) -> Result<bool, TypeError> {
    value.as_bool().ok_or(TypeError::IncompatibleOperand {
        op,
        operand: value.type_name(),
    })
}
