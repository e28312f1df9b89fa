//! Floating point math builtins. Every argument may be any numeric kind;
//! results are `f64` unless noted.

use crate::ast::Session;
use crate::error::RuleResult;
use crate::value::Value;

use super::{float_arg, int_arg, Arity, Builtin};

macro_rules! unary {
    ($($fn_name:ident => $builtin:literal, $op:expr);+ $(;)?) => {
        $(
            fn $fn_name(_session: &mut Session<'_>, args: &[Value]) -> RuleResult<Value> {
                let x = float_arg($builtin, args, 0)?;
                let op: fn(f64) -> f64 = $op;
                Ok(Value::from(op(x)))
            }
        )+
    };
}

unary! {
    abs => "Abs", f64::abs;
    ceil => "Ceil", f64::ceil;
    floor => "Floor", f64::floor;
    round => "Round", f64::round;
    trunc => "Trunc", f64::trunc;
    sqrt => "Sqrt", f64::sqrt;
    log10 => "Log10", f64::log10;
    log2 => "Log2", f64::log2;
    exp => "Exp", f64::exp;
    sin => "Sin", f64::sin;
    cos => "Cos", f64::cos;
    tan => "Tan", f64::tan;
}

pub(super) const BUILTINS: &[Builtin] = &[
    Builtin { name: "Max", arity: Arity::AtLeast(0), volatile: false, func: max },
    Builtin { name: "Min", arity: Arity::AtLeast(0), volatile: false, func: min },
    Builtin { name: "Abs", arity: Arity::Exact(1), volatile: false, func: abs },
    Builtin { name: "Ceil", arity: Arity::Exact(1), volatile: false, func: ceil },
    Builtin { name: "Floor", arity: Arity::Exact(1), volatile: false, func: floor },
    Builtin { name: "Round", arity: Arity::Exact(1), volatile: false, func: round },
    Builtin { name: "Trunc", arity: Arity::Exact(1), volatile: false, func: trunc },
    Builtin { name: "Sqrt", arity: Arity::Exact(1), volatile: false, func: sqrt },
    Builtin { name: "Pow", arity: Arity::Exact(2), volatile: false, func: pow },
    Builtin { name: "Mod", arity: Arity::Exact(2), volatile: false, func: modulo },
    Builtin { name: "Log10", arity: Arity::Exact(1), volatile: false, func: log10 },
    Builtin { name: "Log2", arity: Arity::Exact(1), volatile: false, func: log2 },
    Builtin { name: "Exp", arity: Arity::Exact(1), volatile: false, func: exp },
    Builtin { name: "Sin", arity: Arity::Exact(1), volatile: false, func: sin },
    Builtin { name: "Cos", arity: Arity::Exact(1), volatile: false, func: cos },
    Builtin { name: "Tan", arity: Arity::Exact(1), volatile: false, func: tan },
    Builtin { name: "IsNaN", arity: Arity::Exact(1), volatile: false, func: is_nan },
    Builtin { name: "IsInf", arity: Arity::Exact(2), volatile: false, func: is_inf },
];

fn fold(function: &str, args: &[Value], pick: fn(f64, f64) -> f64) -> RuleResult<Value> {
    let mut result: Option<f64> = None;
    for position in 0..args.len() {
        let x = float_arg(function, args, position)?;
        result = Some(result.map_or(x, |acc| pick(acc, x)));
    }
    Ok(Value::from(result.unwrap_or(0.0)))
}

/// Largest argument, or zero without arguments.
fn max(_session: &mut Session<'_>, args: &[Value]) -> RuleResult<Value> {
    fold("Max", args, f64::max)
}

fn min(_session: &mut Session<'_>, args: &[Value]) -> RuleResult<Value> {
    fold("Min", args, f64::min)
}

fn pow(_session: &mut Session<'_>, args: &[Value]) -> RuleResult<Value> {
    let base = float_arg("Pow", args, 0)?;
    let exponent = float_arg("Pow", args, 1)?;
    Ok(Value::from(base.powf(exponent)))
}

// Remainder carries the sign of the dividend.
fn modulo(_session: &mut Session<'_>, args: &[Value]) -> RuleResult<Value> {
    let x = float_arg("Mod", args, 0)?;
    let y = float_arg("Mod", args, 1)?;
    Ok(Value::from(x % y))
}

fn is_nan(_session: &mut Session<'_>, args: &[Value]) -> RuleResult<Value> {
    Ok(Value::Bool(float_arg("IsNaN", args, 0)?.is_nan()))
}

/// `IsInf(x, sign)`: positive sign checks +inf, negative -inf, zero either.
fn is_inf(_session: &mut Session<'_>, args: &[Value]) -> RuleResult<Value> {
    let x = float_arg("IsInf", args, 0)?;
    let sign = int_arg("IsInf", args, 1)?;
    let hit = match sign.signum() {
        1 => x.is_infinite() && x.is_sign_positive(),
        -1 => x.is_infinite() && x.is_sign_negative(),
        _ => x.is_infinite(),
    };
    Ok(Value::Bool(hit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::tests::invoke;

    #[test]
    fn test_max_min_mixed_kinds() {
        let args = [Value::from(3_i32), Value::from(7.5_f64), Value::from(2_u64)];
        assert_eq!(invoke("Max", &args).unwrap(), Value::from(7.5_f64));
        assert_eq!(invoke("Min", &args).unwrap(), Value::from(2.0_f64));
        assert_eq!(invoke("Max", &[]).unwrap(), Value::from(0.0_f64));
        assert!(invoke("Min", &[Value::from("x")]).unwrap_err().is_type());
    }

    #[test]
    fn test_unary_functions() {
        assert_eq!(invoke("Abs", &[Value::from(-4_i64)]).unwrap(), Value::from(4.0_f64));
        assert_eq!(invoke("Floor", &[Value::from(2.7_f64)]).unwrap(), Value::from(2.0_f64));
        assert_eq!(invoke("Round", &[Value::from(2.5_f64)]).unwrap(), Value::from(3.0_f64));
        assert_eq!(invoke("Trunc", &[Value::from(-2.7_f64)]).unwrap(), Value::from(-2.0_f64));
        assert_eq!(invoke("Sqrt", &[Value::from(9_u8)]).unwrap(), Value::from(3.0_f64));
        assert_eq!(invoke("Log2", &[Value::from(8_i64)]).unwrap(), Value::from(3.0_f64));
    }

    #[test]
    fn test_binary_functions() {
        let pow = invoke("Pow", &[Value::from(2_i64), Value::from(10_i64)]).unwrap();
        assert_eq!(pow, Value::from(1024.0_f64));
        let rem = invoke("Mod", &[Value::from(-7.0_f64), Value::from(3_i64)]).unwrap();
        assert_eq!(rem, Value::from(-1.0_f64));
    }

    #[test]
    fn test_nan_and_inf_checks() {
        let inf = Value::from(f64::INFINITY);
        assert_eq!(invoke("IsInf", &[inf.clone(), Value::from(1_i64)]).unwrap(), Value::Bool(true));
        assert_eq!(invoke("IsInf", &[inf.clone(), Value::from(-1_i64)]).unwrap(), Value::Bool(false));
        assert_eq!(invoke("IsInf", &[inf, Value::from(0_i64)]).unwrap(), Value::Bool(true));
        assert_eq!(invoke("IsNaN", &[Value::from(f64::NAN)]).unwrap(), Value::Bool(true));
    }
}
