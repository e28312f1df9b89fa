//! Time builtins. All times are UTC.

use chrono::format::{Item, StrftimeItems};
use chrono::{Datelike, TimeZone, Timelike, Utc};

use crate::ast::Session;
use crate::error::{RuleResult, TypeError};
use crate::value::Value;

use super::{int_arg, str_arg, time_arg, Arity, Builtin};

pub(super) const BUILTINS: &[Builtin] = &[
    Builtin { name: "Now", arity: Arity::Exact(0), volatile: true, func: now },
    Builtin { name: "MakeTime", arity: Arity::Exact(6), volatile: false, func: make_time },
    Builtin { name: "GetTimeYear", arity: Arity::Exact(1), volatile: false, func: year },
    Builtin { name: "GetTimeMonth", arity: Arity::Exact(1), volatile: false, func: month },
    Builtin { name: "GetTimeDay", arity: Arity::Exact(1), volatile: false, func: day },
    Builtin { name: "GetTimeHour", arity: Arity::Exact(1), volatile: false, func: hour },
    Builtin { name: "GetTimeMinute", arity: Arity::Exact(1), volatile: false, func: minute },
    Builtin { name: "GetTimeSecond", arity: Arity::Exact(1), volatile: false, func: second },
    Builtin { name: "IsTimeBefore", arity: Arity::Exact(2), volatile: false, func: is_before },
    Builtin { name: "IsTimeAfter", arity: Arity::Exact(2), volatile: false, func: is_after },
    Builtin { name: "TimeFormat", arity: Arity::Exact(2), volatile: false, func: format },
];

fn now(_session: &mut Session<'_>, _args: &[Value]) -> RuleResult<Value> {
    Ok(Value::Time(Utc::now()))
}

fn component<T: TryFrom<i64>>(args: &[Value], position: usize) -> Result<T, TypeError> {
    let raw = int_arg("MakeTime", args, position)?;
    T::try_from(raw).map_err(|_| TypeError::InvalidArgument {
        function: "MakeTime".to_string(),
        position,
        reason: format!("{raw} is out of range"),
    })
}

fn make_time(_session: &mut Session<'_>, args: &[Value]) -> RuleResult<Value> {
    let time = Utc
        .with_ymd_and_hms(
            component(args, 0)?,
            component(args, 1)?,
            component(args, 2)?,
            component(args, 3)?,
            component(args, 4)?,
            component(args, 5)?,
        )
        .single()
        .ok_or_else(|| TypeError::InvalidArgument {
            function: "MakeTime".to_string(),
            position: 0,
            reason: "not a valid calendar date and time".to_string(),
        })?;
    Ok(Value::Time(time))
}

macro_rules! getter {
    ($($fn_name:ident => $builtin:literal, $method:ident);+ $(;)?) => {
        $(
            fn $fn_name(_session: &mut Session<'_>, args: &[Value]) -> RuleResult<Value> {
                let time = time_arg($builtin, args, 0)?;
                Ok(Value::from(i64::from(time.$method())))
            }
        )+
    };
}

getter! {
    year => "GetTimeYear", year;
    month => "GetTimeMonth", month;
    day => "GetTimeDay", day;
    hour => "GetTimeHour", hour;
    minute => "GetTimeMinute", minute;
    second => "GetTimeSecond", second;
}

fn is_before(_session: &mut Session<'_>, args: &[Value]) -> RuleResult<Value> {
    let time = time_arg("IsTimeBefore", args, 0)?;
    let other = time_arg("IsTimeBefore", args, 1)?;
    Ok(Value::Bool(time < other))
}

fn is_after(_session: &mut Session<'_>, args: &[Value]) -> RuleResult<Value> {
    let time = time_arg("IsTimeAfter", args, 0)?;
    let other = time_arg("IsTimeAfter", args, 1)?;
    Ok(Value::Bool(time > other))
}

fn format(_session: &mut Session<'_>, args: &[Value]) -> RuleResult<Value> {
    let time = time_arg("TimeFormat", args, 0)?;
    let layout = str_arg("TimeFormat", args, 1)?;
    let items: Vec<Item<'_>> = StrftimeItems::new(layout).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(TypeError::InvalidArgument {
            function: "TimeFormat".to_string(),
            position: 1,
            reason: format!("invalid layout '{layout}'"),
        }
        .into());
    }
    Ok(Value::String(time.format_with_items(items.into_iter()).to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::tests::invoke;

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().map(|v| Value::from(*v)).collect()
    }

    #[test]
    fn test_make_time_and_getters() {
        let t = invoke("MakeTime", &ints(&[2024, 2, 29, 13, 45, 7])).unwrap();
        assert_eq!(invoke("GetTimeYear", &[t.clone()]).unwrap(), Value::from(2024_i64));
        assert_eq!(invoke("GetTimeMonth", &[t.clone()]).unwrap(), Value::from(2_i64));
        assert_eq!(invoke("GetTimeDay", &[t.clone()]).unwrap(), Value::from(29_i64));
        assert_eq!(invoke("GetTimeHour", &[t.clone()]).unwrap(), Value::from(13_i64));
        assert_eq!(invoke("GetTimeMinute", &[t.clone()]).unwrap(), Value::from(45_i64));
        assert_eq!(invoke("GetTimeSecond", &[t]).unwrap(), Value::from(7_i64));
    }

    #[test]
    fn test_make_time_rejects_impossible_dates() {
        assert!(invoke("MakeTime", &ints(&[2023, 2, 29, 0, 0, 0])).unwrap_err().is_type());
        assert!(invoke("MakeTime", &ints(&[2023, -1, 1, 0, 0, 0])).unwrap_err().is_type());
    }

    #[test]
    fn test_ordering_and_format() {
        let early = invoke("MakeTime", &ints(&[2020, 1, 1, 0, 0, 0])).unwrap();
        let late = invoke("Now", &[]).unwrap();
        assert_eq!(invoke("IsTimeBefore", &[early.clone(), late.clone()]).unwrap(), Value::Bool(true));
        assert_eq!(invoke("IsTimeAfter", &[early.clone(), late]).unwrap(), Value::Bool(false));
        assert_eq!(
            invoke("TimeFormat", &[early.clone(), Value::from("%Y-%m-%d %H:%M")]).unwrap(),
            Value::from("2020-01-01 00:00")
        );
        assert!(invoke("TimeFormat", &[early, Value::from("%Q")]).is_err());
        assert!(invoke("GetTimeYear", &[Value::from("2020")]).is_err());
    }
}
