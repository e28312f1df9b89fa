//! Builtins that act on the running session: logging, rule retraction,
//! cache invalidation and run completion.

use std::fmt::Write as _;

use tracing::info;

use crate::access::VariablePath;
use crate::ast::Session;
use crate::error::RuleResult;
use crate::value::Value;

use super::{str_arg, Arity, Builtin};

pub(super) const BUILTINS: &[Builtin] = &[
    Builtin { name: "Log", arity: Arity::Exact(1), volatile: false, func: log },
    Builtin { name: "LogFormat", arity: Arity::AtLeast(1), volatile: false, func: log_format },
    Builtin { name: "Retract", arity: Arity::Exact(1), volatile: false, func: retract },
    Builtin { name: "Reinstate", arity: Arity::Exact(1), volatile: false, func: reinstate },
    Builtin { name: "Changed", arity: Arity::Exact(1), volatile: false, func: changed },
    Builtin { name: "Forget", arity: Arity::Exact(1), volatile: false, func: forget },
    Builtin { name: "Complete", arity: Arity::Exact(0), volatile: false, func: complete },
    Builtin { name: "IsNil", arity: Arity::Exact(1), volatile: false, func: is_nil },
    Builtin { name: "IsZero", arity: Arity::Exact(1), volatile: false, func: is_zero },
    Builtin { name: "StringContains", arity: Arity::Exact(2), volatile: false, func: string_contains },
];

fn emit(session: &Session<'_>, text: &str) {
    info!(
        target: "salience::rules",
        knowledge_base = session.knowledge_base(),
        rule = session.current_rule().unwrap_or_default(),
        "{text}"
    );
}

fn log(session: &mut Session<'_>, args: &[Value]) -> RuleResult<Value> {
    emit(session, &args[0].to_string());
    Ok(Value::Null)
}

fn log_format(session: &mut Session<'_>, args: &[Value]) -> RuleResult<Value> {
    let format = str_arg("LogFormat", args, 0)?;
    emit(session, &render(format, &args[1..]));
    Ok(Value::Null)
}

/// Printf-style rendering with `%v %s %d %f %q %t` verbs and `%%`.
pub(crate) fn render(format: &str, args: &[Value]) -> String {
    let mut out = String::with_capacity(format.len());
    let mut values = args.iter();
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some(verb @ ('v' | 's' | 'd' | 'f' | 'q' | 't')) => match values.next() {
                Some(value) => push_verb(&mut out, verb, value),
                None => {
                    let _ = write!(out, "%!{verb}(MISSING)");
                }
            },
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    let extra: Vec<String> = values.map(ToString::to_string).collect();
    if !extra.is_empty() {
        let _ = write!(out, "%!(EXTRA {})", extra.join(", "));
    }
    out
}

fn push_verb(out: &mut String, verb: char, value: &Value) {
    let _ = match (verb, value) {
        ('f', Value::Number(n)) => write!(out, "{:.6}", n.as_f64()),
        ('d', Value::Number(n)) => write!(out, "{}", n.as_i64()),
        ('q', Value::String(s)) => write!(out, "{s:?}"),
        _ => write!(out, "{value}"),
    };
}

fn retract(session: &mut Session<'_>, args: &[Value]) -> RuleResult<Value> {
    session.retract(str_arg("Retract", args, 0)?);
    Ok(Value::Null)
}

fn reinstate(session: &mut Session<'_>, args: &[Value]) -> RuleResult<Value> {
    session.reinstate(str_arg("Reinstate", args, 0)?);
    Ok(Value::Null)
}

fn invalidate(session: &mut Session<'_>, function: &str, args: &[Value]) -> RuleResult<Value> {
    let path = VariablePath::parse(str_arg(function, args, 0)?)?;
    session.changed(&path);
    Ok(Value::Null)
}

fn changed(session: &mut Session<'_>, args: &[Value]) -> RuleResult<Value> {
    invalidate(session, "Changed", args)
}

fn forget(session: &mut Session<'_>, args: &[Value]) -> RuleResult<Value> {
    invalidate(session, "Forget", args)
}

fn complete(session: &mut Session<'_>, _args: &[Value]) -> RuleResult<Value> {
    session.complete();
    Ok(Value::Null)
}

fn is_nil(_session: &mut Session<'_>, args: &[Value]) -> RuleResult<Value> {
    Ok(Value::Bool(args[0].is_null()))
}

fn is_zero(_session: &mut Session<'_>, args: &[Value]) -> RuleResult<Value> {
    Ok(Value::Bool(args[0].is_zero()))
}

fn string_contains(_session: &mut Session<'_>, args: &[Value]) -> RuleResult<Value> {
    let haystack = str_arg("StringContains", args, 0)?;
    let needle = str_arg("StringContains", args, 1)?;
    Ok(Value::Bool(haystack.contains(needle)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Action, Expr, RuleDef};
    use crate::builtins::{call, tests::invoke};
    use crate::context::DataContext;
    use crate::knowledge::KnowledgeBase;

    fn kb() -> KnowledgeBase {
        let mut kb = KnowledgeBase::new("Control", "1");
        for name in ["A", "B"] {
            kb.add_rule(&RuleDef::new(name).when(Expr::var("F").field("X").gt(0)))
                .unwrap();
        }
        kb
    }

    #[test]
    fn test_render_verbs() {
        let args = [Value::from("x"), Value::from(2.5_f64), Value::from(7_i64)];
        assert_eq!(render("%s=%f n=%d 100%%", &args), "x=2.500000 n=7 100%");
        assert_eq!(render("%v and %v", &args[..1]), "x and %!v(MISSING)");
        assert_eq!(render("only", &args[..1]), "only%!(EXTRA x)");
        assert_eq!(render("%q", &args[..1]), "\"x\"");
    }

    #[test]
    fn test_retract_and_reinstate() {
        let mut kb = kb();
        let mut data = DataContext::new();
        let mut session = kb.bind(&mut data);
        call(&mut session, "Retract", &[Value::from("B")]).unwrap();
        assert!(session.entries()[1].retracted);
        assert!(!session.entries()[0].retracted);
        call(&mut session, "Reinstate", &[Value::from("B")]).unwrap();
        assert!(!session.entries()[1].retracted);
        // Unknown names are ignored.
        call(&mut session, "Retract", &[Value::from("Nope")]).unwrap();
    }

    #[test]
    fn test_changed_invalidates_cached_reads() {
        let mut kb = kb();
        let mut data = DataContext::new();
        data.add("F", Value::Map(std::iter::once(("X".into(), Value::from(1_i64))).collect()));
        let when = kb.entries()[0].when;
        {
            let mut session = kb.bind(&mut data);
            assert!(session.evaluate_when(0).unwrap());
        }
        assert!(kb.rule_context().cached(when).is_some());
        {
            let mut session = kb.bind(&mut data);
            call(&mut session, "Changed", &[Value::from("F.X")]).unwrap();
        }
        assert!(kb.rule_context().cached(when).is_none());

        let err = invoke("Forget", &[Value::from("F[")]).unwrap_err();
        assert!(err.is_access());
    }

    #[test]
    fn test_complete_marks_data_context() {
        let mut kb = KnowledgeBase::new("Control", "1");
        kb.add_rule(&RuleDef::new("Stop").when(Expr::lit(true)).then(Action::call("Complete", [])))
            .unwrap();
        let mut data = DataContext::new();
        let mut session = kb.bind(&mut data);
        call(&mut session, "Complete", &[]).unwrap();
        assert!(data.is_complete());
    }

    #[test]
    fn test_nil_and_zero_checks() {
        assert_eq!(invoke("IsNil", &[Value::Null]).unwrap(), Value::Bool(true));
        assert_eq!(invoke("IsNil", &[Value::from(0_i64)]).unwrap(), Value::Bool(false));
        assert_eq!(invoke("IsZero", &[Value::from("")]).unwrap(), Value::Bool(true));
        assert_eq!(invoke("IsZero", &[Value::from(0.0_f64)]).unwrap(), Value::Bool(true));
        assert_eq!(invoke("IsZero", &[Value::from(3_u8)]).unwrap(), Value::Bool(false));
        assert_eq!(
            invoke("StringContains", &[Value::from("salience"), Value::from("lien")]).unwrap(),
            Value::Bool(true)
        );
        assert!(invoke("Log", &[Value::from(1_i64)]).is_ok());
    }
}
