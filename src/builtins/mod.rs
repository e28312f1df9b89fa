//! Built-in functions callable from rule expressions.
//!
//! The registry is a read-only name to function map built on first use.
//! Every call receives the running [`Session`] explicitly, so builtins that
//! retract rules or invalidate cached results act on that session only.

mod control;
mod math;
mod time;

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};

use crate::ast::Session;
use crate::error::{AccessError, RuleResult, TypeError};
use crate::value::Value;

/// Signature shared by every builtin.
pub type BuiltinFn = fn(&mut Session<'_>, &[Value]) -> RuleResult<Value>;

/// Accepted argument counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Between(usize, usize),
}

impl Arity {
    #[must_use]
    pub const fn accepts(self, count: usize) -> bool {
        match self {
            Self::Exact(n) => count == n,
            Self::AtLeast(n) => count >= n,
            Self::Between(lo, hi) => count >= lo && count <= hi,
        }
    }

    fn check(self, function: &str, count: usize) -> Result<(), AccessError> {
        if self.accepts(count) {
            return Ok(());
        }
        Err(AccessError::Arity {
            function: function.to_string(),
            expected: self.to_string(),
            actual: count,
        })
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(n) => write!(f, "{n}"),
            Self::AtLeast(n) => write!(f, "at least {n}"),
            Self::Between(lo, hi) => write!(f, "{lo} to {hi}"),
        }
    }
}

/// One registered builtin.
#[derive(Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub arity: Arity,
    /// Results differ between calls with equal arguments; never cached.
    pub volatile: bool,
    pub func: BuiltinFn,
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builtin")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("volatile", &self.volatile)
            .finish_non_exhaustive()
    }
}

static REGISTRY: OnceLock<HashMap<&'static str, Builtin>> = OnceLock::new();

fn registry() -> &'static HashMap<&'static str, Builtin> {
    REGISTRY.get_or_init(|| {
        control::BUILTINS
            .iter()
            .chain(time::BUILTINS)
            .chain(math::BUILTINS)
            .map(|b| (b.name, *b))
            .collect()
    })
}

/// Looks up a builtin by name.
#[must_use]
pub fn lookup(name: &str) -> Option<&'static Builtin> {
    registry().get(name)
}

/// Every registered name, sorted.
#[must_use]
pub fn names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = registry().keys().copied().collect();
    names.sort_unstable();
    names
}

pub(crate) fn is_volatile(name: &str) -> bool {
    lookup(name).is_some_and(|b| b.volatile)
}

pub(crate) fn call(session: &mut Session<'_>, name: &str, args: &[Value]) -> RuleResult<Value> {
    let builtin = lookup(name).ok_or_else(|| AccessError::UnknownFunction {
        name: name.to_string(),
    })?;
    builtin.arity.check(name, args.len())?;
    (builtin.func)(session, args)
}

fn invalid(function: &str, position: usize, expected: &str, actual: &Value) -> TypeError {
    TypeError::InvalidArgument {
        function: function.to_string(),
        position,
        reason: format!("expected {expected}, got {}", actual.type_name()),
    }
}

fn str_arg<'a>(function: &str, args: &'a [Value], position: usize) -> Result<&'a str, TypeError> {
    args[position]
        .as_str()
        .ok_or_else(|| invalid(function, position, "string", &args[position]))
}

fn int_arg(function: &str, args: &[Value], position: usize) -> Result<i64, TypeError> {
    args[position]
        .as_i64()
        .ok_or_else(|| invalid(function, position, "integer", &args[position]))
}

fn float_arg(function: &str, args: &[Value], position: usize) -> Result<f64, TypeError> {
    args[position]
        .as_f64()
        .ok_or_else(|| invalid(function, position, "number", &args[position]))
}

fn time_arg(function: &str, args: &[Value], position: usize) -> Result<DateTime<Utc>, TypeError> {
    args[position]
        .as_time()
        .ok_or_else(|| invalid(function, position, "time", &args[position]))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::context::DataContext;
    use crate::error::RuleError;
    use crate::knowledge::KnowledgeBase;

    /// Runs one builtin against an empty knowledge base.
    pub(crate) fn invoke(name: &str, args: &[Value]) -> RuleResult<Value> {
        let mut kb = KnowledgeBase::new("Builtins", "1");
        let mut data = DataContext::new();
        let mut session = kb.bind(&mut data);
        call(&mut session, name, args)
    }

    #[test]
    fn test_registry_lists_every_family() {
        let names = names();
        for name in ["Log", "Retract", "Changed", "Now", "MakeTime", "Max", "IsInf"] {
            assert!(names.contains(&name), "{name} missing");
        }
        assert!(is_volatile("Now"));
        assert!(!is_volatile("MakeTime"));
        assert!(!is_volatile("NoSuchThing"));
    }

    #[test]
    fn test_unknown_function_and_arity() {
        let err = invoke("Frobnicate", &[]).unwrap_err();
        assert!(matches!(err, RuleError::Access(AccessError::UnknownFunction { .. })));

        let err = invoke("IsNil", &[]).unwrap_err();
        assert_eq!(err.to_string(), "Access error: IsNil expects 1 argument(s), got 0");
    }

    #[test]
    fn test_arity_bounds() {
        assert!(Arity::Between(1, 2).accepts(2));
        assert!(!Arity::Between(1, 2).accepts(3));
        assert!(Arity::AtLeast(0).accepts(0));
        assert_eq!(Arity::AtLeast(1).to_string(), "at least 1");
    }
}
