//! Data context: the named facts one run operates on.

use std::collections::BTreeMap;

use crate::access::{PathSegment, ValueNode, VariablePath};
use crate::error::{AccessError, RuleError, RuleResult};
use crate::fact::{Fact, FactRef};
use crate::value::Value;

/// Named bindings visible to rules during a run.
#[derive(Debug, Default, Clone)]
pub struct DataContext {
    bindings: BTreeMap<String, Value>,
    complete: bool,
}

impl DataContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a value under `name`, replacing any previous binding.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.bindings.insert(name.into(), value.into());
    }

    /// Binds a shared host record under `name`.
    pub fn add_fact(&mut self, name: impl Into<String>, fact: FactRef) {
        self.bindings.insert(name.into(), Value::Object(fact));
    }

    /// Wraps `fact` in a new shared handle, binds it and returns the handle.
    pub fn add_owned<T: Fact>(&mut self, name: impl Into<String>, fact: T) -> FactRef {
        let handle = FactRef::new(fact);
        self.add_fact(name, handle.clone());
        handle
    }

    /// Decodes a JSON document and binds the resulting tree under `name`.
    pub fn add_json(&mut self, name: impl Into<String>, json: &[u8]) -> RuleResult<()> {
        let decoded: serde_json::Value = serde_json::from_slice(json)
            .map_err(|e| RuleError::configuration(format!("invalid JSON fact: {e}")))?;
        self.bindings.insert(name.into(), Value::from(decoded));
        Ok(())
    }

    /// Removes a binding, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.bindings.remove(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Names of all bindings, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    /// The root node for one binding.
    pub fn root(&self, name: &str) -> Result<ValueNode, AccessError> {
        self.bindings
            .get(name)
            .map(|v| ValueNode::root(name, v.clone()))
            .ok_or_else(|| AccessError::UnknownFact {
                name: name.to_string(),
            })
    }

    /// Resolves a dotted/bracketed path such as `Order.Lines[0].Price`.
    pub fn get(&self, path: &str) -> Result<ValueNode, AccessError> {
        self.resolve(&VariablePath::parse(path)?)
    }

    /// Resolves an already parsed path.
    pub fn resolve(&self, path: &VariablePath) -> Result<ValueNode, AccessError> {
        let mut node = self.root(path.root_name())?;
        for segment in path.segments() {
            node = match segment {
                PathSegment::Field(name) => node.field(name)?,
                PathSegment::Index(i) => match node.value() {
                    Value::Map(_) => node.key(&(*i).into())?,
                    _ => node.index(*i)?,
                },
                PathSegment::Key(key) => node.key(key)?,
                PathSegment::Any => {
                    return Err(AccessError::InvalidPath {
                        path: path.to_string(),
                        reason: "wildcard selectors cannot be resolved".to_string(),
                    })
                }
            };
        }
        Ok(node)
    }

    pub(crate) fn rebind(&mut self, name: &str, value: Value) {
        self.bindings.insert(name.to_string(), value);
    }

    /// Asks the engine to stop after the rule currently firing.
    pub fn complete(&mut self) {
        self.complete = true;
    }

    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.complete
    }

    pub(crate) fn reset_complete(&mut self) {
        self.complete = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_get() {
        let mut ctx = DataContext::new();
        ctx.add("Limit", 10_i64);
        ctx.add("Names", vec!["a", "b"]);
        assert!(ctx.contains("Limit"));
        assert_eq!(ctx.get("Limit").unwrap().value(), &Value::from(10_i64));
        assert_eq!(ctx.get("Names[1]").unwrap().value(), &Value::from("b"));
        assert_eq!(ctx.names().collect::<Vec<_>>(), vec!["Limit", "Names"]);
    }

    #[test]
    fn test_unknown_binding() {
        let ctx = DataContext::new();
        assert!(matches!(ctx.get("Missing.Field"), Err(AccessError::UnknownFact { .. })));
        assert!(matches!(ctx.get("1abc"), Err(AccessError::InvalidPath { .. })));
    }

    #[test]
    fn test_add_json() {
        let mut ctx = DataContext::new();
        ctx.add_json("Doc", br#"{"user":{"name":"Ada","roles":["admin"]},"1":"one"}"#)
            .unwrap();
        assert_eq!(ctx.get("Doc.user.name").unwrap().value(), &Value::from("Ada"));
        assert_eq!(ctx.get(r#"Doc["user"].roles[0]"#).unwrap().value(), &Value::from("admin"));
        assert!(ctx.add_json("Bad", b"{not json").is_err());
    }

    #[test]
    fn test_complete_flag() {
        let mut ctx = DataContext::new();
        assert!(!ctx.is_complete());
        ctx.complete();
        assert!(ctx.is_complete());
        ctx.reset_complete();
        assert!(!ctx.is_complete());
    }
}
