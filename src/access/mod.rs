//! Value access layer.
//!
//! A [`ValueNode`] wraps one value reached from a data context together with
//! the way it was reached. Navigation is read-only. Mutations change the
//! node's own copy and [`ValueNode::commit`] writes the result back along the
//! parent chain, stopping at the first shared host record (which was updated
//! in place) or at the root binding.

mod methods;
pub mod path;

use crate::context::DataContext;
use crate::error::{AccessError, RuleResult, TypeError};
use crate::fact::MethodReturn;
use crate::value::{MapKey, Value};

pub use path::{PathSegment, VariablePath};

#[derive(Debug, Clone)]
enum Origin {
    Root(String),
    Field(Box<ValueNode>, String),
    Index(Box<ValueNode>, usize),
    Key(Box<ValueNode>, MapKey),
    Detached,
}

/// One value plus its navigation context.
#[derive(Debug, Clone)]
pub struct ValueNode {
    value: Value,
    origin: Origin,
    label: String,
    dirty: bool,
}

impl ValueNode {
    /// A node for a root binding of a data context.
    pub fn root(name: impl Into<String>, value: Value) -> Self {
        let name = name.into();
        Self {
            value,
            label: name.clone(),
            origin: Origin::Root(name),
            dirty: false,
        }
    }

    /// A node for a computed value that has no storage location.
    #[must_use]
    pub fn detached(value: Value) -> Self {
        Self {
            label: value.to_string(),
            value,
            origin: Origin::Detached,
            dirty: false,
        }
    }

    #[must_use]
    pub const fn value(&self) -> &Value {
        &self.value
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Human-readable path such as `actor.Friends[0].Name`.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns true when mutations on this node can be committed.
    #[must_use]
    pub fn is_addressable(&self) -> bool {
        self.value.is_object() || !matches!(self.origin, Origin::Detached)
    }

    /// Returns true when the node holds uncommitted changes.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub const fn is_array(&self) -> bool {
        self.value.is_array()
    }

    pub const fn is_map(&self) -> bool {
        self.value.is_map()
    }

    pub const fn is_object(&self) -> bool {
        self.value.is_object()
    }

    pub const fn is_string(&self) -> bool {
        self.value.is_string()
    }

    pub const fn is_integer(&self) -> bool {
        self.value.is_integer()
    }

    pub const fn is_real(&self) -> bool {
        self.value.is_real()
    }

    pub const fn is_bool(&self) -> bool {
        self.value.is_bool()
    }

    pub const fn is_time(&self) -> bool {
        self.value.is_time()
    }

    pub const fn is_nil(&self) -> bool {
        self.value.is_null()
    }

    fn shape_error(&self, expected: &'static str) -> AccessError {
        AccessError::ShapeMismatch {
            path: self.label.clone(),
            expected,
            actual: self.value.type_name(),
        }
    }

    /// Resolves `.name` on a record, or on a map with string keys.
    pub fn field(&self, name: &str) -> Result<Self, AccessError> {
        let value = match &self.value {
            Value::Object(fact) => fact.read(&self.label)?.get_field(name),
            Value::Map(map) => map.get(&MapKey::from(name)).cloned(),
            _ => return Err(self.shape_error("object")),
        };
        let value = value.ok_or_else(|| AccessError::MissingField {
            path: self.label.clone(),
            field: name.to_string(),
        })?;
        Ok(Self {
            value,
            origin: Origin::Field(Box::new(self.clone()), name.to_string()),
            label: format!("{}.{name}", self.label),
            dirty: false,
        })
    }

    fn checked_index(&self, index: i64, len: usize) -> Result<usize, AccessError> {
        usize::try_from(index)
            .ok()
            .filter(|i| *i < len)
            .ok_or_else(|| AccessError::IndexOutOfBounds {
                path: self.label.clone(),
                index,
                len,
            })
    }

    /// Resolves `[index]` on an array.
    pub fn index(&self, index: i64) -> Result<Self, AccessError> {
        let Value::Array(items) = &self.value else {
            return Err(self.shape_error("array"));
        };
        let i = self.checked_index(index, items.len())?;
        Ok(Self {
            value: items[i].clone(),
            origin: Origin::Index(Box::new(self.clone()), i),
            label: format!("{}[{i}]", self.label),
            dirty: false,
        })
    }

    /// Resolves `[key]` on a map.
    pub fn key(&self, key: &MapKey) -> Result<Self, AccessError> {
        let Value::Map(map) = &self.value else {
            return Err(self.shape_error("map"));
        };
        let value = map.get(key).cloned().ok_or_else(|| AccessError::MissingKey {
            path: self.label.clone(),
            key: key.to_string(),
        })?;
        Ok(Self {
            value,
            origin: Origin::Key(Box::new(self.clone()), key.clone()),
            label: format!("{}[{key}]", self.label),
            dirty: false,
        })
    }

    /// Resolves a `[selector]` whose kind decides between index and key.
    pub fn select(&self, selector: &Value) -> RuleResult<Self> {
        match &self.value {
            Value::Array(_) => {
                let index = selector.as_i64().ok_or(TypeError::Mismatch {
                    expected: "integer index",
                    actual: selector.type_name(),
                })?;
                Ok(self.index(index)?)
            }
            Value::Map(_) => Ok(self.key(&MapKey::from_value(selector)?)?),
            _ => Err(self.shape_error("array or map").into()),
        }
    }

    fn ensure_addressable(&self) -> Result<(), AccessError> {
        if self.is_addressable() {
            Ok(())
        } else {
            Err(AccessError::NotAddressable {
                path: self.label.clone(),
            })
        }
    }

    /// Sets a field on a record, or an entry of a string-keyed map.
    ///
    /// Numbers are coerced to the kind the field currently holds.
    pub fn set_field(&mut self, name: &str, value: Value) -> Result<(), AccessError> {
        self.ensure_addressable()?;
        match &mut self.value {
            Value::Object(fact) => {
                let mut guard = fact.write(&self.label)?;
                let value = match guard.get_field(name) {
                    Some(current) => value.coerce_like(&current),
                    None => value,
                };
                guard.set_field(name, value)
            }
            Value::Map(map) => {
                let key = MapKey::from(name);
                let value = match map.get(&key) {
                    Some(current) => value.coerce_like(current),
                    None => value,
                };
                map.insert(key, value);
                self.dirty = true;
                Ok(())
            }
            _ => Err(self.shape_error("object")),
        }
    }

    /// Sets an element of an array.
    pub fn set_index(&mut self, index: i64, value: Value) -> Result<(), AccessError> {
        self.ensure_addressable()?;
        let len = match &self.value {
            Value::Array(items) => items.len(),
            _ => return Err(self.shape_error("array")),
        };
        let i = self.checked_index(index, len)?;
        if let Value::Array(items) = &mut self.value {
            items[i] = value.coerce_like(&items[i]);
            self.dirty = true;
        }
        Ok(())
    }

    /// Sets an entry of a map.
    pub fn set_key(&mut self, key: MapKey, value: Value) -> Result<(), AccessError> {
        self.ensure_addressable()?;
        if !self.value.is_map() {
            return Err(self.shape_error("map"));
        }
        if let Value::Map(map) = &mut self.value {
            let value = match map.get(&key) {
                Some(current) => value.coerce_like(current),
                None => value,
            };
            map.insert(key, value);
            self.dirty = true;
        }
        Ok(())
    }

    /// Sets the element or entry a selector addresses.
    pub fn set_selected(&mut self, selector: &Value, value: Value) -> RuleResult<()> {
        match &self.value {
            Value::Array(_) => {
                let index = selector.as_i64().ok_or(TypeError::Mismatch {
                    expected: "integer index",
                    actual: selector.type_name(),
                })?;
                Ok(self.set_index(index, value)?)
            }
            Value::Map(_) => Ok(self.set_key(MapKey::from_value(selector)?, value)?),
            _ => Err(self.shape_error("array or map").into()),
        }
    }

    /// Appends values to an array.
    pub fn append(&mut self, values: &[Value]) -> RuleResult<()> {
        self.ensure_addressable()?;
        let label = self.label.clone();
        match &mut self.value {
            Value::Array(items) => {
                let (_, changed) = methods::call_array(&label, items, "Append", values)?;
                self.dirty |= changed;
                Ok(())
            }
            _ => Err(self.shape_error("array").into()),
        }
    }

    /// Replaces the whole value held at this node's location.
    pub fn set_value(&mut self, value: Value) -> Result<(), AccessError> {
        if matches!(self.origin, Origin::Detached) {
            return Err(AccessError::NotAddressable {
                path: self.label.clone(),
            });
        }
        self.value = value.coerce_like(&self.value);
        self.dirty = true;
        Ok(())
    }

    /// Calls a method exposed by the underlying value.
    ///
    /// Strings, arrays and maps expose fixed built-in sets; records delegate
    /// to [`crate::Fact::call_method`] and may return at most one value.
    pub fn call(&mut self, method: &str, args: &[Value]) -> RuleResult<Value> {
        let label = self.label.clone();
        match &mut self.value {
            Value::String(s) => methods::call_string(&label, s, method, args),
            Value::Array(items) => {
                let (value, changed) = methods::call_array(&label, items, method, args)?;
                if changed {
                    self.ensure_addressable()?;
                    self.dirty = true;
                }
                Ok(value)
            }
            Value::Map(map) => {
                let (value, changed) = methods::call_map(&label, map, method, args)?;
                if changed {
                    self.ensure_addressable()?;
                    self.dirty = true;
                }
                Ok(value)
            }
            Value::Object(fact) => match fact.write(&label)?.call_method(method, args)? {
                MethodReturn::None => Ok(Value::Null),
                MethodReturn::One(value) => Ok(value),
                MethodReturn::Many(values) => Err(TypeError::MultipleReturn {
                    method: method.to_string(),
                    count: values.len(),
                }
                .into()),
            },
            other => Err(AccessError::UnknownMethod {
                path: format!("{label} ({})", other.type_name()),
                method: method.to_string(),
            }
            .into()),
        }
    }

    /// Writes pending changes back to where this value came from.
    pub fn commit(self, ctx: &mut DataContext) -> Result<(), AccessError> {
        let mut node = self;
        loop {
            if !node.dirty {
                return Ok(());
            }
            let parent = match node.origin {
                Origin::Root(name) => {
                    ctx.rebind(&name, node.value);
                    return Ok(());
                }
                Origin::Detached => {
                    return Err(AccessError::NotAddressable { path: node.label });
                }
                Origin::Field(parent, field) => {
                    let mut parent = *parent;
                    parent.set_field(&field, node.value)?;
                    parent
                }
                Origin::Index(parent, index) => {
                    let mut parent = *parent;
                    #[allow(clippy::cast_possible_wrap)]
                    parent.set_index(index as i64, node.value)?;
                    parent
                }
                Origin::Key(parent, key) => {
                    let mut parent = *parent;
                    parent.set_key(key, node.value)?;
                    parent
                }
            };
            // Writes into a shared record leave the parent clean.
            node = parent;
        }
    }
}
