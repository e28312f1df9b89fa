//! Host facts.
//!
//! The engine never reflects over host types. A host record opts in by
//! implementing [`Fact`], which exposes its fields and methods by name.
//! Records are shared with the engine through a [`FactRef`], so a host keeps
//! its own handle and reads the results once a run completes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use crate::error::{AccessError, TypeError};
use crate::value::{cast_number, MapKey, NumericKind, Value};

/// What a host method produced.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodReturn {
    /// The method returns nothing.
    None,
    /// The method returns one value.
    One(Value),
    /// The method returns several values. Rules cannot consume these.
    Many(Vec<Value>),
}

impl From<Value> for MethodReturn {
    fn from(value: Value) -> Self {
        Self::One(value)
    }
}

/// Capability interface implemented by host records.
///
/// `get_field` and `set_field` address fields by their rule-visible name.
/// Methods are optional; the default implementation reports an unknown
/// method.
pub trait Fact: Send + Sync + 'static {
    /// Name of the host type, for diagnostics.
    fn type_name(&self) -> &'static str;

    /// Rule-visible field names.
    fn field_names(&self) -> Vec<&'static str>;

    /// Reads a field. `None` when the field does not exist.
    fn get_field(&self, name: &str) -> Option<Value>;

    /// Writes a field, converting `value` into the field's type.
    fn set_field(&mut self, name: &str, value: Value) -> Result<(), AccessError>;

    /// Invokes a named method.
    fn call_method(&mut self, name: &str, args: &[Value]) -> Result<MethodReturn, AccessError> {
        let _ = args;
        Err(AccessError::UnknownMethod {
            path: self.type_name().to_string(),
            method: name.to_string(),
        })
    }
}

/// Shared handle to a host fact.
///
/// Equality is identity: two handles are equal when they point to the same
/// record.
#[derive(Clone)]
pub struct FactRef(Arc<RwLock<dyn Fact>>);

impl FactRef {
    /// Wraps a fact the engine will own together with the returned handle.
    pub fn new<T: Fact>(fact: T) -> Self {
        Self(Arc::new(RwLock::new(fact)))
    }

    /// Wraps a fact the host already shares.
    pub fn from_shared<T: Fact>(fact: Arc<RwLock<T>>) -> Self {
        Self(fact)
    }

    pub(crate) fn read(&self, path: &str) -> Result<RwLockReadGuard<'_, dyn Fact>, AccessError> {
        self.0.read().map_err(|_| AccessError::Poisoned {
            path: path.to_string(),
        })
    }

    pub(crate) fn write(&self, path: &str) -> Result<RwLockWriteGuard<'_, dyn Fact>, AccessError> {
        self.0.write().map_err(|_| AccessError::Poisoned {
            path: path.to_string(),
        })
    }

    /// Returns true when both handles point to the same record.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.0).cast::<()>(),
            Arc::as_ptr(&other.0).cast::<()>(),
        )
    }

    /// Host type name, or `"<poisoned>"` if the record's lock is poisoned.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.0.read().map_or("<poisoned>", |guard| guard.type_name())
    }
}

impl PartialEq for FactRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for FactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FactRef").field(&self.type_name()).finish()
    }
}

impl fmt::Display for FactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "&{}", self.type_name())
    }
}

/// Conversion from an engine value into a host field type.
pub trait FromValue: Sized {
    /// Converts `value`, coercing numerics through the numeric table.
    fn from_value(value: Value) -> Result<Self, TypeError>;
}

macro_rules! impl_from_value_number {
    ($($t:ty => $kind:ident),+ $(,)?) => {
        $(
            impl FromValue for $t {
                fn from_value(value: Value) -> Result<Self, TypeError> {
                    match value {
                        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_possible_wrap, clippy::cast_lossless, clippy::cast_precision_loss)]
                        Value::Number(n) => Ok(cast_number!(n, $t)),
                        other => Err(TypeError::Mismatch {
                            expected: NumericKind::$kind.name(),
                            actual: other.type_name(),
                        }),
                    }
                }
            }
        )+
    };
}

impl_from_value_number!(
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
);

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        Ok(value)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        value.as_bool().ok_or(TypeError::Mismatch {
            expected: "bool",
            actual: value.type_name(),
        })
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(TypeError::Mismatch {
                expected: "string",
                actual: other.type_name(),
            }),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        value.as_time().ok_or(TypeError::Mismatch {
            expected: "time",
            actual: value.type_name(),
        })
    }
}

impl FromValue for FactRef {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Object(o) => Ok(o),
            other => Err(TypeError::Mismatch {
                expected: "object",
                actual: other.type_name(),
            }),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Array(items) => items.into_iter().map(T::from_value).collect(),
            other => Err(TypeError::Mismatch {
                expected: "array",
                actual: other.type_name(),
            }),
        }
    }
}

impl<T: FromValue> FromValue for BTreeMap<String, T> {
    fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Map(entries) => entries
                .into_iter()
                .map(|(k, v)| {
                    let key = match k {
                        MapKey::String(s) => s,
                        other => other.to_string(),
                    };
                    T::from_value(v).map(|v| (key, v))
                })
                .collect(),
            other => Err(TypeError::Mismatch {
                expected: "map",
                actual: other.type_name(),
            }),
        }
    }
}

#[doc(hidden)]
pub fn assign_field<T: FromValue>(
    slot: &mut T,
    value: Value,
    type_name: &'static str,
    field: &str,
) -> Result<(), AccessError> {
    *slot = T::from_value(value).map_err(|e| AccessError::NotSettable {
        path: type_name.to_string(),
        field: field.to_string(),
        reason: e.to_string(),
    })?;
    Ok(())
}

/// Implements the field part of [`Fact`] for a plain struct.
///
/// Each entry maps a rule-visible name to a struct field. Field types must
/// implement `Clone`, `Into<Value>` and [`FromValue`].
///
/// ```
/// use salience::{impl_fact, Fact, Value};
///
/// #[derive(Default)]
/// struct Order {
///     total: f64,
///     items: i64,
/// }
///
/// impl_fact!(Order { "Total" => total, "Items" => items });
///
/// let mut order = Order::default();
/// order.set_field("Items", Value::from(2.9_f64)).unwrap();
/// assert_eq!(order.items, 2);
/// ```
#[macro_export]
macro_rules! impl_fact {
    ($ty:ident { $($name:literal => $field:ident),+ $(,)? }) => {
        impl $crate::Fact for $ty {
            fn type_name(&self) -> &'static str {
                stringify!($ty)
            }

            fn field_names(&self) -> Vec<&'static str> {
                vec![$($name),+]
            }

            fn get_field(&self, name: &str) -> Option<$crate::Value> {
                match name {
                    $($name => Some($crate::Value::from(self.$field.clone())),)+
                    _ => None,
                }
            }

            fn set_field(
                &mut self,
                name: &str,
                value: $crate::Value,
            ) -> Result<(), $crate::AccessError> {
                match name {
                    $($name => $crate::fact::assign_field(&mut self.$field, value, stringify!($ty), name),)+
                    _ => Err($crate::AccessError::MissingField {
                        path: stringify!($ty).to_string(),
                        field: name.to_string(),
                    }),
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Sensor {
        reading: u16,
        label: String,
        offsets: Vec<i32>,
    }

    crate::impl_fact!(Sensor {
        "Reading" => reading,
        "Label" => label,
        "Offsets" => offsets,
    });

    #[test]
    fn test_macro_get_and_set() {
        let mut sensor = Sensor::default();
        sensor.set_field("Reading", Value::from(-1_i64)).unwrap();
        assert_eq!(sensor.reading, u16::MAX);
        sensor.set_field("Label", Value::from("north")).unwrap();
        assert_eq!(sensor.get_field("Label"), Some(Value::from("north")));
        sensor
            .set_field("Offsets", Value::from(vec![1.7_f64, -2.2]))
            .unwrap();
        assert_eq!(sensor.offsets, vec![1, -2]);
        assert!(sensor.get_field("Missing").is_none());
        assert_eq!(sensor.field_names(), vec!["Reading", "Label", "Offsets"]);
    }

    #[test]
    fn test_macro_rejects_wrong_kind() {
        let mut sensor = Sensor::default();
        let err = sensor.set_field("Label", Value::from(3_i64)).unwrap_err();
        assert!(matches!(err, AccessError::NotSettable { .. }));
        let err = sensor.set_field("Nope", Value::Null).unwrap_err();
        assert!(matches!(err, AccessError::MissingField { .. }));
    }

    #[test]
    fn test_fact_ref_identity() {
        let shared = Arc::new(RwLock::new(Sensor::default()));
        let a = FactRef::from_shared(Arc::clone(&shared));
        let b = a.clone();
        let c = FactRef::new(Sensor::default());
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.type_name(), "Sensor");

        a.write("Sensor").unwrap().set_field("Reading", Value::from(7_u8)).unwrap();
        assert_eq!(shared.read().unwrap().reading, 7);
    }

    #[test]
    fn test_default_method_is_unknown() {
        let mut sensor = Sensor::default();
        let err = sensor.call_method("Reset", &[]).unwrap_err();
        assert!(matches!(err, AccessError::UnknownMethod { .. }));
    }
}
