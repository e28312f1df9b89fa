//! Values that facts and rule expressions operate on.
//!
//! Host data crosses into the engine as a [`Value`]. Scalars, containers and
//! times are held by value; host records are held through a shared
//! [`FactRef`] so rule mutations are visible to the host after a run.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::fact::FactRef;

/// The ten numeric kinds a host field can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

/// How a value of one numeric kind converts into another.
///
/// Conversions follow native `as` semantics: floats truncate toward zero
/// (saturating at the target bounds, NaN becomes zero) and integers of
/// different signedness reinterpret bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Coercion {
    /// Same kind.
    Identity,
    /// Target is wider than the source.
    Widen,
    /// Target is narrower than the source; high bits are discarded.
    Narrow,
    /// Same width, different signedness.
    Reinterpret,
    /// Float to integer, toward zero.
    Truncate,
    /// Integer to float.
    ToFloat,
}

impl NumericKind {
    /// Every numeric kind, in declaration order.
    pub const ALL: [Self; 10] = [
        Self::I8,
        Self::I16,
        Self::I32,
        Self::I64,
        Self::U8,
        Self::U16,
        Self::U32,
        Self::U64,
        Self::F32,
        Self::F64,
    ];

    /// Storage width in bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::I8 | Self::U8 => 8,
            Self::I16 | Self::U16 => 16,
            Self::I32 | Self::U32 | Self::F32 => 32,
            Self::I64 | Self::U64 | Self::F64 => 64,
        }
    }

    #[must_use]
    pub const fn is_signed(self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32 | Self::I64)
    }

    #[must_use]
    pub const fn is_unsigned(self) -> bool {
        matches!(self, Self::U8 | Self::U16 | Self::U32 | Self::U64)
    }

    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    #[must_use]
    pub const fn is_integer(self) -> bool {
        !self.is_float()
    }

    /// Looks up the conversion rule from `self` into `target`.
    #[must_use]
    pub const fn coercion(self, target: Self) -> Coercion {
        if self as u8 == target as u8 {
            return Coercion::Identity;
        }
        match (self.is_float(), target.is_float()) {
            (true, false) => Coercion::Truncate,
            (false, true) => Coercion::ToFloat,
            (true, true) => {
                if target.bits() > self.bits() {
                    Coercion::Widen
                } else {
                    Coercion::Narrow
                }
            }
            (false, false) => {
                if target.bits() > self.bits() {
                    Coercion::Widen
                } else if target.bits() < self.bits() {
                    Coercion::Narrow
                } else {
                    Coercion::Reinterpret
                }
            }
        }
    }

    /// Short lowercase name, used in diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::F32 => "f32",
            Self::F64 => "f64",
        }
    }
}

impl fmt::Display for NumericKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A number tagged with its host kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Number {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
}

macro_rules! cast_number {
    ($n:expr, $t:ty) => {
        match $n {
            $crate::value::Number::I8(v) => v as $t,
            $crate::value::Number::I16(v) => v as $t,
            $crate::value::Number::I32(v) => v as $t,
            $crate::value::Number::I64(v) => v as $t,
            $crate::value::Number::U8(v) => v as $t,
            $crate::value::Number::U16(v) => v as $t,
            $crate::value::Number::U32(v) => v as $t,
            $crate::value::Number::U64(v) => v as $t,
            $crate::value::Number::F32(v) => v as $t,
            $crate::value::Number::F64(v) => v as $t,
        }
    };
}

pub(crate) use cast_number;

impl Number {
    #[must_use]
    pub const fn kind(&self) -> NumericKind {
        match self {
            Self::I8(_) => NumericKind::I8,
            Self::I16(_) => NumericKind::I16,
            Self::I32(_) => NumericKind::I32,
            Self::I64(_) => NumericKind::I64,
            Self::U8(_) => NumericKind::U8,
            Self::U16(_) => NumericKind::U16,
            Self::U32(_) => NumericKind::U32,
            Self::U64(_) => NumericKind::U64,
            Self::F32(_) => NumericKind::F32,
            Self::F64(_) => NumericKind::F64,
        }
    }

    /// Converts into `kind` following [`NumericKind::coercion`].
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_possible_wrap, clippy::cast_lossless, clippy::cast_precision_loss)]
    pub fn cast(self, kind: NumericKind) -> Self {
        match kind {
            NumericKind::I8 => Self::I8(cast_number!(self, i8)),
            NumericKind::I16 => Self::I16(cast_number!(self, i16)),
            NumericKind::I32 => Self::I32(cast_number!(self, i32)),
            NumericKind::I64 => Self::I64(cast_number!(self, i64)),
            NumericKind::U8 => Self::U8(cast_number!(self, u8)),
            NumericKind::U16 => Self::U16(cast_number!(self, u16)),
            NumericKind::U32 => Self::U32(cast_number!(self, u32)),
            NumericKind::U64 => Self::U64(cast_number!(self, u64)),
            NumericKind::F32 => Self::F32(cast_number!(self, f32)),
            NumericKind::F64 => Self::F64(cast_number!(self, f64)),
        }
    }

    /// The value as `i64` (native `as` semantics).
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_lossless)]
    pub fn as_i64(self) -> i64 {
        cast_number!(self, i64)
    }

    /// The value as `u64` (native `as` semantics).
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_lossless)]
    pub fn as_u64(self) -> u64 {
        cast_number!(self, u64)
    }

    /// The value promoted to `f64`.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_lossless)]
    pub fn as_f64(self) -> f64 {
        cast_number!(self, f64)
    }

    #[must_use]
    pub const fn is_integer(&self) -> bool {
        self.kind().is_integer()
    }

    #[must_use]
    pub const fn is_float(&self) -> bool {
        self.kind().is_float()
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        match self.kind() {
            NumericKind::F32 | NumericKind::F64 => self.as_f64() == 0.0,
            _ => self.as_u64() == 0,
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I8(v) => write!(f, "{v}"),
            Self::I16(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::U8(v) => write!(f, "{v}"),
            Self::U16(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::F32(v) => write!(f, "{v:.6}"),
            Self::F64(v) => write!(f, "{v:.6}"),
        }
    }
}

/// Key of a map value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MapKey {
    Bool(bool),
    Int(i64),
    UInt(u64),
    String(String),
}

impl MapKey {
    /// Converts a selector value into a key.
    ///
    /// Integers that fit in `i64` always map to [`MapKey::Int`] so that a key
    /// reached through different integer kinds finds the same entry.
    pub fn from_value(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::String(s) => Ok(Self::String(s.clone())),
            Value::Number(n) if n.is_integer() => Ok(Self::from_number(*n)),
            other => Err(TypeError::Mismatch {
                expected: "map key",
                actual: other.type_name(),
            }),
        }
    }

    fn from_number(n: Number) -> Self {
        match n {
            Number::U64(v) => i64::try_from(v).map_or(Self::UInt(v), Self::Int),
            other => Self::Int(other.as_i64()),
        }
    }

    /// The key as a value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Number(Number::I64(*i)),
            Self::UInt(u) => Value::Number(Number::U64(*u)),
            Self::String(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::UInt(u) => write!(f, "{u}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<&str> for MapKey {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for MapKey {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for MapKey {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// A value reachable from a data context.
///
/// # Examples
///
/// ```
/// use salience::Value;
///
/// let count = Value::from(3_i64);
/// let name = Value::from("Ada");
///
/// assert!(count.is_integer());
/// assert!(name.is_string());
/// assert_eq!(format!("{name}+{count}"), "Ada+3");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Time(DateTime<Utc>),
    Array(Vec<Value>),
    Map(BTreeMap<MapKey, Value>),
    Object(FactRef),
}

impl Value {
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool(_))
    }

    pub const fn is_number(&self) -> bool {
        matches!(self, Self::Number(_))
    }

    pub const fn is_integer(&self) -> bool {
        matches!(self, Self::Number(n) if n.is_integer())
    }

    pub const fn is_real(&self) -> bool {
        matches!(self, Self::Number(n) if n.is_float())
    }

    pub const fn is_string(&self) -> bool {
        matches!(self, Self::String(_))
    }

    pub const fn is_time(&self) -> bool {
        matches!(self, Self::Time(_))
    }

    pub const fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    pub const fn is_map(&self) -> bool {
        matches!(self, Self::Map(_))
    }

    pub const fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_number(&self) -> Option<Number> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_number().filter(Number::is_integer).map(Number::as_i64)
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_number().map(Number::as_f64)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Time(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_map(&self) -> Option<&BTreeMap<MapKey, Value>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    pub const fn as_object(&self) -> Option<&FactRef> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Short name of the value's kind, used in diagnostics.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(n) => n.kind().name(),
            Self::String(_) => "string",
            Self::Time(_) => "time",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
            Self::Object(_) => "object",
        }
    }

    /// Returns true for the zero value of the value's kind.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Bool(b) => !b,
            Self::Number(n) => n.is_zero(),
            Self::String(s) => s.is_empty(),
            Self::Time(t) => t.timestamp() == 0 && t.timestamp_subsec_nanos() == 0,
            Self::Array(a) => a.is_empty(),
            Self::Map(m) => m.is_empty(),
            Self::Object(_) => false,
        }
    }

    /// Numeric coercion into the kind of `target`, when both sides are numbers.
    ///
    /// Non-numeric pairings return `self` unchanged.
    #[must_use]
    pub fn coerce_like(self, target: &Self) -> Self {
        match (&self, target) {
            (Self::Number(n), Self::Number(t)) => Self::Number(n.cast(t.kind())),
            _ => self,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("nil"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
            Self::Time(t) => f.write_str(&t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Map(map) => {
                f.write_str("map[")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{k}:{v}")?;
                }
                f.write_str("]")
            }
            Self::Object(o) => write!(f, "{o}"),
        }
    }
}

macro_rules! impl_from_number {
    ($($t:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(value: $t) -> Self {
                    Self::Number(Number::$variant(value))
                }
            }

            impl From<$t> for Number {
                fn from(value: $t) -> Self {
                    Self::$variant(value)
                }
            }
        )+
    };
}

impl_from_number!(
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

impl From<Number> for Value {
    fn from(value: Number) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Time(value)
    }
}

impl From<FactRef> for Value {
    fn from(value: FactRef) -> Self {
        Self::Object(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Self::Array(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Number(Number::I64(i))
                } else if let Some(u) = n.as_u64() {
                    Self::Number(Number::U64(u))
                } else {
                    Self::Number(Number::F64(n.as_f64().unwrap_or(f64::NAN)))
                }
            }
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            serde_json::Value::Object(fields) => Self::Map(
                fields
                    .into_iter()
                    .map(|(k, v)| (MapKey::String(k), Self::from(v)))
                    .collect(),
            ),
        }
    }
}
