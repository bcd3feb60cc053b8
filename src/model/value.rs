//! Closed set of property value kinds and typed decoding.

use std::fmt;

use serde::Serialize;
use smallvec::SmallVec;

use super::{NodePath, Token};

/// Inline capacity of [`Value::Vector`]; covers 2/3/4-component vectors and
/// quaternions without a heap allocation.
pub const VECTOR_INLINE: usize = 4;

pub type VectorData = SmallVec<[f64; VECTOR_INLINE]>;

/// Decoded property value.
///
/// Every value the backing store can hand us lands in exactly one of these
/// variants, so typed decoding is a total `match` rather than a runtime cast.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Token(Token),
    Vector(VectorData),
    /// Reference to another node.
    Path(NodePath),
}

/// Discriminant of [`Value`], used for declared property types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    String,
    Token,
    Vector,
    Path,
}

impl ValueKind {
    pub fn name(&self) -> &'static str {
        match self {
            ValueKind::Bool => "BOOL",
            ValueKind::Int => "INT",
            ValueKind::Float => "FLOAT",
            ValueKind::String => "STRING",
            ValueKind::Token => "TOKEN",
            ValueKind::Vector => "VECTOR",
            ValueKind::Path => "PATH",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::String(_) => ValueKind::String,
            Value::Token(_) => ValueKind::Token,
            Value::Vector(_) => ValueKind::Vector,
            Value::Path(_) => ValueKind::Path,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind().name()
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            Value::Token(t) => Some(t.as_str()),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            Value::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&NodePath> {
        match self {
            Value::Path(p) => Some(p),
            _ => None,
        }
    }
}

// ============================================================================
// Typed decoding
// ============================================================================

/// A Rust type that maps onto exactly one [`ValueKind`].
///
/// Equality (`PartialEq`) is what [`CachedValue`](crate::cache::CachedValue)
/// uses to suppress redundant writes; floats compare exactly.
pub trait PropertyValue: Clone + PartialEq + Send + Sync + 'static {
    /// `None` means "any kind" (only [`Value`] itself).
    const KIND: Option<ValueKind>;

    fn from_value(value: &Value) -> Option<Self>;

    fn into_value(self) -> Value;
}

impl PropertyValue for Value {
    const KIND: Option<ValueKind> = None;

    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }

    fn into_value(self) -> Value {
        self
    }
}

impl PropertyValue for bool {
    const KIND: Option<ValueKind> = Some(ValueKind::Bool);

    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }

    fn into_value(self) -> Value {
        Value::Bool(self)
    }
}

impl PropertyValue for i64 {
    const KIND: Option<ValueKind> = Some(ValueKind::Int);

    fn from_value(value: &Value) -> Option<Self> {
        value.as_int()
    }

    fn into_value(self) -> Value {
        Value::Int(self)
    }
}

impl PropertyValue for i32 {
    const KIND: Option<ValueKind> = Some(ValueKind::Int);

    fn from_value(value: &Value) -> Option<Self> {
        value.as_int().and_then(|i| i32::try_from(i).ok())
    }

    fn into_value(self) -> Value {
        Value::Int(self as i64)
    }
}

impl PropertyValue for f64 {
    const KIND: Option<ValueKind> = Some(ValueKind::Float);

    fn from_value(value: &Value) -> Option<Self> {
        value.as_float()
    }

    fn into_value(self) -> Value {
        Value::Float(self)
    }
}

impl PropertyValue for f32 {
    const KIND: Option<ValueKind> = Some(ValueKind::Float);

    fn from_value(value: &Value) -> Option<Self> {
        value.as_float().map(|f| f as f32)
    }

    fn into_value(self) -> Value {
        Value::Float(self as f64)
    }
}

impl PropertyValue for String {
    const KIND: Option<ValueKind> = Some(ValueKind::String);

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(s.clone()),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::String(self)
    }
}

impl PropertyValue for Token {
    const KIND: Option<ValueKind> = Some(ValueKind::Token);

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Token(t) => Some(t.clone()),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::Token(self)
    }
}

impl PropertyValue for NodePath {
    const KIND: Option<ValueKind> = Some(ValueKind::Path);

    fn from_value(value: &Value) -> Option<Self> {
        value.as_path().cloned()
    }

    fn into_value(self) -> Value {
        Value::Path(self)
    }
}

impl<const N: usize> PropertyValue for [f64; N] {
    const KIND: Option<ValueKind> = Some(ValueKind::Vector);

    fn from_value(value: &Value) -> Option<Self> {
        value.as_vector().and_then(|v| <[f64; N]>::try_from(v).ok())
    }

    fn into_value(self) -> Value {
        Value::Vector(SmallVec::from_slice(&self))
    }
}

impl<const N: usize> PropertyValue for [f32; N] {
    const KIND: Option<ValueKind> = Some(ValueKind::Vector);

    fn from_value(value: &Value) -> Option<Self> {
        let v = value.as_vector()?;
        if v.len() != N {
            return None;
        }
        let mut out = [0.0f32; N];
        for (dst, src) in out.iter_mut().zip(v) {
            *dst = *src as f32;
        }
        Some(out)
    }

    fn into_value(self) -> Value {
        Value::Vector(self.iter().map(|c| *c as f64).collect())
    }
}

// ============================================================================
// Conversions (From impls)
// ============================================================================

impl From<bool> for Value { fn from(v: bool) -> Self { Value::Bool(v) } }
impl From<i32> for Value { fn from(v: i32) -> Self { Value::Int(v as i64) } }
impl From<i64> for Value { fn from(v: i64) -> Self { Value::Int(v) } }
impl From<f32> for Value { fn from(v: f32) -> Self { Value::Float(v as f64) } }
impl From<f64> for Value { fn from(v: f64) -> Self { Value::Float(v) } }
impl From<String> for Value { fn from(v: String) -> Self { Value::String(v) } }
impl From<&str> for Value { fn from(v: &str) -> Self { Value::String(v.to_owned()) } }
impl From<Token> for Value { fn from(v: Token) -> Self { Value::Token(v) } }
impl From<NodePath> for Value { fn from(v: NodePath) -> Self { Value::Path(v) } }
impl<const N: usize> From<[f64; N]> for Value {
    fn from(v: [f64; N]) -> Self { Value::Vector(SmallVec::from_slice(&v)) }
}
impl<const N: usize> From<[f32; N]> for Value {
    fn from(v: [f32; N]) -> Self { v.into_value() }
}

// ============================================================================
// Display
// ============================================================================

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "\"{}\"", s.replace('"', "\\\"")),
            Value::Token(t) => write!(f, "{t}"),
            Value::Vector(v) => {
                write!(f, "(")?;
                for (i, c) in v.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{c}")?;
                }
                write!(f, ")")
            }
            Value::Path(p) => write!(f, "<{p}>"),
        }
    }
}
