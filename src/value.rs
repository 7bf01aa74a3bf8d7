//! The owned, schema-typed value graph.
//!
//! [`Value`] is the in-memory representation consumed by the write path and
//! produced by Greedy-family parses. It is plain owned data: once a Greedy
//! parse returns a `Value`, no borrow of the source buffer remains and the
//! graph may outlive it.
//!
//! Table values carry one `Option<Value>` per declared field, in field
//! order. `None` means the field is absent on the wire (its vtable slot is
//! zero and, for scalars, the declared default applies on read).

use crate::buffer::{read_scalar, InputBuffer, WireScalar};
use crate::error::{FlatwireError, Result};

/// The closed set of fixed-width scalar kinds supported by the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    /// 1-byte boolean (0 or 1 on the wire).
    Bool,
    /// Unsigned 8-bit integer.
    U8,
    /// Signed 8-bit integer.
    I8,
    /// Unsigned 16-bit integer.
    U16,
    /// Signed 16-bit integer.
    I16,
    /// Unsigned 32-bit integer.
    U32,
    /// Signed 32-bit integer.
    I32,
    /// Unsigned 64-bit integer.
    U64,
    /// Signed 64-bit integer.
    I64,
    /// IEEE-754 single precision float.
    F32,
    /// IEEE-754 double precision float.
    F64,
}

impl ScalarKind {
    /// Encoded width in bytes. Also the natural wire alignment.
    pub fn width(self) -> usize {
        match self {
            Self::Bool | Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
        }
    }
}

/// A single scalar value tagged with its kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    /// Boolean.
    Bool(bool),
    /// Unsigned 8-bit.
    U8(u8),
    /// Signed 8-bit.
    I8(i8),
    /// Unsigned 16-bit.
    U16(u16),
    /// Signed 16-bit.
    I16(i16),
    /// Unsigned 32-bit.
    U32(u32),
    /// Signed 32-bit.
    I32(i32),
    /// Unsigned 64-bit.
    U64(u64),
    /// Signed 64-bit.
    I64(i64),
    /// 32-bit float.
    F32(f32),
    /// 64-bit float.
    F64(f64),
}

impl ScalarValue {
    /// The kind tag of this value.
    pub fn kind(&self) -> ScalarKind {
        match self {
            Self::Bool(_) => ScalarKind::Bool,
            Self::U8(_) => ScalarKind::U8,
            Self::I8(_) => ScalarKind::I8,
            Self::U16(_) => ScalarKind::U16,
            Self::I16(_) => ScalarKind::I16,
            Self::U32(_) => ScalarKind::U32,
            Self::I32(_) => ScalarKind::I32,
            Self::U64(_) => ScalarKind::U64,
            Self::I64(_) => ScalarKind::I64,
            Self::F32(_) => ScalarKind::F32,
            Self::F64(_) => ScalarKind::F64,
        }
    }

    /// The all-zero value of a kind, the implicit default when a table field
    /// declares none.
    pub fn zero(kind: ScalarKind) -> Self {
        match kind {
            ScalarKind::Bool => Self::Bool(false),
            ScalarKind::U8 => Self::U8(0),
            ScalarKind::I8 => Self::I8(0),
            ScalarKind::U16 => Self::U16(0),
            ScalarKind::I16 => Self::I16(0),
            ScalarKind::U32 => Self::U32(0),
            ScalarKind::I32 => Self::I32(0),
            ScalarKind::U64 => Self::U64(0),
            ScalarKind::I64 => Self::I64(0),
            ScalarKind::F32 => Self::F32(0.0),
            ScalarKind::F64 => Self::F64(0.0),
        }
    }

    /// Encodes into `out`, which must hold at least `kind().width()` bytes.
    ///
    /// The trait is named explicitly: the integer primitives carry an
    /// inherent zero-argument `to_le` that would otherwise win method
    /// resolution.
    pub(crate) fn encode(&self, out: &mut [u8]) {
        match *self {
            Self::Bool(v) => WireScalar::to_le(v, out),
            Self::U8(v) => WireScalar::to_le(v, out),
            Self::I8(v) => WireScalar::to_le(v, out),
            Self::U16(v) => WireScalar::to_le(v, out),
            Self::I16(v) => WireScalar::to_le(v, out),
            Self::U32(v) => WireScalar::to_le(v, out),
            Self::I32(v) => WireScalar::to_le(v, out),
            Self::U64(v) => WireScalar::to_le(v, out),
            Self::I64(v) => WireScalar::to_le(v, out),
            Self::F32(v) => WireScalar::to_le(v, out),
            Self::F64(v) => WireScalar::to_le(v, out),
        }
    }

    /// Reads a scalar of `kind` at an absolute buffer position.
    pub(crate) fn read_from<B>(buf: &B, pos: usize, kind: ScalarKind) -> Result<Self>
    where
        B: InputBuffer + ?Sized,
    {
        Ok(match kind {
            ScalarKind::Bool => Self::Bool(read_scalar(buf, pos)?),
            ScalarKind::U8 => Self::U8(read_scalar(buf, pos)?),
            ScalarKind::I8 => Self::I8(read_scalar(buf, pos)?),
            ScalarKind::U16 => Self::U16(read_scalar(buf, pos)?),
            ScalarKind::I16 => Self::I16(read_scalar(buf, pos)?),
            ScalarKind::U32 => Self::U32(read_scalar(buf, pos)?),
            ScalarKind::I32 => Self::I32(read_scalar(buf, pos)?),
            ScalarKind::U64 => Self::U64(read_scalar(buf, pos)?),
            ScalarKind::I64 => Self::I64(read_scalar(buf, pos)?),
            ScalarKind::F32 => Self::F32(read_scalar(buf, pos)?),
            ScalarKind::F64 => Self::F64(read_scalar(buf, pos)?),
        })
    }
}

/// An owned node in a schema-typed value graph.
///
/// Semantic equality (`PartialEq`) compares field-for-field and is the
/// equality used by the round-trip guarantees: re-serializing a parsed
/// graph need not reproduce identical bytes, only an equal `Value`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A scalar leaf.
    Scalar(ScalarValue),
    /// A UTF-8 string.
    Str(String),
    /// A fixed-layout struct; members in declaration order, always all
    /// present.
    Struct(Vec<Value>),
    /// A table; one entry per declared field, `None` = absent.
    Table(Vec<Option<Value>>),
    /// A sequence of homogeneously-typed items.
    Vector(Vec<Value>),
    /// A union: `None` is the reserved "none" state, otherwise the 1-based
    /// member discriminant and the value it selects.
    Union(Option<(u8, Box<Value>)>),
}

impl Value {
    /// Shorthand for a string value.
    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    /// The scalar payload, if this is a scalar node.
    pub fn as_scalar(&self) -> Option<ScalarValue> {
        match self {
            Self::Scalar(s) => Some(*s),
            _ => None,
        }
    }

    /// The string payload, if this is a string node.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The `i32` payload, if this is an `I32` scalar.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Scalar(ScalarValue::I32(v)) => Some(*v),
            _ => None,
        }
    }

    /// The field list, if this is a table node.
    pub fn as_table(&self) -> Option<&[Option<Value>]> {
        match self {
            Self::Table(fields) => Some(fields),
            _ => None,
        }
    }

    /// Mutable access to the field list, if this is a table node.
    pub fn as_table_mut(&mut self) -> Option<&mut Vec<Option<Value>>> {
        match self {
            Self::Table(fields) => Some(fields),
            _ => None,
        }
    }

    /// The item list, if this is a vector node.
    pub fn as_vector(&self) -> Option<&[Value]> {
        match self {
            Self::Vector(items) => Some(items),
            _ => None,
        }
    }

    /// A one-word description of the variant, for error messages.
    pub(crate) fn describe(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Str(_) => "string",
            Self::Struct(_) => "struct",
            Self::Table(_) => "table",
            Self::Vector(_) => "vector",
            Self::Union(_) => "union",
        }
    }

    /// Extracts the scalar payload or reports what was found instead.
    pub(crate) fn expect_scalar(&self, context: &str) -> Result<ScalarValue> {
        self.as_scalar().ok_or_else(|| {
            FlatwireError::TypeMismatch(format!(
                "{context}: expected a scalar, found a {}",
                self.describe()
            ))
        })
    }
}

macro_rules! impl_value_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Self::Scalar(ScalarValue::$variant(v))
                }
            }
        )*
    };
}

impl_value_from!(
    bool => Bool,
    u8 => U8, i8 => I8,
    u16 => U16, i16 => I16,
    u32 => U32, i32 => I32,
    u64 => U64, i64 => I64,
    f32 => F32, f64 => F64,
);

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}
