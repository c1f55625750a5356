//! Logical type algebra, scalar values, and typespecs.
//!
//! OrcaPod recognizes a small closed set of logical types that map onto
//! Apache Arrow's columnar schema. A [`TypeSpec`] is an ordered mapping
//! from field name to [`LogicalType`]; it describes one side (tag or
//! packet) of a stream record and converts to and from an Arrow schema.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use arrow_schema::{DataType, Field, Schema, TimeUnit};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::error::{Error, Result};

/// Arrow field metadata key marking columns whose logical type cannot be
/// recovered from the Arrow data type alone (currently only `path`).
pub const LOGICAL_TYPE_METADATA_KEY: &str = "orcapod.logical_type";

/// The logical types understood by the stream algebra.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogicalType {
    Boolean,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    String,
    Binary,
    /// Microsecond-precision timestamp without a timezone.
    Timestamp,
    /// A reference to external content, carried as a path string.
    Path,
}

impl LogicalType {
    /// Stable one-byte tag used as a hashing prefix. Never reorder or
    /// reuse values; doing so invalidates every existing digest.
    pub fn type_tag(&self) -> u8 {
        match self {
            LogicalType::Boolean => 1,
            LogicalType::Int8 => 2,
            LogicalType::Int16 => 3,
            LogicalType::Int32 => 4,
            LogicalType::Int64 => 5,
            LogicalType::UInt8 => 6,
            LogicalType::UInt16 => 7,
            LogicalType::UInt32 => 8,
            LogicalType::UInt64 => 9,
            LogicalType::Float32 => 10,
            LogicalType::Float64 => 11,
            LogicalType::String => 12,
            LogicalType::Binary => 13,
            LogicalType::Timestamp => 14,
            LogicalType::Path => 15,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            LogicalType::Int8
                | LogicalType::Int16
                | LogicalType::Int32
                | LogicalType::Int64
                | LogicalType::UInt8
                | LogicalType::UInt16
                | LogicalType::UInt32
                | LogicalType::UInt64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, LogicalType::Float32 | LogicalType::Float64)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Short name used in error messages and schema dumps.
    pub fn name(&self) -> &'static str {
        match self {
            LogicalType::Boolean => "boolean",
            LogicalType::Int8 => "int8",
            LogicalType::Int16 => "int16",
            LogicalType::Int32 => "int32",
            LogicalType::Int64 => "int64",
            LogicalType::UInt8 => "uint8",
            LogicalType::UInt16 => "uint16",
            LogicalType::UInt32 => "uint32",
            LogicalType::UInt64 => "uint64",
            LogicalType::Float32 => "float32",
            LogicalType::Float64 => "float64",
            LogicalType::String => "string",
            LogicalType::Binary => "binary",
            LogicalType::Timestamp => "timestamp",
            LogicalType::Path => "path",
        }
    }

    /// The Arrow data type this logical type materializes as.
    pub fn arrow_type(&self) -> DataType {
        match self {
            LogicalType::Boolean => DataType::Boolean,
            LogicalType::Int8 => DataType::Int8,
            LogicalType::Int16 => DataType::Int16,
            LogicalType::Int32 => DataType::Int32,
            LogicalType::Int64 => DataType::Int64,
            LogicalType::UInt8 => DataType::UInt8,
            LogicalType::UInt16 => DataType::UInt16,
            LogicalType::UInt32 => DataType::UInt32,
            LogicalType::UInt64 => DataType::UInt64,
            LogicalType::Float32 => DataType::Float32,
            LogicalType::Float64 => DataType::Float64,
            LogicalType::String => DataType::Utf8,
            LogicalType::Binary => DataType::Binary,
            LogicalType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
            LogicalType::Path => DataType::Utf8,
        }
    }

    /// Build an Arrow field for a column of this logical type. The `path`
    /// type is carried as Utf8 with a metadata marker so it round-trips.
    pub fn arrow_field(&self, name: &str) -> Field {
        let field = Field::new(name, self.arrow_type(), false);
        match self {
            LogicalType::Path => {
                let mut metadata = HashMap::new();
                metadata.insert(LOGICAL_TYPE_METADATA_KEY.to_string(), "path".to_string());
                field.with_metadata(metadata)
            }
            _ => field,
        }
    }

    /// Recover the logical type of an Arrow field, rejecting unsupported
    /// columnar types.
    pub fn from_arrow_field(field: &Field) -> Result<Self> {
        if field.metadata().get(LOGICAL_TYPE_METADATA_KEY).map(String::as_str) == Some("path") {
            if field.data_type() == &DataType::Utf8 {
                return Ok(LogicalType::Path);
            }
            return Err(Error::UnsupportedType(format!(
                "field `{}` is marked as path but is {}",
                field.name(),
                field.data_type()
            )));
        }
        match field.data_type() {
            DataType::Boolean => Ok(LogicalType::Boolean),
            DataType::Int8 => Ok(LogicalType::Int8),
            DataType::Int16 => Ok(LogicalType::Int16),
            DataType::Int32 => Ok(LogicalType::Int32),
            DataType::Int64 => Ok(LogicalType::Int64),
            DataType::UInt8 => Ok(LogicalType::UInt8),
            DataType::UInt16 => Ok(LogicalType::UInt16),
            DataType::UInt32 => Ok(LogicalType::UInt32),
            DataType::UInt64 => Ok(LogicalType::UInt64),
            DataType::Float32 => Ok(LogicalType::Float32),
            DataType::Float64 => Ok(LogicalType::Float64),
            DataType::Utf8 => Ok(LogicalType::String),
            DataType::Binary => Ok(LogicalType::Binary),
            DataType::Timestamp(TimeUnit::Microsecond, None) => Ok(LogicalType::Timestamp),
            other => Err(Error::UnsupportedType(format!(
                "field `{}` has unsupported type {}",
                field.name(),
                other
            ))),
        }
    }
}

impl std::fmt::Display for LogicalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Canonical bit pattern used when a NaN must be folded into a single
/// representative for equality and std hashing (the quiet NaN).
const CANONICAL_NAN_BITS: u64 = 0x7ff8_0000_0000_0000;

/// A scalar value of one of the supported logical types.
///
/// Values are immutable and comparable. Floats compare and hash through
/// their canonical bit pattern (`-0.0` folds to `+0.0`, every NaN folds
/// to one representative), which makes `Value` usable as a grouping key.
/// Content hashing is stricter and rejects NaN outright; see
/// [`crate::hash::hash_value`].
#[derive(Debug, Clone)]
pub enum Value {
    Boolean(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    String(String),
    Binary(Vec<u8>),
    /// Microseconds since the Unix epoch.
    Timestamp(i64),
    Path(String),
}

impl Value {
    pub fn logical_type(&self) -> LogicalType {
        match self {
            Value::Boolean(_) => LogicalType::Boolean,
            Value::Int8(_) => LogicalType::Int8,
            Value::Int16(_) => LogicalType::Int16,
            Value::Int32(_) => LogicalType::Int32,
            Value::Int64(_) => LogicalType::Int64,
            Value::UInt8(_) => LogicalType::UInt8,
            Value::UInt16(_) => LogicalType::UInt16,
            Value::UInt32(_) => LogicalType::UInt32,
            Value::UInt64(_) => LogicalType::UInt64,
            Value::Float32(_) => LogicalType::Float32,
            Value::Float64(_) => LogicalType::Float64,
            Value::String(_) => LogicalType::String,
            Value::Binary(_) => LogicalType::Binary,
            Value::Timestamp(_) => LogicalType::Timestamp,
            Value::Path(_) => LogicalType::Path,
        }
    }

    /// Timestamp scalar from an epoch-microsecond count.
    pub fn timestamp_micros(micros: i64) -> Value {
        Value::Timestamp(micros)
    }

    /// Timestamp scalar from a chrono instant.
    pub fn from_datetime(dt: DateTime<Utc>) -> Value {
        Value::Timestamp(dt.timestamp_micros())
    }

    /// Path scalar referencing external content.
    pub fn path(p: impl Into<String>) -> Value {
        Value::Path(p.into())
    }

    /// True unless the value is a floating-point NaN, which has no
    /// canonical content encoding and cannot key a tag.
    pub fn is_hashable(&self) -> bool {
        match self {
            Value::Float32(f) => !f.is_nan(),
            Value::Float64(f) => !f.is_nan(),
            _ => true,
        }
    }

    /// Canonical byte encoding used for content hashing: big-endian for
    /// numbers, UTF-8 for strings and paths, raw bytes for binary.
    /// `-0.0` normalizes to `+0.0`; NaN is rejected.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let bytes = match self {
            Value::Boolean(b) => vec![u8::from(*b)],
            Value::Int8(v) => v.to_be_bytes().to_vec(),
            Value::Int16(v) => v.to_be_bytes().to_vec(),
            Value::Int32(v) => v.to_be_bytes().to_vec(),
            Value::Int64(v) => v.to_be_bytes().to_vec(),
            Value::UInt8(v) => v.to_be_bytes().to_vec(),
            Value::UInt16(v) => v.to_be_bytes().to_vec(),
            Value::UInt32(v) => v.to_be_bytes().to_vec(),
            Value::UInt64(v) => v.to_be_bytes().to_vec(),
            Value::Float32(f) => {
                if f.is_nan() {
                    return Err(Error::UnsupportedType(
                        "NaN has no canonical content encoding".to_string(),
                    ));
                }
                let normalized = if *f == 0.0 { 0.0f32 } else { *f };
                normalized.to_bits().to_be_bytes().to_vec()
            }
            Value::Float64(f) => {
                if f.is_nan() {
                    return Err(Error::UnsupportedType(
                        "NaN has no canonical content encoding".to_string(),
                    ));
                }
                let normalized = if *f == 0.0 { 0.0f64 } else { *f };
                normalized.to_bits().to_be_bytes().to_vec()
            }
            Value::String(s) => s.as_bytes().to_vec(),
            Value::Binary(b) => b.clone(),
            Value::Timestamp(v) => v.to_be_bytes().to_vec(),
            Value::Path(p) => p.as_bytes().to_vec(),
        };
        Ok(bytes)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Widening accessor over the signed integer and timestamp variants.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int8(v) => Some(i64::from(*v)),
            Value::Int16(v) => Some(i64::from(*v)),
            Value::Int32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            Value::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    /// Widening accessor over the unsigned integer variants.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt8(v) => Some(u64::from(*v)),
            Value::UInt16(v) => Some(u64::from(*v)),
            Value::UInt32(v) => Some(u64::from(*v)),
            Value::UInt64(v) => Some(*v),
            _ => None,
        }
    }

    /// Widening accessor over the float variants.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float32(f) => Some(f64::from(*f)),
            Value::Float64(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            Value::Path(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Binary(b) => Some(b),
            _ => None,
        }
    }

    fn float_key_bits(&self) -> Option<u64> {
        match self {
            Value::Float32(f) => {
                if f.is_nan() {
                    Some(CANONICAL_NAN_BITS)
                } else if *f == 0.0 {
                    Some(u64::from(0.0f32.to_bits()))
                } else {
                    Some(u64::from(f.to_bits()))
                }
            }
            Value::Float64(f) => {
                if f.is_nan() {
                    Some(CANONICAL_NAN_BITS)
                } else if *f == 0.0 {
                    Some(0.0f64.to_bits())
                } else {
                    Some(f.to_bits())
                }
            }
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Int8(a), Value::Int8(b)) => a == b,
            (Value::Int16(a), Value::Int16(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::UInt8(a), Value::UInt8(b)) => a == b,
            (Value::UInt16(a), Value::UInt16(b)) => a == b,
            (Value::UInt32(a), Value::UInt32(b)) => a == b,
            (Value::UInt64(a), Value::UInt64(b)) => a == b,
            (Value::Float32(_), Value::Float32(_)) | (Value::Float64(_), Value::Float64(_)) => {
                self.float_key_bits() == other.float_key_bits()
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Binary(a), Value::Binary(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Path(a), Value::Path(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u8(self.logical_type().type_tag());
        match self {
            Value::Boolean(b) => b.hash(state),
            Value::Int8(v) => v.hash(state),
            Value::Int16(v) => v.hash(state),
            Value::Int32(v) => v.hash(state),
            Value::Int64(v) => v.hash(state),
            Value::UInt8(v) => v.hash(state),
            Value::UInt16(v) => v.hash(state),
            Value::UInt32(v) => v.hash(state),
            Value::UInt64(v) => v.hash(state),
            Value::Float32(_) | Value::Float64(_) => {
                // canonical bits, so -0.0 and every NaN group consistently
                state.write_u64(self.float_key_bits().unwrap_or(CANONICAL_NAN_BITS));
            }
            Value::String(s) => s.hash(state),
            Value::Binary(b) => b.hash(state),
            Value::Timestamp(v) => v.hash(state),
            Value::Path(p) => p.hash(state),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Int8(v) => write!(f, "{v}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::UInt8(v) => write!(f, "{v}"),
            Value::UInt16(v) => write!(f, "{v}"),
            Value::UInt32(v) => write!(f, "{v}"),
            Value::UInt64(v) => write!(f, "{v}"),
            Value::Float32(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Binary(b) => write!(f, "<{} bytes>", b.len()),
            Value::Timestamp(v) => write!(f, "{v}us"),
            Value::Path(p) => write!(f, "{p}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}
impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::Int8(v)
    }
}
impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int16(v)
    }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}
impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::UInt8(v)
    }
}
impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::UInt16(v)
    }
}
impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt32(v)
    }
}
impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt64(v)
    }
}
impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float32(v)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}
impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Binary(v)
    }
}

/// An ordered mapping from field name to logical type.
///
/// Field order is the declared schema order and drives iteration and
/// columnar materialization; content hashing sorts by name so that the
/// declaration order never affects a digest.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TypeSpec {
    fields: IndexMap<String, LogicalType>,
}

impl TypeSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion for literal specs.
    pub fn with(mut self, name: impl Into<String>, ty: LogicalType) -> Self {
        self.fields.insert(name.into(), ty);
        self
    }

    /// Insert a field, rejecting duplicates.
    pub fn insert(&mut self, name: impl Into<String>, ty: LogicalType) -> Result<()> {
        let name = name.into();
        if self.fields.contains_key(&name) {
            return Err(Error::NameCollision(format!(
                "field `{name}` declared twice"
            )));
        }
        self.fields.insert(name, ty);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<LogicalType> {
        self.fields.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field names in declared order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// `(name, type)` pairs in declared order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, LogicalType)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// The Arrow schema this typespec materializes as, in declared order.
    pub fn arrow_schema(&self) -> Schema {
        let fields: Vec<Field> = self
            .fields
            .iter()
            .map(|(name, ty)| ty.arrow_field(name))
            .collect();
        Schema::new(fields)
    }

    /// Recover a typespec from an Arrow schema, rejecting unsupported
    /// columnar types.
    pub fn from_arrow_schema(schema: &Schema) -> Result<Self> {
        let mut spec = TypeSpec::new();
        for field in schema.fields() {
            spec.insert(field.name().clone(), LogicalType::from_arrow_field(field)?)?;
        }
        Ok(spec)
    }

    /// Disjoint union of two typespecs; duplicate names collide.
    pub fn union(&self, other: &TypeSpec) -> Result<TypeSpec> {
        let mut merged = self.clone();
        for (name, ty) in other.iter() {
            merged.insert(name, ty)?;
        }
        Ok(merged)
    }

    /// Merge two typespecs for a join: every shared key must carry the
    /// same logical type on both sides, shared keys appear once, and
    /// the merged order is self's order followed by other's remainder.
    pub fn reconcile(&self, other: &TypeSpec, shared: &[String]) -> Result<TypeSpec> {
        for key in shared {
            match (self.get(key), other.get(key)) {
                (Some(a), Some(b)) if a == b => {}
                (Some(a), Some(b)) => {
                    return Err(Error::SchemaMismatch(format!(
                        "shared key `{key}` is {a} on one side and {b} on the other"
                    )));
                }
                _ => {
                    return Err(Error::MissingField(format!(
                        "shared key `{key}` absent from one side"
                    )));
                }
            }
        }
        let mut merged = self.clone();
        for (name, ty) in other.iter() {
            if shared.iter().any(|k| k == name) {
                continue;
            }
            merged.insert(name, ty)?;
        }
        Ok(merged)
    }
}

impl FromIterator<(String, LogicalType)> for TypeSpec {
    fn from_iter<I: IntoIterator<Item = (String, LogicalType)>>(iter: I) -> Self {
        let mut spec = TypeSpec::new();
        for (name, ty) in iter {
            spec.fields.insert(name, ty);
        }
        spec
    }
}
