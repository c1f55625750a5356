//! Tags and packets: the immutable keyed records of a stream.
//!
//! A [`Tag`] identifies a record within a stream's logical domain (it
//! plays the role of a primary key). A [`Packet`] carries the record's
//! data values together with a typespec, per-field source provenance,
//! the data context that produced it, and a memoized content hash.

use std::sync::OnceLock;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hash::{self, Digest, HASHER_VERSION};
use crate::types::{TypeSpec, Value};

/// Semantic version of the library, embedded in every data context.
pub const LIBRARY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Where a packet field's value originated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum SourceInfo {
    /// Externally supplied data with no producing invocation.
    Input,
    /// Produced by a pod invocation, under the named output field.
    Invocation { invocation: Digest, field: String },
}

impl SourceInfo {
    /// JSON encoding used for `_source_<field>` system columns.
    pub fn to_json(&self) -> String {
        // the enum serializes infallibly
        serde_json::to_string(self).unwrap_or_else(|_| "{\"source\":\"input\"}".to_string())
    }

    pub fn from_json(s: &str) -> Result<SourceInfo> {
        serde_json::from_str(s).map_err(Error::other)
    }
}

/// Identifies the library and hasher versions that produced a packet.
/// A change to either invalidates previously stored fingerprints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataContext {
    library_version: String,
    hasher_version: u8,
}

impl DataContext {
    /// The context of the running library.
    pub fn current() -> Self {
        DataContext {
            library_version: LIBRARY_VERSION.to_string(),
            hasher_version: HASHER_VERSION,
        }
    }

    pub fn library_version(&self) -> &str {
        &self.library_version
    }

    pub fn hasher_version(&self) -> u8 {
        self.hasher_version
    }

    /// Encoding used for the `_context_key` system column.
    pub fn key(&self) -> String {
        format!(
            "orcapod:{}|hasher:{}",
            self.library_version, self.hasher_version
        )
    }

    /// Parse a `_context_key` column value back into a context.
    pub fn from_key(key: &str) -> Result<DataContext> {
        let (lib, hasher) = key
            .strip_prefix("orcapod:")
            .and_then(|rest| rest.split_once("|hasher:"))
            .ok_or_else(|| {
                Error::UnsupportedType(format!("malformed context key `{key}`"))
            })?;
        let hasher_version = hasher
            .parse::<u8>()
            .map_err(|_| Error::UnsupportedType(format!("malformed context key `{key}`")))?;
        Ok(DataContext {
            library_version: lib.to_string(),
            hasher_version,
        })
    }
}

impl Default for DataContext {
    fn default() -> Self {
        DataContext::current()
    }
}

/// Reorder `values` to follow `types` order, verifying that the two
/// describe exactly the same fields with matching logical types.
fn align(values: IndexMap<String, Value>, types: &TypeSpec) -> Result<IndexMap<String, Value>> {
    if values.len() != types.len() {
        let missing: Vec<&str> = types
            .names()
            .filter(|name| !values.contains_key(*name))
            .collect();
        if !missing.is_empty() {
            return Err(Error::MissingField(format!(
                "record is missing declared fields: {}",
                missing.join(", ")
            )));
        }
    }
    let mut ordered = IndexMap::with_capacity(types.len());
    for (name, declared) in types.iter() {
        let value = values
            .get(name)
            .ok_or_else(|| Error::MissingField(format!("record is missing field `{name}`")))?;
        let actual = value.logical_type();
        if actual != declared {
            return Err(Error::SchemaMismatch(format!(
                "field `{name}` declared as {declared} but carries {actual}"
            )));
        }
        ordered.insert(name.to_string(), value.clone());
    }
    for name in values.keys() {
        if !types.contains(name) {
            return Err(Error::SchemaMismatch(format!(
                "record carries undeclared field `{name}`"
            )));
        }
    }
    Ok(ordered)
}

/// An immutable keyed record identifying a stream row.
///
/// Iteration follows declared schema order; the content hash is computed
/// lazily and memoized.
#[derive(Debug, Clone)]
pub struct Tag {
    values: IndexMap<String, Value>,
    types: TypeSpec,
    content_hash: OnceLock<Digest>,
}

impl Tag {
    pub fn try_new(values: IndexMap<String, Value>, types: TypeSpec) -> Result<Self> {
        let values = align(values, &types)?;
        for (name, value) in &values {
            if !value.is_hashable() {
                return Err(Error::UnsupportedType(format!(
                    "tag field `{name}` carries an unhashable value"
                )));
            }
        }
        Ok(Tag {
            values,
            types,
            content_hash: OnceLock::new(),
        })
    }

    /// Build a tag from `(name, value)` pairs, deriving the typespec
    /// from the values themselves.
    pub fn from_pairs<I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut values = IndexMap::new();
        let mut types = TypeSpec::new();
        for (name, value) in pairs {
            types.insert(name.clone(), value.logical_type())?;
            values.insert(name, value);
        }
        Tag::try_new(values, types)
    }

    /// The empty tag, used for records stored outside any tag domain.
    pub fn empty() -> Self {
        Tag {
            values: IndexMap::new(),
            types: TypeSpec::new(),
            content_hash: OnceLock::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn types(&self) -> &TypeSpec {
        &self.types
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// A plain owned mapping of the tag's fields.
    pub fn as_map(&self) -> IndexMap<String, Value> {
        self.values.clone()
    }

    /// The tuple of values under `keys`, used for join grouping.
    pub fn key_tuple(&self, keys: &[String]) -> Result<Vec<Value>> {
        keys.iter()
            .map(|k| {
                self.values
                    .get(k)
                    .cloned()
                    .ok_or_else(|| Error::MissingField(format!("tag has no field `{k}`")))
            })
            .collect()
    }

    /// Memoized content hash over the tag's fields.
    pub fn content_hash(&self) -> Result<Digest> {
        if let Some(d) = self.content_hash.get() {
            return Ok(*d);
        }
        let digest = hash::hash_record(self.iter())?;
        Ok(*self.content_hash.get_or_init(|| digest))
    }

    /// Human-readable `k=v` rendering for error attribution.
    pub fn render(&self) -> String {
        self.values
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values && self.types == other.types
    }
}

impl Eq for Tag {}

/// An immutable keyed record carrying a row's data.
///
/// Beyond its values and typespec, a packet records where each field
/// originated and which library/hasher versions produced it. The content
/// hash covers the values only and is memoized on first computation.
#[derive(Debug, Clone)]
pub struct Packet {
    values: IndexMap<String, Value>,
    types: TypeSpec,
    source: IndexMap<String, SourceInfo>,
    context: DataContext,
    content_hash: OnceLock<Digest>,
}

impl Packet {
    /// Construct a packet with explicit per-field provenance.
    pub fn try_new(
        values: IndexMap<String, Value>,
        types: TypeSpec,
        source: IndexMap<String, SourceInfo>,
        context: DataContext,
    ) -> Result<Self> {
        let values = align(values, &types)?;
        let mut ordered_source = IndexMap::with_capacity(values.len());
        for name in values.keys() {
            let info = source.get(name).cloned().unwrap_or(SourceInfo::Input);
            ordered_source.insert(name.clone(), info);
        }
        for name in source.keys() {
            if !values.contains_key(name) {
                return Err(Error::SchemaMismatch(format!(
                    "source info references unknown field `{name}`"
                )));
            }
        }
        Ok(Packet {
            values,
            types,
            source: ordered_source,
            context,
            content_hash: OnceLock::new(),
        })
    }

    /// Construct a packet for externally supplied data; every field is
    /// marked `source=input`.
    pub fn from_input(values: IndexMap<String, Value>, types: TypeSpec) -> Result<Self> {
        Packet::try_new(values, types, IndexMap::new(), DataContext::current())
    }

    /// Build a packet from `(name, value)` pairs, deriving the typespec.
    pub fn from_pairs<I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut values = IndexMap::new();
        let mut types = TypeSpec::new();
        for (name, value) in pairs {
            types.insert(name.clone(), value.logical_type())?;
            values.insert(name, value);
        }
        Packet::from_input(values, types)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn types(&self) -> &TypeSpec {
        &self.types
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// A plain owned mapping of the packet's fields.
    pub fn as_map(&self) -> IndexMap<String, Value> {
        self.values.clone()
    }

    /// Per-field origin mapping, in declared field order.
    pub fn source_info(&self) -> &IndexMap<String, SourceInfo> {
        &self.source
    }

    pub fn source_of(&self, name: &str) -> Option<&SourceInfo> {
        self.source.get(name)
    }

    pub fn data_context(&self) -> &DataContext {
        &self.context
    }

    /// Memoized content hash over the packet's values. Source info and
    /// data context do not contribute; two packets with equal values are
    /// content-equal regardless of where the values came from.
    pub fn content_hash(&self) -> Result<Digest> {
        if let Some(d) = self.content_hash.get() {
            return Ok(*d);
        }
        let digest = hash::hash_record(self.iter())?;
        Ok(*self.content_hash.get_or_init(|| digest))
    }

    /// One-row columnar table of this packet, with optional
    /// `_source_<field>` columns. See [`crate::stream`] for the full
    /// stream-level materialization.
    pub fn as_table(&self, include_source: bool) -> Result<arrow_array::RecordBatch> {
        crate::stream::packet_table(self, include_source)
    }
}

impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
            && self.types == other.types
            && self.source == other.source
            && self.context == other.context
    }
}

impl Eq for Packet {}
