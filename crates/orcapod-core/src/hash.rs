//! Deterministic, versioned content hashing.
//!
//! Every digest is a version byte followed by a 32-byte BLAKE3 hash.
//! Hashers are constructed with `Hasher::new_derive_key(context)` so that
//! the different data families (scalar values, records, schemas, tables,
//! pod identities, invocations, pipelines) never share a preimage space.
//!
//! Determinism rules:
//! - scalars hash as a type-tag byte followed by their canonical
//!   big-endian encoding (`-0.0` normalizes to `+0.0`, NaN is rejected);
//! - records hash their `(name, type_tag, value_digest)` triples sorted
//!   by field name, so insertion order never affects the digest;
//! - tables hash their schema digest followed by every row digest in
//!   iteration order;
//! - variable-length components are length-prefixed to keep the byte
//!   stream unambiguous.
//!
//! Bumping [`HASHER_VERSION`] changes the version byte of every digest
//! and thereby invalidates all previously stored fingerprints.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::types::{LogicalType, TypeSpec, Value};

/// Version of the hashing algorithm, prepended to every digest.
pub const HASHER_VERSION: u8 = 1;

/// Digest width in bytes: one version byte plus a 256-bit hash.
pub const DIGEST_LEN: usize = 33;

/// A fixed-width, versioned content digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// The hasher version that produced this digest.
    pub fn version(&self) -> u8 {
        self.0[0]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Digest> {
        let bytes = hex::decode(s).map_err(Error::other)?;
        let arr: [u8; DIGEST_LEN] = bytes.try_into().map_err(|_| {
            Error::UnsupportedType(format!("digest must be {DIGEST_LEN} bytes"))
        })?;
        Ok(Digest(arr))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Digest::from_hex(s)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::from_hex(&s).map_err(D::Error::custom)
    }
}

/// Domain separation contexts. One per hashed data family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Domain {
    Value,
    Record,
    Schema,
    Table,
    Source,
    PodIdentity,
    OperatorIdentity,
    Invocation,
    RecordInvocation,
    Pipeline,
}

impl Domain {
    fn context(&self) -> &'static str {
        match self {
            Domain::Value => "orcapod:v1:value",
            Domain::Record => "orcapod:v1:record",
            Domain::Schema => "orcapod:v1:schema",
            Domain::Table => "orcapod:v1:table",
            Domain::Source => "orcapod:v1:source",
            Domain::PodIdentity => "orcapod:v1:pod-identity",
            Domain::OperatorIdentity => "orcapod:v1:operator-identity",
            Domain::Invocation => "orcapod:v1:invocation",
            Domain::RecordInvocation => "orcapod:v1:record-invocation",
            Domain::Pipeline => "orcapod:v1:pipeline",
        }
    }

    fn hasher(&self) -> blake3::Hasher {
        blake3::Hasher::new_derive_key(self.context())
    }
}

fn finish(hasher: blake3::Hasher) -> Digest {
    let mut out = [0u8; DIGEST_LEN];
    out[0] = HASHER_VERSION;
    out[1..].copy_from_slice(hasher.finalize().as_bytes());
    Digest(out)
}

fn update_str(hasher: &mut blake3::Hasher, s: &str) {
    hasher.update(&(s.len() as u64).to_be_bytes());
    hasher.update(s.as_bytes());
}

fn update_bytes(hasher: &mut blake3::Hasher, b: &[u8]) {
    hasher.update(&(b.len() as u64).to_be_bytes());
    hasher.update(b);
}

/// Hash a scalar value. Fails on NaN, which has no canonical encoding.
pub fn hash_value(value: &Value) -> Result<Digest> {
    let mut h = Domain::Value.hasher();
    h.update(&[value.logical_type().type_tag()]);
    update_bytes(&mut h, &value.canonical_bytes()?);
    Ok(finish(h))
}

/// Hash a keyed record (a tag or a packet). Fields are sorted by name
/// before hashing, so insertion order never affects the digest.
pub fn hash_record<'a, I>(fields: I) -> Result<Digest>
where
    I: IntoIterator<Item = (&'a str, &'a Value)>,
{
    let mut entries: Vec<(&str, u8, Digest)> = Vec::new();
    for (name, value) in fields {
        entries.push((name, value.logical_type().type_tag(), hash_value(value)?));
    }
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut h = Domain::Record.hasher();
    for (name, tag, digest) in entries {
        update_str(&mut h, name);
        h.update(&[tag]);
        h.update(digest.as_bytes());
    }
    Ok(finish(h))
}

/// Hash a typespec. Fields are sorted by name, matching record hashing.
pub fn hash_schema(spec: &TypeSpec) -> Digest {
    let mut entries: Vec<(&str, u8)> = spec
        .iter()
        .map(|(name, ty)| (name, ty.type_tag()))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut h = Domain::Schema.hasher();
    for (name, tag) in entries {
        update_str(&mut h, name);
        h.update(&[tag]);
    }
    finish(h)
}

/// Hash a materialized table: its schema digest followed by every row
/// digest in iteration order.
pub fn hash_table(schema: &Digest, rows: &[Digest]) -> Digest {
    let mut h = Domain::Table.hasher();
    h.update(schema.as_bytes());
    for row in rows {
        h.update(row.as_bytes());
    }
    finish(h)
}

/// Fingerprint of a table-backed source stream: the table content digest
/// plus the tag-column declaration.
pub fn hash_source<'a, I>(table: &Digest, tag_columns: I) -> Digest
where
    I: IntoIterator<Item = &'a str>,
{
    let mut h = Domain::Source.hasher();
    h.update(table.as_bytes());
    for column in tag_columns {
        update_str(&mut h, column);
    }
    finish(h)
}

/// Stable identity of a pod: function name, ordered input and output
/// name/type lists, and the engineer-supplied implementation version.
pub fn hash_pod_identity(
    name: &str,
    inputs: &[(String, LogicalType)],
    outputs: &[(String, LogicalType)],
    impl_version: &str,
) -> Digest {
    let mut h = Domain::PodIdentity.hasher();
    update_str(&mut h, name);
    h.update(&(inputs.len() as u64).to_be_bytes());
    for (field, ty) in inputs {
        update_str(&mut h, field);
        h.update(&[ty.type_tag()]);
    }
    h.update(&(outputs.len() as u64).to_be_bytes());
    for (key, ty) in outputs {
        update_str(&mut h, key);
        h.update(&[ty.type_tag()]);
    }
    update_str(&mut h, impl_version);
    finish(h)
}

/// Stable identity of a structural operator and its bound parameters.
pub fn hash_operator_identity<'a, I>(name: &str, params: I) -> Digest
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut h = Domain::OperatorIdentity.hasher();
    update_str(&mut h, name);
    for (key, value) in params {
        update_str(&mut h, key);
        update_str(&mut h, value);
    }
    finish(h)
}

/// Fingerprint of one invocation: the kernel identity, the ordered
/// upstream stream fingerprints, and the declared output keys.
pub fn hash_invocation<'a, I>(identity: &Digest, upstream: &[Digest], output_keys: I) -> Digest
where
    I: IntoIterator<Item = &'a str>,
{
    let mut h = Domain::Invocation.hasher();
    h.update(identity.as_bytes());
    h.update(&(upstream.len() as u64).to_be_bytes());
    for fp in upstream {
        h.update(fp.as_bytes());
    }
    for key in output_keys {
        update_str(&mut h, key);
    }
    finish(h)
}

/// Per-record memoization key: the invocation fingerprint combined with
/// the content hash of the input packet.
pub fn hash_record_invocation(invocation: &Digest, input_packet: &Digest) -> Digest {
    let mut h = Domain::RecordInvocation.hasher();
    h.update(invocation.as_bytes());
    h.update(input_packet.as_bytes());
    finish(h)
}

/// Pipeline fingerprint: the registration-ordered sequence of node
/// fingerprints and their upstream node indices.
pub fn hash_pipeline(nodes: &[(Digest, Vec<usize>)]) -> Digest {
    let mut h = Domain::Pipeline.hasher();
    h.update(&(nodes.len() as u64).to_be_bytes());
    for (fp, upstream) in nodes {
        h.update(fp.as_bytes());
        h.update(&(upstream.len() as u64).to_be_bytes());
        for idx in upstream {
            h.update(&(*idx as u64).to_be_bytes());
        }
    }
    finish(h)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digests_carry_the_version_byte() {
        let d = hash_value(&Value::Int64(42)).unwrap();
        assert_eq!(d.version(), HASHER_VERSION);
        assert_eq!(d.as_bytes().len(), DIGEST_LEN);
    }

    #[test]
    fn value_hashing_is_idempotent() {
        let a = hash_value(&Value::String("orca".into())).unwrap();
        let b = hash_value(&Value::String("orca".into())).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn record_hash_ignores_insertion_order() {
        let x = Value::Int64(1);
        let y = Value::String("y".into());
        let forward = hash_record(vec![("a", &x), ("b", &y)]).unwrap();
        let reversed = hash_record(vec![("b", &y), ("a", &x)]).unwrap();
        assert_eq!(forward, reversed);
    }

    #[test]
    fn record_hash_depends_on_names_and_values() {
        let x = Value::Int64(1);
        let base = hash_record(vec![("a", &x)]).unwrap();
        let renamed = hash_record(vec![("b", &x)]).unwrap();
        let changed = Value::Int64(2);
        let rewritten = hash_record(vec![("a", &changed)]).unwrap();
        assert_ne!(base, renamed);
        assert_ne!(base, rewritten);
    }

    #[test]
    fn negative_zero_normalizes() {
        let neg = hash_value(&Value::Float64(-0.0)).unwrap();
        let pos = hash_value(&Value::Float64(0.0)).unwrap();
        assert_eq!(neg, pos);
    }

    #[test]
    fn nan_is_rejected() {
        assert!(hash_value(&Value::Float64(f64::NAN)).is_err());
    }

    #[test]
    fn domains_are_separated() {
        // a record of zero fields and a schema of zero fields share the
        // empty byte stream but must not share a digest
        let record = hash_record(Vec::<(&str, &Value)>::new()).unwrap();
        let schema = hash_schema(&TypeSpec::new());
        assert_ne!(record, schema);
    }

    #[test]
    fn hex_round_trip() {
        let d = hash_value(&Value::Boolean(true)).unwrap();
        let parsed = Digest::from_hex(&d.to_hex()).unwrap();
        assert_eq!(d, parsed);
    }

    #[test]
    fn string_and_path_do_not_collide() {
        let s = hash_value(&Value::String("/data/x".into())).unwrap();
        let p = hash_value(&Value::path("/data/x")).unwrap();
        assert_ne!(s, p);
    }
}
