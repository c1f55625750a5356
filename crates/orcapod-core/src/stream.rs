//! Streams: finite, restartable sequences of `(tag, packet)` pairs.
//!
//! A stream carries a shared tag typespec and packet typespec and
//! materializes to an Arrow `RecordBatch`, optionally with system
//! columns for provenance (`_source_<field>`), content hashes
//! (`_content_hash`), and the data context (`_context_key`).
//!
//! Two concrete streams are provided: [`TableStream`], backed by an
//! existing columnar table with a declared tag-column list, and
//! [`LazyStream`], the memoized output of a kernel over upstream
//! streams.

use std::sync::{Arc, OnceLock};

use arrow_array::builder::{
    BinaryBuilder, BooleanBuilder, Float32Builder, Float64Builder, Int16Builder, Int32Builder,
    Int64Builder, Int8Builder, StringBuilder, TimestampMicrosecondBuilder, UInt16Builder,
    UInt32Builder, UInt64Builder, UInt8Builder,
};
use arrow_array::{
    Array, ArrayRef, BinaryArray, BooleanArray, Float32Array, Float64Array, Int16Array,
    Int32Array, Int64Array, Int8Array, RecordBatch, RecordBatchOptions, StringArray,
    TimestampMicrosecondArray, UInt16Array, UInt32Array, UInt64Array, UInt8Array,
};
use arrow_schema::{DataType, Field, Schema};
use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::hash::{self, Digest};
use crate::kernel::{invocation_fingerprint, EvalContext, Kernel};
use crate::record::{DataContext, Packet, SourceInfo, Tag};
use crate::store::Store;
use crate::types::{LogicalType, TypeSpec, Value};

/// Prefix of the per-field provenance system columns.
pub const SOURCE_COLUMN_PREFIX: &str = "_source_";
/// Default name of the per-row packet content hash system column.
pub const CONTENT_HASH_COLUMN: &str = "_content_hash";
/// Name of the per-row data context system column.
pub const CONTEXT_KEY_COLUMN: &str = "_context_key";

/// One stream record.
pub type Record = (Tag, Packet);

/// Whether a column name is reserved for system columns.
pub fn is_system_column(name: &str) -> bool {
    name.starts_with(SOURCE_COLUMN_PREFIX)
        || name == CONTENT_HASH_COLUMN
        || name == CONTEXT_KEY_COLUMN
}

/// System-column selection for stream materialization.
#[derive(Debug, Clone, Default)]
pub struct TableOptions {
    /// Emit a `_source_<field>` column per packet field.
    pub include_source: bool,
    /// Emit a per-row packet content hash column under this name.
    pub content_hash_column: Option<String>,
    /// Emit the `_context_key` column.
    pub include_data_context: bool,
}

impl TableOptions {
    /// Data columns only.
    pub fn none() -> Self {
        TableOptions::default()
    }

    /// Every system column under its default name. This is the shape
    /// the store persists.
    pub fn full() -> Self {
        TableOptions {
            include_source: true,
            content_hash_column: Some(CONTENT_HASH_COLUMN.to_string()),
            include_data_context: true,
        }
    }
}

impl std::fmt::Debug for dyn Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("tag_schema", self.tag_schema())
            .field("packet_schema", self.packet_schema())
            .finish()
    }
}

/// A finite, restartable, deterministic sequence of `(tag, packet)`
/// pairs with a unified schema.
pub trait Stream: Send + Sync {
    /// Typespec of the tag side.
    fn tag_schema(&self) -> &TypeSpec;

    /// Typespec of the packet side.
    fn packet_schema(&self) -> &TypeSpec;

    /// Produce the `(tag, packet)` pairs. Restartable: every call
    /// yields the same sequence. Evaluation errors of derived streams
    /// surface here, on first materialization.
    fn iter(&self) -> Result<Box<dyn Iterator<Item = Record> + '_>>;

    /// Deterministic fingerprint of this stream's content and identity.
    fn fingerprint(&self) -> Result<Digest>;

    /// Fully materialized list of pairs.
    fn flow(&self) -> Result<Vec<Record>> {
        Ok(self.iter()?.collect())
    }

    /// The disjoint union of tag and packet typespecs.
    fn schema(&self) -> Result<TypeSpec> {
        self.tag_schema().union(self.packet_schema())
    }

    /// Materialize to a columnar table in iteration order. Tag columns
    /// come first, then packet columns, then any requested system
    /// columns.
    fn as_table(&self, options: &TableOptions) -> Result<RecordBatch> {
        let rows = self.flow()?;
        build_table(self.tag_schema(), self.packet_schema(), &rows, options)
    }
}

fn build_value_column<'a, I>(name: &str, ty: LogicalType, values: I) -> Result<ArrayRef>
where
    I: Iterator<Item = Option<&'a Value>>,
{
    macro_rules! primitive {
        ($builder:ty, $variant:ident) => {{
            let mut builder = <$builder>::new();
            for value in values {
                match value {
                    Some(Value::$variant(x)) => builder.append_value(*x),
                    Some(other) => {
                        return Err(Error::SchemaMismatch(format!(
                            "column `{name}` expects {ty} but a row carries {}",
                            other.logical_type()
                        )))
                    }
                    None => {
                        return Err(Error::MissingField(format!(
                            "a row is missing field `{name}`"
                        )))
                    }
                }
            }
            Arc::new(builder.finish()) as ArrayRef
        }};
    }
    macro_rules! text {
        ($builder:ty, $variant:ident) => {{
            let mut builder = <$builder>::new();
            for value in values {
                match value {
                    Some(Value::$variant(x)) => builder.append_value(x),
                    Some(other) => {
                        return Err(Error::SchemaMismatch(format!(
                            "column `{name}` expects {ty} but a row carries {}",
                            other.logical_type()
                        )))
                    }
                    None => {
                        return Err(Error::MissingField(format!(
                            "a row is missing field `{name}`"
                        )))
                    }
                }
            }
            Arc::new(builder.finish()) as ArrayRef
        }};
    }
    Ok(match ty {
        LogicalType::Boolean => primitive!(BooleanBuilder, Boolean),
        LogicalType::Int8 => primitive!(Int8Builder, Int8),
        LogicalType::Int16 => primitive!(Int16Builder, Int16),
        LogicalType::Int32 => primitive!(Int32Builder, Int32),
        LogicalType::Int64 => primitive!(Int64Builder, Int64),
        LogicalType::UInt8 => primitive!(UInt8Builder, UInt8),
        LogicalType::UInt16 => primitive!(UInt16Builder, UInt16),
        LogicalType::UInt32 => primitive!(UInt32Builder, UInt32),
        LogicalType::UInt64 => primitive!(UInt64Builder, UInt64),
        LogicalType::Float32 => primitive!(Float32Builder, Float32),
        LogicalType::Float64 => primitive!(Float64Builder, Float64),
        LogicalType::Timestamp => primitive!(TimestampMicrosecondBuilder, Timestamp),
        LogicalType::String => text!(StringBuilder, String),
        LogicalType::Path => text!(StringBuilder, Path),
        LogicalType::Binary => text!(BinaryBuilder, Binary),
    })
}

fn string_column<I>(values: I) -> ArrayRef
where
    I: Iterator<Item = String>,
{
    let mut builder = StringBuilder::new();
    for value in values {
        builder.append_value(value);
    }
    Arc::new(builder.finish())
}

fn value_at(name: &str, column: &ArrayRef, ty: LogicalType, row: usize) -> Result<Value> {
    if column.is_null(row) {
        return Err(Error::UnsupportedType(format!(
            "null value in column `{name}` at row {row}"
        )));
    }
    macro_rules! read {
        ($array:ty, $variant:ident) => {{
            let array = column
                .as_any()
                .downcast_ref::<$array>()
                .ok_or_else(|| {
                    Error::SchemaMismatch(format!("column `{name}` does not materialize {ty}"))
                })?;
            Value::$variant(array.value(row))
        }};
    }
    macro_rules! read_owned {
        ($array:ty, $variant:ident, $conv:ident) => {{
            let array = column
                .as_any()
                .downcast_ref::<$array>()
                .ok_or_else(|| {
                    Error::SchemaMismatch(format!("column `{name}` does not materialize {ty}"))
                })?;
            Value::$variant(array.value(row).$conv())
        }};
    }
    Ok(match ty {
        LogicalType::Boolean => read!(BooleanArray, Boolean),
        LogicalType::Int8 => read!(Int8Array, Int8),
        LogicalType::Int16 => read!(Int16Array, Int16),
        LogicalType::Int32 => read!(Int32Array, Int32),
        LogicalType::Int64 => read!(Int64Array, Int64),
        LogicalType::UInt8 => read!(UInt8Array, UInt8),
        LogicalType::UInt16 => read!(UInt16Array, UInt16),
        LogicalType::UInt32 => read!(UInt32Array, UInt32),
        LogicalType::UInt64 => read!(UInt64Array, UInt64),
        LogicalType::Float32 => read!(Float32Array, Float32),
        LogicalType::Float64 => read!(Float64Array, Float64),
        LogicalType::Timestamp => read!(TimestampMicrosecondArray, Timestamp),
        LogicalType::String => read_owned!(StringArray, String, to_string),
        LogicalType::Path => read_owned!(StringArray, Path, to_string),
        LogicalType::Binary => read_owned!(BinaryArray, Binary, to_vec),
    })
}

/// Build a columnar table from materialized rows. Tag columns first,
/// then packet columns, then the requested system columns.
pub fn build_table(
    tag_schema: &TypeSpec,
    packet_schema: &TypeSpec,
    rows: &[Record],
    options: &TableOptions,
) -> Result<RecordBatch> {
    let mut fields: Vec<Field> = Vec::new();
    let mut columns: Vec<ArrayRef> = Vec::new();

    for (name, ty) in tag_schema.iter() {
        fields.push(ty.arrow_field(name));
        columns.push(build_value_column(
            name,
            ty,
            rows.iter().map(|(tag, _)| tag.get(name)),
        )?);
    }
    for (name, ty) in packet_schema.iter() {
        fields.push(ty.arrow_field(name));
        columns.push(build_value_column(
            name,
            ty,
            rows.iter().map(|(_, packet)| packet.get(name)),
        )?);
    }

    if options.include_source {
        for (name, _) in packet_schema.iter() {
            fields.push(Field::new(
                format!("{SOURCE_COLUMN_PREFIX}{name}"),
                DataType::Utf8,
                false,
            ));
            columns.push(string_column(rows.iter().map(|(_, packet)| {
                packet
                    .source_of(name)
                    .unwrap_or(&SourceInfo::Input)
                    .to_json()
            })));
        }
    }
    if let Some(column) = &options.content_hash_column {
        fields.push(Field::new(column, DataType::Utf8, false));
        let mut hashes = Vec::with_capacity(rows.len());
        for (_, packet) in rows {
            hashes.push(packet.content_hash()?.to_hex());
        }
        columns.push(string_column(hashes.into_iter()));
    }
    if options.include_data_context {
        fields.push(Field::new(CONTEXT_KEY_COLUMN, DataType::Utf8, false));
        columns.push(string_column(
            rows.iter().map(|(_, packet)| packet.data_context().key()),
        ));
    }

    let schema = Arc::new(Schema::new(fields));
    let batch_options = RecordBatchOptions::new().with_row_count(Some(rows.len()));
    RecordBatch::try_new_with_options(schema, columns, &batch_options).map_err(Error::from)
}

/// One-row columnar table of a single packet.
pub fn packet_table(packet: &Packet, include_source: bool) -> Result<RecordBatch> {
    let options = TableOptions {
        include_source,
        ..TableOptions::default()
    };
    build_table(
        &TypeSpec::new(),
        packet.types(),
        &[(Tag::empty(), packet.clone())],
        &options,
    )
}

/// Reconstitute `(tag, packet)` records from a columnar table.
///
/// Columns named under the system conventions are consumed as
/// provenance, content hash, and data context; the remaining columns
/// split into tag and packet sides by the declared tag-column list.
/// Absent `_source_<field>` columns default to `source=input`; an
/// absent `_context_key` column defaults to the current context.
pub fn records_from_table(
    batch: &RecordBatch,
    tag_columns: &[String],
) -> Result<(TypeSpec, TypeSpec, Vec<Record>)> {
    let schema = batch.schema();

    let mut tag_schema = TypeSpec::new();
    for name in tag_columns {
        let index = schema
            .index_of(name)
            .map_err(|_| Error::MissingField(format!("tag column `{name}` not in table")))?;
        tag_schema.insert(name.clone(), LogicalType::from_arrow_field(schema.field(index))?)?;
    }

    let mut packet_schema = TypeSpec::new();
    for field in schema.fields() {
        let name = field.name();
        if is_system_column(name) || tag_columns.iter().any(|c| c == name) {
            continue;
        }
        packet_schema.insert(name.clone(), LogicalType::from_arrow_field(field)?)?;
    }

    let context_column = schema
        .index_of(CONTEXT_KEY_COLUMN)
        .ok()
        .map(|index| batch.column(index).clone());

    let mut rows = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let mut tag_values = IndexMap::new();
        for (name, ty) in tag_schema.iter() {
            let index = schema.index_of(name)?;
            tag_values.insert(name.to_string(), value_at(name, batch.column(index), ty, row)?);
        }
        let tag = Tag::try_new(tag_values, tag_schema.clone())?;

        let mut packet_values = IndexMap::new();
        let mut source = IndexMap::new();
        for (name, ty) in packet_schema.iter() {
            let index = schema.index_of(name)?;
            packet_values.insert(name.to_string(), value_at(name, batch.column(index), ty, row)?);

            let source_name = format!("{SOURCE_COLUMN_PREFIX}{name}");
            if let Ok(source_index) = schema.index_of(&source_name) {
                let column = batch.column(source_index);
                let array = column
                    .as_any()
                    .downcast_ref::<StringArray>()
                    .ok_or_else(|| {
                        Error::SchemaMismatch(format!("column `{source_name}` is not a string column"))
                    })?;
                source.insert(name.to_string(), SourceInfo::from_json(array.value(row))?);
            }
        }

        let context = match &context_column {
            Some(column) => {
                let array = column
                    .as_any()
                    .downcast_ref::<StringArray>()
                    .ok_or_else(|| {
                        Error::SchemaMismatch(format!(
                            "column `{CONTEXT_KEY_COLUMN}` is not a string column"
                        ))
                    })?;
                DataContext::from_key(array.value(row))?
            }
            None => DataContext::current(),
        };

        let packet = Packet::try_new(packet_values, packet_schema.clone(), source, context)?;
        rows.push((tag, packet));
    }

    Ok((tag_schema, packet_schema, rows))
}

/// A stream backed by an existing columnar table with a declared
/// tag-column list. Rows materialize to `(tag, packet)` pairs with
/// `source=input` provenance.
pub struct TableStream {
    batch: RecordBatch,
    tag_columns: Vec<String>,
    tag_schema: TypeSpec,
    packet_schema: TypeSpec,
    rows: OnceLock<Vec<Record>>,
    fingerprint: OnceLock<Digest>,
}

impl TableStream {
    /// Validates that every tag column exists, that every column carries
    /// a supported logical type, and that tag column values can key a
    /// record (no NaN, no null).
    pub fn try_new(batch: RecordBatch, tag_columns: &[&str]) -> Result<Self> {
        let schema = batch.schema();

        for field in schema.fields() {
            if is_system_column(field.name()) {
                return Err(Error::NameCollision(format!(
                    "column name `{}` is reserved for system columns",
                    field.name()
                )));
            }
        }
        for (i, name) in tag_columns.iter().enumerate() {
            if tag_columns[..i].contains(name) {
                return Err(Error::NameCollision(format!(
                    "tag column `{name}` declared twice"
                )));
            }
        }

        let owned: Vec<String> = tag_columns.iter().map(|s| s.to_string()).collect();
        let mut tag_schema = TypeSpec::new();
        for name in &owned {
            let index = schema
                .index_of(name)
                .map_err(|_| Error::MissingField(format!("tag column `{name}` not in table")))?;
            tag_schema.insert(name.clone(), LogicalType::from_arrow_field(schema.field(index))?)?;
        }
        let mut packet_schema = TypeSpec::new();
        for field in schema.fields() {
            if owned.iter().any(|c| c == field.name()) {
                continue;
            }
            packet_schema.insert(field.name().clone(), LogicalType::from_arrow_field(field)?)?;
        }

        // tag values must be usable as grouping keys
        for (name, ty) in tag_schema.iter() {
            let index = schema.index_of(name)?;
            let column = batch.column(index);
            for row in 0..batch.num_rows() {
                if column.is_null(row) {
                    return Err(Error::UnsupportedType(format!(
                        "tag column `{name}` has a null at row {row}"
                    )));
                }
            }
            if ty.is_float() {
                for row in 0..batch.num_rows() {
                    if !value_at(name, column, ty, row)?.is_hashable() {
                        return Err(Error::UnsupportedType(format!(
                            "tag column `{name}` has a NaN at row {row}"
                        )));
                    }
                }
            }
        }

        Ok(TableStream {
            batch,
            tag_columns: owned,
            tag_schema,
            packet_schema,
            rows: OnceLock::new(),
            fingerprint: OnceLock::new(),
        })
    }

    /// The backing table.
    pub fn table(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn tag_columns(&self) -> &[String] {
        &self.tag_columns
    }

    fn rows(&self) -> Result<&Vec<Record>> {
        if let Some(rows) = self.rows.get() {
            return Ok(rows);
        }
        let (_, _, rows) = records_from_table(&self.batch, &self.tag_columns)?;
        Ok(self.rows.get_or_init(|| rows))
    }
}

impl Stream for TableStream {
    fn tag_schema(&self) -> &TypeSpec {
        &self.tag_schema
    }

    fn packet_schema(&self) -> &TypeSpec {
        &self.packet_schema
    }

    fn iter(&self) -> Result<Box<dyn Iterator<Item = Record> + '_>> {
        Ok(Box::new(self.rows()?.iter().cloned()))
    }

    fn fingerprint(&self) -> Result<Digest> {
        if let Some(d) = self.fingerprint.get() {
            return Ok(*d);
        }
        let schema_digest = hash::hash_schema(&self.schema()?);
        let mut row_digests = Vec::new();
        for (tag, packet) in self.rows()? {
            row_digests.push(hash::hash_record(tag.iter().chain(packet.iter()))?);
        }
        let table_digest = hash::hash_table(&schema_digest, &row_digests);
        let digest = hash::hash_source(&table_digest, self.tag_columns.iter().map(String::as_str));
        Ok(*self.fingerprint.get_or_init(|| digest))
    }
}

/// The lazy output of a kernel over upstream streams.
///
/// Schemas are computed (and validated) at construction; records are
/// computed on first iteration and memoized. Seeding from a stored
/// table short-circuits evaluation entirely.
pub struct LazyStream {
    kernel: Arc<dyn Kernel>,
    inputs: Vec<Arc<dyn Stream>>,
    tag_schema: TypeSpec,
    packet_schema: TypeSpec,
    rows: OnceLock<Vec<Record>>,
    fingerprint: OnceLock<Digest>,
}

impl LazyStream {
    pub fn try_new(kernel: Arc<dyn Kernel>, inputs: Vec<Arc<dyn Stream>>) -> Result<Self> {
        let (tag_schema, packet_schema) = kernel.output_schemas(&inputs)?;
        Ok(LazyStream {
            kernel,
            inputs,
            tag_schema,
            packet_schema,
            rows: OnceLock::new(),
            fingerprint: OnceLock::new(),
        })
    }

    pub fn kernel(&self) -> &Arc<dyn Kernel> {
        &self.kernel
    }

    pub fn inputs(&self) -> &[Arc<dyn Stream>] {
        &self.inputs
    }

    pub fn is_materialized(&self) -> bool {
        self.rows.get().is_some()
    }

    /// Materialize the output records, evaluating the kernel with an
    /// optional store for per-record memoization. Idempotent; the first
    /// materialization wins.
    pub fn materialize(&self, store: Option<&dyn Store>, label: &str) -> Result<&Vec<Record>> {
        if let Some(rows) = self.rows.get() {
            return Ok(rows);
        }
        let ctx = EvalContext {
            store,
            invocation: self.fingerprint()?,
            label: label.to_string(),
        };
        let rows = self.kernel.evaluate(&self.inputs, &ctx)?;
        Ok(self.rows.get_or_init(|| rows))
    }

    /// Seed the memoized rows from records reconstituted out of the
    /// store. A no-op when the stream is already materialized.
    pub fn seed(&self, rows: Vec<Record>) {
        let _ = self.rows.set(rows);
    }
}

impl Stream for LazyStream {
    fn tag_schema(&self) -> &TypeSpec {
        &self.tag_schema
    }

    fn packet_schema(&self) -> &TypeSpec {
        &self.packet_schema
    }

    fn iter(&self) -> Result<Box<dyn Iterator<Item = Record> + '_>> {
        let label = self.kernel.name().to_string();
        let rows = self.materialize(None, &label)?;
        Ok(Box::new(rows.iter().cloned()))
    }

    fn fingerprint(&self) -> Result<Digest> {
        if let Some(d) = self.fingerprint.get() {
            return Ok(*d);
        }
        let digest = invocation_fingerprint(self.kernel.as_ref(), &self.inputs)?;
        Ok(*self.fingerprint.get_or_init(|| digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int64, false),
            Field::new("b", DataType::Utf8, false),
            Field::new("c", DataType::Boolean, false),
            Field::new("d", DataType::Float64, false),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3])),
                Arc::new(StringArray::from(vec!["x", "y", "z"])),
                Arc::new(BooleanArray::from(vec![true, false, true])),
                Arc::new(Float64Array::from(vec![1.1, 2.2, 3.3])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn table_round_trip_preserves_rows_and_order() {
        let stream = TableStream::try_new(sample_batch(), &["a", "b"]).unwrap();
        let table = stream.as_table(&TableOptions::none()).unwrap();
        assert_eq!(table, sample_batch());

        let rows = stream.flow().unwrap();
        assert_eq!(rows.len(), 3);
        let (tag, packet) = &rows[0];
        assert_eq!(tag.get("a"), Some(&Value::Int64(1)));
        assert_eq!(tag.get("b"), Some(&Value::String("x".into())));
        assert_eq!(packet.get("c"), Some(&Value::Boolean(true)));
        assert_eq!(packet.get("d"), Some(&Value::Float64(1.1)));
    }

    #[test]
    fn streams_are_restartable() {
        let stream = TableStream::try_new(sample_batch(), &["a"]).unwrap();
        let first = stream.flow().unwrap();
        let second = stream.flow().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn system_columns_are_projected_on_request() {
        let stream = TableStream::try_new(sample_batch(), &["a", "b"]).unwrap();
        let table = stream.as_table(&TableOptions::full()).unwrap();
        let schema = table.schema();
        let names: Vec<&str> = schema
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect();
        assert_eq!(
            names,
            vec!["a", "b", "c", "d", "_source_c", "_source_d", "_content_hash", "_context_key"]
        );
        let sources = table
            .column(4)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(
            SourceInfo::from_json(sources.value(0)).unwrap(),
            SourceInfo::Input
        );
    }

    #[test]
    fn round_trip_through_table_preserves_records() {
        let stream = TableStream::try_new(sample_batch(), &["a", "b"]).unwrap();
        let table = stream.as_table(&TableOptions::none()).unwrap();
        let reloaded = TableStream::try_new(table, &["a", "b"]).unwrap();
        assert_eq!(stream.flow().unwrap(), reloaded.flow().unwrap());
        assert_eq!(stream.tag_schema(), reloaded.tag_schema());
        assert_eq!(stream.packet_schema(), reloaded.packet_schema());
    }

    #[test]
    fn missing_tag_column_is_rejected() {
        assert!(matches!(
            TableStream::try_new(sample_batch(), &["a", "missing"]),
            Err(Error::MissingField(_))
        ));
    }

    #[test]
    fn nan_in_tag_column_is_rejected() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("k", DataType::Float64, false),
            Field::new("v", DataType::Int64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Float64Array::from(vec![1.0, f64::NAN])),
                Arc::new(Int64Array::from(vec![1, 2])),
            ],
        )
        .unwrap();
        assert!(TableStream::try_new(batch, &["k"]).is_err());
    }

    #[test]
    fn reserved_column_names_are_rejected() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int64, false),
            Field::new("_content_hash", DataType::Utf8, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1])),
                Arc::new(StringArray::from(vec!["x"])),
            ],
        )
        .unwrap();
        assert!(matches!(
            TableStream::try_new(batch, &["a"]),
            Err(Error::NameCollision(_))
        ));
    }

    #[test]
    fn fingerprint_tracks_content_and_tag_declaration() {
        let by_a = TableStream::try_new(sample_batch(), &["a"]).unwrap();
        let by_ab = TableStream::try_new(sample_batch(), &["a", "b"]).unwrap();
        let again = TableStream::try_new(sample_batch(), &["a"]).unwrap();
        assert_eq!(by_a.fingerprint().unwrap(), again.fingerprint().unwrap());
        assert_ne!(by_a.fingerprint().unwrap(), by_ab.fingerprint().unwrap());
    }
}
