//! # OrcaPod Core - Reproducible Pipeline Foundations
//!
//! This crate provides the foundational types and traits for building
//! reproducible scientific data pipelines. It defines the stream algebra,
//! the content hashing and invocation identity protocol, the pipeline DAG
//! with its scoped registration context, and the content-addressed store
//! contract used throughout the OrcaPod ecosystem.
//!
//! ## Key Components
//!
//! - **Type System**: A small algebra of logical types with conversion to
//!   and from Apache Arrow schemas
//! - **Hasher**: Deterministic, versioned, domain-separated content
//!   digests over scalars, records, schemas, and tables
//! - **Tags & Packets**: Immutable keyed records carrying values, types,
//!   per-field provenance, and memoized content hashes
//! - **Streams**: Finite, restartable sequences of `(tag, packet)` pairs
//!   with columnar materialization
//! - **Pipeline**: Scoped invocation registry, DAG construction, and
//!   memoized topological execution
//! - **Store Contract**: Content-addressed persistence keyed by
//!   invocation fingerprints
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use orcapod_core::{Pipeline, Stream, TableStream};
//!
//! // Wrap a columnar table as a source stream keyed by `id`, then
//! // register pod invocations inside a pipeline scope and run it.
//! let source = TableStream::try_new(batch, &["id"])?;
//! let pipeline = Pipeline::new("example", store);
//! pipeline.scope(|| {
//!     // operator and pod calls register nodes here
//! });
//! pipeline.run()?;
//! ```

pub mod error;
pub mod hash;
pub mod kernel;
pub mod pipeline;
pub mod record;
pub mod store;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use hash::{Digest, DIGEST_LEN, HASHER_VERSION};
pub use kernel::{invocation_fingerprint, EvalContext, Kernel};
pub use pipeline::{register_invocation, NodeHandle, Pipeline};
pub use record::{DataContext, Packet, SourceInfo, Tag, LIBRARY_VERSION};
pub use store::Store;
pub use stream::{
    build_table, records_from_table, LazyStream, Record, Stream, TableOptions, TableStream,
    CONTENT_HASH_COLUMN, CONTEXT_KEY_COLUMN, SOURCE_COLUMN_PREFIX,
};
pub use types::{LogicalType, TypeSpec, Value};
