//! Error types for OrcaPod pipeline operations.

use arrow_schema::ArrowError;
use parquet::errors::ParquetError;
use thiserror::Error;

/// Convenience alias used across the OrcaPod crates.
pub type Result<T> = std::result::Result<T, Error>;

/// Error conditions surfaced by stream construction, operator and pod
/// validation, pipeline execution, and the store.
///
/// Validation errors are raised synchronously at construction time;
/// evaluation errors are raised on first materialization and attributed
/// to the offending node.
#[derive(Debug, Error)]
pub enum Error {
    /// Incompatible typespecs on an operator or pod input.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Overlapping non-tag columns at a join, or overlapping tag and
    /// packet keys within a stream record.
    #[error("name collision: {0}")]
    NameCollision(String),

    /// A pod input field is not present in the input packet schema.
    #[error("missing field: {0}")]
    MissingField(String),

    /// A logical or columnar type outside the supported algebra.
    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    /// The store observed two distinct payloads under the same key.
    #[error("fingerprint collision: distinct payloads under {fingerprint}")]
    FingerprintCollision { fingerprint: String },

    /// A user function failed during pod execution.
    #[error("pod `{label}` failed on record [{tag}]: {source}")]
    PodRuntime {
        label: String,
        tag: String,
        #[source]
        source: anyhow::Error,
    },

    /// An operator or pod was invoked in a stale or mismatched pipeline
    /// context, or a pipeline precondition was violated.
    #[error("pipeline state error: {0}")]
    PipelineState(String),

    #[error(transparent)]
    Arrow(#[from] ArrowError),

    #[error(transparent)]
    Parquet(#[from] ParquetError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic error wrapper for store backends and other collaborators.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Wrap an arbitrary error into the generic variant.
    pub fn other(err: impl Into<anyhow::Error>) -> Self {
        Error::Other(err.into())
    }
}
