//! The content-addressed store contract.
//!
//! A store persists materialized tables keyed by invocation fingerprint.
//! Concrete backends live in `orcapod-io`; the core only consumes this
//! trait and assumes the backend round-trips the full table schema,
//! system columns included.

use arrow_array::RecordBatch;

use crate::error::Result;
use crate::hash::Digest;

/// Content-addressed persistence for packets, invocation outputs, and
/// pipeline results.
///
/// Contract:
/// - entries are append-only and keyed by fingerprint;
/// - `put_table` is idempotent: writing the same `(fingerprint, table)`
///   twice is a no-op, while writing different contents under the same
///   fingerprint is a fatal [`crate::Error::FingerprintCollision`];
/// - writes are atomic from a reader's perspective;
/// - implementations are safe for concurrent read and document their
///   write-exclusivity requirements.
pub trait Store: Send + Sync {
    /// Whether a table is stored under the given fingerprint.
    fn has(&self, fingerprint: &Digest) -> Result<bool>;

    /// Retrieve the table stored under the given fingerprint.
    fn get_table(&self, fingerprint: &Digest) -> Result<Option<RecordBatch>>;

    /// Persist a table under the given fingerprint.
    fn put_table(&self, fingerprint: &Digest, table: &RecordBatch) -> Result<()>;

    /// Fast-path lookup of a node result by pipeline fingerprint and
    /// node label. Backends without a result index return `None`.
    fn get_result(&self, _pipeline: &Digest, _label: &str) -> Result<Option<RecordBatch>> {
        Ok(None)
    }

    /// Fast-path write of a node result. Backends without a result
    /// index ignore it.
    fn put_result(&self, _pipeline: &Digest, _label: &str, _table: &RecordBatch) -> Result<()> {
        Ok(())
    }
}
