//! In-memory content-addressed store, used for tests and short-lived
//! pipelines.

use std::collections::HashMap;
use std::sync::RwLock;

use arrow_array::RecordBatch;
use tracing::debug;

use orcapod_core::hash::Digest;
use orcapod_core::store::Store;
use orcapod_core::{Error, Result};

/// A store keeping every table in process memory.
///
/// Safe for concurrent read and write; writes take the lock exclusively
/// per call. Contents are lost when the store is dropped.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<Digest, RecordBatch>>,
    results: RwLock<HashMap<(Digest, String), RecordBatch>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Number of stored tables, results excluded.
    pub fn len(&self) -> usize {
        self.tables.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> Error {
    Error::other(anyhow::anyhow!("memory store lock poisoned"))
}

impl Store for MemoryStore {
    fn has(&self, fingerprint: &Digest) -> Result<bool> {
        Ok(self
            .tables
            .read()
            .map_err(|_| poisoned())?
            .contains_key(fingerprint))
    }

    fn get_table(&self, fingerprint: &Digest) -> Result<Option<RecordBatch>> {
        Ok(self
            .tables
            .read()
            .map_err(|_| poisoned())?
            .get(fingerprint)
            .cloned())
    }

    fn put_table(&self, fingerprint: &Digest, table: &RecordBatch) -> Result<()> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        if let Some(existing) = tables.get(fingerprint) {
            if existing != table {
                return Err(Error::FingerprintCollision {
                    fingerprint: fingerprint.to_hex(),
                });
            }
            debug!(fingerprint = %fingerprint, "duplicate write ignored");
            return Ok(());
        }
        tables.insert(*fingerprint, table.clone());
        Ok(())
    }

    fn get_result(&self, pipeline: &Digest, label: &str) -> Result<Option<RecordBatch>> {
        Ok(self
            .results
            .read()
            .map_err(|_| poisoned())?
            .get(&(*pipeline, label.to_string()))
            .cloned())
    }

    fn put_result(&self, pipeline: &Digest, label: &str, table: &RecordBatch) -> Result<()> {
        self.results
            .write()
            .map_err(|_| poisoned())?
            .insert((*pipeline, label.to_string()), table.clone());
        Ok(())
    }
}
