//! Parquet-backed content-addressed store.
//!
//! Layout under the root directory:
//!
//! ```text
//! objects/<hh>/<rest-of-hex>.parquet   one table per fingerprint
//! results/<pipeline-hex>/<label>.parquet
//! tmp/<uuid>.parquet                   staging for atomic writes
//! ```
//!
//! Writes stage into `tmp/` and rename into place, so a reader never
//! observes a partially written table. The Arrow schema (system-column
//! metadata included) rides along in the Parquet file metadata and is
//! restored verbatim on read.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use arrow_array::RecordBatch;
use arrow_select::concat::concat_batches;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use tracing::debug;
use uuid::Uuid;

use orcapod_core::hash::Digest;
use orcapod_core::store::Store;
use orcapod_core::{Error, Result};

/// A store persisting every table as one Parquet file, keyed by the
/// hex rendering of its fingerprint.
///
/// Concurrent readers are safe. Concurrent writers of the *same*
/// fingerprint are safe because identical content renames over
/// identical content; distinct pipelines should still use distinct
/// `tmp/` roots or a single writing process.
pub struct ParquetStore {
    root: PathBuf,
}

impl ParquetStore {
    /// Open (or create) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("objects"))?;
        fs::create_dir_all(root.join("results"))?;
        fs::create_dir_all(root.join("tmp"))?;
        Ok(ParquetStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, fingerprint: &Digest) -> PathBuf {
        let hex = fingerprint.to_hex();
        self.root
            .join("objects")
            .join(&hex[..2])
            .join(format!("{}.parquet", &hex[2..]))
    }

    fn result_path(&self, pipeline: &Digest, label: &str) -> PathBuf {
        let safe = label.replace(['/', '\\'], "_");
        self.root
            .join("results")
            .join(pipeline.to_hex())
            .join(format!("{safe}.parquet"))
    }

    fn read_table(path: &Path) -> Result<RecordBatch> {
        let file = File::open(path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        let schema = builder.schema().clone();
        let reader = builder.build()?;
        let mut batches = Vec::new();
        for batch in reader {
            batches.push(batch?);
        }
        concat_batches(&schema, &batches).map_err(Error::from)
    }

    /// Stage the table into `tmp/` and rename it into place.
    fn write_table(&self, path: &Path, table: &RecordBatch) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let staged = self.root.join("tmp").join(format!("{}.parquet", Uuid::new_v4()));
        let file = File::create(&staged)?;
        let props = WriterProperties::builder().build();
        let mut writer = ArrowWriter::try_new(file, table.schema(), Some(props))?;
        writer.write(table)?;
        writer.close()?;
        fs::rename(&staged, path)?;
        Ok(())
    }
}

impl Store for ParquetStore {
    fn has(&self, fingerprint: &Digest) -> Result<bool> {
        Ok(self.object_path(fingerprint).exists())
    }

    fn get_table(&self, fingerprint: &Digest) -> Result<Option<RecordBatch>> {
        let path = self.object_path(fingerprint);
        if !path.exists() {
            return Ok(None);
        }
        Self::read_table(&path).map(Some)
    }

    fn put_table(&self, fingerprint: &Digest, table: &RecordBatch) -> Result<()> {
        let path = self.object_path(fingerprint);
        if path.exists() {
            let existing = Self::read_table(&path)?;
            if existing != *table {
                return Err(Error::FingerprintCollision {
                    fingerprint: fingerprint.to_hex(),
                });
            }
            debug!(fingerprint = %fingerprint, "duplicate write ignored");
            return Ok(());
        }
        self.write_table(&path, table)?;
        debug!(fingerprint = %fingerprint, path = %path.display(), "table stored");
        Ok(())
    }

    fn get_result(&self, pipeline: &Digest, label: &str) -> Result<Option<RecordBatch>> {
        let path = self.result_path(pipeline, label);
        if !path.exists() {
            return Ok(None);
        }
        Self::read_table(&path).map(Some)
    }

    fn put_result(&self, pipeline: &Digest, label: &str, table: &RecordBatch) -> Result<()> {
        let path = self.result_path(pipeline, label);
        if path.exists() {
            return Ok(());
        }
        self.write_table(&path, table)
    }
}
