//! CSV file loading for source streams.
//!
//! Loads a CSV file into a single Arrow table, inferring its schema
//! from a configurable prefix of the file. The resulting batch feeds
//! `orcapod_core::TableStream` together with a tag-column declaration.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow_array::RecordBatch;
use arrow_csv::reader::Format;
use arrow_csv::ReaderBuilder;
use arrow_select::concat::concat_batches;
use tracing::info;

use orcapod_core::{Error, Result};

/// CSV reading configuration.
#[derive(Debug, Clone)]
pub struct CsvReadOptions {
    /// Whether the file starts with a header row.
    pub has_header: bool,
    /// Field delimiter.
    pub delimiter: u8,
    /// How many records to scan for schema inference; `None` scans the
    /// whole file.
    pub max_inference_records: Option<usize>,
    /// Rows per decoded batch.
    pub batch_rows: usize,
}

impl Default for CsvReadOptions {
    fn default() -> Self {
        CsvReadOptions {
            has_header: true,
            delimiter: b',',
            max_inference_records: Some(100),
            batch_rows: 65536,
        }
    }
}

/// Read a CSV file into one columnar table.
pub fn read_csv_table(path: impl AsRef<Path>, options: &CsvReadOptions) -> Result<RecordBatch> {
    let path = path.as_ref();

    let format = Format::default()
        .with_header(options.has_header)
        .with_delimiter(options.delimiter);
    let file = File::open(path)?;
    let (schema, _) = format.infer_schema(file, options.max_inference_records)?;
    let schema = Arc::new(schema);

    // reopen so decoding starts from the top of the file
    let file = File::open(path)?;
    let reader = ReaderBuilder::new(schema.clone())
        .with_header(options.has_header)
        .with_delimiter(options.delimiter)
        .with_batch_size(options.batch_rows)
        .build(file)?;

    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }
    let table = concat_batches(&schema, &batches).map_err(Error::from)?;
    info!(path = %path.display(), rows = table.num_rows(), "loaded csv table");
    Ok(table)
}
