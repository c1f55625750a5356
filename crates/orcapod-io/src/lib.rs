//! # OrcaPod I/O - Store Backends and Table Loading
//!
//! This crate provides the concrete storage backends behind the
//! `orcapod_core::Store` contract, plus table loading helpers for
//! building source streams from files.
//!
//! ## Store Backends
//!
//! - **MemoryStore**: in-process tables, for tests and short-lived runs
//! - **ParquetStore**: one Parquet file per fingerprint under a root
//!   directory, with atomic stage-and-rename writes
//!
//! ## Table Loading
//!
//! - **CSV**: schema-inferred single-table loading for source streams

/// In-memory store implementation
pub mod store_mem;

/// Parquet-directory store implementation
pub mod store_parquet;

/// CSV file loading for source streams
pub mod source_csv;

pub use source_csv::{read_csv_table, CsvReadOptions};
pub use store_mem::MemoryStore;
pub use store_parquet::ParquetStore;
