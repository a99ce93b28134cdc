//! Read and write MPR (Message Pack Rows) files.
//!
//! An MPR file is a single-file, self-describing, compressed row store: a
//! fixed big-endian header, a gzip row stream of MessagePack batches, and a
//! trailing zlib meta block carrying schema, provenance, row classification,
//! and per-column type and statistical profiles. The format materializes a
//! heterogeneous source (CSV, TSV, fixed-width, spreadsheets, ...) into a
//! uniform artifact that can be iterated sequentially, profiled, and
//! mounted as a virtual table by a SQL engine.
//!
//! # Data Pipeline
//!
//! ```text
//! source rows
//!     → MprWriter (MessagePack batches through a gzip member)
//!         → RowIntuiter (header/comment/data classification)
//!             → TypeIntuiter (per-column type resolution)
//!                 → Stats (moments, quantiles, cardinality, histogram)
//!                     → finalize
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use mprows::{GeneratorSource, LoadOptions, LocalFilesystem, MprFile, Value};
//!
//! # fn main() -> Result<(), mprows::MprError> {
//! let fs = Arc::new(LocalFilesystem::new("data")?);
//! let f = MprFile::new(fs, "cars");
//!
//! let rows = (0..100).map(|i| vec![Value::Int(i), Value::String(format!("car {i}"))]);
//! let source = GeneratorSource::new(rows)
//!     .with_headers(vec!["id".into(), "name".into()]);
//!
//! f.load_rows(source, &LoadOptions::default())?;
//!
//! let reader = f.reader()?;
//! for row in reader.rows()? {
//!     let row = row?;
//!     println!("{row:?}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Key Types
//!
//! - [`MprFile`] — a path on a filesystem; drives the load pipeline
//! - [`MprWriter`] / [`MprReader`] — the row store state machines
//! - [`Value`] — typed cell values (null, ints, floats, strings, bytes,
//!   dates, times, datetimes)
//! - [`Meta`] / [`Column`] — the trailing meta block and its schema rows
//! - [`RowIntuiter`] / [`TypeIntuiter`] / [`Stats`] — the profiling passes
//!
//! # SQL access
//!
//! With the `sql` feature, `add_partition` mounts an MPR file as a SQLite
//! virtual table (`CREATE VIRTUAL TABLE ... USING mod_partition`). With
//! `med-postgres`, the `mpr_fdw` module issues the `CREATE SERVER` /
//! `CREATE FOREIGN TABLE` pair for a remote PostgreSQL server.

#![warn(missing_docs)]

pub use err::MprError;
pub use intuit::{coalesce_headers, RowIntuiter, RowSpec, TypeIntuiter};
pub use load::{LoadOptions, MprFile};
pub use mpr_header::{FileHeader, FILE_HEADER_SIZE, MAGIC, VERSION};
pub use mpr_io::{FileHandle, LocalFilesystem, MemoryFilesystem, MprFilesystem};
pub use mpr_meta::{mangle_header, Column, Meta, StatsEntry, SCHEMA_TEMPLATE};
pub use mpr_reader::{
    ClassifiedRow, ClassifiedRows, DataRows, Info, MprReader, ProxyRows, RawRows, RowLabel,
    RowProxy, Select,
};
pub use mpr_value::{Row, Value};
pub use mpr_writer::MprWriter;
pub use source::{
    require_credentials, AccountAccessor, ColumnSpec, GeneratorSource, RowSource, SourceSpec,
};
pub use stats::{text_hist, Lom, StatSet, Stats};

#[cfg(feature = "sql")]
pub use mpr_query::{add_partition, install_mpr_module, MODULE_NAME};
#[cfg(feature = "sql")]
pub use rusqlite;

mod err;
mod intuit;
mod load;
mod mpr_header;
mod mpr_io;
mod mpr_meta;
#[cfg(feature = "med-postgres")]
pub mod mpr_fdw;
#[cfg(feature = "sql")]
mod mpr_query;
mod mpr_reader;
mod mpr_value;
mod mpr_writer;
mod source;
mod stats;

/// Extension every MPR file carries.
pub const EXTENSION: &str = ".mpr";

/// Default number of rows batched into one MessagePack frame before the
/// writer flushes to the compressor.
pub const BATCH_ROWS: usize = 1000;
