//! The writer state machine: streaming append, metadata mutation,
//! finalization.
//!
//! A fresh writer lays down a placeholder header, then streams row batches
//! through a gzip member. `close` flushes the batch cache, finishes the
//! member, records `meta_start`, rewrites the header, and writes the meta
//! block. A writer opened on an existing file is a **meta-only** session:
//! the compressed row stream cannot be appended to in place, so appends
//! fail and `close` rewrites only header and meta.
//!
//! A fresh session that is dropped (panic, interrupt, caller error) before
//! a successful `close` deletes the partial file so a malformed artifact is
//! never mistaken for a finished one.

use std::io::{Seek, Write};
use std::mem;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, warn};

use crate::err::MprError;
use crate::intuit::{RowSpec, TypeIntuiter};
use crate::mpr_header::{FileHeader, FILE_HEADER_SIZE};
use crate::mpr_io::{FileHandle, LockFile, MprFilesystem};
use crate::mpr_meta::{mangle_header, Meta};
use crate::mpr_value::{encode_batch, Row};
use crate::source::SourceSpec;
use crate::stats::Stats;
use crate::BATCH_ROWS;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WriterState {
    Open,
    Closed,
    Poisoned,
}

enum RowSink {
    /// Fresh file: rows stream through the compressor.
    Stream(GzEncoder<Box<dyn FileHandle>>),
    /// Re-opened file: only header and meta may change.
    MetaOnly(Box<dyn FileHandle>),
    /// Taken during close/abort.
    Finished,
}

/// Writer over an MPR file.
pub struct MprWriter {
    fs: Arc<dyn MprFilesystem>,
    path: String,
    header: FileHeader,
    meta: Meta,
    cache: Vec<Row>,
    batch_rows: usize,
    sink: RowSink,
    state: WriterState,
    fresh: bool,
    lock: Option<LockFile>,
}

impl std::fmt::Debug for MprWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MprWriter")
            .field("path", &self.path)
            .field("header", &self.header)
            .field("meta", &self.meta)
            .field("batch_rows", &self.batch_rows)
            .field("state", &self.state)
            .field("fresh", &self.fresh)
            .finish()
    }
}

impl MprWriter {
    /// Opens a writer on `path`. A missing file starts a fresh appending
    /// session; an existing file is opened meta-only.
    pub fn open(fs: Arc<dyn MprFilesystem>, path: &str) -> Result<Self, MprError> {
        let lock = match fs.getsyspath(path) {
            Some(syspath) => Some(LockFile::acquire(&syspath)?),
            None => None,
        };

        if fs.exists(path) {
            let mut fh = fs.open_write(path, false)?;
            let header = FileHeader::read(&mut fh)?;
            header.validate()?;
            let meta = Meta::read(&mut fh, header.meta_start)?;
            debug!("re-opened {path} meta-only; n_rows = {}", header.n_rows);

            Ok(Self {
                fs,
                path: path.to_string(),
                header,
                meta,
                cache: Vec::new(),
                batch_rows: BATCH_ROWS,
                sink: RowSink::MetaOnly(fh),
                state: WriterState::Open,
                fresh: false,
                lock,
            })
        } else {
            let mut fh = fs.open_write(path, true)?;
            let header = FileHeader {
                meta_start: FILE_HEADER_SIZE,
                ..FileHeader::default()
            };
            header.write(&mut fh)?;

            let mut meta = Meta::default();
            meta.about.create_time = Some(unix_now());
            debug!("created {path}");

            Ok(Self {
                fs,
                path: path.to_string(),
                header,
                meta,
                cache: Vec::new(),
                batch_rows: BATCH_ROWS,
                sink: RowSink::Stream(GzEncoder::new(fh, Compression::new(9))),
                state: WriterState::Open,
                fresh: true,
                lock,
            })
        }
    }

    /// Sets the flush batch size in rows.
    pub fn set_batch_rows(mut self, batch_rows: usize) -> Self {
        self.batch_rows = batch_rows.max(1);
        self
    }

    /// Rows written so far.
    pub fn n_rows(&self) -> u32 {
        self.header.n_rows
    }

    /// Observed maximum row width.
    pub fn n_cols(&self) -> u32 {
        self.header.n_cols
    }

    /// The in-memory meta block.
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Mutable access to the in-memory meta block.
    pub fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    fn check_open(&self) -> Result<(), MprError> {
        match self.state {
            WriterState::Open => Ok(()),
            WriterState::Poisoned => Err(MprError::Other(
                "writer is poisoned after a failed write; abort it".into(),
            )),
            WriterState::Closed => Err(MprError::Other("writer is closed".into())),
        }
    }

    /// Appends one row.
    ///
    /// Fails with [`MprError::AlreadyFinalized`] on a finalized file and
    /// [`MprError::RowsAlreadyLoaded`] on any other re-opened file: the
    /// compressed row stream is write-once.
    pub fn append(&mut self, row: Row) -> Result<(), MprError> {
        self.check_open()?;
        if !self.fresh {
            if self.meta.process.finalized {
                return Err(MprError::AlreadyFinalized);
            }
            return Err(MprError::RowsAlreadyLoaded(self.header.n_rows));
        }

        self.header.n_cols = self.header.n_cols.max(row.len() as u32);
        self.header.n_rows += 1;
        self.header.data_end_row = self.header.n_rows - 1;
        self.cache.push(row);

        if self.cache.len() >= self.batch_rows {
            self.flush_cache()?;
        }
        Ok(())
    }

    fn flush_cache(&mut self) -> Result<(), MprError> {
        if self.cache.is_empty() {
            return Ok(());
        }
        let result = match &mut self.sink {
            RowSink::Stream(encoder) => encode_batch(encoder, &self.cache),
            RowSink::MetaOnly(_) | RowSink::Finished => {
                Err(MprError::Other("no row stream to flush to".into()))
            }
        };
        if let Err(e) = result {
            self.state = WriterState::Poisoned;
            return Err(e);
        }
        self.cache.clear();
        Ok(())
    }

    /// Assigns column names, mangling each through the header rule and
    /// keeping the raw text as the column header. Idempotent.
    pub fn set_headers(&mut self, headers: &[String]) -> Result<(), MprError> {
        self.check_open()?;
        let want = (headers.len() as u32).max(self.header.n_cols);
        let mut columns = self.meta.columns(want)?;
        for (col, raw) in columns.iter_mut().zip(headers) {
            col.name = mangle_header(raw);
            col.header = Some(raw.clone());
        }
        self.meta.set_columns(&columns);
        Ok(())
    }

    /// Current column names.
    pub fn headers(&mut self) -> Result<Vec<String>, MprError> {
        Ok(self
            .meta
            .columns(self.header.n_cols)?
            .into_iter()
            .map(|c| c.name)
            .collect())
    }

    /// Applies per-column descriptors supplied by a source.
    pub fn set_column_specs(&mut self, specs: &[crate::source::ColumnSpec]) -> Result<(), MprError> {
        self.check_open()?;
        let want = (specs.len() as u32).max(self.header.n_cols);
        let mut columns = self.meta.columns(want)?;
        for spec in specs {
            // ColumnSpec positions are 1-based, like schema rows.
            let Some(col) = columns.get_mut((spec.position as usize).saturating_sub(1)) else {
                continue;
            };
            col.name = mangle_header(&spec.name);
            col.header = Some(spec.name.clone());
            col.description = spec.description.clone();
        }
        self.meta.set_columns(&columns);
        Ok(())
    }

    /// Merges per-column type counts and resolutions from a type intuiter.
    pub fn set_types(&mut self, ti: &TypeIntuiter) -> Result<(), MprError> {
        self.check_open()?;
        let want = (ti.columns().len() as u32).max(self.header.n_cols);
        let mut columns = self.meta.columns(want)?;

        for profile in ti.columns() {
            let Some(col) = columns.get_mut(profile.position as usize) else {
                continue;
            };
            col.position = Some(profile.position);
            if col.header.is_none() {
                col.header = profile.header.clone();
            }
            col.length = Some(profile.length);
            col.has_codes = Some(profile.has_codes);
            col.type_count = Some(profile.count);
            col.ints = Some(profile.ints);
            col.floats = Some(profile.floats);
            col.strs = Some(profile.strs);
            col.unicode = Some(profile.unicode);
            col.nones = Some(profile.nones);
            col.datetimes = Some(profile.datetimes);
            col.dates = Some(profile.dates);
            col.times = Some(profile.times);
            col.resolved_type = Some(profile.resolved_type.clone());
            if col.col_type.is_none() {
                col.col_type = Some(profile.resolved_type.clone());
            }
        }
        self.meta.set_columns(&columns);
        Ok(())
    }

    /// Merges statistical fields into the schema and mirrors a summary into
    /// the `stats` section.
    pub fn set_stats(&mut self, stats: &Stats) -> Result<(), MprError> {
        self.check_open()?;
        let mut columns = self.meta.columns(self.header.n_cols)?;

        for (name, set) in stats.sets() {
            let entry = set.to_entry();
            if let Some(col) = columns.iter_mut().find(|c| c.name == *name) {
                col.flags = entry.flags.clone();
                col.lom = entry.lom.clone();
                col.stat_count = Some(entry.count);
                col.nuniques = Some(entry.nuniques);
                col.mean = entry.mean;
                col.std = entry.std;
                col.min = entry.min;
                col.p25 = entry.p25;
                col.p50 = entry.p50;
                col.p75 = entry.p75;
                col.max = entry.max;
                col.skewness = entry.skewness;
                col.kurtosis = entry.kurtosis;
                col.hist = Some(entry.hist.clone());
                col.text_hist = Some(entry.text_hist.clone());
                col.uvalues = Some(entry.uvalues.clone());
            }
            self.meta.stats.insert(name.clone(), entry);
        }
        self.meta.set_columns(&columns);
        Ok(())
    }

    /// Records the row spec produced by the row intuiter: data range,
    /// header/comment rows, data pattern, and coalesced column names.
    pub fn set_row_spec(&mut self, spec: &RowSpec) -> Result<(), MprError> {
        self.check_open()?;
        self.header.data_start_row = spec.start_line;
        if let Some(end) = spec.end_line {
            self.header.data_end_row = end;
        }

        self.meta.row_spec.header_rows = Some(spec.header_lines.clone());
        self.meta.row_spec.comment_rows = Some(spec.comment_lines.clone());
        self.meta.row_spec.start_row = Some(spec.start_line);
        self.meta.row_spec.end_row = spec.end_line;
        self.meta.row_spec.data_pattern = Some(spec.data_pattern.clone());

        self.set_headers(&spec.headers)
    }

    /// Records a row spec supplied by a source spec; `header_rows` are the
    /// raw rows at the spec's header indices, coalesced into column names.
    pub fn set_spec_row_spec(
        &mut self,
        spec: &SourceSpec,
        header_rows: &[Row],
    ) -> Result<(), MprError> {
        self.check_open()?;
        if let Some(start) = spec.start_line {
            self.header.data_start_row = start;
        }
        if let Some(end) = spec.end_line {
            self.header.data_end_row = end;
        }

        self.meta.row_spec.header_rows = spec.header_lines.clone();
        self.meta.row_spec.comment_rows = None;
        self.meta.row_spec.start_row = spec.start_line;
        self.meta.row_spec.end_row = spec.end_line;
        self.meta.row_spec.data_pattern = None;

        if !header_rows.is_empty() {
            let headers = crate::intuit::coalesce_headers(header_rows);
            self.set_headers(&headers)?;
        }
        Ok(())
    }

    /// Records source provenance.
    pub fn set_source_spec(&mut self, spec: &SourceSpec) {
        self.meta.source.url = spec.url.clone();
        self.meta.source.fetch_time = spec.download_time;
        self.meta.source.file_type = spec.filetype.clone();
        self.meta.source.url_type = spec.urltype.clone();
        self.meta.source.encoding = spec.encoding.clone();
        self.meta.excel.worksheet = spec.segment.clone();
    }

    /// Marks the file finalized; persisted by the next `close`.
    pub fn finalize(&mut self) {
        self.meta.process.finalized = true;
    }

    /// Flushes pending rows, finishes the row stream, and persists header
    /// and meta. The file is truncated after the meta block.
    pub fn close(mut self) -> Result<(), MprError> {
        self.check_open()?;
        match self.close_inner() {
            Ok(()) => {
                self.state = WriterState::Closed;
                self.lock = None;
                Ok(())
            }
            Err(e) => {
                // Drop will remove the partial artifact for fresh sessions.
                self.state = WriterState::Poisoned;
                Err(e)
            }
        }
    }

    fn close_inner(&mut self) -> Result<(), MprError> {
        self.flush_cache()?;

        let mut fh = match mem::replace(&mut self.sink, RowSink::Finished) {
            RowSink::Stream(encoder) => {
                let mut fh = encoder.finish()?;
                self.header.meta_start = fh.stream_position()?;
                fh
            }
            RowSink::MetaOnly(fh) => fh,
            RowSink::Finished => return Err(MprError::Other("writer already closed".into())),
        };

        self.header.write(&mut fh)?;
        let end = self.meta.write(&mut fh, self.header.meta_start)?;
        fh.truncate(end)?;
        fh.flush()?;
        Ok(())
    }

    /// Abandons the session and deletes the file.
    pub fn abort(mut self) -> Result<(), MprError> {
        self.sink = RowSink::Finished;
        self.state = WriterState::Closed;
        self.lock = None;
        if self.fs.exists(&self.path) {
            self.fs.remove(&self.path)?;
        }
        Ok(())
    }
}

impl Drop for MprWriter {
    fn drop(&mut self) {
        if self.fresh && self.state != WriterState::Closed {
            // Interrupted mid-load: a partial row stream must not survive.
            self.sink = RowSink::Finished;
            if self.fs.exists(&self.path) {
                if let Err(e) = self.fs.remove(&self.path) {
                    warn!("failed to remove partial file {}: {e}", self.path);
                }
            }
        }
    }
}

pub(crate) fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
