//! The reader: cached metadata plus single-pass, forward-only row
//! iterators.
//!
//! Header and meta are decoded once at open (the schema template invariant
//! is re-checked there). Every iterator opens its own file handle, bounds
//! the compressed stream at `meta_start` with [`Read::take`], and walks the
//! gzip member from the start — so metadata access never disturbs an
//! in-progress iteration and concurrent cursors do not share state.
//!
//! Iteration modes:
//!
//! - [`raw`](MprReader::raw): every row in file order.
//! - [`rows`](MprReader::rows): rows inside `[data_start_row, data_end_row]`.
//! - [`classified`](MprReader::classified): every row with its
//!   header/comment/data/blank label.
//! - [`proxied`](MprReader::proxied): data rows as owned [`RowProxy`]
//!   views keyed by column name.

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use flate2::read::GzDecoder;
use serde::Serialize;

use crate::err::MprError;
use crate::mpr_header::{FileHeader, FILE_HEADER_SIZE};
use crate::mpr_io::{FileHandle, LocalFilesystem, MprFilesystem};
use crate::mpr_meta::{Column, Meta};
use crate::mpr_value::{decode_batch, Row, Value};

/// Reader over a closed MPR file.
#[derive(Clone)]
pub struct MprReader {
    fs: Arc<dyn MprFilesystem>,
    path: String,
    header: FileHeader,
    meta: Meta,
    columns: Vec<Column>,
}

impl std::fmt::Debug for MprReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MprReader")
            .field("path", &self.path)
            .field("header", &self.header)
            .field("meta", &self.meta)
            .field("columns", &self.columns)
            .finish()
    }
}

/// Summary of a file, as reported by the CLI `metadata` subcommand.
#[derive(Debug, Serialize)]
pub struct Info {
    /// Container version.
    pub version: u16,
    /// Byte offset where the row stream starts.
    pub data_start_pos: u64,
    /// Byte offset where the meta block starts.
    pub meta_start_pos: u64,
    /// Total rows in the file.
    pub rows: u32,
    /// Observed maximum row width.
    pub cols: u32,
    /// Header row indices.
    pub header_rows: Option<Vec<u32>>,
    /// Comment row indices.
    pub comment_rows: Option<Vec<u32>>,
    /// First data row.
    pub data_start_row: u32,
    /// Last data row, inclusive.
    pub data_end_row: u32,
    /// Column names.
    pub headers: Vec<String>,
}

impl MprReader {
    /// Opens `path` on `fs`, decoding header and meta.
    pub fn open(fs: Arc<dyn MprFilesystem>, path: &str) -> Result<Self, MprError> {
        let mut fh = fs.open_read(path)?;
        let header = FileHeader::read(&mut fh)?;
        header.validate()?;
        let mut meta = Meta::read(&mut fh, header.meta_start)?;
        let columns = meta.columns(header.n_cols)?;

        Ok(Self {
            fs,
            path: path.to_string(),
            header,
            meta,
            columns,
        })
    }

    /// Opens a file by local filesystem path.
    pub fn open_syspath<P: AsRef<Path>>(path: P) -> Result<Self, MprError> {
        let path = path.as_ref();
        let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
        let fs = match parent {
            Some(dir) => LocalFilesystem::new(dir)?,
            None => LocalFilesystem::new(".")?,
        };
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| MprError::Configuration(format!("bad path: {}", path.display())))?
            .to_string();
        Self::open(Arc::new(fs), &name)
    }

    /// Total rows in the file.
    pub fn n_rows(&self) -> u32 {
        self.header.n_rows
    }

    /// Observed maximum row width.
    pub fn n_cols(&self) -> u32 {
        self.header.n_cols
    }

    /// First data row index.
    pub fn data_start_row(&self) -> u32 {
        self.header.data_start_row
    }

    /// Last data row index, inclusive.
    pub fn data_end_row(&self) -> u32 {
        self.header.data_end_row
    }

    /// Number of rows a data iteration yields.
    pub fn data_row_count(&self) -> u32 {
        if self.header.n_rows == 0 {
            0
        } else {
            self.header.data_end_row - self.header.data_start_row + 1
        }
    }

    /// The decoded meta block.
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// The decoded file header.
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Typed column descriptors.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Column names in position order.
    pub fn headers(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// File summary.
    pub fn info(&self) -> Info {
        Info {
            version: crate::mpr_header::VERSION,
            data_start_pos: FILE_HEADER_SIZE,
            meta_start_pos: self.header.meta_start,
            rows: self.header.n_rows,
            cols: self.header.n_cols,
            header_rows: self.meta.row_spec.header_rows.clone(),
            comment_rows: self.meta.row_spec.comment_rows.clone(),
            data_start_row: self.header.data_start_row,
            data_end_row: self.header.data_end_row,
            headers: self.headers(),
        }
    }

    fn open_stream(&self) -> Result<GzDecoder<std::io::Take<Box<dyn FileHandle>>>, MprError> {
        let mut fh = self.fs.open_read(&self.path)?;
        fh.seek(SeekFrom::Start(FILE_HEADER_SIZE))?;
        // The gzip member and the meta block are adjacent; the bound keeps
        // the decompressor from ever reading meta bytes.
        let bounded = fh.take(self.header.meta_start - FILE_HEADER_SIZE);
        Ok(GzDecoder::new(bounded))
    }

    /// Iterates every row in file order.
    pub fn raw(&self) -> Result<RawRows, MprError> {
        Ok(RawRows {
            decoder: self.open_stream()?,
            batch: VecDeque::new(),
            done: false,
        })
    }

    /// Iterates rows inside the data range only.
    pub fn rows(&self) -> Result<DataRows, MprError> {
        Ok(DataRows {
            inner: self.raw()?,
            idx: 0,
            start: self.header.data_start_row,
            end: self.header.data_end_row,
            empty: self.header.n_rows == 0,
        })
    }

    /// Iterates every row with its classification label.
    pub fn classified(&self) -> Result<ClassifiedRows, MprError> {
        let rs = &self.meta.row_spec;
        Ok(ClassifiedRows {
            inner: self.raw()?,
            idx: 0,
            header_rows: rs.header_rows.clone().unwrap_or_default(),
            comment_rows: rs.comment_rows.clone().unwrap_or_default(),
            start: rs.start_row.unwrap_or(self.header.data_start_row),
            end: rs.end_row.unwrap_or(self.header.data_end_row),
        })
    }

    /// Iterates data rows as name-addressable [`RowProxy`] views.
    pub fn proxied(&self) -> Result<ProxyRows, MprError> {
        Ok(ProxyRows {
            inner: self.rows()?,
            index: Arc::new(HeaderIndex::new(self.headers())),
        })
    }

    /// Lazily filters and projects data rows.
    pub fn select<P, F, T>(&self, predicate: P, projection: F) -> Result<Select<P, F>, MprError>
    where
        P: FnMut(&RowProxy) -> bool,
        F: FnMut(&RowProxy) -> T,
    {
        Ok(Select {
            inner: self.proxied()?,
            predicate,
            projection,
        })
    }
}

// ── Iterators ──────────────────────────────────────────────────────

/// Iterator over every row in file order.
pub struct RawRows {
    decoder: GzDecoder<std::io::Take<Box<dyn FileHandle>>>,
    batch: VecDeque<Row>,
    done: bool,
}

impl Iterator for RawRows {
    type Item = Result<Row, MprError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.batch.pop_front() {
                return Some(Ok(row));
            }
            if self.done {
                return None;
            }
            match decode_batch(&mut self.decoder) {
                Ok(Some(rows)) => self.batch.extend(rows),
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Iterator over the data range.
pub struct DataRows {
    inner: RawRows,
    idx: u32,
    start: u32,
    end: u32,
    empty: bool,
}

impl Iterator for DataRows {
    type Item = Result<Row, MprError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.empty {
            return None;
        }
        loop {
            let row = match self.inner.next()? {
                Ok(row) => row,
                Err(e) => return Some(Err(e)),
            };
            let idx = self.idx;
            self.idx += 1;
            if idx < self.start {
                continue;
            }
            if idx > self.end {
                return None;
            }
            return Some(Ok(row));
        }
    }
}

/// Classification of a row index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowLabel {
    /// Part of the header.
    Header,
    /// A comment row.
    Comment,
    /// Inside the data range.
    Data,
    /// Blank or otherwise unclassified.
    Blank,
}

impl RowLabel {
    /// Single-letter code (`H`, `C`, `D`, `B`).
    pub fn code(&self) -> char {
        match self {
            RowLabel::Header => 'H',
            RowLabel::Comment => 'C',
            RowLabel::Data => 'D',
            RowLabel::Blank => 'B',
        }
    }
}

/// A row paired with its index, 1-based ordinal, and label.
#[derive(Clone, Debug)]
pub struct ClassifiedRow {
    /// 0-based row index.
    pub idx: u32,
    /// 1-based ordinal.
    pub pos: u32,
    /// Classification label.
    pub label: RowLabel,
    /// The row itself.
    pub row: Row,
}

/// Iterator over every row with classification labels derived from meta.
pub struct ClassifiedRows {
    inner: RawRows,
    idx: u32,
    header_rows: Vec<u32>,
    comment_rows: Vec<u32>,
    start: u32,
    end: u32,
}

impl Iterator for ClassifiedRows {
    type Item = Result<ClassifiedRow, MprError>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = match self.inner.next()? {
            Ok(row) => row,
            Err(e) => return Some(Err(e)),
        };
        let idx = self.idx;
        self.idx += 1;

        let label = if self.header_rows.contains(&idx) {
            RowLabel::Header
        } else if self.comment_rows.contains(&idx) {
            RowLabel::Comment
        } else if self.start <= idx && idx <= self.end {
            RowLabel::Data
        } else {
            RowLabel::Blank
        };

        Some(Ok(ClassifiedRow {
            idx,
            pos: idx + 1,
            label,
            row,
        }))
    }
}

// ── Row proxy ──────────────────────────────────────────────────────

struct HeaderIndex {
    names: Vec<String>,
    by_name: HashMap<String, usize>,
}

impl HeaderIndex {
    fn new(names: Vec<String>) -> Self {
        let by_name = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        Self { names, by_name }
    }
}

/// An owned row view addressable by column name.
///
/// Each proxy owns its row; the header index is shared. Callers may hold
/// any number of proxies from one iteration without aliasing.
#[derive(Clone)]
pub struct RowProxy {
    index: Arc<HeaderIndex>,
    row: Row,
}

impl RowProxy {
    /// Cell by column name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.index.by_name.get(name).and_then(|&i| self.row.get(i))
    }

    /// Cell by 0-based position.
    pub fn at(&self, pos: usize) -> Option<&Value> {
        self.row.get(pos)
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.row.len()
    }

    /// True when the row has no cells.
    pub fn is_empty(&self) -> bool {
        self.row.is_empty()
    }

    /// Column names in position order.
    pub fn headers(&self) -> &[String] {
        &self.index.names
    }

    /// Consumes the proxy, returning the row.
    pub fn into_row(self) -> Row {
        self.row
    }
}

impl std::ops::Index<usize> for RowProxy {
    type Output = Value;

    fn index(&self, i: usize) -> &Value {
        &self.row[i]
    }
}

/// Iterator over data rows as [`RowProxy`] views.
pub struct ProxyRows {
    inner: DataRows,
    index: Arc<HeaderIndex>,
}

impl Iterator for ProxyRows {
    type Item = Result<RowProxy, MprError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next()? {
            Ok(row) => Some(Ok(RowProxy {
                index: Arc::clone(&self.index),
                row,
            })),
            Err(e) => Some(Err(e)),
        }
    }
}

/// Lazy filtered projection over data-row proxies.
pub struct Select<P, F> {
    inner: ProxyRows,
    predicate: P,
    projection: F,
}

impl<P, F, T> Iterator for Select<P, F>
where
    P: FnMut(&RowProxy) -> bool,
    F: FnMut(&RowProxy) -> T,
{
    type Item = Result<T, MprError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let proxy = match self.inner.next()? {
                Ok(p) => p,
                Err(e) => return Some(Err(e)),
            };
            if (self.predicate)(&proxy) {
                return Some(Ok((self.projection)(&proxy)));
            }
        }
    }
}
