//! Fixed file header codec for the MPR container.
//!
//! The header is a 34-byte big-endian struct at offset 0:
//!
//! | offset | size | field |
//! |--------|------|-------|
//! | 0 | 8 | magic `AMBRMPDF` |
//! | 8 | 2 | version (1) |
//! | 10 | 4 | n_rows |
//! | 14 | 4 | n_cols |
//! | 18 | 8 | meta_start |
//! | 26 | 4 | data_start_row |
//! | 30 | 4 | data_end_row |
//!
//! The row stream occupies `[34, meta_start)` and the meta block
//! `[meta_start, EOF)`.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Seek, SeekFrom, Write};

use crate::err::MprError;

/// Magic bytes at offset 0 of every MPR file.
pub const MAGIC: &[u8; 8] = b"AMBRMPDF";

/// Current container version.
pub const VERSION: u16 = 1;

/// Size of the packed file header in bytes.
pub const FILE_HEADER_SIZE: u64 = 34;

/// The fixed file header of an MPR container.
///
/// Magic and version are implicit: they are validated on read and written
/// as constants.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileHeader {
    /// Total rows written, including header and comment rows.
    pub n_rows: u32,
    /// Observed maximum row width.
    pub n_cols: u32,
    /// Byte offset where the row stream ends and the meta block begins.
    pub meta_start: u64,
    /// First row index considered data.
    pub data_start_row: u32,
    /// Last row index considered data, inclusive.
    pub data_end_row: u32,
}

impl FileHeader {
    /// Reads and validates the header from offset 0 of `fh`.
    pub fn read<R: Read + Seek>(fh: &mut R) -> Result<Self, MprError> {
        fh.seek(SeekFrom::Start(0))?;

        let mut magic = [0u8; 8];
        fh.read_exact(&mut magic)
            .map_err(|e| MprError::CorruptFile(format!("truncated file header: {e}")))?;
        if &magic != MAGIC {
            return Err(MprError::CorruptFile(format!(
                "bad magic {:?}; expected {:?}",
                String::from_utf8_lossy(&magic),
                String::from_utf8_lossy(MAGIC),
            )));
        }

        let version = fh
            .read_u16::<BigEndian>()
            .map_err(|e| MprError::CorruptFile(format!("truncated file header: {e}")))?;
        if version != VERSION {
            return Err(MprError::CorruptFile(format!(
                "unsupported version {version}; expected {VERSION}"
            )));
        }

        let mut read_u32 = |fh: &mut R| {
            fh.read_u32::<BigEndian>()
                .map_err(|e| MprError::CorruptFile(format!("truncated file header: {e}")))
        };

        let n_rows = read_u32(fh)?;
        let n_cols = read_u32(fh)?;
        let meta_start = fh
            .read_u64::<BigEndian>()
            .map_err(|e| MprError::CorruptFile(format!("truncated file header: {e}")))?;
        let data_start_row = read_u32(fh)?;
        let data_end_row = read_u32(fh)?;

        Ok(Self {
            n_rows,
            n_cols,
            meta_start,
            data_start_row,
            data_end_row,
        })
    }

    /// Writes the header at offset 0 of `fh`, leaving the stream positioned
    /// just past it.
    pub fn write<W: Write + Seek>(&self, fh: &mut W) -> Result<(), MprError> {
        fh.seek(SeekFrom::Start(0))?;
        fh.write_all(MAGIC)?;
        fh.write_u16::<BigEndian>(VERSION)?;
        fh.write_u32::<BigEndian>(self.n_rows)?;
        fh.write_u32::<BigEndian>(self.n_cols)?;
        fh.write_u64::<BigEndian>(self.meta_start)?;
        fh.write_u32::<BigEndian>(self.data_start_row)?;
        fh.write_u32::<BigEndian>(self.data_end_row)?;
        Ok(())
    }

    /// Checks the row-range invariants against the recorded counts.
    pub fn validate(&self) -> Result<(), MprError> {
        if self.meta_start < FILE_HEADER_SIZE {
            return Err(MprError::CorruptFile(format!(
                "meta_start {} precedes the row stream",
                self.meta_start
            )));
        }
        if self.n_rows > 0
            && (self.data_start_row > self.data_end_row || self.data_end_row >= self.n_rows)
        {
            return Err(MprError::CorruptFile(format!(
                "bad data range [{}, {}] for {} rows",
                self.data_start_row, self.data_end_row, self.n_rows
            )));
        }
        Ok(())
    }
}
