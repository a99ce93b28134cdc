use std::io::Cursor;

use mprows::{FileHeader, MprError, MprReader, FILE_HEADER_SIZE};

mod common;

#[test]
fn header_roundtrip_exact() {
    let h = FileHeader {
        n_rows: 2,
        n_cols: 3,
        meta_start: 128,
        data_start_row: 0,
        data_end_row: 1,
    };
    let mut buf = Cursor::new(Vec::new());
    h.write(&mut buf).unwrap();
    assert_eq!(buf.get_ref().len() as u64, FILE_HEADER_SIZE);
    assert_eq!(FileHeader::read(&mut buf).unwrap(), h);
}

#[test]
fn header_roundtrip_extremes() {
    for h in [
        FileHeader {
            n_rows: 0,
            n_cols: 0,
            meta_start: FILE_HEADER_SIZE,
            data_start_row: 0,
            data_end_row: 0,
        },
        FileHeader {
            n_rows: u32::MAX,
            n_cols: u32::MAX,
            meta_start: u64::MAX,
            data_start_row: u32::MAX - 1,
            data_end_row: u32::MAX - 1,
        },
    ] {
        let mut buf = Cursor::new(Vec::new());
        h.write(&mut buf).unwrap();
        assert_eq!(FileHeader::read(&mut buf).unwrap(), h);
    }
}

#[test]
fn truncated_file_is_corrupt() {
    use std::io::Write;

    let fs = common::memfs();
    {
        let mut fh = mprows::MprFilesystem::open_write(fs.as_ref(), "bad.mpr", true).unwrap();
        fh.write_all(b"AMBR").unwrap();
    }
    let err = MprReader::open(fs, "bad.mpr").unwrap_err();
    assert!(matches!(err, MprError::CorruptFile(_)), "got {err}");
}

#[test]
fn foreign_file_is_corrupt() {
    use std::io::Write;

    let fs = common::memfs();
    {
        let mut fh = mprows::MprFilesystem::open_write(fs.as_ref(), "notmpr.mpr", true).unwrap();
        fh.write_all(b"PK\x03\x04 definitely not an mpr file padding padding")
            .unwrap();
    }
    let err = MprReader::open(fs, "notmpr.mpr").unwrap_err();
    assert!(matches!(err, MprError::CorruptFile(_)), "got {err}");
}

#[test]
fn row_stream_is_bounded_by_meta_start() {
    // A finished file holds rows and meta back to back; iterating raw rows
    // must stop exactly at the row count without touching meta bytes.
    let fs = common::memfs();
    let f = common::load_simple(&fs, "bounded", 250);
    let reader = f.reader().unwrap();

    let rows: Vec<_> = reader.raw().unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(rows.len() as u32, reader.n_rows());
}
