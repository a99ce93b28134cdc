#![allow(dead_code)]

use std::sync::Arc;

use mprows::{
    GeneratorSource, LoadOptions, MemoryFilesystem, MprError, MprFile, Row, RowSource, Value,
};

// ── Setup helpers ──────────────────────────────────────────────────

/// Fresh in-memory filesystem.
pub fn memfs() -> Arc<MemoryFilesystem> {
    Arc::new(MemoryFilesystem::new())
}

/// Binds an MPR file on the given filesystem.
pub fn mpr(fs: &Arc<MemoryFilesystem>, name: &str) -> MprFile {
    MprFile::new(fs.clone(), name)
}

pub fn s(v: &str) -> Value {
    Value::String(v.to_string())
}

/// Loads `[[1, "name 1"], [2, "name 2"], ...]` with headers `id`, `name`
/// through the full pipeline.
pub fn load_simple(fs: &Arc<MemoryFilesystem>, name: &str, rows: u32) -> MprFile {
    let f = mpr(fs, name);
    let source = GeneratorSource::new(
        (1..=i64::from(rows)).map(|i| vec![Value::Int(i), Value::String(format!("name {i}"))]),
    )
    .with_headers(vec!["id".into(), "name".into()]);
    f.load_rows(source, &LoadOptions::default()).unwrap();
    f
}

/// The messy-source shape: two comment rows, three header rows of
/// identifiers, then `data_rows` rows of `[int, word, float]`.
pub fn messy_rows(data_rows: i64) -> Vec<Row> {
    let mut rows: Vec<Row> = vec![
        vec![s("comment")],
        vec![s("")],
        vec![s("id"), s("name"), s("value")],
        vec![s("alpha"), s("beta"), s("gamma")],
        vec![s("one"), s("two"), s("three")],
    ];
    for i in 0..data_rows {
        rows.push(vec![
            Value::Int(i),
            s("item"),
            Value::Float(i as f64 / 2.0),
        ]);
    }
    rows
}

/// A source that fails with an I/O-flavored error after `ok_rows` rows.
pub struct FailingSource {
    yielded: i64,
    ok_rows: i64,
}

impl FailingSource {
    pub fn new(ok_rows: i64) -> Self {
        Self {
            yielded: 0,
            ok_rows,
        }
    }
}

impl Iterator for FailingSource {
    type Item = Result<Row, MprError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.yielded >= self.ok_rows {
            return Some(Err(MprError::Other("source went away".into())));
        }
        self.yielded += 1;
        Some(Ok(vec![Value::Int(self.yielded)]))
    }
}

impl RowSource for FailingSource {}
