//! The load orchestrator.
//!
//! [`MprFile`] ties a filesystem and a path together and drives the full
//! materialization pipeline:
//!
//! ```text
//! source rows → writer → close
//!     → row intuiter  → row spec written back
//!     → type intuiter → type profile written back
//!     → stats engine  → stats written back
//!     → finalize
//! ```
//!
//! A failure while loading rows aborts the writer and deletes the file. A
//! failure in any later step is recovered: a warning lands in
//! `meta.warnings` and the pipeline continues.

use std::sync::Arc;
use std::time::Instant;

use log::{debug, warn};

use crate::err::MprError;
use crate::intuit::{RowIntuiter, TypeIntuiter};
use crate::mpr_io::MprFilesystem;
use crate::mpr_meta::Meta;
use crate::mpr_reader::{Info, MprReader};
use crate::mpr_value::Row;
use crate::mpr_writer::MprWriter;
use crate::source::RowSource;
use crate::stats::Stats;
use crate::EXTENSION;

/// Options for [`MprFile::load_rows`].
#[derive(Clone, Copy, Debug)]
pub struct LoadOptions {
    /// Run the row intuiter. `None` means "unless the source spec already
    /// pins a row spec".
    pub intuit_rows: Option<bool>,
    /// Run the type intuiter.
    pub intuit_type: bool,
    /// Run the stats engine.
    pub run_stats: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            intuit_rows: None,
            intuit_type: true,
            run_stats: true,
        }
    }
}

/// An MPR file on a filesystem: the entry point for loading and reading.
#[derive(Clone)]
pub struct MprFile {
    fs: Arc<dyn MprFilesystem>,
    path: String,
}

impl MprFile {
    /// Binds `path` on `fs`, appending the `.mpr` extension when missing.
    pub fn new(fs: Arc<dyn MprFilesystem>, path: &str) -> Self {
        let path = if path.ends_with(EXTENSION) {
            path.to_string()
        } else {
            format!("{path}{EXTENSION}")
        };
        Self { fs, path }
    }

    /// The bound path, with extension.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// True when the file exists.
    pub fn exists(&self) -> bool {
        self.fs.exists(&self.path)
    }

    /// Removes the file. Remote filesystems refuse this.
    pub fn remove(&self) -> Result<(), MprError> {
        self.fs.remove(&self.path)
    }

    /// Opens a reader.
    pub fn reader(&self) -> Result<MprReader, MprError> {
        MprReader::open(Arc::clone(&self.fs), &self.path)
    }

    /// Opens a writer.
    pub fn writer(&self) -> Result<MprWriter, MprError> {
        MprWriter::open(Arc::clone(&self.fs), &self.path)
    }

    /// The decoded meta block, when the file exists.
    pub fn meta(&self) -> Result<Option<Meta>, MprError> {
        if !self.exists() {
            return Ok(None);
        }
        Ok(Some(self.reader()?.meta().clone()))
    }

    /// Total rows, when the file exists.
    pub fn n_rows(&self) -> Result<Option<u32>, MprError> {
        if !self.exists() {
            return Ok(None);
        }
        Ok(Some(self.reader()?.n_rows()))
    }

    /// Column names, when the file exists.
    pub fn headers(&self) -> Result<Option<Vec<String>>, MprError> {
        if !self.exists() {
            return Ok(None);
        }
        Ok(Some(self.reader()?.headers()))
    }

    /// File summary, when the file exists.
    pub fn info(&self) -> Result<Option<Info>, MprError> {
        if !self.exists() {
            return Ok(None);
        }
        Ok(Some(self.reader()?.info()))
    }

    /// Materializes `source` into this file and runs the profiling
    /// pipeline per `options`.
    pub fn load_rows<S: RowSource>(&self, source: S, options: &LoadOptions) -> Result<(), MprError> {
        if let Some(n) = self.n_rows()? {
            if n > 0 {
                return Err(MprError::RowsAlreadyLoaded(n));
            }
            // An empty artifact holds nothing worth keeping; re-materialize.
            self.remove()?;
        }

        let started = Instant::now();
        let spec = source.spec().cloned();
        let headers = source.headers();

        // Load step: failures here delete the artifact.
        {
            let mut w = self.writer()?;
            if let Some(headers) = &headers {
                w.set_headers(headers)?;
            }
            if let Some(col_specs) = source.columns() {
                w.set_column_specs(&col_specs)?;
            }
            if let Some(spec) = &spec {
                w.set_source_spec(spec);
            }
            let mut source = source;
            loop {
                let row = match source.next() {
                    Some(Ok(row)) => row,
                    Some(Err(e)) => {
                        w.abort()?;
                        return Err(e);
                    }
                    None => break,
                };
                if let Err(e) = w.append(row) {
                    w.abort()?;
                    return Err(e);
                }
            }
            w.close()?;
        }

        // Row spec: intuit unless the source spec already pins one.
        let intuit_rows = options
            .intuit_rows
            .unwrap_or_else(|| spec.as_ref().is_none_or(|s| !s.has_rowspec()));

        if intuit_rows {
            if let Err(e) = self.run_row_intuiter() {
                self.push_warning(format!("row intuition failed: {e}"))?;
            }
        } else if let Some(spec) = spec.as_ref().filter(|s| s.has_rowspec()) {
            if let Err(e) = self.apply_spec_row_spec(spec) {
                self.push_warning(format!("row spec from source failed: {e}"))?;
            }
        }

        if options.intuit_type {
            if let Err(e) = self.run_type_intuiter() {
                self.push_warning(format!("type intuition failed: {e}"))?;
            }
        }

        if options.run_stats {
            if let Err(e) = self.run_stats() {
                self.push_warning(format!("stats failed: {e}"))?;
            }
        }

        let mut w = self.writer()?;
        w.meta_mut().about.load_time = Some(started.elapsed().as_secs_f64());
        w.finalize();
        w.close()?;

        debug!("loaded {} in {:?}", self.path, started.elapsed());
        Ok(())
    }

    /// Runs the row intuiter and writes the row spec back.
    pub fn run_row_intuiter(&self) -> Result<(), MprError> {
        let reader = self.reader()?;
        let row_spec = RowIntuiter::default().run(&reader)?;

        let mut w = self.writer()?;
        w.meta_mut().process.last_process = Some("intuit_rows".into());
        w.set_row_spec(&row_spec)?;
        w.close()
    }

    /// Runs the type intuiter over the data rows and writes the profile
    /// back.
    pub fn run_type_intuiter(&self) -> Result<(), MprError> {
        let reader = self.reader()?;
        let ti = TypeIntuiter::new()
            .process_header(&reader.headers())
            .run(reader.rows()?, u64::from(reader.data_row_count()))?;

        let mut w = self.writer()?;
        w.meta_mut().process.last_process = Some("intuit_type".into());
        w.set_types(&ti)?;
        w.close()
    }

    /// Runs the stats engine over the data rows and writes the results
    /// back.
    pub fn run_stats(&self) -> Result<(), MprError> {
        let reader = self.reader()?;
        let schema: Vec<(String, String)> = reader
            .columns()
            .iter()
            .map(|c| {
                let typ = c
                    .resolved_type
                    .clone()
                    .or_else(|| c.col_type.clone())
                    .unwrap_or_else(|| "unknown".into());
                (c.name.clone(), typ)
            })
            .collect();

        let stats = Stats::new(&schema).run(&reader, Some(u64::from(reader.n_rows())))?;

        let mut w = self.writer()?;
        w.meta_mut().process.last_process = Some("run_stats".into());
        w.set_stats(&stats)?;
        w.close()
    }

    fn apply_spec_row_spec(&self, spec: &crate::source::SourceSpec) -> Result<(), MprError> {
        // Coalescing named header lines needs the raw rows at those indices.
        let header_rows: Vec<Row> = match &spec.header_lines {
            Some(lines) if !lines.is_empty() => {
                let max_line = *lines.iter().max().expect("non-empty") as usize;
                let reader = self.reader()?;
                let head: Vec<Row> = reader
                    .raw()?
                    .take(max_line + 1)
                    .collect::<Result<_, _>>()?;
                lines
                    .iter()
                    .filter_map(|&i| head.get(i as usize).cloned())
                    .collect()
            }
            _ => Vec::new(),
        };

        let mut w = self.writer()?;
        w.set_spec_row_spec(spec, &header_rows)?;
        w.close()
    }

    fn push_warning(&self, text: String) -> Result<(), MprError> {
        warn!("{}: {text}", self.path);
        let mut w = self.writer()?;
        w.meta_mut().warnings.push(text);
        w.close()
    }
}
