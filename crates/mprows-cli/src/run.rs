use colored::Colorize;
use indicatif::ProgressBar;
use log::debug;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mprows::{
    LoadOptions, LocalFilesystem, MprError, MprFile, MprReader, Row, RowSource, Value,
};

use crate::cli::{MprCli, MprCliCommands};

/// A delimited text file as a row source. Every physical line becomes a
/// row of strings; header and comment detection is left to the intuiters.
struct DelimitedSource {
    records: csv::StringRecordsIntoIter<File>,
    pb: Option<ProgressBar>,
}

impl DelimitedSource {
    fn open(path: &Path, delimiter: char, pb: Option<ProgressBar>) -> Result<Self, MprError> {
        let file = File::open(path)?;
        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter as u8)
            .from_reader(file);
        Ok(Self {
            records: reader.into_records(),
            pb,
        })
    }
}

impl Iterator for DelimitedSource {
    type Item = Result<Row, MprError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.records.next()? {
            Ok(r) => r,
            Err(e) => return Some(Err(MprError::Other(format!("csv read failed: {e}")))),
        };
        if let Some(pb) = &self.pb {
            pb.inc(1);
        }
        Some(Ok(record
            .iter()
            .map(|cell| Value::String(cell.to_string()))
            .collect()))
    }
}

impl RowSource for DelimitedSource {}

#[cfg(feature = "sql")]
fn table_name_from_path(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("data")
        .to_string()
}

/// Executes the CLI command specified by the parsed [`MprCli`] arguments.
pub fn run(args: MprCli) -> Result<(), MprError> {
    env_logger::init();

    match args.command {
        MprCliCommands::Metadata { input, as_json } => {
            debug!("reading metadata from {}", input.to_string_lossy());
            let reader = MprReader::open_syspath(&input)?;
            let info = reader.info();

            if as_json {
                let doc = serde_json::json!({
                    "info": info,
                    "meta": reader.meta(),
                });
                println!("{}", serde_json::to_string_pretty(&doc)?);
            } else {
                println!("{}: {}", "file".bright_cyan(), input.to_string_lossy());
                println!("{}: {}", "rows".bright_cyan(), info.rows);
                println!("{}: {}", "cols".bright_cyan(), info.cols);
                println!(
                    "{}: [{}, {}]",
                    "data range".bright_cyan(),
                    info.data_start_row,
                    info.data_end_row
                );
                println!("{}: {}", "headers".bright_cyan(), info.headers.join(", "));
                for (name, entry) in &reader.meta().stats {
                    println!(
                        "{}: count={} nuniques={} {}",
                        name.bright_yellow(),
                        entry.count,
                        entry.nuniques,
                        entry.text_hist
                    );
                }
            }
            Ok(())
        }
        MprCliCommands::Preview { input, rows } => {
            debug!("previewing {} rows of {}", rows, input.to_string_lossy());
            let reader = MprReader::open_syspath(&input)?;

            let stdout = std::io::stdout();
            let mut csv_writer = csv::Writer::from_writer(stdout);
            csv_writer
                .write_record(reader.headers())
                .map_err(|e| MprError::Other(format!("csv write failed: {e}")))?;

            for row in reader.rows()?.take(rows as usize) {
                let row = row?;
                let cells: Vec<String> = row.iter().map(Value::to_string).collect();
                csv_writer
                    .write_record(&cells)
                    .map_err(|e| MprError::Other(format!("csv write failed: {e}")))?;
            }
            csv_writer
                .flush()
                .map_err(|e| MprError::Other(format!("csv write failed: {e}")))?;
            Ok(())
        }
        MprCliCommands::Load {
            input,
            output,
            delimiter,
            no_intuit_rows,
            no_intuit_types,
            no_stats,
            no_progress,
        } => {
            let output = output.unwrap_or_else(|| input.with_extension("mpr"));
            println!(
                "Loading {} into {}",
                input.to_string_lossy().bright_yellow(),
                output.to_string_lossy().bright_yellow()
            );

            let pb = if no_progress {
                None
            } else {
                let pb = ProgressBar::new_spinner();
                pb.set_message(format!("Loading {}", input.to_string_lossy()));
                pb.enable_steady_tick(Duration::from_millis(120));
                Some(pb)
            };

            let source = DelimitedSource::open(&input, delimiter, pb.clone())?;

            let parent = output
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            let name = output
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| MprError::Configuration("bad output path".into()))?;

            let fs = Arc::new(LocalFilesystem::new(parent)?);
            let f = MprFile::new(fs, name);

            let options = LoadOptions {
                intuit_rows: if no_intuit_rows { Some(false) } else { None },
                intuit_type: !no_intuit_types,
                run_stats: !no_stats,
            };
            f.load_rows(source, &options)?;

            if let Some(pb) = pb {
                pb.finish_with_message("Done");
            }

            let reader = f.reader()?;
            println!(
                "Loaded {} rows, {} columns",
                reader.n_rows().to_string().bright_green(),
                reader.n_cols().to_string().bright_green()
            );
            Ok(())
        }
        #[cfg(feature = "sql")]
        MprCliCommands::Query { input, sql } => {
            let table = table_name_from_path(&input);
            debug!("mounting {} as table {table}", input.to_string_lossy());

            let conn = rusqlite::Connection::open_in_memory()?;
            mprows::add_partition(&conn, &input, &table)?;

            let mut stmt = conn.prepare(&sql)?;
            let n_cols = stmt.column_count();
            let names: Vec<String> = stmt
                .column_names()
                .into_iter()
                .map(|s| s.to_string())
                .collect();

            let stdout = std::io::stdout();
            let mut csv_writer = csv::Writer::from_writer(stdout);
            csv_writer
                .write_record(&names)
                .map_err(|e| MprError::Other(format!("csv write failed: {e}")))?;

            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let mut cells = Vec::with_capacity(n_cols);
                for i in 0..n_cols {
                    let cell: rusqlite::types::Value = row.get(i)?;
                    cells.push(match cell {
                        rusqlite::types::Value::Null => String::new(),
                        rusqlite::types::Value::Integer(v) => v.to_string(),
                        rusqlite::types::Value::Real(v) => v.to_string(),
                        rusqlite::types::Value::Text(v) => v,
                        rusqlite::types::Value::Blob(v) => String::from_utf8_lossy(&v).to_string(),
                    });
                }
                csv_writer
                    .write_record(&cells)
                    .map_err(|e| MprError::Other(format!("csv write failed: {e}")))?;
            }
            csv_writer
                .flush()
                .map_err(|e| MprError::Other(format!("csv write failed: {e}")))?;
            Ok(())
        }
    }
}
