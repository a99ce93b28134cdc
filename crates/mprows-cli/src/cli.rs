use clap::{Parser, Subcommand, ValueHint};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version)]
#[command(propagate_version = true)]
/// 📦 Command-line tool for working with MPR (Message Pack Rows) files
pub struct MprCli {
    #[command(subcommand)]
    pub command: MprCliCommands,
}

/// CLI subcommands for mprows.
#[derive(Debug, Subcommand)]
pub enum MprCliCommands {
    /// Display MPR file metadata
    Metadata {
        /// Path to the MPR file
        #[arg(value_hint = ValueHint::FilePath, value_parser)]
        input: PathBuf,
        /// Display metadata as json (includes the full meta block)
        #[arg(action, long)]
        as_json: bool,
    },
    /// Preview MPR data rows as CSV on stdout
    Preview {
        /// Path to the MPR file
        #[arg(value_hint = ValueHint::FilePath, value_parser)]
        input: PathBuf,
        /// Number of data rows to write
        #[arg(default_value = "10", long, value_parser)]
        rows: u32,
    },
    /// Load a delimited text file into an MPR file and profile it
    Load {
        /// Path to the delimited input file
        #[arg(value_hint = ValueHint::FilePath, value_parser)]
        input: PathBuf,
        /// Output MPR file path{n}Defaults to the input path with an .mpr extension
        #[arg(long, short = 'o', value_parser)]
        output: Option<PathBuf>,
        /// Field delimiter{n}Defaults to a comma
        #[arg(default_value = ",", long, value_parser)]
        delimiter: char,
        /// Skip the row intuiter (header/comment/data detection)
        #[arg(action, long)]
        no_intuit_rows: bool,
        /// Skip the type intuiter
        #[arg(action, long)]
        no_intuit_types: bool,
        /// Skip the statistics pass
        #[arg(action, long)]
        no_stats: bool,
        /// Do not display progress
        #[arg(action, long)]
        no_progress: bool,
    },
    /// Mount an MPR file as a SQLite virtual table and run a query
    #[cfg(feature = "sql")]
    Query {
        /// Path to the MPR file
        #[arg(value_hint = ValueHint::FilePath, value_parser)]
        input: PathBuf,
        /// SQL statement{n}The table name is the input file stem (e.g. "cars" for cars.mpr)
        #[arg(long)]
        sql: String,
    },
}
