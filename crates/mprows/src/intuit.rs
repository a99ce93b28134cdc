//! Row and type intuition against a materialized store.
//!
//! [`RowIntuiter`] classifies the physical rows of a file — which leading
//! rows are comments, which form the header, where the data starts and
//! ends — from a head and tail sample of the raw stream. [`TypeIntuiter`]
//! resolves a logical type per column from the values themselves.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use log::debug;
use regex::Regex;
use serde::Serialize;

use crate::err::MprError;
use crate::mpr_reader::MprReader;
use crate::mpr_value::{Row, Value};

/// Head/tail sample size for row intuition.
const SAMPLE_ROWS: usize = 40;

/// Minimum data-pattern matches required in the head sample.
const MIN_DATA_ROWS: usize = 3;

/// Row classification produced by the row intuiter.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RowSpec {
    /// Row indices that form the header, ascending.
    pub header_lines: Vec<u32>,
    /// Comment row indices, ascending.
    pub comment_lines: Vec<u32>,
    /// First data row, inclusive.
    pub start_line: u32,
    /// Last data row, inclusive; `None` when the tail held no match.
    pub end_line: Option<u32>,
    /// Regex source of the data-row type signature.
    pub data_pattern: String,
    /// Coalesced (unmangled) column names.
    pub headers: Vec<String>,
}

/// Detects header lines, comment lines, and the data range from samples of
/// the raw row stream.
#[derive(Clone, Copy, Debug)]
pub struct RowIntuiter {
    head_rows: usize,
    tail_rows: usize,
}

impl Default for RowIntuiter {
    fn default() -> Self {
        Self {
            head_rows: SAMPLE_ROWS,
            tail_rows: SAMPLE_ROWS,
        }
    }
}

/// Per-cell type code: `E` empty, `N` numeric, `S` string, `M` mixed.
fn cell_code(v: &Value) -> char {
    if v.is_empty() {
        return 'E';
    }
    match v {
        Value::Int(_) | Value::Float(_) => 'N',
        Value::Date(_) | Value::Time(_) | Value::DateTime(_) => 'N',
        Value::String(s) => {
            let s = s.trim();
            if s.parse::<f64>().is_ok() {
                'N'
            } else if s.chars().any(|c| c.is_ascii_digit()) {
                'M'
            } else {
                'S'
            }
        }
        Value::Bytes(_) => 'S',
        Value::Null => 'E',
    }
}

fn signature(row: &Row) -> String {
    row.iter().map(cell_code).collect()
}

/// Compiles a signature into the anchored data-pattern regex: numeric cells
/// may be empty, string cells may be mixed, empty cells may hold anything.
fn pattern_from_signature(sig: &str) -> String {
    let mut pattern = String::from("^");
    for c in sig.chars() {
        match c {
            'N' => pattern.push_str("[NE]"),
            'S' | 'M' => pattern.push_str("[SM]"),
            _ => pattern.push_str("[ESNM]"),
        }
    }
    pattern.push('$');
    pattern
}

/// True for rows whose non-empty cells are all strings — header candidates.
fn is_stringish(sig: &str) -> bool {
    let mut non_empty = 0;
    for c in sig.chars() {
        match c {
            'S' | 'M' => non_empty += 1,
            'E' => {}
            _ => return false,
        }
    }
    non_empty > 0
}

/// Coalesces multiple header rows column-wise, joining cells with `_`.
pub fn coalesce_headers(rows: &[Row]) -> Vec<String> {
    let width = rows.iter().map(Row::len).max().unwrap_or(0);
    (0..width)
        .map(|col| {
            rows.iter()
                .filter_map(|row| row.get(col))
                .filter(|v| !v.is_empty())
                .map(Value::to_string)
                .collect::<Vec<_>>()
                .join("_")
        })
        .collect()
}

impl RowIntuiter {
    /// Runs intuition against the raw stream of `reader`.
    pub fn run(&self, reader: &MprReader) -> Result<RowSpec, MprError> {
        let n_rows = reader.n_rows();

        // One pass: keep the head and a ring buffer of the tail.
        let mut head: Vec<Row> = Vec::with_capacity(self.head_rows);
        let mut tail: VecDeque<(u32, Row)> = VecDeque::with_capacity(self.tail_rows);
        for (i, row) in reader.raw()?.enumerate() {
            let row = row?;
            let i = i as u32;
            if (i as usize) < self.head_rows {
                head.push(row.clone());
            }
            if tail.len() == self.tail_rows {
                tail.pop_front();
            }
            tail.push_back((i, row));
        }

        let sigs: Vec<String> = head.iter().map(signature).collect();

        // Modal width, then modal signature among rows of that width.
        let modal_width = modal(sigs.iter().map(String::len))
            .ok_or_else(|| MprError::RowIntuit("no rows to intuit".into()))?;
        let modal_sig = modal(sigs.iter().filter(|s| s.len() == modal_width).cloned())
            .ok_or_else(|| MprError::RowIntuit("no rows of modal width".into()))?;

        let pattern_source = pattern_from_signature(&modal_sig);
        let pattern = Regex::new(&pattern_source)
            .map_err(|e| MprError::RowIntuit(format!("bad data pattern: {e}")))?;
        debug!("data pattern {pattern_source} from modal signature {modal_sig}");

        let matches: Vec<u32> = sigs
            .iter()
            .enumerate()
            .filter(|(_, s)| pattern.is_match(s))
            .map(|(i, _)| i as u32)
            .collect();
        if matches.len() < MIN_DATA_ROWS {
            return Err(MprError::RowIntuit(format!(
                "found {} data-pattern rows in the head sample; need {MIN_DATA_ROWS}",
                matches.len()
            )));
        }
        let start_line = matches[0];

        // Header rows: contiguous string-signature rows of at least half the
        // modal width, walking back from the first data row.
        let mut header_lines: Vec<u32> = Vec::new();
        let mut i = start_line;
        while i > 0 {
            i -= 1;
            let sig = &sigs[i as usize];
            if is_stringish(sig) && sig.len() * 2 >= modal_width {
                header_lines.push(i);
            } else {
                break;
            }
        }
        header_lines.reverse();

        // Everything above the header block is comment.
        let comment_end = header_lines.first().copied().unwrap_or(start_line);
        let comment_lines: Vec<u32> = (0..comment_end).collect();

        // Last matching row in the tail sample.
        let end_line = tail
            .iter()
            .rev()
            .find(|(_, row)| pattern.is_match(&signature(row)))
            .map(|(i, _)| *i);

        let headers = {
            let header_rows: Vec<Row> = header_lines
                .iter()
                .map(|&i| head[i as usize].clone())
                .collect();
            if header_rows.is_empty() {
                Vec::new()
            } else {
                coalesce_headers(&header_rows)
            }
        };

        debug!(
            "row spec: comments {comment_lines:?}, headers {header_lines:?}, data {start_line}..{end_line:?} of {n_rows}"
        );

        Ok(RowSpec {
            header_lines,
            comment_lines,
            start_line,
            end_line,
            data_pattern: pattern_source,
            headers,
        })
    }
}

/// Most common item, ties broken toward the greater item for determinism.
fn modal<T, I>(items: I) -> Option<T>
where
    T: Ord + std::hash::Hash,
    I: Iterator<Item = T>,
{
    let mut counts: HashMap<T, usize> = HashMap::new();
    for item in items {
        *counts.entry(item).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)))
        .map(|(item, _)| item)
}

// ── Type intuition ─────────────────────────────────────────────────

/// Share of non-none values a type must account for to resolve.
const RESOLVE_THRESHOLD: f64 = 0.95;

/// Cap on the distinct-value set kept for the `has_codes` heuristic.
const UNIQUE_CAP: usize = 1000;

/// Sampling target when the row count is large.
const TYPE_SAMPLE_ROWS: u64 = 10_000;

/// Per-column observations and the resolved type.
#[derive(Clone, Debug, Default)]
pub struct ColumnTypeProfile {
    /// 0-based column position.
    pub position: u32,
    /// Column name, when headers were processed.
    pub header: Option<String>,
    /// Maximum observed value length in characters.
    pub length: u32,
    /// True for low-uniqueness string columns.
    pub has_codes: bool,
    /// Values observed.
    pub count: u64,
    /// Cells parsed as ints.
    pub ints: u64,
    /// Cells parsed as floats (excluding ints).
    pub floats: u64,
    /// Cells left as strings.
    pub strs: u64,
    /// Cells containing non-ASCII strings.
    pub unicode: u64,
    /// Empty cells.
    pub nones: u64,
    /// Cells parsed as datetimes.
    pub datetimes: u64,
    /// Cells parsed as dates.
    pub dates: u64,
    /// Cells parsed as times.
    pub times: u64,
    /// The resolved logical type.
    pub resolved_type: String,
    uniques: HashSet<String>,
}

impl ColumnTypeProfile {
    fn observe(&mut self, v: &Value) {
        self.count += 1;

        if v.is_empty() {
            self.nones += 1;
            return;
        }

        let text = v.to_string();
        self.length = self.length.max(text.chars().count() as u32);

        match v {
            Value::Int(_) => self.ints += 1,
            Value::Float(_) => self.floats += 1,
            Value::Date(_) => self.dates += 1,
            Value::Time(_) => self.times += 1,
            Value::DateTime(_) => self.datetimes += 1,
            Value::Bytes(_) => self.strs += 1,
            Value::String(s) => self.observe_text(s),
            Value::Null => unreachable!("empty handled above"),
        }
    }

    fn observe_text(&mut self, s: &str) {
        let t = s.trim();
        if t.parse::<i64>().is_ok() {
            self.ints += 1;
        } else if t.parse::<f64>().is_ok() {
            self.floats += 1;
        } else if NaiveDate::parse_from_str(t, "%Y-%m-%d").is_ok() {
            self.dates += 1;
        } else if NaiveTime::parse_from_str(t, "%H:%M:%S").is_ok() {
            self.times += 1;
        } else if NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%S").is_ok()
            || NaiveDateTime::parse_from_str(t, "%Y-%m-%d %H:%M:%S").is_ok()
        {
            self.datetimes += 1;
        } else {
            self.strs += 1;
            if !s.is_ascii() {
                self.unicode += 1;
            }
            if self.uniques.len() < UNIQUE_CAP {
                self.uniques.insert(s.to_string());
            }
        }
    }

    /// Resolves the most specific type accounting for at least 95% of
    /// non-none values, string as the fallback.
    fn resolve(&mut self) {
        let non_none = self.count - self.nones;
        if non_none == 0 {
            self.resolved_type = "str".to_string();
            return;
        }
        let share = |n: u64| n as f64 / non_none as f64;

        self.resolved_type = if share(self.ints) >= RESOLVE_THRESHOLD {
            "int"
        } else if share(self.ints + self.floats) >= RESOLVE_THRESHOLD {
            "float"
        } else if share(self.dates) >= RESOLVE_THRESHOLD {
            "date"
        } else if share(self.times) >= RESOLVE_THRESHOLD {
            "time"
        } else if share(self.datetimes) >= RESOLVE_THRESHOLD {
            "datetime"
        } else {
            "str"
        }
        .to_string();

        // Low uniqueness on a string column suggests coded values. A
        // saturated distinct set means high cardinality, not codes.
        self.has_codes = self.resolved_type == "str"
            && self.uniques.len() < UNIQUE_CAP
            && (self.uniques.len() as u64) * 100 < non_none;
    }
}

/// Per-column type resolution from value samples.
#[derive(Clone, Debug, Default)]
pub struct TypeIntuiter {
    columns: Vec<ColumnTypeProfile>,
}

impl TypeIntuiter {
    /// Creates an empty intuiter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records column names ahead of the scan.
    pub fn process_header(mut self, headers: &[String]) -> Self {
        for (i, name) in headers.iter().enumerate() {
            self.column_at(i).header = Some(name.clone());
        }
        self
    }

    fn column_at(&mut self, i: usize) -> &mut ColumnTypeProfile {
        while self.columns.len() <= i {
            let position = self.columns.len() as u32;
            self.columns.push(ColumnTypeProfile {
                position,
                ..ColumnTypeProfile::default()
            });
        }
        &mut self.columns[i]
    }

    /// Scans an iterator of rows, striding over large inputs, and resolves
    /// each column's type.
    pub fn run<I>(mut self, rows: I, total: u64) -> Result<Self, MprError>
    where
        I: Iterator<Item = Result<Row, MprError>>,
    {
        let stride = if total > TYPE_SAMPLE_ROWS {
            total / TYPE_SAMPLE_ROWS
        } else {
            1
        };

        for (i, row) in rows.enumerate() {
            let row = row?;
            if stride > 4 && (i as u64) % stride != 0 {
                continue;
            }
            for (col, value) in row.iter().enumerate() {
                self.column_at(col).observe(value);
            }
        }

        for col in &mut self.columns {
            col.resolve();
        }
        Ok(self)
    }

    /// The per-column profiles.
    pub fn columns(&self) -> &[ColumnTypeProfile] {
        &self.columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpr_meta::mangle_header;

    fn s(v: &str) -> Value {
        Value::String(v.to_string())
    }

    #[test]
    fn cell_codes() {
        assert_eq!(cell_code(&Value::Null), 'E');
        assert_eq!(cell_code(&s("")), 'E');
        assert_eq!(cell_code(&s("  42.5 ")), 'N');
        assert_eq!(cell_code(&Value::Int(7)), 'N');
        assert_eq!(cell_code(&s("name")), 'S');
        assert_eq!(cell_code(&s("id2")), 'M');
    }

    #[test]
    fn signature_pattern_matches_data() {
        let sig = signature(&vec![Value::Int(1), s("x"), Value::Float(0.5)]);
        assert_eq!(sig, "NSN");
        let re = Regex::new(&pattern_from_signature(&sig)).unwrap();
        assert!(re.is_match("NSN"));
        assert!(re.is_match("EMN"));
        assert!(!re.is_match("SSS"));
        assert!(!re.is_match("NSNN"));
    }

    #[test]
    fn coalesce_joins_with_underscore() {
        let rows = vec![
            vec![s("Population"), s("Area")],
            vec![s("2010"), Value::Null],
        ];
        assert_eq!(coalesce_headers(&rows), vec!["Population_2010", "Area"]);
    }

    #[test]
    fn types_resolve_with_threshold() {
        let rows: Vec<Result<Row, MprError>> = (0..200)
            .map(|i| {
                Ok(vec![
                    s(&i.to_string()),
                    s(if i < 3 { "n/a" } else { "1.5" }),
                    s("label"),
                ])
            })
            .collect();

        let ti = TypeIntuiter::new()
            .process_header(&["id".into(), "rate".into(), "label".into()])
            .run(rows.into_iter(), 200)
            .unwrap();

        let cols = ti.columns();
        assert_eq!(cols[0].resolved_type, "int");
        assert_eq!(cols[1].resolved_type, "float");
        assert_eq!(cols[2].resolved_type, "str");
        assert!(cols[2].has_codes);
        assert_eq!(cols[0].header.as_deref(), Some("id"));
    }

    #[test]
    fn temporal_strings_resolve() {
        let rows: Vec<Result<Row, MprError>> = (1..=28)
            .map(|d| {
                Ok(vec![
                    s(&format!("2015-08-{d:02}")),
                    s("12:34:56"),
                    s(&format!("2015-08-{d:02}T01:02:03")),
                ])
            })
            .collect();

        let ti = TypeIntuiter::new().run(rows.into_iter(), 28).unwrap();
        assert_eq!(ti.columns()[0].resolved_type, "date");
        assert_eq!(ti.columns()[1].resolved_type, "time");
        assert_eq!(ti.columns()[2].resolved_type, "datetime");
    }

    #[test]
    fn mangled_coalesced_headers() {
        let rows = vec![vec![s("Total Pop."), s("Median Age")]];
        let headers: Vec<String> = coalesce_headers(&rows)
            .iter()
            .map(|h| mangle_header(h))
            .collect();
        assert_eq!(headers, vec!["total_pop", "median_age"]);
    }
}
