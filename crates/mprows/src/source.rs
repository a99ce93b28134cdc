//! Row-producing sources and their specs.
//!
//! The orchestrator consumes anything implementing [`RowSource`]: an
//! iterator of rows that may also advertise headers, per-column descriptors,
//! and a [`SourceSpec`]. Format-specific readers (CSV, spreadsheets,
//! shapefiles, ...) live outside this crate; [`GeneratorSource`] adapts any
//! plain row iterator.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::err::MprError;
use crate::mpr_value::Row;

/// Per-column descriptor supplied by a source.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// 1-based column position.
    pub position: u32,
    /// Column name.
    pub name: String,
    /// Human description.
    pub description: Option<String>,
}

/// Description of a source, as supplied by configuration or a downloader.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Short name of the source.
    pub name: Option<String>,
    /// Source URL.
    pub url: Option<String>,
    /// File type (`csv`, `tsv`, `fixed`, ...).
    pub filetype: Option<String>,
    /// URL type (`file`, `zip`, `gs`, ...).
    pub urltype: Option<String>,
    /// Text encoding.
    pub encoding: Option<String>,
    /// Worksheet / archive segment selector.
    pub segment: Option<String>,
    /// Unix timestamp of the download.
    pub download_time: Option<f64>,
    /// Header row indices, when known up front.
    pub header_lines: Option<Vec<u32>>,
    /// First data row, when known up front.
    pub start_line: Option<u32>,
    /// Last data row (inclusive), when known up front.
    pub end_line: Option<u32>,
    /// Column descriptors, when known up front.
    pub columns: Option<Vec<ColumnSpec>>,
}

impl SourceSpec {
    /// True when the spec pins the data range itself, making row intuition
    /// unnecessary.
    pub fn has_rowspec(&self) -> bool {
        self.header_lines.is_some() || self.start_line.is_some()
    }
}

/// An iterable source of rows.
///
/// Iteration yields `Result` so sources backed by I/O can surface failures
/// mid-stream.
pub trait RowSource: Iterator<Item = Result<Row, MprError>> {
    /// Column names, when the source knows them.
    fn headers(&self) -> Option<Vec<String>> {
        None
    }

    /// Per-column descriptors, when the source carries them.
    fn columns(&self) -> Option<Vec<ColumnSpec>> {
        None
    }

    /// The source spec, when one exists.
    fn spec(&self) -> Option<&SourceSpec> {
        None
    }
}

/// Adapts any row iterator into a [`RowSource`].
pub struct GeneratorSource<I> {
    iter: I,
    headers: Option<Vec<String>>,
    spec: Option<SourceSpec>,
}

impl<I> GeneratorSource<I>
where
    I: Iterator<Item = Row>,
{
    /// Wraps a plain row iterator.
    pub fn new(iter: I) -> Self {
        Self {
            iter,
            headers: None,
            spec: None,
        }
    }

    /// Attaches column names.
    pub fn with_headers(mut self, headers: Vec<String>) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Attaches a source spec.
    pub fn with_spec(mut self, spec: SourceSpec) -> Self {
        self.spec = Some(spec);
        self
    }
}

impl<I> Iterator for GeneratorSource<I>
where
    I: Iterator<Item = Row>,
{
    type Item = Result<Row, MprError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next().map(Ok)
    }
}

impl<I> RowSource for GeneratorSource<I>
where
    I: Iterator<Item = Row>,
{
    fn headers(&self) -> Option<Vec<String>> {
        self.headers.clone()
    }

    fn spec(&self) -> Option<&SourceSpec> {
        self.spec.as_ref()
    }
}

// ── Credentials ────────────────────────────────────────────────────

/// Callback resolving a host/netloc to credential fields, used by download
/// collaborators outside this crate.
pub type AccountAccessor<'a> = dyn Fn(&str) -> HashMap<String, String> + 'a;

/// Looks up credentials for `netloc` and checks that every field in
/// `required` is present and non-empty.
pub fn require_credentials(
    accessor: &AccountAccessor<'_>,
    netloc: &str,
    required: &[&str],
) -> Result<HashMap<String, String>, MprError> {
    let creds = accessor(netloc);
    let missing: Vec<String> = required
        .iter()
        .filter(|f| creds.get(**f).is_none_or(|v| v.is_empty()))
        .map(|f| f.to_string())
        .collect();
    if missing.is_empty() {
        Ok(creds)
    } else {
        Err(MprError::MissingCredentials {
            netloc: netloc.to_string(),
            missing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpr_value::Value;

    #[test]
    fn generator_source_yields_rows() {
        let rows = vec![vec![Value::Int(1)], vec![Value::Int(2)]];
        let mut src = GeneratorSource::new(rows.into_iter()).with_headers(vec!["id".into()]);
        assert_eq!(src.headers(), Some(vec!["id".to_string()]));
        assert_eq!(src.next().unwrap().unwrap(), vec![Value::Int(1)]);
        assert_eq!(src.next().unwrap().unwrap(), vec![Value::Int(2)]);
        assert!(src.next().is_none());
    }

    #[test]
    fn missing_credentials_are_reported() {
        let accessor = |_netloc: &str| {
            HashMap::from([("access_key".to_string(), "AK".to_string())])
        };
        let err = require_credentials(&accessor, "s3.example.com", &["access_key", "secret"])
            .unwrap_err();
        match err {
            MprError::MissingCredentials { netloc, missing } => {
                assert_eq!(netloc, "s3.example.com");
                assert_eq!(missing, vec!["secret".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
