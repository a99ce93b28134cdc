//! The trailing meta block: typed sections, schema-as-rows, and the column
//! projection.
//!
//! On the wire the meta block is a zlib-compressed MessagePack map with a
//! fixed set of top-level sections. The `schema` section is a list of rows:
//! row 0 is the canonical attribute template ([`SCHEMA_TEMPLATE`]) and each
//! following row describes one column, its values positional against the
//! template. In memory the schema is projected to [`Column`] structs and
//! re-projected on write; the template invariant is re-checked on every
//! read.

use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::LazyLock;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::err::MprError;

/// Attribute names for schema rows, in wire order. `schema[0]` must always
/// equal this list.
pub const SCHEMA_TEMPLATE: &[&str] = &[
    "pos",
    "name",
    "type",
    "description",
    "start",
    "width",
    // type intuition
    "position",
    "header",
    "length",
    "has_codes",
    "type_count",
    "ints",
    "floats",
    "strs",
    "unicode",
    "nones",
    "datetimes",
    "dates",
    "times",
    "strvals",
    // stats
    "flags",
    "lom",
    "resolved_type",
    "stat_count",
    "nuniques",
    "mean",
    "std",
    "min",
    "p25",
    "p50",
    "p75",
    "max",
    "skewness",
    "kurtosis",
    "hist",
    "text_hist",
    "uvalues",
];

static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^0-9A-Za-z_]").expect("static regex"));
static UNDERSCORE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_+").expect("static regex"));

/// Mangles a header cell into a column name: non-word characters become
/// `_`, the result is lowercased, runs of `_` collapse, and leading and
/// trailing `_` are trimmed. Idempotent.
pub fn mangle_header(name: &str) -> String {
    let replaced = NON_WORD.replace_all(name, "_").to_lowercase();
    let collapsed = UNDERSCORE_RUN.replace_all(&replaced, "_");
    collapsed.trim_matches('_').to_string()
}

// ── Sections ───────────────────────────────────────────────────────

/// Creation and load timing.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AboutSection {
    /// Unix timestamp when the file was created.
    pub create_time: Option<f64>,
    /// Wall-clock seconds the load pipeline ran.
    pub load_time: Option<f64>,
}

/// Geographic provenance (spatial reference system, bounding box).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoSection {
    /// Spatial reference system identifier.
    pub srs: Option<i64>,
    /// Bounding box `[min_x, min_y, max_x, max_y]`.
    pub bb: Option<Vec<f64>>,
}

/// Spreadsheet provenance.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExcelSection {
    /// Workbook date mode.
    pub datemode: Option<i64>,
    /// Source worksheet name.
    pub worksheet: Option<String>,
}

/// Where the rows came from.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSection {
    /// Source URL.
    pub url: Option<String>,
    /// Unix timestamp of the download.
    pub fetch_time: Option<f64>,
    /// Detected file type (`csv`, `tsv`, `fixed`, ...).
    pub file_type: Option<String>,
    /// URL type (`file`, `zip`, `gs`, ...).
    pub url_type: Option<String>,
    /// Inner file for archive sources.
    pub inner_file: Option<String>,
    /// Source text encoding.
    pub encoding: Option<String>,
}

/// Row classification recorded by the row intuiter or the source spec.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RowSpecSection {
    /// Row indices that form the header.
    pub header_rows: Option<Vec<u32>>,
    /// Row indices holding comments.
    pub comment_rows: Option<Vec<u32>>,
    /// First data row, inclusive.
    pub start_row: Option<u32>,
    /// Last data row, inclusive.
    pub end_row: Option<u32>,
    /// Regex source of the data-row type signature.
    pub data_pattern: Option<String>,
}

/// Free-text comments harvested from the source.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommentsSection {
    /// Comment text found above the data.
    pub header: Option<String>,
    /// Comment text found below the data.
    pub footer: Option<String>,
}

/// Pipeline state.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessSection {
    /// True once the orchestrator ran load→intuit→stats→close.
    pub finalized: bool,
    /// Name of the last pipeline step that ran.
    pub last_process: Option<String>,
}

/// Per-column statistics summary mirrored into the `stats` section.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsEntry {
    /// Level of measurement code (`n`, `o`, `i`, `r`).
    pub lom: Option<String>,
    /// Column-name flags (gvid/year/time/date).
    pub flags: Option<String>,
    /// Values observed.
    pub count: u64,
    /// Distinct values observed.
    pub nuniques: u64,
    /// Mean, for numeric columns.
    pub mean: Option<f64>,
    /// Standard deviation, for numeric columns.
    pub std: Option<f64>,
    /// Minimum, for numeric columns.
    pub min: Option<f64>,
    /// 25th percentile estimate.
    pub p25: Option<f64>,
    /// Median estimate.
    pub p50: Option<f64>,
    /// 75th percentile estimate.
    pub p75: Option<f64>,
    /// Maximum, for numeric columns.
    pub max: Option<f64>,
    /// Skewness, for numeric columns.
    pub skewness: Option<f64>,
    /// Excess kurtosis, for numeric columns.
    pub kurtosis: Option<f64>,
    /// Histogram bin counts.
    pub hist: Vec<u64>,
    /// Unicode bar-chart rendering of `hist`.
    pub text_hist: String,
    /// Up to the 100 most common values with counts.
    pub uvalues: BTreeMap<String, u64>,
}

// ── Meta ───────────────────────────────────────────────────────────

/// The decoded meta block.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Meta {
    /// Creation and load timing.
    pub about: AboutSection,
    /// Geographic provenance.
    pub geo: GeoSection,
    /// Spreadsheet provenance.
    pub excel: ExcelSection,
    /// Source provenance.
    pub source: SourceSection,
    /// Row classification.
    pub row_spec: RowSpecSection,
    /// Free-text comments.
    pub comments: CommentsSection,
    /// Pipeline state.
    pub process: ProcessSection,
    /// Warnings recorded by recovered pipeline failures.
    pub warnings: Vec<String>,
    /// Schema as rows: `[template, col1, col2, ...]`.
    pub schema: Vec<rmpv::Value>,
    /// Per-column statistics summaries, keyed by column name.
    pub stats: BTreeMap<String, StatsEntry>,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            about: AboutSection::default(),
            geo: GeoSection::default(),
            excel: ExcelSection::default(),
            source: SourceSection::default(),
            row_spec: RowSpecSection::default(),
            comments: CommentsSection::default(),
            process: ProcessSection::default(),
            warnings: Vec::new(),
            schema: vec![template_row()],
            stats: BTreeMap::new(),
        }
    }
}

fn template_row() -> rmpv::Value {
    rmpv::Value::Array(SCHEMA_TEMPLATE.iter().map(|s| rmpv::Value::from(*s)).collect())
}

impl Meta {
    /// Checks that `schema[0]` equals the canonical template.
    pub fn validate_template(&self) -> Result<(), MprError> {
        let first = self
            .schema
            .first()
            .ok_or_else(|| MprError::CorruptFile("schema has no template row".into()))?;
        if *first != template_row() {
            return Err(MprError::CorruptFile(
                "schema template row does not match the canonical template".into(),
            ));
        }
        Ok(())
    }

    /// Reads and decodes the meta block starting at `meta_start`. An empty
    /// region yields a default meta.
    pub fn read<R: Read + Seek>(fh: &mut R, meta_start: u64) -> Result<Self, MprError> {
        fh.seek(SeekFrom::Start(meta_start))?;
        let mut data = Vec::new();
        fh.read_to_end(&mut data)?;
        if data.is_empty() {
            return Ok(Meta::default());
        }

        let mut z = ZlibDecoder::new(&data[..]);
        let meta: Meta = rmp_serde::decode::from_read(&mut z)
            .map_err(|e| MprError::CorruptFile(format!("bad meta block: {e}")))?;
        meta.validate_template()?;
        Ok(meta)
    }

    /// Encodes and writes the meta block at `meta_start`, returning the end
    /// offset (callers truncate the file there).
    pub fn write<W: Write + Seek>(&self, fh: &mut W, meta_start: u64) -> Result<u64, MprError> {
        self.validate_template()?;

        let mut z = ZlibEncoder::new(Vec::new(), Compression::new(9));
        rmp_serde::encode::write_named(&mut z, self)?;
        let bytes = z.finish()?;

        fh.seek(SeekFrom::Start(meta_start))?;
        fh.write_all(&bytes)?;
        Ok(meta_start + bytes.len() as u64)
    }

    /// Projects the schema rows to [`Column`] structs, synthesizing default
    /// columns (`col{i}`) when the observed width exceeds the schema.
    pub fn columns(&mut self, n_cols: u32) -> Result<Vec<Column>, MprError> {
        self.validate_template()?;

        let have = (self.schema.len() - 1) as u32;
        let want = n_cols.max(have);

        let mut out = Vec::with_capacity(want as usize);
        for i in 1..=want {
            if (i as usize) < self.schema.len() {
                let row = self.schema[i as usize].as_array().ok_or_else(|| {
                    MprError::CorruptFile(format!("schema row {i} is not an array"))
                })?;
                out.push(Column::from_row(i, row)?);
            } else {
                let col = Column::new(i, format!("col{i}"));
                self.schema.push(rmpv::Value::Array(col.to_row()));
                out.push(col);
            }
        }
        Ok(out)
    }

    /// Re-projects columns back into schema rows, keeping the template in
    /// slot 0.
    pub fn set_columns(&mut self, columns: &[Column]) {
        let mut schema = Vec::with_capacity(columns.len() + 1);
        schema.push(template_row());
        for col in columns {
            schema.push(rmpv::Value::Array(col.to_row()));
        }
        self.schema = schema;
    }
}

// ── Column projection ──────────────────────────────────────────────

/// Typed view of one schema row.
///
/// `pos`/`name` are always present; everything else fills in as the
/// intuiters and the stats engine run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Column {
    /// 1-based column position.
    pub pos: u32,
    /// Mangled column name.
    pub name: String,
    /// Declared or resolved logical type.
    pub col_type: Option<String>,
    /// Human description.
    pub description: Option<String>,
    /// Fixed-width field start.
    pub start: Option<u32>,
    /// Fixed-width field width.
    pub width: Option<u32>,
    /// 0-based position recorded by the type intuiter.
    pub position: Option<u32>,
    /// Original header text.
    pub header: Option<String>,
    /// Maximum observed value length in characters.
    pub length: Option<u32>,
    /// Low-uniqueness string column heuristic.
    pub has_codes: Option<bool>,
    /// Values seen by the type intuiter.
    pub type_count: Option<u64>,
    /// Cells parsed as ints.
    pub ints: Option<u64>,
    /// Cells parsed as floats.
    pub floats: Option<u64>,
    /// Cells left as strings.
    pub strs: Option<u64>,
    /// Cells containing non-ASCII strings.
    pub unicode: Option<u64>,
    /// Empty cells.
    pub nones: Option<u64>,
    /// Cells parsed as datetimes.
    pub datetimes: Option<u64>,
    /// Cells parsed as dates.
    pub dates: Option<u64>,
    /// Cells parsed as times.
    pub times: Option<u64>,
    /// Sample string values.
    pub strvals: Option<String>,
    /// Column-name flags from the stats engine.
    pub flags: Option<String>,
    /// Level of measurement code.
    pub lom: Option<String>,
    /// Type resolved by the type intuiter.
    pub resolved_type: Option<String>,
    /// Values seen by the stats engine.
    pub stat_count: Option<u64>,
    /// Distinct values observed.
    pub nuniques: Option<u64>,
    /// Mean.
    pub mean: Option<f64>,
    /// Standard deviation.
    pub std: Option<f64>,
    /// Minimum.
    pub min: Option<f64>,
    /// 25th percentile estimate.
    pub p25: Option<f64>,
    /// Median estimate.
    pub p50: Option<f64>,
    /// 75th percentile estimate.
    pub p75: Option<f64>,
    /// Maximum.
    pub max: Option<f64>,
    /// Skewness.
    pub skewness: Option<f64>,
    /// Excess kurtosis.
    pub kurtosis: Option<f64>,
    /// Histogram bin counts.
    pub hist: Option<Vec<u64>>,
    /// Bar-chart rendering of `hist`.
    pub text_hist: Option<String>,
    /// Most common values with counts.
    pub uvalues: Option<BTreeMap<String, u64>>,
}

impl Column {
    /// Creates a bare column with position and name only.
    pub fn new(pos: u32, name: String) -> Self {
        Self {
            pos,
            name,
            ..Self::default()
        }
    }

    /// Serializes this column as a schema row in template order.
    pub fn to_row(&self) -> Vec<rmpv::Value> {
        fn opt_u32(v: Option<u32>) -> rmpv::Value {
            v.map(rmpv::Value::from).unwrap_or(rmpv::Value::Nil)
        }
        fn opt_u64(v: Option<u64>) -> rmpv::Value {
            v.map(rmpv::Value::from).unwrap_or(rmpv::Value::Nil)
        }
        fn opt_f64(v: Option<f64>) -> rmpv::Value {
            v.map(rmpv::Value::F64).unwrap_or(rmpv::Value::Nil)
        }
        fn opt_str(v: &Option<String>) -> rmpv::Value {
            v.as_deref().map(rmpv::Value::from).unwrap_or(rmpv::Value::Nil)
        }
        fn opt_bool(v: Option<bool>) -> rmpv::Value {
            v.map(rmpv::Value::Boolean).unwrap_or(rmpv::Value::Nil)
        }

        vec![
            rmpv::Value::from(self.pos),
            rmpv::Value::from(self.name.as_str()),
            opt_str(&self.col_type),
            opt_str(&self.description),
            opt_u32(self.start),
            opt_u32(self.width),
            opt_u32(self.position),
            opt_str(&self.header),
            opt_u32(self.length),
            opt_bool(self.has_codes),
            opt_u64(self.type_count),
            opt_u64(self.ints),
            opt_u64(self.floats),
            opt_u64(self.strs),
            opt_u64(self.unicode),
            opt_u64(self.nones),
            opt_u64(self.datetimes),
            opt_u64(self.dates),
            opt_u64(self.times),
            opt_str(&self.strvals),
            opt_str(&self.flags),
            opt_str(&self.lom),
            opt_str(&self.resolved_type),
            opt_u64(self.stat_count),
            opt_u64(self.nuniques),
            opt_f64(self.mean),
            opt_f64(self.std),
            opt_f64(self.min),
            opt_f64(self.p25),
            opt_f64(self.p50),
            opt_f64(self.p75),
            opt_f64(self.max),
            opt_f64(self.skewness),
            opt_f64(self.kurtosis),
            self.hist
                .as_ref()
                .map(|bins| {
                    rmpv::Value::Array(bins.iter().map(|b| rmpv::Value::from(*b)).collect())
                })
                .unwrap_or(rmpv::Value::Nil),
            opt_str(&self.text_hist),
            self.uvalues
                .as_ref()
                .map(|uv| {
                    rmpv::Value::Map(
                        uv.iter()
                            .map(|(k, v)| (rmpv::Value::from(k.as_str()), rmpv::Value::from(*v)))
                            .collect(),
                    )
                })
                .unwrap_or(rmpv::Value::Nil),
        ]
    }

    /// Deserializes a schema row. Missing trailing cells are treated as nil;
    /// `pos` falls back to the row's slot when absent.
    pub fn from_row(slot: u32, row: &[rmpv::Value]) -> Result<Self, MprError> {
        let cell = |i: usize| row.get(i).cloned().unwrap_or(rmpv::Value::Nil);

        let as_u32 = |v: rmpv::Value| v.as_u64().map(|n| n as u32);
        let as_u64 = |v: rmpv::Value| v.as_u64();
        let as_f64 = |v: rmpv::Value| v.as_f64().or_else(|| v.as_i64().map(|n| n as f64));
        let as_string = |v: rmpv::Value| v.as_str().map(|s| s.to_string());
        let as_bool = |v: rmpv::Value| v.as_bool().or_else(|| v.as_u64().map(|n| n != 0));

        let hist = match cell(34) {
            rmpv::Value::Nil => None,
            rmpv::Value::Array(items) => {
                let mut bins = Vec::with_capacity(items.len());
                for item in items {
                    bins.push(item.as_u64().ok_or_else(|| {
                        MprError::CorruptFile("non-integer histogram bin".into())
                    })?);
                }
                Some(bins)
            }
            _ => return Err(MprError::CorruptFile("hist cell is not a list".into())),
        };

        let uvalues = match cell(36) {
            rmpv::Value::Nil => None,
            rmpv::Value::Map(entries) => {
                let mut uv = BTreeMap::new();
                for (k, v) in entries {
                    let key = k
                        .as_str()
                        .ok_or_else(|| MprError::CorruptFile("non-string uvalue key".into()))?
                        .to_string();
                    let count = v
                        .as_u64()
                        .ok_or_else(|| MprError::CorruptFile("non-integer uvalue count".into()))?;
                    uv.insert(key, count);
                }
                Some(uv)
            }
            _ => return Err(MprError::CorruptFile("uvalues cell is not a map".into())),
        };

        Ok(Self {
            pos: as_u32(cell(0)).unwrap_or(slot),
            name: as_string(cell(1)).unwrap_or_else(|| format!("col{slot}")),
            col_type: as_string(cell(2)),
            description: as_string(cell(3)),
            start: as_u32(cell(4)),
            width: as_u32(cell(5)),
            position: as_u32(cell(6)),
            header: as_string(cell(7)),
            length: as_u32(cell(8)),
            has_codes: as_bool(cell(9)),
            type_count: as_u64(cell(10)),
            ints: as_u64(cell(11)),
            floats: as_u64(cell(12)),
            strs: as_u64(cell(13)),
            unicode: as_u64(cell(14)),
            nones: as_u64(cell(15)),
            datetimes: as_u64(cell(16)),
            dates: as_u64(cell(17)),
            times: as_u64(cell(18)),
            strvals: as_string(cell(19)),
            flags: as_string(cell(20)),
            lom: as_string(cell(21)),
            resolved_type: as_string(cell(22)),
            stat_count: as_u64(cell(23)),
            nuniques: as_u64(cell(24)),
            mean: as_f64(cell(25)),
            std: as_f64(cell(26)),
            min: as_f64(cell(27)),
            p25: as_f64(cell(28)),
            p50: as_f64(cell(29)),
            p75: as_f64(cell(30)),
            max: as_f64(cell(31)),
            skewness: as_f64(cell(32)),
            kurtosis: as_f64(cell(33)),
            hist,
            text_hist: as_string(cell(35)),
            uvalues,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn mangler_is_idempotent() {
        for raw in ["UNI CODE", "a-b--c", "  %Total#  ", "_x_", "already_fine"] {
            let once = mangle_header(raw);
            assert_eq!(mangle_header(&once), once, "not idempotent for {raw:?}");
            assert!(
                once.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'),
                "bad charset for {raw:?}: {once:?}"
            );
            assert!(!once.starts_with('_') && !once.ends_with('_'));
        }
    }

    #[test]
    fn mangler_examples() {
        assert_eq!(mangle_header("UNI CODE"), "uni_code");
        assert_eq!(mangle_header("Pop. (2010)"), "pop_2010");
        assert_eq!(mangle_header("id"), "id");
    }

    #[test]
    fn meta_roundtrip() {
        let mut meta = Meta::default();
        meta.source.url = Some("http://example.com/data.csv".into());
        meta.warnings.push("stats failed: oops".into());
        meta.row_spec.header_rows = Some(vec![2, 3, 4]);

        let mut col = Column::new(1, "id".into());
        col.resolved_type = Some("int".into());
        col.mean = Some(15.5);
        col.hist = Some(vec![1, 2, 3]);
        col.uvalues = Some(BTreeMap::from([("1".into(), 2u64)]));
        meta.set_columns(&[col.clone()]);

        let mut buf = Cursor::new(Vec::new());
        let end = meta.write(&mut buf, 0).unwrap();
        assert_eq!(end, buf.get_ref().len() as u64);

        let mut got = Meta::read(&mut buf, 0).unwrap();
        assert_eq!(got.source.url.as_deref(), Some("http://example.com/data.csv"));
        assert_eq!(got.warnings, vec!["stats failed: oops".to_string()]);
        assert_eq!(got.row_spec.header_rows, Some(vec![2, 3, 4]));
        assert_eq!(got.columns(0).unwrap(), vec![col]);
    }

    #[test]
    fn broken_template_is_corrupt() {
        let mut meta = Meta::default();
        meta.schema[0] = rmpv::Value::Array(vec![rmpv::Value::from("pos")]);
        let mut buf = Cursor::new(Vec::new());
        assert!(matches!(
            meta.write(&mut buf, 0),
            Err(MprError::CorruptFile(_))
        ));
    }

    #[test]
    fn columns_extend_schema() {
        let mut meta = Meta::default();
        let cols = meta.columns(3).unwrap();
        assert_eq!(cols.len(), 3);
        assert_eq!(cols[2].name, "col3");
        assert_eq!(cols[2].pos, 3);
        assert_eq!(meta.schema.len(), 4);
    }
}
