//! Scalar values and their MessagePack wire forms.
//!
//! [`Value`] is the sealed sum of every scalar an MPR row cell can hold.
//! Ints, floats, strings, bytes and nulls use native MessagePack forms;
//! dates, times and datetimes are tagged maps carrying a component tuple:
//!
//! ```text
//! {"__date__": true,     "value": [y, m, d]}
//! {"__time__": true,     "value": [H, M, S]}
//! {"__datetime__": true, "value": [y, m, d, H, M, S]}
//! ```
//!
//! The row stream is a concatenation of self-delimited frames, each frame a
//! MessagePack array of rows (each row an array of values). Frame/batch
//! boundaries are a writer choice and do not affect row numbering.

use std::fmt;
use std::io::{Read, Write};

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::err::MprError;

const DATE_TAG: &str = "__date__";
const TIME_TAG: &str = "__time__";
const DATETIME_TAG: &str = "__datetime__";
const VALUE_KEY: &str = "value";

/// A scalar cell value in an MPR row.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Absent / null.
    Null,
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Calendar date.
    Date(NaiveDate),
    /// Wall-clock time (second precision on the wire).
    Time(NaiveTime),
    /// Date and time (second precision on the wire).
    DateTime(NaiveDateTime),
}

/// An ordered sequence of cell values.
pub type Row = Vec<Value>;

impl Value {
    /// Converts an optional datetime, mapping the "not a time" sentinel
    /// (`None`) to [`Value::Null`].
    pub fn from_optional_datetime(dt: Option<NaiveDateTime>) -> Self {
        match dt {
            Some(dt) => Value::DateTime(dt),
            None => Value::Null,
        }
    }

    /// Returns true for null cells and empty strings.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Numeric view of the value, parsing strings when possible.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Short type name used in schema rows and error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "none",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::DateTime(_) => "datetime",
        }
    }

    /// Builds the wire form of this value.
    pub fn to_msgpack(&self) -> rmpv::Value {
        match self {
            Value::Null => rmpv::Value::Nil,
            Value::Int(i) => rmpv::Value::from(*i),
            Value::Float(f) => rmpv::Value::F64(*f),
            Value::String(s) => rmpv::Value::from(s.as_str()),
            Value::Bytes(b) => rmpv::Value::Binary(b.clone()),
            Value::Date(d) => tagged(
                DATE_TAG,
                vec![i64::from(d.year()), i64::from(d.month()), i64::from(d.day())],
            ),
            Value::Time(t) => tagged(
                TIME_TAG,
                vec![
                    i64::from(t.hour()),
                    i64::from(t.minute()),
                    i64::from(t.second()),
                ],
            ),
            Value::DateTime(dt) => tagged(
                DATETIME_TAG,
                vec![
                    i64::from(dt.year()),
                    i64::from(dt.month()),
                    i64::from(dt.day()),
                    i64::from(dt.hour()),
                    i64::from(dt.minute()),
                    i64::from(dt.second()),
                ],
            ),
        }
    }

    /// Decodes a wire value back into a [`Value`].
    ///
    /// Maps must carry exactly one of the three date/time marker keys;
    /// anything else is a [`MprError::CorruptFile`].
    pub fn from_msgpack(v: rmpv::Value) -> Result<Self, MprError> {
        match v {
            rmpv::Value::Nil => Ok(Value::Null),
            rmpv::Value::Boolean(b) => Ok(Value::Int(i64::from(b))),
            rmpv::Value::Integer(i) => i
                .as_i64()
                .map(Value::Int)
                .ok_or_else(|| MprError::CorruptFile("integer out of i64 range".into())),
            rmpv::Value::F32(f) => Ok(Value::Float(f64::from(f))),
            rmpv::Value::F64(f) => Ok(Value::Float(f)),
            rmpv::Value::String(s) => match s.into_str() {
                Some(s) => Ok(Value::String(s)),
                None => Err(MprError::CorruptFile("invalid UTF-8 string cell".into())),
            },
            rmpv::Value::Binary(b) => Ok(Value::Bytes(b)),
            rmpv::Value::Map(entries) => decode_tagged(entries),
            other => Err(MprError::CorruptFile(format!(
                "unsupported wire type in row cell: {other}"
            ))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(s) => f.write_str(s),
            Value::Bytes(b) => f.write_str(&String::from_utf8_lossy(b)),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Time(t) => write!(f, "{}", t.format("%H:%M:%S")),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S")),
        }
    }
}

fn tagged(tag: &str, parts: Vec<i64>) -> rmpv::Value {
    rmpv::Value::Map(vec![
        (rmpv::Value::from(tag), rmpv::Value::Boolean(true)),
        (
            rmpv::Value::from(VALUE_KEY),
            rmpv::Value::Array(parts.into_iter().map(rmpv::Value::from).collect()),
        ),
    ])
}

fn decode_tagged(entries: Vec<(rmpv::Value, rmpv::Value)>) -> Result<Value, MprError> {
    let mut tag: Option<String> = None;
    let mut parts: Option<Vec<i64>> = None;

    for (k, v) in entries {
        let key = k
            .as_str()
            .ok_or_else(|| MprError::CorruptFile("non-string key in tagged object".into()))?
            .to_string();
        match key.as_str() {
            DATE_TAG | TIME_TAG | DATETIME_TAG => tag = Some(key),
            VALUE_KEY => {
                let arr = v
                    .as_array()
                    .ok_or_else(|| MprError::CorruptFile("tagged value is not a tuple".into()))?;
                let mut nums = Vec::with_capacity(arr.len());
                for item in arr {
                    nums.push(item.as_i64().ok_or_else(|| {
                        MprError::CorruptFile("non-integer tagged tuple component".into())
                    })?);
                }
                parts = Some(nums);
            }
            other => {
                return Err(MprError::CorruptFile(format!(
                    "unknown tagged object key: {other}"
                )));
            }
        }
    }

    let tag = tag.ok_or_else(|| MprError::CorruptFile("untagged map in row cell".into()))?;
    let parts = parts.ok_or_else(|| MprError::CorruptFile("tagged object missing value".into()))?;

    let bad = || MprError::CorruptFile(format!("out-of-range {tag} components"));

    match (tag.as_str(), parts.as_slice()) {
        (DATE_TAG, [y, m, d]) => NaiveDate::from_ymd_opt(*y as i32, *m as u32, *d as u32)
            .map(Value::Date)
            .ok_or_else(bad),
        (TIME_TAG, [h, m, s]) => NaiveTime::from_hms_opt(*h as u32, *m as u32, *s as u32)
            .map(Value::Time)
            .ok_or_else(bad),
        (DATETIME_TAG, [y, mo, d, h, mi, s]) => {
            let date = NaiveDate::from_ymd_opt(*y as i32, *mo as u32, *d as u32).ok_or_else(bad)?;
            let time = NaiveTime::from_hms_opt(*h as u32, *mi as u32, *s as u32).ok_or_else(bad)?;
            Ok(Value::DateTime(NaiveDateTime::new(date, time)))
        }
        _ => Err(MprError::CorruptFile(format!(
            "wrong tuple arity for {tag}: {}",
            parts.len()
        ))),
    }
}

// ── Batch frames ───────────────────────────────────────────────────

/// Encodes one batch of rows as a single self-delimited frame.
pub fn encode_batch<W: Write>(w: &mut W, rows: &[Row]) -> Result<(), MprError> {
    let frame = rmpv::Value::Array(
        rows.iter()
            .map(|row| rmpv::Value::Array(row.iter().map(Value::to_msgpack).collect()))
            .collect(),
    );
    rmpv::encode::write_value(w, &frame)?;
    Ok(())
}

/// Decodes the next batch frame, returning `Ok(None)` at a clean end of
/// stream.
pub fn decode_batch<R: Read>(r: &mut R) -> Result<Option<Vec<Row>>, MprError> {
    let frame = match rmpv::decode::read_value(r) {
        Ok(v) => v,
        Err(rmpv::decode::Error::InvalidMarkerRead(e))
            if e.kind() == std::io::ErrorKind::UnexpectedEof =>
        {
            return Ok(None);
        }
        Err(e) => return Err(MprError::CorruptFile(format!("bad row frame: {e}"))),
    };

    let rows = match frame {
        rmpv::Value::Array(rows) => rows,
        other => {
            return Err(MprError::CorruptFile(format!(
                "row frame is not an array: {other}"
            )));
        }
    };

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let cells = match row {
            rmpv::Value::Array(cells) => cells,
            other => {
                return Err(MprError::CorruptFile(format!(
                    "row is not an array: {other}"
                )));
            }
        };
        out.push(
            cells
                .into_iter()
                .map(Value::from_msgpack)
                .collect::<Result<Row, _>>()?,
        );
    }
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(rows: Vec<Row>) -> Vec<Row> {
        let mut buf = Vec::new();
        encode_batch(&mut buf, &rows).unwrap();
        let mut cur = std::io::Cursor::new(buf);
        let got = decode_batch(&mut cur).unwrap().unwrap();
        assert!(decode_batch(&mut cur).unwrap().is_none());
        got
    }

    #[test]
    fn scalar_roundtrip() {
        let rows = vec![vec![
            Value::Null,
            Value::Int(-42),
            Value::Float(3.25),
            Value::String("héllo".into()),
            Value::Bytes(vec![0, 159, 146, 150]),
        ]];
        assert_eq!(roundtrip(rows.clone()), rows);
    }

    #[test]
    fn temporal_roundtrip() {
        let rows = vec![vec![
            Value::Date(NaiveDate::from_ymd_opt(2015, 8, 30).unwrap()),
            Value::Time(NaiveTime::from_hms_opt(23, 59, 58).unwrap()),
            Value::DateTime(NaiveDateTime::new(
                NaiveDate::from_ymd_opt(1999, 1, 2).unwrap(),
                NaiveTime::from_hms_opt(3, 4, 5).unwrap(),
            )),
        ]];
        assert_eq!(roundtrip(rows.clone()), rows);
    }

    #[test]
    fn unknown_tag_is_corrupt() {
        let wire = rmpv::Value::Map(vec![(
            rmpv::Value::from("__decimal__"),
            rmpv::Value::Boolean(true),
        )]);
        assert!(matches!(
            Value::from_msgpack(wire),
            Err(MprError::CorruptFile(_))
        ));
    }

    #[test]
    fn nat_sentinel_is_none() {
        assert_eq!(Value::from_optional_datetime(None), Value::Null);
    }
}
