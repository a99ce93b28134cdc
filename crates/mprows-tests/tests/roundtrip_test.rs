use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use mprows::{MprError, Row, Value};

mod common;

fn all_types_row(i: i64) -> Row {
    vec![
        Value::Int(i),
        Value::Float(i as f64 + 0.5),
        Value::String(format!("value {i}")),
        Value::Bytes(vec![i as u8, 0xFF]),
        Value::Null,
        Value::Date(NaiveDate::from_ymd_opt(2015, 8, (i % 28 + 1) as u32).unwrap()),
        Value::Time(NaiveTime::from_hms_opt(12, 34, (i % 60) as u32).unwrap()),
        Value::DateTime(NaiveDateTime::new(
            NaiveDate::from_ymd_opt(1999, 1, 2).unwrap(),
            NaiveTime::from_hms_opt(3, 4, 5).unwrap(),
        )),
    ]
}

#[test]
fn write_then_read_two_rows_with_headers() {
    let fs = common::memfs();
    let f = common::mpr(&fs, "two");

    let mut w = f.writer().unwrap();
    w.set_headers(&["id".to_string(), "name".to_string()]).unwrap();
    w.append(vec![Value::Int(1), common::s("a")]).unwrap();
    w.append(vec![Value::Int(2), common::s("b")]).unwrap();
    w.close().unwrap();

    let reader = f.reader().unwrap();
    assert_eq!(reader.headers(), vec!["id".to_string(), "name".to_string()]);
    assert_eq!(reader.n_rows(), 2);

    let rows: Vec<Row> = reader.rows().unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(
        rows,
        vec![
            vec![Value::Int(1), common::s("a")],
            vec![Value::Int(2), common::s("b")],
        ]
    );
}

#[test]
fn all_value_types_survive() {
    let fs = common::memfs();
    let f = common::mpr(&fs, "types");

    let expected: Vec<Row> = (0..50).map(all_types_row).collect();
    let mut w = f.writer().unwrap();
    for row in &expected {
        w.append(row.clone()).unwrap();
    }
    w.close().unwrap();

    let reader = f.reader().unwrap();
    let rows: Vec<Row> = reader.raw().unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(rows, expected);
}

#[test]
fn raw_count_matches_header() {
    let fs = common::memfs();
    // 2500 rows spans multiple 1000-row batch frames.
    let f = common::load_simple(&fs, "counts", 2500);
    let reader = f.reader().unwrap();

    assert_eq!(reader.n_rows(), 2500);
    assert_eq!(reader.raw().unwrap().count(), 2500);
}

#[test]
fn data_iteration_matches_data_range() {
    let fs = common::memfs();
    let f = common::load_simple(&fs, "range", 120);
    let reader = f.reader().unwrap();

    let expected = reader.data_end_row() - reader.data_start_row() + 1;
    assert_eq!(reader.rows().unwrap().count() as u32, expected);
}

#[test]
fn meta_fields_roundtrip() {
    let fs = common::memfs();
    let f = common::mpr(&fs, "meta");

    let mut w = f.writer().unwrap();
    w.append(vec![Value::Int(1)]).unwrap();
    w.meta_mut().source.url = Some("http://example.com/a.csv".into());
    w.meta_mut().source.encoding = Some("utf-8".into());
    w.meta_mut().comments.header = Some("from the top of the file".into());
    w.meta_mut().geo.bb = Some(vec![-122.5, 37.7, -122.3, 37.8]);
    w.close().unwrap();

    let meta = f.meta().unwrap().unwrap();
    assert_eq!(meta.source.url.as_deref(), Some("http://example.com/a.csv"));
    assert_eq!(meta.source.encoding.as_deref(), Some("utf-8"));
    assert_eq!(
        meta.comments.header.as_deref(),
        Some("from the top of the file")
    );
    assert_eq!(meta.geo.bb, Some(vec![-122.5, 37.7, -122.3, 37.8]));
}

#[test]
fn finalized_file_reads_identically_across_opens() {
    let fs = common::memfs();
    let f = common::load_simple(&fs, "stable", 40);

    let first_rows: Vec<Row> = f
        .reader()
        .unwrap()
        .raw()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    let first_meta = f.meta().unwrap().unwrap();
    assert!(first_meta.process.finalized);

    // A meta-only re-open that changes nothing must not disturb the file.
    let w = f.writer().unwrap();
    w.close().unwrap();

    let second_rows: Vec<Row> = f
        .reader()
        .unwrap()
        .raw()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    let second_meta = f.meta().unwrap().unwrap();

    assert_eq!(first_rows, second_rows);
    assert_eq!(first_meta.schema, second_meta.schema);
    assert_eq!(first_meta.row_spec.start_row, second_meta.row_spec.start_row);
    assert_eq!(first_meta.stats.len(), second_meta.stats.len());
}

#[test]
fn append_after_finalize_is_rejected() {
    let fs = common::memfs();
    let f = common::load_simple(&fs, "frozen", 10);

    let mut w = f.writer().unwrap();
    let err = w.append(vec![Value::Int(99)]).unwrap_err();
    assert!(matches!(err, MprError::AlreadyFinalized), "got {err}");
    w.close().unwrap();
}

#[test]
fn append_after_close_without_finalize_is_rejected() {
    let fs = common::memfs();
    let f = common::mpr(&fs, "reopen");

    let mut w = f.writer().unwrap();
    w.append(vec![Value::Int(1)]).unwrap();
    w.close().unwrap();

    let mut w = f.writer().unwrap();
    let err = w.append(vec![Value::Int(2)]).unwrap_err();
    assert!(matches!(err, MprError::RowsAlreadyLoaded(1)), "got {err}");
    w.close().unwrap();
}

#[test]
fn row_proxy_reads_by_name() {
    let fs = common::memfs();
    let f = common::load_simple(&fs, "proxy", 5);
    let reader = f.reader().unwrap();

    let proxies: Vec<_> = reader
        .proxied()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(proxies.len(), 5);
    assert_eq!(proxies[0].get("id"), Some(&Value::Int(1)));
    assert_eq!(proxies[4].get("name"), Some(&common::s("name 5")));
    assert!(proxies[0].get("missing").is_none());

    // Owned proxies from one pass do not alias each other.
    assert_ne!(proxies[0].get("id"), proxies[1].get("id"));
}

#[test]
fn select_filters_and_projects() {
    let fs = common::memfs();
    let f = common::load_simple(&fs, "select", 20);
    let reader = f.reader().unwrap();

    let ids: Vec<i64> = reader
        .select(
            |row| matches!(row.get("id"), Some(Value::Int(i)) if i % 2 == 0),
            |row| match row.get("id") {
                Some(Value::Int(i)) => *i,
                _ => -1,
            },
        )
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(ids, (1..=20).filter(|i| i % 2 == 0).collect::<Vec<i64>>());
}
