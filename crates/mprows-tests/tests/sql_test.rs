#![cfg(feature = "sql")]

use std::sync::Arc;

use mprows::rusqlite::Connection;
use mprows::{add_partition, GeneratorSource, LoadOptions, LocalFilesystem, MprError, MprFile, Value};

mod common;

fn load_cars(dir: &std::path::Path, rows: i64) -> MprFile {
    let fs = Arc::new(LocalFilesystem::new(dir).unwrap());
    let f = MprFile::new(fs, "cars");
    let source = GeneratorSource::new(
        (1..=rows).map(|i| vec![Value::Int(i), Value::String(format!("car {i}"))]),
    )
    .with_headers(vec!["id".into(), "name".into()]);
    f.load_rows(source, &LoadOptions::default()).unwrap();
    f
}

#[test]
fn count_matches_row_count() {
    let dir = tempfile::tempdir().unwrap();
    let f = load_cars(dir.path(), 100);

    let conn = Connection::open_in_memory().unwrap();
    add_partition(&conn, &dir.path().join("cars.mpr"), "cars").unwrap();

    let n: i64 = conn
        .query_row("SELECT count(*) FROM cars", [], |r| r.get(0))
        .unwrap();
    assert_eq!(n as u32, f.reader().unwrap().n_rows());
}

#[test]
fn values_and_rowids_come_back_in_order() {
    let dir = tempfile::tempdir().unwrap();
    load_cars(dir.path(), 10);

    let conn = Connection::open_in_memory().unwrap();
    add_partition(&conn, &dir.path().join("cars.mpr"), "cars").unwrap();

    let mut stmt = conn
        .prepare("SELECT rowid, id, name FROM cars")
        .unwrap();
    let rows: Vec<(i64, i64, String)> = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(rows.len(), 10);
    assert_eq!(rows[0], (1, 1, "car 1".to_string()));
    assert_eq!(rows[9], (10, 10, "car 10".to_string()));
}

#[test]
fn where_clause_filters() {
    let dir = tempfile::tempdir().unwrap();
    load_cars(dir.path(), 50);

    let conn = Connection::open_in_memory().unwrap();
    add_partition(&conn, &dir.path().join("cars.mpr"), "cars").unwrap();

    let n: i64 = conn
        .query_row("SELECT count(*) FROM cars WHERE id > 40", [], |r| r.get(0))
        .unwrap();
    assert_eq!(n, 10);
}

#[test]
fn declared_types_follow_resolved_types() {
    let dir = tempfile::tempdir().unwrap();
    load_cars(dir.path(), 20);

    let conn = Connection::open_in_memory().unwrap();
    add_partition(&conn, &dir.path().join("cars.mpr"), "cars").unwrap();

    let sql: String = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE name = 'cars'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert!(sql.contains("mod_partition"), "got {sql}");

    let decl: String = conn
        .query_row("SELECT typeof(id) FROM cars LIMIT 1", [], |r| r.get(0))
        .unwrap();
    assert_eq!(decl, "integer");
}

#[test]
fn temporal_values_render_iso8601() {
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

    let dir = tempfile::tempdir().unwrap();
    let fs = Arc::new(LocalFilesystem::new(dir.path()).unwrap());
    let f = MprFile::new(fs, "times");

    let rows = (0..10i64).map(|i| {
        vec![
            Value::Date(NaiveDate::from_ymd_opt(2015, 8, 30).unwrap()),
            Value::Time(NaiveTime::from_hms_opt(13, 45, 10).unwrap()),
            Value::DateTime(NaiveDateTime::new(
                NaiveDate::from_ymd_opt(2015, 8, 30).unwrap(),
                NaiveTime::from_hms_opt(13, 45, i as u32).unwrap(),
            )),
        ]
    });
    let source = GeneratorSource::new(rows)
        .with_headers(vec!["d".into(), "t".into(), "dt".into()]);
    f.load_rows(source, &LoadOptions::default()).unwrap();

    let conn = Connection::open_in_memory().unwrap();
    add_partition(&conn, &dir.path().join("times.mpr"), "times").unwrap();

    let (d, t, dt): (String, String, String) = conn
        .query_row("SELECT d, t, dt FROM times LIMIT 1", [], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?))
        })
        .unwrap();
    assert_eq!(d, "2015-08-30");
    assert_eq!(t, "13:45:10");
    assert_eq!(dt, "2015-08-30T13:45:00");
}

#[test]
fn duplicate_mount_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    load_cars(dir.path(), 5);

    let conn = Connection::open_in_memory().unwrap();
    let path = dir.path().join("cars.mpr");
    add_partition(&conn, &path, "cars").unwrap();
    add_partition(&conn, &path, "cars").unwrap();

    let n: i64 = conn
        .query_row("SELECT count(*) FROM cars", [], |r| r.get(0))
        .unwrap();
    assert_eq!(n, 5);
}

#[test]
fn missing_file_is_a_virtual_table_error() {
    let dir = tempfile::tempdir().unwrap();
    let conn = Connection::open_in_memory().unwrap();

    let err = add_partition(&conn, &dir.path().join("nope.mpr"), "nope").unwrap_err();
    assert!(matches!(err, MprError::VirtualTable(_)), "got {err}");
}

#[test]
fn two_cursors_scan_independently() {
    let dir = tempfile::tempdir().unwrap();
    load_cars(dir.path(), 30);

    let conn = Connection::open_in_memory().unwrap();
    add_partition(&conn, &dir.path().join("cars.mpr"), "cars").unwrap();

    // A self-join forces concurrent cursors over the same file.
    let n: i64 = conn
        .query_row(
            "SELECT count(*) FROM cars a JOIN cars b ON a.id = b.id",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(n, 30);
}
