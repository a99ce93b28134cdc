use mprows::{GeneratorSource, LoadOptions, Stats, Value};

mod common;

#[test]
fn int_column_descriptives() {
    let fs = common::memfs();
    let f = common::mpr(&fs, "ints");

    let source = GeneratorSource::new((1..=30i64).map(|i| vec![Value::Int(i)]))
        .with_headers(vec!["x".into()]);
    f.load_rows(source, &LoadOptions::default()).unwrap();

    let meta = f.meta().unwrap().unwrap();
    let entry = meta.stats.get("x").expect("stats entry for x");

    assert_eq!(entry.count, 30);
    assert_eq!(entry.nuniques, 30);
    assert_eq!(entry.min, Some(1.0));
    assert_eq!(entry.max, Some(30.0));
    assert!((entry.mean.unwrap() - 15.5).abs() < 1e-9);
    assert_eq!(entry.lom.as_deref(), Some("i"));
}

#[test]
fn stats_mirror_into_schema_rows() {
    let fs = common::memfs();
    let f = common::load_simple(&fs, "mirrored", 100);

    let reader = f.reader().unwrap();
    let id_col = &reader.columns()[0];
    assert_eq!(id_col.stat_count, Some(100));
    assert_eq!(id_col.nuniques, Some(100));
    assert_eq!(id_col.min, Some(1.0));
    assert_eq!(id_col.max, Some(100.0));
    assert!((id_col.mean.unwrap() - 50.5).abs() < 1e-9);

    let name_col = &reader.columns()[1];
    assert_eq!(name_col.lom.as_deref(), Some("n"));
    assert_eq!(name_col.stat_count, Some(100));
    assert!(name_col.mean.is_none());
    assert!(name_col.uvalues.as_ref().unwrap().len() <= 100);
}

#[test]
fn quantiles_within_one_percent_on_integers() {
    let fs = common::memfs();
    let f = common::mpr(&fs, "ramp");

    let source = GeneratorSource::new((1..=2001i64).map(|i| vec![Value::Int(i)]))
        .with_headers(vec!["x".into()]);
    f.load_rows(source, &LoadOptions::default()).unwrap();

    let meta = f.meta().unwrap().unwrap();
    let entry = meta.stats.get("x").unwrap();

    for (got, exact) in [
        (entry.p25.unwrap(), 501.0),
        (entry.p50.unwrap(), 1001.0),
        (entry.p75.unwrap(), 1501.0),
    ] {
        assert!(
            (got - exact).abs() / exact < 0.01,
            "estimate {got} too far from {exact}"
        );
    }
}

#[test]
fn histogram_total_never_exceeds_count() {
    let fs = common::memfs();
    let f = common::mpr(&fs, "hist");

    // Enough values to pass the primer and fix bin edges.
    let source = GeneratorSource::new((0..20_000i64).map(|i| vec![Value::Int(i % 500)]))
        .with_headers(vec!["x".into()]);
    f.load_rows(source, &LoadOptions::default()).unwrap();

    let meta = f.meta().unwrap().unwrap();
    let entry = meta.stats.get("x").unwrap();

    let binned: u64 = entry.hist.iter().sum();
    assert!(binned > 0);
    assert!(binned <= entry.count);
    assert_eq!(entry.hist.len(), 16);
    assert!(!entry.text_hist.is_empty());
}

#[test]
fn stats_runner_direct() {
    let fs = common::memfs();
    let f = common::load_simple(&fs, "direct", 50);
    let reader = f.reader().unwrap();

    let schema = vec![
        ("id".to_string(), "int".to_string()),
        ("name".to_string(), "str".to_string()),
    ];
    let stats = Stats::new(&schema).run(&reader, None).unwrap();

    let id = stats.get("id").unwrap();
    assert_eq!(id.count(), 50);
    assert_eq!(id.min(), Some(1.0));
    assert_eq!(id.max(), Some(50.0));

    let name = stats.get("name").unwrap();
    assert_eq!(name.nuniques(), 50);
    assert!(name.mean().is_none());
}

#[test]
fn sampling_stride_reduces_processed_rows() {
    let fs = common::memfs();
    let f = common::load_simple(&fs, "sampled", 60_000);
    let reader = f.reader().unwrap();

    let schema = vec![("id".to_string(), "int".to_string())];
    let stats = Stats::new(&schema)
        .run(&reader, Some(u64::from(reader.n_rows())))
        .unwrap();

    let id = stats.get("id").unwrap();
    // Stride of 6 over 60k rows: close to the 10k target, far below 60k.
    assert!(id.count() < 20_000, "processed {}", id.count());
    assert!(id.count() >= 9_000, "processed {}", id.count());
}

#[test]
fn date_columns_rank_as_ordinal() {
    use chrono::NaiveDate;

    let fs = common::memfs();
    let f = common::mpr(&fs, "dated");

    let rows = (1..=28u32)
        .map(|d| vec![Value::Date(NaiveDate::from_ymd_opt(2015, 8, d).unwrap())]);
    let source = GeneratorSource::new(rows).with_headers(vec!["day".into()]);
    f.load_rows(
        source,
        &LoadOptions {
            intuit_rows: Some(false),
            ..LoadOptions::default()
        },
    )
    .unwrap();

    let meta = f.meta().unwrap().unwrap();
    let entry = meta.stats.get("day").unwrap();
    assert_eq!(entry.lom.as_deref(), Some("o"));
    assert!(entry.mean.is_none());
    assert_eq!(entry.count, 28);
    assert_eq!(entry.nuniques, 28);
}
