//! Integration tests for files → store → fractals.
//!
//! Tests:
//! 1. Written candle files ingest into `{ticker}_{granularity}` tables
//! 2. Re-ingesting after the source changed leaves the table untouched
//! 3. Fractals come back ordered by the order column with nulls last
//! 4. The alternating close series flags lower/upper/lower/upper/lower
//! 5. Integer value columns are cast; unknown and non-numeric columns error

use chrono::NaiveDate;
use clarity_core::data::{CandleFiles, Ingestor};
use clarity_core::domain::{CandleRecord, CollectionTask, Granularity, Instrument};
use clarity_core::indicators::{williams_fractal, FractalError, FractalQuery};
use clarity_core::Store;
use polars::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

// ──────────────────────────────────────────────
// Helpers
// ──────────────────────────────────────────────

struct Workspace {
    root: PathBuf,
    files: CandleFiles,
    store: Store,
}

impl Workspace {
    fn new() -> Self {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let root = std::env::temp_dir().join(format!(
            "clarity_pipeline_test_{}_{id}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&root);
        let files = CandleFiles::new(root.join("data/EOD"));
        let store = Store::open(root.join("database/clarity")).unwrap();
        Self { root, files, store }
    }

    fn ingestor(&self) -> Ingestor {
        Ingestor::new(self.files.clone())
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

fn task(ticker: &str, g: &str) -> CollectionTask {
    CollectionTask::new(
        Instrument::new(ticker, "FOREX").unwrap(),
        Granularity::new(g).unwrap(),
    )
}

/// Daily candles with the given closes, one day apart from 2024-01-01.
fn daily(closes: &[Option<f64>]) -> Vec<CandleRecord> {
    let base = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, close)| {
            CandleRecord {
                date: Some(base + chrono::Duration::days(i as i64)),
                open: *close,
                high: close.map(|c| c + 1.0),
                low: close.map(|c| c - 1.0),
                close: *close,
                adjusted_close: *close,
                volume: Some(0.0),
                ..Default::default()
            }
            .normalized()
        })
        .collect()
}

fn closes(df: &DataFrame, column: &str) -> Vec<Option<f64>> {
    df.column(column).unwrap().f64().unwrap().into_iter().collect()
}

// ──────────────────────────────────────────────
// Ingestion
// ──────────────────────────────────────────────

#[test]
fn ingest_all_creates_one_table_per_task() {
    let ws = Workspace::new();
    let tasks = vec![task("USDJPY", "d"), task("USDJPY", "w"), task("EURUSD", "d")];
    for t in &tasks {
        ws.files.write(t, &daily(&[Some(1.0), Some(2.0)])).unwrap();
    }

    let tables = ws.ingestor().ingest_all(&ws.store, &tasks).unwrap();

    assert_eq!(tables, vec!["EURUSD_d", "USDJPY_d", "USDJPY_w"]);
}

#[test]
fn reingest_is_a_noop_even_when_source_changed() {
    let ws = Workspace::new();
    let t = task("USDJPY", "d");
    ws.files.write(&t, &daily(&[Some(1.0), Some(2.0), Some(3.0)])).unwrap();

    let ingestor = ws.ingestor();
    ingestor.ingest(&ws.store, &t).unwrap();
    let first = ws.store.read("USDJPY_d").unwrap();
    let first_meta = ws.store.meta("USDJPY_d").unwrap().unwrap();

    ws.files.write(&t, &daily(&[Some(9.0)])).unwrap();
    let tables = ingestor.ingest(&ws.store, &t).unwrap();

    assert_eq!(tables, vec!["USDJPY_d"]);
    let second = ws.store.read("USDJPY_d").unwrap();
    assert!(first.equals_missing(&second));
    assert_eq!(ws.store.meta("USDJPY_d").unwrap().unwrap(), first_meta);
}

// ──────────────────────────────────────────────
// Fractals
// ──────────────────────────────────────────────

#[test]
fn alternating_closes_period_one() {
    let ws = Workspace::new();
    let t = task("USDJPY", "d");
    let values = [10.0, 12.0, 8.0, 15.0, 11.0];
    ws.files.write(&t, &daily(&values.map(Some))).unwrap();
    ws.ingestor().ingest(&ws.store, &t).unwrap();

    let df = williams_fractal(&ws.store, &FractalQuery::new("USDJPY_d").with_period(1)).unwrap();

    assert_eq!(df.height(), 5);
    assert_eq!(
        closes(&df, "upper_fractal"),
        vec![None, Some(12.0), None, Some(15.0), None]
    );
    assert_eq!(
        closes(&df, "lower_fractal"),
        vec![Some(10.0), None, Some(8.0), None, Some(11.0)]
    );
    for column in ["date", "open", "high", "low", "close", "volume"] {
        assert!(df.column(column).is_ok(), "missing source column {column}");
    }
}

#[test]
fn rows_are_sorted_with_null_order_keys_last() {
    let ws = Workspace::new();
    let t = task("GBPUSD", "d");

    let mut records = daily(&[Some(3.0), Some(1.0), Some(2.0)]);
    records.reverse();
    records.push(CandleRecord {
        close: Some(100.0),
        ..Default::default()
    });
    ws.files.write(&t, &records).unwrap();
    ws.ingestor().ingest(&ws.store, &t).unwrap();

    let df = williams_fractal(&ws.store, &FractalQuery::new("GBPUSD_d").with_period(1)).unwrap();

    assert_eq!(
        closes(&df, "close"),
        vec![Some(3.0), Some(1.0), Some(2.0), Some(100.0)]
    );
    assert_eq!(df.column("date").unwrap().null_count(), 1);
    assert!(df.column("date").unwrap().get(3).unwrap().is_null());
}

#[test]
fn null_values_are_never_flagged() {
    let ws = Workspace::new();
    let t = task("AUDUSD", "d");
    ws.files
        .write(&t, &daily(&[Some(5.0), None, Some(4.0)]))
        .unwrap();
    ws.ingestor().ingest(&ws.store, &t).unwrap();

    let df = williams_fractal(&ws.store, &FractalQuery::new("AUDUSD_d").with_period(1)).unwrap();

    assert_eq!(closes(&df, "upper_fractal"), vec![Some(5.0), None, None]);
    assert_eq!(closes(&df, "lower_fractal"), vec![None, None, Some(4.0)]);
}

#[test]
fn integer_value_column_is_cast() {
    let ws = Workspace::new();
    let source = ws.root.join("ints.parquet");
    std::fs::create_dir_all(&ws.root).unwrap();
    let mut df = DataFrame::new(vec![
        Column::new("seq".into(), [3i64, 1, 2]),
        Column::new("ticks".into(), [30i32, 10, 20]),
    ])
    .unwrap();
    let file = std::fs::File::create(&source).unwrap();
    ParquetWriter::new(file).finish(&mut df).unwrap();
    ws.store.create_table_from_parquet("ticks", &source).unwrap();

    let query = FractalQuery::new("ticks")
        .with_period(1)
        .with_value_column("ticks")
        .with_order_column("seq");
    let out = williams_fractal(&ws.store, &query).unwrap();

    assert_eq!(closes(&out, "upper_fractal"), vec![None, None, Some(30.0)]);
    assert_eq!(closes(&out, "lower_fractal"), vec![Some(10.0), None, None]);
}

#[test]
fn query_errors_propagate() {
    let ws = Workspace::new();
    let t = task("NZDUSD", "d");
    ws.files.write(&t, &daily(&[Some(1.0)])).unwrap();
    ws.ingestor().ingest(&ws.store, &t).unwrap();

    let missing_table = williams_fractal(&ws.store, &FractalQuery::new("NOPE_d"));
    assert!(matches!(missing_table, Err(FractalError::Store(_))));

    let missing_column = williams_fractal(
        &ws.store,
        &FractalQuery::new("NZDUSD_d").with_value_column("bid"),
    );
    assert!(matches!(missing_column, Err(FractalError::ColumnNotFound { .. })));

    let non_numeric = williams_fractal(
        &ws.store,
        &FractalQuery::new("NZDUSD_d").with_value_column("date"),
    );
    assert!(matches!(non_numeric, Err(FractalError::NonNumeric { .. })));
}
