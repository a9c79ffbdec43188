//! Persisted candle files.
//!
//! Layout: `{data_dir}/{TICKER}_{granularity}.parquet`, one file per
//! collection task, overwritten on every successful fetch.
//!
//! Writes are atomic (write to `.tmp`, rename into place) so a concurrent
//! reader never sees a half-written file.

use chrono::NaiveDate;
use polars::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

use super::provider::DataError;
use crate::domain::{CandleRecord, CollectionTask};

/// Column order of every persisted candle file.
pub const CANDLE_COLUMNS: [&str; 10] = [
    "timestamp",
    "gmtoffset",
    "datetime",
    "date",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "adjusted_close",
];

/// Parquet files for collected candles.
#[derive(Debug, Clone)]
pub struct CandleFiles {
    data_dir: PathBuf,
}

impl CandleFiles {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Deterministic path for a task.
    pub fn path(&self, task: &CollectionTask) -> PathBuf {
        self.data_dir.join(format!("{}.parquet", task.stem()))
    }

    pub fn exists(&self, task: &CollectionTask) -> bool {
        self.path(task).is_file()
    }

    /// Create the data directory if missing.
    pub fn ensure_dir(&self) -> Result<(), DataError> {
        fs::create_dir_all(&self.data_dir).map_err(|e| {
            DataError::File(format!("failed to create {}: {e}", self.data_dir.display()))
        })
    }

    /// Write records for a task, replacing any previous file.
    ///
    /// Refuses an empty slice: a file on disk always holds at least one record.
    pub fn write(
        &self,
        task: &CollectionTask,
        records: &[CandleRecord],
    ) -> Result<PathBuf, DataError> {
        if records.is_empty() {
            return Err(DataError::File(format!("no records to write for {task}")));
        }

        self.ensure_dir()?;

        let mut df = records_to_dataframe(records)?;
        let path = self.path(task);
        let tmp_path = path.with_extension("parquet.tmp");

        write_parquet(&mut df, &tmp_path)?;

        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::File(format!("atomic rename failed: {e}"))
        })?;

        Ok(path)
    }

    /// Read a task's file back as a DataFrame.
    pub fn read(&self, task: &CollectionTask) -> Result<DataFrame, DataError> {
        read_parquet(&self.path(task))
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

/// Convert candle records to a DataFrame with [`CANDLE_COLUMNS`].
pub fn records_to_dataframe(records: &[CandleRecord]) -> Result<DataFrame, DataError> {
    let epoch = NaiveDate::default();

    let timestamps: Vec<Option<i64>> = records.iter().map(|r| r.timestamp).collect();
    let offsets: Vec<Option<i64>> = records.iter().map(|r| r.gmtoffset).collect();
    let datetimes: Vec<Option<i64>> = records
        .iter()
        .map(|r| r.datetime.map(|dt| dt.and_utc().timestamp_millis()))
        .collect();
    let dates: Vec<Option<i32>> = records
        .iter()
        .map(|r| r.date.map(|d| (d - epoch).num_days() as i32))
        .collect();
    let opens: Vec<Option<f64>> = records.iter().map(|r| r.open).collect();
    let highs: Vec<Option<f64>> = records.iter().map(|r| r.high).collect();
    let lows: Vec<Option<f64>> = records.iter().map(|r| r.low).collect();
    let closes: Vec<Option<f64>> = records.iter().map(|r| r.close).collect();
    let volumes: Vec<Option<f64>> = records.iter().map(|r| r.volume).collect();
    let adj_closes: Vec<Option<f64>> = records.iter().map(|r| r.adjusted_close).collect();

    DataFrame::new(vec![
        Column::new("timestamp".into(), timestamps),
        Column::new("gmtoffset".into(), offsets),
        Column::new("datetime".into(), datetimes)
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))
            .map_err(cast_err("datetime"))?,
        Column::new("date".into(), dates)
            .cast(&DataType::Date)
            .map_err(cast_err("date"))?,
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
        Column::new("adjusted_close".into(), adj_closes),
    ])
    .map_err(|e| DataError::Parquet(format!("dataframe creation: {e}")))
}

fn cast_err(col: &'static str) -> impl Fn(PolarsError) -> DataError {
    move |e| DataError::Parquet(format!("{col} cast: {e}"))
}

/// Write a DataFrame to a Parquet file.
pub(crate) fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), DataError> {
    let file = fs::File::create(path)
        .map_err(|e| DataError::Parquet(format!("create {}: {e}", path.display())))?;
    ParquetWriter::new(file)
        .finish(df)
        .map_err(|e| DataError::Parquet(format!("write {}: {e}", path.display())))?;
    Ok(())
}

/// Read a Parquet file into memory.
pub(crate) fn read_parquet(path: &Path) -> Result<DataFrame, DataError> {
    let file = fs::File::open(path)
        .map_err(|e| DataError::Parquet(format!("open {}: {e}", path.display())))?;
    ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::Parquet(format!("read {}: {e}", path.display())))
}
