//! Loads persisted candle files into store tables.
//!
//! Ingestion is create-if-absent: a table that already exists is never
//! refreshed, even when its source file has been rewritten since. A changed
//! source is reported with a warning so the staleness is visible.

use crate::data::files::CandleFiles;
use crate::domain::CollectionTask;
use crate::store::{file_hash, Store, StoreError, TableCreation};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("ingest {table} failed: {source}")]
    Table {
        table: String,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Ingests the candle files of collection tasks.
#[derive(Debug, Clone)]
pub struct Ingestor {
    files: CandleFiles,
}

impl Ingestor {
    pub fn new(files: CandleFiles) -> Self {
        Self { files }
    }

    pub fn files(&self) -> &CandleFiles {
        &self.files
    }

    /// Create the task's table from its file if the table is absent.
    ///
    /// Returns the sorted set of table names known after the call.
    pub fn ingest(&self, store: &Store, task: &CollectionTask) -> Result<Vec<String>, IngestError> {
        self.ingest_one(store, task)?;
        Ok(store.tables()?)
    }

    /// Ingest every task in order, stopping at the first error.
    pub fn ingest_all(
        &self,
        store: &Store,
        tasks: &[CollectionTask],
    ) -> Result<Vec<String>, IngestError> {
        for task in tasks {
            self.ingest_one(store, task)?;
        }
        Ok(store.tables()?)
    }

    fn ingest_one(&self, store: &Store, task: &CollectionTask) -> Result<(), IngestError> {
        let table = task.table_name();
        let source = self.files.path(task);

        let creation = store
            .create_table_from_parquet(&table, &source)
            .map_err(|source| IngestError::Table {
                table: table.clone(),
                source,
            })?;

        match creation {
            TableCreation::Created(meta) => {
                tracing::info!(
                    table = %table,
                    rows = meta.row_count,
                    source = %source.display(),
                    "table created"
                );
            }
            TableCreation::AlreadyExists => {
                tracing::debug!(table = %table, "table exists, skipping");
                self.warn_if_stale(store, &table, &source);
            }
        }
        Ok(())
    }

    fn warn_if_stale(&self, store: &Store, table: &str, source: &std::path::Path) {
        if !source.is_file() {
            return;
        }
        let recorded = match store.meta(table) {
            Ok(Some(meta)) => meta.source_hash,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!(table = %table, error = %e, "cannot read table metadata");
                return;
            }
        };
        match file_hash(source) {
            Ok(current) if current != recorded => {
                tracing::warn!(
                    table = %table,
                    source = %source.display(),
                    "source file changed since ingestion; table is stale and was not refreshed"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(table = %table, error = %e, "cannot hash source file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CandleRecord, Granularity, Instrument};
    use chrono::NaiveDate;

    fn task(ticker: &str) -> CollectionTask {
        CollectionTask::new(
            Instrument::new(ticker, "FOREX").unwrap(),
            Granularity::new("d").unwrap(),
        )
    }

    fn records(n: usize) -> Vec<CandleRecord> {
        let base = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..n)
            .map(|i| {
                CandleRecord {
                    date: Some(base + chrono::Duration::days(i as i64)),
                    close: Some(100.0 + i as f64),
                    ..Default::default()
                }
                .normalized()
            })
            .collect()
    }

    #[test]
    fn ingest_creates_named_table() {
        let dir = tempfile::tempdir().unwrap();
        let files = CandleFiles::new(dir.path().join("EOD"));
        let store = Store::open(dir.path().join("db")).unwrap();
        let t = task("USDJPY");
        files.write(&t, &records(4)).unwrap();

        let tables = Ingestor::new(files).ingest(&store, &t).unwrap();

        assert_eq!(tables, vec!["USDJPY_d".to_string()]);
        assert_eq!(store.read("USDJPY_d").unwrap().height(), 4);
    }

    #[test]
    fn missing_file_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("db")).unwrap();
        let ingestor = Ingestor::new(CandleFiles::new(dir.path().join("EOD")));

        let err = ingestor.ingest(&store, &task("GBPUSD")).unwrap_err();
        assert!(matches!(
            err,
            IngestError::Table { source: StoreError::SourceMissing(_), .. }
        ));
    }

    #[test]
    fn ingest_all_stops_at_first_error() {
        let dir = tempfile::tempdir().unwrap();
        let files = CandleFiles::new(dir.path().join("EOD"));
        let store = Store::open(dir.path().join("db")).unwrap();
        let present = task("EURUSD");
        files.write(&present, &records(2)).unwrap();

        let tasks = vec![present, task("AUDUSD"), task("NZDUSD")];
        let result = Ingestor::new(files.clone()).ingest_all(&store, &tasks);

        assert!(result.is_err());
        assert_eq!(store.tables().unwrap(), vec!["EURUSD_d".to_string()]);
    }
}
