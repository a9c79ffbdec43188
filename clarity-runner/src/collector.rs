//! One collection tick: fetch and persist every task under a concurrency cap.
//!
//! Each task holds one semaphore slot for its whole fetch → parse → write
//! unit. A failing task is logged and counted; it never aborts the tick. The
//! tick itself fails only when the data directory cannot be created.

use async_trait::async_trait;
use clarity_core::data::{CandleFiles, DataClient, DataError, Format};
use clarity_core::domain::CollectionTask;
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use crate::scheduler::Job;

/// What happened to one task.
#[derive(Debug)]
enum TaskOutcome {
    Persisted { records: usize, path: PathBuf },
    Empty,
}

/// Counters for one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickSummary {
    pub total: usize,
    pub persisted: usize,
    pub empty: usize,
    pub failed: usize,
    pub records_written: usize,
    pub elapsed: Duration,
    /// `(task, error)` for each failed task.
    pub errors: Vec<(String, String)>,
}

impl TickSummary {
    pub fn log_summary(&self) {
        if self.failed > 0 {
            tracing::warn!(
                total = self.total,
                persisted = self.persisted,
                empty = self.empty,
                failed = self.failed,
                records = self.records_written,
                elapsed = ?self.elapsed,
                "collection tick finished with failures"
            );
        } else {
            tracing::info!(
                total = self.total,
                persisted = self.persisted,
                empty = self.empty,
                records = self.records_written,
                elapsed = ?self.elapsed,
                "collection tick finished"
            );
        }
    }
}

/// Fetches every configured task from a [`DataClient`] into [`CandleFiles`].
pub struct Collector<C: DataClient> {
    client: Arc<C>,
    tasks: Vec<CollectionTask>,
    files: CandleFiles,
    format: Format,
    limit: Arc<Semaphore>,
}

impl<C: DataClient + 'static> Collector<C> {
    /// `max_concurrent` is clamped to at least one.
    pub fn new(
        client: Arc<C>,
        tasks: Vec<CollectionTask>,
        files: CandleFiles,
        format: Format,
        max_concurrent: usize,
    ) -> Self {
        Self {
            client,
            tasks,
            files,
            format,
            limit: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn tasks(&self) -> &[CollectionTask] {
        &self.tasks
    }

    /// Run one tick over all tasks.
    pub async fn collect_once(&self) -> Result<TickSummary, DataError> {
        self.files.ensure_dir()?;

        let started = Instant::now();
        let outcomes = join_all(self.tasks.iter().map(|task| self.collect_task(task))).await;

        let mut summary = TickSummary {
            total: self.tasks.len(),
            ..Default::default()
        };
        for (task, outcome) in self.tasks.iter().zip(outcomes) {
            match outcome {
                Ok(TaskOutcome::Persisted { records, path }) => {
                    tracing::debug!(task = %task, records, path = %path.display(), "persisted");
                    summary.persisted += 1;
                    summary.records_written += records;
                }
                Ok(TaskOutcome::Empty) => summary.empty += 1,
                Err(e) => {
                    tracing::warn!(task = %task, error = %e, "collection failed");
                    summary.failed += 1;
                    summary.errors.push((task.to_string(), e.to_string()));
                }
            }
        }
        summary.elapsed = started.elapsed();
        Ok(summary)
    }

    async fn collect_task(&self, task: &CollectionTask) -> Result<TaskOutcome, DataError> {
        let _permit = self
            .limit
            .acquire()
            .await
            .map_err(|_| DataError::Other("collector semaphore closed".into()))?;

        let payload = self
            .client
            .fetch(&task.instrument, &task.granularity, self.format)
            .await?;

        if payload.is_empty() {
            tracing::warn!(task = %task, "empty payload; nothing written");
            return Ok(TaskOutcome::Empty);
        }

        let records = payload.into_records(self.format)?;
        if records.is_empty() {
            tracing::warn!(task = %task, "payload held no records; nothing written");
            return Ok(TaskOutcome::Empty);
        }

        let count = records.len();
        let files = self.files.clone();
        let owned = task.clone();
        let path = tokio::task::spawn_blocking(move || files.write(&owned, &records))
            .await
            .map_err(|e| DataError::File(format!("write task for {task} failed: {e}")))??;

        Ok(TaskOutcome::Persisted {
            records: count,
            path,
        })
    }
}

#[async_trait]
impl<C: DataClient + 'static> Job for Collector<C> {
    fn name(&self) -> &str {
        "collector"
    }

    async fn run(&self) -> anyhow::Result<()> {
        let summary = self.collect_once().await?;
        summary.log_summary();
        Ok(())
    }
}
