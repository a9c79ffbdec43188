//! Fixed-interval scheduler with drift correction.
//!
//! Each cycle runs the job body once, then sleeps until `cycle_start +
//! interval`. A body that overruns the interval starts the next cycle
//! immediately. Errors and panics from the body are logged and never end the
//! loop. A stop request wakes the sleep at once; a cycle already in progress
//! is allowed to finish.
//!
//! The loop runs either as a task on the caller's tokio runtime
//! ([`ExecutionStrategy::Cooperative`]) or on its own named OS thread with a
//! current-thread runtime ([`ExecutionStrategy::DedicatedWorker`]).
//!
//! States: stopped → running → stop requested → stopped.

use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A unit of periodic work.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// One cycle. Errors are logged by the scheduler and do not stop it.
    async fn run(&self) -> anyhow::Result<()>;
}

/// Where the cycle loop executes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// A task on the ambient tokio runtime.
    #[default]
    Cooperative,
    /// A dedicated OS thread driving its own current-thread runtime.
    DedicatedWorker,
}

/// Result of [`Scheduler::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// The in-flight cycle did not finish in time. It keeps running and the
    /// loop exits once it completes.
    TimedOut,
    NotRunning,
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("cooperative scheduler needs a running tokio runtime")]
    NoRuntime,

    #[error("failed to spawn scheduler thread: {0}")]
    Spawn(String),
}

struct RunHandle {
    cancel: CancellationToken,
    done: oneshot::Receiver<()>,
}

/// Marks the loop finished when dropped, including on unwind.
struct LoopGuard {
    running: Arc<AtomicBool>,
    done: Option<oneshot::Sender<()>>,
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

pub struct Scheduler {
    name: String,
    interval: Duration,
    strategy: ExecutionStrategy,
    job: Arc<dyn Job>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<RunHandle>>,
}

impl Scheduler {
    pub fn new(
        name: impl Into<String>,
        interval: Duration,
        strategy: ExecutionStrategy,
        job: Arc<dyn Job>,
    ) -> Self {
        Self {
            name: name.into(),
            interval,
            strategy,
            job,
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Option<RunHandle>> {
        self.handle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Begin periodic execution. A no-op (with a warning) when the loop is
    /// already running, including one still draining after a timed-out stop.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut slot = self.lock();

        if self.is_running() {
            tracing::warn!(scheduler = %self.name, "start requested but already running");
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = oneshot::channel();
        let guard = LoopGuard {
            running: Arc::clone(&self.running),
            done: Some(done_tx),
        };
        let cycles = run_cycles(
            self.name.clone(),
            self.interval,
            Arc::clone(&self.job),
            cancel.clone(),
        );

        match self.strategy {
            ExecutionStrategy::Cooperative => {
                let runtime =
                    tokio::runtime::Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;
                self.running.store(true, Ordering::SeqCst);
                runtime.spawn(async move {
                    let _guard = guard;
                    cycles.await;
                });
            }
            ExecutionStrategy::DedicatedWorker => {
                self.running.store(true, Ordering::SeqCst);
                let name = self.name.clone();
                let spawned = thread::Builder::new()
                    .name(format!("clarity-{}", self.name))
                    .spawn(move || {
                        let _guard = guard;
                        match tokio::runtime::Builder::new_current_thread()
                            .enable_all()
                            .build()
                        {
                            Ok(runtime) => runtime.block_on(cycles),
                            Err(e) => tracing::error!(
                                scheduler = %name,
                                error = %e,
                                "failed to build worker runtime"
                            ),
                        }
                    });
                if let Err(e) = spawned {
                    self.running.store(false, Ordering::SeqCst);
                    return Err(SchedulerError::Spawn(e.to_string()));
                }
            }
        }

        *slot = Some(RunHandle {
            cancel,
            done: done_rx,
        });
        tracing::info!(
            scheduler = %self.name,
            strategy = ?self.strategy,
            interval = ?self.interval,
            "scheduler started"
        );
        Ok(())
    }

    /// Request termination and wait up to `timeout` for the loop to exit.
    ///
    /// After a timeout the handle stays in place, so a later `stop` waits on
    /// the same loop again.
    pub async fn stop(&self, timeout: Duration) -> StopOutcome {
        let handle = self.lock().take();
        let Some(mut handle) = handle else {
            tracing::warn!(scheduler = %self.name, "stop requested but not running");
            return StopOutcome::NotRunning;
        };

        handle.cancel.cancel();

        match tokio::time::timeout(timeout, &mut handle.done).await {
            Ok(_) => {
                tracing::info!(scheduler = %self.name, "scheduler stopped");
                StopOutcome::Stopped
            }
            Err(_) => {
                tracing::warn!(
                    scheduler = %self.name,
                    ?timeout,
                    "cycle still running after stop timeout; it will exit when done"
                );
                let mut slot = self.lock();
                if slot.is_none() {
                    *slot = Some(handle);
                }
                StopOutcome::TimedOut
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.lock().take() {
            handle.cancel.cancel();
        }
    }
}

/// The drift-correcting cycle loop shared by every strategy.
async fn run_cycles(
    name: String,
    interval: Duration,
    job: Arc<dyn Job>,
    cancel: CancellationToken,
) {
    let mut cycle: u64 = 0;

    while !cancel.is_cancelled() {
        cycle += 1;
        let started = Instant::now();

        match AssertUnwindSafe(job.run()).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(
                    scheduler = %name,
                    job = job.name(),
                    cycle,
                    error = %format!("{e:#}"),
                    "job failed"
                );
            }
            Err(panic) => {
                tracing::error!(
                    scheduler = %name,
                    job = job.name(),
                    cycle,
                    panic = panic_message(panic.as_ref()),
                    "job panicked"
                );
            }
        }

        let elapsed = started.elapsed();
        tracing::debug!(scheduler = %name, cycle, ?elapsed, "cycle finished");

        if cancel.is_cancelled() {
            break;
        }

        if elapsed >= interval {
            tracing::warn!(
                scheduler = %name,
                cycle,
                ?elapsed,
                ?interval,
                "cycle overran its interval; starting next cycle immediately"
            );
            continue;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep_until(started + interval) => {}
        }
    }

    tracing::debug!(scheduler = %name, cycles = cycle, "cycle loop exited");
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
