//! Clarity Runner: configuration, logging, scheduling, and collection.
//!
//! This crate builds on `clarity-core` to provide:
//! - Typed TOML + environment configuration with eager validation
//! - `tracing` subscriber setup (pretty/compact/json, optional log file)
//! - A drift-correcting interval scheduler with cooperative or dedicated-thread execution
//! - The collector job: bounded-concurrency fetch and persist over every collection task

pub mod collector;
pub mod config;
pub mod logging;
pub mod scheduler;

pub use collector::{Collector, TickSummary};
pub use config::{AppConfig, ConfigError, LogFormat};
pub use logging::init_logging;
pub use scheduler::{ExecutionStrategy, Job, Scheduler, SchedulerError, StopOutcome};
