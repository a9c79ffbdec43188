//! Clarity Core: candle data model, provider client, persistence, store, indicators.
//!
//! This crate contains everything below the scheduling layer:
//! - Domain types (instruments, granularities, collection tasks, candle records)
//! - The `DataClient` trait and its EOD HTTP implementation with a circuit breaker
//! - Parquet candle files with atomic overwrite
//! - An embedded store of Parquet-backed tables with create-if-absent ingestion
//! - The Williams Fractal indicator

pub mod data;
pub mod domain;
pub mod indicators;
pub mod store;

pub use store::{Store, StoreError, TableCreation, TableMeta};
