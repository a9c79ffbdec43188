//! Data fetching, persistence and ingestion

pub mod circuit_breaker;
pub mod eod;
pub mod files;
pub mod ingest;
pub mod provider;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use eod::{EodClient, EodClientConfig};
pub use files::{CandleFiles, CANDLE_COLUMNS};
pub use ingest::{IngestError, Ingestor};
pub use provider::{DataClient, DataError, Format, Payload};
