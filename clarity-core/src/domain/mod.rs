//! Domain types for Clarity

pub mod candle;
pub mod granularity;
pub mod instrument;
pub mod task;

pub use candle::CandleRecord;
pub use granularity::{FetchMode, Granularity};
pub use instrument::Instrument;
pub use task::{cross_product, CollectionTask};

use thiserror::Error;

/// Validation failures for configured identifiers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("ticker '{0}' must be non-empty ASCII alphanumerics or '_'")]
    InvalidTicker(String),

    #[error("exchange code '{0}' must be non-empty ASCII alphanumerics")]
    InvalidExchange(String),

    #[error("granularity '{0}' must be non-empty ASCII alphanumerics")]
    InvalidGranularity(String),
}

/// True for strings usable verbatim in file and table names.
pub(crate) fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
