use serde::{Deserialize, Serialize};
use std::fmt;

use super::{is_identifier, DomainError};

/// A ticker on a market. The exchange code doubles as the asset class the
/// provider expects (e.g. `FOREX`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Instrument {
    ticker: String,
    exchange: String,
}

impl Instrument {
    pub fn new(
        ticker: impl Into<String>,
        exchange: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let ticker = ticker.into();
        let exchange = exchange.into();
        if !is_identifier(&ticker) {
            return Err(DomainError::InvalidTicker(ticker));
        }
        if exchange.is_empty() || !exchange.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DomainError::InvalidExchange(exchange));
        }
        Ok(Self { ticker, exchange })
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.ticker, self.exchange)
    }
}
