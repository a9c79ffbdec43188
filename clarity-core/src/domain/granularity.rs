//! Granularity tokens and the fetch mode they select.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::DomainError;

/// Provider endpoint family a granularity routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Daily/weekly/monthly candles, queried with `period`.
    EndOfDay,
    /// Sub-daily candles, queried with `interval`.
    Intraday,
}

impl FetchMode {
    /// URL path segment: `eod` or `intraday`.
    pub fn path_segment(self) -> &'static str {
        match self {
            FetchMode::EndOfDay => "eod",
            FetchMode::Intraday => "intraday",
        }
    }

    /// Name of the query parameter carrying the granularity token.
    pub fn query_param(self) -> &'static str {
        match self {
            FetchMode::EndOfDay => "period",
            FetchMode::Intraday => "interval",
        }
    }
}

/// Period token such as `d`, `w`, `m`, `1m`, `5m`, `1h`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Granularity(String);

impl Granularity {
    pub fn new(token: impl Into<String>) -> Result<Self, DomainError> {
        let token = token.into();
        if token.is_empty() || !token.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DomainError::InvalidGranularity(token));
        }
        Ok(Self(token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `d`/`w`/`m` are end-of-day; everything else is intraday.
    pub fn mode(&self) -> FetchMode {
        match self.0.as_str() {
            "d" | "w" | "m" => FetchMode::EndOfDay,
            _ => FetchMode::Intraday,
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Granularity {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Granularity {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Granularity> for String {
    fn from(g: Granularity) -> Self {
        g.0
    }
}
