//! Data client trait, payload normalization and structured error types.
//!
//! The DataClient trait abstracts over candle sources (the EOD HTTP API, test
//! doubles) so the collector never sees the transport.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::{CandleRecord, Granularity, Instrument};

/// Structured error types for data operations.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("hard stop: provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("payload decode error: {0}")]
    Decode(String),

    #[error("payload schema error: {0}")]
    Schema(String),

    #[error("parquet I/O error: {0}")]
    Parquet(String),

    #[error("file error: {0}")]
    File(String),

    #[error("data error: {0}")]
    Other(String),
}

/// Response format requested from the provider (`fmt` query parameter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Json,
    Csv,
}

impl Format {
    pub fn as_str(self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Csv => "csv",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Format::Json),
            "csv" => Ok(Format::Csv),
            other => Err(DataError::Other(format!("unknown format '{other}'"))),
        }
    }
}

/// Raw provider payload, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Already-decoded JSON: an array of records, a single record, or a JSON string.
    Json(Value),
    /// Undecoded body text (CSV, or JSON delivered as text).
    Text(String),
}

impl Payload {
    /// Empty means nothing to persist: `null`, `[]`, `{}`, or blank text.
    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Json(Value::Null) => true,
            Payload::Json(Value::Array(items)) => items.is_empty(),
            Payload::Json(Value::Object(map)) => map.is_empty(),
            Payload::Json(Value::String(s)) => s.trim().is_empty(),
            Payload::Json(_) => false,
            Payload::Text(s) => s.trim().is_empty(),
        }
    }

    /// Normalize into a record sequence.
    ///
    /// A single record becomes a one-element sequence; textual payloads are
    /// parsed first (JSON for [`Format::Json`], headed CSV for [`Format::Csv`]).
    pub fn into_records(self, format: Format) -> Result<Vec<CandleRecord>, DataError> {
        let value = match self {
            Payload::Json(Value::String(text)) | Payload::Text(text) => match format {
                Format::Json => serde_json::from_str::<Value>(&text)
                    .map_err(|e| DataError::Decode(format!("invalid JSON text: {e}")))?,
                Format::Csv => return parse_csv(&text),
            },
            Payload::Json(value) => value,
        };

        let items = match value {
            Value::Array(items) => items,
            obj @ Value::Object(_) => vec![obj],
            Value::Null => Vec::new(),
            other => {
                return Err(DataError::Schema(format!(
                    "expected a record or a list of records, got {}",
                    json_kind(&other)
                )))
            }
        };

        items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                serde_json::from_value::<CandleRecord>(item)
                    .map(CandleRecord::normalized)
                    .map_err(|e| DataError::Schema(format!("record {i}: {e}")))
            })
            .collect()
    }
}

fn parse_csv(text: &str) -> Result<Vec<CandleRecord>, DataError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    reader
        .deserialize::<CandleRecord>()
        .enumerate()
        .map(|(i, row)| {
            row.map(CandleRecord::normalized)
                .map_err(|e| DataError::Decode(format!("CSV row {i}: {e}")))
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Trait for candle sources.
///
/// Implementations own their transport; callers only see payloads and
/// [`DataError`]s. The instrument's exchange code is passed to the provider as
/// the asset class.
#[async_trait]
pub trait DataClient: Send + Sync {
    /// Human-readable name of this client.
    fn name(&self) -> &str;

    /// Fetch candles for one instrument at one granularity.
    async fn fetch(
        &self,
        instrument: &Instrument,
        granularity: &Granularity,
        format: Format,
    ) -> Result<Payload, DataError>;

    /// Whether the client currently accepts requests (not rate-limited, not blocked).
    fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_payloads() {
        assert!(Payload::Json(Value::Null).is_empty());
        assert!(Payload::Json(json!([])).is_empty());
        assert!(Payload::Json(json!({})).is_empty());
        assert!(Payload::Json(json!("  ")).is_empty());
        assert!(Payload::Text(String::new()).is_empty());
        assert!(!Payload::Json(json!([{"close": 1.0}])).is_empty());
        assert!(!Payload::Json(json!(0)).is_empty());
    }

    #[test]
    fn single_record_becomes_one_element_sequence() {
        let payload = Payload::Json(json!({"date": "2024-01-02", "close": 10.0}));
        let records = payload.into_records(Format::Json).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].close, Some(10.0));
    }

    #[test]
    fn textual_json_is_parsed_first() {
        let text = r#"[{"date":"2024-01-02","close":10.0},{"date":"2024-01-03","close":11.0}]"#;
        let records = Payload::Text(text.into()).into_records(Format::Json).unwrap();
        assert_eq!(records.len(), 2);

        let wrapped = Payload::Json(Value::String(r#"{"close": 3.5}"#.into()));
        let records = wrapped.into_records(Format::Json).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].close, Some(3.5));
    }

    #[test]
    fn csv_text_is_parsed_with_headers() {
        let text = "Date,Open,High,Low,Close,Adjusted_close,Volume\n\
                    2024-01-02,1.0,2.0,0.5,1.5,1.5,100\n\
                    2024-01-03,1.5,2.5,1.0,,2.0,0\n";
        let records = Payload::Text(text.into()).into_records(Format::Csv).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].close, Some(1.5));
        assert_eq!(records[1].close, None);
        assert!(records[1].datetime.is_some());
    }

    #[test]
    fn malformed_text_is_decode_error() {
        let err = Payload::Text("{not json".into()).into_records(Format::Json).unwrap_err();
        assert!(matches!(err, DataError::Decode(_)));
    }

    #[test]
    fn scalar_payload_is_schema_error() {
        let err = Payload::Json(json!(42)).into_records(Format::Json).unwrap_err();
        assert!(matches!(err, DataError::Schema(_)));

        let err = Payload::Json(json!([1, 2])).into_records(Format::Json).unwrap_err();
        assert!(matches!(err, DataError::Schema(_)));
    }

    #[test]
    fn format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<Format>().unwrap(), Format::Json);
        assert_eq!("csv".parse::<Format>().unwrap(), Format::Csv);
        assert!("xml".parse::<Format>().is_err());
    }
}
