//! EOD HTTP data client.
//!
//! `GET {base_url}/{eod|intraday}/{ticker}.{exchange}` with the granularity in
//! `period` (end-of-day) or `interval` (intraday), plus `fmt` and `api_token`.
//! Handles retries with exponential backoff and the circuit breaker.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::circuit_breaker::CircuitBreaker;
use super::provider::{DataClient, DataError, Format, Payload};
use crate::domain::{Granularity, Instrument};

/// Connection settings for [`EodClient`].
#[derive(Clone)]
pub struct EodClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl fmt::Debug for EodClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EodClientConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .finish()
    }
}

/// HTTP client for the EOD candle API.
pub struct EodClient {
    client: reqwest::Client,
    config: EodClientConfig,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl EodClient {
    pub fn new(
        config: EodClientConfig,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, DataError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            circuit_breaker,
        })
    }

    /// Endpoint URL for an instrument at a granularity (no query string).
    pub fn candles_url(&self, instrument: &Instrument, granularity: &Granularity) -> String {
        format!(
            "{}/{}/{}.{}",
            self.config.base_url.trim_end_matches('/'),
            granularity.mode().path_segment(),
            instrument.ticker(),
            instrument.exchange()
        )
    }

    async fn read_payload(
        &self,
        resp: reqwest::Response,
        format: Format,
        url: &str,
    ) -> Result<Payload, DataError> {
        match format {
            Format::Json => resp
                .json::<Value>()
                .await
                .map(Payload::Json)
                .map_err(|e| DataError::Decode(format!("{url}: {}", e.without_url()))),
            Format::Csv => resp
                .text()
                .await
                .map(Payload::Text)
                .map_err(|e| DataError::NetworkUnreachable(e.without_url().to_string())),
        }
    }

    /// One logical fetch: retries 429/5xx/connect failures with backoff.
    ///
    /// Only provider-wide signals feed the shared breaker: 429 and connect
    /// failures count toward the threshold and 401 trips it. 403 and 5xx
    /// belong to the requested symbol and never block other tasks.
    async fn fetch_with_retry(
        &self,
        instrument: &Instrument,
        granularity: &Granularity,
        format: Format,
    ) -> Result<Payload, DataError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(DataError::CircuitBreakerTripped);
        }

        let url = self.candles_url(instrument, granularity);
        let params = [
            (granularity.mode().query_param(), granularity.as_str()),
            ("fmt", format.as_str()),
            ("api_token", self.config.api_key.as_str()),
        ];
        let mut last_error = None;
        let mut retry_after = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = retry_delay(self.config.base_delay, attempt, retry_after.take());
                tracing::debug!(%instrument, %granularity, attempt, ?delay, "retrying fetch");
                tokio::time::sleep(delay).await;
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(DataError::CircuitBreakerTripped);
            }

            let resp = match self.client.get(&url).query(&params).send().await {
                Ok(resp) => resp,
                Err(e) if e.is_connect() => {
                    self.circuit_breaker.record_failure();
                    last_error = Some(DataError::NetworkUnreachable(e.without_url().to_string()));
                    continue;
                }
                Err(e) if e.is_timeout() => {
                    last_error = Some(DataError::NetworkUnreachable(e.without_url().to_string()));
                    continue;
                }
                Err(e) => return Err(DataError::NetworkUnreachable(e.without_url().to_string())),
            };

            let status = resp.status();

            if status == StatusCode::UNAUTHORIZED {
                self.circuit_breaker.trip();
                return Err(DataError::Status {
                    status: status.as_u16(),
                    url,
                });
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                self.circuit_breaker.record_failure();
                let secs = resp
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                retry_after = Some(Duration::from_secs(secs));
                last_error = Some(DataError::RateLimited {
                    retry_after_secs: secs,
                });
                continue;
            }

            if status.is_server_error() {
                last_error = Some(DataError::Status {
                    status: status.as_u16(),
                    url: url.clone(),
                });
                continue;
            }

            if !status.is_success() {
                return Err(DataError::Status {
                    status: status.as_u16(),
                    url,
                });
            }

            let payload = self.read_payload(resp, format, &url).await?;
            self.circuit_breaker.record_success();
            return Ok(payload);
        }

        Err(last_error.unwrap_or_else(|| DataError::Other("max retries exceeded".into())))
    }
}

/// Longest wait honoured from a `Retry-After` header.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Exponential backoff for `attempt` (1-based), stretched to the provider's
/// `Retry-After` when one was sent, capped at [`MAX_RETRY_AFTER`].
fn retry_delay(base: Duration, attempt: u32, retry_after: Option<Duration>) -> Duration {
    let backoff = base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
    match retry_after {
        Some(wait) => backoff.max(wait.min(MAX_RETRY_AFTER)),
        None => backoff,
    }
}

#[async_trait]
impl DataClient for EodClient {
    fn name(&self) -> &str {
        "eod"
    }

    async fn fetch(
        &self,
        instrument: &Instrument,
        granularity: &Granularity,
        format: Format,
    ) -> Result<Payload, DataError> {
        self.fetch_with_retry(instrument, granularity, format).await
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> EodClient {
        let config = EodClientConfig {
            base_url: base_url.into(),
            api_key: "secret".into(),
            timeout: Duration::from_secs(5),
            max_retries: 0,
            base_delay: Duration::from_millis(1),
        };
        EodClient::new(config, Arc::new(CircuitBreaker::default_provider())).unwrap()
    }

    #[test]
    fn url_uses_mode_and_dotted_symbol() {
        let c = client("https://eodhd.example/api/");
        let inst = Instrument::new("USDJPY", "FOREX").unwrap();

        let eod = c.candles_url(&inst, &Granularity::new("d").unwrap());
        assert_eq!(eod, "https://eodhd.example/api/eod/USDJPY.FOREX");

        let intraday = c.candles_url(&inst, &Granularity::new("5m").unwrap());
        assert_eq!(intraday, "https://eodhd.example/api/intraday/USDJPY.FOREX");
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_millis(500);
        assert_eq!(retry_delay(base, 1, None), Duration::from_millis(500));
        assert_eq!(retry_delay(base, 2, None), Duration::from_secs(1));
        assert_eq!(retry_delay(base, 3, None), Duration::from_secs(2));
    }

    #[test]
    fn retry_after_stretches_backoff_up_to_cap() {
        let base = Duration::from_millis(500);
        assert_eq!(retry_delay(base, 1, Some(Duration::from_secs(7))), Duration::from_secs(7));
        assert_eq!(retry_delay(base, 1, Some(Duration::from_secs(3600))), MAX_RETRY_AFTER);
        assert_eq!(retry_delay(base, 2, Some(Duration::ZERO)), Duration::from_secs(1));
    }

    #[test]
    fn debug_redacts_api_key() {
        let c = client("https://eodhd.example/api");
        let shown = format!("{:?}", c.config);
        assert!(!shown.contains("secret"));
        assert!(shown.contains("<redacted>"));
    }
}
