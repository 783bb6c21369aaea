//! Blocking HTTP client shared by the remote sources.
//!
//! Every request goes through the same loop:
//! - the circuit breaker is checked before each attempt
//! - 403 trips the breaker and aborts
//! - 429, other error statuses and envelope rejections count as failures
//!   and are retried after an exponential, capped delay
//! - connect/timeout errors are retried, other transport errors are not

use super::circuit_breaker::CircuitBreaker;
use super::provider::DataError;
use reqwest::blocking::Response;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Retry schedule for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): doubles each time,
    /// capped at `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Status block carried inside a 200 response body.
///
/// Eastmoney reports throttled or malformed requests with a non-zero code
/// (`rc` on quote endpoints, `ErrCode` on fund endpoints) and HTTP 200.
pub trait Envelope {
    /// `Some(reason)` when the body reports a rejected request.
    fn rejection(&self) -> Option<String>;
}

/// Decoded body of one attempt.
enum Decoded<T> {
    Accepted(T),
    Rejected(String),
}

fn screen<T: Envelope>(body: T) -> Decoded<T> {
    match body.rejection() {
        Some(reason) => Decoded::Rejected(reason),
        None => Decoded::Accepted(body),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum StatusAction {
    Accept,
    Ban,
    Retry,
}

fn status_action(status: StatusCode) -> StatusAction {
    if status == StatusCode::FORBIDDEN {
        StatusAction::Ban
    } else if status.is_success() {
        StatusAction::Accept
    } else {
        StatusAction::Retry
    }
}

fn status_error(status: StatusCode, retry_after: Option<u64>, url: &str) -> DataError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        DataError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(60),
        }
    } else {
        DataError::Other(format!("HTTP {status} from {url}"))
    }
}

fn retry_after(resp: &Response) -> Option<u64> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl HttpClient {
    pub fn new(circuit_breaker: Arc<CircuitBreaker>) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            circuit_breaker,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retries(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }

    fn ensure_open(&self) -> Result<(), DataError> {
        if self.circuit_breaker.is_allowed() {
            return Ok(());
        }
        tracing::warn!(
            remaining = ?self.circuit_breaker.remaining_cooldown(),
            "circuit breaker open, request refused"
        );
        Err(DataError::CircuitBreakerTripped)
    }

    /// GET `url` and decode the body as JSON, honouring its envelope.
    pub fn get_json<T: DeserializeOwned + Envelope>(
        &self,
        url: &str,
        query: &[(&str, String)],
        referer: Option<&str>,
    ) -> Result<T, DataError> {
        self.request(url, query, referer, |resp| {
            let body: T = resp.json().map_err(|e| {
                DataError::ResponseFormatChanged(format!("failed to decode {url}: {e}"))
            })?;
            Ok(screen(body))
        })
    }

    /// GET `url` and return the body as text (HTML and JS-wrapped payloads).
    pub fn get_text(
        &self,
        url: &str,
        query: &[(&str, String)],
        referer: Option<&str>,
    ) -> Result<String, DataError> {
        self.request(url, query, referer, |resp| {
            resp.text().map(Decoded::Accepted).map_err(|e| {
                DataError::ResponseFormatChanged(format!("failed to read {url}: {e}"))
            })
        })
    }

    fn request<T>(
        &self,
        url: &str,
        query: &[(&str, String)],
        referer: Option<&str>,
        decode: impl Fn(Response) -> Result<Decoded<T>, DataError>,
    ) -> Result<T, DataError> {
        self.ensure_open()?;
        let mut last_error = None;

        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                let delay = self.retry.delay(attempt);
                tracing::debug!(url, attempt, ?delay, "retrying");
                std::thread::sleep(delay);
                self.ensure_open()?;
            }

            let mut request = self.client.get(url).query(query);
            if let Some(referer) = referer {
                request = request.header(reqwest::header::REFERER, referer);
            }

            let resp = match request.send() {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    last_error = Some(DataError::NetworkUnreachable(e.to_string()));
                    continue;
                }
                Err(e) => return Err(DataError::NetworkUnreachable(e.to_string())),
            };

            let status = resp.status();
            match status_action(status) {
                StatusAction::Ban => {
                    self.circuit_breaker.trip();
                    return Err(DataError::CircuitBreakerTripped);
                }
                StatusAction::Retry => {
                    self.circuit_breaker.record_failure();
                    last_error = Some(status_error(status, retry_after(&resp), url));
                    continue;
                }
                StatusAction::Accept => {}
            }

            match decode(resp)? {
                Decoded::Accepted(body) => {
                    self.circuit_breaker.record_success();
                    return Ok(body);
                }
                Decoded::Rejected(reason) => {
                    tracing::debug!(url, attempt, %reason, "request rejected");
                    self.circuit_breaker.record_failure();
                    last_error = Some(DataError::Rejected(reason));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| DataError::Other("max retries exceeded".into())))
    }
}

/// Parse a provider numeric cell. Blank and `-` cells are null.
pub(crate) fn parse_number(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    if cell.is_empty() || cell == "-" || cell == "--" {
        return None;
    }
    cell.parse::<f64>().ok().filter(|v| v.is_finite())
}
