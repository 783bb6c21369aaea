//! Data provider trait and structured error types.
//!
//! The DataProvider trait abstracts over remote sources (Eastmoney kline,
//! Eastmoney fund NAV, index constituents) so the fetch-merge engine can be
//! driven by a scripted source in tests.

use super::series::{DateRange, Period, SeriesRow, Symbol};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured error types for data operations.
///
/// Displayable in CLI output and in per-symbol batch failure reports.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("request rejected by provider: {0}")]
    Rejected(String),

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("invalid date range: {start} is after {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("parquet I/O error: {0}")]
    Parquet(String),

    #[error("data error: {0}")]
    Other(String),
}

/// Result of a successful remote fetch for a single symbol.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub symbol: Symbol,
    pub rows: Vec<SeriesRow>,
    pub source: DataSource,
}

/// Where the rows came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    EastmoneyKline,
    EastmoneyFund,
    Constituents,
    Scripted,
}

/// Trait for remote time-series sources.
///
/// Implementations only talk to the remote side. The store and the merge
/// live above this trait. An empty `rows` vector is a valid response.
pub trait DataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch rows for `symbol` covering `range` at the given granularity.
    fn fetch(
        &self,
        symbol: &Symbol,
        period: Period,
        range: DateRange,
    ) -> Result<FetchResult, DataError>;

    /// Check if the provider is currently available (not rate-limited, not blocked).
    fn is_available(&self) -> bool;
}

/// Observer for multi-symbol sync operations.
pub trait SyncProgress: Send {
    /// Called when starting to sync a symbol.
    fn on_start(&self, symbol: &Symbol, index: usize, total: usize);

    /// Called when a symbol sync completes.
    fn on_complete(
        &self,
        symbol: &Symbol,
        index: usize,
        total: usize,
        result: &Result<usize, DataError>,
    );

    /// Called when the entire batch is done.
    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize);
}

/// Progress reporter that emits `tracing` events.
pub struct LogProgress;

impl SyncProgress for LogProgress {
    fn on_start(&self, symbol: &Symbol, index: usize, total: usize) {
        tracing::info!(%symbol, "[{}/{}] updating", index + 1, total);
    }

    fn on_complete(
        &self,
        symbol: &Symbol,
        _index: usize,
        _total: usize,
        result: &Result<usize, DataError>,
    ) {
        match result {
            Ok(rows) => tracing::info!(%symbol, rows, "ok"),
            Err(e) => tracing::warn!(%symbol, error = %e, "failed"),
        }
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize) {
        tracing::info!(succeeded, failed, total, "update complete");
    }
}
