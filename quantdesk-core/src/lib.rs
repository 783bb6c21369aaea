//! QuantDesk Core: market data model, remote providers, Parquet store,
//! incremental sync engine and derived statistics.
//!
//! - Series model keyed by date (and constituent for multi-entity datasets)
//! - Eastmoney kline and fund NAV providers behind a circuit breaker
//! - Atomic Parquet store with a JSON metadata sidecar
//! - Watermark-driven fetch planning and last-write-wins merge
//! - Moving averages, band signals and market breadth

pub mod data;
pub mod stats;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: shared types can cross thread boundaries.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<data::Symbol>();
        require_sync::<data::Symbol>();
        require_send::<data::SeriesTable>();
        require_sync::<data::SeriesTable>();
        require_send::<data::DataError>();
        require_sync::<data::DataError>();
        require_send::<data::ParquetStore>();
        require_sync::<data::ParquetStore>();
        require_send::<data::CircuitBreaker>();
        require_sync::<data::CircuitBreaker>();
        require_send::<data::HttpClient>();
        require_sync::<data::HttpClient>();
        require_send::<data::EastmoneyKlineProvider>();
        require_sync::<data::EastmoneyKlineProvider>();
        require_send::<data::EastmoneyFundNavProvider>();
        require_sync::<data::EastmoneyFundNavProvider>();
        require_send::<stats::DerivedStats>();
        require_sync::<stats::DerivedStats>();
    }
}
