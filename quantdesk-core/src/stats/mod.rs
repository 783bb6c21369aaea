//! Derived statistics computed from stored tables.
//!
//! Nothing here is persisted; everything is recomputed from the table on
//! demand and is deterministic for a given table and configuration.

pub mod breadth;
pub mod derived;
pub mod rolling;

pub use breadth::{market_breadth, BreadthRow};
pub use derived::{BandSignal, DerivedRow, DerivedStats, StatsConfig};
pub use rolling::{pct_change, rolling_mean, rolling_std, trailing_sum};
