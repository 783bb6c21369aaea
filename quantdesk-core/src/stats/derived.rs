//! Display-only derived columns for a single-entity table.
//!
//! Percent change, moving averages over the configured windows, a rolling
//! standard deviation, and a band around the band-window mean that
//! classifies each close as breaking out above, below, or range-bound.

use super::rolling::{pct_change, rolling_mean, rolling_std};
use crate::data::provider::DataError;
use crate::data::series::SeriesTable;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Window sizes and band parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Moving-average windows, in observations.
    pub windows: Vec<usize>,
    /// Window for the band mean and standard deviation.
    pub band_window: usize,
    /// Band half-width in standard deviations.
    pub band_multiplier: f64,
    /// Moving-average windows used for market breadth.
    pub breadth_windows: Vec<usize>,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            windows: vec![20, 30, 50, 200],
            band_window: 20,
            band_multiplier: 1.3,
            breadth_windows: vec![20, 50, 200],
        }
    }
}

/// Where a close sits relative to its band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BandSignal {
    BreakoutAbove,
    BreakoutBelow,
    RangeBound,
}

impl BandSignal {
    /// NaN bounds never trigger a breakout.
    pub fn classify(close: f64, lower: f64, upper: f64) -> Self {
        if close > upper {
            BandSignal::BreakoutAbove
        } else if close < lower {
            BandSignal::BreakoutBelow
        } else {
            BandSignal::RangeBound
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BandSignal::BreakoutAbove => "breakout-above",
            BandSignal::BreakoutBelow => "breakout-below",
            BandSignal::RangeBound => "range-bound",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedRow {
    pub date: NaiveDate,
    pub close: f64,
    pub pct_change: f64,
    /// Moving average keyed by window size.
    pub moving_averages: BTreeMap<usize, f64>,
    pub std_dev: f64,
    pub lower: f64,
    pub upper: f64,
    pub signal: BandSignal,
}

impl DerivedRow {
    pub fn moving_average(&self, window: usize) -> Option<f64> {
        self.moving_averages.get(&window).copied()
    }
}

/// Derived statistics for every row of a table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedStats {
    rows: Vec<DerivedRow>,
}

impl DerivedStats {
    /// Compute over `field` (the close or NAV) of a single-entity table.
    pub fn compute_field(
        table: &SeriesTable,
        field: &str,
        config: &StatsConfig,
    ) -> Result<Self, DataError> {
        if table.dataset().is_multi_entity() {
            return Err(DataError::Validation(format!(
                "derived statistics need a single-entity table, got {}",
                table.dataset()
            )));
        }

        let dates = table.dates();
        let closes = table.column(field);
        let changes = pct_change(&closes);
        let averages: Vec<(usize, Vec<f64>)> = config
            .windows
            .iter()
            .map(|&w| (w, rolling_mean(&closes, w)))
            .collect();
        let band_mean = rolling_mean(&closes, config.band_window);
        let band_std = rolling_std(&closes, config.band_window);

        let rows = dates
            .iter()
            .enumerate()
            .map(|(i, &date)| {
                let lower = band_mean[i] - config.band_multiplier * band_std[i];
                let upper = band_mean[i] + config.band_multiplier * band_std[i];
                DerivedRow {
                    date,
                    close: closes[i],
                    pct_change: changes[i],
                    moving_averages: averages.iter().map(|(w, v)| (*w, v[i])).collect(),
                    std_dev: band_std[i],
                    lower,
                    upper,
                    signal: BandSignal::classify(closes[i], lower, upper),
                }
            })
            .collect();

        Ok(Self { rows })
    }

    /// Compute over the dataset's primary field.
    pub fn compute(table: &SeriesTable, config: &StatsConfig) -> Result<Self, DataError> {
        Self::compute_field(table, table.dataset().schema().primary, config)
    }

    pub fn rows(&self) -> &[DerivedRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn latest(&self) -> Option<&DerivedRow> {
        self.rows.last()
    }

    /// Row `back` positions before the latest (0 = latest).
    pub fn back(&self, back: usize) -> Option<&DerivedRow> {
        self.rows.len().checked_sub(back + 1).map(|i| &self.rows[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::schema::{DatasetKind, CLOSE};
    use crate::data::series::SeriesRow;

    fn table(closes: &[f64]) -> SeriesTable {
        let base = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        SeriesTable::from_rows(
            DatasetKind::IndexDaily,
            closes.iter().enumerate().map(|(i, &c)| {
                SeriesRow::new(base + chrono::Duration::days(i as i64)).with_value(CLOSE, c)
            }),
        )
    }

    fn small_config() -> StatsConfig {
        StatsConfig {
            windows: vec![3],
            band_window: 3,
            band_multiplier: 1.0,
            breadth_windows: vec![3],
        }
    }

    #[test]
    fn classify_thresholds() {
        assert_eq!(BandSignal::classify(11.0, 9.0, 10.0), BandSignal::BreakoutAbove);
        assert_eq!(BandSignal::classify(8.0, 9.0, 10.0), BandSignal::BreakoutBelow);
        assert_eq!(BandSignal::classify(10.0, 9.0, 10.0), BandSignal::RangeBound);
        assert_eq!(
            BandSignal::classify(8.0, f64::NAN, f64::NAN),
            BandSignal::RangeBound
        );
    }

    #[test]
    fn breakout_above_after_jump() {
        let stats = DerivedStats::compute(&table(&[10.0, 10.0, 10.0, 10.0, 20.0]), &small_config())
            .unwrap();
        let latest = stats.latest().unwrap();
        // window [10, 10, 20]: mean 13.33, sample std 5.77 → upper 19.1
        assert_eq!(latest.signal, BandSignal::BreakoutAbove);
        assert_eq!(stats.back(1).unwrap().signal, BandSignal::RangeBound);
        assert!((latest.pct_change - 100.0).abs() < 1e-12);
    }

    #[test]
    fn unfilled_band_is_range_bound() {
        let stats = DerivedStats::compute(&table(&[10.0, 50.0]), &small_config()).unwrap();
        assert!(stats.latest().unwrap().upper.is_nan());
        assert_eq!(stats.latest().unwrap().signal, BandSignal::RangeBound);
    }

    #[test]
    fn moving_averages_keyed_by_window() {
        let stats = DerivedStats::compute(&table(&[1.0, 2.0, 3.0, 4.0]), &small_config()).unwrap();
        assert_eq!(stats.latest().unwrap().moving_average(3), Some(3.0));
        assert_eq!(stats.latest().unwrap().moving_average(20), None);
    }

    #[test]
    fn rejects_constituent_tables() {
        let t = SeriesTable::empty(DatasetKind::IndexConstituents);
        assert!(DerivedStats::compute(&t, &StatsConfig::default()).is_err());
    }

    #[test]
    fn back_out_of_range() {
        let stats = DerivedStats::compute(&table(&[1.0, 2.0]), &small_config()).unwrap();
        assert_eq!(stats.back(1).unwrap().close, 1.0);
        assert!(stats.back(2).is_none());
    }
}
