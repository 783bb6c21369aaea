//! Dataset categories and their row schemas.
//!
//! Each category gets its own store container and a schema naming the
//! primary value field plus the fields every row is expected to carry.
//! Fetched rows are validated against it before they reach the merge.

use super::provider::DataError;
use super::series::SeriesRow;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const OPEN: &str = "open";
pub const HIGH: &str = "high";
pub const LOW: &str = "low";
pub const CLOSE: &str = "close";
pub const VOLUME: &str = "volume";
pub const AMOUNT: &str = "amount";
pub const AMPLITUDE: &str = "amplitude";
pub const PCT_CHANGE: &str = "pct_change";
pub const CHANGE: &str = "change";
pub const TURNOVER: &str = "turnover";

pub const NAV: &str = "nav";
pub const ACCUMULATED_NAV: &str = "accumulated_nav";
pub const DAILY_GROWTH: &str = "daily_growth";

const BAR_FIELDS: &[&str] = &[OPEN, HIGH, LOW, CLOSE, VOLUME];
const NAV_FIELDS: &[&str] = &[NAV];

/// Dataset category. Each one is a separate store container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    /// Daily bars for market indices.
    IndexDaily,
    /// Daily bars for every constituent of an index, keyed by (date, constituent).
    IndexConstituents,
    /// Domestic exchange-traded funds.
    Etf,
    /// US-listed ETFs.
    UsEtf,
    /// Open-ended fund net asset values.
    FundNav,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 5] = [
        DatasetKind::IndexDaily,
        DatasetKind::IndexConstituents,
        DatasetKind::Etf,
        DatasetKind::UsEtf,
        DatasetKind::FundNav,
    ];

    /// Container directory name inside the store root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            DatasetKind::IndexDaily => "index_daily",
            DatasetKind::IndexConstituents => "index_constituents",
            DatasetKind::Etf => "etf_daily",
            DatasetKind::UsEtf => "us_etf",
            DatasetKind::FundNav => "fund_nav",
        }
    }

    pub fn schema(&self) -> DatasetSchema {
        match self {
            DatasetKind::IndexDaily | DatasetKind::Etf | DatasetKind::UsEtf => DatasetSchema {
                primary: CLOSE,
                required: BAR_FIELDS,
                multi_entity: false,
            },
            DatasetKind::IndexConstituents => DatasetSchema {
                primary: CLOSE,
                required: BAR_FIELDS,
                multi_entity: true,
            },
            DatasetKind::FundNav => DatasetSchema {
                primary: NAV,
                required: NAV_FIELDS,
                multi_entity: false,
            },
        }
    }

    pub fn is_multi_entity(&self) -> bool {
        self.schema().multi_entity
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Named required fields plus an open bag of extras.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetSchema {
    /// Field a row is unusable without.
    pub primary: &'static str,
    pub required: &'static [&'static str],
    /// Rows carry a constituent id and are keyed by (date, constituent).
    pub multi_entity: bool,
}

impl DatasetSchema {
    /// Validate one fetched row.
    ///
    /// Multi-entity rows missing the primary field pass; the merge drops
    /// them. Missing non-primary required fields are stored as null.
    pub fn validate_row(&self, row: &SeriesRow) -> Result<(), DataError> {
        match (self.multi_entity, row.constituent.as_deref()) {
            (true, None) | (true, Some("")) => {
                return Err(DataError::Validation(format!(
                    "row {} has no constituent id",
                    row.date
                )));
            }
            (false, Some(c)) => {
                return Err(DataError::Validation(format!(
                    "row {} carries constituent '{c}' in a single-entity dataset",
                    row.date
                )));
            }
            _ => {}
        }

        if !self.multi_entity && row.get(self.primary).is_none() {
            return Err(DataError::Validation(format!(
                "row {} is missing '{}'",
                row.date, self.primary
            )));
        }

        Ok(())
    }

    pub fn validate(&self, rows: &[SeriesRow]) -> Result<(), DataError> {
        rows.iter().try_for_each(|row| self.validate_row(row))
    }

    /// Required fields absent from `row`.
    pub fn missing_fields(&self, row: &SeriesRow) -> Vec<&'static str> {
        self.required
            .iter()
            .copied()
            .filter(|f| row.get(f).is_none())
            .collect()
    }
}
