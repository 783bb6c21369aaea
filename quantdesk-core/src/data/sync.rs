//! Incremental fetch-merge engine.
//!
//! `sync` reads the stored table, derives the smallest remote range from its
//! watermark, fetches, merges last-write-wins, and writes the merged table
//! back. The read → fetch → merge → write order is fixed; callers must not
//! run two syncs for the same (dataset, symbol) concurrently.

use super::provider::{DataError, DataProvider};
use super::schema::DatasetKind;
use super::series::{DateRange, Period, SeriesTable, Symbol};
use super::store::SeriesStore;
use chrono::{Days, NaiveDate};
use std::collections::BTreeMap;

/// Remote range needed to bring a table with `watermark` up to `range.end()`.
///
/// `None` means the stored table already covers the request and no remote
/// call should be made.
pub fn plan_fetch(watermark: Option<NaiveDate>, range: DateRange) -> Option<DateRange> {
    match watermark {
        None => Some(range),
        Some(w) if w >= range.end() => None,
        Some(w) => {
            let start = w.checked_add_days(Days::new(1))?;
            DateRange::new(start, range.end()).ok()
        }
    }
}

/// Result of one `sync` call.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    /// Full, up-to-date table for the symbol.
    pub table: SeriesTable,
    /// Range requested from the remote source, `None` if no call was made.
    pub fetched: Option<DateRange>,
    /// Rows returned by the remote source.
    pub fetched_rows: usize,
    /// Multi-entity rows dropped for missing their primary value.
    pub dropped_rows: usize,
}

/// Fetch-merge engine for one dataset category.
pub struct SyncEngine<'a> {
    dataset: DatasetKind,
    provider: &'a dyn DataProvider,
    store: &'a dyn SeriesStore,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        dataset: DatasetKind,
        provider: &'a dyn DataProvider,
        store: &'a dyn SeriesStore,
    ) -> Self {
        Self {
            dataset,
            provider,
            store,
        }
    }

    pub fn dataset(&self) -> DatasetKind {
        self.dataset
    }

    /// Bring `symbol` up to date for `range` and return the full table.
    pub fn sync(
        &self,
        symbol: &Symbol,
        range: DateRange,
        period: Period,
    ) -> Result<SyncOutcome, DataError> {
        let schema = self.dataset.schema();
        let existing = self.store.load(self.dataset, symbol)?;
        let watermark = existing.as_ref().and_then(|t| t.watermark());

        let Some(fetch_range) = plan_fetch(watermark, range) else {
            tracing::info!(%symbol, dataset = %self.dataset, ?watermark, "already up to date");
            return Ok(SyncOutcome {
                table: existing.unwrap_or_else(|| SeriesTable::empty(self.dataset)),
                fetched: None,
                fetched_rows: 0,
                dropped_rows: 0,
            });
        };

        if !self.provider.is_available() {
            return Err(DataError::CircuitBreakerTripped);
        }

        tracing::info!(
            %symbol,
            dataset = %self.dataset,
            range = %fetch_range,
            provider = self.provider.name(),
            "fetching"
        );
        let fetched = self.provider.fetch(symbol, period, fetch_range)?;
        schema.validate(&fetched.rows)?;
        let fetched_rows = fetched.rows.len();

        let mut missing: BTreeMap<&str, usize> = BTreeMap::new();
        for row in &fetched.rows {
            for field in schema.missing_fields(row) {
                *missing.entry(field).or_default() += 1;
            }
        }
        if !missing.is_empty() {
            tracing::warn!(
                %symbol,
                dataset = %self.dataset,
                ?missing,
                "rows missing required fields"
            );
        }

        let mut merged = existing.unwrap_or_else(|| SeriesTable::empty(self.dataset));
        if fetched_rows == 0 {
            tracing::info!(%symbol, dataset = %self.dataset, "no new rows");
            return Ok(SyncOutcome {
                table: merged,
                fetched: Some(fetch_range),
                fetched_rows,
                dropped_rows: 0,
            });
        }

        let added = merged.merge(fetched.rows);
        let dropped_rows = if schema.multi_entity {
            merged.drop_missing_primary()
        } else {
            0
        };

        if merged.is_empty() {
            tracing::info!(%symbol, dataset = %self.dataset, dropped_rows, "no usable rows");
        } else {
            self.store.replace(self.dataset, symbol, &merged)?;
            tracing::info!(
                %symbol,
                dataset = %self.dataset,
                added,
                dropped_rows,
                rows = merged.len(),
                watermark = ?merged.watermark(),
                "persisted"
            );
        }

        Ok(SyncOutcome {
            table: merged,
            fetched: Some(fetch_range),
            fetched_rows,
            dropped_rows,
        })
    }
}
