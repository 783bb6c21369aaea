//! Batch updater: runs `sync` over a symbol list with progress reporting.
//!
//! Symbols are independent: a failure is recorded and the batch moves on.
//! Nothing is retried within a run.

use super::provider::{DataError, SyncProgress};
use super::schema::DatasetKind;
use super::series::{DateRange, Period, Symbol};
use super::sync::SyncEngine;

/// Sync every symbol in order for the shared `range`.
pub fn update_all(
    engine: &SyncEngine<'_>,
    symbols: &[Symbol],
    range: DateRange,
    period: Period,
    progress: &dyn SyncProgress,
) -> UpdateSummary {
    let total = symbols.len();
    let mut succeeded = 0;
    let mut failed = 0;
    let mut errors: Vec<(Symbol, DataError)> = Vec::new();

    for (i, symbol) in symbols.iter().enumerate() {
        progress.on_start(symbol, i, total);

        let result = engine
            .sync(symbol, range, period)
            .map(|outcome| outcome.table.len());
        progress.on_complete(symbol, i, total, &result);

        match result {
            Ok(_) => succeeded += 1,
            Err(e) => {
                errors.push((symbol.clone(), e));
                failed += 1;
            }
        }
    }

    progress.on_batch_complete(succeeded, failed, total);

    UpdateSummary {
        dataset: engine.dataset(),
        total,
        succeeded,
        failed,
        errors,
    }
}

/// Summary of a batch update.
#[derive(Debug)]
pub struct UpdateSummary {
    pub dataset: DatasetKind,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<(Symbol, DataError)>,
}

impl UpdateSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}
