//! Shared fixtures: a scripted remote source and an in-memory store.

#![allow(dead_code)]

use chrono::NaiveDate;
use quantdesk_core::data::schema::CLOSE;
use quantdesk_core::data::{
    DataError, DataProvider, DataSource, DatasetKind, DateRange, FetchResult, Period, SeriesRow,
    SeriesStore, SeriesTable, Symbol,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

pub fn sym(code: &str) -> Symbol {
    Symbol::new(code).unwrap()
}

pub fn range(start: NaiveDate, end: NaiveDate) -> DateRange {
    DateRange::new(start, end).unwrap()
}

pub fn bar(date: NaiveDate, close: f64) -> SeriesRow {
    SeriesRow::new(date)
        .with_value("open", close)
        .with_value("high", close)
        .with_value("low", close)
        .with_value(CLOSE, close)
        .with_value("volume", 1000.0)
}

/// Consecutive daily bars starting at `start`.
pub fn bars(start: NaiveDate, closes: &[f64]) -> Vec<SeriesRow> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| bar(start + chrono::Duration::days(i as i64), c))
        .collect()
}

/// Remote source backed by a fixed per-symbol series.
///
/// Returns the rows inside the requested range. `overlap` rows are appended
/// to every response regardless of range, to simulate backfilled revisions.
#[derive(Default)]
pub struct ScriptedProvider {
    series: Mutex<HashMap<Symbol, Vec<SeriesRow>>>,
    overlap: Mutex<HashMap<Symbol, Vec<SeriesRow>>>,
    failing: Mutex<HashSet<Symbol>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<(Symbol, DateRange)>>,
    blocked: AtomicBool,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(self, symbol: &str, rows: Vec<SeriesRow>) -> Self {
        self.set_series(symbol, rows);
        self
    }

    pub fn set_series(&self, symbol: &str, rows: Vec<SeriesRow>) {
        self.series.lock().unwrap().insert(sym(symbol), rows);
    }

    pub fn push_rows(&self, symbol: &str, rows: Vec<SeriesRow>) {
        self.series
            .lock()
            .unwrap()
            .entry(sym(symbol))
            .or_default()
            .extend(rows);
    }

    pub fn set_overlap(&self, symbol: &str, rows: Vec<SeriesRow>) {
        self.overlap.lock().unwrap().insert(sym(symbol), rows);
    }

    pub fn fail(&self, symbol: &str) {
        self.failing.lock().unwrap().insert(sym(symbol));
    }

    /// Report the source as unavailable, as a tripped breaker would.
    pub fn block(&self, blocked: bool) {
        self.blocked.store(blocked, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(Symbol, DateRange)> {
        self.requests.lock().unwrap().clone()
    }
}

impl DataProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn fetch(
        &self,
        symbol: &Symbol,
        _period: Period,
        range: DateRange,
    ) -> Result<FetchResult, DataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push((symbol.clone(), range));

        if self.failing.lock().unwrap().contains(symbol) {
            return Err(DataError::NetworkUnreachable(format!("scripted failure for {symbol}")));
        }

        let mut rows: Vec<SeriesRow> = self
            .series
            .lock()
            .unwrap()
            .get(symbol)
            .map(|rows| {
                rows.iter()
                    .filter(|r| range.contains(r.date))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if let Some(extra) = self.overlap.lock().unwrap().get(symbol) {
            rows.extend(extra.iter().cloned());
        }

        Ok(FetchResult {
            symbol: symbol.clone(),
            rows,
            source: DataSource::Scripted,
        })
    }

    fn is_available(&self) -> bool {
        !self.blocked.load(Ordering::SeqCst)
    }
}

/// Store that keeps tables in memory and counts writes.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<BTreeMap<(DatasetKind, Symbol), SeriesTable>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn insert(&self, table: SeriesTable, symbol: &str) {
        self.tables
            .lock()
            .unwrap()
            .insert((table.dataset(), sym(symbol)), table);
    }
}

impl SeriesStore for MemoryStore {
    fn load(
        &self,
        dataset: DatasetKind,
        symbol: &Symbol,
    ) -> Result<Option<SeriesTable>, DataError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(&(dataset, symbol.clone()))
            .cloned())
    }

    fn replace(
        &self,
        dataset: DatasetKind,
        symbol: &Symbol,
        table: &SeriesTable,
    ) -> Result<(), DataError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.tables
            .lock()
            .unwrap()
            .insert((dataset, symbol.clone()), table.clone());
        Ok(())
    }
}
