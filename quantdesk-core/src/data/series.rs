//! Series data model: symbols, date ranges, rows and per-symbol tables.
//!
//! A `SeriesTable` is keyed by `(date, constituent)` and iterates in date
//! order. Its maximum date is the watermark that drives incremental fetches.

use super::provider::DataError;
use super::schema::DatasetKind;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Exchange-qualified instrument identifier (e.g. `000300`, `107.SPY`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    pub fn new(code: impl Into<String>) -> Result<Self, DataError> {
        let code = code.into();
        let trimmed = code.trim();
        if trimmed.is_empty() {
            return Err(DataError::Validation("symbol must not be empty".into()));
        }
        if let Some(bad) = trimmed
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(DataError::Validation(format!(
                "symbol '{trimmed}' contains unsupported character '{bad}'"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key used to name the symbol's table inside a store container.
    ///
    /// One-to-one: `.` becomes `_`, a literal `_` becomes `-u` and `-`
    /// becomes `-d`. `107.SPY` maps to `sym_107_SPY`, `107_SPY` to
    /// `sym_107-uSPY`.
    pub fn storage_key(&self) -> String {
        let mut key = String::with_capacity(self.0.len() + 4);
        key.push_str("sym_");
        for c in self.0.chars() {
            match c {
                '.' => key.push('_'),
                '_' => key.push_str("-u"),
                '-' => key.push_str("-d"),
                c => key.push(c),
            }
        }
        key
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Symbol {
    type Error = DataError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Symbol::new(value)
    }
}

impl From<Symbol> for String {
    fn from(value: Symbol) -> Self {
        value.0
    }
}

/// Inclusive calendar date range. Always `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, DataError> {
        if start > end {
            return Err(DataError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Bar granularity requested from the remote source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

/// Natural key of a row: observation date, then constituent for
/// multi-entity datasets.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowKey {
    pub date: NaiveDate,
    pub constituent: Option<String>,
}

/// One dated observation. Fields absent from `values` are null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRow {
    pub date: NaiveDate,
    pub constituent: Option<String>,
    pub values: BTreeMap<String, f64>,
}

impl SeriesRow {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            constituent: None,
            values: BTreeMap::new(),
        }
    }

    pub fn with_constituent(mut self, constituent: impl Into<String>) -> Self {
        self.constituent = Some(constituent.into());
        self
    }

    /// Set a field; non-finite values are treated as null and not stored.
    pub fn with_value(mut self, field: &str, value: f64) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: &str, value: f64) {
        if value.is_finite() {
            self.values.insert(field.to_string(), value);
        } else {
            self.values.remove(field);
        }
    }

    pub fn get(&self, field: &str) -> Option<f64> {
        self.values.get(field).copied()
    }

    pub fn key(&self) -> RowKey {
        RowKey {
            date: self.date,
            constituent: self.constituent.clone(),
        }
    }
}

/// Ordered, uniquely keyed rows for one symbol of one dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesTable {
    dataset: DatasetKind,
    rows: BTreeMap<RowKey, SeriesRow>,
}

impl SeriesTable {
    pub fn empty(dataset: DatasetKind) -> Self {
        Self {
            dataset,
            rows: BTreeMap::new(),
        }
    }

    /// Build a table from rows; later rows win on key collision.
    pub fn from_rows(dataset: DatasetKind, rows: impl IntoIterator<Item = SeriesRow>) -> Self {
        let mut table = Self::empty(dataset);
        table.merge(rows);
        table
    }

    pub fn dataset(&self) -> DatasetKind {
        self.dataset
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Most recent date present, if any.
    pub fn watermark(&self) -> Option<NaiveDate> {
        // Keys sort by date first, so the last key carries the max date.
        self.rows.keys().next_back().map(|k| k.date)
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.rows.keys().next().map(|k| k.date)
    }

    /// Rows in `(date, constituent)` order.
    pub fn rows(&self) -> impl DoubleEndedIterator<Item = &SeriesRow> + ExactSizeIterator {
        self.rows.values()
    }

    pub fn get(&self, key: &RowKey) -> Option<&SeriesRow> {
        self.rows.get(key)
    }

    /// Union `fetched` into the table. On key collision the fetched row
    /// replaces the stored one wholesale. Returns how many keys were new.
    pub fn merge(&mut self, fetched: impl IntoIterator<Item = SeriesRow>) -> usize {
        let mut added = 0;
        for row in fetched {
            if self.rows.insert(row.key(), row).is_none() {
                added += 1;
            }
        }
        added
    }

    /// Remove rows that lack `field`. Returns the number removed.
    pub fn drop_missing(&mut self, field: &str) -> usize {
        let before = self.rows.len();
        self.rows.retain(|_, row| row.values.contains_key(field));
        before - self.rows.len()
    }

    /// Drop rows missing the dataset's primary value field.
    pub fn drop_missing_primary(&mut self) -> usize {
        let primary = self.dataset.schema().primary;
        self.drop_missing(primary)
    }

    /// Values of `field` in row order, NaN where null.
    pub fn column(&self, field: &str) -> Vec<f64> {
        self.rows
            .values()
            .map(|r| r.get(field).unwrap_or(f64::NAN))
            .collect()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.rows.keys().map(|k| k.date).collect()
    }

    /// Distinct constituent ids, sorted.
    pub fn constituents(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .rows
            .keys()
            .filter_map(|k| k.constituent.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Union of value field names across all rows, sorted.
    pub fn field_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .rows
            .values()
            .flat_map(|r| r.values.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}
