//! Per-symbol Parquet store.
//!
//! Layout: `{root}/{dataset_dir}/{storage_key}.parquet`, plus a
//! `{storage_key}.meta.json` sidecar carrying the table file's blake3 hash.
//!
//! - One table per symbol, replaced whole on every write
//! - Atomic writes (write to .tmp, rename into place)
//! - Missing file reads as "no table"
//! - Corrupt files are quarantined (`.parquet.quarantined`) and read as missing
//! - File handles never outlive a single `load` or `replace` call

use super::provider::DataError;
use super::schema::DatasetKind;
use super::series::{SeriesRow, SeriesTable, Symbol};
use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const DATE_COL: &str = "date";
const CONSTITUENT_COL: &str = "constituent";

/// `NaiveDate::num_days_from_ce()` of 1970-01-01.
const EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Durable mapping from (dataset, symbol) to a SeriesTable.
pub trait SeriesStore: Send + Sync {
    /// Load the table for `symbol`; `None` when nothing is stored yet.
    fn load(&self, dataset: DatasetKind, symbol: &Symbol)
        -> Result<Option<SeriesTable>, DataError>;

    /// Replace the stored table for `symbol` with `table`.
    fn replace(
        &self,
        dataset: DatasetKind,
        symbol: &Symbol,
        table: &SeriesTable,
    ) -> Result<(), DataError>;
}

/// Metadata sidecar for a stored table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMeta {
    pub symbol: Symbol,
    pub dataset: DatasetKind,
    pub first_date: NaiveDate,
    pub watermark: NaiveDate,
    pub row_count: usize,
    pub data_hash: String,
    pub written_at: chrono::NaiveDateTime,
}

/// Store status for a single symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStatus {
    pub symbol: Symbol,
    pub stored: bool,
    pub first_date: Option<NaiveDate>,
    pub watermark: Option<NaiveDate>,
    pub row_count: Option<usize>,
}

pub struct ParquetStore {
    root: PathBuf,
}

impl ParquetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Container directory for one dataset category.
    fn container(&self, dataset: DatasetKind) -> PathBuf {
        self.root.join(dataset.dir_name())
    }

    pub fn table_path(&self, dataset: DatasetKind, symbol: &Symbol) -> PathBuf {
        self.container(dataset)
            .join(format!("{}.parquet", symbol.storage_key()))
    }

    fn meta_path(&self, dataset: DatasetKind, symbol: &Symbol) -> PathBuf {
        self.container(dataset)
            .join(format!("{}.meta.json", symbol.storage_key()))
    }

    /// Sidecar metadata, if it describes the table currently on disk.
    pub fn meta(&self, dataset: DatasetKind, symbol: &Symbol) -> Option<StoreMeta> {
        let content = fs::read_to_string(self.meta_path(dataset, symbol)).ok()?;
        let meta: StoreMeta = serde_json::from_str(&content).ok()?;
        let bytes = fs::read(self.table_path(dataset, symbol)).ok()?;
        (blake3::hash(&bytes).to_hex().as_str() == meta.data_hash).then_some(meta)
    }

    /// Which symbols have stored tables, and their date ranges.
    ///
    /// A missing or stale sidecar falls back to reading the table itself.
    pub fn status(&self, dataset: DatasetKind, symbols: &[Symbol]) -> Vec<StoreStatus> {
        symbols
            .iter()
            .map(|sym| {
                let (first_date, watermark, row_count) = match self.meta(dataset, sym) {
                    Some(m) => (Some(m.first_date), Some(m.watermark), Some(m.row_count)),
                    None => match self.load(dataset, sym) {
                        Ok(Some(t)) => (t.first_date(), t.watermark(), Some(t.len())),
                        _ => (None, None, None),
                    },
                };
                StoreStatus {
                    symbol: sym.clone(),
                    stored: row_count.is_some(),
                    first_date,
                    watermark,
                    row_count,
                }
            })
            .collect()
    }

    fn quarantine(&self, path: &Path, reason: &DataError) {
        let target = path.with_extension("parquet.quarantined");
        tracing::warn!(
            path = %path.display(),
            error = %reason,
            "quarantining unreadable table"
        );
        if let Err(e) = fs::rename(path, &target) {
            tracing::warn!(path = %path.display(), error = %e, "quarantine rename failed");
        }
    }

    /// Write the sidecar for the staged table at `staged` to a temp file.
    fn stage_meta(
        &self,
        dataset: DatasetKind,
        symbol: &Symbol,
        table: &SeriesTable,
        staged: &Path,
        (first_date, watermark): (NaiveDate, NaiveDate),
    ) -> Result<PathBuf, DataError> {
        let bytes = fs::read(staged).map_err(|e| DataError::Store(format!("hash read: {e}")))?;
        let meta = StoreMeta {
            symbol: symbol.clone(),
            dataset,
            first_date,
            watermark,
            row_count: table.len(),
            data_hash: blake3::hash(&bytes).to_hex().to_string(),
            written_at: chrono::Local::now().naive_local(),
        };
        let json = serde_json::to_string_pretty(&meta)
            .map_err(|e| DataError::Store(format!("meta serialization: {e}")))?;
        let tmp = self.meta_path(dataset, symbol).with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| DataError::Store(format!("meta write: {e}")))?;
        Ok(tmp)
    }
}

impl SeriesStore for ParquetStore {
    fn load(
        &self,
        dataset: DatasetKind,
        symbol: &Symbol,
    ) -> Result<Option<SeriesTable>, DataError> {
        let path = self.table_path(dataset, symbol);
        if !path.exists() {
            return Ok(None);
        }

        match read_table(dataset, &path) {
            Ok(table) if table.is_empty() => {
                self.quarantine(&path, &DataError::Validation("empty table".into()));
                Ok(None)
            }
            Ok(table) => Ok(Some(table)),
            Err(e) => {
                self.quarantine(&path, &e);
                Ok(None)
            }
        }
    }

    fn replace(
        &self,
        dataset: DatasetKind,
        symbol: &Symbol,
        table: &SeriesTable,
    ) -> Result<(), DataError> {
        let (Some(first_date), Some(watermark)) = (table.first_date(), table.watermark()) else {
            return Err(DataError::Store(format!("refusing to store empty table for {symbol}")));
        };

        let dir = self.container(dataset);
        fs::create_dir_all(&dir)
            .map_err(|e| DataError::Store(format!("failed to create {}: {e}", dir.display())))?;

        let mut df = table_to_dataframe(table)?;
        let path = self.table_path(dataset, symbol);
        let tmp_path = path.with_extension("parquet.tmp");

        write_parquet(&mut df, &tmp_path)?;
        let meta_tmp = self
            .stage_meta(dataset, symbol, table, &tmp_path, (first_date, watermark))
            .map_err(|e| {
                let _ = fs::remove_file(&tmp_path);
                e
            })?;

        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            let _ = fs::remove_file(&meta_tmp);
            DataError::Store(format!("atomic rename failed: {e}"))
        })?;

        // The table is durable from here on. A sidecar that cannot be
        // installed is dropped and `status` reads the table instead.
        let meta_path = self.meta_path(dataset, symbol);
        if let Err(e) = fs::rename(&meta_tmp, &meta_path) {
            tracing::warn!(
                %symbol,
                path = %meta_path.display(),
                error = %e,
                "metadata sidecar not updated"
            );
            let _ = fs::remove_file(&meta_tmp);
            let _ = fs::remove_file(&meta_path);
        }
        Ok(())
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn days_since_epoch(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - EPOCH_DAYS_FROM_CE
}

fn date_from_epoch_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(EPOCH_DAYS_FROM_CE)?)
}

/// Convert a table to a DataFrame: `date`, optional `constituent`, then
/// one nullable Float64 column per value field.
fn table_to_dataframe(table: &SeriesTable) -> Result<DataFrame, DataError> {
    let dates: Vec<i32> = table.rows().map(|r| days_since_epoch(r.date)).collect();

    let mut columns = vec![Column::new(DATE_COL.into(), dates)
        .cast(&DataType::Date)
        .map_err(|e| DataError::Parquet(format!("date cast: {e}")))?];

    if table.dataset().is_multi_entity() {
        let ids: Vec<Option<&str>> = table.rows().map(|r| r.constituent.as_deref()).collect();
        columns.push(Column::new(CONSTITUENT_COL.into(), ids));
    }

    for field in table.field_names() {
        if field == DATE_COL || field == CONSTITUENT_COL {
            return Err(DataError::Validation(format!(
                "value field '{field}' collides with a key column"
            )));
        }
        let values: Vec<Option<f64>> = table.rows().map(|r| r.get(&field)).collect();
        columns.push(Column::new(field.as_str().into(), values));
    }

    DataFrame::new(columns).map_err(|e| DataError::Parquet(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), DataError> {
    let file = fs::File::create(path).map_err(|e| DataError::Parquet(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(df)
        .map_err(|e| DataError::Parquet(format!("write parquet: {e}")))?;
    Ok(())
}

fn read_table(dataset: DatasetKind, path: &Path) -> Result<SeriesTable, DataError> {
    let file = fs::File::open(path).map_err(|e| DataError::Parquet(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::Parquet(format!("read: {e}")))?;
    dataframe_to_table(dataset, &df)
}

/// Convert a DataFrame back to a table, validating the key columns.
fn dataframe_to_table(dataset: DatasetKind, df: &DataFrame) -> Result<SeriesTable, DataError> {
    let map_err = |e: PolarsError| DataError::Parquet(format!("column read: {e}"));

    let date_ca = df
        .column(DATE_COL)
        .map_err(map_err)?
        .date()
        .map_err(|e| DataError::Parquet(format!("date column type: {e}")))?;

    let constituent_ca = if dataset.is_multi_entity() {
        Some(
            df.column(CONSTITUENT_COL)
                .map_err(map_err)?
                .str()
                .map_err(|e| DataError::Parquet(format!("constituent column type: {e}")))?,
        )
    } else {
        None
    };

    let mut value_columns = Vec::new();
    for col in df.get_columns() {
        let name = col.name().as_str();
        if name == DATE_COL || name == CONSTITUENT_COL {
            continue;
        }
        let as_f64 = col
            .cast(&DataType::Float64)
            .map_err(|e| DataError::Parquet(format!("{name} cast: {e}")))?;
        value_columns.push((name.to_string(), as_f64));
    }

    let mut rows = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let days = date_ca
            .get(i)
            .ok_or_else(|| DataError::Parquet(format!("null date at row {i}")))?;
        let date = date_from_epoch_days(days)
            .ok_or_else(|| DataError::Parquet(format!("date out of range at row {i}")))?;

        let mut row = SeriesRow::new(date);
        if let Some(ca) = constituent_ca {
            let id = ca
                .get(i)
                .ok_or_else(|| DataError::Parquet(format!("null constituent at row {i}")))?;
            row = row.with_constituent(id);
        }

        for (name, column) in &value_columns {
            let ca = column
                .f64()
                .map_err(|e| DataError::Parquet(format!("{name} column type: {e}")))?;
            if let Some(v) = ca.get(i) {
                row.set(name, v);
            }
        }
        rows.push(row);
    }

    Ok(SeriesTable::from_rows(dataset, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::schema::{CLOSE, OPEN, VOLUME};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn sym(code: &str) -> Symbol {
        Symbol::new(code).unwrap()
    }

    #[test]
    fn epoch_day_conversion() {
        assert_eq!(days_since_epoch(d(1970, 1, 1)), 0);
        assert_eq!(days_since_epoch(d(2024, 1, 1)), 19_723);
        assert_eq!(date_from_epoch_days(19_723), Some(d(2024, 1, 1)));
    }

    #[test]
    fn write_and_load_keeps_nulls_and_extras() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());
        let table = SeriesTable::from_rows(
            DatasetKind::UsEtf,
            vec![
                SeriesRow::new(d(2024, 1, 2))
                    .with_value(CLOSE, 470.5)
                    .with_value(VOLUME, 1000.0),
                SeriesRow::new(d(2024, 1, 3))
                    .with_value(CLOSE, 468.0)
                    .with_value(OPEN, 471.0),
            ],
        );

        store.replace(DatasetKind::UsEtf, &sym("107.SPY"), &table).unwrap();
        let loaded = store
            .load(DatasetKind::UsEtf, &sym("107.SPY"))
            .unwrap()
            .unwrap();

        assert_eq!(loaded, table);
        assert!(dir.path().join("us_etf/sym_107_SPY.parquet").exists());
    }

    #[test]
    fn constituent_tables_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());
        let table = SeriesTable::from_rows(
            DatasetKind::IndexConstituents,
            vec![
                SeriesRow::new(d(2024, 1, 2))
                    .with_constituent("600000")
                    .with_value(CLOSE, 7.1),
                SeriesRow::new(d(2024, 1, 2))
                    .with_constituent("600519")
                    .with_value(CLOSE, 1680.0),
            ],
        );
        store
            .replace(DatasetKind::IndexConstituents, &sym("000016"), &table)
            .unwrap();
        let loaded = store
            .load(DatasetKind::IndexConstituents, &sym("000016"))
            .unwrap()
            .unwrap();
        assert_eq!(loaded.constituents(), vec!["600000", "600519"]);
        assert_eq!(loaded, table);
    }

    #[test]
    fn missing_table_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());
        assert!(store
            .load(DatasetKind::IndexDaily, &sym("000300"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn corrupt_table_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());
        let path = store.table_path(DatasetKind::IndexDaily, &sym("000300"));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"not parquet").unwrap();

        assert!(store
            .load(DatasetKind::IndexDaily, &sym("000300"))
            .unwrap()
            .is_none());
        assert!(!path.exists());
        assert!(path.with_extension("parquet.quarantined").exists());
    }

    #[test]
    fn empty_table_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());
        let empty = SeriesTable::empty(DatasetKind::IndexDaily);
        assert!(store
            .replace(DatasetKind::IndexDaily, &sym("000300"), &empty)
            .is_err());
    }

    #[test]
    fn meta_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());
        let table = SeriesTable::from_rows(
            DatasetKind::FundNav,
            vec![
                SeriesRow::new(d(2024, 1, 2)).with_value("nav", 1.0),
                SeriesRow::new(d(2024, 1, 5)).with_value("nav", 1.1),
            ],
        );
        store
            .replace(DatasetKind::FundNav, &sym("040046"), &table)
            .unwrap();

        let meta = store.meta(DatasetKind::FundNav, &sym("040046")).unwrap();
        assert_eq!(meta.row_count, 2);
        assert_eq!(meta.first_date, d(2024, 1, 2));
        assert_eq!(meta.watermark, d(2024, 1, 5));
        assert_eq!(meta.data_hash.len(), 64);

        let statuses = store.status(DatasetKind::FundNav, &[sym("040046"), sym("164701")]);
        assert!(statuses[0].stored);
        assert!(!statuses[1].stored);
        assert_eq!(statuses[1].watermark, None);
    }

    fn daily(closes: &[f64]) -> SeriesTable {
        SeriesTable::from_rows(
            DatasetKind::IndexDaily,
            closes.iter().enumerate().map(|(i, &c)| {
                SeriesRow::new(d(2024, 1, 2) + chrono::Duration::days(i as i64))
                    .with_value(CLOSE, c)
            }),
        )
    }

    #[test]
    fn blocked_sidecar_does_not_fail_the_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());
        fs::create_dir_all(dir.path().join("index_daily/sym_000300.meta.json")).unwrap();

        store
            .replace(DatasetKind::IndexDaily, &sym("000300"), &daily(&[1.0, 2.0, 3.0]))
            .unwrap();

        assert!(store.meta(DatasetKind::IndexDaily, &sym("000300")).is_none());
        let status = &store.status(DatasetKind::IndexDaily, &[sym("000300")])[0];
        assert!(status.stored);
        assert_eq!(status.row_count, Some(3));
        assert_eq!(status.watermark, Some(d(2024, 1, 4)));
        assert!(!dir.path().join("index_daily/sym_000300.meta.json.tmp").exists());
    }

    #[test]
    fn stale_sidecar_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());
        store
            .replace(DatasetKind::IndexDaily, &sym("000300"), &daily(&[1.0, 2.0]))
            .unwrap();

        let other = tempfile::tempdir().unwrap();
        let newer = ParquetStore::new(other.path());
        newer
            .replace(DatasetKind::IndexDaily, &sym("000300"), &daily(&[1.0, 2.0, 3.0, 4.0]))
            .unwrap();
        fs::copy(
            newer.table_path(DatasetKind::IndexDaily, &sym("000300")),
            store.table_path(DatasetKind::IndexDaily, &sym("000300")),
        )
        .unwrap();

        assert!(store.meta(DatasetKind::IndexDaily, &sym("000300")).is_none());
        let status = &store.status(DatasetKind::IndexDaily, &[sym("000300")])[0];
        assert_eq!(status.row_count, Some(4));
        assert_eq!(status.first_date, Some(d(2024, 1, 2)));
    }
}
