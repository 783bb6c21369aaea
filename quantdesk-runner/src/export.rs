//! CSV export and reload of report tables.
//!
//! Layout: the header row starts with an empty cell, and every data row
//! starts with its 0-based row number. `read_report_csv` strips that column.

use crate::report::{EtfSummary, FundReturns, IndexSummary, ReportError};
use quantdesk_core::data::FundRankEntry;
use std::fs;
use std::path::Path;

/// A report row that can be written as one CSV record.
pub trait ReportRecord {
    fn headers() -> &'static [&'static str];
    fn record(&self) -> Vec<String>;
}

fn num(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.2}")
    } else {
        String::new()
    }
}

fn pct(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.2}%")
    } else {
        String::new()
    }
}

fn opt_pct(v: Option<f64>) -> String {
    v.map(pct).unwrap_or_default()
}

impl ReportRecord for IndexSummary {
    fn headers() -> &'static [&'static str] {
        &[
            "date",
            "name",
            "code",
            "close",
            "pct_change",
            "prev_close",
            "close_two_back",
            "ma30",
            "band",
            "signal",
        ]
    }

    fn record(&self) -> Vec<String> {
        vec![
            self.date.to_string(),
            self.name.clone(),
            self.code.clone(),
            num(self.close),
            pct(self.pct_change),
            num(self.prev_close),
            num(self.close_two_back),
            num(self.ma30),
            format!("({}, {})", num(self.band.0), num(self.band.1)),
            self.signal.label().to_string(),
        ]
    }
}

impl ReportRecord for EtfSummary {
    fn headers() -> &'static [&'static str] {
        &["name", "code", "close", "day_change", "week_change", "month_change"]
    }

    fn record(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.code.clone(),
            format!("{:.3}", self.close),
            pct(self.day_change),
            pct(self.week_change),
            pct(self.month_change),
        ]
    }
}

impl ReportRecord for FundReturns {
    fn headers() -> &'static [&'static str] {
        &[
            "code",
            "name",
            "date",
            "nav",
            "one_month",
            "one_year",
            "three_year",
            "year_to_date",
            "since_inception",
        ]
    }

    fn record(&self) -> Vec<String> {
        vec![
            self.code.clone(),
            self.name.clone(),
            self.date.to_string(),
            format!("{:.4}", self.nav),
            opt_pct(self.one_month),
            opt_pct(self.one_year),
            opt_pct(self.three_year),
            opt_pct(self.year_to_date),
            opt_pct(self.since_inception),
        ]
    }
}

fn opt_num(v: Option<f64>, places: usize) -> String {
    v.map(|v| format!("{v:.places$}")).unwrap_or_default()
}

impl ReportRecord for FundRankEntry {
    fn headers() -> &'static [&'static str] {
        &[
            "code",
            "name",
            "date",
            "nav",
            "accumulated_nav",
            "daily",
            "one_week",
            "one_month",
            "three_month",
            "six_month",
            "one_year",
            "two_year",
            "three_year",
            "year_to_date",
            "since_inception",
            "fee",
        ]
    }

    fn record(&self) -> Vec<String> {
        let mut record = vec![
            self.code.clone(),
            self.name.clone(),
            self.date.map(|d| d.to_string()).unwrap_or_default(),
            opt_num(self.nav, 4),
            opt_num(self.accumulated_nav, 4),
        ];
        record.extend(
            [
                self.daily,
                self.one_week,
                self.one_month,
                self.three_month,
                self.six_month,
                self.one_year,
                self.two_year,
                self.three_year,
                self.year_to_date,
                self.since_inception,
            ]
            .into_iter()
            .map(opt_pct),
        );
        record.push(self.fee.clone().unwrap_or_default());
        record
    }
}

/// Render rows as CSV text with the leading row-number column.
pub fn report_csv<R: ReportRecord>(rows: &[R]) -> Result<String, ReportError> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    let mut header = vec![""];
    header.extend_from_slice(R::headers());
    wtr.write_record(&header)?;

    for (i, row) in rows.iter().enumerate() {
        let mut record = vec![i.to_string()];
        record.extend(row.record());
        wtr.write_record(&record)?;
    }

    let data = wtr
        .into_inner()
        .map_err(|e| ReportError::Format(format!("failed to flush CSV writer: {e}")))?;
    String::from_utf8(data).map_err(|e| ReportError::Format(format!("CSV is not UTF-8: {e}")))
}

/// Write rows to `path`, creating parent directories.
pub fn write_report_csv<R: ReportRecord>(path: &Path, rows: &[R]) -> Result<(), ReportError> {
    let io_err = |source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(path, report_csv(rows)?).map_err(io_err)?;
    tracing::info!(path = %path.display(), rows = rows.len(), "report written");
    Ok(())
}

/// A report loaded back from CSV, without the row-number column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ReportTable {
    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let idx = self.headers.iter().position(|h| h == name)?;
        Some(
            self.rows
                .iter()
                .map(|r| r.get(idx).map(|s| s.as_str()).unwrap_or(""))
                .collect(),
        )
    }
}

pub fn parse_report_csv(content: &str) -> Result<ReportTable, ReportError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(content.as_bytes());
    let mut records = rdr.records();

    let header = records
        .next()
        .ok_or_else(|| ReportError::Format("missing header row".into()))??;
    if header.get(0) != Some("") {
        return Err(ReportError::Format(
            "first header cell must be the empty row-number column".into(),
        ));
    }
    let headers = header.iter().skip(1).map(String::from).collect();

    let mut rows = Vec::new();
    for record in records {
        let record = record?;
        rows.push(record.iter().skip(1).map(String::from).collect());
    }

    Ok(ReportTable { headers, rows })
}

pub fn read_report_csv(path: &Path) -> Result<ReportTable, ReportError> {
    let content = fs::read_to_string(path).map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_report_csv(&content)
}
