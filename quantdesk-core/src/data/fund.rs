//! Eastmoney open-ended fund NAV history.
//!
//! The endpoint is paginated: pages are requested until the reported total
//! has been collected or a page comes back empty.

use super::http::{parse_number, Envelope, HttpClient};
use super::provider::{DataError, DataProvider, DataSource, FetchResult};
use super::schema::{ACCUMULATED_NAV, DAILY_GROWTH, NAV};
use super::series::{DateRange, Period, SeriesRow, Symbol};
use chrono::NaiveDate;
use serde::Deserialize;

const NAV_URL: &str = "https://api.fund.eastmoney.com/f10/lsjz";
const NAV_REFERER: &str = "https://fundf10.eastmoney.com/";
const PAGE_SIZE: usize = 20;
const MAX_PAGES: usize = 1000;

#[derive(Debug, Deserialize)]
struct NavPage {
    #[serde(rename = "Data")]
    data: Option<NavData>,
    #[serde(rename = "TotalCount", default)]
    total_count: usize,
    #[serde(rename = "ErrCode", default)]
    err_code: i64,
    #[serde(rename = "ErrMsg")]
    err_msg: Option<String>,
}

impl Envelope for NavPage {
    fn rejection(&self) -> Option<String> {
        (self.err_code != 0).then(|| {
            format!(
                "fund NAV error {} {}",
                self.err_code,
                self.err_msg.as_deref().unwrap_or("")
            )
        })
    }
}

#[derive(Debug, Deserialize)]
struct NavData {
    #[serde(rename = "LSJZList", default)]
    records: Vec<NavRecord>,
}

#[derive(Debug, Deserialize)]
struct NavRecord {
    #[serde(rename = "FSRQ")]
    date: String,
    #[serde(rename = "DWJZ", default)]
    nav: String,
    #[serde(rename = "LJJZ", default)]
    accumulated_nav: Option<String>,
    #[serde(rename = "JZZZL", default)]
    daily_growth: Option<String>,
}

impl NavRecord {
    fn into_row(self) -> Result<SeriesRow, DataError> {
        let date = NaiveDate::parse_from_str(self.date.trim(), "%Y-%m-%d").map_err(|e| {
            DataError::ResponseFormatChanged(format!("NAV date '{}': {e}", self.date))
        })?;
        let mut row = SeriesRow::new(date);
        if let Some(v) = parse_number(&self.nav) {
            row.set(NAV, v);
        }
        if let Some(v) = self.accumulated_nav.as_deref().and_then(parse_number) {
            row.set(ACCUMULATED_NAV, v);
        }
        if let Some(v) = self.daily_growth.as_deref().and_then(parse_number) {
            row.set(DAILY_GROWTH, v);
        }
        Ok(row)
    }
}

pub struct EastmoneyFundNavProvider {
    http: HttpClient,
}

impl EastmoneyFundNavProvider {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    fn page(
        &self,
        symbol: &Symbol,
        range: DateRange,
        index: usize,
    ) -> Result<NavPage, DataError> {
        let query = [
            ("fundCode", symbol.as_str().to_string()),
            ("pageIndex", index.to_string()),
            ("pageSize", PAGE_SIZE.to_string()),
            ("startDate", range.start().format("%Y-%m-%d").to_string()),
            ("endDate", range.end().format("%Y-%m-%d").to_string()),
        ];
        self.http.get_json(NAV_URL, &query, Some(NAV_REFERER))
    }
}

/// Collect rows from pages until `total` is reached or a page is empty.
fn collect_pages(
    mut next_page: impl FnMut(usize) -> Result<NavPage, DataError>,
) -> Result<Vec<SeriesRow>, DataError> {
    let mut rows = Vec::new();
    for index in 1..=MAX_PAGES {
        let page = next_page(index)?;
        let total = page.total_count;
        let records = page.data.map(|d| d.records).unwrap_or_default();
        if records.is_empty() {
            break;
        }
        for record in records {
            rows.push(record.into_row()?);
        }
        tracing::debug!(page = index, collected = rows.len(), total, "fund NAV page");
        if rows.len() >= total {
            break;
        }
    }
    // Pages arrive newest first.
    rows.sort_by_key(|r| r.date);
    Ok(rows)
}

impl DataProvider for EastmoneyFundNavProvider {
    fn name(&self) -> &str {
        "eastmoney_fund_nav"
    }

    /// NAVs are published daily; `period` is ignored.
    fn fetch(
        &self,
        symbol: &Symbol,
        _period: Period,
        range: DateRange,
    ) -> Result<FetchResult, DataError> {
        let rows = collect_pages(|index| self.page(symbol, range, index))?;
        Ok(FetchResult {
            symbol: symbol.clone(),
            rows,
            source: DataSource::EastmoneyFund,
        })
    }

    fn is_available(&self) -> bool {
        self.http.is_available()
    }
}
