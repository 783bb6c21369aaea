//! Eastmoney kline provider for indices, stocks, domestic ETFs and US ETFs.
//!
//! Each kline is a comma-joined string:
//! `date,open,close,high,low,volume,amount,amplitude,pct_change,change,turnover`.
//! A `null` data block means the symbol has no bars in the requested range,
//! which is reported as an empty fetch rather than an error.

use super::http::{parse_number, Envelope, HttpClient};
use super::provider::{DataError, DataProvider, DataSource, FetchResult};
use super::schema::{
    AMOUNT, AMPLITUDE, CHANGE, CLOSE, HIGH, LOW, OPEN, PCT_CHANGE, TURNOVER, VOLUME,
};
use super::series::{DateRange, Period, SeriesRow, Symbol};
use chrono::NaiveDate;
use serde::Deserialize;

const KLINE_URL: &str = "https://push2his.eastmoney.com/api/qt/stock/kline/get";

/// Column order of the kline string after the date.
const KLINE_FIELDS: [&str; 10] = [
    OPEN, CLOSE, HIGH, LOW, VOLUME, AMOUNT, AMPLITUDE, PCT_CHANGE, CHANGE, TURNOVER,
];

#[derive(Debug, Deserialize)]
struct KlineResponse {
    #[serde(default)]
    rc: i64,
    data: Option<KlineData>,
}

impl Envelope for KlineResponse {
    fn rejection(&self) -> Option<String> {
        (self.rc != 0).then(|| format!("kline rc {}", self.rc))
    }
}

#[derive(Debug, Deserialize)]
struct KlineData {
    #[serde(default)]
    klines: Vec<String>,
}

/// Decides the market prefix for bare codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetClass {
    /// Market indices: `399xxx` trade in Shenzhen, everything else in Shanghai.
    Index,
    /// Stocks and exchange-traded funds: `5xxxxx`, `6xxxxx`, `9xxxxx` are Shanghai.
    Equity,
}

/// Eastmoney security id (`{market}.{code}`) for `symbol`.
///
/// Symbols that already carry a market prefix (`105.QQQ`) pass through.
pub fn secid(symbol: &Symbol, class: AssetClass) -> String {
    let code = symbol.as_str();
    if code.contains('.') {
        return code.to_string();
    }
    let market = match class {
        AssetClass::Index if code.starts_with("399") => 0,
        AssetClass::Index => 1,
        AssetClass::Equity if code.starts_with(['5', '6', '9']) => 1,
        AssetClass::Equity => 0,
    };
    format!("{market}.{code}")
}

fn klt(period: Period) -> &'static str {
    match period {
        Period::Daily => "101",
        Period::Weekly => "102",
        Period::Monthly => "103",
    }
}

/// Parse one kline string into a row.
pub fn parse_kline(line: &str) -> Result<SeriesRow, DataError> {
    let mut cells = line.split(',');
    let date_cell = cells
        .next()
        .ok_or_else(|| DataError::ResponseFormatChanged("empty kline".into()))?;
    let date = NaiveDate::parse_from_str(date_cell.trim(), "%Y-%m-%d").map_err(|e| {
        DataError::ResponseFormatChanged(format!("kline date '{date_cell}': {e}"))
    })?;

    let mut row = SeriesRow::new(date);
    let mut seen = 0;
    for (field, cell) in KLINE_FIELDS.iter().zip(cells) {
        seen += 1;
        if let Some(value) = parse_number(cell) {
            row.set(field, value);
        }
    }

    // date + open,close,high,low,volume at minimum
    if seen < 5 {
        return Err(DataError::ResponseFormatChanged(format!(
            "kline has {} columns, expected at least 6: '{line}'",
            seen + 1
        )));
    }

    Ok(row)
}

/// Eastmoney kline provider.
pub struct EastmoneyKlineProvider {
    http: HttpClient,
    class: AssetClass,
}

impl EastmoneyKlineProvider {
    pub fn new(http: HttpClient, class: AssetClass) -> Self {
        Self { http, class }
    }

    fn query(
        &self,
        symbol: &Symbol,
        period: Period,
        range: DateRange,
    ) -> Vec<(&'static str, String)> {
        vec![
            ("secid", secid(symbol, self.class)),
            ("ut", "7eea3edcaed734bea9cbfc24409ed989".to_string()),
            ("fields1", "f1,f2,f3,f4,f5,f6".to_string()),
            (
                "fields2",
                "f51,f52,f53,f54,f55,f56,f57,f58,f59,f60,f61".to_string(),
            ),
            ("klt", klt(period).to_string()),
            ("fqt", "0".to_string()),
            ("beg", range.start().format("%Y%m%d").to_string()),
            ("end", range.end().format("%Y%m%d").to_string()),
        ]
    }
}

impl DataProvider for EastmoneyKlineProvider {
    fn name(&self) -> &str {
        "eastmoney_kline"
    }

    fn fetch(
        &self,
        symbol: &Symbol,
        period: Period,
        range: DateRange,
    ) -> Result<FetchResult, DataError> {
        let query = self.query(symbol, period, range);
        tracing::debug!(%symbol, %range, secid = %query[0].1, "requesting klines");
        let resp: KlineResponse = self.http.get_json(KLINE_URL, &query, None)?;

        let rows = match resp.data {
            Some(data) => data
                .klines
                .iter()
                .map(|line| parse_kline(line))
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        Ok(FetchResult {
            symbol: symbol.clone(),
            rows,
            source: DataSource::EastmoneyKline,
        })
    }

    fn is_available(&self) -> bool {
        self.http.is_available()
    }
}
