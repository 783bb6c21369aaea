//! Market-wide open-ended fund rankings by category.
//!
//! Eastmoney's rank handler returns a JavaScript assignment
//! (`var rankData = {datas:["...","..."],...}`) whose `datas` array holds one
//! comma-separated record per fund. Fetched rankings are kept as JSON
//! snapshots, one file per category, next to the Parquet tables.

use super::http::{parse_number, HttpClient};
use super::provider::DataError;
use chrono::{Months, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

const RANK_URL: &str = "https://fund.eastmoney.com/data/rankhandler.aspx";
const RANK_REFERER: &str = "https://fund.eastmoney.com/fundguzhi.html";
const RANK_PAGE_SIZE: usize = 20_000;
const MIN_FIELDS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FundCategory {
    All,
    Stock,
    Mixed,
    Bond,
    Index,
    Qdii,
    Fof,
}

impl FundCategory {
    pub const ALL: [FundCategory; 7] = [
        FundCategory::All,
        FundCategory::Stock,
        FundCategory::Mixed,
        FundCategory::Bond,
        FundCategory::Index,
        FundCategory::Qdii,
        FundCategory::Fof,
    ];

    /// The rank handler's `ft` parameter.
    pub fn type_code(self) -> &'static str {
        match self {
            FundCategory::All => "all",
            FundCategory::Stock => "gp",
            FundCategory::Mixed => "hh",
            FundCategory::Bond => "zq",
            FundCategory::Index => "zs",
            FundCategory::Qdii => "qdii",
            FundCategory::Fof => "fof",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FundCategory::All => "全部",
            FundCategory::Stock => "股票型",
            FundCategory::Mixed => "混合型",
            FundCategory::Bond => "债券型",
            FundCategory::Index => "指数型",
            FundCategory::Qdii => "QDII",
            FundCategory::Fof => "FOF",
        }
    }

    /// File-name form.
    pub fn slug(self) -> &'static str {
        match self {
            FundCategory::All => "all",
            FundCategory::Stock => "stock",
            FundCategory::Mixed => "mixed",
            FundCategory::Bond => "bond",
            FundCategory::Index => "index",
            FundCategory::Qdii => "qdii",
            FundCategory::Fof => "fof",
        }
    }
}

impl fmt::Display for FundCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// One fund in a category ranking. Returns are percentages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundRankEntry {
    pub code: String,
    pub name: String,
    pub date: Option<NaiveDate>,
    pub nav: Option<f64>,
    pub accumulated_nav: Option<f64>,
    pub daily: Option<f64>,
    pub one_week: Option<f64>,
    pub one_month: Option<f64>,
    pub three_month: Option<f64>,
    pub six_month: Option<f64>,
    pub one_year: Option<f64>,
    pub two_year: Option<f64>,
    pub three_year: Option<f64>,
    pub year_to_date: Option<f64>,
    pub since_inception: Option<f64>,
    pub fee: Option<String>,
}

impl FundRankEntry {
    fn from_record(record: &str) -> Result<Self, DataError> {
        let f: Vec<&str> = record.split(',').collect();
        if f.len() < MIN_FIELDS {
            return Err(DataError::ResponseFormatChanged(format!(
                "fund rank record has {} fields, expected at least {MIN_FIELDS}",
                f.len()
            )));
        }
        let date = match f[3].trim() {
            "" => None,
            s => Some(NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| {
                DataError::ResponseFormatChanged(format!("fund rank date '{s}': {e}"))
            })?),
        };
        Ok(Self {
            code: f[0].trim().to_string(),
            name: f[1].trim().to_string(),
            date,
            nav: parse_number(f[4]),
            accumulated_nav: parse_number(f[5]),
            daily: parse_number(f[6]),
            one_week: parse_number(f[7]),
            one_month: parse_number(f[8]),
            three_month: parse_number(f[9]),
            six_month: parse_number(f[10]),
            one_year: parse_number(f[11]),
            two_year: parse_number(f[12]),
            three_year: parse_number(f[13]),
            year_to_date: parse_number(f[14]),
            since_inception: parse_number(f[15]),
            fee: f
                .get(20)
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(String::from),
        })
    }
}

/// Decode a rank handler response body.
pub fn parse_rank_payload(body: &str) -> Result<Vec<FundRankEntry>, DataError> {
    let Some(start) = body.find("datas:[") else {
        if body.contains("ErrCode") {
            return Err(DataError::Rejected(format!(
                "fund rank: {}",
                body.chars().take(120).collect::<String>()
            )));
        }
        return Err(DataError::ResponseFormatChanged(
            "fund rank response has no datas array".into(),
        ));
    };
    let array = &body[start + "datas:[".len()..];
    let array = array.find(']').map(|end| &array[..end]).ok_or_else(|| {
        DataError::ResponseFormatChanged("fund rank datas array is not closed".into())
    })?;

    let quoted = Regex::new(r#""([^"]*)""#)
        .map_err(|e| DataError::Other(format!("fund rank pattern: {e}")))?;
    quoted
        .captures_iter(array)
        .filter_map(|c| c.get(1))
        .map(|m| FundRankEntry::from_record(m.as_str()))
        .collect()
}

/// Source of category rankings as of a date.
pub trait FundRankSource: Send + Sync {
    fn ranking(
        &self,
        category: FundCategory,
        as_of: NaiveDate,
    ) -> Result<Vec<FundRankEntry>, DataError>;
}

pub struct EastmoneyFundRankSource {
    http: HttpClient,
}

impl EastmoneyFundRankSource {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }
}

impl FundRankSource for EastmoneyFundRankSource {
    fn ranking(
        &self,
        category: FundCategory,
        as_of: NaiveDate,
    ) -> Result<Vec<FundRankEntry>, DataError> {
        let start = as_of.checked_sub_months(Months::new(12)).unwrap_or(as_of);
        let query = [
            ("op", "ph".to_string()),
            ("dt", "kf".to_string()),
            ("ft", category.type_code().to_string()),
            ("rs", String::new()),
            ("gs", "0".to_string()),
            ("sc", "jnzf".to_string()),
            ("st", "desc".to_string()),
            ("sd", start.format("%Y-%m-%d").to_string()),
            ("ed", as_of.format("%Y-%m-%d").to_string()),
            ("qdii", String::new()),
            ("tabSubtype", ",,,,,".to_string()),
            ("pi", "1".to_string()),
            ("pn", RANK_PAGE_SIZE.to_string()),
            ("dx", "1".to_string()),
            ("v", "0.1".to_string()),
        ];
        let body = self.http.get_text(RANK_URL, &query, Some(RANK_REFERER))?;
        let entries = parse_rank_payload(&body)?;
        tracing::info!(%category, funds = entries.len(), "fund ranking fetched");
        Ok(entries)
    }
}

/// A fetched category ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundRankSnapshot {
    pub category: FundCategory,
    pub as_of: NaiveDate,
    pub entries: Vec<FundRankEntry>,
}

pub fn snapshot_path(root: &Path, category: FundCategory) -> PathBuf {
    root.join("fund_rank").join(format!("{}.json", category.slug()))
}

/// Write `snapshot` under `root`, replacing any earlier one for its category.
pub fn write_snapshot(root: &Path, snapshot: &FundRankSnapshot) -> Result<PathBuf, DataError> {
    let path = snapshot_path(root, snapshot.category);
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .map_err(|e| DataError::Store(format!("create {}: {e}", dir.display())))?;
    }
    let json = serde_json::to_vec(snapshot)
        .map_err(|e| DataError::Store(format!("encode fund ranking: {e}")))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)
        .map_err(|e| DataError::Store(format!("write {}: {e}", tmp.display())))?;
    fs::rename(&tmp, &path)
        .map_err(|e| DataError::Store(format!("rename {}: {e}", path.display())))?;
    Ok(path)
}

/// Stored ranking for `category`, if one has been fetched.
pub fn read_snapshot(
    root: &Path,
    category: FundCategory,
) -> Result<Option<FundRankSnapshot>, DataError> {
    let path = snapshot_path(root, category);
    if !path.exists() {
        return Ok(None);
    }
    let bytes =
        fs::read(&path).map_err(|e| DataError::Store(format!("read {}: {e}", path.display())))?;
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| DataError::Store(format!("decode {}: {e}", path.display())))
}
