//! Application configuration loaded from a TOML file.
//!
//! Every path, default date and window size the updater and the reports
//! need lives here and is passed down explicitly.

use chrono::{Days, NaiveDate};
use quantdesk_core::data::{
    DataError, DatasetKind, DateRange, FundCategory, Period, RetryPolicy, Symbol,
};
use quantdesk_core::stats::StatsConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<DataError> for ConfigError {
    fn from(e: DataError) -> Self {
        ConfigError::Invalid(e.to_string())
    }
}

/// A code with a display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub code: String,
    #[serde(default)]
    pub name: String,
}

impl Instrument {
    pub fn new(code: &str, name: &str) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
        }
    }

    pub fn symbol(&self) -> Result<Symbol, DataError> {
        Symbol::new(self.code.as_str())
    }

    /// Name, or the code when no name is configured.
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.code
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtfGroup {
    pub name: String,
    pub members: Vec<Instrument>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub start_date: NaiveDate,
    pub period: Period,
    /// End date defaults to `today - end_lag_days`.
    pub end_lag_days: u64,
    /// Retries per remote request after the first attempt.
    pub max_retries: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            start_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default(),
            period: Period::Daily,
            end_lag_days: 1,
            max_retries: 3,
            retry_base_ms: 500,
            retry_max_ms: 30_000,
        }
    }
}

impl SyncConfig {
    pub fn end_date(&self, today: NaiveDate) -> NaiveDate {
        today
            .checked_sub_days(Days::new(self.end_lag_days))
            .unwrap_or(today)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_ms),
            max_delay: Duration::from_millis(self.retry_max_ms),
        }
    }

    /// Default update range as of `today`.
    pub fn range(&self, today: NaiveDate) -> Result<DateRange, ConfigError> {
        Ok(DateRange::new(self.start_date, self.end_date(today))?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub output_dir: PathBuf,
    /// Rows in each of the top and tail fund rankings.
    pub ranking_size: usize,
    /// Index codes that appear in the index summary.
    pub summary_indices: Vec<String>,
    /// Market-wide fund ranking categories to fetch and export.
    pub fund_categories: Vec<FundCategory>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("reports"),
            ranking_size: 10,
            summary_indices: ["000001", "399001", "399006", "000688"]
                .into_iter()
                .map(String::from)
                .collect(),
            fund_categories: FundCategory::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub sync: SyncConfig,
    pub stats: StatsConfig,
    pub report: ReportConfig,
    pub indices: Vec<Instrument>,
    /// Indices whose constituents are stored for breadth. Membership is
    /// looked up remotely; `constituents` is the fallback.
    pub breadth_indices: Vec<String>,
    /// Index code → constituent codes.
    pub constituents: BTreeMap<String, Vec<String>>,
    pub etf_groups: Vec<EtfGroup>,
    pub us_etfs: Vec<Instrument>,
    pub funds: Vec<Instrument>,
}

fn instruments(pairs: &[(&str, &str)]) -> Vec<Instrument> {
    pairs.iter().map(|(c, n)| Instrument::new(c, n)).collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            sync: SyncConfig::default(),
            stats: StatsConfig::default(),
            report: ReportConfig::default(),
            indices: instruments(&[
                ("000300", "沪深300"),
                ("399006", "创业板指"),
                ("000016", "上证50"),
                ("399673", "创业板50"),
                ("000905", "中证500"),
                ("000001", "上证指数"),
                ("399001", "深证成指"),
                ("000688", "科创50"),
            ]),
            breadth_indices: ["000300", "399006", "000016", "399673", "000905"]
                .into_iter()
                .map(String::from)
                .collect(),
            constituents: BTreeMap::new(),
            etf_groups: vec![
                EtfGroup {
                    name: "broad".into(),
                    members: instruments(&[
                        ("510050", "上证50ETF"),
                        ("159922", "中证500ETF"),
                        ("510300", "沪深300ETF"),
                        ("510880", "红利ETF"),
                        ("159915", "创业板ETF"),
                        ("159920", "恒生ETF"),
                    ]),
                },
                EtfGroup {
                    name: "global".into(),
                    members: instruments(&[
                        ("513520", "日经ETF"),
                        ("510050", "上证50ETF"),
                        ("510300", "沪深300ETF"),
                        ("513030", "德国ETF"),
                        ("513080", "法国CAC40ETF"),
                        ("159920", "恒生ETF"),
                        ("513500", "标普500ETF"),
                        ("159632", "纳斯达克ETF"),
                        ("518880", "黄金ETF"),
                        ("561360", "石油ETF"),
                    ]),
                },
                EtfGroup {
                    name: "sector".into(),
                    members: instruments(&[
                        ("159611", "电力ETF"),
                        ("513050", "中概互联网ETF"),
                        ("512880", "证券ETF"),
                        ("512170", "医疗ETF"),
                        ("159995", "芯片ETF"),
                        ("512480", "半导体ETF"),
                        ("518880", "黄金ETF"),
                        ("515790", "光伏ETF"),
                        ("512690", "酒ETF"),
                        ("159928", "消费ETF"),
                        ("512660", "军工ETF"),
                        ("515030", "新能源车ETF"),
                        ("159992", "创新药ETF"),
                        ("159869", "游戏ETF"),
                        ("159865", "养殖ETF"),
                        ("512400", "有色金属ETF"),
                        ("512200", "房地产ETF"),
                        ("512980", "传媒ETF"),
                        ("159766", "旅游ETF"),
                        ("159857", "光伏ETF"),
                        ("515220", "煤炭ETF"),
                        ("515880", "通信ETF"),
                    ]),
                },
            ],
            us_etfs: instruments(&[
                ("105.QQQ", "NASDAQ-100"),
                ("107.SPY", "S&P 500"),
                ("107.EWJ", "Japan"),
                ("107.INDA", "India"),
                ("107.VNM", "Vietnam"),
                ("107.EWQ", "France"),
                ("107.EWG", "Germany"),
                ("107.RSP", "S&P 500 Equal Weight"),
                ("107.IWY", "Russell Top 200 Growth"),
                ("107.MOAT", "Morningstar Wide Moat"),
                ("105.PFF", "US Preferred Stock"),
                ("107.VNQ", "Real Estate"),
            ]),
            funds: [
                "040046", "164701", "007721", "007380", "006282", "160416", "162411", "015016",
                "519191", "008763", "013308", "000043", "000893", "001668", "000369", "006105",
                "016630", "005613", "164824", "206011",
            ]
            .into_iter()
            .map(|c| Instrument::new(c, ""))
            .collect(),
        }
    }
}

impl AppConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML string. Missing sections take defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("store.root is empty".into()));
        }
        if self.stats.windows.contains(&0) || self.stats.breadth_windows.contains(&0) {
            return Err(ConfigError::Invalid("window sizes must be positive".into()));
        }
        if self.sync.retry_base_ms > self.sync.retry_max_ms {
            return Err(ConfigError::Invalid(
                "sync.retry_base_ms exceeds sync.retry_max_ms".into(),
            ));
        }
        if self.stats.band_window < 2 {
            return Err(ConfigError::Invalid(
                "stats.band_window needs at least 2 observations".into(),
            ));
        }
        if !self.stats.band_multiplier.is_finite() || self.stats.band_multiplier < 0.0 {
            return Err(ConfigError::Invalid(
                "stats.band_multiplier must be a non-negative number".into(),
            ));
        }
        for code in self.all_codes() {
            Symbol::new(code)?;
        }
        Ok(())
    }

    fn all_codes(&self) -> impl Iterator<Item = &str> {
        self.indices
            .iter()
            .chain(self.us_etfs.iter())
            .chain(self.funds.iter())
            .chain(self.etf_groups.iter().flat_map(|g| g.members.iter()))
            .map(|i| i.code.as_str())
            .chain(self.breadth_indices.iter().map(|s| s.as_str()))
            .chain(
                self.constituents
                    .iter()
                    .flat_map(|(k, v)| std::iter::once(k).chain(v.iter()))
                    .map(|s| s.as_str()),
            )
    }

    /// Symbols to update for `dataset`, deduplicated, in config order.
    pub fn symbols(&self, dataset: DatasetKind) -> Result<Vec<Symbol>, ConfigError> {
        let codes: Vec<&str> = match dataset {
            DatasetKind::IndexDaily => self.indices.iter().map(|i| i.code.as_str()).collect(),
            DatasetKind::IndexConstituents => self
                .breadth_indices
                .iter()
                .chain(self.constituents.keys())
                .map(|k| k.as_str())
                .collect(),
            DatasetKind::Etf => self
                .etf_groups
                .iter()
                .flat_map(|g| g.members.iter().map(|i| i.code.as_str()))
                .collect(),
            DatasetKind::UsEtf => self.us_etfs.iter().map(|i| i.code.as_str()).collect(),
            DatasetKind::FundNav => self.funds.iter().map(|i| i.code.as_str()).collect(),
        };

        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for code in codes {
            if seen.insert(code) {
                out.push(Symbol::new(code)?);
            }
        }
        Ok(out)
    }

    /// Constituent lists keyed by index symbol.
    pub fn constituent_members(&self) -> Result<BTreeMap<Symbol, Vec<Symbol>>, ConfigError> {
        self.constituents
            .iter()
            .map(|(index, members)| {
                let members = members
                    .iter()
                    .map(|m| Symbol::new(m.as_str()))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((Symbol::new(index.as_str())?, members))
            })
            .collect()
    }

    /// Display name for an index code, falling back to the code.
    pub fn index_name<'a>(&'a self, code: &'a str) -> &'a str {
        self.indices
            .iter()
            .find(|i| i.code == code)
            .map(|i| i.label())
            .unwrap_or(code)
    }
}
