//! Summary reports computed from stored tables.
//!
//! Reports only read the store; they never trigger a remote fetch.

use crate::config::{AppConfig, EtfGroup, Instrument};
use chrono::{Datelike, Months, NaiveDate};
use quantdesk_core::data::schema::{ACCUMULATED_NAV, NAV, PCT_CHANGE};
use quantdesk_core::data::{
    read_snapshot, DataError, DatasetKind, FundCategory, FundRankEntry, SeriesStore, SeriesTable,
    Symbol,
};
use quantdesk_core::stats::{pct_change, trailing_sum, BandSignal, DerivedStats, StatsConfig};
use serde::Serialize;
use std::cmp::Ordering;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to write {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed report file: {0}")]
    Format(String),
}

const SUMMARY_MA_WINDOW: usize = 30;
const SUMMARY_MIN_ROWS: usize = 3;
const WEEK_ROWS: usize = 5;
const MONTH_ROWS: usize = 30;

fn load(
    store: &dyn SeriesStore,
    dataset: DatasetKind,
    instrument: &Instrument,
) -> Result<Option<(Symbol, SeriesTable)>, ReportError> {
    let symbol = instrument.symbol()?;
    Ok(store.load(dataset, &symbol)?.map(|t| (symbol, t)))
}

// ── Index summary ────────────────────────────────────────────────────

/// Latest-day snapshot for one index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexSummary {
    pub date: NaiveDate,
    pub name: String,
    pub code: String,
    pub close: f64,
    pub pct_change: f64,
    pub prev_close: f64,
    pub close_two_back: f64,
    pub ma30: f64,
    pub band: (f64, f64),
    pub signal: BandSignal,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Snapshot for one stored index table; `None` below three rows.
pub fn summarize_index(
    name: &str,
    code: &str,
    table: &SeriesTable,
    stats: &StatsConfig,
) -> Result<Option<IndexSummary>, ReportError> {
    if table.len() < SUMMARY_MIN_ROWS {
        return Ok(None);
    }

    let mut config = stats.clone();
    if !config.windows.contains(&SUMMARY_MA_WINDOW) {
        config.windows.push(SUMMARY_MA_WINDOW);
    }
    let derived = DerivedStats::compute(table, &config)?;
    let (Some(latest), Some(prev), Some(two_back)) =
        (derived.back(0), derived.back(1), derived.back(2))
    else {
        return Ok(None);
    };

    Ok(Some(IndexSummary {
        date: latest.date,
        name: name.to_string(),
        code: code.to_string(),
        close: latest.close,
        pct_change: latest.pct_change,
        prev_close: prev.close,
        close_two_back: two_back.close,
        ma30: latest.moving_average(SUMMARY_MA_WINDOW).unwrap_or(f64::NAN),
        band: (round2(latest.lower), round2(latest.upper)),
        signal: latest.signal,
    }))
}

/// Index summary for every configured summary index with enough history.
pub fn index_summary(
    store: &dyn SeriesStore,
    config: &AppConfig,
) -> Result<Vec<IndexSummary>, ReportError> {
    let mut out = Vec::new();
    for code in &config.report.summary_indices {
        let instrument = Instrument::new(code, config.index_name(code));
        let Some((_, table)) = load(store, DatasetKind::IndexDaily, &instrument)? else {
            tracing::warn!(code = %code, "index not stored, skipped in summary");
            continue;
        };
        match summarize_index(instrument.label(), code, &table, &config.stats)? {
            Some(summary) => out.push(summary),
            None => tracing::warn!(code = %code, rows = table.len(), "too few rows for summary"),
        }
    }
    Ok(out)
}

// ── ETF group summary ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EtfSummary {
    pub name: String,
    pub code: String,
    pub close: f64,
    pub day_change: f64,
    /// Sum of the last 5 daily percent changes.
    pub week_change: f64,
    /// Sum of the last 30 daily percent changes.
    pub month_change: f64,
}

/// Daily percent changes: the source's own column, computed where absent.
fn daily_changes(table: &SeriesTable) -> Vec<f64> {
    let computed = pct_change(&table.column(table.dataset().schema().primary));
    table
        .column(PCT_CHANGE)
        .into_iter()
        .zip(computed)
        .map(|(given, computed)| if given.is_nan() { computed } else { given })
        .collect()
}

pub fn summarize_etf(instrument: &Instrument, table: &SeriesTable) -> Option<EtfSummary> {
    let primary = table.dataset().schema().primary;
    let close = table.rows().next_back()?.get(primary)?;
    let changes = daily_changes(table);
    Some(EtfSummary {
        name: instrument.label().to_string(),
        code: instrument.code.clone(),
        close,
        day_change: changes.last().copied().unwrap_or(f64::NAN),
        week_change: trailing_sum(&changes, WEEK_ROWS),
        month_change: trailing_sum(&changes, MONTH_ROWS),
    })
}

/// One group's summaries, sorted by 1-week change descending.
pub fn etf_group_summary(
    store: &dyn SeriesStore,
    group: &EtfGroup,
) -> Result<Vec<EtfSummary>, ReportError> {
    let mut out = Vec::new();
    for instrument in &group.members {
        let Some((_, table)) = load(store, DatasetKind::Etf, instrument)? else {
            tracing::warn!(code = %instrument.code, group = %group.name, "ETF not stored");
            continue;
        };
        if let Some(summary) = summarize_etf(instrument, &table) {
            out.push(summary);
        }
    }
    out.sort_by(|a, b| b.week_change.total_cmp(&a.week_change));
    Ok(out)
}

// ── Fund ranking ─────────────────────────────────────────────────────

/// Trailing returns (percent) for one fund.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FundReturns {
    pub code: String,
    pub name: String,
    pub date: NaiveDate,
    pub nav: f64,
    pub one_month: Option<f64>,
    pub one_year: Option<f64>,
    pub three_year: Option<f64>,
    pub year_to_date: Option<f64>,
    pub since_inception: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FundRanking {
    pub top: Vec<FundReturns>,
    pub tail: Vec<FundReturns>,
}

/// Value on the last date at or before `date`.
fn value_at(points: &[(NaiveDate, f64)], date: NaiveDate) -> Option<f64> {
    let idx = points.partition_point(|(d, _)| *d <= date);
    idx.checked_sub(1).map(|i| points[i].1)
}

fn pct_return(from: Option<f64>, to: f64) -> Option<f64> {
    from.filter(|v| *v != 0.0).map(|v| (to / v - 1.0) * 100.0)
}

/// Returns over the standard horizons from one NAV series: accumulated NAV
/// when every row has it, unit NAV otherwise.
pub fn fund_returns(instrument: &Instrument, table: &SeriesTable) -> Option<FundReturns> {
    let field = if table.rows().all(|r| r.get(ACCUMULATED_NAV).is_some()) {
        ACCUMULATED_NAV
    } else {
        NAV
    };
    let points: Vec<(NaiveDate, f64)> = table
        .rows()
        .filter_map(|r| Some((r.date, r.get(field)?)))
        .collect();
    let &(latest_date, latest) = points.last()?;
    let &(_, first) = points.first()?;
    let nav = table.rows().next_back()?.get(NAV).unwrap_or(latest);

    let months_back = |m: u32| {
        latest_date
            .checked_sub_months(Months::new(m))
            .and_then(|d| value_at(&points, d))
    };
    let year_start = NaiveDate::from_ymd_opt(latest_date.year() - 1, 12, 31)
        .and_then(|d| value_at(&points, d))
        .or(Some(first));

    Some(FundReturns {
        code: instrument.code.clone(),
        name: instrument.name.clone(),
        date: latest_date,
        nav,
        one_month: pct_return(months_back(1), latest),
        one_year: pct_return(months_back(12), latest),
        three_year: pct_return(months_back(36), latest),
        year_to_date: pct_return(year_start, latest),
        since_inception: pct_return(Some(first), latest),
    })
}

/// Sort descending by `key` and slice the first and last `size` rows.
fn top_and_tail<T: Clone>(
    mut rows: Vec<T>,
    size: usize,
    key: impl Fn(&T) -> f64,
) -> (Vec<T>, Vec<T>) {
    rows.sort_by(|a, b| key(b).partial_cmp(&key(a)).unwrap_or(Ordering::Equal));
    let tail_start = rows.len().saturating_sub(size);
    let tail = rows[tail_start..].to_vec();
    rows.truncate(size);
    (rows, tail)
}

/// Sort by year-to-date return (missing counts as 0) and slice top/tail.
pub fn rank_funds(funds: Vec<FundReturns>, size: usize) -> FundRanking {
    let (top, tail) = top_and_tail(funds, size, |f| f.year_to_date.unwrap_or(0.0));
    FundRanking { top, tail }
}

pub fn fund_ranking(
    store: &dyn SeriesStore,
    config: &AppConfig,
) -> Result<FundRanking, ReportError> {
    let mut funds = Vec::new();
    for instrument in &config.funds {
        let Some((_, table)) = load(store, DatasetKind::FundNav, instrument)? else {
            tracing::warn!(code = %instrument.code, "fund not stored, skipped in ranking");
            continue;
        };
        if let Some(returns) = fund_returns(instrument, &table) {
            funds.push(returns);
        }
    }
    Ok(rank_funds(funds, config.report.ranking_size))
}

// ── Category fund ranking ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryRanking {
    pub category: FundCategory,
    pub top: Vec<FundRankEntry>,
    pub tail: Vec<FundRankEntry>,
}

/// Class C share names carry a `C`; any `c` in the name excludes the fund.
fn is_class_c(name: &str) -> bool {
    name.chars().any(|c| c.eq_ignore_ascii_case(&'c'))
}

/// Drop class C shares, fill missing year-to-date returns with 0, sort by
/// year-to-date return and slice top/tail.
pub fn category_ranking(
    category: FundCategory,
    entries: Vec<FundRankEntry>,
    size: usize,
) -> CategoryRanking {
    let entries: Vec<FundRankEntry> = entries
        .into_iter()
        .filter(|e| !is_class_c(&e.name))
        .map(|mut e| {
            e.year_to_date.get_or_insert(0.0);
            e
        })
        .collect();
    let (top, tail) = top_and_tail(entries, size, |e| e.year_to_date.unwrap_or(0.0));
    CategoryRanking {
        category,
        top,
        tail,
    }
}

/// Rankings for every configured category with a stored snapshot under
/// `store_root`.
pub fn category_rankings(
    store_root: &Path,
    config: &AppConfig,
) -> Result<Vec<CategoryRanking>, ReportError> {
    let mut rankings = Vec::new();
    for &category in &config.report.fund_categories {
        let Some(snapshot) = read_snapshot(store_root, category)? else {
            tracing::warn!(%category, "no fund ranking snapshot, category skipped");
            continue;
        };
        tracing::debug!(
            %category,
            as_of = %snapshot.as_of,
            funds = snapshot.entries.len(),
            "fund ranking snapshot"
        );
        rankings.push(category_ranking(
            category,
            snapshot.entries,
            config.report.ranking_size,
        ));
    }
    Ok(rankings)
}
