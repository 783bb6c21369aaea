//! Full update run: build providers per dataset, sync every configured
//! symbol, refresh the category fund rankings, then write the CSV reports.

use crate::config::AppConfig;
use crate::export::write_report_csv;
use crate::report::{
    category_rankings, etf_group_summary, fund_ranking, index_summary, ReportError,
};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use quantdesk_core::data::{
    update_all, write_snapshot, AssetClass, CircuitBreaker, ConstituentProvider, DataError,
    DataProvider, DatasetKind, DateRange, EastmoneyFundNavProvider, EastmoneyFundRankSource,
    EastmoneyKlineProvider, FallbackMembership, FundCategory, FundRankSnapshot, FundRankSource,
    HttpClient, ParquetStore, SeriesStore, SinaMembership, StoreStatus, SyncEngine, SyncProgress,
    UpdateSummary,
};
use std::path::PathBuf;
use std::sync::Arc;

pub const INDEX_SUMMARY_FILE: &str = "index_summary.csv";
pub const FUND_TOP_FILE: &str = "fund_ranking_top.csv";
pub const FUND_TAIL_FILE: &str = "fund_ranking_tail.csv";

pub fn etf_group_file(n: usize) -> String {
    format!("etf_group_{n}.csv")
}

/// `fund_rank_{category}_{part}.csv`, `part` being `top` or `tail`.
pub fn fund_rank_file(category: FundCategory, part: &str) -> String {
    format!("fund_rank_{}_{part}.csv", category.slug())
}

/// Shared client honouring the configured retry schedule.
pub fn http_client(config: &AppConfig) -> Result<HttpClient> {
    let breaker = Arc::new(CircuitBreaker::default_provider());
    Ok(HttpClient::new(breaker)?.with_retries(config.sync.retry_policy()))
}

/// Eastmoney-backed provider for `dataset`.
pub fn eastmoney_provider(
    dataset: DatasetKind,
    http: &HttpClient,
    config: &AppConfig,
) -> Result<Box<dyn DataProvider>> {
    let provider: Box<dyn DataProvider> = match dataset {
        DatasetKind::IndexDaily => {
            Box::new(EastmoneyKlineProvider::new(http.clone(), AssetClass::Index))
        }
        DatasetKind::Etf | DatasetKind::UsEtf => {
            Box::new(EastmoneyKlineProvider::new(http.clone(), AssetClass::Equity))
        }
        DatasetKind::IndexConstituents => Box::new(ConstituentProvider::new(
            EastmoneyKlineProvider::new(http.clone(), AssetClass::Equity),
            FallbackMembership::new(
                SinaMembership::new(http.clone()),
                config.constituent_members()?,
            ),
        )),
        DatasetKind::FundNav => Box::new(EastmoneyFundNavProvider::new(http.clone())),
    };
    Ok(provider)
}

/// Sync every configured symbol of each dataset, in order.
///
/// A dataset whose provider cannot be built is an error; per-symbol
/// failures are collected in the summaries.
pub fn update_datasets<F>(
    config: &AppConfig,
    store: &dyn SeriesStore,
    datasets: &[DatasetKind],
    range: DateRange,
    mut provider_for: F,
    progress: &dyn SyncProgress,
) -> Result<Vec<UpdateSummary>>
where
    F: FnMut(DatasetKind) -> Result<Box<dyn DataProvider>>,
{
    let mut summaries = Vec::with_capacity(datasets.len());
    for &dataset in datasets {
        let symbols = config.symbols(dataset)?;
        if symbols.is_empty() {
            tracing::info!(%dataset, "no symbols configured, skipping");
            continue;
        }

        let provider = provider_for(dataset)
            .with_context(|| format!("failed to build provider for {dataset}"))?;
        let engine = SyncEngine::new(dataset, provider.as_ref(), store);
        tracing::info!(%dataset, symbols = symbols.len(), %range, "updating dataset");
        summaries.push(update_all(
            &engine,
            &symbols,
            range,
            config.sync.period,
            progress,
        ));
    }
    Ok(summaries)
}

/// Live update against Eastmoney into the configured Parquet store.
pub fn run_update(
    config: &AppConfig,
    datasets: &[DatasetKind],
    range: DateRange,
    progress: &dyn SyncProgress,
) -> Result<Vec<UpdateSummary>> {
    let store = ParquetStore::new(&config.store.root);
    let http = http_client(config)?;
    update_datasets(
        config,
        &store,
        datasets,
        range,
        |dataset| eastmoney_provider(dataset, &http, config),
        progress,
    )
}

/// Outcome of a category ranking refresh.
#[derive(Debug, Default)]
pub struct RankSummary {
    pub stored: Vec<(FundCategory, usize)>,
    pub errors: Vec<(FundCategory, DataError)>,
}

/// Fetch every configured category and store it as a snapshot. A failed
/// category keeps its previous snapshot.
pub fn update_fund_rankings(
    config: &AppConfig,
    source: &dyn FundRankSource,
    as_of: NaiveDate,
) -> RankSummary {
    let mut summary = RankSummary::default();
    for &category in &config.report.fund_categories {
        let result = source.ranking(category, as_of).and_then(|entries| {
            let funds = entries.len();
            let snapshot = FundRankSnapshot {
                category,
                as_of,
                entries,
            };
            write_snapshot(&config.store.root, &snapshot).map(|_| funds)
        });
        match result {
            Ok(funds) => summary.stored.push((category, funds)),
            Err(e) => {
                tracing::error!(%category, error = %e, "fund ranking update failed");
                summary.errors.push((category, e));
            }
        }
    }
    summary
}

/// Live category ranking refresh against Eastmoney.
pub fn run_fund_rank_update(config: &AppConfig, as_of: NaiveDate) -> Result<RankSummary> {
    let source = EastmoneyFundRankSource::new(http_client(config)?);
    Ok(update_fund_rankings(config, &source, as_of))
}

/// Write every report into `config.report.output_dir`; returns the paths.
pub fn write_reports(
    config: &AppConfig,
    store: &dyn SeriesStore,
) -> Result<Vec<PathBuf>, ReportError> {
    let dir = &config.report.output_dir;
    let mut written = Vec::new();

    let path = dir.join(INDEX_SUMMARY_FILE);
    write_report_csv(&path, &index_summary(store, config)?)?;
    written.push(path);

    for (i, group) in config.etf_groups.iter().enumerate() {
        let path = dir.join(etf_group_file(i + 1));
        write_report_csv(&path, &etf_group_summary(store, group)?)?;
        written.push(path);
    }

    if !config.funds.is_empty() {
        let ranking = fund_ranking(store, config)?;
        let top = dir.join(FUND_TOP_FILE);
        write_report_csv(&top, &ranking.top)?;
        let tail = dir.join(FUND_TAIL_FILE);
        write_report_csv(&tail, &ranking.tail)?;
        written.extend([top, tail]);
    }

    for ranking in category_rankings(&config.store.root, config)? {
        let top = dir.join(fund_rank_file(ranking.category, "top"));
        write_report_csv(&top, &ranking.top)?;
        let tail = dir.join(fund_rank_file(ranking.category, "tail"));
        write_report_csv(&tail, &ranking.tail)?;
        written.extend([top, tail]);
    }

    Ok(written)
}

/// Store status for every configured symbol, per dataset.
pub fn store_status(
    config: &AppConfig,
    store: &ParquetStore,
) -> Result<Vec<(DatasetKind, Vec<StoreStatus>)>> {
    DatasetKind::ALL
        .iter()
        .map(|&dataset| -> Result<(DatasetKind, Vec<StoreStatus>)> {
            Ok((dataset, store.status(dataset, &config.symbols(dataset)?)))
        })
        .collect()
}
