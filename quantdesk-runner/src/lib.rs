//! QuantDesk Runner: configuration, update orchestration, reports.
//!
//! This crate builds on `quantdesk-core` to provide:
//! - TOML application config with the default instrument lists
//! - Dataset-by-dataset update runs against the Parquet store
//! - Market-wide fund ranking snapshots per category
//! - Index, ETF group and fund ranking summaries
//! - CSV report export and reload

pub mod config;
pub mod export;
pub mod pipeline;
pub mod report;

pub use config::{AppConfig, ConfigError, EtfGroup, Instrument};
pub use export::{read_report_csv, write_report_csv, ReportRecord, ReportTable};
pub use pipeline::{
    run_fund_rank_update, run_update, store_status, update_datasets, update_fund_rankings,
    write_reports, RankSummary,
};
pub use report::{
    category_ranking, category_rankings, etf_group_summary, fund_ranking, index_summary,
    CategoryRanking, EtfSummary, FundRanking, FundReturns, IndexSummary, ReportError,
};
