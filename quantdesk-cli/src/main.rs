//! QuantDesk CLI: market data update, reports, and store inspection.
//!
//! Commands:
//! - `update`: incrementally sync configured datasets from Eastmoney into the store
//!   and refresh the category fund rankings
//! - `report`: write index, ETF group and fund ranking CSVs from the store
//! - `stats`: print moving averages and band signals for one stored series
//! - `breadth`: print market breadth for an index's stored constituents
//! - `status`: report stored symbols, date ranges and row counts

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use quantdesk_core::data::{
    DatasetKind, DateRange, LogProgress, ParquetStore, SeriesStore, Symbol,
};
use quantdesk_core::stats::{market_breadth, DerivedStats};
use quantdesk_runner::{
    run_fund_rank_update, run_update, store_status, write_reports, AppConfig,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "quantdesk.toml";

#[derive(Parser)]
#[command(
    name = "quantdesk",
    about = "QuantDesk CLI: incremental market data store and daily review reports"
)]
struct Cli {
    /// Path to a TOML config file. Defaults to ./quantdesk.toml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging (overridden by RUST_LOG).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum DatasetArg {
    Index,
    Constituents,
    Etf,
    UsEtf,
    Fund,
    /// Market-wide fund rankings per category (not a stored series).
    FundRank,
}

impl DatasetArg {
    fn kind(self) -> Option<DatasetKind> {
        match self {
            DatasetArg::Index => Some(DatasetKind::IndexDaily),
            DatasetArg::Constituents => Some(DatasetKind::IndexConstituents),
            DatasetArg::Etf => Some(DatasetKind::Etf),
            DatasetArg::UsEtf => Some(DatasetKind::UsEtf),
            DatasetArg::Fund => Some(DatasetKind::FundNav),
            DatasetArg::FundRank => None,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Sync configured datasets from the remote source into the store.
    Update {
        /// Datasets to update. Defaults to all.
        #[arg(long = "dataset", value_enum)]
        datasets: Vec<DatasetArg>,

        /// Start date (YYYY-MM-DD). Defaults to the config's start date.
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD). Defaults to yesterday.
        #[arg(long)]
        end: Option<String>,

        /// Skip writing reports after the update.
        #[arg(long, default_value_t = false)]
        no_report: bool,
    },
    /// Write summary reports from the stored data.
    Report,
    /// Print derived statistics for one stored series.
    Stats {
        /// Symbol code (e.g. 000300, 510300, 105.QQQ).
        symbol: String,

        #[arg(long, value_enum, default_value = "index")]
        dataset: DatasetArg,

        /// Number of most recent rows to print.
        #[arg(long, default_value_t = 10)]
        last: usize,
    },
    /// Print market breadth for an index with stored constituents.
    Breadth {
        /// Index code.
        index: String,

        /// Number of most recent dates to print.
        #[arg(long, default_value_t = 10)]
        last: usize,
    },
    /// Report stored symbols per dataset.
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Update {
            datasets,
            start,
            end,
            no_report,
        } => run_update_cmd(&config, datasets, start, end, no_report),
        Commands::Report => run_report(&config),
        Commands::Stats {
            symbol,
            dataset,
            last,
        } => {
            let Some(kind) = dataset.kind() else {
                bail!("fund rankings are not a series; see the fund_rank_* reports");
            };
            run_stats(&config, &symbol, kind, last)
        }
        Commands::Breadth { index, last } => run_breadth(&config, &index, last),
        Commands::Status => run_status(&config),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(p) => Ok(AppConfig::load(p)?),
        None if Path::new(DEFAULT_CONFIG).exists() => {
            Ok(AppConfig::load(Path::new(DEFAULT_CONFIG))?)
        }
        None => {
            tracing::info!("no config file, using built-in defaults");
            Ok(AppConfig::default())
        }
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid date '{s}'"))
}

fn run_update_cmd(
    config: &AppConfig,
    datasets: Vec<DatasetArg>,
    start: Option<String>,
    end: Option<String>,
    no_report: bool,
) -> Result<()> {
    let today = chrono::Local::now().date_naive();
    let start = start
        .as_deref()
        .map(parse_date)
        .transpose()?
        .unwrap_or(config.sync.start_date);
    let end = end
        .as_deref()
        .map(parse_date)
        .transpose()?
        .unwrap_or_else(|| config.sync.end_date(today));
    let range = DateRange::new(start, end)?;

    let (kinds, fund_rank): (Vec<DatasetKind>, bool) = if datasets.is_empty() {
        (DatasetKind::ALL.to_vec(), true)
    } else {
        (
            datasets.iter().filter_map(|d| d.kind()).collect(),
            datasets.iter().any(|d| matches!(d, DatasetArg::FundRank)),
        )
    };

    let summaries = if kinds.is_empty() {
        Vec::new()
    } else {
        run_update(config, &kinds, range, &LogProgress)?
    };

    let mut failed = 0;
    for summary in &summaries {
        println!(
            "{:<20} {:>4} ok  {:>4} failed  ({} total)",
            summary.dataset.to_string(),
            summary.succeeded,
            summary.failed,
            summary.total
        );
        for (sym, err) in &summary.errors {
            eprintln!("Error for {sym}: {err}");
        }
        failed += summary.failed;
    }

    if fund_rank {
        let ranks = run_fund_rank_update(config, today)?;
        println!(
            "{:<20} {:>4} ok  {:>4} failed  ({} total)",
            "fund_rank",
            ranks.stored.len(),
            ranks.errors.len(),
            ranks.stored.len() + ranks.errors.len()
        );
        for (category, err) in &ranks.errors {
            eprintln!("Error for {category}: {err}");
        }
        failed += ranks.errors.len();
    }

    if !no_report {
        run_report(config)?;
    }

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn run_report(config: &AppConfig) -> Result<()> {
    let store = ParquetStore::new(&config.store.root);
    let written = write_reports(config, &store)?;
    for path in written {
        println!("Report written: {}", path.display());
    }
    Ok(())
}

fn fmt_num(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.2}")
    } else {
        "-".to_string()
    }
}

fn run_stats(config: &AppConfig, symbol: &str, dataset: DatasetKind, last: usize) -> Result<()> {
    if dataset.is_multi_entity() {
        bail!("stats need a single-series dataset; use `breadth` for constituents");
    }
    let store = ParquetStore::new(&config.store.root);
    let symbol = Symbol::new(symbol)?;
    let Some(table) = store.load(dataset, &symbol)? else {
        bail!("{symbol} has no stored {dataset} data; run `quantdesk update` first");
    };

    let stats = DerivedStats::compute(&table, &config.stats)?;
    let windows = &config.stats.windows;

    let mut header = format!("{:<12} {:>10} {:>8}", "Date", "Close", "Chg%");
    for w in windows {
        header.push_str(&format!(" {:>10}", format!("MA{w}")));
    }
    header.push_str(&format!(" {:>21} {:>15}", "Band", "Signal"));
    println!("{symbol} ({dataset}, {} rows)", stats.len());
    println!("{header}");
    println!("{}", "-".repeat(header.len()));

    let skip = stats.len().saturating_sub(last);
    for row in &stats.rows()[skip..] {
        let mut line = format!(
            "{:<12} {:>10} {:>8}",
            row.date.to_string(),
            fmt_num(row.close),
            fmt_num(row.pct_change)
        );
        for w in windows {
            line.push_str(&format!(" {:>10}", fmt_num(row.moving_average(*w).unwrap_or(f64::NAN))));
        }
        line.push_str(&format!(
            " {:>21} {:>15}",
            format!("({}, {})", fmt_num(row.lower), fmt_num(row.upper)),
            row.signal.label()
        ));
        println!("{line}");
    }
    Ok(())
}

fn run_breadth(config: &AppConfig, index: &str, last: usize) -> Result<()> {
    let store = ParquetStore::new(&config.store.root);
    let symbol = Symbol::new(index)?;
    let Some(table) = store.load(DatasetKind::IndexConstituents, &symbol)? else {
        bail!(
            "{symbol} has no stored constituents; \
             run `quantdesk update --dataset constituents` first"
        );
    };

    let windows = &config.stats.breadth_windows;
    let rows = market_breadth(&table, windows)?;

    let mut header = format!("{:<12} {:>8}", "Date", "Members");
    for w in windows {
        header.push_str(&format!(" {:>10}", format!(">MA{w}")));
    }
    println!("{}", header);
    println!("{}", "-".repeat(header.len()));

    let skip = rows.len().saturating_sub(last);
    for row in &rows[skip..] {
        let mut line = format!("{:<12} {:>8}", row.date.to_string(), row.total);
        for w in windows {
            let pct = row.pct_above(*w).unwrap_or(f64::NAN);
            line.push_str(&format!(" {:>9}%", fmt_num(pct)));
        }
        println!("{line}");
    }
    Ok(())
}

fn run_status(config: &AppConfig) -> Result<()> {
    let store = ParquetStore::new(&config.store.root);
    println!("Store: {}", store.root().display());

    for (dataset, statuses) in store_status(config, &store)? {
        if statuses.is_empty() {
            continue;
        }
        let stored = statuses.iter().filter(|s| s.stored).count();
        println!();
        println!("{dataset}: {stored}/{} stored", statuses.len());
        println!("{:<12} {:<25} {:>8}", "Symbol", "Date Range", "Rows");
        println!("{}", "-".repeat(47));
        for s in statuses {
            let range = match (s.first_date, s.watermark) {
                (Some(a), Some(b)) => format!("{a} to {b}"),
                _ => "not stored".to_string(),
            };
            let rows = s.row_count.map(|n| n.to_string()).unwrap_or_default();
            println!("{:<12} {:<25} {:>8}", s.symbol.as_str(), range, rows);
        }
    }
    Ok(())
}
