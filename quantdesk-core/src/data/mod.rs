//! Market data: series model, schemas, remote providers, Parquet store,
//! incremental fetch-merge engine, batch updater and fund rankings.

pub mod circuit_breaker;
pub mod constituents;
pub mod eastmoney;
pub mod fund;
pub mod fund_rank;
pub mod http;
pub mod provider;
pub mod schema;
pub mod series;
pub mod sina;
pub mod store;
pub mod sync;
pub mod update;

pub use circuit_breaker::CircuitBreaker;
pub use constituents::{ConstituentProvider, FallbackMembership, MembershipSource};
pub use eastmoney::{AssetClass, EastmoneyKlineProvider};
pub use fund::EastmoneyFundNavProvider;
pub use fund_rank::{
    read_snapshot, write_snapshot, EastmoneyFundRankSource, FundCategory, FundRankEntry,
    FundRankSnapshot, FundRankSource,
};
pub use http::{Envelope, HttpClient, RetryPolicy};
pub use provider::{DataError, DataProvider, DataSource, FetchResult, LogProgress, SyncProgress};
pub use schema::{DatasetKind, DatasetSchema};
pub use series::{DateRange, Period, RowKey, SeriesRow, SeriesTable, Symbol};
pub use sina::SinaMembership;
pub use store::{ParquetStore, SeriesStore, StoreMeta, StoreStatus};
pub use sync::{plan_fetch, SyncEngine, SyncOutcome};
pub use update::{update_all, UpdateSummary};
