//! pmlens: explore active Polymarket markets.
//!
//! Markets are pulled from the Gamma `/events` API, flattened into
//! [`MarketRecord`]s, enriched with derived features, cached as CSV and
//! served by a small HTML dashboard.

mod config;
mod dashboard;
mod features;
mod filters;
mod loader;
mod observability;
mod record;
mod snapshot_csv;
mod source;
#[cfg(test)]
mod test_env;
mod views;

pub use config::{
    dashboard_config_from_env, gamma_config_from_env, ConfigError, DashboardConfig,
    DEFAULT_DASHBOARD_ADDR,
};
pub use dashboard::{
    dashboard_router, demo_snapshot, CachedSnapshotProvider, DashboardError,
    InMemorySnapshotProvider, SnapshotProvider,
};
pub use features::{
    derive, derive_all, looks_binary, quality_score, DerivedFields, Domain, DomainFlags,
    EnrichedMarketRecord, QualityBasis, QUALITY_SCORE_VERSION,
};
pub use filters::{apply, FilterParseError, FilterSpec, NumericRange};
pub use loader::{
    LoadError, LoadOutcome, LoadStatus, Snapshot, SnapshotCache, DEFAULT_CACHE_PATH,
};
pub use observability::{
    init_logging, log_app_bind, log_app_start, log_load_outcome, log_source_selected,
    logging_config_from_env, LogFormat, LoggingConfig, LoggingInitError,
};
pub use record::{
    format_timestamp, market_url, parse_timestamp, MalformedRecord, MarketRecord, MarketStatus,
};
pub use snapshot_csv::{
    read_snapshot_csv, snapshot_csv_bytes, snapshot_header, write_atomic, write_snapshot_csv,
    MalformedRow, SnapshotIoError, SnapshotTable, DERIVED_COLUMNS, FETCHED_AT_COLUMN, RAW_COLUMNS,
};
pub use source::{
    FetchReport, GammaEventsSource, GammaSourceConfig, MarketSource, SourceBatch, SourceError,
    StaticMarketSource, UnreachableMarketSource, GAMMA_API_BASE_URL,
};
pub use views::{
    alpha_score, domain_explorer, drilldown, histogram, median, overview, percentile, screener,
    screener_score, trimmed_histogram, DomainCount, DomainDetail, DomainExplorerView, DomainStats,
    Drilldown, Histogram, HistogramBin, OverviewView, ScreenerDomainStat, ScreenerOptions,
    ScreenerRow, ScreenerSort, ScreenerToggles, ScreenerView, DOMAIN_ROW_LIMIT, HISTOGRAM_BINS,
    OVERVIEW_ROW_LIMIT,
};
