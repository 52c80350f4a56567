//! Refreshes the CSV cache from the Gamma API.
//!
//! Usage: `fetch_markets [CACHE_PATH]`. Without a path the cache location
//! comes from `PMLENS_CACHE_PATH` or the default file name. Exits with an
//! error when the fetch fails, even if an older cache was kept.

use std::path::PathBuf;

use pmlens::{
    dashboard_config_from_env, init_logging, log_app_start, log_load_outcome,
    logging_config_from_env, GammaEventsSource, SnapshotCache,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start("fetch_markets", &logging_cfg);

    let cfg = dashboard_config_from_env()?;
    let cache_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or(cfg.cache_path);

    let cache = SnapshotCache::new(cache_path);
    let source = GammaEventsSource::new(cfg.gamma);
    let outcome = cache.load(true, &source)?;
    log_load_outcome("fetch_markets", &outcome);
    outcome.require_fresh()?;

    Ok(())
}
