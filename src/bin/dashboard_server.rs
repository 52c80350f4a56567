use std::sync::Arc;

use pmlens::{
    dashboard_config_from_env, dashboard_router, init_logging, log_app_bind, log_app_start,
    log_source_selected, logging_config_from_env, CachedSnapshotProvider, GammaEventsSource,
    InMemorySnapshotProvider, SnapshotCache, SnapshotProvider,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start("dashboard_server", &logging_cfg);

    let cfg = dashboard_config_from_env()?;

    let provider: Arc<dyn SnapshotProvider> = if cfg.use_demo {
        log_source_selected("demo", Some("PMLENS_DASHBOARD_USE_DEMO"), None);
        Arc::new(InMemorySnapshotProvider::demo())
    } else {
        log_source_selected("gamma_events", None, Some(&cfg.cache_path));
        Arc::new(CachedSnapshotProvider::new(
            SnapshotCache::new(&cfg.cache_path),
            Arc::new(GammaEventsSource::new(cfg.gamma.clone())),
        ))
    };

    let app = dashboard_router(provider);
    let listener = tokio::net::TcpListener::bind(cfg.bind_addr).await?;
    let bound_addr = listener.local_addr()?;

    log_app_bind(bound_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
