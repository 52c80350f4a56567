//! Logging setup and the lifecycle events every binary emits.

use std::env;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;

use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::parse_flag;
use crate::loader::LoadOutcome;

const LEVEL_VAR: &str = "PMLENS_LOG_LEVEL";
const FORMAT_VAR: &str = "PMLENS_LOG_FORMAT";
const TARGET_VAR: &str = "PMLENS_LOG_TARGET";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `pmlens=debug`.
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Unset, blank or unparseable variables keep their defaults.
pub fn logging_config_from_env() -> LoggingConfig {
    let defaults = LoggingConfig::default();
    let var = |key: &str| {
        env::var(key)
            .ok()
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
    };

    LoggingConfig {
        level: var(LEVEL_VAR).unwrap_or(defaults.level),
        format: var(FORMAT_VAR)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(defaults.format),
        include_target: var(TARGET_VAR)
            .and_then(|raw| parse_flag(&raw).ok())
            .unwrap_or(defaults.include_target),
    }
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.include_target)
        .with_ansi(config.format == LogFormat::Pretty);

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }
    Ok(())
}

pub fn log_app_start(component: &'static str, config: &LoggingConfig) {
    info!(
        component,
        event = "app.start",
        version = env!("CARGO_PKG_VERSION"),
        log_level = %config.level,
        log_format = ?config.format,
        include_target = config.include_target
    );
}

pub fn log_app_bind(bound_addr: SocketAddr) {
    info!(
        component = "dashboard_server",
        event = "app.bind",
        bind_addr = %bound_addr,
        routes = "/dashboard, /dashboard/domains, /dashboard/screener"
    );
}

/// Missing `reason` / `cache_path` are logged as `-`.
pub fn log_source_selected(source: &str, reason: Option<&str>, cache_path: Option<&Path>) {
    let cache_path = cache_path.map_or_else(|| "-".to_string(), |p| p.display().to_string());
    info!(
        component = "dashboard_server",
        event = "source.selected",
        source,
        reason = reason.unwrap_or("-"),
        cache_path = %cache_path
    );
}

/// One summary line per completed load, whatever its status.
pub fn log_load_outcome(component: &'static str, outcome: &LoadOutcome) {
    let report = outcome.fetch_report.as_ref();
    info!(
        component,
        event = "load.outcome",
        status = outcome.status.as_str(),
        reason = outcome.status.reason().unwrap_or("-"),
        rows = outcome.snapshot.records.len(),
        malformed_skipped = outcome.malformed_skipped,
        pages = report.map_or(0, |r| r.pages),
        filtered_out = report.map_or(0, |r| r.filtered_out),
        fetched_at = %outcome.snapshot.fetched_at
    );
}
