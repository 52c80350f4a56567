//! Env-driven runtime configuration for the binaries.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::loader::DEFAULT_CACHE_PATH;
use crate::source::GammaSourceConfig;

pub const DEFAULT_DASHBOARD_ADDR: &str = "127.0.0.1:8080";

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardConfig {
    pub cache_path: PathBuf,
    pub bind_addr: SocketAddr,
    pub use_demo: bool,
    pub gamma: GammaSourceConfig,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

pub fn dashboard_config_from_env() -> Result<DashboardConfig, ConfigError> {
    let cache_path = env_value("PMLENS_CACHE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_PATH));

    let bind_addr = parse_env("PMLENS_DASHBOARD_ADDR", |raw| raw.parse::<SocketAddr>())?
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8080)));

    let use_demo = parse_env("PMLENS_DASHBOARD_USE_DEMO", parse_flag)?.unwrap_or(false);

    Ok(DashboardConfig {
        cache_path,
        bind_addr,
        use_demo,
        gamma: gamma_config_from_env()?,
    })
}

pub fn gamma_config_from_env() -> Result<GammaSourceConfig, ConfigError> {
    let mut cfg = GammaSourceConfig::default();

    if let Some(base_url) = env_value("PMLENS_GAMMA_BASE_URL") {
        cfg.base_url = base_url;
    }
    if let Some(timeout_ms) = parse_env("PMLENS_HTTP_TIMEOUT_MS", |raw| raw.parse::<u64>())? {
        cfg.http_timeout_ms = timeout_ms;
    }
    if let Some(page_limit) = parse_env("PMLENS_PAGE_LIMIT", |raw| raw.parse::<usize>())? {
        if page_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "PMLENS_PAGE_LIMIT",
                value: page_limit.to_string(),
                reason: "must be >= 1".to_string(),
            });
        }
        cfg.page_limit = page_limit;
    }
    if let Some(min_liquidity) = parse_env("PMLENS_MIN_LIQUIDITY", |raw| raw.parse::<f64>())? {
        cfg.min_liquidity = min_liquidity;
    }
    if let Some(only_tradeable) = parse_env("PMLENS_ONLY_TRADEABLE", parse_flag)? {
        cfg.only_tradeable = only_tradeable;
    }

    Ok(cfg)
}

fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn parse_env<T, E>(
    key: &'static str,
    parse: impl FnOnce(&str) -> Result<T, E>,
) -> Result<Option<T>, ConfigError>
where
    E: std::fmt::Display,
{
    let Some(raw) = env_value(key) else {
        return Ok(None);
    };
    parse(&raw).map(Some).map_err(|err| ConfigError::InvalidValue {
        key,
        value: raw.clone(),
        reason: err.to_string(),
    })
}

pub(crate) fn parse_flag(raw: &str) -> Result<bool, String> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err("expected a boolean".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_env::with_env_vars;

    const ALL_KEYS: [&str; 8] = [
        "PMLENS_CACHE_PATH",
        "PMLENS_DASHBOARD_ADDR",
        "PMLENS_DASHBOARD_USE_DEMO",
        "PMLENS_GAMMA_BASE_URL",
        "PMLENS_HTTP_TIMEOUT_MS",
        "PMLENS_PAGE_LIMIT",
        "PMLENS_MIN_LIQUIDITY",
        "PMLENS_ONLY_TRADEABLE",
    ];

    fn cleared() -> Vec<(&'static str, Option<&'static str>)> {
        ALL_KEYS.iter().map(|key| (*key, None)).collect()
    }

    #[test]
    fn defaults_when_env_missing() {
        let cfg = with_env_vars(&cleared(), dashboard_config_from_env).unwrap();

        assert_eq!(cfg.cache_path, PathBuf::from(DEFAULT_CACHE_PATH));
        assert_eq!(cfg.bind_addr.to_string(), DEFAULT_DASHBOARD_ADDR);
        assert!(!cfg.use_demo);
        assert_eq!(cfg.gamma, GammaSourceConfig::default());
    }

    #[test]
    fn reads_overrides_and_ignores_blank_values() {
        let mut vars = cleared();
        vars.extend([
            ("PMLENS_CACHE_PATH", Some("/tmp/markets.csv")),
            ("PMLENS_DASHBOARD_ADDR", Some("0.0.0.0:9000")),
            ("PMLENS_DASHBOARD_USE_DEMO", Some("true")),
            ("PMLENS_PAGE_LIMIT", Some("50")),
            ("PMLENS_MIN_LIQUIDITY", Some("250.5")),
            ("PMLENS_ONLY_TRADEABLE", Some("0")),
            ("PMLENS_HTTP_TIMEOUT_MS", Some("  ")),
        ]);
        let cfg = with_env_vars(&vars, dashboard_config_from_env).unwrap();

        assert_eq!(cfg.cache_path, PathBuf::from("/tmp/markets.csv"));
        assert_eq!(cfg.bind_addr.port(), 9000);
        assert!(cfg.use_demo);
        assert_eq!(cfg.gamma.page_limit, 50);
        assert_eq!(cfg.gamma.min_liquidity, 250.5);
        assert!(!cfg.gamma.only_tradeable);
        assert_eq!(cfg.gamma.http_timeout_ms, 20_000);
    }

    #[test]
    fn rejects_invalid_values() {
        let mut vars = cleared();
        vars.push(("PMLENS_PAGE_LIMIT", Some("0")));
        let err = with_env_vars(&vars, dashboard_config_from_env).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "PMLENS_PAGE_LIMIT",
                ..
            }
        ));

        let mut vars = cleared();
        vars.push(("PMLENS_DASHBOARD_ADDR", Some("not-an-addr")));
        assert!(with_env_vars(&vars, dashboard_config_from_env).is_err());
    }
}
