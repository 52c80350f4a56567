//! Cache-or-fetch policy for the enriched snapshot CSV.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::features::{derive_all, EnrichedMarketRecord};
use crate::record::MarketRecord;
use crate::snapshot_csv::{read_snapshot_csv, snapshot_csv_bytes, write_atomic, SnapshotIoError};
use crate::source::{FetchReport, MarketSource};

pub const DEFAULT_CACHE_PATH: &str = "polymarket_active_markets_enriched.csv";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub fetched_at: DateTime<Utc>,
    pub records: Vec<EnrichedMarketRecord>,
}

impl Snapshot {
    /// Derives every record against the fetch timestamp.
    pub fn from_raw(fetched_at: DateTime<Utc>, records: &[MarketRecord]) -> Self {
        Self {
            fetched_at,
            records: derive_all(records, fetched_at),
        }
    }

    pub fn empty(fetched_at: DateTime<Utc>) -> Self {
        Self {
            fetched_at,
            records: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoadStatus {
    Cached,
    Fetched,
    /// Refresh failed; the previous cache is being served.
    Stale { reason: String },
    /// Nothing could be loaded; the snapshot is empty.
    Unavailable { reason: String },
}

impl LoadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cached => "cached",
            Self::Fetched => "fetched",
            Self::Stale { .. } => "stale",
            Self::Unavailable { .. } => "unavailable",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Stale { reason } | Self::Unavailable { reason } => Some(reason),
            Self::Cached | Self::Fetched => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome {
    pub snapshot: Snapshot,
    pub status: LoadStatus,
    pub malformed_skipped: u64,
    pub fetch_report: Option<FetchReport>,
}

impl LoadOutcome {
    /// Fails unless this outcome came from a fresh fetch.
    pub fn require_fresh(self) -> Result<Self, LoadError> {
        match self.status {
            LoadStatus::Fetched => Ok(self),
            LoadStatus::Cached => Err(LoadError::RefreshFailed {
                reason: "served from cache without fetching".to_string(),
            }),
            LoadStatus::Stale { reason } | LoadStatus::Unavailable { reason } => {
                Err(LoadError::RefreshFailed { reason })
            }
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("no market data available: {reason}")]
    DataUnavailable { reason: String },
    #[error("refresh failed: {reason}")]
    RefreshFailed { reason: String },
}

#[derive(Debug, Clone)]
pub struct SnapshotCache {
    path: PathBuf,
}

impl SnapshotCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(
        &self,
        force_refresh: bool,
        source: &dyn MarketSource,
    ) -> Result<LoadOutcome, LoadError> {
        self.load_at(force_refresh, source, Utc::now())
    }

    /// Like [`SnapshotCache::load`], with `now` stamping a fresh fetch.
    pub fn load_at(
        &self,
        force_refresh: bool,
        source: &dyn MarketSource,
        now: DateTime<Utc>,
    ) -> Result<LoadOutcome, LoadError> {
        let cache_exists = self.path.is_file();

        if cache_exists && !force_refresh {
            match self.read_cache() {
                Ok((snapshot, malformed_skipped)) => {
                    info!(
                        component = "loader",
                        event = "loader.cache.hit",
                        path = %self.path.display(),
                        rows = snapshot.records.len(),
                        malformed_skipped,
                        fetched_at = %snapshot.fetched_at
                    );
                    return Ok(LoadOutcome {
                        snapshot,
                        status: LoadStatus::Cached,
                        malformed_skipped,
                        fetch_report: None,
                    });
                }
                Err(err) => {
                    warn!(
                        component = "loader",
                        event = "loader.cache.unreadable",
                        path = %self.path.display(),
                        error = %err
                    );
                }
            }
        }

        let batch = match source.fetch() {
            Ok(batch) => batch,
            Err(err) => {
                let reason = format!("{} fetch failed: {err}", source.name());
                return self.fall_back_to_cache(cache_exists, reason);
            }
        };

        // An empty refresh keeps a readable cache rather than blanking it.
        if batch.records.is_empty() && cache_exists {
            if let Ok((snapshot, malformed_skipped)) = self.read_cache() {
                let reason = format!("{} returned no markets", source.name());
                return Ok(self.stale(snapshot, reason, malformed_skipped, Some(batch.report)));
            }
        }

        let snapshot = Snapshot::from_raw(now, &batch.records);
        self.persist(&snapshot);
        Ok(LoadOutcome {
            snapshot,
            status: LoadStatus::Fetched,
            malformed_skipped: batch.report.malformed_skipped,
            fetch_report: Some(batch.report),
        })
    }

    fn fall_back_to_cache(
        &self,
        cache_exists: bool,
        reason: String,
    ) -> Result<LoadOutcome, LoadError> {
        if !cache_exists {
            warn!(
                component = "loader",
                event = "loader.unavailable",
                path = %self.path.display(),
                reason = %reason
            );
            return Err(LoadError::DataUnavailable { reason });
        }

        match self.read_cache() {
            Ok((snapshot, malformed_skipped)) => Ok(self.stale(snapshot, reason, malformed_skipped, None)),
            Err(cache_err) => {
                let reason = format!("{reason}; cache unreadable: {cache_err}");
                warn!(
                    component = "loader",
                    event = "loader.unavailable",
                    path = %self.path.display(),
                    reason = %reason
                );
                Err(LoadError::DataUnavailable { reason })
            }
        }
    }

    fn stale(
        &self,
        snapshot: Snapshot,
        reason: String,
        malformed_skipped: u64,
        fetch_report: Option<FetchReport>,
    ) -> LoadOutcome {
        warn!(
            component = "loader",
            event = "loader.stale",
            path = %self.path.display(),
            fetched_at = %snapshot.fetched_at,
            reason = %reason
        );
        LoadOutcome {
            snapshot,
            status: LoadStatus::Stale { reason },
            malformed_skipped,
            fetch_report,
        }
    }

    /// Never fails: any load error becomes an empty `Unavailable` snapshot.
    pub fn load_or_empty(&self, force_refresh: bool, source: &dyn MarketSource) -> LoadOutcome {
        match self.load(force_refresh, source) {
            Ok(outcome) => outcome,
            Err(LoadError::DataUnavailable { reason } | LoadError::RefreshFailed { reason }) => {
                LoadOutcome {
                    snapshot: Snapshot::empty(Utc::now()),
                    status: LoadStatus::Unavailable { reason },
                    malformed_skipped: 0,
                    fetch_report: None,
                }
            }
        }
    }

    fn read_cache(&self) -> Result<(Snapshot, u64), SnapshotIoError> {
        let file = File::open(&self.path)?;
        let table = read_snapshot_csv(BufReader::new(file))?;

        for row in &table.malformed {
            warn!(
                component = "loader",
                event = "loader.cache.row_malformed",
                path = %self.path.display(),
                line = row.line,
                reason = %row.reason
            );
        }

        let fetched_at = match table.fetched_at {
            Some(ts) => ts,
            None => DateTime::<Utc>::from(fs::metadata(&self.path)?.modified()?),
        };

        Ok((
            Snapshot::from_raw(fetched_at, &table.records),
            table.malformed.len() as u64,
        ))
    }

    fn persist(&self, snapshot: &Snapshot) {
        if snapshot.records.is_empty() {
            info!(
                component = "loader",
                event = "loader.fetch.empty",
                path = %self.path.display()
            );
            return;
        }

        let written = snapshot_csv_bytes(snapshot.fetched_at, &snapshot.records)
            .and_then(|bytes| write_atomic(&self.path, &bytes));
        match written {
            Ok(()) => info!(
                component = "loader",
                event = "loader.fetch.written",
                path = %self.path.display(),
                rows = snapshot.records.len(),
                fetched_at = %snapshot.fetched_at
            ),
            Err(err) => warn!(
                component = "loader",
                event = "loader.fetch.write_failed",
                path = %self.path.display(),
                error = %err
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{StaticMarketSource, UnreachableMarketSource};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn status_labels_and_reasons() {
        assert_eq!(LoadStatus::Cached.as_str(), "cached");
        assert_eq!(LoadStatus::Cached.reason(), None);
        let stale = LoadStatus::Stale {
            reason: "timeout".to_string(),
        };
        assert_eq!(stale.as_str(), "stale");
        assert_eq!(stale.reason(), Some("timeout"));
    }

    #[test]
    fn missing_cache_and_failing_source_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SnapshotCache::new(dir.path().join("markets.csv"));

        let err = cache
            .load_at(false, &UnreachableMarketSource, now())
            .unwrap_err();
        assert!(matches!(err, LoadError::DataUnavailable { .. }));
        assert!(!cache.path().exists());

        let outcome = cache.load_or_empty(false, &UnreachableMarketSource);
        assert_eq!(outcome.status.as_str(), "unavailable");
        assert!(outcome.snapshot.records.is_empty());
    }

    #[test]
    fn empty_fetch_does_not_create_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SnapshotCache::new(dir.path().join("markets.csv"));

        let outcome = cache
            .load_at(false, &StaticMarketSource::new(Vec::new()), now())
            .unwrap();
        assert_eq!(outcome.status, LoadStatus::Fetched);
        assert!(outcome.snapshot.records.is_empty());
        assert!(!cache.path().exists());
    }

    #[test]
    fn require_fresh_accepts_only_fetched() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SnapshotCache::new(dir.path().join("markets.csv"));
        let source = StaticMarketSource::new(vec![MarketRecord::with_id("m-1")]);

        let fetched = cache.load_at(true, &source, now()).unwrap();
        assert!(fetched.require_fresh().is_ok());

        let stale = cache
            .load_at(true, &UnreachableMarketSource, now())
            .unwrap();
        match stale.require_fresh() {
            Err(LoadError::RefreshFailed { reason }) => {
                assert!(reason.contains("fetch failed"), "{reason}")
            }
            other => panic!("expected refresh failure, got {other:?}"),
        }

        let cached = cache.load_at(false, &source, now()).unwrap();
        assert!(matches!(
            cached.require_fresh(),
            Err(LoadError::RefreshFailed { .. })
        ));
    }
}
