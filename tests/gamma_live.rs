#![cfg(feature = "live-gamma-tests")]

use pmlens::{derive_all, GammaEventsSource, GammaSourceConfig, MarketSource, SnapshotCache};

fn small_config() -> GammaSourceConfig {
    GammaSourceConfig {
        page_limit: 50,
        min_liquidity: 1_000.0,
        ..GammaSourceConfig::default()
    }
}

#[test]
fn live_gamma_returns_open_tradeable_markets() {
    let source = GammaEventsSource::new(small_config());
    let batch = source.fetch().expect("live gamma fetch should succeed");

    assert!(batch.report.pages >= 1);
    assert!(!batch.records.is_empty(), "expected at least one open market");
    assert_eq!(batch.report.kept as usize, batch.records.len());

    for record in &batch.records {
        assert!(!record.market_id.is_empty());
        assert!(record.is_tradeable(), "{} is not tradeable", record.market_id);
        assert!(record.liquidity_num >= 1_000.0);
    }

    let enriched = derive_all(&batch.records, chrono::Utc::now());
    assert!(enriched
        .iter()
        .all(|row| row.derived.quality_score.is_finite()));
}

#[test]
fn live_gamma_refresh_writes_cache() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let cache = SnapshotCache::new(dir.path().join("live.csv"));
    let source = GammaEventsSource::new(small_config());

    let outcome = cache.load(true, &source).expect("live refresh should load");
    assert!(!outcome.snapshot.records.is_empty());
    assert!(cache.path().is_file());
}
