use std::io;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{TimeZone, Utc};
use pmlens::{
    dashboard_router, log_app_bind, log_app_start, log_load_outcome, log_source_selected,
    InMemorySnapshotProvider, LoggingConfig, MarketRecord, SnapshotCache, StaticMarketSource,
    UnreachableMarketSource,
};
use serde_json::Value;
use tower::util::ServiceExt;
use tracing::dispatcher::with_default;
use tracing::Level;

/// In-memory sink shared between the subscriber and the test.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .expect("log buffer lock should not be poisoned")
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Runs `f` under a JSON subscriber and returns the `event` field of every
/// captured line.
fn captured_events(max_level: Level, f: impl FnOnce()) -> Vec<String> {
    let buffer = LogBuffer::default();
    let sink = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_ansi(false)
        .with_max_level(max_level)
        .with_writer(move || sink.clone())
        .finish();

    with_default(&tracing::Dispatch::new(subscriber), f);

    let bytes = buffer
        .0
        .lock()
        .expect("log buffer lock should not be poisoned")
        .clone();
    String::from_utf8_lossy(&bytes)
        .lines()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter_map(|json| json["fields"]["event"].as_str().map(str::to_string))
        .collect()
}

fn has(events: &[String], name: &str) -> bool {
    events.iter().any(|event| event == name)
}

#[test]
fn loader_logs_fetch_write_and_cache_hit() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let cache = SnapshotCache::new(dir.path().join("markets.csv"));
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
    let source = StaticMarketSource::new(vec![MarketRecord::with_id("m-1")]);

    let events = captured_events(Level::INFO, || {
        let fetched = cache
            .load_at(false, &source, now)
            .expect("static source should load");
        log_load_outcome("test", &fetched);
        cache
            .load_at(false, &source, now)
            .expect("cache should be readable");
    });

    assert!(has(&events, "loader.fetch.written"));
    assert!(has(&events, "load.outcome"));
    assert!(has(&events, "loader.cache.hit"));
}

#[test]
fn loader_logs_unavailable_and_stale() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let cache = SnapshotCache::new(dir.path().join("markets.csv"));
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();

    let events = captured_events(Level::INFO, || {
        assert!(cache.load_at(false, &UnreachableMarketSource, now).is_err());

        cache
            .load_at(
                false,
                &StaticMarketSource::new(vec![MarketRecord::with_id("m-1")]),
                now,
            )
            .expect("static source should load");
        cache
            .load_at(true, &UnreachableMarketSource, now)
            .expect("stale cache should be served");
    });

    assert!(has(&events, "loader.unavailable"));
    assert!(has(&events, "loader.stale"));
}

#[test]
fn server_lifecycle_helpers_emit_baseline_events() {
    let events = captured_events(Level::INFO, || {
        let cfg = LoggingConfig::default();
        log_app_start("dashboard_server", &cfg);
        log_source_selected("gamma_events", None, Some(Path::new("markets.csv")));
        log_app_bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080));
    });

    assert!(has(&events, "app.start"));
    assert!(has(&events, "source.selected"));
    assert!(has(&events, "app.bind"));
}

#[test]
fn snapshot_route_emits_http_snapshot_event() {
    let events = captured_events(Level::INFO, || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("single-thread runtime should build");

        rt.block_on(async {
            let app = dashboard_router(Arc::new(InMemorySnapshotProvider::demo()));

            let response = app
                .oneshot(
                    Request::builder()
                        .uri("/dashboard/snapshot")
                        .body(Body::empty())
                        .expect("request should build"),
                )
                .await
                .expect("snapshot request should succeed");

            assert_eq!(response.status(), StatusCode::OK);
        });
    });

    assert!(has(&events, "http.snapshot.request"));
}
