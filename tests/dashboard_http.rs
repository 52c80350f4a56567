use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use pmlens::{
    dashboard_router, demo_snapshot, snapshot_header, CachedSnapshotProvider,
    InMemorySnapshotProvider, LoadStatus, MarketRecord, Snapshot, SnapshotCache,
    StaticMarketSource, UnreachableMarketSource,
};
use serde_json::Value;
use tower::util::ServiceExt;

fn demo_app() -> Router {
    dashboard_router(Arc::new(InMemorySnapshotProvider::demo()))
}

async fn get(app: Router, uri: &str) -> (StatusCode, String) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn overview_page_returns_form_metrics_and_tables() {
    let (status, text) = get(demo_app(), "/dashboard").await;

    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("filters-form"));
    assert!(text.contains("name=\"filters\" value=\"1\""));
    assert!(text.contains("name=\"spread_max\" value=\"0.1\""));
    assert!(text.contains("addEventListener('change'"));
    assert!(text.contains("Number of markets"));
    assert!(text.contains("Markets by domain"));
    assert!(text.contains("/dashboard/market/demo-1"));
    assert!(text.contains("/dashboard/refresh"));
    // suggested filters drop "Up or Down" events
    assert!(!text.contains("Bitcoin Up or Down?"));
}

#[tokio::test]
async fn submitted_form_replaces_suggested_filters() {
    let (status, text) = get(demo_app(), "/dashboard?filters=1").await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("Bitcoin Up or Down?"));
    assert!(text.contains("/dashboard/export.csv?filters=1"));
}

#[tokio::test]
async fn domains_page_shows_stats_and_selected_domain() {
    let (status, text) = get(demo_app(), "/dashboard/domains?domain=Tech").await;

    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("Domain-level stats"));
    assert!(text.contains("<h2>Tech</h2>"));
    assert!(text.contains("Will a new frontier model ship before June?"));

    let (status, _) = get(demo_app(), "/dashboard/domains?domain=Astrology").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn screener_page_ranks_markets_with_open_buttons() {
    let (status, text) = get(demo_app(), "/dashboard/screener").await;

    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("screener-table"));
    assert!(text.contains("market-btn"));
    assert!(text.contains("Open Market"));
    assert!(text.contains("https://polymarket.com/event/demo-1"));
    assert!(text.contains("name=\"exclude_sports_crypto\" value=\"off\""));
    assert!(!text.contains("Celtics"));

    let (status, text) = get(
        demo_app(),
        "/dashboard/screener?exclude_sports_crypto=off&sort=liquidity",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("Celtics"));
    assert!(text.contains("<option value=\"liquidity\" selected>"));
}

#[tokio::test]
async fn market_drilldown_respects_filters() {
    let (status, text) = get(demo_app(), "/dashboard/market/demo-1").await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("Event context"));
    assert!(text.contains("Model estimates"));
    assert!(text.contains("Senate Control 2026"));
    assert!(text.contains("https://polymarket.com/event/demo-1"));

    let (status, _) = get(demo_app(), "/dashboard/market/demo-4").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get(demo_app(), "/dashboard/market/demo-4?filters=1").await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = get(demo_app(), "/dashboard/market/nope?filters=1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn drilldown_links_survive_reserved_characters_in_ids() {
    let mut record = MarketRecord::with_id("a/b?c#d");
    record.market_question = Some("Odd id market".to_string());
    let snapshot = Snapshot::from_raw(chrono::Utc::now(), &[record]);
    let app = dashboard_router(Arc::new(InMemorySnapshotProvider::new(snapshot)));

    let (status, text) = get(app.clone(), "/dashboard?filters=1").await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("href=\"/dashboard/market/a%2Fb%3Fc%23d?filters=1\""));

    let (status, text) = get(app, "/dashboard/market/a%2Fb%3Fc%23d?filters=1").await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("Odd id market"));
}

#[tokio::test]
async fn snapshot_endpoint_applies_query_filters() {
    let (status, text) = get(demo_app(), "/dashboard/snapshot?filters=1&domain=Sports").await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["status"], "cached");
    assert_eq!(json["total"], 10);
    let rows = json["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["market_id"], "demo-5");
    assert_eq!(rows[0]["domain"], "Sports");
}

#[tokio::test]
async fn malformed_query_is_a_bad_request() {
    for uri in [
        "/dashboard?liquidity_min=lots",
        "/dashboard/snapshot?spread_min=0.5&spread_max=0.1",
        "/dashboard?domain=Astrology",
        "/dashboard/screener?sort=vibes",
    ] {
        let (status, _) = get(demo_app(), uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
    }
}

#[tokio::test]
async fn export_returns_filtered_csv_attachment() {
    let response = demo_app()
        .oneshot(
            Request::builder()
                .uri("/dashboard/export.csv?filters=1&domain=Politics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert!(headers[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/csv"));
    assert!(headers[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains("polymarket_active_markets_enriched.csv"));

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next().unwrap(), snapshot_header().join(","));
    // the other Politics-tagged demos classify as Elections
    assert_eq!(lines.count(), 1);
}

#[tokio::test]
async fn refresh_redirects_back_to_overview() {
    let response = demo_app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/dashboard/refresh")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "/dashboard");
}

#[tokio::test]
async fn stale_snapshot_shows_warning_banner() {
    let provider = InMemorySnapshotProvider::with_status(
        demo_snapshot(),
        LoadStatus::Stale {
            reason: "gamma_events fetch failed: connection refused".to_string(),
        },
    );
    let (status, text) = get(dashboard_router(Arc::new(provider)), "/dashboard").await;

    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("class=\"card banner-stale\""));
    assert!(text.contains("connection refused"));
}

#[tokio::test]
async fn cached_provider_without_data_renders_empty_dashboard() {
    let dir = tempfile::tempdir().unwrap();
    let cache = SnapshotCache::new(dir.path().join("markets.csv"));
    let provider = CachedSnapshotProvider::new(cache, Arc::new(UnreachableMarketSource));

    let (status, text) = get(dashboard_router(Arc::new(provider)), "/dashboard").await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("class=\"card banner-unavailable\""));
    assert!(text.contains("Markets: 0"));
}

#[tokio::test]
async fn cached_provider_fetches_then_serves_memoised_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("markets.csv");
    let mut record = MarketRecord::with_id("m-1");
    record.market_question = Some("Will it rain?".to_string());
    record.liquidity_num = 500.0;

    let provider = CachedSnapshotProvider::new(
        SnapshotCache::new(&path),
        Arc::new(StaticMarketSource::new(vec![record])),
    );
    let app = dashboard_router(Arc::new(provider));

    let (status, text) = get(app.clone(), "/dashboard/snapshot?filters=1").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["status"], "fetched");
    assert_eq!(json["rows"][0]["market_id"], "m-1");
    assert!(path.is_file());

    // memoised: still the fetch outcome, no re-read of the cache
    let (_, text) = get(app, "/dashboard/snapshot?filters=1").await;
    let json: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["status"], "fetched");
}
