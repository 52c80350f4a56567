//! Dashboard HTTP surface: snapshot providers, routes and HTML pages.

use std::sync::{Arc, PoisonError, RwLock};

use axum::{
    extract::{Path, Query, RawQuery, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::features::{Domain, EnrichedMarketRecord};
use crate::filters::{apply, FilterParseError, FilterSpec, NumericRange};
use crate::loader::{LoadOutcome, LoadStatus, Snapshot, SnapshotCache, DEFAULT_CACHE_PATH};
use crate::observability::log_load_outcome;
use crate::record::{format_timestamp, MarketRecord};
use crate::snapshot_csv::{snapshot_csv_bytes, SnapshotIoError};
use crate::source::MarketSource;
use crate::views::{
    domain_explorer, drilldown, overview, screener, Drilldown, Histogram, ScreenerOptions,
    ScreenerSort,
};

/// Where the dashboard gets its current snapshot. Calls may block.
pub trait SnapshotProvider: Send + Sync + 'static {
    fn current(&self) -> LoadOutcome;
    fn refresh(&self) -> LoadOutcome;
}

/// Memoises the last load from the CSV cache; `refresh` forces a fetch.
pub struct CachedSnapshotProvider {
    cache: SnapshotCache,
    source: Arc<dyn MarketSource>,
    memo: RwLock<Option<LoadOutcome>>,
}

impl CachedSnapshotProvider {
    pub fn new(cache: SnapshotCache, source: Arc<dyn MarketSource>) -> Self {
        Self {
            cache,
            source,
            memo: RwLock::new(None),
        }
    }

    fn remember(&self, outcome: &LoadOutcome) {
        log_load_outcome("dashboard", outcome);
        let mut memo = self.memo.write().unwrap_or_else(PoisonError::into_inner);
        // An unavailable load is retried on the next request.
        *memo = match outcome.status {
            LoadStatus::Unavailable { .. } => None,
            _ => Some(outcome.clone()),
        };
    }
}

impl SnapshotProvider for CachedSnapshotProvider {
    fn current(&self) -> LoadOutcome {
        if let Some(outcome) = self
            .memo
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return outcome;
        }

        let outcome = self.cache.load_or_empty(false, self.source.as_ref());
        self.remember(&outcome);
        outcome
    }

    fn refresh(&self) -> LoadOutcome {
        let outcome = self.cache.load_or_empty(true, self.source.as_ref());
        self.remember(&outcome);
        outcome
    }
}

/// Serves a fixed snapshot; used for demo mode and tests.
#[derive(Clone)]
pub struct InMemorySnapshotProvider {
    outcome: LoadOutcome,
}

impl InMemorySnapshotProvider {
    pub fn new(snapshot: Snapshot) -> Self {
        Self::with_status(snapshot, LoadStatus::Cached)
    }

    pub fn with_status(snapshot: Snapshot, status: LoadStatus) -> Self {
        Self {
            outcome: LoadOutcome {
                snapshot,
                status,
                malformed_skipped: 0,
                fetch_report: None,
            },
        }
    }

    pub fn demo() -> Self {
        Self::new(demo_snapshot())
    }
}

impl SnapshotProvider for InMemorySnapshotProvider {
    fn current(&self) -> LoadOutcome {
        self.outcome.clone()
    }

    fn refresh(&self) -> LoadOutcome {
        self.current()
    }
}

pub fn dashboard_router(provider: Arc<dyn SnapshotProvider>) -> Router {
    Router::new()
        .route("/dashboard", get(get_overview_html))
        .route("/dashboard/domains", get(get_domains_html))
        .route("/dashboard/screener", get(get_screener_html))
        .route("/dashboard/market/{id}", get(get_market_html))
        .route("/dashboard/snapshot", get(get_dashboard_snapshot))
        .route("/dashboard/export.csv", get(get_export_csv))
        .route("/dashboard/refresh", post(post_refresh))
        .with_state(DashboardAppState { provider })
}

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("bad query: {0}")]
    BadQuery(#[from] FilterParseError),
    #[error("market {0} not found in the filtered set")]
    MarketNotFound(String),
    #[error("export failed: {0}")]
    Export(#[from] SnapshotIoError),
    #[error("snapshot task failed: {0}")]
    Task(String),
}

impl IntoResponse for DashboardError {
    fn into_response(self) -> Response {
        let status = match &self {
            DashboardError::BadQuery(_) => StatusCode::BAD_REQUEST,
            DashboardError::MarketNotFound(_) => StatusCode::NOT_FOUND,
            DashboardError::Export(_) | DashboardError::Task(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.to_string()).into_response()
    }
}

#[derive(Clone)]
struct DashboardAppState {
    provider: Arc<dyn SnapshotProvider>,
}

type QueryPairs = Vec<(String, String)>;

async fn current_outcome(state: &DashboardAppState) -> Result<LoadOutcome, DashboardError> {
    let provider = Arc::clone(&state.provider);
    tokio::task::spawn_blocking(move || provider.current())
        .await
        .map_err(|err| DashboardError::Task(err.to_string()))
}

async fn get_overview_html(
    State(state): State<DashboardAppState>,
    RawQuery(raw_query): RawQuery,
    Query(pairs): Query<QueryPairs>,
) -> Result<Html<String>, DashboardError> {
    let spec = FilterSpec::from_query_or_suggested(&pairs)?;
    let outcome = current_outcome(&state).await?;
    let page = PageContext::new(Page::Overview, &outcome, &spec, raw_query.as_deref());
    Ok(Html(render_overview_html(&page, &outcome.snapshot)))
}

async fn get_domains_html(
    State(state): State<DashboardAppState>,
    RawQuery(raw_query): RawQuery,
    Query(pairs): Query<QueryPairs>,
) -> Result<Html<String>, DashboardError> {
    // `domain` picks the explored domain here, not a global filter.
    let (selected, rest): (QueryPairs, QueryPairs) =
        pairs.into_iter().partition(|(key, _)| key == "domain");
    let selected = match selected.last().map(|(_, value)| value.trim()) {
        Some(value) if !value.is_empty() => Some(
            Domain::parse(value)
                .ok_or_else(|| FilterParseError::UnknownDomain(value.to_string()))?,
        ),
        _ => None,
    };

    let spec = FilterSpec::from_query_or_suggested(&rest)?;
    let outcome = current_outcome(&state).await?;
    let shared_query = raw_query.map(|raw| {
        raw.split('&')
            .filter(|part| !part.starts_with("domain="))
            .collect::<Vec<_>>()
            .join("&")
    });
    let page = PageContext::new(Page::Domains, &outcome, &spec, shared_query.as_deref());
    Ok(Html(render_domains_html(&page, &outcome.snapshot, selected)))
}

async fn get_screener_html(
    State(state): State<DashboardAppState>,
    RawQuery(raw_query): RawQuery,
    Query(pairs): Query<QueryPairs>,
) -> Result<Html<String>, DashboardError> {
    let spec = FilterSpec::from_query_or_suggested(&pairs)?;
    let options = ScreenerOptions::from_query_pairs(&pairs)?;
    let outcome = current_outcome(&state).await?;
    let page = PageContext::new(Page::Screener, &outcome, &spec, raw_query.as_deref());
    Ok(Html(render_screener_html(&page, &outcome.snapshot, options)))
}

async fn get_market_html(
    State(state): State<DashboardAppState>,
    Path(market_id): Path<String>,
    RawQuery(raw_query): RawQuery,
    Query(pairs): Query<QueryPairs>,
) -> Result<Html<String>, DashboardError> {
    let spec = FilterSpec::from_query_or_suggested(&pairs)?;
    let outcome = current_outcome(&state).await?;
    let found = drilldown(&outcome.snapshot, &spec, &market_id)
        .ok_or_else(|| DashboardError::MarketNotFound(market_id.clone()))?;
    let page = PageContext::new(Page::Market, &outcome, &spec, raw_query.as_deref());
    Ok(Html(render_market_html(&page, &found)))
}

#[derive(Debug, Serialize)]
struct SnapshotResponse {
    fetched_at: DateTime<Utc>,
    status: &'static str,
    status_reason: Option<String>,
    total: usize,
    rows: Vec<EnrichedMarketRecord>,
}

async fn get_dashboard_snapshot(
    State(state): State<DashboardAppState>,
    Query(pairs): Query<QueryPairs>,
) -> Result<Json<SnapshotResponse>, DashboardError> {
    let spec = FilterSpec::from_query_or_suggested(&pairs)?;
    let outcome = current_outcome(&state).await?;
    let rows = apply(&outcome.snapshot.records, &spec);

    info!(
        component = "dashboard",
        event = "http.snapshot.request",
        status = outcome.status.as_str(),
        total = outcome.snapshot.records.len(),
        rows = rows.len()
    );

    Ok(Json(SnapshotResponse {
        fetched_at: outcome.snapshot.fetched_at,
        status: outcome.status.as_str(),
        status_reason: outcome.status.reason().map(str::to_string),
        total: outcome.snapshot.records.len(),
        rows,
    }))
}

async fn get_export_csv(
    State(state): State<DashboardAppState>,
    Query(pairs): Query<QueryPairs>,
) -> Result<Response, DashboardError> {
    let spec = FilterSpec::from_query_or_suggested(&pairs)?;
    let outcome = current_outcome(&state).await?;
    let rows = apply(&outcome.snapshot.records, &spec);
    let bytes = snapshot_csv_bytes(outcome.snapshot.fetched_at, &rows)?;

    info!(
        component = "dashboard",
        event = "http.export",
        rows = rows.len(),
        bytes = bytes.len()
    );

    let disposition = format!("attachment; filename=\"{DEFAULT_CACHE_PATH}\"");
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

async fn post_refresh(State(state): State<DashboardAppState>) -> Result<Redirect, DashboardError> {
    let provider = Arc::clone(&state.provider);
    let outcome = tokio::task::spawn_blocking(move || provider.refresh())
        .await
        .map_err(|err| DashboardError::Task(err.to_string()))?;

    info!(
        component = "dashboard",
        event = "http.refresh",
        status = outcome.status.as_str(),
        rows = outcome.snapshot.records.len()
    );

    Ok(Redirect::to("/dashboard"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Page {
    Overview,
    Domains,
    Screener,
    Market,
}

impl Page {
    fn title(self) -> &'static str {
        match self {
            Page::Overview => "Overview",
            Page::Domains => "Domain Explorer",
            Page::Screener => "Trading Screener",
            Page::Market => "Market Drilldown",
        }
    }
}

struct PageContext<'a> {
    page: Page,
    outcome: &'a LoadOutcome,
    spec: &'a FilterSpec,
    /// Raw query string, reused for nav and export links.
    query: String,
}

impl<'a> PageContext<'a> {
    fn new(
        page: Page,
        outcome: &'a LoadOutcome,
        spec: &'a FilterSpec,
        raw_query: Option<&str>,
    ) -> Self {
        Self {
            page,
            outcome,
            spec,
            query: raw_query.unwrap_or_default().to_string(),
        }
    }

    fn link(&self, path: &str) -> String {
        if self.query.is_empty() {
            path.to_string()
        } else {
            format!("{path}?{}", self.query)
        }
    }
}

const STYLE: &str = ":root{--bg:#f5f1e7;--bg2:#e9f0f2;--card:#ffffff;--ink:#182026;--muted:#5f6a73;--line:#d7dce1;--head:#14343f;--btn:#0c5f78;--warn:#fff5b8;--err:#ffd9d3}*{box-sizing:border-box}body{margin:0;color:var(--ink);font-family:\"Space Grotesk\",\"Avenir Next\",\"Segoe UI\",sans-serif;background:linear-gradient(160deg,var(--bg),var(--bg2));min-height:100vh}.shell{max-width:1500px;margin:0 auto;padding:24px 18px 28px}.hero{background:linear-gradient(135deg,#102f3a 0%,#24576b 100%);color:#f7fbfc;border-radius:16px;padding:18px 20px}.hero h1{margin:0 0 8px;font-size:1.6rem}.hero-meta{display:flex;gap:16px;flex-wrap:wrap;font-size:.92rem;color:#dcebf0}.hero-meta a{color:#fff}.nav{display:flex;gap:10px;margin-top:12px}.nav a{color:#dcebf0;text-decoration:none;padding:4px 10px;border-radius:8px}.nav a.active{background:rgba(255,255,255,.18);color:#fff}.card{margin-top:16px;background:var(--card);border:1px solid #cbd4db;border-radius:16px;padding:14px;overflow:auto}.banner-stale{background:var(--warn)}.banner-unavailable{background:var(--err)}.metrics{display:flex;gap:24px;flex-wrap:wrap}.metric b{display:block;font-size:1.4rem}table{width:100%;border-collapse:collapse}thead th{background:var(--head);color:#f2f7f9;font-size:.78rem;text-transform:uppercase;padding:8px;text-align:left}tbody td{font-size:.84rem;padding:7px 8px;border-bottom:1px solid var(--line)}.market-btn{background:var(--btn);color:#fff;text-decoration:none;padding:5px 9px;border-radius:8px;font-size:.76rem}.hist{display:flex;align-items:flex-end;gap:1px;height:120px}.hist span{flex:1;background:#24576b;min-height:1px}.caption{color:var(--muted);font-size:.8rem}.filters-form{display:flex;flex-wrap:wrap;gap:10px 18px;font-size:.84rem}.filters-form fieldset{border:1px solid var(--line);border-radius:10px}.filters-form input[type=number]{width:90px}";

const AUTO_APPLY_SCRIPT: &str = "<script>document.querySelectorAll('.filters-form input[type=checkbox], .filters-form select').forEach(function(el){el.addEventListener('change',function(){el.form.submit();});});</script>\n";

fn page_open(out: &mut String, ctx: &PageContext<'_>) {
    let snapshot = &ctx.outcome.snapshot;
    out.push_str("<!DOCTYPE html><html><head><meta charset=\"utf-8\">\n");
    out.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    out.push_str(&format!(
        "<title>pmlens · {}</title>\n",
        escape_html(ctx.page.title())
    ));
    out.push_str("<style>");
    out.push_str(STYLE);
    out.push_str("</style>\n</head><body><main class=\"shell\">\n");

    out.push_str(&format!(
        "<section class=\"hero\"><h1>{}</h1>",
        escape_html(ctx.page.title())
    ));
    out.push_str("<div class=\"hero-meta\">");
    out.push_str(&format!(
        "<span>Snapshot: {}</span>",
        escape_html(&format_timestamp(&snapshot.fetched_at))
    ));
    out.push_str(&format!(
        "<span>Status: {}</span>",
        escape_html(ctx.outcome.status.as_str())
    ));
    out.push_str(&format!("<span>Markets: {}</span>", snapshot.records.len()));
    out.push_str(&format!(
        "<a href=\"{}\">Download CSV</a>",
        escape_html(&ctx.link("/dashboard/export.csv"))
    ));
    out.push_str("<form method=\"post\" action=\"/dashboard/refresh\"><button type=\"submit\">Refresh data</button></form>");
    out.push_str("</div><nav class=\"nav\">");
    for (page, path) in [
        (Page::Overview, "/dashboard"),
        (Page::Domains, "/dashboard/domains"),
        (Page::Screener, "/dashboard/screener"),
    ] {
        let class = if page == ctx.page { "active" } else { "" };
        out.push_str(&format!(
            "<a class=\"{class}\" href=\"{}\">{}</a>",
            escape_html(&ctx.link(path)),
            escape_html(page.title())
        ));
    }
    out.push_str("</nav></section>\n");

    match &ctx.outcome.status {
        LoadStatus::Stale { reason } => out.push_str(&format!(
            "<section class=\"card banner-stale\">Refresh failed, showing the cached snapshot: {}</section>\n",
            escape_html(reason)
        )),
        LoadStatus::Unavailable { reason } => out.push_str(&format!(
            "<section class=\"card banner-unavailable\">No data available. Use Refresh data to fetch from the API. ({})</section>\n",
            escape_html(reason)
        )),
        LoadStatus::Cached | LoadStatus::Fetched => {}
    }
}

fn page_close(out: &mut String) {
    out.push_str(AUTO_APPLY_SCRIPT);
    out.push_str("</main></body></html>\n");
}

fn render_filter_form(out: &mut String, ctx: &PageContext<'_>, extra_fields: &str) {
    let spec = ctx.spec;
    let action = match ctx.page {
        Page::Overview | Page::Market => "/dashboard",
        Page::Domains => "/dashboard/domains",
        Page::Screener => "/dashboard/screener",
    };

    out.push_str("<section class=\"card\">");
    out.push_str(&format!(
        "<form class=\"filters-form\" method=\"get\" action=\"{action}\">"
    ));
    out.push_str("<input type=\"hidden\" name=\"filters\" value=\"1\">");

    out.push_str("<fieldset><legend>Toggles</legend>");
    for (name, label, checked) in [
        ("tradeable_only", "Only tradeable markets", spec.tradeable_only),
        ("binary_only", "Only binary-like markets", spec.binary_only),
        ("exclude_up_or_down", "Exclude 'Up or Down'", spec.exclude_up_or_down),
        ("require_activity", ">0 liquidity and 24h volume", spec.require_activity),
    ] {
        push_checkbox(out, name, label, checked);
    }
    out.push_str("</fieldset>");

    out.push_str("<fieldset><legend>Ranges</legend>");
    for (field, label, range) in [
        ("liquidity", "Liquidity", spec.liquidity),
        ("volume_24h", "24h volume", spec.volume_24h),
        ("spread", "Spread", spec.spread),
        ("mid_price", "Mid price", spec.mid_price),
        ("ttr", "Days to resolution", spec.time_to_resolution_days),
        ("quality", "Quality", spec.quality_score),
    ] {
        push_range_inputs(out, field, label, range);
    }
    out.push_str("</fieldset>");

    if ctx.page != Page::Domains {
        out.push_str("<fieldset><legend>Domain</legend>");
        for domain in Domain::ALL {
            let checked = if spec.domains.contains(&domain) {
                " checked"
            } else {
                ""
            };
            out.push_str(&format!(
                "<label><input type=\"checkbox\" name=\"domain\" value=\"{}\"{checked}> {}</label> ",
                escape_html(domain.as_str()),
                escape_html(domain.as_str())
            ));
        }
        out.push_str("</fieldset>");
    }

    out.push_str(&format!(
        "<label>Search <input type=\"text\" name=\"search\" value=\"{}\"></label>",
        escape_html(spec.search.as_deref().unwrap_or_default())
    ));
    out.push_str(extra_fields);
    out.push_str("<button type=\"submit\">Apply</button></form></section>\n");
}

fn push_checkbox(out: &mut String, name: &str, label: &str, checked: bool) {
    out.push_str(&format!(
        "<label><input type=\"checkbox\" name=\"{name}\" value=\"on\"{}> {}</label> ",
        if checked { " checked" } else { "" },
        escape_html(label)
    ));
}

fn push_range_inputs(out: &mut String, field: &str, label: &str, range: Option<NumericRange>) {
    let range = range.unwrap_or_default();
    let bound = |value: Option<f64>| value.map(|v| v.to_string()).unwrap_or_default();
    out.push_str(&format!(
        "<label>{} <input type=\"number\" step=\"any\" name=\"{field}_min\" value=\"{}\"> to <input type=\"number\" step=\"any\" name=\"{field}_max\" value=\"{}\"></label> ",
        escape_html(label),
        bound(range.min),
        bound(range.max)
    ));
}

fn render_overview_html(ctx: &PageContext<'_>, snapshot: &Snapshot) -> String {
    let view = overview(snapshot, ctx.spec);

    let mut out = String::new();
    page_open(&mut out, ctx);
    render_filter_form(&mut out, ctx, "");

    out.push_str("<section class=\"card\"><div class=\"metrics\">");
    out.push_str(&format!(
        "<div class=\"metric\">Number of markets<b>{}</b></div>",
        view.market_count
    ));
    out.push_str(&format!(
        "<div class=\"metric\">Total liquidity<b>{}</b></div>",
        fmt_amount(view.total_liquidity)
    ));
    out.push_str(&format!(
        "<div class=\"metric\">Total 24h volume<b>{}</b></div>",
        fmt_amount(view.total_volume_24h)
    ));
    out.push_str("</div></section>\n");

    render_histogram(&mut out, "Liquidity distribution", view.liquidity_histogram.as_ref());
    render_histogram(&mut out, "24h volume distribution", view.volume_histogram.as_ref());
    render_histogram(&mut out, "Spread distribution", view.spread_histogram.as_ref());

    out.push_str("<section class=\"card\"><h2>Markets by domain</h2><table><thead><tr><th>Domain</th><th>Markets</th></tr></thead><tbody>");
    for entry in &view.domain_counts {
        out.push_str(&format!(
            "<tr><td>{}</td><td>{}</td></tr>",
            escape_html(entry.domain.as_str()),
            entry.markets
        ));
    }
    out.push_str("</tbody></table></section>\n");

    out.push_str("<section class=\"card\"><h2>Sample markets</h2>");
    render_market_table(&mut out, ctx, &view.rows);
    out.push_str("</section>\n");

    page_close(&mut out);
    out
}

fn render_domains_html(
    ctx: &PageContext<'_>,
    snapshot: &Snapshot,
    selected: Option<Domain>,
) -> String {
    let view = domain_explorer(snapshot, ctx.spec, selected);
    let keep_selection = selected
        .map(|domain| {
            format!(
                "<input type=\"hidden\" name=\"domain\" value=\"{}\">",
                escape_html(domain.as_str())
            )
        })
        .unwrap_or_default();

    let mut out = String::new();
    page_open(&mut out, ctx);
    render_filter_form(&mut out, ctx, &keep_selection);

    out.push_str("<section class=\"card\"><h2>Domain-level stats</h2><table><thead><tr><th>Domain</th><th>Markets</th><th>Median liquidity</th><th>Median 24h volume</th><th>Median spread</th></tr></thead><tbody>");
    for stats in &view.stats {
        out.push_str(&format!(
            "<tr><td><a href=\"{}\">{}</a></td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape_html(&domain_link(ctx, stats.domain)),
            escape_html(stats.domain.as_str()),
            stats.markets,
            fmt_opt(stats.median_liquidity, 0),
            fmt_opt(stats.median_volume_24h, 0),
            fmt_opt(stats.median_spread, 3)
        ));
    }
    out.push_str("</tbody></table></section>\n");

    if let Some(detail) = &view.selected {
        out.push_str(&format!(
            "<section class=\"card\"><h2>{}</h2><div class=\"metrics\">",
            escape_html(detail.stats.domain.as_str())
        ));
        out.push_str(&format!(
            "<div class=\"metric\">Markets<b>{}</b></div><div class=\"metric\">Median liquidity<b>{}</b></div><div class=\"metric\">Median 24h volume<b>{}</b></div><div class=\"metric\">Median spread<b>{}</b></div>",
            detail.stats.markets,
            fmt_opt(detail.stats.median_liquidity, 0),
            fmt_opt(detail.stats.median_volume_24h, 0),
            fmt_opt(detail.stats.median_spread, 3)
        ));
        out.push_str("</div></section>\n");
        render_histogram(&mut out, "Liquidity distribution", detail.liquidity_histogram.as_ref());
        render_histogram(&mut out, "Spread distribution", detail.spread_histogram.as_ref());
        out.push_str("<section class=\"card\"><h2>Sample markets in this domain</h2>");
        render_market_table(&mut out, ctx, &detail.rows);
        out.push_str("</section>\n");
    }

    page_close(&mut out);
    out
}

fn render_screener_html(
    ctx: &PageContext<'_>,
    snapshot: &Snapshot,
    options: ScreenerOptions,
) -> String {
    let view = screener(snapshot, ctx.spec, options);

    let mut extra = String::from("<fieldset><legend>Screener</legend>");
    let toggles = options.toggles;
    for (name, label, on) in [
        ("exclude_sports_crypto", "Exclude Sports and Crypto", toggles.exclude_sports_crypto),
        ("active_only", "Market must be active", toggles.active_only),
        ("liquidity_band", "Liquidity 200-5,000", toggles.liquidity_band),
        ("spread_cap", "Spread <= 0.12", toggles.spread_cap),
        ("min_volume", "24h volume >= 20", toggles.min_volume),
        ("resolution_window", "2-120 days to resolution", toggles.resolution_window),
    ] {
        // The hidden "off" is overridden by the checkbox when it is ticked.
        extra.push_str(&format!(
            "<input type=\"hidden\" name=\"{name}\" value=\"off\">"
        ));
        push_checkbox(&mut extra, name, label, on);
    }
    extra.push_str("<label>Sort <select name=\"sort\">");
    for sort in ScreenerSort::ALL {
        extra.push_str(&format!(
            "<option value=\"{}\"{}>{}</option>",
            sort.as_str(),
            if sort == options.sort { " selected" } else { "" },
            escape_html(sort.label())
        ));
    }
    extra.push_str("</select></label></fieldset>");

    let mut out = String::new();
    page_open(&mut out, ctx);
    render_filter_form(&mut out, ctx, &extra);

    out.push_str(&format!(
        "<section class=\"card\"><div class=\"metrics\"><div class=\"metric\">Markets in screener<b>{}</b></div></div>",
        view.rows.len()
    ));
    out.push_str("<table><thead><tr><th>Domain</th><th>Markets</th><th>Median quality</th></tr></thead><tbody>");
    for stat in &view.domain_stats {
        out.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape_html(stat.domain.as_str()),
            stat.markets,
            fmt_opt(stat.median_quality, 3)
        ));
    }
    out.push_str("</tbody></table></section>\n");

    out.push_str("<section class=\"card\"><table id=\"screener-table\"><thead><tr><th>Event</th><th>Question</th><th>Domain</th><th>Liquidity</th><th>24h Volume</th><th>Spread</th><th>Mid</th><th>Days</th><th>Quality</th><th>Alpha</th><th>Screener</th><th>Link</th></tr></thead><tbody>\n");
    for row in &view.rows {
        let market = &row.market;
        out.push_str("<tr>");
        out.push_str(&format!(
            "<td>{}</td>",
            escape_html(market.record.event_title.as_deref().unwrap_or("-"))
        ));
        push_question_cell(&mut out, ctx, market);
        out.push_str(&format!(
            "<td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{:.3}</td><td>{:.3}</td><td>{:.3}</td>",
            escape_html(market.derived.domain.as_str()),
            fmt_amount(market.record.liquidity_num),
            fmt_amount(market.record.volume_24h),
            fmt_opt(market.derived.spread, 3),
            fmt_opt(market.derived.mid_price, 3),
            fmt_opt(market.derived.time_to_resolution_days, 1),
            market.derived.quality_score,
            row.alpha_score,
            row.screener_score
        ));
        match &row.url {
            Some(url) => out.push_str(&format!(
                "<td><a class=\"market-btn\" target=\"_blank\" rel=\"noopener noreferrer\" href=\"{}\">Open Market</a></td>",
                escape_html(url)
            )),
            None => out.push_str("<td>-</td>"),
        }
        out.push_str("</tr>\n");
    }
    out.push_str("</tbody></table></section>\n");

    page_close(&mut out);
    out
}

fn render_market_html(ctx: &PageContext<'_>, found: &Drilldown) -> String {
    let record = &found.market.record;
    let derived = &found.market.derived;

    let mut out = String::new();
    page_open(&mut out, ctx);

    let text = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());
    let date = |value: &Option<DateTime<Utc>>| {
        value
            .as_ref()
            .map(format_timestamp)
            .unwrap_or_else(|| "-".to_string())
    };

    render_kv_section(
        &mut out,
        "Event context",
        &[
            ("Event title", text(&record.event_title)),
            ("Subtitle", text(&record.event_subtitle)),
            ("Category", text(&record.event_category)),
            ("Event tags", text(&record.event_tags_labels)),
            ("Event start", date(&record.event_start_date)),
            ("Event end", date(&record.event_end_date)),
            ("Event ID", text(&record.event_id)),
            ("Event slug", text(&record.event_slug)),
            ("Event liquidity", fmt_amount(record.event_liquidity)),
            ("Event volume", fmt_amount(record.event_volume)),
            ("Open interest", fmt_amount(record.event_open_interest)),
        ],
    );
    render_kv_section(
        &mut out,
        "Market details",
        &[
            ("Market question", text(&record.market_question)),
            ("Description", text(&record.market_description)),
            ("Resolution source", text(&record.resolution_source)),
            ("Market category", text(&record.market_category)),
            ("Market type", text(&record.market_type)),
            ("Market ID", record.market_id.clone()),
            ("Market slug", text(&record.market_slug)),
            ("End date", date(&record.market_end_date)),
            ("Status", record.status().as_str().to_string()),
            ("Domain", derived.domain.as_str().to_string()),
            (
                "Time to resolution (days)",
                fmt_opt(derived.time_to_resolution_days, 2),
            ),
        ],
    );
    render_kv_section(
        &mut out,
        "Trading info",
        &[
            ("Liquidity", fmt_amount(record.liquidity_num)),
            ("Liquidity (AMM)", fmt_amount(record.liquidity_amm)),
            ("Liquidity (CLOB)", fmt_amount(record.liquidity_clob)),
            ("24h volume", fmt_amount(record.volume_24h)),
            ("1w volume", fmt_amount(record.volume_1w)),
            ("Total volume", fmt_amount(record.volume_num)),
            ("Best bid", fmt_opt(record.best_bid, 3)),
            ("Best ask", fmt_opt(record.best_ask, 3)),
            ("Spread", fmt_opt(derived.spread, 3)),
            ("Mid price", fmt_opt(derived.mid_price, 3)),
            ("Last trade", fmt_opt(record.last_trade_price, 3)),
            (
                "Quality score",
                format!(
                    "{:.3} ({})",
                    derived.quality_score,
                    derived.quality_basis.as_str()
                ),
            ),
        ],
    );
    render_kv_section(
        &mut out,
        "Model estimates",
        &[
            ("Model probability (p_true)", fmt_opt(derived.p_true, 3)),
            ("Implied probability", fmt_opt(derived.implied_prob, 3)),
            ("Edge", fmt_opt(derived.edge, 3)),
        ],
    );
    render_kv_section(
        &mut out,
        "Outcomes & tokens",
        &[
            ("Outcomes", text(&record.outcomes_raw)),
            ("Outcome prices", text(&record.outcome_prices_raw)),
            ("CLOB token IDs", text(&record.clob_token_ids)),
        ],
    );

    out.push_str("<section class=\"card\">");
    match &found.url {
        Some(url) => out.push_str(&format!(
            "<b>Polymarket URL:</b> <a class=\"market-btn\" target=\"_blank\" rel=\"noopener noreferrer\" href=\"{0}\">{0}</a>",
            escape_html(url)
        )),
        None => out.push_str("No Polymarket URL: the record has no event or market slug."),
    }
    out.push_str("</section>\n");

    page_close(&mut out);
    out
}

fn domain_link(ctx: &PageContext<'_>, domain: Domain) -> String {
    let param = format!("domain={}", domain.as_str().replace(' ', "+"));
    if ctx.query.is_empty() {
        format!("/dashboard/domains?{param}")
    } else {
        format!("/dashboard/domains?{}&{param}", ctx.query)
    }
}

fn render_kv_section(out: &mut String, title: &str, rows: &[(&str, String)]) {
    out.push_str(&format!(
        "<section class=\"card\"><h2>{}</h2><table><tbody>",
        escape_html(title)
    ));
    for (label, value) in rows {
        out.push_str(&format!(
            "<tr><th>{}</th><td>{}</td></tr>",
            escape_html(label),
            escape_html(value)
        ));
    }
    out.push_str("</tbody></table></section>\n");
}

fn render_market_table(out: &mut String, ctx: &PageContext<'_>, rows: &[EnrichedMarketRecord]) {
    out.push_str("<table><thead><tr><th>Event</th><th>Question</th><th>Domain</th><th>Liquidity</th><th>24h Volume</th><th>Spread</th><th>Days</th><th>Quality</th></tr></thead><tbody>\n");
    for row in rows {
        out.push_str("<tr>");
        out.push_str(&format!(
            "<td>{}</td>",
            escape_html(row.record.event_title.as_deref().unwrap_or("-"))
        ));
        push_question_cell(out, ctx, row);
        out.push_str(&format!(
            "<td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{:.3}</td></tr>\n",
            escape_html(row.derived.domain.as_str()),
            fmt_amount(row.record.liquidity_num),
            fmt_amount(row.record.volume_24h),
            fmt_opt(row.derived.spread, 3),
            fmt_opt(row.derived.time_to_resolution_days, 1),
            row.derived.quality_score
        ));
    }
    out.push_str("</tbody></table>");
}

/// Characters that cannot appear raw inside one URL path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

fn market_path(market_id: &str) -> String {
    format!(
        "/dashboard/market/{}",
        utf8_percent_encode(market_id, PATH_SEGMENT)
    )
}

fn push_question_cell(out: &mut String, ctx: &PageContext<'_>, row: &EnrichedMarketRecord) {
    let href = ctx.link(&market_path(&row.record.market_id));
    out.push_str(&format!(
        "<td><a href=\"{}\">{}</a></td>",
        escape_html(&href),
        escape_html(row.record.market_question.as_deref().unwrap_or("-"))
    ));
}

fn render_histogram(out: &mut String, title: &str, hist: Option<&Histogram>) {
    out.push_str(&format!(
        "<section class=\"card\"><h3>{}</h3>",
        escape_html(title)
    ));
    let Some(hist) = hist else {
        out.push_str("<p class=\"caption\">No data available.</p></section>\n");
        return;
    };

    let peak = hist.bins.iter().map(|bin| bin.count).max().unwrap_or(0).max(1);
    out.push_str("<div class=\"hist\">");
    for bin in &hist.bins {
        let pct = bin.count as f64 * 100.0 / peak as f64;
        out.push_str(&format!(
            "<span style=\"height:{pct:.1}%\" title=\"{:.4}..{:.4}: {}\"></span>",
            bin.lower, bin.upper, bin.count
        ));
    }
    out.push_str("</div>");
    if let (Some(lo), Some(hi)) = (hist.lower(), hist.upper()) {
        out.push_str(&format!(
            "<p class=\"caption\">Range {} to {}",
            fmt_decimal(lo),
            fmt_decimal(hi)
        ));
        if hist.excluded > 0 {
            out.push_str(&format!(
                " (5th-95th percentile, {} outliers excluded)",
                hist.excluded
            ));
        }
        out.push_str(".</p>");
    }
    out.push_str("</section>\n");
}

fn fmt_amount(value: f64) -> String {
    format!("{value:.0}")
}

fn fmt_decimal(value: f64) -> String {
    if value.abs() >= 100.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.3}")
    }
}

fn fmt_opt(value: Option<f64>, decimals: usize) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{v:.decimals$}"),
        _ => "-".to_string(),
    }
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

struct DemoMarket {
    id: &'static str,
    event: &'static str,
    question: &'static str,
    tags: &'static str,
    liquidity: f64,
    volume_24h: f64,
    bid: Option<f64>,
    ask: Option<f64>,
    days: i64,
}

const DEMO_MARKETS: [DemoMarket; 10] = [
    DemoMarket {
        id: "demo-1",
        event: "Senate Control 2026",
        question: "Will Democrats win the Senate?",
        tags: "Politics|Elections|US Elections",
        liquidity: 4_200.0,
        volume_24h: 850.0,
        bid: Some(0.46),
        ask: Some(0.49),
        days: 40,
    },
    DemoMarket {
        id: "demo-2",
        event: "German Federal Election",
        question: "Will the CDU win the most seats?",
        tags: "Global Elections|Politics",
        liquidity: 1_800.0,
        volume_24h: 120.0,
        bid: Some(0.71),
        ask: Some(0.74),
        days: 25,
    },
    DemoMarket {
        id: "demo-3",
        event: "Fed Decision in March",
        question: "Will the Fed cut rates by 25 bps?",
        tags: "Finance|Economy",
        liquidity: 950.0,
        volume_24h: 64.0,
        bid: Some(0.30),
        ask: Some(0.35),
        days: 60,
    },
    DemoMarket {
        id: "demo-4",
        event: "Bitcoin Up or Down - 3PM ET",
        question: "Bitcoin Up or Down?",
        tags: "Crypto|Crypto Prices",
        liquidity: 12_000.0,
        volume_24h: 40_000.0,
        bid: Some(0.50),
        ask: Some(0.51),
        days: 1,
    },
    DemoMarket {
        id: "demo-5",
        event: "NBA Finals Champion",
        question: "Will the Celtics win the NBA Finals?",
        tags: "Sports|NBA",
        liquidity: 3_100.0,
        volume_24h: 510.0,
        bid: Some(0.22),
        ask: Some(0.24),
        days: 85,
    },
    DemoMarket {
        id: "demo-6",
        event: "AI Model Release",
        question: "Will a new frontier model ship before June?",
        tags: "Tech|AI",
        liquidity: 640.0,
        volume_24h: 35.0,
        bid: Some(0.55),
        ask: Some(0.62),
        days: 75,
    },
    DemoMarket {
        id: "demo-7",
        event: "Box Office Opening Weekend",
        question: "Will the sequel gross over $100M?",
        tags: "Culture|Movies",
        liquidity: 300.0,
        volume_24h: 22.0,
        bid: Some(0.40),
        ask: None,
        days: 12,
    },
    DemoMarket {
        id: "demo-8",
        event: "Ethereum ETF Flows",
        question: "Will ETH ETF net inflows exceed $1B this month?",
        tags: "Crypto",
        liquidity: 2_400.0,
        volume_24h: 300.0,
        bid: Some(0.18),
        ask: Some(0.21),
        days: 20,
    },
    DemoMarket {
        id: "demo-9",
        event: "Weather Records",
        question: "Will July be the hottest month on record?",
        tags: "Climate",
        liquidity: 180.0,
        volume_24h: 5.0,
        bid: Some(0.60),
        ask: Some(0.70),
        days: 150,
    },
    DemoMarket {
        id: "demo-10",
        event: "Mayoral Race",
        question: "Will the incumbent be re-elected?",
        tags: "Politics",
        liquidity: 520.0,
        volume_24h: 48.0,
        bid: Some(0.81),
        ask: Some(0.85),
        days: 8,
    },
];

/// A small fixed market set for running the dashboard without the API.
pub fn demo_snapshot() -> Snapshot {
    let now = Utc::now();
    let records: Vec<MarketRecord> = DEMO_MARKETS
        .iter()
        .map(|demo| {
            let mut record = MarketRecord::with_id(demo.id);
            record.event_id = Some(format!("event-{}", demo.id));
            record.event_slug = Some(demo.id.to_string());
            record.event_title = Some(demo.event.to_string());
            record.event_tags_labels = Some(demo.tags.to_string());
            record.market_question = Some(demo.question.to_string());
            record.market_slug = Some(format!("{}-market", demo.id));
            record.liquidity_num = demo.liquidity;
            record.volume_24h = demo.volume_24h;
            record.best_bid = demo.bid;
            record.best_ask = demo.ask;
            record.market_end_date = Some(now + ChronoDuration::days(demo.days));
            record.outcomes_raw = Some("[\"Yes\", \"No\"]".to_string());
            record
        })
        .collect();
    Snapshot::from_raw(now, &records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: LoadStatus) -> LoadOutcome {
        LoadOutcome {
            snapshot: demo_snapshot(),
            status,
            malformed_skipped: 0,
            fetch_report: None,
        }
    }

    #[test]
    fn demo_snapshot_spans_several_domains() {
        let snapshot = demo_snapshot();
        assert_eq!(snapshot.records.len(), DEMO_MARKETS.len());

        let domains: std::collections::BTreeSet<Domain> =
            snapshot.records.iter().map(|r| r.derived.domain).collect();
        assert!(domains.contains(&Domain::Elections));
        assert!(domains.contains(&Domain::Sports));
        assert!(domains.contains(&Domain::CryptoPrices));
        assert!(domains.contains(&Domain::Other));
    }

    #[test]
    fn market_path_encodes_reserved_characters() {
        assert_eq!(market_path("demo-1"), "/dashboard/market/demo-1");
        assert_eq!(
            market_path("a/b?c#d 50%"),
            "/dashboard/market/a%2Fb%3Fc%23d%2050%25"
        );
    }

    #[test]
    fn escape_html_covers_markup_characters() {
        assert_eq!(
            escape_html("<a href=\"x\">Tom & Jerry's</a>"),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; Jerry&#39;s&lt;/a&gt;"
        );
    }

    #[test]
    fn links_reuse_the_raw_query() {
        let outcome = outcome(LoadStatus::Cached);
        let spec = FilterSpec::suggested();
        let ctx = PageContext::new(Page::Overview, &outcome, &spec, Some("filters=1&domain=Tech"));
        assert_eq!(
            ctx.link("/dashboard/export.csv"),
            "/dashboard/export.csv?filters=1&domain=Tech"
        );

        let bare = PageContext::new(Page::Overview, &outcome, &spec, None);
        assert_eq!(bare.link("/dashboard"), "/dashboard");
    }

    #[test]
    fn stale_banner_shows_reason() {
        let outcome = outcome(LoadStatus::Stale {
            reason: "gamma_events fetch failed: timeout".to_string(),
        });
        let spec = FilterSpec::default();
        let ctx = PageContext::new(Page::Overview, &outcome, &spec, None);
        let html = render_overview_html(&ctx, &outcome.snapshot);
        assert!(html.contains("class=\"card banner-stale\""));
        assert!(html.contains("gamma_events fetch failed: timeout"));
    }

    #[test]
    fn overview_renders_filter_form_and_tables() {
        let outcome = outcome(LoadStatus::Cached);
        let spec = FilterSpec::default();
        let ctx = PageContext::new(Page::Overview, &outcome, &spec, None);
        let html = render_overview_html(&ctx, &outcome.snapshot);

        assert!(html.contains("filters-form"));
        assert!(html.contains("name=\"tradeable_only\""));
        assert!(html.contains("name=\"liquidity_min\""));
        assert!(html.contains("name=\"domain\" value=\"Crypto Prices\""));
        assert!(html.contains("addEventListener('change'"));
        assert!(html.contains("Markets by domain"));
        assert!(html.contains("/dashboard/market/demo-1"));
    }

    #[test]
    fn fmt_opt_uses_dash_for_sentinels() {
        assert_eq!(fmt_opt(None, 3), "-");
        assert_eq!(fmt_opt(Some(f64::NAN), 3), "-");
        assert_eq!(fmt_opt(Some(0.12345), 3), "0.123");
    }

    /// Fails until `up` is set, then serves one record.
    struct FlakySource {
        up: std::sync::atomic::AtomicBool,
    }

    impl MarketSource for FlakySource {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn fetch(&self) -> Result<crate::source::SourceBatch, crate::source::SourceError> {
            if !self.up.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(crate::source::SourceError::Unavailable("down".to_string()));
            }
            Ok(crate::source::SourceBatch {
                records: vec![MarketRecord::with_id("m-1")],
                report: Default::default(),
            })
        }
    }

    #[test]
    fn cached_provider_retries_after_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FlakySource {
            up: std::sync::atomic::AtomicBool::new(false),
        });
        let provider = CachedSnapshotProvider::new(
            SnapshotCache::new(dir.path().join("markets.csv")),
            source.clone(),
        );

        assert_eq!(provider.current().status.as_str(), "unavailable");

        source.up.store(true, std::sync::atomic::Ordering::SeqCst);
        let outcome = provider.current();
        assert_eq!(outcome.status, LoadStatus::Fetched);
        assert_eq!(outcome.snapshot.records.len(), 1);

        // memoised from here on, even though the cache is now on disk
        assert_eq!(provider.current().status, LoadStatus::Fetched);
        assert_eq!(provider.refresh().status, LoadStatus::Fetched);
    }
}
