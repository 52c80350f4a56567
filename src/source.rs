//! Market data source: paginated Gamma `/events` snapshot of open markets.

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::record::{parse_timestamp, MalformedRecord, MarketRecord};

pub const GAMMA_API_BASE_URL: &str = "https://gamma-api.polymarket.com";

#[derive(Debug, Clone, PartialEq)]
pub struct GammaSourceConfig {
    pub base_url: String,
    pub http_timeout_ms: u64,
    pub page_limit: usize,
    pub min_liquidity: f64,
    pub only_tradeable: bool,
}

impl Default for GammaSourceConfig {
    fn default() -> Self {
        Self {
            base_url: GAMMA_API_BASE_URL.to_string(),
            http_timeout_ms: 20_000,
            page_limit: 100,
            min_liquidity: 0.0,
            only_tradeable: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub pages: u64,
    pub events: u64,
    pub markets_seen: u64,
    pub kept: u64,
    pub filtered_out: u64,
    pub malformed_skipped: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceBatch {
    pub records: Vec<MarketRecord>,
    pub report: FetchReport,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP client build error: {0}")]
    HttpClientBuild(String),
    #[error("HTTP request failed for {url}: {message}")]
    Http { url: String, message: String },
    #[error("unexpected response body from {url}: {message}")]
    InvalidBody { url: String, message: String },
    #[error("invalid source config: {0}")]
    InvalidConfig(String),
    #[error("market source unavailable: {0}")]
    Unavailable(String),
}

/// Anything that can hand back a full snapshot of raw market records.
pub trait MarketSource: Send + Sync {
    fn name(&self) -> &'static str;
    fn fetch(&self) -> Result<SourceBatch, SourceError>;
}

trait PageFetcher {
    fn get_json(&self, url: &str) -> Result<Value, SourceError>;
}

struct ReqwestBlockingFetcher {
    client: reqwest::blocking::Client,
}

impl ReqwestBlockingFetcher {
    fn new(timeout_ms: u64) -> Result<Self, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|err| SourceError::HttpClientBuild(err.to_string()))?;
        Ok(Self { client })
    }
}

impl PageFetcher for ReqwestBlockingFetcher {
    fn get_json(&self, url: &str) -> Result<Value, SourceError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| SourceError::Http {
                url: url.to_string(),
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Http {
                url: url.to_string(),
                message: format!("unexpected HTTP status {status}"),
            });
        }

        let bytes = response.bytes().map_err(|err| SourceError::Http {
            url: url.to_string(),
            message: err.to_string(),
        })?;

        serde_json::from_slice(&bytes).map_err(|err| SourceError::InvalidBody {
            url: url.to_string(),
            message: err.to_string(),
        })
    }
}

/// Live source backed by the Gamma REST API.
pub struct GammaEventsSource {
    cfg: GammaSourceConfig,
}

impl GammaEventsSource {
    pub fn new(cfg: GammaSourceConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &GammaSourceConfig {
        &self.cfg
    }
}

impl MarketSource for GammaEventsSource {
    fn name(&self) -> &'static str {
        "gamma_events"
    }

    fn fetch(&self) -> Result<SourceBatch, SourceError> {
        let fetcher = ReqwestBlockingFetcher::new(self.cfg.http_timeout_ms)?;
        fetch_all_with_fetcher(&self.cfg, &fetcher)
    }
}

fn fetch_all_with_fetcher(
    cfg: &GammaSourceConfig,
    fetcher: &dyn PageFetcher,
) -> Result<SourceBatch, SourceError> {
    if cfg.page_limit == 0 {
        return Err(SourceError::InvalidConfig(
            "page_limit must be >= 1".to_string(),
        ));
    }

    let events_url = format!("{}/events", cfg.base_url.trim_end_matches('/'));
    info!(
        component = "gamma",
        event = "gamma.fetch.start",
        url = %events_url,
        page_limit = cfg.page_limit,
        only_tradeable = cfg.only_tradeable,
        min_liquidity = cfg.min_liquidity
    );

    let mut records = Vec::new();
    let mut report = FetchReport::default();
    let mut offset = 0usize;

    loop {
        let url = events_page_url(&events_url, cfg.page_limit, offset);
        let body = fetcher.get_json(&url)?;
        let events = events_from_body(&url, body)?;
        report.pages += 1;

        debug!(
            component = "gamma",
            event = "gamma.fetch.page",
            offset,
            events = events.len()
        );

        if events.is_empty() {
            break;
        }

        let page_len = events.len();
        for event in &events {
            report.events += 1;
            extract_event_markets(event, cfg, &mut records, &mut report);
        }

        if page_len < cfg.page_limit {
            break;
        }
        offset += cfg.page_limit;
    }

    info!(
        component = "gamma",
        event = "gamma.fetch.finish",
        pages = report.pages,
        events = report.events,
        markets_seen = report.markets_seen,
        kept = report.kept,
        filtered_out = report.filtered_out,
        malformed_skipped = report.malformed_skipped
    );

    Ok(SourceBatch { records, report })
}

fn events_page_url(events_url: &str, limit: usize, offset: usize) -> String {
    format!("{events_url}?order=id&ascending=false&closed=false&limit={limit}&offset={offset}")
}

fn events_from_body(url: &str, body: Value) -> Result<Vec<Value>, SourceError> {
    match body {
        Value::Array(events) => Ok(events),
        Value::Object(mut map) => match map.remove("events") {
            Some(Value::Array(events)) => Ok(events),
            _ => Err(SourceError::InvalidBody {
                url: url.to_string(),
                message: "object response without an events array".to_string(),
            }),
        },
        other => Err(SourceError::InvalidBody {
            url: url.to_string(),
            message: format!("expected list of events, got {}", json_kind(&other)),
        }),
    }
}

fn extract_event_markets(
    event: &Value,
    cfg: &GammaSourceConfig,
    records: &mut Vec<MarketRecord>,
    report: &mut FetchReport,
) {
    let Some(event) = event.as_object() else {
        report.malformed_skipped += 1;
        let reason = MalformedRecord::NotAnObject;
        warn!(
            component = "gamma",
            event = "gamma.record.malformed",
            reason = %reason,
            scope = "event"
        );
        return;
    };

    let context = EventContext::from_json(event);
    let markets = event
        .get("markets")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for market in markets {
        report.markets_seen += 1;
        match market_from_json(market, &context, cfg) {
            Ok(Some(record)) => {
                report.kept += 1;
                records.push(record);
            }
            Ok(None) => report.filtered_out += 1,
            Err(reason) => {
                report.malformed_skipped += 1;
                warn!(
                    component = "gamma",
                    event = "gamma.record.malformed",
                    reason = %reason,
                    event_id = context.event_id.as_deref().unwrap_or("-")
                );
            }
        }
    }
}

struct EventContext {
    event_id: Option<String>,
    event_slug: Option<String>,
    event_title: Option<String>,
    event_subtitle: Option<String>,
    event_category: Option<String>,
    event_tags_labels: Option<String>,
    event_start_date: Option<chrono::DateTime<chrono::Utc>>,
    event_end_date: Option<chrono::DateTime<chrono::Utc>>,
    event_liquidity: f64,
    event_volume: f64,
    event_open_interest: f64,
    event_closed: bool,
}

impl EventContext {
    fn from_json(event: &serde_json::Map<String, Value>) -> Self {
        let tags = event
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(|tag| tag.get("label").and_then(Value::as_str))
                    .map(str::trim)
                    .filter(|label| !label.is_empty())
                    .collect::<Vec<_>>()
                    .join("|")
            })
            .filter(|joined| !joined.is_empty());

        Self {
            event_id: text_field(event.get("id")),
            event_slug: text_field(event.get("slug")),
            event_title: text_field(event.get("title")),
            event_subtitle: text_field(event.get("subtitle")),
            event_category: text_field(event.get("category")),
            event_tags_labels: tags,
            event_start_date: timestamp_field(event.get("startDate")),
            event_end_date: timestamp_field(event.get("endDate")),
            event_liquidity: number_field(event.get("liquidity")).unwrap_or(0.0),
            event_volume: number_field(event.get("volume")).unwrap_or(0.0),
            event_open_interest: number_field(event.get("openInterest")).unwrap_or(0.0),
            event_closed: bool_field(event.get("closed")).unwrap_or(false),
        }
    }
}

/// `Ok(None)` means the market parsed but was filtered out.
fn market_from_json(
    market: &Value,
    event: &EventContext,
    cfg: &GammaSourceConfig,
) -> Result<Option<MarketRecord>, MalformedRecord> {
    let market = market.as_object().ok_or(MalformedRecord::NotAnObject)?;
    let market_id = text_field(market.get("id")).ok_or(MalformedRecord::MissingId)?;

    let market_closed = bool_field(market.get("closed")).unwrap_or(event.event_closed);
    let market_active = bool_field(market.get("active")).unwrap_or(true);
    let enable_order_book = bool_field(market.get("enableOrderBook")).unwrap_or(true);
    let accepting_orders = bool_field(market.get("acceptingOrders")).unwrap_or(true);

    if market_closed || !market_active {
        return Ok(None);
    }
    if cfg.only_tradeable && (!enable_order_book || !accepting_orders) {
        return Ok(None);
    }

    let liquidity_num = first_number(market, &["liquidityNum", "liquidity"]).unwrap_or(0.0);
    if liquidity_num < cfg.min_liquidity {
        return Ok(None);
    }

    let market_end_date = timestamp_field(market.get("endDate"))
        .or_else(|| timestamp_field(market.get("endDateIso")))
        .or(event.event_end_date);

    Ok(Some(MarketRecord {
        event_id: event.event_id.clone(),
        event_slug: event.event_slug.clone(),
        event_title: event.event_title.clone(),
        event_subtitle: event.event_subtitle.clone(),
        event_category: event.event_category.clone(),
        event_tags_labels: event.event_tags_labels.clone(),
        event_start_date: event.event_start_date,
        event_end_date: event.event_end_date,
        event_liquidity: event.event_liquidity,
        event_volume: event.event_volume,
        event_open_interest: event.event_open_interest,
        market_id,
        market_slug: text_field(market.get("slug")),
        market_question: text_field(market.get("question")),
        market_description: text_field(market.get("description")),
        market_category: text_field(market.get("category")),
        market_type: text_field(market.get("marketType")),
        resolution_source: text_field(market.get("resolutionSource")),
        market_end_date,
        market_active,
        market_closed,
        enable_order_book,
        accepting_orders,
        liquidity_num,
        liquidity_amm: number_field(market.get("liquidityAmm")).unwrap_or(0.0),
        liquidity_clob: number_field(market.get("liquidityClob")).unwrap_or(0.0),
        volume_num: first_number(market, &["volumeNum", "volume"]).unwrap_or(0.0),
        volume_24h: number_field(market.get("volume24hr")).unwrap_or(0.0),
        volume_1w: number_field(market.get("volume1wk")).unwrap_or(0.0),
        volume_1m: number_field(market.get("volume1mo")).unwrap_or(0.0),
        last_trade_price: number_field(market.get("lastTradePrice")),
        best_bid: number_field(market.get("bestBid")),
        best_ask: number_field(market.get("bestAsk")),
        outcomes_raw: text_field(market.get("outcomes")),
        outcome_prices_raw: text_field(market.get("outcomePrices")),
        clob_token_ids: text_field(market.get("clobTokenIds")),
    }))
}

/// Strings pass through; numbers and lists are stringified (lists as JSON).
fn text_field(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other @ (Value::Array(_) | Value::Object(_)) => other.to_string(),
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn number_field(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

fn first_number(map: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| number_field(map.get(*key)))
}

fn bool_field(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn timestamp_field(value: Option<&Value>) -> Option<chrono::DateTime<chrono::Utc>> {
    value.and_then(Value::as_str).and_then(parse_timestamp)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Serves a fixed list of records. Useful for demos and tests.
pub struct StaticMarketSource {
    records: Vec<MarketRecord>,
}

impl StaticMarketSource {
    pub fn new(records: Vec<MarketRecord>) -> Self {
        Self { records }
    }
}

impl MarketSource for StaticMarketSource {
    fn name(&self) -> &'static str {
        "static"
    }

    fn fetch(&self) -> Result<SourceBatch, SourceError> {
        let count = self.records.len() as u64;
        Ok(SourceBatch {
            records: self.records.clone(),
            report: FetchReport {
                pages: 1,
                markets_seen: count,
                kept: count,
                ..FetchReport::default()
            },
        })
    }
}

/// Always fails, like an unreachable API.
pub struct UnreachableMarketSource;

impl MarketSource for UnreachableMarketSource {
    fn name(&self) -> &'static str {
        "unreachable"
    }

    fn fetch(&self) -> Result<SourceBatch, SourceError> {
        Err(SourceError::Unavailable(
            "market source is unreachable".to_string(),
        ))
    }
}
