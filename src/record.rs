//! Raw market rows as flattened from the Gamma `/events` payload.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a single raw record was skipped. Never aborts a whole load.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedRecord {
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("record has no market id")]
    MissingId,
    #[error("field {field} has invalid value '{value}'")]
    InvalidField { field: &'static str, value: String },
    #[error("row has {found} columns, header has {expected}")]
    ColumnCount { found: usize, expected: usize },
    #[error("row could not be decoded: {0}")]
    Undecodable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    Active,
    Closed,
}

impl MarketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// One market plus the context of the event it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketRecord {
    pub event_id: Option<String>,
    pub event_slug: Option<String>,
    pub event_title: Option<String>,
    pub event_subtitle: Option<String>,
    pub event_category: Option<String>,
    pub event_tags_labels: Option<String>,
    pub event_start_date: Option<DateTime<Utc>>,
    pub event_end_date: Option<DateTime<Utc>>,
    pub event_liquidity: f64,
    pub event_volume: f64,
    pub event_open_interest: f64,

    pub market_id: String,
    pub market_slug: Option<String>,
    pub market_question: Option<String>,
    pub market_description: Option<String>,
    pub market_category: Option<String>,
    pub market_type: Option<String>,
    pub resolution_source: Option<String>,
    pub market_end_date: Option<DateTime<Utc>>,

    pub market_active: bool,
    pub market_closed: bool,
    pub enable_order_book: bool,
    pub accepting_orders: bool,

    pub liquidity_num: f64,
    pub liquidity_amm: f64,
    pub liquidity_clob: f64,
    pub volume_num: f64,
    pub volume_24h: f64,
    pub volume_1w: f64,
    pub volume_1m: f64,

    pub last_trade_price: Option<f64>,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,

    pub outcomes_raw: Option<String>,
    pub outcome_prices_raw: Option<String>,
    pub clob_token_ids: Option<String>,
}

impl MarketRecord {
    /// A record with only an id; every other field takes its fetch default.
    pub fn with_id(market_id: impl Into<String>) -> Self {
        Self {
            event_id: None,
            event_slug: None,
            event_title: None,
            event_subtitle: None,
            event_category: None,
            event_tags_labels: None,
            event_start_date: None,
            event_end_date: None,
            event_liquidity: 0.0,
            event_volume: 0.0,
            event_open_interest: 0.0,
            market_id: market_id.into(),
            market_slug: None,
            market_question: None,
            market_description: None,
            market_category: None,
            market_type: None,
            resolution_source: None,
            market_end_date: None,
            market_active: true,
            market_closed: false,
            enable_order_book: true,
            accepting_orders: true,
            liquidity_num: 0.0,
            liquidity_amm: 0.0,
            liquidity_clob: 0.0,
            volume_num: 0.0,
            volume_24h: 0.0,
            volume_1w: 0.0,
            volume_1m: 0.0,
            last_trade_price: None,
            best_bid: None,
            best_ask: None,
            outcomes_raw: None,
            outcome_prices_raw: None,
            clob_token_ids: None,
        }
    }

    pub fn status(&self) -> MarketStatus {
        if self.market_active && !self.market_closed {
            MarketStatus::Active
        } else {
            MarketStatus::Closed
        }
    }

    pub fn is_tradeable(&self) -> bool {
        self.status() == MarketStatus::Active && self.enable_order_book && self.accepting_orders
    }
}

/// Parses the timestamp shapes Gamma emits: RFC 3339 or a bare `YYYY-MM-DD`.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

pub fn market_url(record: &MarketRecord) -> Option<String> {
    if let Some(slug) = non_empty(&record.event_slug) {
        return Some(format!("https://polymarket.com/event/{slug}"));
    }
    non_empty(&record.market_slug).map(|slug| format!("https://polymarket.com/market/{slug}"))
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
