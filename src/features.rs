//! Per-record feature derivation: spread, mid-price, domain flags and the
//! versioned quality score.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::record::MarketRecord;

/// Bumped whenever the quality-score weights or caps change.
pub const QUALITY_SCORE_VERSION: u32 = 1;

const LIQUIDITY_REFERENCE_USD: f64 = 100_000.0;
const VOLUME_CAP_USD: f64 = 1_000.0;
const SPREAD_CAP: f64 = 0.10;
const HORIZON_CAP_DAYS: f64 = 100.0;

const WEIGHT_LIQUIDITY: f64 = 0.35;
const WEIGHT_VOLUME: f64 = 0.30;
const WEIGHT_SPREAD: f64 = 0.20;
const WEIGHT_TIME: f64 = 0.15;

const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Domain {
    Sports,
    Elections,
    Politics,
    #[serde(rename = "Crypto Prices")]
    CryptoPrices,
    Crypto,
    Tech,
    Finance,
    Culture,
    Other,
}

impl Domain {
    pub const ALL: [Domain; 9] = [
        Domain::Sports,
        Domain::Elections,
        Domain::Politics,
        Domain::CryptoPrices,
        Domain::Crypto,
        Domain::Tech,
        Domain::Finance,
        Domain::Culture,
        Domain::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sports => "Sports",
            Self::Elections => "Elections",
            Self::Politics => "Politics",
            Self::CryptoPrices => "Crypto Prices",
            Self::Crypto => "Crypto",
            Self::Tech => "Tech",
            Self::Finance => "Finance",
            Self::Culture => "Culture",
            Self::Other => "Other",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let wanted = raw.trim();
        Self::ALL
            .into_iter()
            .find(|domain| domain.as_str().eq_ignore_ascii_case(wanted))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DomainFlags {
    pub is_elections: bool,
    pub is_global_elections: bool,
    pub is_politics: bool,
    pub is_crypto: bool,
    pub is_crypto_prices: bool,
    pub is_tech: bool,
    pub is_finance: bool,
    pub is_sports: bool,
    pub is_culture: bool,
}

impl DomainFlags {
    pub fn from_tags(tags_labels: Option<&str>) -> Self {
        let text = tags_labels.unwrap_or_default();
        if text.trim().is_empty() {
            return Self::default();
        }

        let patterns = tag_patterns();
        let has = |idx: usize| patterns[idx].is_match(text);

        Self {
            is_elections: has(0),
            is_global_elections: has(1),
            is_politics: has(2),
            is_crypto: has(3),
            is_crypto_prices: has(4),
            is_tech: has(5),
            is_finance: has(6),
            is_sports: has(7),
            is_culture: has(8),
        }
    }

    pub fn domain(&self) -> Domain {
        if self.is_sports {
            Domain::Sports
        } else if self.is_global_elections || self.is_elections {
            Domain::Elections
        } else if self.is_politics {
            Domain::Politics
        } else if self.is_crypto_prices {
            Domain::CryptoPrices
        } else if self.is_crypto {
            Domain::Crypto
        } else if self.is_tech {
            Domain::Tech
        } else if self.is_finance {
            Domain::Finance
        } else if self.is_culture {
            Domain::Culture
        } else {
            Domain::Other
        }
    }
}

fn tag_patterns() -> &'static [Regex; 9] {
    static PATTERNS: OnceLock<[Regex; 9]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            "Elections",
            "Global Elections",
            "Politics",
            "Crypto",
            "Crypto Prices",
            "Tech",
            "Finance",
            "Sports",
            "Culture",
        ]
        .map(|name| Regex::new(&format!(r"\b{name}\b")).expect("static tag pattern compiles"))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityBasis {
    /// Liquidity, volume, spread and horizon all contributed.
    Full,
    /// Best bid or ask was missing; the spread term is dropped.
    Degraded,
}

impl QualityBasis {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Degraded => "degraded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedFields {
    pub spread: Option<f64>,
    pub mid_price: Option<f64>,
    pub time_to_resolution_days: Option<f64>,
    pub is_binary_like: bool,
    #[serde(flatten)]
    pub flags: DomainFlags,
    pub domain: Domain,
    pub p_true: Option<f64>,
    pub implied_prob: Option<f64>,
    pub edge: Option<f64>,
    pub quality_score: f64,
    pub quality_basis: QualityBasis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedMarketRecord {
    #[serde(flatten)]
    pub record: MarketRecord,
    #[serde(flatten)]
    pub derived: DerivedFields,
}

/// Enriches one record. `as_of` anchors the time-to-resolution horizon, so
/// the same record and `as_of` always produce the same output.
pub fn derive(record: &MarketRecord, as_of: DateTime<Utc>) -> EnrichedMarketRecord {
    let (spread, mid_price) = match (record.best_bid, record.best_ask) {
        (Some(bid), Some(ask)) if bid.is_finite() && ask.is_finite() => {
            (Some(ask - bid), Some((bid + ask) / 2.0))
        }
        _ => (None, None),
    };

    let time_to_resolution_days = record
        .market_end_date
        .map(|end| (end - as_of).num_milliseconds() as f64 / 1_000.0 / SECONDS_PER_DAY);

    let flags = DomainFlags::from_tags(record.event_tags_labels.as_deref());
    let (quality_score, quality_basis) = quality_score(
        record.liquidity_num,
        record.volume_24h,
        spread,
        time_to_resolution_days,
    );

    EnrichedMarketRecord {
        record: record.clone(),
        derived: DerivedFields {
            spread,
            mid_price,
            time_to_resolution_days,
            is_binary_like: looks_binary(record.outcomes_raw.as_deref()),
            flags,
            domain: flags.domain(),
            p_true: None,
            implied_prob: mid_price,
            edge: None,
            quality_score,
            quality_basis,
        },
    }
}

pub fn derive_all(records: &[MarketRecord], as_of: DateTime<Utc>) -> Vec<EnrichedMarketRecord> {
    records.iter().map(|record| derive(record, as_of)).collect()
}

/// Quality score in `[0, 1]`, version [`QUALITY_SCORE_VERSION`].
pub fn quality_score(
    liquidity: f64,
    volume_24h: f64,
    spread: Option<f64>,
    time_to_resolution_days: Option<f64>,
) -> (f64, QualityBasis) {
    let liquidity_score =
        ((1.0 + finite_or_zero(liquidity).max(0.0)).ln() / (1.0 + LIQUIDITY_REFERENCE_USD).ln())
            .min(1.0);
    let volume_score = (finite_or_zero(volume_24h).max(0.0) / VOLUME_CAP_USD).min(1.0);
    let time_score = match time_to_resolution_days {
        Some(days) if days.is_finite() => 1.0 - (days.max(0.0) / HORIZON_CAP_DAYS).min(1.0),
        _ => 0.0,
    };

    let base =
        WEIGHT_LIQUIDITY * liquidity_score + WEIGHT_VOLUME * volume_score + WEIGHT_TIME * time_score;

    match spread {
        Some(spread) if spread.is_finite() => {
            let spread_score = 1.0 - (spread.max(0.0) / SPREAD_CAP).min(1.0);
            (base + WEIGHT_SPREAD * spread_score, QualityBasis::Full)
        }
        _ => (base, QualityBasis::Degraded),
    }
}

/// Rough check that an outcome list holds exactly two entries. Accepts
/// JSON-ish `["Yes","No"]`, `Yes,No` and `Yes|No`.
pub fn looks_binary(outcomes_raw: Option<&str>) -> bool {
    let Some(text) = outcomes_raw.map(str::trim) else {
        return false;
    };
    if text.is_empty() {
        return false;
    }

    let tokens: Vec<&str> = if text.starts_with('[') && text.ends_with(']') {
        text[1..text.len() - 1]
            .split(',')
            .map(|t| t.trim().trim_matches('"').trim_matches('\''))
            .collect()
    } else if text.contains(',') {
        text.split(',').map(str::trim).collect()
    } else if text.contains('|') {
        text.split('|').map(str::trim).collect()
    } else {
        vec![text]
    };

    tokens.into_iter().filter(|t| !t.is_empty()).count() == 2
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn priced(bid: Option<f64>, ask: Option<f64>) -> MarketRecord {
        let mut record = MarketRecord::with_id("m1");
        record.best_bid = bid;
        record.best_ask = ask;
        record.volume_24h = 1_000.0;
        record
    }

    #[test]
    fn spread_and_mid_follow_bid_and_ask() {
        let enriched = derive(&priced(Some(0.40), Some(0.45)), as_of());
        let spread = enriched.derived.spread.unwrap();
        let mid = enriched.derived.mid_price.unwrap();
        assert!((spread - 0.05).abs() < 1e-12);
        assert!((mid - 0.425).abs() < 1e-12);
        assert_eq!(enriched.derived.implied_prob, Some(mid));
        assert_eq!(enriched.derived.quality_basis, QualityBasis::Full);
    }

    #[test]
    fn missing_side_yields_sentinels_and_degraded_score() {
        for (bid, ask) in [(None, Some(0.5)), (Some(0.5), None), (None, None)] {
            let enriched = derive(&priced(bid, ask), as_of());
            assert_eq!(enriched.derived.spread, None);
            assert_eq!(enriched.derived.mid_price, None);
            assert_eq!(enriched.derived.quality_basis, QualityBasis::Degraded);
            assert!(enriched.derived.quality_score.is_finite());
        }
    }

    #[test]
    fn rederiving_from_enriched_record_is_stable() {
        let mut record = priced(Some(0.12), Some(0.19));
        record.event_tags_labels = Some("Politics|Elections".to_string());
        record.market_end_date = Some(Utc.with_ymd_and_hms(2025, 2, 15, 12, 0, 0).unwrap());
        record.outcomes_raw = Some("[\"Yes\", \"No\"]".to_string());

        let once = derive(&record, as_of());
        let twice = derive(&once.record, as_of());
        assert_eq!(once, twice);
    }

    #[test]
    fn quality_score_matches_documented_formula() {
        let (score, basis) = quality_score(1_000.0, 500.0, Some(0.02), Some(25.0));
        let l = (1.0_f64 + 1_000.0).ln() / (1.0_f64 + 100_000.0).ln();
        let expected = 0.35 * l + 0.30 * 0.5 + 0.20 * 0.8 + 0.15 * 0.75;
        assert!((score - expected).abs() < 1e-12);
        assert_eq!(basis, QualityBasis::Full);

        let (degraded, basis) = quality_score(1_000.0, 500.0, None, Some(25.0));
        assert!((degraded - (expected - 0.20 * 0.8)).abs() < 1e-12);
        assert_eq!(basis, QualityBasis::Degraded);
    }

    #[test]
    fn quality_score_stays_in_unit_interval() {
        let (high, _) = quality_score(1e12, 1e12, Some(-0.5), Some(-3.0));
        assert!((high - 1.0).abs() < 1e-12);
        let (low, _) = quality_score(-5.0, f64::NAN, Some(5.0), None);
        assert_eq!(low, 0.0);
    }

    #[test]
    fn domain_priority_prefers_sports_then_elections() {
        let flags = DomainFlags::from_tags(Some("Politics|Sports"));
        assert_eq!(flags.domain(), Domain::Sports);

        let flags = DomainFlags::from_tags(Some("Global Elections|Politics"));
        assert!(flags.is_elections);
        assert!(flags.is_global_elections);
        assert_eq!(flags.domain(), Domain::Elections);

        let flags = DomainFlags::from_tags(Some("Crypto Prices"));
        assert!(flags.is_crypto);
        assert_eq!(flags.domain(), Domain::CryptoPrices);

        assert_eq!(DomainFlags::from_tags(Some("Technology")).domain(), Domain::Other);
        assert_eq!(DomainFlags::from_tags(None).domain(), Domain::Other);
    }

    #[test]
    fn binary_detection_handles_common_shapes() {
        assert!(looks_binary(Some("[\"Yes\", \"No\"]")));
        assert!(looks_binary(Some("Yes,No")));
        assert!(looks_binary(Some("Up|Down")));
        assert!(!looks_binary(Some("[\"A\", \"B\", \"C\"]")));
        assert!(!looks_binary(Some("Yes")));
        assert!(!looks_binary(None));
    }

    #[test]
    fn horizon_is_measured_from_as_of() {
        let mut record = MarketRecord::with_id("m1");
        record.market_end_date = Some(Utc.with_ymd_and_hms(2025, 1, 11, 0, 0, 0).unwrap());
        let enriched = derive(&record, as_of());
        assert_eq!(enriched.derived.time_to_resolution_days, Some(10.0));
    }

    #[test]
    fn domain_parse_is_case_insensitive() {
        assert_eq!(Domain::parse("crypto prices"), Some(Domain::CryptoPrices));
        assert_eq!(Domain::parse("Other"), Some(Domain::Other));
        assert_eq!(Domain::parse("weather"), None);
    }
}
