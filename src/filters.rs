//! Global filters shared by every view.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::features::{Domain, EnrichedMarketRecord};
use crate::record::MarketStatus;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterParseError {
    #[error("invalid number for {key}: '{value}'")]
    InvalidNumber { key: String, value: String },
    #[error("invalid boolean for {key}: '{value}'")]
    InvalidBool { key: String, value: String },
    #[error("unknown domain '{0}'")]
    UnknownDomain(String),
    #[error("unknown status '{0}'")]
    UnknownStatus(String),
    #[error("unknown sort '{0}'")]
    UnknownSort(String),
    #[error("range for {key} has min {min} above max {max}")]
    InvertedRange { key: String, min: f64, max: f64 },
}

/// Inclusive range; an absent bound is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NumericRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl NumericRange {
    pub fn between(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn at_least(min: f64) -> Self {
        Self {
            min: Some(min),
            max: None,
        }
    }

    pub fn at_most(max: f64) -> Self {
        Self {
            min: None,
            max: Some(max),
        }
    }

    /// Sentinels (`None`, NaN) never fall inside a range.
    pub fn contains(&self, value: Option<f64>) -> bool {
        let Some(value) = value.filter(|v| !v.is_nan()) else {
            return false;
        };
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub tradeable_only: bool,
    pub status: Option<MarketStatus>,
    pub liquidity: Option<NumericRange>,
    pub volume_24h: Option<NumericRange>,
    pub spread: Option<NumericRange>,
    pub mid_price: Option<NumericRange>,
    pub time_to_resolution_days: Option<NumericRange>,
    pub quality_score: Option<NumericRange>,
    pub domains: Vec<Domain>,
    pub search: Option<String>,
    pub binary_only: bool,
    pub exclude_up_or_down: bool,
    pub require_activity: bool,
}

impl FilterSpec {
    /// The sidebar defaults a fresh dashboard session starts from.
    pub fn suggested() -> Self {
        Self {
            tradeable_only: true,
            spread: Some(NumericRange::between(0.0, 0.10)),
            time_to_resolution_days: Some(NumericRange::between(0.0, 90.0)),
            exclude_up_or_down: true,
            ..Self::default()
        }
    }

    /// Builds a spec from URL query pairs.
    ///
    /// Ranges use `<field>_min` / `<field>_max`; `domain` may repeat or hold a
    /// comma-separated list. Booleans absent from the query are off. Unknown
    /// keys and empty values are ignored.
    pub fn from_query_pairs<K, V>(pairs: &[(K, V)]) -> Result<Self, FilterParseError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut spec = Self::default();
        let mut bounds = RangeBounds::default();

        for (key, value) in pairs {
            let key = key.as_ref();
            let value = value.as_ref().trim();
            if value.is_empty() {
                continue;
            }

            match key {
                "tradeable_only" => spec.tradeable_only = parse_bool(key, value)?,
                "binary_only" => spec.binary_only = parse_bool(key, value)?,
                "exclude_up_or_down" => spec.exclude_up_or_down = parse_bool(key, value)?,
                "require_activity" => spec.require_activity = parse_bool(key, value)?,
                "status" => {
                    spec.status = Some(
                        MarketStatus::parse(value)
                            .ok_or_else(|| FilterParseError::UnknownStatus(value.to_string()))?,
                    )
                }
                "domain" => {
                    for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                        let domain = Domain::parse(part)
                            .ok_or_else(|| FilterParseError::UnknownDomain(part.to_string()))?;
                        if !spec.domains.contains(&domain) {
                            spec.domains.push(domain);
                        }
                    }
                }
                "search" => spec.search = Some(value.to_string()),
                other => {
                    if let Some((field, bound)) = range_key(other) {
                        if RANGE_FIELDS.contains(&field) {
                            bounds.set(field, bound, parse_number(key, value)?);
                        }
                    }
                }
            }
        }

        spec.liquidity = build_range("liquidity", bounds.liquidity)?;
        spec.volume_24h = build_range("volume_24h", bounds.volume_24h)?;
        spec.spread = build_range("spread", bounds.spread)?;
        spec.mid_price = build_range("mid_price", bounds.mid_price)?;
        spec.time_to_resolution_days = build_range("ttr", bounds.ttr)?;
        spec.quality_score = build_range("quality", bounds.quality)?;
        Ok(spec)
    }

    /// [`FilterSpec::suggested`] until the query carries any filter key
    /// (the filter form always sends `filters`), then exactly what was sent.
    pub fn from_query_or_suggested<K, V>(pairs: &[(K, V)]) -> Result<Self, FilterParseError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        if pairs.iter().any(|(key, _)| is_filter_key(key.as_ref())) {
            Self::from_query_pairs(pairs)
        } else {
            Ok(Self::suggested())
        }
    }

    pub fn matches(&self, row: &EnrichedMarketRecord) -> bool {
        let record = &row.record;
        let derived = &row.derived;

        if self.tradeable_only && !record.is_tradeable() {
            return false;
        }
        if let Some(status) = self.status {
            if record.status() != status {
                return false;
            }
        }

        let ranges = [
            (self.liquidity, Some(record.liquidity_num)),
            (self.volume_24h, Some(record.volume_24h)),
            (self.spread, derived.spread),
            (self.mid_price, derived.mid_price),
            (self.time_to_resolution_days, derived.time_to_resolution_days),
            (self.quality_score, Some(derived.quality_score)),
        ];
        if ranges
            .iter()
            .any(|(range, value)| range.is_some_and(|range| !range.contains(*value)))
        {
            return false;
        }

        if !self.domains.is_empty() && !self.domains.contains(&derived.domain) {
            return false;
        }

        if let Some(needle) = self.search.as_deref().map(str::to_lowercase) {
            let hit = [&record.market_question, &record.event_title]
                .into_iter()
                .flatten()
                .any(|text| text.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }

        if self.binary_only && !derived.is_binary_like {
            return false;
        }
        if self.exclude_up_or_down && is_up_or_down(record.event_title.as_deref()) {
            return false;
        }
        if self.require_activity && !(record.liquidity_num > 0.0 && record.volume_24h > 0.0) {
            return false;
        }

        true
    }
}

/// Keeps the rows matching every predicate of `spec`, in input order.
pub fn apply(rows: &[EnrichedMarketRecord], spec: &FilterSpec) -> Vec<EnrichedMarketRecord> {
    rows.iter().filter(|row| spec.matches(row)).cloned().collect()
}

pub(crate) fn is_up_or_down(title: Option<&str>) -> bool {
    title.is_some_and(|t| t.to_lowercase().contains("up or down"))
}

#[derive(Debug, Clone, Copy)]
enum Bound {
    Min,
    Max,
}

type Bounds = (Option<f64>, Option<f64>);

#[derive(Debug, Default)]
struct RangeBounds {
    liquidity: Bounds,
    volume_24h: Bounds,
    spread: Bounds,
    mid_price: Bounds,
    ttr: Bounds,
    quality: Bounds,
}

impl RangeBounds {
    fn set(&mut self, field: &str, bound: Bound, value: f64) {
        let slot = match field {
            "liquidity" => &mut self.liquidity,
            "volume_24h" => &mut self.volume_24h,
            "spread" => &mut self.spread,
            "mid_price" => &mut self.mid_price,
            "ttr" => &mut self.ttr,
            "quality" => &mut self.quality,
            _ => return,
        };
        match bound {
            Bound::Min => slot.0 = Some(value),
            Bound::Max => slot.1 = Some(value),
        }
    }
}

fn build_range(key: &str, bounds: Bounds) -> Result<Option<NumericRange>, FilterParseError> {
    match bounds {
        (None, None) => Ok(None),
        (Some(min), Some(max)) if min > max => Err(FilterParseError::InvertedRange {
            key: key.to_string(),
            min,
            max,
        }),
        (min, max) => Ok(Some(NumericRange { min, max })),
    }
}

const RANGE_FIELDS: [&str; 6] = [
    "liquidity",
    "volume_24h",
    "spread",
    "mid_price",
    "ttr",
    "quality",
];

fn is_filter_key(key: &str) -> bool {
    matches!(
        key,
        "filters"
            | "tradeable_only"
            | "binary_only"
            | "exclude_up_or_down"
            | "require_activity"
            | "status"
            | "domain"
            | "search"
    ) || range_key(key).is_some_and(|(field, _)| RANGE_FIELDS.contains(&field))
}

fn range_key(key: &str) -> Option<(&str, Bound)> {
    if let Some(field) = key.strip_suffix("_min") {
        Some((field, Bound::Min))
    } else {
        key.strip_suffix("_max").map(|field| (field, Bound::Max))
    }
}

fn parse_number(key: &str, value: &str) -> Result<f64, FilterParseError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| FilterParseError::InvalidNumber {
            key: key.to_string(),
            value: value.to_string(),
        })
}

pub(crate) fn parse_bool(key: &str, value: &str) -> Result<bool, FilterParseError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        _ => Err(FilterParseError::InvalidBool {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
