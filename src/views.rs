//! Read-only views over a filtered snapshot: overview, domain explorer,
//! trading screener and single-market drilldown.
//!
//! Every view is a pure function of the snapshot, the global [`FilterSpec`]
//! and its own options. Rendering lives in `dashboard`.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;

use crate::features::{Domain, EnrichedMarketRecord};
use crate::filters::{apply, is_up_or_down, parse_bool, FilterParseError, FilterSpec};
use crate::loader::Snapshot;
use crate::record::market_url;

pub const HISTOGRAM_BINS: usize = 40;
pub const OVERVIEW_ROW_LIMIT: usize = 20;
pub const DOMAIN_ROW_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    pub bins: Vec<HistogramBin>,
    /// Values left out by percentile trimming.
    pub excluded: usize,
}

impl Histogram {
    pub fn total(&self) -> usize {
        self.bins.iter().map(|bin| bin.count).sum()
    }

    pub fn lower(&self) -> Option<f64> {
        self.bins.first().map(|bin| bin.lower)
    }

    pub fn upper(&self) -> Option<f64> {
        self.bins.last().map(|bin| bin.upper)
    }
}

/// Equal-width histogram over the value range. `None` for no finite values.
pub fn histogram(values: &[f64], bins: usize) -> Option<Histogram> {
    let values: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let bins = bins.max(1);
    let lo = values.iter().copied().reduce(f64::min)?;
    let hi = values.iter().copied().reduce(f64::max)?;

    if hi <= lo {
        return Some(Histogram {
            bins: vec![HistogramBin {
                lower: lo,
                upper: hi,
                count: values.len(),
            }],
            excluded: 0,
        });
    }

    let width = (hi - lo) / bins as f64;
    let mut out: Vec<HistogramBin> = (0..bins)
        .map(|idx| HistogramBin {
            lower: lo + width * idx as f64,
            upper: if idx + 1 == bins {
                hi
            } else {
                lo + width * (idx + 1) as f64
            },
            count: 0,
        })
        .collect();

    for value in values {
        let idx = (((value - lo) / width).floor() as usize).min(bins - 1);
        out[idx].count += 1;
    }

    Some(Histogram {
        bins: out,
        excluded: 0,
    })
}

/// Histogram of the values between the `low_pct` and `high_pct` percentiles;
/// the rest are counted in [`Histogram::excluded`]. `None` when every value
/// is zero or there are none.
pub fn trimmed_histogram(
    values: &[f64],
    bins: usize,
    low_pct: f64,
    high_pct: f64,
) -> Option<Histogram> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(f64::total_cmp);
    if sorted.last().map_or(true, |max| *max <= 0.0) {
        return None;
    }

    let lo = percentile(&sorted, low_pct)?;
    let hi = percentile(&sorted, high_pct)?;
    let kept: Vec<f64> = sorted
        .iter()
        .copied()
        .filter(|v| *v >= lo && *v <= hi)
        .collect();

    let mut hist = histogram(&kept, bins)?;
    hist.excluded = sorted.len() - kept.len();
    Some(hist)
}

/// Linear-interpolated percentile of an ascending slice, `q` in `[0, 1]`.
pub fn percentile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}

pub fn median(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let mut sorted: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
    sorted.sort_by(f64::total_cmp);
    percentile(&sorted, 0.5)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainCount {
    pub domain: Domain,
    pub markets: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverviewView {
    pub market_count: usize,
    pub total_liquidity: f64,
    pub total_volume_24h: f64,
    pub liquidity_histogram: Option<Histogram>,
    pub volume_histogram: Option<Histogram>,
    pub spread_histogram: Option<Histogram>,
    pub domain_counts: Vec<DomainCount>,
    pub rows: Vec<EnrichedMarketRecord>,
}

pub fn overview(snapshot: &Snapshot, spec: &FilterSpec) -> OverviewView {
    let filtered = apply(&snapshot.records, spec);

    let liquidity: Vec<f64> = filtered.iter().map(|r| r.record.liquidity_num).collect();
    let volume: Vec<f64> = filtered.iter().map(|r| r.record.volume_24h).collect();
    let spreads: Vec<f64> = filtered.iter().filter_map(|r| r.derived.spread).collect();

    let mut domain_counts: Vec<DomainCount> = group_by_domain(&filtered)
        .into_iter()
        .map(|(domain, rows)| DomainCount {
            domain,
            markets: rows.len(),
        })
        .collect();
    domain_counts.sort_by(|a, b| b.markets.cmp(&a.markets));

    OverviewView {
        market_count: filtered.len(),
        total_liquidity: finite_sum(&liquidity),
        total_volume_24h: finite_sum(&volume),
        liquidity_histogram: trimmed_histogram(&liquidity, HISTOGRAM_BINS, 0.05, 0.95),
        volume_histogram: trimmed_histogram(&volume, HISTOGRAM_BINS, 0.05, 0.95),
        spread_histogram: histogram(&spreads, HISTOGRAM_BINS),
        domain_counts,
        rows: filtered.into_iter().take(OVERVIEW_ROW_LIMIT).collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainStats {
    pub domain: Domain,
    pub markets: usize,
    pub median_liquidity: Option<f64>,
    pub median_volume_24h: Option<f64>,
    pub median_spread: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainDetail {
    pub stats: DomainStats,
    pub liquidity_histogram: Option<Histogram>,
    pub spread_histogram: Option<Histogram>,
    pub rows: Vec<EnrichedMarketRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainExplorerView {
    /// Sorted by median liquidity, highest first.
    pub stats: Vec<DomainStats>,
    pub selected: Option<DomainDetail>,
}

/// `selected` defaults to the first domain in `stats`.
pub fn domain_explorer(
    snapshot: &Snapshot,
    spec: &FilterSpec,
    selected: Option<Domain>,
) -> DomainExplorerView {
    let filtered = apply(&snapshot.records, spec);
    let groups = group_by_domain(&filtered);

    let mut stats: Vec<DomainStats> = groups
        .iter()
        .map(|(domain, rows)| domain_stats(*domain, rows))
        .collect();
    stats.sort_by(|a, b| desc_none_last(a.median_liquidity, b.median_liquidity));

    let selected = selected
        .or_else(|| stats.first().map(|s| s.domain))
        .map(|domain| {
            let rows = groups.get(&domain).cloned().unwrap_or_default();
            let liquidity: Vec<f64> = rows.iter().map(|r| r.record.liquidity_num).collect();
            let spreads: Vec<f64> = rows.iter().filter_map(|r| r.derived.spread).collect();
            DomainDetail {
                stats: domain_stats(domain, &rows),
                liquidity_histogram: histogram(&liquidity, HISTOGRAM_BINS),
                spread_histogram: histogram(&spreads, HISTOGRAM_BINS),
                rows: rows.into_iter().take(DOMAIN_ROW_LIMIT).collect(),
            }
        });

    DomainExplorerView { stats, selected }
}

fn domain_stats(domain: Domain, rows: &[EnrichedMarketRecord]) -> DomainStats {
    DomainStats {
        domain,
        markets: rows.len(),
        median_liquidity: median(rows.iter().map(|r| r.record.liquidity_num)),
        median_volume_24h: median(rows.iter().map(|r| r.record.volume_24h)),
        median_spread: median(rows.iter().filter_map(|r| r.derived.spread)),
    }
}

/// The screener's own band filters, applied after the global filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScreenerToggles {
    pub exclude_sports_crypto: bool,
    pub active_only: bool,
    pub liquidity_band: bool,
    pub spread_cap: bool,
    pub min_volume: bool,
    pub resolution_window: bool,
}

impl Default for ScreenerToggles {
    fn default() -> Self {
        Self {
            exclude_sports_crypto: true,
            active_only: true,
            liquidity_band: true,
            spread_cap: true,
            min_volume: true,
            resolution_window: true,
        }
    }
}

const SCREENER_LIQUIDITY_MIN: f64 = 200.0;
const SCREENER_LIQUIDITY_MAX: f64 = 5_000.0;
const SCREENER_SPREAD_MAX: f64 = 0.12;
const SCREENER_VOLUME_MIN: f64 = 20.0;
const SCREENER_TTR_MIN: f64 = 2.0;
const SCREENER_TTR_MAX: f64 = 120.0;

impl ScreenerToggles {
    pub fn matches(&self, row: &EnrichedMarketRecord) -> bool {
        let record = &row.record;
        let derived = &row.derived;

        if self.exclude_sports_crypto
            && matches!(
                derived.domain,
                Domain::Sports | Domain::Crypto | Domain::CryptoPrices
            )
        {
            return false;
        }
        if self.active_only && !record.is_tradeable() {
            return false;
        }
        if self.liquidity_band
            && !(SCREENER_LIQUIDITY_MIN..=SCREENER_LIQUIDITY_MAX).contains(&record.liquidity_num)
        {
            return false;
        }
        if self.spread_cap && !derived.spread.is_some_and(|s| s.max(0.0) <= SCREENER_SPREAD_MAX) {
            return false;
        }
        if self.min_volume && record.volume_24h < SCREENER_VOLUME_MIN {
            return false;
        }
        if self.resolution_window
            && !derived
                .time_to_resolution_days
                .is_some_and(|d| (SCREENER_TTR_MIN..=SCREENER_TTR_MAX).contains(&d))
        {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenerSort {
    #[default]
    Screener,
    Quality,
    Liquidity,
    Volume,
    Spread,
    TimeToResolution,
}

impl ScreenerSort {
    pub const ALL: [ScreenerSort; 6] = [
        ScreenerSort::Screener,
        ScreenerSort::Quality,
        ScreenerSort::Liquidity,
        ScreenerSort::Volume,
        ScreenerSort::Spread,
        ScreenerSort::TimeToResolution,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Screener => "screener",
            Self::Quality => "quality",
            Self::Liquidity => "liquidity",
            Self::Volume => "volume",
            Self::Spread => "spread",
            Self::TimeToResolution => "ttr",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Screener => "Screener score (desc)",
            Self::Quality => "Quality score (desc)",
            Self::Liquidity => "Liquidity (desc)",
            Self::Volume => "24h volume (desc)",
            Self::Spread => "Spread (asc)",
            Self::TimeToResolution => "Time to resolution (asc)",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let wanted = raw.trim();
        Self::ALL
            .into_iter()
            .find(|sort| sort.as_str().eq_ignore_ascii_case(wanted))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScreenerOptions {
    pub toggles: ScreenerToggles,
    pub sort: ScreenerSort,
}

impl ScreenerOptions {
    /// Reads `sort` and the toggle keys; toggles default on and the last
    /// value for a repeated key wins.
    pub fn from_query_pairs<K, V>(pairs: &[(K, V)]) -> Result<Self, FilterParseError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut options = Self::default();
        for (key, value) in pairs {
            let key = key.as_ref();
            let value = value.as_ref().trim();
            if value.is_empty() {
                continue;
            }
            let toggles = &mut options.toggles;
            match key {
                "sort" => {
                    options.sort = ScreenerSort::parse(value)
                        .ok_or_else(|| FilterParseError::UnknownSort(value.to_string()))?
                }
                "exclude_sports_crypto" => toggles.exclude_sports_crypto = parse_bool(key, value)?,
                "active_only" => toggles.active_only = parse_bool(key, value)?,
                "liquidity_band" => toggles.liquidity_band = parse_bool(key, value)?,
                "spread_cap" => toggles.spread_cap = parse_bool(key, value)?,
                "min_volume" => toggles.min_volume = parse_bool(key, value)?,
                "resolution_window" => toggles.resolution_window = parse_bool(key, value)?,
                _ => {}
            }
        }
        Ok(options)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreenerRow {
    pub market: EnrichedMarketRecord,
    pub screener_score: f64,
    pub alpha_score: f64,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreenerDomainStat {
    pub domain: Domain,
    pub markets: usize,
    pub median_quality: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreenerView {
    pub options: ScreenerOptions,
    pub domain_stats: Vec<ScreenerDomainStat>,
    pub rows: Vec<ScreenerRow>,
}

pub fn screener(snapshot: &Snapshot, spec: &FilterSpec, options: ScreenerOptions) -> ScreenerView {
    let screened: Vec<EnrichedMarketRecord> = apply(&snapshot.records, spec)
        .into_iter()
        .filter(|row| options.toggles.matches(row))
        .collect();

    let max_liquidity = screened
        .iter()
        .map(|r| r.record.liquidity_num.max(0.0))
        .fold(0.0_f64, f64::max);
    let max_liquidity = if max_liquidity > 0.0 { max_liquidity } else { 1.0 };

    let mut domain_stats: Vec<ScreenerDomainStat> = group_by_domain(&screened)
        .into_iter()
        .map(|(domain, rows)| ScreenerDomainStat {
            domain,
            markets: rows.len(),
            median_quality: median(rows.iter().map(|r| r.derived.quality_score)),
        })
        .collect();
    domain_stats.sort_by(|a, b| b.markets.cmp(&a.markets));

    let mut rows: Vec<ScreenerRow> = screened
        .into_iter()
        .map(|market| ScreenerRow {
            screener_score: screener_score(&market, max_liquidity),
            alpha_score: alpha_score(&market),
            url: market_url(&market.record),
            market,
        })
        .collect();
    sort_screener_rows(&mut rows, options.sort);

    ScreenerView {
        options,
        domain_stats,
        rows,
    }
}

/// Ranking score relative to the screened set's largest liquidity.
pub fn screener_score(row: &EnrichedMarketRecord, max_liquidity: f64) -> f64 {
    let liquidity = finite_or(row.record.liquidity_num, 0.0).max(0.0);
    let volume = finite_or(row.record.volume_24h, 0.0);
    let spread = row.derived.spread.unwrap_or(1.0).max(0.0);
    let ttr = row.derived.time_to_resolution_days.unwrap_or(90.0);

    let liquidity_score = liquidity.ln_1p() / max_liquidity.max(1.0).ln_1p();
    let volume_score = (volume / 1_000.0).min(1.0);
    let spread_score = 1.0 - (spread / 0.05).min(1.0);
    let time_score = 1.0 - ((ttr.clamp(3.0, 90.0) - 45.0).abs() / 45.0).min(1.0);

    let score =
        0.35 * liquidity_score + 0.30 * volume_score + 0.20 * spread_score + 0.15 * time_score;
    finite_or(score, 0.0)
}

/// Banded "alpha pocket" score, scaled by domain and quality.
pub fn alpha_score(row: &EnrichedMarketRecord) -> f64 {
    let raw = 0.30 * band_liquidity(row.record.liquidity_num)
        + 0.25 * band_volume(row.record.volume_24h)
        + 0.20 * row.derived.spread.map_or(0.0, band_spread)
        + 0.25 * row.derived.time_to_resolution_days.map_or(0.0, band_time);

    let mut multiplier = match row.derived.domain {
        Domain::Elections | Domain::Politics => 1.0,
        Domain::Tech | Domain::Finance | Domain::Crypto => 0.9,
        Domain::Culture => 0.7,
        Domain::Sports => 0.4,
        Domain::CryptoPrices | Domain::Other => 0.8,
    };
    if is_up_or_down(row.record.event_title.as_deref()) {
        multiplier *= 0.5;
    }

    raw * multiplier * row.derived.quality_score
}

fn band_liquidity(x: f64) -> f64 {
    match x {
        x if x.is_nan() || x <= 100.0 => 0.0,
        x if x < 200.0 => (x - 100.0) / 100.0,
        x if x <= 5_000.0 => 1.0,
        x if x < 25_000.0 => 1.0 - (x - 5_000.0) / 20_000.0,
        _ => 0.0,
    }
}

fn band_volume(x: f64) -> f64 {
    match x {
        x if x.is_nan() || x <= 10.0 => 0.0,
        x if x < 50.0 => (x - 10.0) / 40.0,
        x if x <= 5_000.0 => 1.0,
        x if x < 50_000.0 => 1.0 - (x - 5_000.0) / 45_000.0,
        _ => 0.0,
    }
}

fn band_spread(x: f64) -> f64 {
    match x {
        x if x.is_nan() || x <= 0.0 => 0.0,
        x if x < 0.005 => x / 0.005,
        x if x <= 0.05 => 1.0,
        x if x < 0.15 => 1.0 - (x - 0.05) / 0.10,
        _ => 0.0,
    }
}

fn band_time(x: f64) -> f64 {
    match x {
        x if x.is_nan() || x < 0.0 => 0.0,
        x if x < 7.0 => x / 7.0,
        x if x <= 60.0 => 1.0,
        x if x < 120.0 => 1.0 - (x - 60.0) / 60.0,
        _ => 0.0,
    }
}

fn sort_screener_rows(rows: &mut [ScreenerRow], sort: ScreenerSort) {
    rows.sort_by(|a, b| match sort {
        ScreenerSort::Screener => desc_none_last(Some(a.screener_score), Some(b.screener_score)),
        ScreenerSort::Quality => desc_none_last(
            Some(a.market.derived.quality_score),
            Some(b.market.derived.quality_score),
        ),
        ScreenerSort::Liquidity => desc_none_last(
            Some(a.market.record.liquidity_num),
            Some(b.market.record.liquidity_num),
        ),
        ScreenerSort::Volume => desc_none_last(
            Some(a.market.record.volume_24h),
            Some(b.market.record.volume_24h),
        ),
        ScreenerSort::Spread => asc_none_last(a.market.derived.spread, b.market.derived.spread),
        ScreenerSort::TimeToResolution => asc_none_last(
            a.market.derived.time_to_resolution_days,
            b.market.derived.time_to_resolution_days,
        ),
    });
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Drilldown {
    pub market: EnrichedMarketRecord,
    pub url: Option<String>,
}

/// Looks `market_id` up among the rows that pass `spec`.
pub fn drilldown(snapshot: &Snapshot, spec: &FilterSpec, market_id: &str) -> Option<Drilldown> {
    snapshot
        .records
        .iter()
        .find(|row| row.record.market_id == market_id && spec.matches(row))
        .map(|row| Drilldown {
            url: market_url(&row.record),
            market: row.clone(),
        })
}

fn group_by_domain(rows: &[EnrichedMarketRecord]) -> BTreeMap<Domain, Vec<EnrichedMarketRecord>> {
    let mut groups: BTreeMap<Domain, Vec<EnrichedMarketRecord>> = BTreeMap::new();
    for row in rows {
        groups.entry(row.derived.domain).or_default().push(row.clone());
    }
    groups
}

fn clean(value: Option<f64>) -> Option<f64> {
    value.filter(|v| !v.is_nan())
}

fn asc_none_last(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (clean(a), clean(b)) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn desc_none_last(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (clean(a), clean(b)) {
        (Some(a), Some(b)) => b.total_cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn finite_sum(values: &[f64]) -> f64 {
    values.iter().copied().filter(|v| v.is_finite()).sum()
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}
