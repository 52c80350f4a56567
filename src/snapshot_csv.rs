//! Flat CSV layout shared by the on-disk cache and the download action.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use csv::StringRecord;
use thiserror::Error;

use crate::features::EnrichedMarketRecord;
use crate::record::{format_timestamp, parse_timestamp, MalformedRecord, MarketRecord};

pub const RAW_COLUMNS: [&str; 36] = [
    "event_id",
    "event_slug",
    "event_title",
    "event_subtitle",
    "event_category",
    "event_tags_labels",
    "event_start_date",
    "event_end_date",
    "event_liquidity",
    "event_volume",
    "event_open_interest",
    "market_id",
    "market_slug",
    "market_question",
    "market_description",
    "market_category",
    "market_type",
    "resolution_source",
    "market_end_date",
    "market_active",
    "market_closed",
    "enable_order_book",
    "accepting_orders",
    "liquidity_num",
    "liquidity_amm",
    "liquidity_clob",
    "volume_num",
    "volume_24h",
    "volume_1w",
    "volume_1m",
    "last_trade_price",
    "best_bid",
    "best_ask",
    "outcomes_raw",
    "outcome_prices_raw",
    "clob_token_ids",
];

pub const DERIVED_COLUMNS: [&str; 20] = [
    "spread",
    "mid_price",
    "time_to_resolution_days",
    "is_binary_like",
    "is_elections",
    "is_global_elections",
    "is_politics",
    "is_crypto",
    "is_crypto_prices",
    "is_tech",
    "is_finance",
    "is_sports",
    "is_culture",
    "domain",
    "p_true",
    "implied_prob",
    "edge",
    "quality_score",
    "quality_basis",
    "quality_score_version",
];

pub const FETCHED_AT_COLUMN: &str = "fetched_at";

#[derive(Debug, Error)]
pub enum SnapshotIoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("snapshot file is missing required column {0}")]
    MissingColumn(&'static str),
    #[error("invalid output path: {0}")]
    InvalidPath(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRow {
    /// 1-based line number in the file, header included.
    pub line: u64,
    pub reason: MalformedRecord,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotTable {
    pub fetched_at: Option<DateTime<Utc>>,
    pub records: Vec<MarketRecord>,
    pub malformed: Vec<MalformedRow>,
}

pub fn snapshot_header() -> Vec<&'static str> {
    RAW_COLUMNS
        .iter()
        .chain(DERIVED_COLUMNS.iter())
        .copied()
        .chain(std::iter::once(FETCHED_AT_COLUMN))
        .collect()
}

pub fn write_snapshot_csv<W: Write>(
    writer: W,
    fetched_at: DateTime<Utc>,
    records: &[EnrichedMarketRecord],
) -> Result<(), SnapshotIoError> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(snapshot_header())?;

    let fetched_at = format_timestamp(&fetched_at);
    for enriched in records {
        let mut cells = raw_cells(&enriched.record);
        cells.extend(derived_cells(enriched));
        cells.push(fetched_at.clone());
        out.write_record(&cells)?;
    }

    out.flush()?;
    Ok(())
}

pub fn snapshot_csv_bytes(
    fetched_at: DateTime<Utc>,
    records: &[EnrichedMarketRecord],
) -> Result<Vec<u8>, SnapshotIoError> {
    let mut buf = Vec::new();
    write_snapshot_csv(&mut buf, fetched_at, records)?;
    Ok(buf)
}

/// Reads the raw columns back. Derived columns are ignored; callers re-derive.
pub fn read_snapshot_csv<R: Read>(reader: R) -> Result<SnapshotTable, SnapshotIoError> {
    let mut input = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let header = input.headers()?.clone();
    let index = HeaderIndex::new(&header);
    if index.position("market_id").is_none() {
        return Err(SnapshotIoError::MissingColumn("market_id"));
    }

    let mut table = SnapshotTable {
        fetched_at: None,
        records: Vec::new(),
        malformed: Vec::new(),
    };

    for (offset, row) in input.records().enumerate() {
        let line = offset as u64 + 2;
        let row = match row {
            Ok(row) => row,
            Err(err) if err.is_io_error() => return Err(err.into()),
            Err(err) => {
                table.malformed.push(MalformedRow {
                    line,
                    reason: MalformedRecord::Undecodable(err.to_string()),
                });
                continue;
            }
        };
        if row.len() != header.len() {
            table.malformed.push(MalformedRow {
                line,
                reason: MalformedRecord::ColumnCount {
                    found: row.len(),
                    expected: header.len(),
                },
            });
            continue;
        }

        match parse_row(&row, &index) {
            Ok((record, fetched_at)) => {
                if table.fetched_at.is_none() {
                    table.fetched_at = fetched_at;
                }
                table.records.push(record);
            }
            Err(reason) => table.malformed.push(MalformedRow { line, reason }),
        }
    }

    Ok(table)
}

/// Replaces `path` in one step: write a sibling temp file, then rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SnapshotIoError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| SnapshotIoError::InvalidPath(path.display().to_string()))?;
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    fs::rename(tmp_path, path)?;
    Ok(())
}

struct HeaderIndex {
    positions: HashMap<String, usize>,
}

impl HeaderIndex {
    fn new(header: &StringRecord) -> Self {
        let positions = header
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.trim().to_string(), idx))
            .collect();
        Self { positions }
    }

    fn position(&self, column: &str) -> Option<usize> {
        self.positions.get(column).copied()
    }
}

struct RowReader<'a> {
    row: &'a StringRecord,
    index: &'a HeaderIndex,
}

impl RowReader<'_> {
    fn raw(&self, column: &str) -> Option<&str> {
        self.index
            .position(column)
            .and_then(|idx| self.row.get(idx))
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    fn text(&self, column: &str) -> Option<String> {
        self.raw(column).map(str::to_string)
    }

    fn opt_f64(&self, column: &'static str) -> Result<Option<f64>, MalformedRecord> {
        match self.raw(column) {
            None => Ok(None),
            Some(value) => value
                .parse::<f64>()
                .map(Some)
                .map_err(|_| MalformedRecord::InvalidField {
                    field: column,
                    value: value.to_string(),
                }),
        }
    }

    fn f64_or_zero(&self, column: &'static str) -> Result<f64, MalformedRecord> {
        Ok(self.opt_f64(column)?.unwrap_or(0.0))
    }

    fn bool_or(&self, column: &'static str, default: bool) -> Result<bool, MalformedRecord> {
        match self.raw(column) {
            None => Ok(default),
            Some(value) => parse_bool(value).ok_or_else(|| MalformedRecord::InvalidField {
                field: column,
                value: value.to_string(),
            }),
        }
    }

    fn timestamp(&self, column: &'static str) -> Result<Option<DateTime<Utc>>, MalformedRecord> {
        match self.raw(column) {
            None => Ok(None),
            Some(value) => {
                parse_timestamp(value)
                    .map(Some)
                    .ok_or_else(|| MalformedRecord::InvalidField {
                        field: column,
                        value: value.to_string(),
                    })
            }
        }
    }
}

fn parse_row(
    row: &StringRecord,
    index: &HeaderIndex,
) -> Result<(MarketRecord, Option<DateTime<Utc>>), MalformedRecord> {
    let r = RowReader { row, index };
    let market_id = r.text("market_id").ok_or(MalformedRecord::MissingId)?;

    let record = MarketRecord {
        event_id: r.text("event_id"),
        event_slug: r.text("event_slug"),
        event_title: r.text("event_title"),
        event_subtitle: r.text("event_subtitle"),
        event_category: r.text("event_category"),
        event_tags_labels: r.text("event_tags_labels"),
        event_start_date: r.timestamp("event_start_date")?,
        event_end_date: r.timestamp("event_end_date")?,
        event_liquidity: r.f64_or_zero("event_liquidity")?,
        event_volume: r.f64_or_zero("event_volume")?,
        event_open_interest: r.f64_or_zero("event_open_interest")?,
        market_id,
        market_slug: r.text("market_slug"),
        market_question: r.text("market_question"),
        market_description: r.text("market_description"),
        market_category: r.text("market_category"),
        market_type: r.text("market_type"),
        resolution_source: r.text("resolution_source"),
        market_end_date: r.timestamp("market_end_date")?,
        market_active: r.bool_or("market_active", true)?,
        market_closed: r.bool_or("market_closed", false)?,
        enable_order_book: r.bool_or("enable_order_book", true)?,
        accepting_orders: r.bool_or("accepting_orders", true)?,
        liquidity_num: r.f64_or_zero("liquidity_num")?,
        liquidity_amm: r.f64_or_zero("liquidity_amm")?,
        liquidity_clob: r.f64_or_zero("liquidity_clob")?,
        volume_num: r.f64_or_zero("volume_num")?,
        volume_24h: r.f64_or_zero("volume_24h")?,
        volume_1w: r.f64_or_zero("volume_1w")?,
        volume_1m: r.f64_or_zero("volume_1m")?,
        last_trade_price: r.opt_f64("last_trade_price")?,
        best_bid: r.opt_f64("best_bid")?,
        best_ask: r.opt_f64("best_ask")?,
        outcomes_raw: r.text("outcomes_raw"),
        outcome_prices_raw: r.text("outcome_prices_raw"),
        clob_token_ids: r.text("clob_token_ids"),
    };

    let fetched_at = r.timestamp("fetched_at")?;
    Ok((record, fetched_at))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn raw_cells(record: &MarketRecord) -> Vec<String> {
    vec![
        text_cell(&record.event_id),
        text_cell(&record.event_slug),
        text_cell(&record.event_title),
        text_cell(&record.event_subtitle),
        text_cell(&record.event_category),
        text_cell(&record.event_tags_labels),
        timestamp_cell(&record.event_start_date),
        timestamp_cell(&record.event_end_date),
        record.event_liquidity.to_string(),
        record.event_volume.to_string(),
        record.event_open_interest.to_string(),
        record.market_id.clone(),
        text_cell(&record.market_slug),
        text_cell(&record.market_question),
        text_cell(&record.market_description),
        text_cell(&record.market_category),
        text_cell(&record.market_type),
        text_cell(&record.resolution_source),
        timestamp_cell(&record.market_end_date),
        record.market_active.to_string(),
        record.market_closed.to_string(),
        record.enable_order_book.to_string(),
        record.accepting_orders.to_string(),
        record.liquidity_num.to_string(),
        record.liquidity_amm.to_string(),
        record.liquidity_clob.to_string(),
        record.volume_num.to_string(),
        record.volume_24h.to_string(),
        record.volume_1w.to_string(),
        record.volume_1m.to_string(),
        number_cell(record.last_trade_price),
        number_cell(record.best_bid),
        number_cell(record.best_ask),
        text_cell(&record.outcomes_raw),
        text_cell(&record.outcome_prices_raw),
        text_cell(&record.clob_token_ids),
    ]
}

fn derived_cells(enriched: &EnrichedMarketRecord) -> Vec<String> {
    let d = &enriched.derived;
    vec![
        number_cell(d.spread),
        number_cell(d.mid_price),
        number_cell(d.time_to_resolution_days),
        d.is_binary_like.to_string(),
        d.flags.is_elections.to_string(),
        d.flags.is_global_elections.to_string(),
        d.flags.is_politics.to_string(),
        d.flags.is_crypto.to_string(),
        d.flags.is_crypto_prices.to_string(),
        d.flags.is_tech.to_string(),
        d.flags.is_finance.to_string(),
        d.flags.is_sports.to_string(),
        d.flags.is_culture.to_string(),
        d.domain.as_str().to_string(),
        number_cell(d.p_true),
        number_cell(d.implied_prob),
        number_cell(d.edge),
        d.quality_score.to_string(),
        d.quality_basis.as_str().to_string(),
        crate::features::QUALITY_SCORE_VERSION.to_string(),
    ]
}

fn text_cell(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn number_cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn timestamp_cell(value: &Option<DateTime<Utc>>) -> String {
    value.as_ref().map(format_timestamp).unwrap_or_default()
}
