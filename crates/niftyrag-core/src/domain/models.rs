use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use niftyrag_warehouse::{ChunkRow, IngestionLogRow, MarketStatRow};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use super::Symbol;

/// Acquisition path that produced a raw record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrigin {
    RenderedTable,
    InternalApi,
    CsvDownload,
    Fallback,
}

impl RecordOrigin {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RenderedTable => "rendered_table",
            Self::InternalApi => "internal_api",
            Self::CsvDownload => "csv_download",
            Self::Fallback => "fallback",
        }
    }
}

impl Display for RecordOrigin {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Un-normalized record: source field names mapped to their textual values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawRecord {
    pub origin: RecordOrigin,
    pub fields: BTreeMap<String, String>,
}

impl RawRecord {
    pub fn new(origin: RecordOrigin) -> Self {
        Self {
            origin,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// One instrument's snapshot at ingestion time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketRecord {
    pub symbol: Symbol,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub ltp: f64,
    pub change_percent: f64,
    pub volume: u64,
    pub as_of: Date,
    pub origin: RecordOrigin,
}

impl MarketRecord {
    /// Sentence stored in the semantic store for this record.
    pub fn describe(&self) -> String {
        format!(
            "Stock: {}. Price: {}. Change: {}%. Volume: {}.",
            self.symbol, self.ltp, self.change_percent, self.volume
        )
    }

    pub fn to_chunk(&self) -> DocumentChunk {
        DocumentChunk {
            content: self.describe(),
            source: ChunkSource::MarketLive,
            label: ChunkSource::MarketLive.as_str().to_string(),
            dedup_key: format!("market:{}:{}", self.symbol, self.as_of),
        }
    }

    pub fn to_row(&self) -> MarketStatRow {
        MarketStatRow {
            symbol: self.symbol.to_string(),
            open: self.open,
            high: self.high,
            low: self.low,
            ltp: self.ltp,
            change_percent: self.change_percent,
            volume: self.volume,
            as_of: self.as_of.to_string(),
            origin: self.origin.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkSource {
    MarketLive,
    Announcement,
    OptionChain,
}

impl ChunkSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MarketLive => "market_live",
            Self::Announcement => "announcement",
            Self::OptionChain => "option_chain",
        }
    }

    pub const fn record_type(self) -> &'static str {
        match self {
            Self::MarketLive => "structured",
            Self::Announcement => "announcement",
            Self::OptionChain => "option_chain",
        }
    }
}

/// Unit of semantic search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentChunk {
    pub content: String,
    pub source: ChunkSource,
    /// Attribution shown next to search hits, e.g. the issuer symbol.
    pub label: String,
    pub dedup_key: String,
}

impl DocumentChunk {
    pub fn announcement(label: impl Into<String>, content: impl Into<String>) -> Self {
        let label = label.into();
        let content = content.into();
        let dedup_key = format!(
            "announcement:{label}:{}",
            niftyrag_warehouse::fingerprint(&content)
        );
        Self {
            content,
            source: ChunkSource::Announcement,
            label,
            dedup_key,
        }
    }

    pub fn option_chain(symbol: &str, as_of: Date, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source: ChunkSource::OptionChain,
            label: symbol.to_string(),
            dedup_key: format!("option-chain:{symbol}:{as_of}"),
        }
    }

    pub fn to_row(&self) -> ChunkRow {
        ChunkRow {
            dedup_key: self.dedup_key.clone(),
            content: self.content.clone(),
            source: self.source.as_str().to_string(),
            record_type: self.source.record_type().to_string(),
            label: self.label.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
}

impl RunStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// Audit entry for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionLog {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub item_count: usize,
    /// Strategy name, or `fallback`; `None` when nothing was acquired.
    pub strategy: Option<String>,
    pub errors: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
}

impl IngestionLog {
    pub fn to_row(&self) -> IngestionLogRow {
        IngestionLogRow {
            run_id: self.run_id.to_string(),
            status: self.status.as_str().to_string(),
            item_count: self.item_count as u64,
            strategy: self.strategy.clone(),
            errors: self.errors.clone(),
            started_at: format_timestamp(self.started_at),
            finished_at: format_timestamp(self.finished_at),
        }
    }
}

fn format_timestamp(value: OffsetDateTime) -> String {
    value
        .to_offset(time::UtcOffset::UTC)
        .format(&Rfc3339)
        .unwrap_or_else(|_| value.unix_timestamp().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn infy() -> MarketRecord {
        MarketRecord {
            symbol: Symbol::parse("INFY").expect("symbol"),
            open: 1600.0,
            high: 1620.0,
            low: 1590.0,
            ltp: 1610.0,
            change_percent: 0.63,
            volume: 500_000,
            as_of: date!(2026 - 10 - 16),
            origin: RecordOrigin::InternalApi,
        }
    }

    #[test]
    fn market_chunk_uses_descriptive_sentence_and_dated_key() {
        let chunk = infy().to_chunk();
        assert_eq!(
            chunk.content,
            "Stock: INFY. Price: 1610. Change: 0.63%. Volume: 500000."
        );
        assert_eq!(chunk.dedup_key, "market:INFY:2026-10-16");
        assert_eq!(chunk.to_row().record_type, "structured");
    }

    #[test]
    fn announcement_key_changes_with_content() {
        let a = DocumentChunk::announcement("RELIANCE", "Board meeting on 2026-01-22.");
        let b = DocumentChunk::announcement("RELIANCE", "Board meeting on 2026-01-23.");
        assert!(a.dedup_key.starts_with("announcement:RELIANCE:"));
        assert_ne!(a.dedup_key, b.dedup_key);
    }

    #[test]
    fn row_conversion_formats_date() {
        let row = infy().to_row();
        assert_eq!(row.as_of, "2026-10-16");
        assert_eq!(row.origin, "internal_api");
    }
}
