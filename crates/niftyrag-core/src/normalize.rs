//! Canonicalization of raw strategy output.
//!
//! Every origin goes through the same steps: header aliasing, numeric
//! coercion with a `0.0` sentinel, and the percent-change authority rule.

use std::collections::HashSet;

use thiserror::Error;
use time::Date;

use crate::domain::{MarketRecord, RawRecord, Symbol};
use crate::ValidationError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("record has no symbol field")]
    MissingSymbol,

    #[error("invalid symbol '{raw}': {source}")]
    InvalidSymbol {
        raw: String,
        #[source]
        source: ValidationError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Symbol,
    Open,
    High,
    Low,
    Ltp,
    ChangePercent,
    Volume,
}

/// Header spellings seen across the table, API, CSV, and fallback shapes,
/// in canonical key form (see [`canonical_key`]).
const ALIASES: &[(&str, Field)] = &[
    ("symbol", Field::Symbol),
    ("open", Field::Open),
    ("open price", Field::Open),
    ("high", Field::High),
    ("dayhigh", Field::High),
    ("day high", Field::High),
    ("low", Field::Low),
    ("daylow", Field::Low),
    ("day low", Field::Low),
    ("ltp", Field::Ltp),
    ("last price", Field::Ltp),
    ("lastprice", Field::Ltp),
    ("last traded price", Field::Ltp),
    ("%chng", Field::ChangePercent),
    ("% chng", Field::ChangePercent),
    ("% change", Field::ChangePercent),
    ("%change", Field::ChangePercent),
    ("pchange", Field::ChangePercent),
    ("change %", Field::ChangePercent),
    ("change_percent", Field::ChangePercent),
    ("volume", Field::Volume),
    ("volume (shares)", Field::Volume),
    ("totaltradedvolume", Field::Volume),
    ("total traded volume", Field::Volume),
];

/// Lowercased, BOM-stripped, whitespace-collapsed header.
pub fn canonical_key(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn field_for(raw_key: &str) -> Option<Field> {
    let key = canonical_key(raw_key);
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, field)| *field)
}

/// Parse a number written with thousands separators, `%`, `₹` or padding.
pub fn coerce_f64(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|ch| !matches!(ch, ',' | '%' | '₹') && !ch.is_whitespace())
        .collect();
    let value = cleaned.parse::<f64>().ok()?;
    value.is_finite().then_some(value)
}

/// Non-negative whole number; fractional input is rounded.
pub fn coerce_u64(raw: &str) -> Option<u64> {
    let value = coerce_f64(raw)?;
    if value < 0.0 || value > u64::MAX as f64 {
        return None;
    }
    Some(value.round() as u64)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub record: MarketRecord,
    /// The reported percent change contradicted open→ltp and was replaced.
    pub drifted: bool,
}

pub fn normalize(raw: &RawRecord, as_of: Date) -> Result<MarketRecord, NormalizeError> {
    normalize_with_drift(raw, as_of).map(|normalized| normalized.record)
}

pub fn normalize_with_drift(raw: &RawRecord, as_of: Date) -> Result<Normalized, NormalizeError> {
    let mut symbol = None;
    let mut open = None;
    let mut high = None;
    let mut low = None;
    let mut ltp = None;
    let mut reported_change = None;
    let mut volume = None;

    // Fields iterate in key order; the first alias of a field that parses wins.
    for (name, value) in &raw.fields {
        match field_for(name) {
            Some(Field::Symbol) => {
                symbol.get_or_insert_with(|| value.clone());
            }
            Some(Field::Open) => {
                open = open.or_else(|| coerce_f64(value));
            }
            Some(Field::High) => {
                high = high.or_else(|| coerce_f64(value));
            }
            Some(Field::Low) => {
                low = low.or_else(|| coerce_f64(value));
            }
            Some(Field::Ltp) => {
                ltp = ltp.or_else(|| coerce_f64(value));
            }
            Some(Field::ChangePercent) => {
                reported_change = reported_change.or_else(|| coerce_f64(value));
            }
            Some(Field::Volume) => {
                volume = volume.or_else(|| coerce_u64(value));
            }
            None => {}
        }
    }

    let raw_symbol = symbol.ok_or(NormalizeError::MissingSymbol)?;
    let symbol = Symbol::parse(&raw_symbol).map_err(|source| NormalizeError::InvalidSymbol {
        raw: raw_symbol.clone(),
        source,
    })?;

    let computed_change = match (open, ltp) {
        (Some(open), Some(ltp)) if open != 0.0 => Some(round2((ltp - open) / open * 100.0)),
        _ => None,
    };
    let (change_percent, drifted) = match (reported_change, computed_change) {
        (Some(reported), Some(computed)) if reported * computed < 0.0 => (computed, true),
        (Some(reported), _) => (reported, false),
        (None, Some(computed)) => (computed, false),
        (None, None) => (0.0, false),
    };

    Ok(Normalized {
        record: MarketRecord {
            symbol,
            open: open.unwrap_or(0.0),
            high: high.unwrap_or(0.0),
            low: low.unwrap_or(0.0),
            ltp: ltp.unwrap_or(0.0),
            change_percent,
            volume: volume.unwrap_or(0),
            as_of,
            origin: raw.origin,
        },
        drifted,
    })
}

/// Result of normalizing one strategy's output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    pub records: Vec<MarketRecord>,
    /// One message per skipped raw record.
    pub rejected: Vec<String>,
    pub drifted: Vec<Symbol>,
}

/// Normalize every record, skipping rejects and repeated symbols (first wins).
pub fn normalize_batch(raws: &[RawRecord], as_of: Date) -> NormalizedBatch {
    let mut batch = NormalizedBatch::default();
    let mut seen = HashSet::new();

    for raw in raws {
        match normalize_with_drift(raw, as_of) {
            Ok(Normalized { record, drifted }) => {
                if !seen.insert(record.symbol.clone()) {
                    tracing::debug!(symbol = %record.symbol, "dropping duplicate symbol");
                    continue;
                }
                if drifted {
                    tracing::warn!(
                        symbol = %record.symbol,
                        change_percent = record.change_percent,
                        "reported percent change contradicted open/ltp; recomputed"
                    );
                    batch.drifted.push(record.symbol.clone());
                }
                batch.records.push(record);
            }
            Err(error) => {
                tracing::debug!(%error, origin = %raw.origin, "skipping raw record");
                batch.rejected.push(error.to_string());
            }
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RecordOrigin;
    use time::macros::date;

    const AS_OF: Date = date!(2026 - 10 - 16);

    #[test]
    fn canonical_key_folds_case_whitespace_and_bom() {
        assert_eq!(canonical_key("\u{feff}VOLUME \n(shares)"), "volume (shares)");
        assert_eq!(field_for("Last  Price"), Some(Field::Ltp));
        assert_eq!(field_for("% Change"), Some(Field::ChangePercent));
        assert_eq!(field_for("52W H"), None);
    }

    #[test]
    fn coercion_strips_separators_and_symbols() {
        assert_eq!(coerce_f64("₹ 1,23,456.50"), Some(123_456.5));
        assert_eq!(coerce_f64("-0.45%"), Some(-0.45));
        assert_eq!(coerce_f64("-"), None);
        assert_eq!(coerce_u64("5,00,000"), Some(500_000));
        assert_eq!(coerce_u64("-3"), None);
    }

    #[test]
    fn unparseable_numbers_fall_back_to_sentinel() {
        let raw = RawRecord::new(RecordOrigin::RenderedTable)
            .with_field("SYMBOL", "ITC")
            .with_field("OPEN", "n/a")
            .with_field("LTP", "410.5")
            .with_field("VOLUME", "--");

        let record = normalize(&raw, AS_OF).expect("normalizes");
        assert_eq!(record.open, 0.0);
        assert_eq!(record.ltp, 410.5);
        assert_eq!(record.change_percent, 0.0);
        assert_eq!(record.volume, 0);
    }

    #[test]
    fn missing_change_is_recomputed_from_open_and_ltp() {
        let raw = RawRecord::new(RecordOrigin::CsvDownload)
            .with_field("SYMBOL", "SBIN")
            .with_field("OPEN", "800")
            .with_field("LTP", "808");
        let record = normalize(&raw, AS_OF).expect("normalizes");
        assert_eq!(record.change_percent, 1.0);
    }

    #[test]
    fn contradicting_sign_is_replaced_and_flagged() {
        let raw = RawRecord::new(RecordOrigin::RenderedTable)
            .with_field("SYMBOL", "HDFCBANK")
            .with_field("OPEN", "1700")
            .with_field("LTP", "1683")
            .with_field("%CHNG", "0.40");

        let normalized = normalize_with_drift(&raw, AS_OF).expect("normalizes");
        assert!(normalized.drifted);
        assert_eq!(normalized.record.change_percent, -1.0);
    }

    #[test]
    fn missing_or_invalid_symbol_is_rejected() {
        let raw = RawRecord::new(RecordOrigin::RenderedTable).with_field("LTP", "10");
        assert_eq!(normalize(&raw, AS_OF), Err(NormalizeError::MissingSymbol));

        let raw = RawRecord::new(RecordOrigin::RenderedTable).with_field("SYMBOL", "NIFTY 50");
        assert!(matches!(
            normalize(&raw, AS_OF),
            Err(NormalizeError::InvalidSymbol { .. })
        ));
    }

    #[test]
    fn batch_keeps_first_record_per_symbol() {
        let raws = vec![
            RawRecord::new(RecordOrigin::InternalApi)
                .with_field("symbol", "TCS")
                .with_field("lastPrice", "3434"),
            RawRecord::new(RecordOrigin::InternalApi)
                .with_field("symbol", "tcs")
                .with_field("lastPrice", "1"),
            RawRecord::new(RecordOrigin::InternalApi).with_field("lastPrice", "1"),
        ];

        let batch = normalize_batch(&raws, AS_OF);
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].ltp, 3434.0);
        assert_eq!(batch.rejected.len(), 1);
    }
}
