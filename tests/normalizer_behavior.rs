//! Behavior-driven tests for raw record normalization.
//!
//! Each source (rendered table, internal API, CSV export, fallback) names
//! its columns differently; every one must land on the same record shape.

use niftyrag_core::normalize::normalize_with_drift;
use niftyrag_core::{normalize, normalize_batch, NormalizeError, RawRecord, RecordOrigin};
use time::macros::date;
use time::Date;

const AS_OF: Date = date!(2026 - 10 - 16);

// =============================================================================
// Source shapes
// =============================================================================

#[test]
fn when_the_api_reports_a_row_it_maps_onto_the_canonical_record() {
    // Given: An internal API row
    let raw = RawRecord::new(RecordOrigin::InternalApi)
        .with_field("symbol", "INFY")
        .with_field("open", "1600")
        .with_field("dayHigh", "1620")
        .with_field("dayLow", "1590")
        .with_field("lastPrice", "1610")
        .with_field("pChange", "0.63")
        .with_field("totalTradedVolume", "500000");

    // When: It is normalized
    let record = normalize(&raw, AS_OF).expect("valid record");

    // Then: Every field is populated and stamped
    assert_eq!(record.symbol.as_str(), "INFY");
    assert_eq!(record.open, 1600.0);
    assert_eq!(record.high, 1620.0);
    assert_eq!(record.low, 1590.0);
    assert_eq!(record.ltp, 1610.0);
    assert_eq!(record.change_percent, 0.63);
    assert_eq!(record.volume, 500_000);
    assert_eq!(record.as_of, AS_OF);
    assert_eq!(record.origin, RecordOrigin::InternalApi);
}

#[test]
fn when_a_csv_export_uses_padded_headers_and_grouped_digits_they_are_understood() {
    // Given: A CSV row with a BOM, line breaks in headers and Indian digit grouping
    let raw = RawRecord::new(RecordOrigin::CsvDownload)
        .with_field("\u{feff}SYMBOL", "reliance")
        .with_field("OPEN \n", "2,950.00")
        .with_field("HIGH", "2,990.10")
        .with_field("LOW", "2,941.35")
        .with_field("LTP", "2,980.00")
        .with_field("%CHNG", "1.02")
        .with_field("VOLUME \n(shares)", "1,23,45,678");

    // When: It is normalized
    let record = normalize(&raw, AS_OF).expect("valid record");

    // Then: Symbols are uppercased and numbers parsed
    assert_eq!(record.symbol.as_str(), "RELIANCE");
    assert_eq!(record.open, 2950.0);
    assert_eq!(record.ltp, 2980.0);
    assert_eq!(record.volume, 12_345_678);
}

#[test]
fn when_the_change_column_is_missing_it_is_computed_from_open_and_ltp() {
    // Given: A fallback-shaped record without a change column
    let raw = RawRecord::new(RecordOrigin::Fallback)
        .with_field("SYMBOL", "TCS")
        .with_field("OPEN", "3400")
        .with_field("LTP", "3434");

    // When: It is normalized
    let record = normalize(&raw, AS_OF).expect("valid record");

    // Then: The change is rounded to two decimals
    assert_eq!(record.change_percent, 1.0);
}

// =============================================================================
// Percent-change authority
// =============================================================================

#[test]
fn when_the_reported_change_contradicts_the_prices_the_computed_value_wins() {
    // Given: A row whose reported change has the wrong sign
    let raw = RawRecord::new(RecordOrigin::RenderedTable)
        .with_field("SYMBOL", "SBIN")
        .with_field("OPEN", "800")
        .with_field("LTP", "792")
        .with_field("%CHNG", "1.00");

    // When: It is normalized
    let normalized = normalize_with_drift(&raw, AS_OF).expect("valid record");

    // Then: The record carries the recomputed value and is flagged
    assert!(normalized.drifted);
    assert_eq!(normalized.record.change_percent, -1.0);
}

#[test]
fn when_the_reported_change_agrees_in_sign_it_is_kept_as_reported() {
    // Given: A reported change that differs slightly from open→ltp
    let raw = RawRecord::new(RecordOrigin::RenderedTable)
        .with_field("SYMBOL", "ITC")
        .with_field("OPEN", "400")
        .with_field("LTP", "412")
        .with_field("%CHNG", "2.75");

    // When: It is normalized
    let normalized = normalize_with_drift(&raw, AS_OF).expect("valid record");

    // Then: The exchange's figure stands
    assert!(!normalized.drifted);
    assert_eq!(normalized.record.change_percent, 2.75);
}

// =============================================================================
// Rejection and idempotence
// =============================================================================

#[test]
fn when_a_row_has_no_usable_symbol_it_is_rejected() {
    let missing = RawRecord::new(RecordOrigin::RenderedTable).with_field("LTP", "10");
    let summary = RawRecord::new(RecordOrigin::CsvDownload).with_field("SYMBOL", "NIFTY 50");

    assert_eq!(normalize(&missing, AS_OF), Err(NormalizeError::MissingSymbol));
    assert!(matches!(
        normalize(&summary, AS_OF),
        Err(NormalizeError::InvalidSymbol { .. })
    ));
}

#[test]
fn when_a_batch_repeats_a_symbol_the_first_row_is_kept() {
    // Given: Two rows for the same symbol and one unusable row
    let raws = vec![
        RawRecord::new(RecordOrigin::RenderedTable)
            .with_field("SYMBOL", "HDFCBANK")
            .with_field("LTP", "1650"),
        RawRecord::new(RecordOrigin::RenderedTable)
            .with_field("SYMBOL", "hdfcbank")
            .with_field("LTP", "1"),
        RawRecord::new(RecordOrigin::RenderedTable).with_field("LTP", "2"),
    ];

    // When: The batch is normalized
    let batch = normalize_batch(&raws, AS_OF);

    // Then: One record survives and one reject is noted
    assert_eq!(batch.records.len(), 1);
    assert_eq!(batch.records[0].ltp, 1650.0);
    assert_eq!(batch.rejected.len(), 1);
}

#[test]
fn normalizing_a_normalized_record_changes_nothing() {
    // Given: A record produced by normalization
    let raw = RawRecord::new(RecordOrigin::RenderedTable)
        .with_field("SYMBOL", "bhartiartl")
        .with_field("OPEN", "1,500.5")
        .with_field("HIGH", "1512")
        .with_field("LOW", "1490")
        .with_field("LTP", "1,505")
        .with_field("VOLUME", "42,000");
    let first = normalize(&raw, AS_OF).expect("valid record");

    // When: Its canonical fields are fed back in
    let again = RawRecord::new(first.origin)
        .with_field("symbol", first.symbol.as_str())
        .with_field("open", first.open.to_string())
        .with_field("high", first.high.to_string())
        .with_field("low", first.low.to_string())
        .with_field("ltp", first.ltp.to_string())
        .with_field("change_percent", first.change_percent.to_string())
        .with_field("volume", first.volume.to_string());
    let second = normalize(&again, AS_OF).expect("valid record");

    // Then: The result is identical
    assert_eq!(first, second);
}
