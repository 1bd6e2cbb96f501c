use niftyrag_warehouse::{ChunkRow, MarketStatRow, Warehouse};
use serde::Serialize;

use crate::domain::{DocumentChunk, MarketRecord};

/// What the two stores accepted during one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SinkReport {
    /// Rows now in the structured store; `None` when that write failed.
    pub structured_rows: Option<usize>,
    pub chunks_added: usize,
    pub chunks_replaced: usize,
    pub errors: Vec<String>,
}

/// Writes canonical records to the structured and semantic stores.
///
/// The two writes are independent: one failing is recorded in the report
/// and never rolls back the other.
#[derive(Clone)]
pub struct PersistenceSink {
    warehouse: Warehouse,
}

impl PersistenceSink {
    pub fn new(warehouse: Warehouse) -> Self {
        Self { warehouse }
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }

    /// Replace the structured snapshot with `records` and upsert one chunk per
    /// record plus `context` into the semantic store.
    pub fn persist(&self, records: &[MarketRecord], context: &[DocumentChunk]) -> SinkReport {
        let mut report = SinkReport::default();

        if !records.is_empty() {
            let rows: Vec<MarketStatRow> = records.iter().map(MarketRecord::to_row).collect();
            match self.warehouse.replace_market_stats(&rows) {
                Ok(written) => {
                    tracing::info!(rows = written, "structured store refreshed");
                    report.structured_rows = Some(written);
                }
                Err(error) => {
                    tracing::warn!(%error, "structured store write failed");
                    report.errors.push(format!("structured store: {error}"));
                }
            }
        }

        let chunks: Vec<ChunkRow> = records
            .iter()
            .map(|record| record.to_chunk().to_row())
            .chain(context.iter().map(DocumentChunk::to_row))
            .collect();
        if !chunks.is_empty() {
            match self.warehouse.upsert_chunks(&chunks) {
                Ok(upsert) => {
                    tracing::info!(
                        added = upsert.added,
                        replaced = upsert.replaced,
                        "semantic store updated"
                    );
                    report.chunks_added = upsert.added;
                    report.chunks_replaced = upsert.replaced;
                }
                Err(error) => {
                    tracing::warn!(%error, "semantic store write failed");
                    report.errors.push(format!("semantic store: {error}"));
                }
            }
        }

        report
    }
}
