//! Canonical domain types for the ingestion pipeline.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`RawRecord`] | Strategy output before normalization |
//! | [`MarketRecord`] | Normalized instrument snapshot |
//! | [`DocumentChunk`] | Semantic-search unit with a dedup key |
//! | [`IngestionLog`] | Audit entry for one run |
//! | [`Symbol`] | Validated exchange ticker |

mod models;
mod symbol;

pub use models::{
    ChunkSource, DocumentChunk, IngestionLog, MarketRecord, RawRecord, RecordOrigin, RunStatus,
};
pub use symbol::Symbol;
