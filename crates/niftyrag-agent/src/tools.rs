//! Callable query tools.
//!
//! Every tool takes a free-text query and answers with free text. An empty
//! store is answered with a message, never an error; [`ToolError`] is kept
//! for storage failures.

use std::cmp::Ordering;
use std::sync::Mutex;

use niftyrag_warehouse::{MarketStatRow, Warehouse, WarehouseError};
use serde_json::{json, Value};
use thiserror::Error;

pub const NO_DOCUMENTS_MESSAGE: &str = "No matching market documents found.";
pub const NO_MARKET_DATA_MESSAGE: &str =
    "No market data available. Please run the ingestion pipeline.";

const MOVERS_PER_SIDE: usize = 5;
const OUTLOOK_DIRECTIONS: [&str; 3] = ["up", "down", "sideways"];
const OUTLOOK_MIN_PERCENT: f64 = 0.5;
const OUTLOOK_MAX_PERCENT: f64 = 3.0;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error(transparent)]
    Store(#[from] WarehouseError),
}

pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    /// Shown to the model when it chooses a tool.
    fn description(&self) -> &'static str;

    /// JSON schema of the call arguments.
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "The user's question or search text" }
            },
            "required": ["query"]
        })
    }

    fn call(&self, query: &str) -> Result<String, ToolError>;
}

/// Top-3 semantic search over stored chunks.
pub struct DocumentSearchTool {
    warehouse: Warehouse,
}

impl DocumentSearchTool {
    pub const DEFAULT_K: usize = 3;

    pub fn new(warehouse: Warehouse) -> Self {
        Self { warehouse }
    }
}

impl Tool for DocumentSearchTool {
    fn name(&self) -> &'static str {
        "search_market_documents"
    }

    fn description(&self) -> &'static str {
        "Searches corporate announcements, option-chain summaries and stock snapshots. \
         Useful for qualitative information about a company."
    }

    fn call(&self, query: &str) -> Result<String, ToolError> {
        let hits = self.warehouse.search_chunks(query, Self::DEFAULT_K)?;
        tracing::debug!(query, hits = hits.len(), "document search");
        if hits.is_empty() {
            return Ok(NO_DOCUMENTS_MESSAGE.to_string());
        }
        Ok(hits
            .iter()
            .map(|hit| format!("[Source: {}] {}", hit.chunk.label, hit.chunk.content))
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

/// Best and worst performers of the latest snapshot.
pub struct TopMoversTool {
    warehouse: Warehouse,
}

impl TopMoversTool {
    pub fn new(warehouse: Warehouse) -> Self {
        Self { warehouse }
    }
}

impl Tool for TopMoversTool {
    fn name(&self) -> &'static str {
        "get_top_gainers_losers"
    }

    fn description(&self) -> &'static str {
        "Answers questions about top gainers, losers or worst performers. \
         Returns the top 5 and bottom 5 stocks of the latest ingestion."
    }

    fn call(&self, _query: &str) -> Result<String, ToolError> {
        let mut rows = self.warehouse.market_stats()?;
        if rows.is_empty() {
            return Ok(NO_MARKET_DATA_MESSAGE.to_string());
        }
        rows.sort_by(|a, b| {
            b.change_percent
                .partial_cmp(&a.change_percent)
                .unwrap_or(Ordering::Equal)
        });

        let top = &rows[..rows.len().min(MOVERS_PER_SIDE)];
        let bottom = &rows[rows.len().saturating_sub(MOVERS_PER_SIDE)..];
        Ok(format!(
            "Top Gainers: [{}]\nTop Losers: [{}]",
            list_movers(top),
            list_movers(bottom)
        ))
    }
}

fn list_movers(rows: &[MarketStatRow]) -> String {
    rows.iter()
        .map(|row| format!("{} ({}%)", row.symbol, row.change_percent))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Random direction and magnitude. Not a forecast.
pub struct PriceOutlookTool {
    rng: Mutex<fastrand::Rng>,
}

impl PriceOutlookTool {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(fastrand::Rng::new()),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(fastrand::Rng::with_seed(seed)),
        }
    }
}

impl Default for PriceOutlookTool {
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for PriceOutlookTool {
    fn name(&self) -> &'static str {
        "predict_stock_price"
    }

    fn description(&self) -> &'static str {
        "Gives a heuristic outlook for tomorrow's stock or market movement. \
         This is a placeholder, not a prediction model."
    }

    fn call(&self, _query: &str) -> Result<String, ToolError> {
        let (direction, percent) = {
            let mut rng = self.rng.lock().expect("outlook rng mutex poisoned");
            let direction = OUTLOOK_DIRECTIONS[rng.usize(..OUTLOOK_DIRECTIONS.len())];
            let raw = OUTLOOK_MIN_PERCENT + rng.f64() * (OUTLOOK_MAX_PERCENT - OUTLOOK_MIN_PERCENT);
            let percent = ((raw * 100.0).round() / 100.0)
                .clamp(OUTLOOK_MIN_PERCENT, OUTLOOK_MAX_PERCENT);
            (direction, percent)
        };
        Ok(format!(
            "Based on heuristic market sentiment analysis, the stock/market is likely to move \
             {direction} by approximately {percent}% tomorrow. (Disclaimer: Not financial advice)."
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outlook_is_reproducible_with_a_seed() {
        let a = PriceOutlookTool::with_seed(7).call("").expect("outlook");
        let b = PriceOutlookTool::with_seed(7).call("anything").expect("outlook");
        assert_eq!(a, b);
    }

    #[test]
    fn outlook_stays_in_range() {
        let tool = PriceOutlookTool::with_seed(42);
        for _ in 0..200 {
            let text = tool.call("").expect("outlook");
            let percent = text
                .split("approximately ")
                .nth(1)
                .and_then(|rest| rest.split('%').next())
                .and_then(|value| value.parse::<f64>().ok())
                .expect("percent present");
            assert!((OUTLOOK_MIN_PERCENT..=OUTLOOK_MAX_PERCENT).contains(&percent));
            assert!(OUTLOOK_DIRECTIONS.iter().any(|d| text.contains(&format!("move {d} by"))));
            assert!(text.ends_with("(Disclaimer: Not financial advice)."));
        }
    }

    #[test]
    fn schema_requires_a_query() {
        let schema = PriceOutlookTool::new().parameters();
        assert_eq!(schema["required"][0], "query");
    }
}
