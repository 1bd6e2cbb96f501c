//! Secondary market-data provider used when every primary strategy comes
//! back empty.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::domain::{RawRecord, RecordOrigin};
use crate::http_client::{HttpClient, HttpRequest};
use crate::normalize::round2;

pub const DEFAULT_FALLBACK_TICKERS: [&str; 8] = [
    "RELIANCE.NS",
    "TCS.NS",
    "INFY.NS",
    "HDFCBANK.NS",
    "ICICIBANK.NS",
    "SBIN.NS",
    "BHARTIARTL.NS",
    "ITC.NS",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FallbackError {
    #[error("no fallback tickers configured")]
    NoTickers,

    #[error("fallback returned no data for {attempted} tickers (last error: {last_error})")]
    NoData { attempted: usize, last_error: String },
}

/// Daily bars from the Yahoo Finance chart API.
pub struct YahooFallback {
    http: Arc<dyn HttpClient>,
    base_url: String,
    tickers: Vec<String>,
}

impl YahooFallback {
    pub fn new(http: Arc<dyn HttpClient>, tickers: Vec<String>) -> Self {
        Self {
            http,
            base_url: String::from("https://query1.finance.yahoo.com"),
            tickers,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    /// Fetch the latest daily bar of every ticker, skipping tickers that fail.
    pub async fn fetch(&self) -> Result<Vec<RawRecord>, FallbackError> {
        if self.tickers.is_empty() {
            return Err(FallbackError::NoTickers);
        }

        let mut records = Vec::with_capacity(self.tickers.len());
        let mut last_error = String::new();
        for ticker in &self.tickers {
            match self.fetch_ticker(ticker).await {
                Ok(record) => records.push(record),
                Err(error) => {
                    tracing::debug!(%ticker, %error, "skipping fallback ticker");
                    last_error = error;
                }
            }
        }

        if records.is_empty() {
            return Err(FallbackError::NoData {
                attempted: self.tickers.len(),
                last_error,
            });
        }
        tracing::info!(count = records.len(), "retrieved fallback quotes");
        Ok(records)
    }

    async fn fetch_ticker(&self, ticker: &str) -> Result<RawRecord, String> {
        let url = format!(
            "{}/v8/finance/chart/{}?range=1d&interval=1d",
            self.base_url,
            urlencoding::encode(ticker)
        );
        let request = HttpRequest::get(url)
            .with_header("referer", "https://finance.yahoo.com/")
            .with_timeout_ms(10_000);

        let response = self
            .http
            .execute(request)
            .await
            .map_err(|e| format!("yahoo transport error: {}", e.message()))?;
        if !response.is_success() {
            return Err(format!("yahoo returned status {}", response.status));
        }

        let bar = last_bar(&response.body)?;
        Ok(RawRecord::new(RecordOrigin::Fallback)
            .with_field("SYMBOL", strip_exchange_suffix(ticker))
            .with_field("OPEN", round2(bar.open).to_string())
            .with_field("HIGH", round2(bar.high).to_string())
            .with_field("LOW", round2(bar.low).to_string())
            .with_field("LTP", round2(bar.close).to_string())
            .with_field("%CHNG", change_percent(bar.open, bar.close).to_string())
            .with_field("VOLUME", bar.volume.to_string()))
    }
}

/// `round((close - open) / open * 100, 2)`; zero when `open` is zero.
pub fn change_percent(open: f64, close: f64) -> f64 {
    if open == 0.0 {
        return 0.0;
    }
    round2((close - open) / open * 100.0)
}

/// `RELIANCE.NS` → `RELIANCE`.
pub fn strip_exchange_suffix(ticker: &str) -> String {
    ticker
        .strip_suffix(".NS")
        .or_else(|| ticker.strip_suffix(".BO"))
        .unwrap_or(ticker)
        .to_string()
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct DailyBar {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
}

fn last_bar(body: &str) -> Result<DailyBar, String> {
    let response: YahooChartResponse =
        serde_json::from_str(body).map_err(|e| format!("failed to parse yahoo chart: {e}"))?;
    if let Some(error) = response.chart.error.filter(|error| !error.is_null()) {
        return Err(format!("yahoo chart API error: {error}"));
    }

    let result = response
        .chart
        .result
        .unwrap_or_default()
        .into_iter()
        .next()
        .ok_or_else(|| String::from("no chart data in response"))?;
    let quote = result
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| String::from("no quote data"))?;

    (0..quote.close.len())
        .rev()
        .find_map(|i| {
            let open = quote.open.get(i).copied().flatten()?;
            let high = quote.high.get(i).copied().flatten()?;
            let low = quote.low.get(i).copied().flatten()?;
            let close = quote.close.get(i).copied().flatten()?;
            let volume = quote.volume.get(i).copied().flatten().unwrap_or(0);
            Some(DailyBar {
                open,
                high,
                low,
                close,
                volume: u64::try_from(volume).unwrap_or(0),
            })
        })
        .ok_or_else(|| String::from("chart has no complete bar"))
}

#[derive(Debug, Deserialize)]
struct YahooChartResponse {
    chart: YahooChartData,
}

#[derive(Debug, Deserialize)]
struct YahooChartData {
    #[serde(default)]
    result: Option<Vec<YahooChartResult>>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct YahooChartResult {
    indicators: YahooChartIndicators,
}

#[derive(Debug, Deserialize)]
struct YahooChartIndicators {
    quote: Vec<YahooChartQuote>,
}

#[derive(Debug, Deserialize)]
struct YahooChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<i64>>,
}
