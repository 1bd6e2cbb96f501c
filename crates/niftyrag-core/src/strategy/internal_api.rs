use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};
use time::Date;

use super::{FetchOutcome, FetchStrategy, StrategyError, StrategyFuture};
use crate::domain::{DocumentChunk, RawRecord, RecordOrigin};
use crate::http_client::{HttpClient, HttpRequest};
use crate::session::BrowserSession;

/// Runs `fetch` inside the page so the site's own cookies and TLS
/// fingerprint carry the request. Resolves with the body, or `ERROR:`.
const IN_PAGE_FETCH: &str = r#"
const url = arguments[0];
const done = arguments[arguments.length - 1];
fetch(url, { credentials: 'include', headers: { 'accept': 'application/json' } })
  .then((response) => response.ok ? response.text() : Promise.reject('HTTP ' + response.status))
  .then((body) => done(body))
  .catch((error) => done('ERROR:' + error));
"#;

/// Call the exchange's internal JSON API through the bootstrapped session.
pub struct InternalApiStrategy {
    base_url: String,
    index: String,
    option_symbol: String,
    strike_window: usize,
    replay: Option<Arc<dyn HttpClient>>,
}

impl InternalApiStrategy {
    pub fn new(base_url: impl Into<String>, index: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            index: index.into(),
            option_symbol: String::from("NIFTY"),
            strike_window: 5,
            replay: None,
        }
    }

    pub fn with_option_chain(mut self, symbol: impl Into<String>, strike_window: usize) -> Self {
        self.option_symbol = symbol.into();
        self.strike_window = strike_window;
        self
    }

    /// Replay calls over plain HTTP with the session's cookies instead of
    /// running them inside the browser.
    pub fn with_replay_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.replay = Some(http);
        self
    }

    fn equity_url(&self) -> String {
        format!(
            "{}/api/equity-stockIndices?index={}",
            self.base_url,
            urlencoding::encode(&self.index)
        )
    }

    fn option_chain_url(&self) -> String {
        format!(
            "{}/api/option-chain-indices?symbol={}",
            self.base_url,
            urlencoding::encode(&self.option_symbol)
        )
    }

    async fn get_json(&self, session: &BrowserSession, url: &str) -> Result<String, StrategyError> {
        match &self.replay {
            Some(http) => {
                let handle = session.handle();
                let request = HttpRequest::get(url)
                    .with_auth(&handle.auth())
                    .with_header("user-agent", handle.user_agent.clone())
                    .with_header("accept", "application/json")
                    .with_header("referer", format!("{}/", self.base_url))
                    .with_timeout_ms(15_000);
                let response = http
                    .execute(request)
                    .await
                    .map_err(|e| {
                        StrategyError::session(format!("api transport error: {}", e.message()))
                    })?;
                if !response.is_success() {
                    return Err(StrategyError::session(format!(
                        "api returned status {}",
                        response.status
                    )));
                }
                Ok(response.body)
            }
            None => {
                let value = session
                    .browser()
                    .execute_async_script(IN_PAGE_FETCH, vec![Value::from(url)])
                    .await?;
                let body = value
                    .as_str()
                    .ok_or_else(|| StrategyError::parse("in-page fetch returned a non-string"))?;
                if let Some(reason) = body.strip_prefix("ERROR:") {
                    return Err(StrategyError::session(format!("in-page fetch failed: {reason}")));
                }
                Ok(body.to_string())
            }
        }
    }

    async fn option_chain(
        &self,
        session: &BrowserSession,
        as_of: Date,
    ) -> Result<DocumentChunk, StrategyError> {
        let body = self.get_json(session, &self.option_chain_url()).await?;
        let content = summarize_option_chain(&self.option_symbol, &body, self.strike_window)?;
        Ok(DocumentChunk::option_chain(&self.option_symbol, as_of, content))
    }
}

impl FetchStrategy for InternalApiStrategy {
    fn name(&self) -> &'static str {
        "internal_api"
    }

    fn fetch<'a>(&'a self, session: &'a BrowserSession, as_of: Date) -> StrategyFuture<'a> {
        Box::pin(async move {
            let body = self.get_json(session, &self.equity_url()).await?;
            let records = parse_equity_index(&body, &self.index)?;
            tracing::info!(
                rows = records.len(),
                index = %self.index,
                "fetched index constituents from api"
            );

            let mut chunks = Vec::new();
            if self.strike_window > 0 {
                match self.option_chain(session, as_of).await {
                    Ok(chunk) => chunks.push(chunk),
                    Err(error) => {
                        tracing::warn!(
                            %error,
                            symbol = %self.option_symbol,
                            "option chain unavailable"
                        );
                    }
                }
            }

            Ok(FetchOutcome { records, chunks })
        })
    }
}

#[derive(Debug, Deserialize)]
struct EquityIndexResponse {
    #[serde(default)]
    data: Vec<Map<String, Value>>,
}

/// Constituent rows of `{ "data": [...] }`, minus the index's own summary row.
pub fn parse_equity_index(body: &str, index: &str) -> Result<Vec<RawRecord>, StrategyError> {
    let response: EquityIndexResponse = serde_json::from_str(body)
        .map_err(|e| StrategyError::parse(format!("malformed index response: {e}")))?;

    let mut records = Vec::with_capacity(response.data.len());
    for row in response.data {
        let symbol = row.get("symbol").and_then(scalar_text).unwrap_or_default();
        if symbol.trim().eq_ignore_ascii_case(index.trim()) {
            continue;
        }

        let mut record = RawRecord::new(RecordOrigin::InternalApi);
        for (name, value) in &row {
            if let Some(text) = scalar_text(value) {
                record.insert(name.clone(), text);
            }
        }
        if !record.is_empty() {
            records.push(record);
        }
    }
    Ok(records)
}

#[derive(Debug, Deserialize)]
struct OptionChainResponse {
    records: OptionChainRecords,
}

#[derive(Debug, Deserialize)]
struct OptionChainRecords {
    #[serde(default, rename = "underlyingValue")]
    underlying_value: Option<f64>,
    #[serde(default)]
    data: Vec<OptionChainRow>,
}

#[derive(Debug, Deserialize)]
struct OptionChainRow {
    #[serde(rename = "strikePrice")]
    strike_price: f64,
    #[serde(default, rename = "expiryDate")]
    expiry_date: Option<String>,
    #[serde(default, rename = "CE")]
    call: Option<OptionLeg>,
    #[serde(default, rename = "PE")]
    put: Option<OptionLeg>,
}

#[derive(Debug, Deserialize)]
struct OptionLeg {
    #[serde(default, rename = "lastPrice")]
    last_price: Option<f64>,
    #[serde(default, rename = "openInterest")]
    open_interest: Option<f64>,
}

/// Describe `window` strikes centered on the middle of the chain.
pub fn summarize_option_chain(
    symbol: &str,
    body: &str,
    window: usize,
) -> Result<String, StrategyError> {
    let response: OptionChainResponse = serde_json::from_str(body)
        .map_err(|e| StrategyError::parse(format!("malformed option chain: {e}")))?;
    let rows = &response.records.data;
    if rows.is_empty() {
        return Err(StrategyError::parse("option chain has no strikes"));
    }

    let range = centered_window(rows.len(), window);
    let strikes = rows[range]
        .iter()
        .map(|row| {
            format!(
                "Strike {}{}: CE {}, PE {}",
                row.strike_price,
                row.expiry_date
                    .as_deref()
                    .map(|expiry| format!(" (expiry {expiry})"))
                    .unwrap_or_default(),
                describe_leg(row.call.as_ref()),
                describe_leg(row.put.as_ref()),
            )
        })
        .collect::<Vec<_>>()
        .join("; ");

    let underlying = response
        .records
        .underlying_value
        .map(|value| format!(" (underlying {value})"))
        .unwrap_or_default();
    Ok(format!("Option chain for {symbol}{underlying}. {strikes}."))
}

/// Index range of at most `window` items centered on `len / 2`.
pub fn centered_window(len: usize, window: usize) -> std::ops::Range<usize> {
    let window = window.min(len);
    let start = (len / 2).saturating_sub(window / 2).min(len - window);
    start..start + window
}

fn describe_leg(leg: Option<&OptionLeg>) -> String {
    match leg {
        Some(leg) => format!(
            "LTP {} OI {}",
            leg.last_price.map_or_else(|| String::from("n/a"), |v| v.to_string()),
            leg.open_interest.map_or_else(|| String::from("n/a"), |v| v.to_string()),
        ),
        None => String::from("n/a"),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}
