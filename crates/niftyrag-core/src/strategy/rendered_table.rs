use std::time::Duration;

use scraper::{ElementRef, Html, Selector};
use time::Date;

use super::{clean_text, FetchOutcome, FetchStrategy, StrategyError, StrategyFuture};
use crate::domain::{RawRecord, RecordOrigin};
use crate::session::BrowserSession;

/// Render the live market page and scrape its equity table.
pub struct RenderedTableStrategy {
    page_url: String,
    table_timeout: Duration,
}

impl RenderedTableStrategy {
    pub fn new(page_url: impl Into<String>, table_timeout: Duration) -> Self {
        Self {
            page_url: page_url.into(),
            table_timeout,
        }
    }
}

impl FetchStrategy for RenderedTableStrategy {
    fn name(&self) -> &'static str {
        "rendered_table"
    }

    fn fetch<'a>(&'a self, session: &'a BrowserSession, _as_of: Date) -> StrategyFuture<'a> {
        Box::pin(async move {
            let browser = session.browser();
            browser.navigate(&self.page_url).await?;
            browser.wait_for_element("table", self.table_timeout).await?;
            let html = browser.page_source().await?;

            let records = parse_table(&html)?;
            tracing::info!(rows = records.len(), "scraped rendered equity table");
            Ok(FetchOutcome {
                records,
                chunks: Vec::new(),
            })
        })
    }
}

/// Rows of the equity table (`#equityStockTable`, else the first table),
/// keyed by their column headers.
pub fn parse_table(html: &str) -> Result<Vec<RawRecord>, StrategyError> {
    let document = Html::parse_document(html);
    let preferred = selector("#equityStockTable")?;
    let any_table = selector("table")?;

    let table = document
        .select(&preferred)
        .next()
        .or_else(|| document.select(&any_table).next())
        .ok_or_else(|| StrategyError::parse("page contains no table"))?;

    let headers = table_headers(table)?;
    let body_rows = selector("tbody tr")?;
    let all_rows = selector("tr")?;
    let cell = selector("td")?;

    let mut rows: Vec<ElementRef<'_>> = table.select(&body_rows).collect();
    if rows.is_empty() {
        rows = table.select(&all_rows).collect();
    }

    let mut records = Vec::new();
    for row in rows {
        let cells: Vec<String> = row
            .select(&cell)
            .map(|td| clean_text(&td.text().collect::<String>()))
            .collect();
        if cells.is_empty() {
            continue;
        }

        let mut record = RawRecord::new(RecordOrigin::RenderedTable);
        for (index, value) in cells.into_iter().enumerate() {
            let name = headers
                .get(index)
                .filter(|header| !header.is_empty())
                .cloned()
                .unwrap_or_else(|| format!("column_{index}"));
            record.insert(name, value);
        }
        records.push(record);
    }
    Ok(records)
}

fn table_headers(table: ElementRef<'_>) -> Result<Vec<String>, StrategyError> {
    let head_cells = selector("thead th")?;
    let first_row = selector("tr")?;
    let th = selector("th")?;

    let mut headers: Vec<String> = table
        .select(&head_cells)
        .map(|cell| clean_text(&cell.text().collect::<String>()))
        .collect();
    if headers.is_empty() {
        if let Some(row) = table.select(&first_row).next() {
            headers = row
                .select(&th)
                .map(|cell| clean_text(&cell.text().collect::<String>()))
                .collect();
        }
    }
    Ok(headers)
}

fn selector(css: &str) -> Result<Selector, StrategyError> {
    Selector::parse(css).map_err(|e| StrategyError::parse(format!("bad selector '{css}': {e}")))
}
