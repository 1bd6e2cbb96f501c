//! Behavior-driven tests for the ingestion pipeline.
//!
//! A scripted browser and canned HTTP transport stand in for the exchange
//! site and the fallback provider, so every run is offline and repeatable.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use niftyrag_core::strategy::StrategyFuture;
use niftyrag_core::{
    AnnouncementSource, BrowserSession, CannedHttpClient, CsvDownloadStrategy, FetchOutcome,
    FetchStrategy, HttpResponse, IngestionPipeline, InternalApiStrategy, PersistenceSink,
    PipelineError, RawRecord, RecordOrigin, RenderedTableStrategy, ScriptedBrowser,
    ScriptedLauncher, SessionBootstrapper, StrategyError, Warehouse, WarehouseConfig,
    YahooFallback, DEFAULT_ANNOUNCEMENT_TEXT,
};
use serde_json::Value;
use tempfile::{tempdir, TempDir};
use time::macros::date;
use time::Date;
use tokio::sync::Notify;

const MARKET_PAGE: &str = "https://www.nseindia.com/market-data/live-equity-market?symbol=NIFTY%2050";
const AS_OF: Date = date!(2026 - 10 - 16);

const INDEX_JSON: &str = r#"{"name":"NIFTY 50","data":[
    {"symbol":"NIFTY 50","open":24100,"dayHigh":24200,"dayLow":24050,"lastPrice":24150,"pChange":0.21,"totalTradedVolume":123456789},
    {"symbol":"INFY","open":1600,"dayHigh":1620,"dayLow":1590,"lastPrice":1610,"pChange":0.63,"totalTradedVolume":500000},
    {"symbol":"TCS","open":3400,"dayHigh":3450,"dayLow":3390,"lastPrice":3434,"pChange":1.0,"totalTradedVolume":900000}
]}"#;

const OPTION_CHAIN_JSON: &str = r#"{"records":{"underlyingValue":24150,"data":[
    {"strikePrice":24000,"CE":{"lastPrice":210,"openInterest":1000}},
    {"strikePrice":24100,"CE":{"lastPrice":150,"openInterest":2000}},
    {"strikePrice":24200,"CE":{"lastPrice":95,"openInterest":3000}}
]}}"#;

struct Harness {
    _temp: TempDir,
    warehouse: Warehouse,
    data_dir: std::path::PathBuf,
}

fn harness() -> Harness {
    let temp = tempdir().expect("tempdir");
    let mut config = WarehouseConfig::for_home(temp.path());
    config.max_pool_size = 2;
    let warehouse = Warehouse::open(config).expect("warehouse open");
    let data_dir = temp.path().join("data");
    fs::create_dir_all(&data_dir).expect("data dir");
    Harness {
        _temp: temp,
        warehouse,
        data_dir,
    }
}

fn bootstrapper(launcher: Arc<ScriptedLauncher>) -> SessionBootstrapper {
    SessionBootstrapper::new(
        launcher,
        niftyrag_core::LaunchOptions::new("/tmp"),
        "https://www.nseindia.com",
        Duration::ZERO,
    )
}

fn api_browser() -> ScriptedBrowser {
    ScriptedBrowser::new()
        .with_cookie("nsit", "abc")
        .with_script_result("equity-stockIndices", Value::from(INDEX_JSON))
        .with_script_result("option-chain-indices", Value::from(OPTION_CHAIN_JSON))
}

fn yahoo_chart(open: f64, close: f64) -> HttpResponse {
    HttpResponse::ok_json(format!(
        r#"{{"chart":{{"result":[{{"indicators":{{"quote":[
            {{"open":[{open}],"high":[{close}],"low":[{open}],"close":[{close}],"volume":[900000]}}
        ]}}}}],"error":null}}}}"#
    ))
}

fn table_then_api(launcher: Arc<ScriptedLauncher>, warehouse: &Warehouse) -> IngestionPipeline {
    IngestionPipeline::new(bootstrapper(launcher), PersistenceSink::new(warehouse.clone()))
        .with_strategy(Arc::new(RenderedTableStrategy::new(MARKET_PAGE, Duration::ZERO)))
        .with_strategy(Arc::new(
            InternalApiStrategy::new("https://www.nseindia.com", "NIFTY 50")
                .with_option_chain("NIFTY", 5),
        ))
}

// =============================================================================
// Strategy ordering
// =============================================================================

#[tokio::test]
async fn when_the_table_never_renders_the_api_strategy_supplies_records() {
    // Given: A page without a table but a working internal API
    let h = harness();
    let browser = Arc::new(api_browser());
    let launcher = Arc::new(ScriptedLauncher::new(Arc::clone(&browser)));
    let pipeline = table_then_api(Arc::clone(&launcher), &h.warehouse);

    // When: The pipeline runs
    let report = pipeline.run_on(AS_OF).await.expect("run succeeds");

    // Then: The API strategy won and the index summary row was dropped
    assert_eq!(report.strategy, "internal_api");
    assert_eq!(report.records, 2);
    assert!(report.errors.iter().any(|e| e.starts_with("rendered_table:")));

    let rows = h.warehouse.market_stats().expect("rows");
    let infy = rows.iter().find(|row| row.symbol == "INFY").expect("INFY stored");
    assert_eq!(
        (infy.open, infy.high, infy.low, infy.ltp, infy.change_percent, infy.volume),
        (1600.0, 1620.0, 1590.0, 1610.0, 0.63, 500_000)
    );

    // And: The option-chain window became a searchable chunk
    let hits = h.warehouse.search_chunks("NIFTY option chain strike", 3).expect("search");
    assert!(hits.iter().any(|hit| hit.chunk.dedup_key == "option-chain:NIFTY:2026-10-16"));

    // And: The browser was released exactly once
    assert_eq!(launcher.launch_count(), 1);
    assert_eq!(browser.quit_count(), 1);
}

#[tokio::test]
async fn when_every_strategy_fails_the_fallback_provider_is_used() {
    // Given: A browser that yields nothing and a reachable fallback provider
    let h = harness();
    let browser = Arc::new(ScriptedBrowser::new());
    let launcher = Arc::new(ScriptedLauncher::new(Arc::clone(&browser)));
    let http = Arc::new(CannedHttpClient::new().with_route(
        "https://query1.finance.yahoo.com/v8/finance/chart/TCS.NS",
        yahoo_chart(3400.0, 3434.0),
    ));
    let pipeline = table_then_api(launcher, &h.warehouse).with_fallback(YahooFallback::new(
        http,
        vec!["TCS.NS".to_string(), "INFY.NS".to_string()],
    ));

    // When: The pipeline runs
    let report = pipeline.run_on(AS_OF).await.expect("fallback succeeds");

    // Then: Fallback data is stored with a locally computed change
    assert_eq!(report.strategy, "fallback");
    let rows = h.warehouse.market_stats().expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].symbol, "TCS");
    assert_eq!(rows[0].change_percent, 1.0);
    assert_eq!(rows[0].origin, "fallback");
    assert_eq!(browser.quit_count(), 1);
}

#[tokio::test]
async fn when_the_browser_cannot_launch_the_fallback_still_runs() {
    // Given: No webdriver available
    let h = harness();
    let launcher = Arc::new(ScriptedLauncher::failing("chromedriver not running"));
    let http = Arc::new(CannedHttpClient::new().with_route(
        "https://query1.finance.yahoo.com/v8/finance/chart/",
        yahoo_chart(100.0, 101.0),
    ));
    let pipeline = table_then_api(Arc::clone(&launcher), &h.warehouse)
        .with_fallback(YahooFallback::new(http, vec!["ITC.NS".to_string()]));

    // When: The pipeline runs
    let report = pipeline.run_on(AS_OF).await.expect("fallback succeeds");

    // Then: The launch failure is reported but not fatal
    assert_eq!(report.strategy, "fallback");
    assert!(report.errors.iter().any(|e| e.contains("chromedriver not running")));
    assert_eq!(launcher.launch_count(), 1);
}

// =============================================================================
// Exhaustion
// =============================================================================

#[tokio::test]
async fn when_nothing_yields_records_the_run_fails_and_is_logged() {
    // Given: A previous snapshot and sources that all fail
    let h = harness();
    let seeded = table_then_api(
        Arc::new(ScriptedLauncher::new(Arc::new(api_browser()))),
        &h.warehouse,
    );
    seeded.run_on(AS_OF).await.expect("seed run");

    let launcher = Arc::new(ScriptedLauncher::new(Arc::new(ScriptedBrowser::new())));
    let pipeline = table_then_api(launcher, &h.warehouse).with_fallback(YahooFallback::new(
        Arc::new(CannedHttpClient::new()),
        vec!["SBIN.NS".to_string()],
    ));

    // When: The pipeline runs
    let error = pipeline.run_on(AS_OF).await.expect_err("run is exhausted");

    // Then: The error is terminal and the snapshot is untouched
    assert!(matches!(error, PipelineError::Exhausted { .. }));
    assert_eq!(h.warehouse.market_stat_count().expect("count"), 2);

    // And: A failed run log entry was appended
    let logs = h.warehouse.ingestion_logs(10).expect("logs");
    assert_eq!(logs.len(), 2);
    let failed = logs.iter().find(|log| log.status == "failed").expect("failed entry");
    assert_eq!(failed.item_count, 0);
    assert!(failed.errors.iter().any(|e| e.starts_with("fallback:")));
}

// =============================================================================
// Store semantics
// =============================================================================

#[tokio::test]
async fn structured_store_holds_exactly_the_latest_snapshot() {
    // Given: A run that stored two records
    let h = harness();
    table_then_api(Arc::new(ScriptedLauncher::new(Arc::new(api_browser()))), &h.warehouse)
        .run_on(AS_OF)
        .await
        .expect("first run");
    assert_eq!(h.warehouse.market_stat_count().expect("count"), 2);

    // When: A later run acquires a single record
    let html = "<table><thead><tr><th>SYMBOL</th><th>LTP</th></tr></thead>\
                <tbody><tr><td>SBIN</td><td>812.40</td></tr></tbody></table>";
    let browser = Arc::new(
        ScriptedBrowser::new()
            .with_element("table")
            .with_page(MARKET_PAGE, html),
    );
    table_then_api(Arc::new(ScriptedLauncher::new(browser)), &h.warehouse)
        .run_on(AS_OF)
        .await
        .expect("second run");

    // Then: Only that record remains
    let rows = h.warehouse.market_stats().expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].symbol, "SBIN");
}

#[tokio::test]
async fn semantic_store_grows_by_new_keys_only() {
    // Given: An announcement artifact and a first run
    let h = harness();
    let announcements =
        AnnouncementSource::new(h.data_dir.join("reliance_announcement.txt"), "RELIANCE");
    let launcher = Arc::new(ScriptedLauncher::new(Arc::new(api_browser())));
    let pipeline = table_then_api(launcher, &h.warehouse).with_announcements(announcements);
    let first = pipeline.run_on(AS_OF).await.expect("first run");
    let after_first = h.warehouse.chunk_count().expect("count");

    // Then: Two market chunks, one option chain, one announcement
    assert_eq!(first.chunks_added, 4);
    assert_eq!(after_first, 4);

    // When: The same day is ingested again, then the next day
    let again = pipeline.run_on(AS_OF).await.expect("repeat run");
    let next_day = pipeline.run_on(date!(2026 - 10 - 17)).await.expect("next day");

    // Then: Repeats replace in place; a new date adds new keys
    assert_eq!(again.chunks_added, 0);
    assert_eq!(again.chunks_replaced, 4);
    assert_eq!(next_day.chunks_added, 3);
    assert_eq!(h.warehouse.chunk_count().expect("count"), after_first + 3);

    let hits = h.warehouse.search_chunks("reliance dividend board meeting", 1).expect("search");
    assert_eq!(hits[0].chunk.content, DEFAULT_ANNOUNCEMENT_TEXT);
}

// =============================================================================
// File download
// =============================================================================

#[tokio::test]
async fn downloaded_csv_is_renamed_by_date_and_ingested() {
    // Given: An export button that drops a CSV into the download directory
    let h = harness();
    let csv = "\"SYMBOL \n\",\"OPEN \n\",\"HIGH \n\",\"LOW \n\",\"LTP \n\",\"%CHNG \n\",\"VOLUME \n(shares)\"\n\
               \"NIFTY 50\",\"24,100.00\",\"24,200.00\",\"24,050.00\",\"24,150.00\",\"0.21\",\"1,23,45,678\"\n\
               \"ITC\",\"410.00\",\"415.00\",\"405.00\",\"412.05\",\"0.50\",\"12,34,567\"\n";
    let browser = Arc::new(
        ScriptedBrowser::new()
            .with_element("#dnldEquityStock")
            .with_download(&h.data_dir, "MW-NIFTY-50-16-Oct-2026.csv", csv),
    );
    let strategy = CsvDownloadStrategy::new(MARKET_PAGE, &h.data_dir).with_timings(
        Duration::ZERO,
        Duration::ZERO,
        Duration::from_secs(2),
        Duration::from_millis(10),
    );
    let pipeline = IngestionPipeline::new(
        bootstrapper(Arc::new(ScriptedLauncher::new(Arc::clone(&browser)))),
        PersistenceSink::new(h.warehouse.clone()),
    )
    .with_strategy(Arc::new(strategy));

    // When: The pipeline runs
    let report = pipeline.run_on(AS_OF).await.expect("run succeeds");

    // Then: The file carries the run date and its rows are stored
    assert_eq!(report.strategy, "csv_download");
    assert!(h.data_dir.join("financial_data_2026-10-16.csv").exists());
    assert!(!h.data_dir.join("MW-NIFTY-50-16-Oct-2026.csv").exists());
    let rows = h.warehouse.market_stats().expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].symbol, "ITC");
    assert_eq!(rows[0].volume, 1_234_567);
}

// =============================================================================
// Concurrency
// =============================================================================

/// Holds the run open until released.
struct GatedStrategy {
    gate: Arc<Notify>,
}

impl FetchStrategy for GatedStrategy {
    fn name(&self) -> &'static str {
        "gated"
    }

    fn fetch<'a>(&'a self, _session: &'a BrowserSession, _as_of: Date) -> StrategyFuture<'a> {
        Box::pin(async move {
            self.gate.notified().await;
            Ok::<_, StrategyError>(FetchOutcome {
                records: vec![RawRecord::new(RecordOrigin::InternalApi)
                    .with_field("symbol", "INFY")
                    .with_field("lastPrice", "1610")],
                chunks: Vec::new(),
            })
        })
    }
}

#[tokio::test]
async fn a_second_trigger_during_a_run_is_rejected() {
    // Given: A run blocked inside its strategy
    let h = harness();
    let gate = Arc::new(Notify::new());
    let pipeline = IngestionPipeline::new(
        bootstrapper(Arc::new(ScriptedLauncher::new(Arc::new(ScriptedBrowser::new())))),
        PersistenceSink::new(h.warehouse.clone()),
    )
    .with_strategy(Arc::new(GatedStrategy {
        gate: Arc::clone(&gate),
    }));

    // When: A second run is triggered while the first is in flight
    let first = pipeline.run_on(AS_OF);
    let second = async {
        let result = pipeline.run_on(AS_OF).await;
        gate.notify_one();
        result
    };
    let (first, second) = tokio::join!(first, second);

    // Then: Only the first run proceeds
    assert!(matches!(second, Err(PipelineError::AlreadyRunning)));
    assert_eq!(first.expect("first run").records, 1);
}

#[tokio::test]
async fn when_a_run_is_abandoned_mid_strategy_the_browser_is_still_quit() {
    // Given: A run that never gets past its strategy
    let h = harness();
    let browser = Arc::new(ScriptedBrowser::new());
    let pipeline = IngestionPipeline::new(
        bootstrapper(Arc::new(ScriptedLauncher::new(Arc::clone(&browser)))),
        PersistenceSink::new(h.warehouse.clone()),
    )
    .with_strategy(Arc::new(GatedStrategy {
        gate: Arc::new(Notify::new()),
    }));

    // When: The caller gives up on the run
    let outcome = tokio::time::timeout(Duration::from_millis(50), pipeline.run_on(AS_OF)).await;
    tokio::task::yield_now().await;

    // Then: The abandoned session still shuts its browser down
    assert!(outcome.is_err());
    assert_eq!(browser.quit_count(), 1);
    assert_eq!(h.warehouse.market_stat_count().expect("count"), 0);
}
