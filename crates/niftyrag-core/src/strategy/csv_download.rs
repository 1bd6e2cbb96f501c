use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use serde_json::Value;
use time::Date;

use super::{clean_text, FetchOutcome, FetchStrategy, StrategyError, StrategyFuture};
use crate::domain::{RawRecord, RecordOrigin};
use crate::session::BrowserSession;

const DOWNLOAD_BUTTON: &str = "#dnldEquityStock";
const CLICK_SCRIPT: &str = "document.querySelector(arguments[0]).click();";
const PARTIAL_SUFFIXES: [&str; 3] = [".crdownload", ".part", ".tmp"];

/// Click the page's CSV export, wait for the file, and parse it.
pub struct CsvDownloadStrategy {
    page_url: String,
    download_dir: PathBuf,
    settle: Duration,
    button_timeout: Duration,
    download_timeout: Duration,
    poll_interval: Duration,
}

impl CsvDownloadStrategy {
    pub fn new(page_url: impl Into<String>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            page_url: page_url.into(),
            download_dir: download_dir.into(),
            settle: Duration::from_secs(10),
            button_timeout: Duration::from_secs(20),
            download_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn with_timings(
        mut self,
        settle: Duration,
        button_timeout: Duration,
        download_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        self.settle = settle;
        self.button_timeout = button_timeout;
        self.download_timeout = download_timeout;
        self.poll_interval = poll_interval;
        self
    }

    async fn await_download(&self, since: SystemTime) -> Result<PathBuf, StrategyError> {
        let started = Instant::now();
        loop {
            if let Some(path) = newest_completed_file(&self.download_dir, since)? {
                return Ok(path);
            }
            if started.elapsed() >= self.download_timeout {
                return Err(StrategyError::session(format!(
                    "no completed download in {} after {}ms",
                    self.download_dir.display(),
                    self.download_timeout.as_millis()
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

impl FetchStrategy for CsvDownloadStrategy {
    fn name(&self) -> &'static str {
        "csv_download"
    }

    fn fetch<'a>(&'a self, session: &'a BrowserSession, as_of: Date) -> StrategyFuture<'a> {
        Box::pin(async move {
            fs::create_dir_all(&self.download_dir)?;
            let browser = session.browser();
            browser.navigate(&self.page_url).await?;
            if !self.settle.is_zero() {
                tokio::time::sleep(self.settle).await;
            }
            browser
                .wait_for_element(DOWNLOAD_BUTTON, self.button_timeout)
                .await?;

            // Allow for filesystems with one-second mtime granularity.
            let since = SystemTime::now()
                .checked_sub(Duration::from_secs(1))
                .unwrap_or(SystemTime::UNIX_EPOCH);
            browser
                .execute_script(CLICK_SCRIPT, vec![Value::from(DOWNLOAD_BUTTON)])
                .await?;

            let downloaded = self.await_download(since).await?;
            let target = self.download_dir.join(dated_file_name(as_of));
            fs::rename(&downloaded, &target)?;
            tracing::info!(file = %target.display(), "market csv downloaded");

            let records = parse_csv(&target)?;
            Ok(FetchOutcome {
                records,
                chunks: Vec::new(),
            })
        })
    }
}

/// `financial_data_<YYYY-MM-DD>.csv`
pub fn dated_file_name(as_of: Date) -> String {
    format!("financial_data_{as_of}.csv")
}

fn newest_completed_file(dir: &Path, since: SystemTime) -> Result<Option<PathBuf>, StrategyError> {
    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if PARTIAL_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
            continue;
        }
        let modified = metadata.modified()?;
        if modified < since {
            continue;
        }
        if newest.as_ref().map_or(true, |(time, _)| modified > *time) {
            newest = Some((modified, entry.path()));
        }
    }
    Ok(newest.map(|(_, path)| path))
}

/// Rows of an exported CSV keyed by their (whitespace-collapsed) headers.
pub fn parse_csv(path: &Path) -> Result<Vec<RawRecord>, StrategyError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| StrategyError::io(format!("cannot open {}: {e}", path.display())))?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| StrategyError::parse(format!("unreadable csv header: {e}")))?
        .iter()
        .map(|header| clean_text(header.trim_start_matches('\u{feff}')))
        .collect();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| StrategyError::parse(format!("unreadable csv row: {e}")))?;
        let mut record = RawRecord::new(RecordOrigin::CsvDownload);
        for (index, value) in row.iter().enumerate() {
            if let Some(header) = headers.get(index).filter(|header| !header.is_empty()) {
                record.insert(header.clone(), value);
            }
        }
        if !record.is_empty() {
            records.push(record);
        }
    }
    Ok(records)
}
