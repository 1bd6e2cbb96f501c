//! Ingestion orchestrator.
//!
//! One run: bootstrap a browser session, try each strategy in order until
//! one yields records, release the session, fall back to the secondary
//! provider if nothing was acquired, then persist and append a run log.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use time::{Date, OffsetDateTime, UtcOffset};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::announcements::AnnouncementSource;
use crate::browser::BrowserLauncher;
use crate::config::{NiftyConfig, StrategyKind};
use crate::domain::{DocumentChunk, IngestionLog, MarketRecord, RunStatus};
use crate::fallback::YahooFallback;
use crate::http_client::HttpClient;
use crate::normalize::{normalize_batch, NormalizedBatch};
use crate::session::{BrowserSession, SessionBootstrapper};
use crate::sink::PersistenceSink;
use crate::strategy::{
    CsvDownloadStrategy, FetchStrategy, InternalApiStrategy, RenderedTableStrategy,
};

pub const FALLBACK_STRATEGY_NAME: &str = "fallback";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("an ingestion run is already in progress")]
    AlreadyRunning,

    #[error("no strategy or fallback produced records: {}", .errors.join("; "))]
    Exhausted { run_id: Uuid, errors: Vec<String> },
}

/// Summary of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub strategy: String,
    pub records: usize,
    pub structured_rows: Option<usize>,
    pub chunks_added: usize,
    pub chunks_replaced: usize,
    pub drifted: Vec<String>,
    /// Non-fatal problems: failed strategies, skipped records, sink errors.
    pub errors: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
}

struct Acquired {
    strategy: String,
    records: Vec<MarketRecord>,
    chunks: Vec<DocumentChunk>,
    drifted: Vec<String>,
}

pub struct IngestionPipeline {
    bootstrapper: SessionBootstrapper,
    strategies: Vec<Arc<dyn FetchStrategy>>,
    fallback: Option<YahooFallback>,
    announcements: Option<AnnouncementSource>,
    sink: PersistenceSink,
    market_offset: UtcOffset,
    run_lock: Mutex<()>,
}

impl IngestionPipeline {
    pub fn new(bootstrapper: SessionBootstrapper, sink: PersistenceSink) -> Self {
        Self {
            bootstrapper,
            strategies: Vec::new(),
            fallback: None,
            announcements: None,
            sink,
            market_offset: UtcOffset::UTC,
            run_lock: Mutex::new(()),
        }
    }

    /// Assemble the pipeline described by `config`.
    pub fn from_config(
        config: &NiftyConfig,
        launcher: Arc<dyn BrowserLauncher>,
        http: Arc<dyn HttpClient>,
        sink: PersistenceSink,
    ) -> Self {
        let source = &config.source;
        let bootstrapper = SessionBootstrapper::new(
            launcher,
            config.launch_options(),
            source.landing_url.clone(),
            Duration::from_secs(config.browser.settle_secs),
        );
        let mut pipeline =
            Self::new(bootstrapper, sink).with_market_offset(config.market_offset());
        for kind in &source.strategies {
            let strategy: Arc<dyn FetchStrategy> = match kind {
                StrategyKind::RenderedTable => Arc::new(RenderedTableStrategy::new(
                    source.market_page_url.clone(),
                    Duration::from_secs(source.table_timeout_secs),
                )),
                StrategyKind::InternalApi => {
                    let mut api =
                        InternalApiStrategy::new(source.api_base_url.clone(), source.index.clone())
                            .with_option_chain(source.option_symbol.clone(), source.strike_window);
                    if source.replay_api_over_http {
                        api = api.with_replay_client(Arc::clone(&http));
                    }
                    Arc::new(api)
                }
                StrategyKind::CsvDownload => Arc::new(
                    CsvDownloadStrategy::new(source.market_page_url.clone(), config.data_dir())
                        .with_timings(
                            Duration::from_secs(source.download_settle_secs),
                            Duration::from_secs(20),
                            Duration::from_secs(source.download_timeout_secs),
                            Duration::from_millis(500),
                        ),
                ),
            };
            pipeline = pipeline.with_strategy(strategy);
        }

        if config.fallback.enabled {
            pipeline = pipeline.with_fallback(
                YahooFallback::new(http, config.fallback.tickers.clone())
                    .with_base_url(config.fallback.base_url.clone()),
            );
        }
        pipeline.with_announcements(AnnouncementSource::new(
            config.data_dir().join(&source.announcement_file),
            source.announcement_label.clone(),
        ))
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn FetchStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn with_fallback(mut self, fallback: YahooFallback) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_announcements(mut self, announcements: AnnouncementSource) -> Self {
        self.announcements = Some(announcements);
        self
    }

    pub fn with_market_offset(mut self, offset: UtcOffset) -> Self {
        self.market_offset = offset;
        self
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|strategy| strategy.name()).collect()
    }

    /// Run once for today's exchange-local date.
    pub async fn run(&self) -> Result<PipelineReport, PipelineError> {
        let as_of = OffsetDateTime::now_utc().to_offset(self.market_offset).date();
        self.run_on(as_of).await
    }

    /// Run once, stamping records with `as_of`.
    ///
    /// A second call while one is in flight fails with
    /// [`PipelineError::AlreadyRunning`].
    pub async fn run_on(&self, as_of: Date) -> Result<PipelineReport, PipelineError> {
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| PipelineError::AlreadyRunning)?;

        let run_id = Uuid::new_v4();
        let started_at = OffsetDateTime::now_utc();
        tracing::info!(%run_id, %as_of, "starting ingestion run");

        let mut errors = Vec::new();
        let acquired = match self.acquire_primary(as_of, &mut errors).await {
            Some(acquired) => Some(acquired),
            None => self.acquire_fallback(as_of, &mut errors).await,
        };

        let Some(acquired) = acquired else {
            tracing::warn!(%run_id, "ingestion exhausted every source");
            self.append_log(IngestionLog {
                run_id,
                status: RunStatus::Failed,
                item_count: 0,
                strategy: None,
                errors: errors.clone(),
                started_at,
                finished_at: OffsetDateTime::now_utc(),
            });
            return Err(PipelineError::Exhausted { run_id, errors });
        };

        let mut chunks = acquired.chunks;
        if let Some(announcements) = &self.announcements {
            match announcements.load() {
                Ok(Some(chunk)) => chunks.push(chunk),
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(
                        %error,
                        path = %announcements.path().display(),
                        "announcement unavailable"
                    );
                    errors.push(format!("announcement: {error}"));
                }
            }
        }

        let sink_report = self.sink.persist(&acquired.records, &chunks);
        errors.extend(sink_report.errors);

        let finished_at = OffsetDateTime::now_utc();
        self.append_log(IngestionLog {
            run_id,
            status: RunStatus::Success,
            item_count: acquired.records.len(),
            strategy: Some(acquired.strategy.clone()),
            errors: errors.clone(),
            started_at,
            finished_at,
        });
        tracing::info!(
            %run_id,
            strategy = %acquired.strategy,
            records = acquired.records.len(),
            "ingestion run complete"
        );

        Ok(PipelineReport {
            run_id,
            strategy: acquired.strategy,
            records: acquired.records.len(),
            structured_rows: sink_report.structured_rows,
            chunks_added: sink_report.chunks_added,
            chunks_replaced: sink_report.chunks_replaced,
            drifted: acquired.drifted,
            errors,
            started_at,
            finished_at,
        })
    }

    async fn acquire_primary(&self, as_of: Date, errors: &mut Vec<String>) -> Option<Acquired> {
        if self.strategies.is_empty() {
            return None;
        }

        let session = match self.bootstrapper.bootstrap().await {
            Ok(session) => session,
            Err(error) => {
                tracing::warn!(%error, "session bootstrap failed");
                errors.push(format!("session: {error}"));
                return None;
            }
        };

        let acquired = self.try_strategies(&session, as_of, errors).await;
        session.close().await;
        acquired
    }

    async fn try_strategies(
        &self,
        session: &BrowserSession,
        as_of: Date,
        errors: &mut Vec<String>,
    ) -> Option<Acquired> {
        for strategy in &self.strategies {
            let name = strategy.name();
            let outcome = match strategy.fetch(session, as_of).await {
                Ok(outcome) => outcome,
                Err(error) => {
                    tracing::warn!(strategy = name, code = error.code(), %error, "strategy failed");
                    errors.push(format!("{name}: {error}"));
                    continue;
                }
            };

            let batch = normalize_batch(&outcome.records, as_of);
            note_rejects(name, &batch, errors);
            if batch.records.is_empty() {
                tracing::warn!(strategy = name, "strategy produced no usable records");
                errors.push(format!("{name}: no records"));
                continue;
            }

            return Some(Acquired {
                strategy: name.to_string(),
                drifted: batch.drifted.iter().map(ToString::to_string).collect(),
                records: batch.records,
                chunks: outcome.chunks,
            });
        }
        None
    }

    async fn acquire_fallback(&self, as_of: Date, errors: &mut Vec<String>) -> Option<Acquired> {
        let fallback = self.fallback.as_ref()?;
        tracing::info!(tickers = fallback.tickers().len(), "primary sources empty; using fallback");

        let raws = match fallback.fetch().await {
            Ok(raws) => raws,
            Err(error) => {
                tracing::warn!(%error, "fallback source failed");
                errors.push(format!("{FALLBACK_STRATEGY_NAME}: {error}"));
                return None;
            }
        };

        let batch = normalize_batch(&raws, as_of);
        note_rejects(FALLBACK_STRATEGY_NAME, &batch, errors);
        if batch.records.is_empty() {
            errors.push(format!("{FALLBACK_STRATEGY_NAME}: no records"));
            return None;
        }
        Some(Acquired {
            strategy: FALLBACK_STRATEGY_NAME.to_string(),
            drifted: batch.drifted.iter().map(ToString::to_string).collect(),
            records: batch.records,
            chunks: Vec::new(),
        })
    }

    fn append_log(&self, log: IngestionLog) {
        if let Err(error) = self.sink.warehouse().append_ingestion_log(&log.to_row()) {
            tracing::warn!(%error, run_id = %log.run_id, "could not append ingestion log");
        }
    }
}

fn note_rejects(name: &str, batch: &NormalizedBatch, errors: &mut Vec<String>) {
    if !batch.rejected.is_empty() {
        errors.push(format!("{name}: skipped {} unusable records", batch.rejected.len()));
    }
}
