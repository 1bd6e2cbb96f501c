//! # niftyrag core
//!
//! Data acquisition for the niftyrag market assistant.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`browser`] | Browser automation trait, WebDriver client, scripted test double |
//! | [`session`] | Session bootstrapping against the bot-protected source |
//! | [`strategy`] | Rendered-table, internal-API and CSV-download strategies |
//! | [`fallback`] | Yahoo Finance chart fallback |
//! | [`normalize`] | Raw record → [`MarketRecord`] canonicalization |
//! | [`sink`] | Structured and semantic store writes |
//! | [`pipeline`] | Run orchestration and audit logging |
//! | [`config`] | TOML configuration with environment overrides |
//!
//! ## Architecture
//!
//! ```text
//! SessionBootstrapper ──▶ FetchStrategy (in order) ──▶ session closed
//!                                   │ nothing acquired
//!                                   ▼
//!                             YahooFallback
//!                                   │
//!                                   ▼
//!                            normalize_batch
//!                                   │
//!                    ┌──────────────┴──────────────┐
//!                    ▼                             ▼
//!             market_stats                 document_chunks
//! ```

pub mod announcements;
pub mod browser;
pub mod config;
pub mod domain;
pub mod error;
pub mod fallback;
pub mod http_client;
pub mod normalize;
pub mod pipeline;
pub mod session;
pub mod sink;
pub mod strategy;

pub use announcements::{AnnouncementSource, DEFAULT_ANNOUNCEMENT_TEXT};
pub use browser::{
    Browser, BrowserCookie, BrowserError, BrowserLauncher, LaunchOptions, ScriptedBrowser,
    ScriptedLauncher, WebDriverLauncher,
};
pub use config::{ConfigError, NiftyConfig, StrategyKind};
pub use domain::{
    ChunkSource, DocumentChunk, IngestionLog, MarketRecord, RawRecord, RecordOrigin, RunStatus,
    Symbol,
};
pub use error::ValidationError;
pub use fallback::{change_percent, FallbackError, YahooFallback, DEFAULT_FALLBACK_TICKERS};
pub use http_client::{
    CannedHttpClient, HttpAuth, HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse,
    ReqwestHttpClient,
};
pub use normalize::{normalize, normalize_batch, NormalizeError, NormalizedBatch};
pub use pipeline::{IngestionPipeline, PipelineError, PipelineReport};
pub use session::{BrowserSession, SessionBootstrapper, SessionHandle};
pub use sink::{PersistenceSink, SinkReport};
pub use strategy::{
    CsvDownloadStrategy, FailureKind, FetchOutcome, FetchStrategy, InternalApiStrategy,
    RenderedTableStrategy, StrategyError,
};

pub use niftyrag_warehouse::{Warehouse, WarehouseConfig, WarehouseError};
