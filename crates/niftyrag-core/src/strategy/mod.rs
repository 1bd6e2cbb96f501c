//! Primary acquisition strategies.
//!
//! Each strategy turns a bootstrapped [`BrowserSession`] into raw records.
//! The orchestrator tries them in order and moves on when one errors or
//! comes back empty.

mod csv_download;
mod internal_api;
mod rendered_table;

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use time::Date;

pub use csv_download::CsvDownloadStrategy;
pub use internal_api::InternalApiStrategy;
pub use rendered_table::RenderedTableStrategy;

use crate::browser::BrowserError;
use crate::domain::{DocumentChunk, RawRecord};
use crate::session::BrowserSession;

/// Records and context chunks acquired by one strategy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOutcome {
    pub records: Vec<RawRecord>,
    /// Supplementary text for the semantic store only (e.g. option chains).
    pub chunks: Vec<DocumentChunk>,
}

impl FetchOutcome {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub type StrategyFuture<'a> =
    Pin<Box<dyn Future<Output = Result<FetchOutcome, StrategyError>> + Send + 'a>>;

pub trait FetchStrategy: Send + Sync {
    /// Stable name recorded in run logs.
    fn name(&self) -> &'static str;

    fn fetch<'a>(&'a self, session: &'a BrowserSession, as_of: Date) -> StrategyFuture<'a>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Navigation, element lookup, script or transport failure.
    Session,
    /// The source answered with something that could not be read.
    Parse,
    Io,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyError {
    kind: FailureKind,
    message: String,
}

impl StrategyError {
    pub fn session(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Session,
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Parse,
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Io,
            message: message.into(),
        }
    }

    pub const fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            FailureKind::Session => "strategy.session",
            FailureKind::Parse => "strategy.parse",
            FailureKind::Io => "strategy.io",
        }
    }
}

impl Display for StrategyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for StrategyError {}

impl From<BrowserError> for StrategyError {
    fn from(error: BrowserError) -> Self {
        Self::session(error.to_string())
    }
}

impl From<std::io::Error> for StrategyError {
    fn from(error: std::io::Error) -> Self {
        Self::io(error.to_string())
    }
}

/// Collapse runs of whitespace and trim.
pub(crate) fn clean_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}
