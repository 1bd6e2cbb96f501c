//! Runtime configuration.
//!
//! Read from an optional TOML file (`--config`, else `<home>/niftyrag.toml`);
//! every field has a default. Environment variables override the file:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `NIFTYRAG_HOME` | `home` |
//! | `NIFTYRAG_WEBDRIVER_URL` | `browser.webdriver_url` |
//! | `NIFTYRAG_LLM_API_KEY`, `GROQ_API_KEY` | `agent.api_key` |

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use niftyrag_warehouse::WarehouseConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{Date, OffsetDateTime, UtcOffset};

use crate::browser::{LaunchOptions, DEFAULT_USER_AGENT};
use crate::fallback::DEFAULT_FALLBACK_TICKERS;

pub const CONFIG_FILE_NAME: &str = "niftyrag.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("unknown strategy '{0}' (expected rendered_table, internal_api or csv_download)")]
    UnknownStrategy(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    RenderedTable,
    InternalApi,
    CsvDownload,
}

impl StrategyKind {
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name.trim() {
            "rendered_table" => Ok(Self::RenderedTable),
            "internal_api" => Ok(Self::InternalApi),
            "csv_download" => Ok(Self::CsvDownload),
            other => Err(ConfigError::UnknownStrategy(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NiftyConfig {
    /// State directory; defaults to the warehouse home resolution.
    pub home: Option<PathBuf>,
    pub browser: BrowserSettings,
    pub source: SourceSettings,
    pub fallback: FallbackSettings,
    pub market: MarketSettings,
    pub agent: AgentSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub webdriver_url: String,
    pub headless: bool,
    pub user_agent: String,
    /// Wait after the landing page loads, for challenge scripts and cookies.
    pub settle_secs: u64,
    pub page_load_timeout_secs: u64,
    pub script_timeout_secs: u64,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            webdriver_url: String::from("http://127.0.0.1:9515"),
            headless: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            settle_secs: 5,
            page_load_timeout_secs: 30,
            script_timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub landing_url: String,
    pub market_page_url: String,
    pub api_base_url: String,
    pub index: String,
    pub option_symbol: String,
    /// Option-chain strikes kept around the midpoint; 0 disables the call.
    pub strike_window: usize,
    /// Tried in order until one yields records.
    pub strategies: Vec<StrategyKind>,
    /// Replay API calls over HTTP with the session cookies instead of
    /// running them inside the browser.
    pub replay_api_over_http: bool,
    pub table_timeout_secs: u64,
    pub download_settle_secs: u64,
    pub download_timeout_secs: u64,
    pub announcement_file: String,
    pub announcement_label: String,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            landing_url: String::from("https://www.nseindia.com"),
            market_page_url: String::from(
                "https://www.nseindia.com/market-data/live-equity-market?symbol=NIFTY%2050",
            ),
            api_base_url: String::from("https://www.nseindia.com"),
            index: String::from("NIFTY 50"),
            option_symbol: String::from("NIFTY"),
            strike_window: 5,
            strategies: vec![
                StrategyKind::RenderedTable,
                StrategyKind::InternalApi,
                StrategyKind::CsvDownload,
            ],
            replay_api_over_http: false,
            table_timeout_secs: 10,
            download_settle_secs: 10,
            download_timeout_secs: 30,
            announcement_file: String::from("reliance_announcement.txt"),
            announcement_label: String::from("RELIANCE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackSettings {
    pub enabled: bool,
    pub tickers: Vec<String>,
    pub base_url: String,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            tickers: DEFAULT_FALLBACK_TICKERS.iter().map(ToString::to_string).collect(),
            base_url: String::from("https://query1.finance.yahoo.com"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketSettings {
    /// Exchange offset from UTC; the run date is the exchange-local date.
    pub utc_offset_minutes: i32,
}

impl Default for MarketSettings {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 330,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_steps: usize,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            base_url: String::from("https://api.groq.com/openai/v1"),
            model: String::from("llama-3.3-70b-versatile"),
            temperature: 0.0,
            max_steps: 4,
            api_key: None,
        }
    }
}

impl Default for NiftyConfig {
    fn default() -> Self {
        Self {
            home: None,
            browser: BrowserSettings::default(),
            source: SourceSettings::default(),
            fallback: FallbackSettings::default(),
            market: MarketSettings::default(),
            agent: AgentSettings::default(),
        }
    }
}

impl NiftyConfig {
    /// Load `explicit`, else `<home>/niftyrag.toml` when present, then apply
    /// environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = niftyrag_warehouse::resolve_home().join(CONFIG_FILE_NAME);
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }

    fn apply_env_overrides(&mut self) {
        if let Some(home) = env::var_os("NIFTYRAG_HOME").filter(|value| !value.is_empty()) {
            self.home = Some(PathBuf::from(home));
        }
        if let Ok(url) = env::var("NIFTYRAG_WEBDRIVER_URL") {
            if !url.trim().is_empty() {
                self.browser.webdriver_url = url;
            }
        }
        if let Ok(key) = env::var("NIFTYRAG_LLM_API_KEY").or_else(|_| env::var("GROQ_API_KEY")) {
            if !key.trim().is_empty() {
                self.agent.api_key = Some(key);
            }
        }
    }

    pub fn home(&self) -> PathBuf {
        self.home
            .clone()
            .unwrap_or_else(niftyrag_warehouse::resolve_home)
    }

    /// Scratch directory for downloads and the announcement artifact.
    pub fn data_dir(&self) -> PathBuf {
        self.home().join("data")
    }

    pub fn warehouse_config(&self) -> WarehouseConfig {
        WarehouseConfig::for_home(self.home())
    }

    pub fn launch_options(&self) -> LaunchOptions {
        let mut options = LaunchOptions::new(self.data_dir());
        options.headless = self.browser.headless;
        options.user_agent = self.browser.user_agent.clone();
        options.page_load_timeout = Duration::from_secs(self.browser.page_load_timeout_secs);
        options.script_timeout = Duration::from_secs(self.browser.script_timeout_secs);
        options
    }

    /// Exchange-local calendar date of `now`.
    pub fn market_date(&self, now: OffsetDateTime) -> Date {
        now.to_offset(self.market_offset()).date()
    }

    /// Exchange offset from UTC; out-of-range values fall back to UTC.
    pub fn market_offset(&self) -> UtcOffset {
        self.market
            .utc_offset_minutes
            .checked_mul(60)
            .and_then(|seconds| UtcOffset::from_whole_seconds(seconds).ok())
            .unwrap_or(UtcOffset::UTC)
    }
}
