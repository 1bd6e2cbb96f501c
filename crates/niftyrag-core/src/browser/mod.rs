//! Browser automation seam.
//!
//! The pipeline drives a real browser through the [`Browser`] trait. The
//! production implementation speaks the W3C WebDriver protocol to a driver
//! process such as chromedriver ([`WebDriverLauncher`]); tests use
//! [`ScriptedBrowser`].

mod scripted;
mod webdriver;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use scripted::{ScriptedBrowser, ScriptedLauncher};
pub use webdriver::{WebDriverBrowser, WebDriverLauncher};

/// Desktop Chrome user agent presented to the source site.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub type BrowserFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BrowserError>> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrowserError {
    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("no element matches '{selector}'")]
    ElementNotFound { selector: String },

    #[error("timed out after {waited_ms}ms waiting for {what}")]
    Timeout { what: String, waited_ms: u64 },

    #[error("script failed: {0}")]
    Script(String),

    #[error("webdriver protocol error: {0}")]
    Protocol(String),

    #[error("browser session already closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
}

/// Options applied when launching a browser.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchOptions {
    pub headless: bool,
    pub user_agent: String,
    pub download_dir: PathBuf,
    pub page_load_timeout: Duration,
    pub script_timeout: Duration,
    pub extra_args: Vec<String>,
}

impl LaunchOptions {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            headless: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            download_dir: download_dir.into(),
            page_load_timeout: Duration::from_secs(30),
            script_timeout: Duration::from_secs(20),
            extra_args: Vec::new(),
        }
    }

    /// Command-line switches passed to Chrome.
    pub fn chrome_args(&self) -> Vec<String> {
        let mut args = vec![
            String::from("--disable-http2"),
            String::from("--ignore-certificate-errors"),
            String::from("--disable-blink-features=AutomationControlled"),
            String::from("--no-sandbox"),
            String::from("--disable-dev-shm-usage"),
            format!("--user-agent={}", self.user_agent),
        ];
        if self.headless {
            args.push(String::from("--headless=new"));
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Chrome profile preferences that route downloads without a prompt.
    pub fn chrome_prefs(&self) -> Value {
        serde_json::json!({
            "download.default_directory": self.download_dir.display().to_string(),
            "download.prompt_for_download": false,
            "download.directory_upgrade": true,
            "safebrowsing.enabled": true,
        })
    }
}

/// A live browser window.
pub trait Browser: Send + Sync {
    fn navigate<'a>(&'a self, url: &'a str) -> BrowserFuture<'a, ()>;

    /// Poll until an element matching `css` exists or `timeout` elapses.
    fn wait_for_element<'a>(&'a self, css: &'a str, timeout: Duration) -> BrowserFuture<'a, ()>;

    fn page_source(&self) -> BrowserFuture<'_, String>;

    fn execute_script<'a>(&'a self, script: &'a str, args: Vec<Value>) -> BrowserFuture<'a, Value>;

    /// Run `script` with a completion callback appended to `arguments`.
    fn execute_async_script<'a>(
        &'a self,
        script: &'a str,
        args: Vec<Value>,
    ) -> BrowserFuture<'a, Value>;

    fn cookies(&self) -> BrowserFuture<'_, Vec<BrowserCookie>>;

    fn user_agent(&self) -> BrowserFuture<'_, String>;

    fn quit(&self) -> BrowserFuture<'_, ()>;
}

pub trait BrowserLauncher: Send + Sync {
    fn launch<'a>(&'a self, options: &'a LaunchOptions) -> BrowserFuture<'a, Arc<dyn Browser>>;
}
