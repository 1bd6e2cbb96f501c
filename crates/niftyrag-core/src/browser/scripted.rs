use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use super::{Browser, BrowserCookie, BrowserError, BrowserFuture, BrowserLauncher, LaunchOptions};

/// Offline [`Browser`] that replays canned pages and script results.
///
/// Script responses are matched by substring against the script text and
/// its JSON-encoded arguments, first registration first. A script that
/// contains `.click()` drops the configured download into its directory.
#[derive(Default)]
pub struct ScriptedBrowser {
    pages: HashMap<String, String>,
    failing_urls: HashSet<String>,
    elements: HashSet<String>,
    scripts: Vec<(String, Result<Value, String>)>,
    cookies: Vec<BrowserCookie>,
    user_agent: String,
    download: Option<(PathBuf, String, String)>,
    current_url: Mutex<Option<String>>,
    navigations: Mutex<Vec<String>>,
    quits: AtomicUsize,
}

impl ScriptedBrowser {
    pub fn new() -> Self {
        Self {
            user_agent: super::DEFAULT_USER_AGENT.to_string(),
            ..Self::default()
        }
    }

    pub fn with_page(mut self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.pages.insert(url.into(), html.into());
        self
    }

    pub fn with_failing_url(mut self, url: impl Into<String>) -> Self {
        self.failing_urls.insert(url.into());
        self
    }

    pub fn with_element(mut self, css: impl Into<String>) -> Self {
        self.elements.insert(css.into());
        self
    }

    pub fn with_script_result(mut self, needle: impl Into<String>, value: Value) -> Self {
        self.scripts.push((needle.into(), Ok(value)));
        self
    }

    pub fn with_script_error(
        mut self,
        needle: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        self.scripts.push((needle.into(), Err(message.into())));
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push(BrowserCookie {
            name: name.into(),
            value: value.into(),
            domain: None,
        });
        self
    }

    /// File written into `dir` the first time a click script runs.
    pub fn with_download(
        mut self,
        dir: impl Into<PathBuf>,
        file_name: impl Into<String>,
        contents: impl Into<String>,
    ) -> Self {
        self.download = Some((dir.into(), file_name.into(), contents.into()));
        self
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations
            .lock()
            .expect("scripted navigations mutex poisoned")
            .clone()
    }

    pub fn quit_count(&self) -> usize {
        self.quits.load(Ordering::SeqCst)
    }

    fn scripted(&self, script: &str, args: &[Value]) -> Result<Value, BrowserError> {
        let encoded_args = Value::Array(args.to_vec()).to_string();
        if script.contains(".click()") {
            if let Some((dir, name, contents)) = &self.download {
                std::fs::write(dir.join(name), contents)
                    .map_err(|e| BrowserError::Script(format!("download failed: {e}")))?;
            }
        }

        let hit = self
            .scripts
            .iter()
            .find(|(needle, _)| {
                script.contains(needle.as_str()) || encoded_args.contains(needle.as_str())
            });
        match hit {
            Some((_, Ok(value))) => Ok(value.clone()),
            Some((_, Err(message))) => Err(BrowserError::Script(message.clone())),
            None if script.contains(".click()") => Ok(Value::Null),
            None => Err(BrowserError::Script(String::from("no scripted response"))),
        }
    }
}

impl Browser for ScriptedBrowser {
    fn navigate<'a>(&'a self, url: &'a str) -> BrowserFuture<'a, ()> {
        Box::pin(async move {
            self.navigations
                .lock()
                .expect("scripted navigations mutex poisoned")
                .push(url.to_string());
            if self.failing_urls.contains(url) {
                return Err(BrowserError::Navigation {
                    url: url.to_string(),
                    message: String::from("net::ERR_HTTP2_PROTOCOL_ERROR"),
                });
            }
            *self
                .current_url
                .lock()
                .expect("scripted url mutex poisoned") = Some(url.to_string());
            Ok(())
        })
    }

    fn wait_for_element<'a>(&'a self, css: &'a str, timeout: Duration) -> BrowserFuture<'a, ()> {
        Box::pin(async move {
            if self.elements.contains(css) {
                Ok(())
            } else {
                Err(BrowserError::Timeout {
                    what: format!("element '{css}'"),
                    waited_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        })
    }

    fn page_source(&self) -> BrowserFuture<'_, String> {
        Box::pin(async move {
            let current = self
                .current_url
                .lock()
                .expect("scripted url mutex poisoned")
                .clone();
            Ok(current
                .and_then(|url| self.pages.get(&url).cloned())
                .unwrap_or_default())
        })
    }

    fn execute_script<'a>(&'a self, script: &'a str, args: Vec<Value>) -> BrowserFuture<'a, Value> {
        Box::pin(async move { self.scripted(script, &args) })
    }

    fn execute_async_script<'a>(
        &'a self,
        script: &'a str,
        args: Vec<Value>,
    ) -> BrowserFuture<'a, Value> {
        Box::pin(async move { self.scripted(script, &args) })
    }

    fn cookies(&self) -> BrowserFuture<'_, Vec<BrowserCookie>> {
        Box::pin(async move { Ok(self.cookies.clone()) })
    }

    fn user_agent(&self) -> BrowserFuture<'_, String> {
        Box::pin(async move { Ok(self.user_agent.clone()) })
    }

    fn quit(&self) -> BrowserFuture<'_, ()> {
        Box::pin(async move {
            self.quits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// Hands out one shared [`ScriptedBrowser`], or fails every launch.
pub struct ScriptedLauncher {
    browser: Arc<ScriptedBrowser>,
    launch_error: Option<String>,
    launches: AtomicUsize,
}

impl ScriptedLauncher {
    pub fn new(browser: Arc<ScriptedBrowser>) -> Self {
        Self {
            browser,
            launch_error: None,
            launches: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            browser: Arc::new(ScriptedBrowser::new()),
            launch_error: Some(message.into()),
            launches: AtomicUsize::new(0),
        }
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

impl BrowserLauncher for ScriptedLauncher {
    fn launch<'a>(&'a self, options: &'a LaunchOptions) -> BrowserFuture<'a, Arc<dyn Browser>> {
        Box::pin(async move {
            let _ = options;
            self.launches.fetch_add(1, Ordering::SeqCst);
            if let Some(message) = &self.launch_error {
                return Err(BrowserError::Launch(message.clone()));
            }
            let browser: Arc<dyn Browser> = self.browser.clone();
            Ok(browser)
        })
    }
}
