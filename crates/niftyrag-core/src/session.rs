//! Session bootstrapping against the bot-protected source site.
//!
//! The landing page issues anti-automation cookies only after its
//! challenge scripts have run, so the bootstrapper waits a fixed settle
//! period before snapshotting the cookie jar.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::browser::{Browser, BrowserCookie, BrowserError, BrowserLauncher, LaunchOptions};
use crate::http_client::HttpAuth;

/// Cookie jar snapshot and user agent, enough to replay HTTP calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionHandle {
    pub cookies: Vec<BrowserCookie>,
    pub user_agent: String,
}

impl SessionHandle {
    /// `name=value` pairs joined for a `Cookie` header.
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn auth(&self) -> HttpAuth {
        if self.cookies.is_empty() {
            HttpAuth::None
        } else {
            HttpAuth::Cookie(self.cookie_header())
        }
    }
}

/// A live browser plus the session it established.
///
/// Dropping a session that was never [`close`](Self::close)d schedules a
/// best-effort quit on the current Tokio runtime.
pub struct BrowserSession {
    browser: Arc<dyn Browser>,
    handle: SessionHandle,
    closed: bool,
}

impl BrowserSession {
    pub fn new(browser: Arc<dyn Browser>, handle: SessionHandle) -> Self {
        Self {
            browser,
            handle,
            closed: false,
        }
    }

    pub fn browser(&self) -> &dyn Browser {
        self.browser.as_ref()
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Quit the browser. Failures are logged; the session is gone either way.
    pub async fn close(mut self) {
        self.closed = true;
        if let Err(error) = self.browser.quit().await {
            tracing::warn!(%error, "browser did not shut down cleanly");
        }
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("browser session dropped outside a runtime; browser left running");
            return;
        };
        let browser = Arc::clone(&self.browser);
        runtime.spawn(async move {
            if let Err(error) = browser.quit().await {
                tracing::warn!(%error, "quit of abandoned browser session failed");
            }
        });
        tracing::debug!("browser session dropped without close; quit scheduled");
    }
}

pub struct SessionBootstrapper {
    launcher: Arc<dyn BrowserLauncher>,
    options: LaunchOptions,
    landing_url: String,
    settle: Duration,
}

impl SessionBootstrapper {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        options: LaunchOptions,
        landing_url: impl Into<String>,
        settle: Duration,
    ) -> Self {
        Self {
            launcher,
            options,
            landing_url: landing_url.into(),
            settle,
        }
    }

    pub fn landing_url(&self) -> &str {
        &self.landing_url
    }

    /// Launch a browser, load the landing page, and capture its cookies.
    ///
    /// The browser is quit before returning an error.
    pub async fn bootstrap(&self) -> Result<BrowserSession, BrowserError> {
        let browser = self.launcher.launch(&self.options).await?;

        match self.prime(browser.as_ref()).await {
            Ok(handle) => {
                tracing::info!(
                    url = %self.landing_url,
                    cookies = handle.cookies.len(),
                    "browser session bootstrapped"
                );
                Ok(BrowserSession::new(browser, handle))
            }
            Err(error) => {
                if let Err(quit_error) = browser.quit().await {
                    tracing::debug!(%quit_error, "quit after failed bootstrap also failed");
                }
                Err(error)
            }
        }
    }

    async fn prime(&self, browser: &dyn Browser) -> Result<SessionHandle, BrowserError> {
        browser.navigate(&self.landing_url).await?;
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }

        let cookies = browser.cookies().await?;
        let user_agent = match browser.user_agent().await {
            Ok(agent) if !agent.is_empty() => agent,
            _ => self.options.user_agent.clone(),
        };
        Ok(SessionHandle {
            cookies,
            user_agent,
        })
    }
}
