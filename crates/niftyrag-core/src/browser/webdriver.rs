use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use super::{Browser, BrowserCookie, BrowserError, BrowserFuture, BrowserLauncher, LaunchOptions};
use crate::http_client::{HttpClient, HttpMethod, HttpRequest};

/// W3C key under which element references are returned.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const ELEMENT_POLL: Duration = Duration::from_millis(250);

/// Starts Chrome sessions through a WebDriver endpoint (e.g. chromedriver on
/// `http://127.0.0.1:9515`).
pub struct WebDriverLauncher {
    endpoint: String,
    http: Arc<dyn HttpClient>,
}

impl WebDriverLauncher {
    pub fn new(endpoint: impl Into<String>, http: Arc<dyn HttpClient>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    fn capabilities(options: &LaunchOptions) -> Value {
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "acceptInsecureCerts": true,
                    "pageLoadStrategy": "normal",
                    "timeouts": {
                        "pageLoad": duration_ms(options.page_load_timeout),
                        "script": duration_ms(options.script_timeout),
                    },
                    "goog:chromeOptions": {
                        "args": options.chrome_args(),
                        "prefs": options.chrome_prefs(),
                        "excludeSwitches": ["enable-automation"],
                    }
                }
            }
        })
    }
}

impl BrowserLauncher for WebDriverLauncher {
    fn launch<'a>(&'a self, options: &'a LaunchOptions) -> BrowserFuture<'a, Arc<dyn Browser>> {
        Box::pin(async move {
            let request = HttpRequest::post(format!("{}/session", self.endpoint))
                .with_json(&Self::capabilities(options))
                .with_timeout_ms(60_000);
            let response = self
                .http
                .execute(request)
                .await
                .map_err(|e| BrowserError::Launch(e.message().to_string()))?;
            let body = decode_body(&response.body).map_err(BrowserError::Launch)?;
            if !response.is_success() {
                return Err(BrowserError::Launch(WireFailure::from_body(&body).to_string()));
            }

            let session_id = body["value"]["sessionId"]
                .as_str()
                .ok_or_else(|| BrowserError::Launch(String::from("response carried no sessionId")))?
                .to_string();
            tracing::debug!(%session_id, endpoint = %self.endpoint, "webdriver session started");

            let browser: Arc<dyn Browser> = Arc::new(WebDriverBrowser {
                endpoint: self.endpoint.clone(),
                session_id,
                http: Arc::clone(&self.http),
                page_load_timeout: options.page_load_timeout,
                script_timeout: options.script_timeout,
                closed: AtomicBool::new(false),
            });
            Ok(browser)
        })
    }
}

/// One WebDriver session.
pub struct WebDriverBrowser {
    endpoint: String,
    session_id: String,
    http: Arc<dyn HttpClient>,
    page_load_timeout: Duration,
    script_timeout: Duration,
    closed: AtomicBool,
}

impl WebDriverBrowser {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn command(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, CommandError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CommandError::Browser(BrowserError::Closed));
        }

        let url = format!("{}/session/{}{}", self.endpoint, self.session_id, path);
        let mut request = HttpRequest::new(method, url)
            // Client-side timeout sits above the driver's own so its error wins.
            .with_timeout_ms(duration_ms(timeout) + 5_000);
        if let Some(body) = body {
            request = request.with_json(&body);
        }

        let response = self
            .http
            .execute(request)
            .await
            .map_err(|e| CommandError::Browser(BrowserError::Protocol(e.message().to_string())))?;
        let body = decode_body(&response.body)
            .map_err(|message| CommandError::Browser(BrowserError::Protocol(message)))?;

        if response.is_success() {
            Ok(body.get("value").cloned().unwrap_or(Value::Null))
        } else {
            Err(CommandError::Wire(WireFailure::from_body(&body)))
        }
    }

    async fn find_element(&self, css: &str) -> Result<(), BrowserError> {
        let result = self
            .command(
                HttpMethod::Post,
                "/element",
                Some(json!({ "using": "css selector", "value": css })),
                Duration::from_secs(10),
            )
            .await;

        match result {
            Ok(value) if value.get(ELEMENT_KEY).is_some() => Ok(()),
            Ok(_) => Err(BrowserError::Protocol(String::from(
                "element response carried no element reference",
            ))),
            Err(CommandError::Wire(failure)) if failure.error == "no such element" => {
                Err(BrowserError::ElementNotFound {
                    selector: css.to_string(),
                })
            }
            Err(error) => Err(error.into_browser_error()),
        }
    }

    async fn run_script(
        &self,
        path: &str,
        script: &str,
        args: Vec<Value>,
    ) -> Result<Value, BrowserError> {
        self.command(
            HttpMethod::Post,
            path,
            Some(json!({ "script": script, "args": args })),
            self.script_timeout,
        )
        .await
        .map_err(CommandError::into_browser_error)
    }
}

impl Browser for WebDriverBrowser {
    fn navigate<'a>(&'a self, url: &'a str) -> BrowserFuture<'a, ()> {
        Box::pin(async move {
            self.command(
                HttpMethod::Post,
                "/url",
                Some(json!({ "url": url })),
                self.page_load_timeout,
            )
            .await
            .map(|_| ())
            .map_err(|error| BrowserError::Navigation {
                url: url.to_string(),
                message: error.into_browser_error().to_string(),
            })
        })
    }

    fn wait_for_element<'a>(&'a self, css: &'a str, timeout: Duration) -> BrowserFuture<'a, ()> {
        Box::pin(async move {
            let started = Instant::now();
            loop {
                match self.find_element(css).await {
                    Ok(()) => return Ok(()),
                    Err(BrowserError::ElementNotFound { .. }) if started.elapsed() < timeout => {
                        tokio::time::sleep(ELEMENT_POLL).await;
                    }
                    Err(BrowserError::ElementNotFound { .. }) => {
                        return Err(BrowserError::Timeout {
                            what: format!("element '{css}'"),
                            waited_ms: duration_ms(timeout),
                        });
                    }
                    Err(error) => return Err(error),
                }
            }
        })
    }

    fn page_source(&self) -> BrowserFuture<'_, String> {
        Box::pin(async move {
            let value = self
                .command(HttpMethod::Get, "/source", None, Duration::from_secs(10))
                .await
                .map_err(CommandError::into_browser_error)?;
            value
                .as_str()
                .map(ToString::to_string)
                .ok_or_else(|| BrowserError::Protocol(String::from("page source was not a string")))
        })
    }

    fn execute_script<'a>(&'a self, script: &'a str, args: Vec<Value>) -> BrowserFuture<'a, Value> {
        Box::pin(async move { self.run_script("/execute/sync", script, args).await })
    }

    fn execute_async_script<'a>(
        &'a self,
        script: &'a str,
        args: Vec<Value>,
    ) -> BrowserFuture<'a, Value> {
        Box::pin(async move { self.run_script("/execute/async", script, args).await })
    }

    fn cookies(&self) -> BrowserFuture<'_, Vec<BrowserCookie>> {
        Box::pin(async move {
            let value = self
                .command(HttpMethod::Get, "/cookie", None, Duration::from_secs(10))
                .await
                .map_err(CommandError::into_browser_error)?;
            serde_json::from_value(value)
                .map_err(|e| BrowserError::Protocol(format!("malformed cookie list: {e}")))
        })
    }

    fn user_agent(&self) -> BrowserFuture<'_, String> {
        Box::pin(async move {
            let value = self
                .run_script("/execute/sync", "return navigator.userAgent;", Vec::new())
                .await?;
            Ok(value.as_str().unwrap_or_default().to_string())
        })
    }

    fn quit(&self) -> BrowserFuture<'_, ()> {
        Box::pin(async move {
            if self.closed.load(Ordering::SeqCst) {
                return Ok(());
            }
            let result = self
                .command(HttpMethod::Delete, "", None, Duration::from_secs(10))
                .await;
            self.closed.store(true, Ordering::SeqCst);
            tracing::debug!(session_id = %self.session_id, "webdriver session closed");
            result.map(|_| ()).map_err(CommandError::into_browser_error)
        })
    }
}

/// `{"value": {"error": ..., "message": ...}}` payload of a failed command.
#[derive(Debug)]
struct WireFailure {
    error: String,
    message: String,
}

impl WireFailure {
    fn from_body(body: &Value) -> Self {
        let value = &body["value"];
        Self {
            error: value["error"].as_str().unwrap_or("unknown error").to_string(),
            message: value["message"].as_str().unwrap_or_default().to_string(),
        }
    }
}

impl std::fmt::Display for WireFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            f.write_str(&self.error)
        } else {
            write!(f, "{}: {}", self.error, self.message)
        }
    }
}

#[derive(Debug)]
enum CommandError {
    Browser(BrowserError),
    Wire(WireFailure),
}

impl CommandError {
    fn into_browser_error(self) -> BrowserError {
        match self {
            Self::Browser(error) => error,
            Self::Wire(failure) => match failure.error.as_str() {
                "javascript error" => BrowserError::Script(failure.message),
                "timeout" | "script timeout" => BrowserError::Timeout {
                    what: failure.message,
                    waited_ms: 0,
                },
                "invalid session id" => BrowserError::Closed,
                _ => BrowserError::Protocol(failure.to_string()),
            },
        }
    }
}

fn decode_body(body: &str) -> Result<Value, String> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|e| format!("malformed webdriver response: {e}"))
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::{CannedHttpClient, HttpResponse};

    const DRIVER: &str = "http://127.0.0.1:9515";

    async fn launch(http: Arc<CannedHttpClient>) -> Arc<dyn Browser> {
        let launcher = WebDriverLauncher::new(format!("{DRIVER}/"), http);
        launcher
            .launch(&LaunchOptions::new("/tmp/downloads"))
            .await
            .expect("launch")
    }

    fn session_route() -> (String, HttpResponse) {
        (
            format!("{DRIVER}/session"),
            HttpResponse::ok_json(r#"{"value":{"sessionId":"abc123","capabilities":{}}}"#),
        )
    }

    #[tokio::test]
    async fn launch_posts_chrome_options() {
        let (prefix, response) = session_route();
        let http = Arc::new(CannedHttpClient::new().with_route(prefix, response));
        let _browser = launch(Arc::clone(&http)).await;

        let requests = http.requests();
        assert_eq!(requests[0].url, "http://127.0.0.1:9515/session");
        let body: Value =
            serde_json::from_str(requests[0].body.as_deref().unwrap_or("{}")).expect("json body");
        let args = &body["capabilities"]["alwaysMatch"]["goog:chromeOptions"]["args"];
        assert!(args
            .as_array()
            .expect("args array")
            .contains(&Value::from("--disable-http2")));
    }

    #[tokio::test]
    async fn missing_element_times_out() {
        let (prefix, response) = session_route();
        let http = Arc::new(
            CannedHttpClient::new()
                .with_route(prefix, response)
                .with_route(
                    format!("{DRIVER}/session/abc123/element"),
                    HttpResponse::with_status(
                        404,
                        r#"{"value":{"error":"no such element","message":"none"}}"#,
                    ),
                ),
        );
        let browser = launch(http).await;

        let error = browser
            .wait_for_element("#dnldEquityStock", Duration::ZERO)
            .await
            .expect_err("should time out");
        assert!(matches!(error, BrowserError::Timeout { .. }));
    }

    #[tokio::test]
    async fn commands_after_quit_report_closed() {
        let (prefix, response) = session_route();
        let http = Arc::new(
            CannedHttpClient::new()
                .with_route(prefix, response)
                .with_route(
                    format!("{DRIVER}/session/abc123"),
                    HttpResponse::ok_json(r#"{"value":null}"#),
                ),
        );
        let browser = launch(http).await;

        browser.quit().await.expect("quit");
        browser.quit().await.expect("second quit is a no-op");
        let error = browser.page_source().await.expect_err("closed");
        assert_eq!(error, BrowserError::Closed);
    }
}
