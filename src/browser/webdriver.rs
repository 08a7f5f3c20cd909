//! WebDriver implementation of the browsing engine.
//!
//! Talks the W3C WebDriver wire protocol to a chromedriver-compatible server.
//! Network observation relies on Chrome's performance log, which reports
//! `Network.*` DevTools events for every request the page makes.

use super::{BrowserError, BrowsingEngine, ElementHandle, ObservedRequest, PageSession};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Key under which W3C WebDriver returns element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// How often a pending element lookup is retried.
const LOCATE_RETRY: Duration = Duration::from_millis(250);

/// Timeout for a single WebDriver HTTP command.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Launch options for the headless browser.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    /// Command-line switches passed to the browser
    pub args: Vec<String>,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            args: [
                "--headless",
                "--disable-gpu",
                "--no-sandbox",
                "--disable-dev-shm-usage",
                "--disable-extensions",
                "--blink-settings=imagesEnabled=false",
                "--window-size=400,300",
                "--log-level=3",
            ]
            .iter()
            .map(|arg| arg.to_string())
            .collect(),
        }
    }
}

impl BrowserOptions {
    /// Session capabilities requesting a headless Chrome with performance logging.
    pub fn capabilities(&self) -> Value {
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": self.args },
                    "goog:loggingPrefs": { "performance": "ALL" }
                }
            }
        })
    }
}

/// Browsing engine backed by a WebDriver server.
#[derive(Debug, Clone)]
pub struct WebDriverEngine {
    client: Client,
    base_url: String,
    options: BrowserOptions,
}

impl WebDriverEngine {
    /// Create an engine for the WebDriver server at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, BrowserError> {
        let client = Client::builder()
            .timeout(COMMAND_TIMEOUT)
            .no_proxy()
            .build()
            .map_err(|e| BrowserError::Startup(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            options: BrowserOptions::default(),
        })
    }

    /// Replace the browser launch options.
    pub fn with_options(mut self, options: BrowserOptions) -> Self {
        self.options = options;
        self
    }

    /// The WebDriver server address.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn new_session(&self) -> Result<WebDriverSession, BrowserError> {
        let value = send_command(
            &self.client,
            Method::POST,
            &format!("{}/session", self.base_url),
            Some(self.options.capabilities()),
        )
        .await
        .map_err(|e| match e {
            BrowserError::Timeout(msg) => BrowserError::Startup(format!("timed out: {}", msg)),
            BrowserError::Startup(msg) => BrowserError::Startup(msg),
            other => BrowserError::Startup(other.to_string()),
        })?;

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| BrowserError::Startup("response carried no sessionId".to_string()))?
            .to_string();

        debug!("Opened WebDriver session {}", session_id);
        Ok(WebDriverSession {
            client: self.client.clone(),
            session_url: format!("{}/session/{}", self.base_url, session_id),
            closed: false,
        })
    }
}

#[async_trait]
impl BrowsingEngine for WebDriverEngine {
    async fn load_and_observe_requests(
        &self,
        url: &str,
        window: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<ObservedRequest>, BrowserError> {
        let mut session = self.new_session().await?;

        let observed = async {
            session.navigate_unless_cancelled(url, cancel).await?;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(BrowserError::Cancelled),
                _ = sleep(window) => {}
            }
            let entries = session.performance_log().await?;
            Ok::<_, BrowserError>(parse_performance_log(&entries))
        }
        .await;

        // The session is released whether or not observation succeeded.
        if let Err(e) = session.close().await {
            warn!("Failed to close discovery session: {}", e);
        }

        observed
    }

    async fn open_page(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn PageSession>, BrowserError> {
        let mut session = self.new_session().await?;
        if let Err(e) = session.navigate_unless_cancelled(url, cancel).await {
            if let Err(close_err) = session.close().await {
                warn!("Failed to close session after navigation error: {}", close_err);
            }
            return Err(e);
        }
        Ok(Box::new(session))
    }
}

/// One WebDriver session.
#[derive(Debug)]
pub struct WebDriverSession {
    client: Client,
    session_url: String,
    closed: bool,
}

impl WebDriverSession {
    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, BrowserError> {
        if self.closed {
            return Err(BrowserError::Session("session already closed".to_string()));
        }
        send_command(&self.client, method, &format!("{}{}", self.session_url, path), body).await
    }

    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await
            .map(|_| ())
            .map_err(|e| match e {
                BrowserError::Timeout(msg) => BrowserError::Timeout(msg),
                other => BrowserError::Navigation(other.to_string()),
            })
    }

    async fn navigate_unless_cancelled(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<(), BrowserError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BrowserError::Cancelled),
            result = self.navigate(url) => result,
        }
    }

    async fn performance_log(&self) -> Result<Vec<Value>, BrowserError> {
        let value = self
            .command(Method::POST, "/se/log", Some(json!({ "type": "performance" })))
            .await?;
        match value {
            Value::Array(entries) => Ok(entries),
            other => Err(BrowserError::Protocol(format!(
                "unexpected performance log payload: {}",
                other
            ))),
        }
    }

    async fn find_element(&self, element_id: &str) -> Result<ElementHandle, BrowserError> {
        let value = self
            .command(
                Method::POST,
                "/element",
                Some(json!({ "using": "css selector", "value": id_selector(element_id) })),
            )
            .await?;
        element_reference(&value)
    }
}

#[async_trait]
impl PageSession for WebDriverSession {
    async fn locate(
        &mut self,
        element_id: &str,
        timeout: Duration,
    ) -> Result<ElementHandle, BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.find_element(element_id).await {
                Err(BrowserError::NoSuchElement(_)) if Instant::now() < deadline => {
                    sleep(LOCATE_RETRY).await;
                }
                Err(BrowserError::NoSuchElement(_)) => {
                    return Err(BrowserError::Timeout(format!(
                        "element #{} did not appear within {:?}",
                        element_id, timeout
                    )));
                }
                other => return other,
            }
        }
    }

    async fn read_text(&mut self, element: &ElementHandle) -> Result<String, BrowserError> {
        let value = self
            .command(Method::GET, &format!("/element/{}/text", element.0), None)
            .await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BrowserError::Protocol(format!("element text was not a string: {}", value)))
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        send_command(&self.client, Method::DELETE, &self.session_url, None)
            .await
            .map(|_| ())
    }
}

impl Drop for WebDriverSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        warn!("WebDriver session dropped without close: {}", self.session_url);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let client = self.client.clone();
            let url = self.session_url.clone();
            handle.spawn(async move {
                let _ = client.delete(url).send().await;
            });
        }
    }
}

/// Send one WebDriver command and unwrap the `value` member of the reply.
async fn send_command(
    client: &Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value, BrowserError> {
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }

    let response = request.send().await.map_err(map_transport_error)?;
    let status = response.status();
    let payload: Value = response.json().await.map_err(map_transport_error)?;
    let value = payload.get("value").cloned().unwrap_or(Value::Null);

    if status.is_success() {
        return Ok(value);
    }

    let error = value.get("error").and_then(Value::as_str).unwrap_or("unknown error");
    let message = value.get("message").and_then(Value::as_str).unwrap_or_default();
    Err(map_webdriver_error(error, message))
}

fn map_transport_error(e: reqwest::Error) -> BrowserError {
    if e.is_timeout() {
        BrowserError::Timeout(e.to_string())
    } else if e.is_connect() {
        BrowserError::Startup(format!("WebDriver server unreachable: {}", e))
    } else {
        BrowserError::Protocol(e.to_string())
    }
}

/// Map a W3C WebDriver error code onto [`BrowserError`].
pub(crate) fn map_webdriver_error(error: &str, message: &str) -> BrowserError {
    match error {
        "stale element reference" => BrowserError::StaleElement,
        "no such element" => BrowserError::NoSuchElement(message.to_string()),
        "timeout" | "script timeout" => BrowserError::Timeout(message.to_string()),
        "invalid session id" | "no such window" => BrowserError::Session(message.to_string()),
        "session not created" => BrowserError::Startup(message.to_string()),
        other => BrowserError::Protocol(format!("{}: {}", other, message)),
    }
}

/// CSS selector matching the element whose `id` attribute equals `element_id`.
fn id_selector(element_id: &str) -> String {
    let escaped = element_id.replace('\\', "\\\\").replace('"', "\\\"");
    format!("[id=\"{}\"]", escaped)
}

fn element_reference(value: &Value) -> Result<ElementHandle, BrowserError> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(|id| ElementHandle(id.to_string()))
        .ok_or_else(|| BrowserError::Protocol(format!("not an element reference: {}", value)))
}

/// Rebuild the page's request list from Chrome performance log entries.
///
/// Requests keep the order in which they were first seen. WebSocket requests
/// count as answered once their handshake response arrives.
pub fn parse_performance_log(entries: &[Value]) -> Vec<ObservedRequest> {
    let mut requests: Vec<ObservedRequest> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for entry in entries {
        let Some(raw) = entry.get("message").and_then(Value::as_str) else {
            continue;
        };
        let Ok(message) = serde_json::from_str::<Value>(raw) else {
            continue;
        };
        let event = &message["message"];
        let params = &event["params"];
        let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
            continue;
        };

        match event["method"].as_str().unwrap_or_default() {
            "Network.requestWillBeSent" | "Network.webSocketCreated" => {
                let url = params["request"]["url"]
                    .as_str()
                    .or_else(|| params["url"].as_str());
                if let Some(url) = url {
                    index.entry(request_id.to_string()).or_insert_with(|| {
                        requests.push(ObservedRequest::new(url, false));
                        requests.len() - 1
                    });
                }
            }
            "Network.responseReceived" | "Network.webSocketHandshakeResponseReceived" => {
                if let Some(&position) = index.get(request_id) {
                    requests[position].had_response = true;
                }
            }
            _ => {}
        }
    }

    requests
}

/// A chromedriver process owned by the overlay.
#[derive(Debug)]
pub struct DriverProcess {
    child: Child,
    port: u16,
}

impl DriverProcess {
    /// Spawn the driver at `path` on `port` and wait until it reports ready.
    pub async fn spawn(path: &Path, port: u16, ready_timeout: Duration) -> Result<Self, BrowserError> {
        let child = Command::new(path)
            .arg(format!("--port={}", port))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BrowserError::Startup(format!("failed to launch {}: {}", path.display(), e))
            })?;

        let mut process = Self { child, port };
        if let Err(e) = process.wait_until_ready(ready_timeout).await {
            if let Err(kill_err) = process.shutdown().await {
                warn!("Failed to stop driver after startup error: {}", kill_err);
            }
            return Err(e);
        }

        info!("Driver process listening on port {}", port);
        Ok(process)
    }

    /// Address of the driver's WebDriver endpoint.
    pub fn base_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    async fn wait_until_ready(&self, timeout: Duration) -> Result<(), BrowserError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .map_err(|e| BrowserError::Startup(e.to_string()))?;
        let status_url = format!("{}/status", self.base_url());
        let deadline = Instant::now() + timeout;

        while Instant::now() < deadline {
            if let Ok(value) = send_command(&client, Method::GET, &status_url, None).await {
                if value.get("ready").and_then(Value::as_bool).unwrap_or(false) {
                    return Ok(());
                }
            }
            sleep(LOCATE_RETRY).await;
        }

        Err(BrowserError::Startup(format!(
            "driver not ready within {:?}",
            timeout
        )))
    }

    /// Kill the driver process.
    pub async fn shutdown(&mut self) -> Result<(), BrowserError> {
        match self.child.try_wait() {
            Ok(Some(_)) => Ok(()),
            _ => self
                .child
                .kill()
                .await
                .map_err(|e| BrowserError::Protocol(format!("failed to kill driver: {}", e))),
        }
    }
}
