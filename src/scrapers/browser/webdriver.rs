//! W3C WebDriver sessions over plain HTTP.
//!
//! [`RemoteWebDriverEngine`] talks to an already-running endpoint (hosted
//! browser grid, serverless deployments). [`LocalChromeEngine`] spawns a
//! `chromedriver` child per session and kills it on close.

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use std::{process::Stdio, time::Duration};
use tokio::{
    process::{Child, Command},
    time::{sleep, Instant},
};
use tracing::{debug, warn};

use super::{BrowserAutomationEngine, BrowserSession};
use crate::error::TierError;

/// Key of element references in WebDriver responses.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

const DRIVER_STARTUP_WAIT: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct WebDriverClient {
    http: Client,
    base_url: String,
    request_timeout: Duration,
}

impl WebDriverClient {
    fn new(http: Client, base_url: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout,
        }
    }

    /// Sends one command and unwraps the `value` envelope.
    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, TierError> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.http.request(method, &url).timeout(self.request_timeout);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let response = req
            .send()
            .await
            .map_err(|e| TierError::Browser(format!("webdriver {path}: {e}")))?;
        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| TierError::Browser(format!("webdriver {path} response: {e}")))?;
        let value = payload.get("value").cloned().unwrap_or(Value::Null);

        if !status.is_success() {
            let error = value.get("error").and_then(Value::as_str).unwrap_or("unknown error");
            let message = value.get("message").and_then(Value::as_str).unwrap_or("");
            return Err(TierError::Browser(format!(
                "webdriver {path} returned {status}: {error} {message}"
            )));
        }
        Ok(value)
    }

    async fn ready(&self) -> bool {
        match self.command(Method::GET, "/status", None).await {
            Ok(v) => v.get("ready").and_then(Value::as_bool).unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn new_session(&self, page_load: Duration) -> Result<String, TierError> {
        let caps = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": ["--headless=new", "--no-sandbox", "--disable-dev-shm-usage"]
                    }
                }
            }
        });
        let value = self.command(Method::POST, "/session", Some(caps)).await?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| TierError::Browser("webdriver session response without sessionId".into()))?
            .to_string();

        let timeouts = json!({
            "pageLoad": page_load.as_millis() as u64,
            "script": page_load.as_millis() as u64,
            "implicit": 0
        });
        if let Err(e) = self
            .command(Method::POST, &format!("/session/{session_id}/timeouts"), Some(timeouts))
            .await
        {
            debug!(error = %e, "webdriver rejected timeouts, continuing with defaults");
        }
        Ok(session_id)
    }
}

pub struct WebDriverSession {
    client: WebDriverClient,
    session_id: String,
    driver: Option<Child>,
}

impl WebDriverSession {
    fn path(&self, suffix: &str) -> String {
        format!("/session/{}{}", self.session_id, suffix)
    }

    async fn find_elements(&self, selector: &str) -> Result<Vec<String>, TierError> {
        let value = self
            .client
            .command(
                Method::POST,
                &self.path("/elements"),
                Some(json!({ "using": "css selector", "value": selector })),
            )
            .await?;
        Ok(value
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|el| el.get(ELEMENT_KEY).and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn goto(&mut self, url: &str) -> Result<(), TierError> {
        self.client
            .command(Method::POST, &self.path("/url"), Some(json!({ "url": url })))
            .await
            .map(|_| ())
    }

    async fn click_first(&mut self, selectors: &[&str]) -> Result<bool, TierError> {
        for selector in selectors {
            let Some(element) = self.find_elements(selector).await?.into_iter().next() else {
                continue;
            };
            self.client
                .command(
                    Method::POST,
                    &self.path(&format!("/element/{element}/click")),
                    Some(json!({})),
                )
                .await?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn read_text(&mut self, selector: &str) -> Result<Option<String>, TierError> {
        let Some(element) = self.find_elements(selector).await?.into_iter().next() else {
            return Ok(None);
        };
        let value = self
            .client
            .command(Method::GET, &self.path(&format!("/element/{element}/text")), None)
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn close(self: Box<Self>) {
        let mut this = self;
        let path = format!("/session/{}", this.session_id);
        if let Err(e) = this.client.command(Method::DELETE, &path, None).await {
            warn!(session = %this.session_id, error = %e, "failed to delete webdriver session");
        }
        if let Some(mut child) = this.driver.take() {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to stop chromedriver");
            }
        }
    }
}

/// Connects to an existing WebDriver endpoint.
pub struct RemoteWebDriverEngine {
    client: WebDriverClient,
    navigation_budget: Duration,
}

impl RemoteWebDriverEngine {
    pub fn new(http: Client, url: impl Into<String>, navigation_budget: Duration) -> Self {
        Self {
            client: WebDriverClient::new(http, url, navigation_budget),
            navigation_budget,
        }
    }
}

#[async_trait]
impl BrowserAutomationEngine for RemoteWebDriverEngine {
    fn label(&self) -> &'static str {
        "puppeteer"
    }

    async fn open_session(&self) -> Result<Box<dyn BrowserSession>, TierError> {
        let session_id = self.client.new_session(self.navigation_budget).await?;
        debug!(session = %session_id, "remote webdriver session opened");
        Ok(Box::new(WebDriverSession {
            client: self.client.clone(),
            session_id,
            driver: None,
        }))
    }
}

/// Spawns a local `chromedriver` for each session.
pub struct LocalChromeEngine {
    http: Client,
    chromedriver_path: String,
    navigation_budget: Duration,
}

impl LocalChromeEngine {
    pub fn new(http: Client, chromedriver_path: impl Into<String>, navigation_budget: Duration) -> Self {
        Self {
            http,
            chromedriver_path: chromedriver_path.into(),
            navigation_budget,
        }
    }
}

fn free_local_port() -> Result<u16, TierError> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")
        .map_err(|e| TierError::Browser(format!("no free port for chromedriver: {e}")))?;
    listener
        .local_addr()
        .map(|a| a.port())
        .map_err(|e| TierError::Browser(format!("no free port for chromedriver: {e}")))
}

#[async_trait]
impl BrowserAutomationEngine for LocalChromeEngine {
    fn label(&self) -> &'static str {
        "playwright"
    }

    async fn open_session(&self) -> Result<Box<dyn BrowserSession>, TierError> {
        let port = free_local_port()?;
        let mut child = Command::new(&self.chromedriver_path)
            .arg(format!("--port={port}"))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                TierError::Browser(format!("failed to launch {}: {e}", self.chromedriver_path))
            })?;

        let client = WebDriverClient::new(
            self.http.clone(),
            format!("http://127.0.0.1:{port}"),
            self.navigation_budget,
        );

        let deadline = Instant::now() + DRIVER_STARTUP_WAIT;
        while !client.ready().await {
            if Instant::now() >= deadline {
                let _ = child.kill().await;
                return Err(TierError::Browser(format!(
                    "chromedriver not ready after {DRIVER_STARTUP_WAIT:?}"
                )));
            }
            sleep(Duration::from_millis(100)).await;
        }

        match client.new_session(self.navigation_budget).await {
            Ok(session_id) => {
                debug!(port, session = %session_id, "local chromedriver session opened");
                Ok(Box::new(WebDriverSession {
                    client,
                    session_id,
                    driver: Some(child),
                }))
            }
            Err(e) => {
                let _ = child.kill().await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{
        Method::{DELETE, GET, POST},
        MockServer,
    };

    async fn mock_session(server: &MockServer) {
        server
            .mock_async(|when, then| {
                when.method(POST).path("/session");
                then.status(200)
                    .json_body(json!({ "value": { "sessionId": "s1", "capabilities": {} } }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/session/s1/timeouts");
                then.status(200).json_body(json!({ "value": null }));
            })
            .await;
    }

    #[tokio::test]
    async fn remote_session_reads_counter_text() {
        let server = MockServer::start_async().await;
        mock_session(&server).await;
        let nav = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/session/s1/url")
                    .body_contains("https://casino.test/crazy-time/");
                then.status(200).json_body(json!({ "value": null }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/session/s1/elements")
                    .body_contains("players-count");
                then.status(200)
                    .json_body(json!({ "value": [{ ELEMENT_KEY: "e1" }] }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/session/s1/element/e1/text");
                then.status(200).json_body(json!({ "value": "12,345" }));
            })
            .await;
        let delete = server
            .mock_async(|when, then| {
                when.method(DELETE).path("/session/s1");
                then.status(200).json_body(json!({ "value": null }));
            })
            .await;

        let engine =
            RemoteWebDriverEngine::new(Client::new(), server.base_url(), Duration::from_secs(2));
        assert_eq!(engine.label(), "puppeteer");
        let mut session = engine.open_session().await.unwrap();
        session.goto("https://casino.test/crazy-time/").await.unwrap();
        let text = session.read_text("#players-count").await.unwrap();
        session.close().await;

        assert_eq!(text.as_deref(), Some("12,345"));
        nav.assert_async().await;
        delete.assert_async().await;
    }

    #[tokio::test]
    async fn click_first_reports_no_match() {
        let server = MockServer::start_async().await;
        mock_session(&server).await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/session/s1/elements");
                then.status(200).json_body(json!({ "value": [] }));
            })
            .await;

        let engine =
            RemoteWebDriverEngine::new(Client::new(), server.base_url(), Duration::from_secs(2));
        let mut session = engine.open_session().await.unwrap();
        assert!(!session.click_first(&["#a", "#b"]).await.unwrap());
        assert_eq!(session.read_text("#players-count").await.unwrap(), None);
    }

    #[tokio::test]
    async fn webdriver_errors_become_browser_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/session");
                then.status(500).json_body(json!({
                    "value": { "error": "session not created", "message": "no chrome binary" }
                }));
            })
            .await;

        let engine =
            RemoteWebDriverEngine::new(Client::new(), server.base_url(), Duration::from_secs(2));
        let err = engine.open_session().await.err().unwrap();
        match err {
            TierError::Browser(msg) => assert!(msg.contains("session not created")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_chromedriver_binary_fails_fast() {
        let engine = LocalChromeEngine::new(
            Client::new(),
            "/nonexistent/chromedriver",
            Duration::from_secs(1),
        );
        assert_eq!(engine.label(), "playwright");
        assert!(matches!(
            engine.open_session().await.err(),
            Some(TierError::Browser(_))
        ));
    }
}
