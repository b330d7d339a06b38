//! WebDriver backend: W3C JSON wire protocol over HTTP.
//!
//! The wire protocol has no way to await a promise, so asynchronous scripts
//! run through the `execute/async` endpoint: the driver appends a completion
//! callback as the script's last argument and blocks until the script calls
//! it. Both paths wrap user script text in a try/catch that reports
//! `[0, value]` or `[1, message, stack]`, keeping driver-specific error
//! shapes out of the rest of the system.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::scripts;
use crate::transport::{Transport, TransportConfig};

/// Which browser the WebDriver server is expected to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    Chrome,
    Firefox,
}

impl Flavor {
    fn default_endpoint(&self) -> &'static str {
        match self {
            Flavor::Chrome => "http://127.0.0.1:9515",
            Flavor::Firefox => "http://127.0.0.1:4444",
        }
    }
}

/// Transport speaking the W3C WebDriver protocol to a browser driver server.
pub struct WebDriverTransport {
    flavor: Flavor,
    http: reqwest::Client,
    endpoint: String,
    session_id: Option<String>,
    timeout: Duration,
    timeout_dirty: bool,
    logs: Vec<String>,
}

impl WebDriverTransport {
    pub fn chrome() -> Self {
        Self::with_flavor(Flavor::Chrome)
    }

    pub fn firefox() -> Self {
        Self::with_flavor(Flavor::Firefox)
    }

    fn with_flavor(flavor: Flavor) -> Self {
        WebDriverTransport {
            flavor,
            http: reqwest::Client::new(),
            endpoint: flavor.default_endpoint().to_string(),
            session_id: None,
            timeout: Duration::from_secs(20),
            timeout_dirty: false,
            logs: Vec::new(),
        }
    }

    fn capabilities(&self, config: &TransportConfig) -> Value {
        match self.flavor {
            Flavor::Chrome => {
                let mut args = vec!["--headless=new".to_string(), "--no-sandbox".to_string()];
                args.extend(config.flags.iter().cloned());
                json!({
                    "capabilities": {
                        "alwaysMatch": {
                            "browserName": "chrome",
                            "goog:chromeOptions": { "args": args },
                        }
                    }
                })
            }
            Flavor::Firefox => {
                let mut args = vec!["-headless".to_string()];
                args.extend(config.flags.iter().cloned());
                json!({
                    "capabilities": {
                        "alwaysMatch": {
                            "browserName": "firefox",
                            "moz:firefoxOptions": { "args": args },
                        }
                    }
                })
            }
        }
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let url = format!("{}{path}", self.endpoint);
        // Grace on top of the script timeout so the server-side bound fires
        // first and produces the more precise error.
        let bound = self.timeout + Duration::from_secs(5);
        let response = tokio::time::timeout(bound, self.http.post(&url).json(&body).send())
            .await
            .map_err(|_| Error::Timeout(format!("no response from {url} within {bound:?}")))??;
        let status = response.status();
        let payload: Value = response.json().await?;
        if !status.is_success() {
            return Err(classify_webdriver_failure(&payload));
        }
        Ok(payload)
    }

    fn session_path(&self, suffix: &str) -> Result<String> {
        let session_id = self
            .session_id
            .as_deref()
            .ok_or_else(|| Error::Transport("transport is not initialized".to_string()))?;
        Ok(format!("/session/{session_id}{suffix}"))
    }

    async fn apply_timeout_if_dirty(&mut self) -> Result<()> {
        if !self.timeout_dirty || self.session_id.is_none() {
            return Ok(());
        }
        let path = self.session_path("/timeouts")?;
        self.post(&path, json!({ "script": self.timeout.as_millis() as u64 }))
            .await?;
        self.timeout_dirty = false;
        Ok(())
    }

    async fn execute(&mut self, kind: &str, script: String) -> Result<Value> {
        self.apply_timeout_if_dirty().await?;
        let path = self.session_path(&format!("/execute/{kind}"))?;
        let payload = self
            .post(&path, json!({ "script": script, "args": [] }))
            .await?;
        let value = payload.get("value").cloned().unwrap_or(Value::Null);
        let result = scripts::classify_wrapped_result(value);
        if let Err(err) = &result {
            self.logs.push(err.to_string());
        }
        result
    }
}

#[async_trait]
impl Transport for WebDriverTransport {
    async fn initialize(&mut self, config: &TransportConfig) -> Result<()> {
        if let Some(url) = &config.webdriver_url {
            self.endpoint = url.trim_end_matches('/').to_string();
        } else if let Ok(url) = std::env::var("FARSHORE_WEBDRIVER_URL") {
            self.endpoint = url.trim_end_matches('/').to_string();
        }
        self.timeout = config.script_timeout;

        let response = self
            .post("/session", self.capabilities(config))
            .await
            .map_err(|e| Error::Bootstrap {
                message: format!("could not open a WebDriver session at {}", self.endpoint),
                diagnostics: Some(e.to_string()),
            })?;
        let session_id = response["value"]["sessionId"]
            .as_str()
            .or_else(|| response["sessionId"].as_str())
            .ok_or_else(|| Error::Bootstrap {
                message: "WebDriver session response carried no sessionId".to_string(),
                diagnostics: Some(response.to_string()),
            })?
            .to_string();
        self.session_id = Some(session_id);
        tracing::debug!(endpoint = %self.endpoint, "WebDriver session created");

        let timeouts_path = self.session_path("/timeouts")?;
        self.post(
            &timeouts_path,
            json!({ "script": self.timeout.as_millis() as u64 }),
        )
        .await?;

        let url_path = self.session_path("/url")?;
        self.post(&url_path, json!({ "url": config.page_url() }))
            .await
            .map_err(|e| Error::Bootstrap {
                message: format!("could not navigate to {}", config.page_url()),
                diagnostics: Some(e.to_string()),
            })?;

        self.evaluate_sync(scripts::SETUP_SCRIPT).await?;
        self.evaluate_async(&config.load_script).await?;
        self.evaluate_async(scripts::RESULT_HANDLER_SCRIPT).await?;
        self.evaluate_sync(&config.initialize_script).await?;
        Ok(())
    }

    async fn evaluate_sync(&mut self, script: &str) -> Result<Value> {
        let wrapped = format!(
            "return (function() {{\n\
             try {{\n\
             let result = (function() {{ {script} }})();\n\
             return [0, result];\n\
             }} catch (e) {{\n\
             return [1, e.toString(), e.stack];\n\
             }}\n\
             }})();"
        );
        self.execute("sync", wrapped).await
    }

    async fn evaluate_async(&mut self, script: &str) -> Result<Value> {
        // Out-of-band completion: the last script argument is the callback
        // the driver blocks on.
        let wrapped = format!(
            "let cb = arguments[arguments.length - 1];\n\
             let run = async () => {{ {script} }};\n\
             (async () => {{\n\
             try {{\n\
             cb([0, await run()]);\n\
             }} catch (e) {{\n\
             cb([1, e.toString(), e.stack]);\n\
             }}\n\
             }})();"
        );
        self.execute("async", wrapped).await
    }

    async fn load_capability(&mut self, names: &[String]) -> Result<()> {
        self.evaluate_async(&scripts::load_capability_script(names))
            .await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let Some(session_id) = self.session_id.take() else {
            return Ok(());
        };
        let url = format!("{}/session/{session_id}", self.endpoint);
        if let Err(err) = self.http.delete(&url).send().await {
            tracing::warn!(%err, "WebDriver session teardown failed");
        }
        Ok(())
    }

    fn set_script_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
        self.timeout_dirty = true;
    }

    fn script_timeout(&self) -> Duration {
        self.timeout
    }

    fn logs(&self) -> String {
        self.logs.join("\n")
    }

    fn clear_logs(&mut self) {
        self.logs.clear();
    }
}

/// Maps a W3C error document onto the uniform taxonomy.
fn classify_webdriver_failure(payload: &Value) -> Error {
    let value = &payload["value"];
    let code = value["error"].as_str().unwrap_or("");
    let message = value["message"].as_str().unwrap_or("").to_string();
    let stacktrace = value["stacktrace"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());
    match code {
        "script timeout" | "timeout" => Error::Timeout(message),
        "javascript error" => Error::remote_script(message, stacktrace),
        "" => Error::Transport(format!("unrecognized WebDriver failure: {payload}")),
        _ => Error::Transport(format!("{code}: {message}")),
    }
}
