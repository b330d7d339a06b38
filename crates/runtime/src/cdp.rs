//! DevTools backend: Chrome DevTools Protocol over WebSocket.
//!
//! Unlike the WebDriver wire protocol, `Runtime.evaluate` can await a promise
//! in-band (`awaitPromise`), so no completion-callback plumbing is needed.
//! Script failures arrive as structured `exceptionDetails`, never as a
//! protocol-level error, and console output is captured from
//! `Runtime.consoleAPICalled` events interleaved with responses.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::{Error, Result};
use crate::scripts;
use crate::transport::{Transport, TransportConfig};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport speaking the Chrome DevTools Protocol to one page target.
pub struct CdpTransport {
    socket: Option<Socket>,
    next_id: u64,
    timeout: Duration,
    logs: Vec<String>,
}

impl Default for CdpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl CdpTransport {
    pub fn new() -> Self {
        CdpTransport {
            socket: None,
            next_id: 1,
            timeout: Duration::from_secs(20),
            logs: Vec::new(),
        }
    }

    /// Sends one command and pumps the socket until its response arrives.
    /// Events received while waiting are dispatched to the log sink.
    async fn command(&mut self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;
        let socket = self
            .socket
            .as_mut()
            .ok_or_else(|| Error::Transport("transport is not initialized".to_string()))?;

        let request = json!({ "id": id, "method": method, "params": params });
        socket.send(WsMessage::Text(request.to_string())).await?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout(format!(
                    "{method} exceeded {:?}",
                    self.timeout
                )));
            }
            let frame = tokio::time::timeout(remaining, socket.next())
                .await
                .map_err(|_| Error::Timeout(format!("{method} exceeded {:?}", self.timeout)))?
                .ok_or_else(|| Error::Transport("DevTools socket closed".to_string()))?;
            let text = match frame? {
                WsMessage::Text(text) => text,
                WsMessage::Close(_) => {
                    return Err(Error::Transport("DevTools socket closed".to_string()));
                }
                _ => continue,
            };
            let message: Value = serde_json::from_str(&text)?;
            if message["id"].as_u64() == Some(id) {
                if let Some(error) = message.get("error").filter(|e| !e.is_null()) {
                    return Err(Error::Transport(format!(
                        "DevTools rejected {method}: {error}"
                    )));
                }
                return Ok(message["result"].clone());
            }
            if message["method"] == "Runtime.consoleAPICalled" {
                let line = message["params"]["args"]
                    .as_array()
                    .map(|args| {
                        args.iter()
                            .map(preview_remote_object)
                            .collect::<Vec<_>>()
                            .join(" ")
                    })
                    .unwrap_or_default();
                self.logs.push(line);
            }
        }
    }

    async fn evaluate_expression(&mut self, expression: String, await_promise: bool) -> Result<Value> {
        let result = self
            .command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": await_promise,
                }),
            )
            .await?;
        if let Some(details) = result.get("exceptionDetails") {
            return Err(classify_exception_details(details));
        }
        Ok(result["result"]["value"].clone())
    }

    async fn wait_for_page_load(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let state = self
                .evaluate_expression("document.readyState".to_string(), false)
                .await?;
            if state == "complete" {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::Bootstrap {
                    message: "page never reached readyState=complete".to_string(),
                    diagnostics: Some(format!("last readyState: {state}")),
                });
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

#[async_trait]
impl Transport for CdpTransport {
    async fn initialize(&mut self, config: &TransportConfig) -> Result<()> {
        self.timeout = config.script_timeout;
        let url = config
            .devtools_url
            .clone()
            .or_else(|| std::env::var("FARSHORE_DEVTOOLS_URL").ok())
            .ok_or_else(|| {
                Error::bootstrap(
                    "no DevTools endpoint configured; set devtools_url or FARSHORE_DEVTOOLS_URL",
                )
            })?;

        let (socket, _) = connect_async(url.as_str()).await.map_err(|e| Error::Bootstrap {
            message: format!("could not connect to DevTools at {url}"),
            diagnostics: Some(e.to_string()),
        })?;
        self.socket = Some(socket);
        tracing::debug!(%url, "DevTools socket connected");

        self.command("Runtime.enable", json!({})).await?;
        self.command("Page.enable", json!({})).await?;
        self.command("Page.navigate", json!({ "url": config.page_url() }))
            .await?;
        self.wait_for_page_load().await?;

        self.evaluate_sync(scripts::SETUP_SCRIPT).await?;
        self.evaluate_async(&config.load_script).await?;
        self.evaluate_async(scripts::RESULT_HANDLER_SCRIPT).await?;
        self.evaluate_sync(&config.initialize_script).await?;
        Ok(())
    }

    async fn evaluate_sync(&mut self, script: &str) -> Result<Value> {
        self.evaluate_expression(format!("(function() {{ {script} }})()"), false)
            .await
    }

    async fn evaluate_async(&mut self, script: &str) -> Result<Value> {
        self.evaluate_expression(format!("(async () => {{ {script} }})()"), true)
            .await
    }

    async fn load_capability(&mut self, names: &[String]) -> Result<()> {
        self.evaluate_async(&scripts::load_capability_script(names))
            .await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut socket) = self.socket.take() {
            if let Err(err) = socket.close(None).await {
                tracing::warn!(%err, "DevTools socket teardown failed");
            }
        }
        Ok(())
    }

    fn set_script_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
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

/// Renders one console argument the way DevTools previews it.
fn preview_remote_object(arg: &Value) -> String {
    if let Some(value) = arg.get("value") {
        match value.as_str() {
            Some(text) => text.to_string(),
            None => value.to_string(),
        }
    } else if let Some(description) = arg["description"].as_str() {
        description.to_string()
    } else {
        arg["type"].as_str().unwrap_or("object").to_string()
    }
}

/// Maps `exceptionDetails` onto the uniform remote-script error.
fn classify_exception_details(details: &Value) -> Error {
    let description = details["exception"]["description"]
        .as_str()
        .map(|s| s.to_string());
    let message = details["exception"]["message"]
        .as_str()
        .or_else(|| details["text"].as_str())
        .unwrap_or("script threw")
        .to_string();
    Error::remote_script(message, description)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_details_become_remote_script_errors() {
        let details = json!({
            "text": "Uncaught",
            "exception": {
                "message": "x is not a function",
                "description": "TypeError: x is not a function\n    at <anonymous>:1:1",
            }
        });
        match classify_exception_details(&details) {
            Error::RemoteScript { message, stack } => {
                assert_eq!(message, "x is not a function");
                assert!(stack.unwrap().starts_with("TypeError"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn exception_text_is_the_fallback_message() {
        let details = json!({ "text": "Uncaught (in promise)" });
        match classify_exception_details(&details) {
            Error::RemoteScript { message, .. } => {
                assert_eq!(message, "Uncaught (in promise)");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn console_previews_prefer_plain_values() {
        assert_eq!(preview_remote_object(&json!({"value": "hi"})), "hi");
        assert_eq!(preview_remote_object(&json!({"value": 3})), "3");
        assert_eq!(
            preview_remote_object(&json!({"type": "object", "description": "Window"})),
            "Window"
        );
    }
}
