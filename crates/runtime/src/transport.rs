//! The uniform transport interface and backend selection.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::scripts;

/// How the remote runtime is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunnerKind {
    /// W3C WebDriver JSON wire protocol over HTTP.
    WebDriver,
    /// Chrome DevTools Protocol over WebSocket.
    Cdp,
    /// Headless JS process over stdio pipes.
    Pipe,
}

/// Which remote runtime hosts the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeKind {
    Chrome,
    Firefox,
    Node,
}

impl RuntimeKind {
    pub fn name(&self) -> &'static str {
        match self {
            RuntimeKind::Chrome => "chrome",
            RuntimeKind::Firefox => "firefox",
            RuntimeKind::Node => "node",
        }
    }
}

/// How payload pages are served: classic scripts or ES modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScriptType {
    #[default]
    Classic,
    Module,
}

/// Everything a backend needs to reach a working interpreter handle.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Base URL of the static-file-serving collaborator.
    pub base_url: String,
    pub script_type: ScriptType,
    /// Directory holding the interpreter runtime files (Node backend).
    pub dist_dir: Option<PathBuf>,
    /// Backend-specific flags (browser switches, node arguments).
    pub flags: Vec<String>,
    /// Script that loads the interpreter and stores its handle on `self`.
    pub load_script: String,
    /// Script run once after loading to warm the interpreter.
    pub initialize_script: String,
    /// Extra globals exposed inside the Node driver context.
    pub extra_globals: Vec<String>,
    pub script_timeout: Duration,
    /// WebDriver server endpoint override.
    pub webdriver_url: Option<String>,
    /// DevTools WebSocket endpoint override.
    pub devtools_url: Option<String>,
}

impl TransportConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        TransportConfig {
            base_url: base_url.into(),
            script_type: ScriptType::Classic,
            dist_dir: None,
            flags: Vec::new(),
            load_script: scripts::DEFAULT_LOAD_SCRIPT.to_string(),
            initialize_script: scripts::DEFAULT_INITIALIZE_SCRIPT.to_string(),
            extra_globals: Vec::new(),
            script_timeout: Duration::from_secs(20),
            webdriver_url: None,
            devtools_url: None,
        }
    }

    /// URL of the page that has the interpreter runtime loaded.
    pub fn page_url(&self) -> String {
        let page = match self.script_type {
            ScriptType::Classic => "test.html",
            ScriptType::Module => "module_test.html",
        };
        format!("{}/{page}", self.base_url.trim_end_matches('/'))
    }
}

/// Uniform operations over a remote runtime.
///
/// A transport instance is one browser tab or one process and is not safe
/// for concurrent calls; callers must serialize access so at most one call
/// is in flight at a time. Methods take `&mut self` to make that explicit.
#[async_trait]
pub trait Transport: Send {
    /// Loads the target page/process, runs the bootstrap scripts to obtain a
    /// working interpreter handle, and blocks until ready.
    async fn initialize(&mut self, config: &TransportConfig) -> Result<()>;

    /// Runs a script body (it may use `return`) and returns its result.
    async fn evaluate_sync(&mut self, script: &str) -> Result<serde_json::Value>;

    /// Like [`Transport::evaluate_sync`], but the script may await
    /// asynchronous work before producing its value; the caller is blocked
    /// until resolution.
    async fn evaluate_async(&mut self, script: &str) -> Result<serde_json::Value>;

    /// Ensures the named packages are available in the remote environment.
    async fn load_capability(&mut self, names: &[String]) -> Result<()>;

    /// Idempotent teardown.
    async fn close(&mut self) -> Result<()>;

    /// Bound applied to every evaluation.
    fn set_script_timeout(&mut self, timeout: Duration);

    fn script_timeout(&self) -> Duration;

    /// Diagnostic output collected from the remote side so far.
    fn logs(&self) -> String;

    fn clear_logs(&mut self);
}

/// Static backend selection, keyed by (runner, runtime) at configuration
/// time. No runtime type inspection happens anywhere else.
pub fn create_transport(runner: RunnerKind, runtime: RuntimeKind) -> Result<Box<dyn Transport>> {
    use crate::cdp::CdpTransport;
    use crate::node::NodeTransport;
    use crate::webdriver::WebDriverTransport;

    match (runner, runtime) {
        (RunnerKind::WebDriver, RuntimeKind::Chrome) => {
            Ok(Box::new(WebDriverTransport::chrome()))
        }
        (RunnerKind::WebDriver, RuntimeKind::Firefox) => {
            Ok(Box::new(WebDriverTransport::firefox()))
        }
        (RunnerKind::Cdp, RuntimeKind::Chrome) => Ok(Box::new(CdpTransport::new())),
        (RunnerKind::Pipe, RuntimeKind::Node) => Ok(Box::new(NodeTransport::new())),
        (runner, runtime) => Err(Error::UnsupportedPair { runner, runtime }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_url_follows_script_type() {
        let mut config = TransportConfig::new("http://127.0.0.1:8000/");
        assert_eq!(config.page_url(), "http://127.0.0.1:8000/test.html");
        config.script_type = ScriptType::Module;
        assert_eq!(config.page_url(), "http://127.0.0.1:8000/module_test.html");
    }

    #[test]
    fn lookup_table_covers_supported_pairs() {
        assert!(create_transport(RunnerKind::WebDriver, RuntimeKind::Chrome).is_ok());
        assert!(create_transport(RunnerKind::WebDriver, RuntimeKind::Firefox).is_ok());
        assert!(create_transport(RunnerKind::Cdp, RuntimeKind::Chrome).is_ok());
        assert!(create_transport(RunnerKind::Pipe, RuntimeKind::Node).is_ok());
    }

    #[test]
    fn lookup_table_rejects_unsupported_pairs() {
        for (runner, runtime) in [
            (RunnerKind::Cdp, RuntimeKind::Firefox),
            (RunnerKind::Cdp, RuntimeKind::Node),
            (RunnerKind::Pipe, RuntimeKind::Chrome),
            (RunnerKind::WebDriver, RuntimeKind::Node),
        ] {
            let result = create_transport(runner, runtime);
            assert!(matches!(result, Err(Error::UnsupportedPair { .. })));
        }
    }
}
