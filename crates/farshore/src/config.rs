//! Bridge configuration: runtime flags, bootstrap scripts, backend choice.
//!
//! Passed explicitly into [`crate::Session::new`]; there is no ambient
//! module-level configuration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use farshore_protocol::ExceptionMap;
use farshore_runtime::scripts::{DEFAULT_INITIALIZE_SCRIPT, DEFAULT_LOAD_SCRIPT};
use farshore_runtime::{RunnerKind, RuntimeKind, ScriptType, TransportConfig};

/// Everything the bridge needs to reach and drive remote runtimes.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Base URL of the static-file-serving collaborator.
    pub base_url: String,
    pub script_type: ScriptType,
    /// Directory holding the interpreter runtime files (Node backend).
    pub dist_dir: Option<PathBuf>,
    pub script_timeout: Duration,
    pub webdriver_url: Option<String>,
    pub devtools_url: Option<String>,
    /// Foreign exception classes mapped to locally-known ones at decode
    /// time.
    pub exceptions: ExceptionMap,
    flags: HashMap<RuntimeKind, Vec<String>>,
    load_scripts: HashMap<RuntimeKind, String>,
    initialize_script: String,
    node_extra_globals: Vec<String>,
    runners: HashMap<RuntimeKind, RunnerKind>,
}

impl BridgeConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut flags = HashMap::new();
        flags.insert(
            RuntimeKind::Chrome,
            vec!["--js-flags=--expose-gc".to_string()],
        );
        flags.insert(RuntimeKind::Firefox, Vec::new());
        flags.insert(RuntimeKind::Node, Vec::new());

        let mut load_scripts = HashMap::new();
        for runtime in [RuntimeKind::Chrome, RuntimeKind::Firefox, RuntimeKind::Node] {
            load_scripts.insert(runtime, DEFAULT_LOAD_SCRIPT.to_string());
        }

        let mut runners = HashMap::new();
        runners.insert(RuntimeKind::Chrome, RunnerKind::WebDriver);
        runners.insert(RuntimeKind::Firefox, RunnerKind::WebDriver);
        runners.insert(RuntimeKind::Node, RunnerKind::Pipe);

        // The interpreter surfaces errors from the hosting JS runtime under
        // this class; it has no host-side counterpart.
        let mut exceptions = ExceptionMap::new();
        exceptions.register("JsException", "RuntimeError");

        BridgeConfig {
            base_url: base_url.into(),
            script_type: ScriptType::Classic,
            dist_dir: None,
            script_timeout: Duration::from_secs(20),
            webdriver_url: None,
            devtools_url: None,
            exceptions,
            flags,
            load_scripts,
            initialize_script: DEFAULT_INITIALIZE_SCRIPT.to_string(),
            node_extra_globals: Vec::new(),
            runners,
        }
    }

    pub fn set_flags(&mut self, runtime: RuntimeKind, flags: Vec<String>) {
        self.flags.insert(runtime, flags);
    }

    pub fn get_flags(&self, runtime: RuntimeKind) -> &[String] {
        self.flags.get(&runtime).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn set_load_script(&mut self, runtime: RuntimeKind, script: impl Into<String>) {
        self.load_scripts.insert(runtime, script.into());
    }

    pub fn get_load_script(&self, runtime: RuntimeKind) -> &str {
        self.load_scripts
            .get(&runtime)
            .map(String::as_str)
            .unwrap_or(DEFAULT_LOAD_SCRIPT)
    }

    pub fn set_initialize_script(&mut self, script: impl Into<String>) {
        self.initialize_script = script.into();
    }

    pub fn get_initialize_script(&self) -> &str {
        &self.initialize_script
    }

    pub fn add_node_extra_globals(&mut self, globals: impl IntoIterator<Item = String>) {
        self.node_extra_globals.extend(globals);
    }

    pub fn get_node_extra_globals(&self) -> &[String] {
        &self.node_extra_globals
    }

    /// Selects the backend driving `runtime`.
    pub fn set_runner(&mut self, runtime: RuntimeKind, runner: RunnerKind) {
        self.runners.insert(runtime, runner);
    }

    pub fn runner_for(&self, runtime: RuntimeKind) -> RunnerKind {
        self.runners.get(&runtime).copied().unwrap_or(match runtime {
            RuntimeKind::Node => RunnerKind::Pipe,
            _ => RunnerKind::WebDriver,
        })
    }

    pub(crate) fn transport_config(&self, runtime: RuntimeKind) -> TransportConfig {
        let mut config = TransportConfig::new(self.base_url.clone());
        config.script_type = self.script_type;
        config.dist_dir = self.dist_dir.clone();
        config.flags = self.get_flags(runtime).to_vec();
        config.load_script = self.get_load_script(runtime).to_string();
        config.initialize_script = self.initialize_script.clone();
        config.extra_globals = self.node_extra_globals.clone();
        config.script_timeout = self.script_timeout;
        config.webdriver_url = self.webdriver_url.clone();
        config.devtools_url = self.devtools_url.clone();
        config
    }
}
