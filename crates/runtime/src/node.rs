//! Node backend: a spawned headless JS process driven over stdio.
//!
//! There is no structured RPC channel here, only a shared text stream that
//! interleaves diagnostic output with command results. Each command is framed
//! with a unique correlation token:
//!
//! ```text
//! host -> driver:  <token>
//!                  <code line>$        (one per line, acknowledged by
//!                                       {LINE_OK} so buffers never fill)
//!                  <token>
//! driver -> host:  <token>:TOKEN       (evaluation started)
//!                  ...console output...
//!                  <token>:TOKEN       (evaluation finished)
//!                  0 | 1               (success / failure digit)
//!                  <payload lines>
//!                  <token>:TOKEN
//! ```
//!
//! The trailing `$` on payload lines protects them from end-of-line
//! translation; output between the first two sentinels is captured as logs.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::error::{Error, Result};
use crate::scripts;
use crate::transport::{Transport, TransportConfig};

/// Line the driver prints when its interpreter context is ready.
const READY_SENTINEL: &str = "READY!!";

/// Per-line acknowledgement printed by the driver while receiving code.
const LINE_OK: &str = "{LINE_OK}";

/// The driver script executed by the spawned node process.
const NODE_DRIVER_JS: &str = r#"
const vm = require("vm");
const readline = require("readline");
const path = require("path");
const util = require("util");

const baseUrl = process.argv[2];
const distDir = process.argv[3];
const EXTRA_GLOBALS = JSON.parse(process.env.FARSHORE_NODE_EXTRA_GLOBALS || "[]");

const { loadInterpreter } = require(`${distDir}/interpreter`);
process.chdir(distDir);

// node requires full URLs.
function _fetch(p, ...args) {
  return fetch(new URL(p, baseUrl).toString(), ...args);
}

const context = {
  loadInterpreter,
  path,
  process,
  require,
  fetch: _fetch,
  TextDecoder,
  TextEncoder,
  setTimeout,
  clearTimeout,
  setInterval,
  clearInterval,
  AbortController,
  AbortSignal,
};
for (const name of EXTRA_GLOBALS) {
  context[name] = globalThis[name];
}

vm.createContext(context);
vm.runInContext("globalThis.self = globalThis;", context);

// Colors in console output would corrupt the framing.
for (const key of Object.keys(util.inspect.styles)) {
  util.inspect.styles[key] = undefined;
}

const rl = readline.createInterface({
  input: process.stdin,
  output: process.stdout,
  terminal: false,
});

let curCode = "";
let curToken;
rl.on("line", async function (line) {
  if (!curToken) {
    curToken = line;
    return;
  }
  if (line !== curToken) {
    // Each payload line carries a trailing $ so end-of-line translation
    // cannot corrupt it.
    line = line.substring(0, line.lastIndexOf("$"));
    curCode += line + "\n";
    // Acknowledge so the host can send the next line without filling
    // the pipe buffer.
    console.log("{LINE_OK}");
  } else {
    evalCode(curToken, curCode, context);
    curCode = "";
    curToken = undefined;
  }
});

async function evalCode(token, code, evalContext) {
  let p = new Promise((resolve, reject) => {
    evalContext.___outerResolve = resolve;
    evalContext.___outerReject = reject;
  });
  const wrapped = `
      (async function(){
          ${code}
      })().then(___outerResolve).catch(___outerReject);
      `;
  const delim = token + ":TOKEN";
  console.log(delim);
  try {
    vm.runInContext(wrapped, evalContext, {
      importModuleDynamically: vm.constants?.USE_MAIN_CONTEXT_DEFAULT_LOADER,
    });
    const result = JSON.stringify(await p);
    console.log(`${delim}\n0\n${result}\n${delim}`);
  } catch (e) {
    console.log(`${delim}\n1\n${e.stack}\n${delim}`);
  }
}
console.log("READY!!");
"#;

/// The framed command channel over a pair of byte streams.
///
/// Generic over the streams so the framing can be exercised against
/// in-memory duplex pipes as well as a real child process.
struct NodePipe<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> NodePipe<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    fn new(reader: R, writer: W) -> Self {
        NodePipe { reader, writer }
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Next line with the terminator removed, or `None` at EOF.
    async fn read_trimmed_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    async fn expect_line(&mut self) -> Result<String> {
        self.read_trimmed_line()
            .await?
            .ok_or_else(|| Error::ProcessExited("node driver closed the stream".to_string()))
    }

    /// Sends one framed command and reads back its bracketed reply.
    async fn command(&mut self, token: &str, code: &str, logs: &mut Vec<String>) -> Result<Value> {
        self.send_line(token).await?;
        for line in code.lines() {
            self.send_line(&format!("{line}$")).await?;
            loop {
                let reply = self.expect_line().await?;
                if reply == LINE_OK {
                    break;
                }
                logs.push(reply);
            }
        }
        self.send_line(token).await?;

        let sentinel = format!("{token}:TOKEN");

        // Evaluation started.
        loop {
            let line = self.expect_line().await?;
            if line == sentinel {
                break;
            }
            if line != LINE_OK {
                logs.push(line);
            }
        }

        // Console output until evaluation finished.
        loop {
            let line = self.expect_line().await?;
            if line == sentinel {
                break;
            }
            logs.push(line);
        }

        let digit = self.expect_line().await?;
        let success = match digit.as_str() {
            "0" => true,
            "1" => false,
            other => {
                return Err(Error::Transport(format!(
                    "node driver framing violated: expected status digit, got '{other}'"
                )));
            }
        };

        let mut payload_lines = Vec::new();
        loop {
            let line = self.expect_line().await?;
            if line == sentinel {
                break;
            }
            payload_lines.push(line);
        }
        let payload = payload_lines.join("\n");

        if success {
            if payload.trim().is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str(&payload.replace("undefined", "null")).map_err(|e| {
                Error::Transport(format!("node driver returned an unparsable result: {e}"))
            })
        } else {
            Err(Error::remote_script("", Some(payload)))
        }
    }
}

/// Transport driving a spawned headless node process.
pub struct NodeTransport {
    child: Option<Child>,
    pipe: Option<NodePipe<BufReader<ChildStdout>, ChildStdin>>,
    driver_path: Option<PathBuf>,
    next_command: u64,
    timeout: Duration,
    logs: Arc<Mutex<Vec<String>>>,
    /// Set after a timeout left an unfinished reply in the stream; the
    /// framing cannot be trusted afterwards.
    wedged: bool,
}

impl Default for NodeTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTransport {
    pub fn new() -> Self {
        NodeTransport {
            child: None,
            pipe: None,
            driver_path: None,
            next_command: 0,
            timeout: Duration::from_secs(20),
            logs: Arc::new(Mutex::new(Vec::new())),
            wedged: false,
        }
    }

    fn diagnostics(&self) -> String {
        self.logs.lock().join("\n")
    }
}

#[async_trait]
impl Transport for NodeTransport {
    async fn initialize(&mut self, config: &TransportConfig) -> Result<()> {
        self.timeout = config.script_timeout;

        let node = find_node_executable()?;
        check_node_version(&node).await?;

        let driver_path = std::env::temp_dir().join(format!(
            "farshore-node-driver-{}.js",
            std::process::id()
        ));
        tokio::fs::write(&driver_path, NODE_DRIVER_JS).await?;

        let dist_dir = config
            .dist_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        let mut cmd = Command::new(&node);
        cmd.arg("--expose-gc")
            .args(&config.flags)
            .arg(&driver_path)
            .arg(&config.base_url)
            .arg(&dist_dir)
            .env(
                "FARSHORE_NODE_EXTRA_GLOBALS",
                serde_json::to_string(&config.extra_globals)?,
            )
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| Error::Bootstrap {
            message: format!("failed to spawn node: {e}"),
            diagnostics: None,
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transport("node stdout unavailable".to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transport("node stdin unavailable".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            let logs = Arc::clone(&self.logs);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    logs.lock().push(format!("[node stderr] {line}"));
                }
            });
        }

        let mut pipe = NodePipe::new(BufReader::new(stdout), stdin);
        let ready = tokio::time::timeout(self.timeout, async {
            loop {
                match pipe.read_trimmed_line().await? {
                    None => {
                        return Err(Error::ProcessExited(
                            "node driver exited before becoming ready".to_string(),
                        ));
                    }
                    Some(line) if line == READY_SENTINEL => return Ok(()),
                    Some(line) => self.logs.lock().push(line),
                }
            }
        })
        .await;
        match ready {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                return Err(Error::Bootstrap {
                    message: err.to_string(),
                    diagnostics: Some(self.diagnostics()),
                });
            }
            Err(_) => {
                let _ = child.start_kill();
                return Err(Error::Bootstrap {
                    message: format!("node driver not ready within {:?}", self.timeout),
                    diagnostics: Some(self.diagnostics()),
                });
            }
        }

        self.child = Some(child);
        self.pipe = Some(pipe);
        self.driver_path = Some(driver_path);
        tracing::debug!("node driver ready");

        self.evaluate_async(scripts::SETUP_SCRIPT).await?;
        self.evaluate_async(&config.load_script).await?;
        self.evaluate_async(scripts::RESULT_HANDLER_SCRIPT).await?;
        self.evaluate_async(&config.initialize_script).await?;
        Ok(())
    }

    // One textual path serves both: the driver always runs commands inside
    // an async wrapper and resolves the produced value.
    async fn evaluate_sync(&mut self, script: &str) -> Result<Value> {
        self.evaluate_async(script).await
    }

    async fn evaluate_async(&mut self, script: &str) -> Result<Value> {
        if self.wedged {
            return Err(Error::Transport(
                "node transport is wedged after a timeout; close and reinitialize".to_string(),
            ));
        }
        let token = format!("cmd-{}-{}", std::process::id(), self.next_command);
        self.next_command += 1;

        let pipe = self
            .pipe
            .as_mut()
            .ok_or_else(|| Error::Transport("transport is not initialized".to_string()))?;
        let mut call_logs = Vec::new();
        let outcome = tokio::time::timeout(
            self.timeout,
            pipe.command(&token, script, &mut call_logs),
        )
        .await;
        self.logs.lock().extend(call_logs);
        match outcome {
            Ok(result) => result,
            Err(_) => {
                // An unfinished reply may still be in the stream; the
                // framing cannot recover, so poison the instance.
                self.wedged = true;
                if let Some(child) = self.child.as_mut() {
                    let _ = child.start_kill();
                }
                Err(Error::Timeout(format!(
                    "node evaluation exceeded {:?}",
                    self.timeout
                )))
            }
        }
    }

    async fn load_capability(&mut self, names: &[String]) -> Result<()> {
        self.evaluate_async(&scripts::load_capability_script(names))
            .await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        // Dropping stdin delivers EOF; the driver exits on its own.
        self.pipe = None;
        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(Duration::from_secs(2), child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    if let Err(err) = child.kill().await {
                        tracing::warn!(%err, "failed to kill node driver");
                    }
                }
            }
        }
        if let Some(path) = self.driver_path.take() {
            let _ = tokio::fs::remove_file(path).await;
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
        self.diagnostics()
    }

    fn clear_logs(&mut self) {
        self.logs.lock().clear();
    }
}

/// Locates the node executable: env override, PATH, then common locations.
fn find_node_executable() -> Result<PathBuf> {
    if let Ok(node) = std::env::var("FARSHORE_NODE_EXE") {
        let path = PathBuf::from(&node);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!(%node, "FARSHORE_NODE_EXE is set but does not exist; falling back");
    }

    #[cfg(not(windows))]
    let which_cmd = "which";
    #[cfg(windows)]
    let which_cmd = "where";

    if let Ok(output) = std::process::Command::new(which_cmd).arg("node").output() {
        if output.status.success() {
            let found = String::from_utf8_lossy(&output.stdout);
            if let Some(first) = found.lines().next() {
                let path = PathBuf::from(first.trim());
                if path.exists() {
                    return Ok(path);
                }
            }
        }
    }

    #[cfg(not(windows))]
    let common_locations = [
        "/usr/local/bin/node",
        "/usr/bin/node",
        "/opt/homebrew/bin/node",
        "/opt/local/bin/node",
    ];
    #[cfg(windows)]
    let common_locations = [
        "C:\\Program Files\\nodejs\\node.exe",
        "C:\\Program Files (x86)\\nodejs\\node.exe",
    ];

    for location in &common_locations {
        let path = PathBuf::from(location);
        if path.exists() {
            return Ok(path);
        }
    }

    Err(Error::bootstrap(
        "Node.js executable not found. Install Node.js or set FARSHORE_NODE_EXE.",
    ))
}

async fn check_node_version(node: &std::path::Path) -> Result<()> {
    let output = Command::new(node)
        .arg("--version")
        .output()
        .await
        .map_err(|e| Error::Bootstrap {
            message: format!("could not run node --version: {e}"),
            diagnostics: None,
        })?;
    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    match node_major_version(&version) {
        Some(major) if major >= 18 => Ok(()),
        _ => Err(Error::Bootstrap {
            message: format!("node version {version} is too old, please use node >= 18"),
            diagnostics: None,
        }),
    }
}

/// Parses the major component out of a `vAA.BB.CC` version string.
fn node_major_version(version: &str) -> Option<u32> {
    version
        .trim()
        .strip_prefix('v')?
        .split('.')
        .next()?
        .parse()
        .ok()
}
