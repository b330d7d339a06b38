//! Shared harness: a mock transport with an in-memory "remote interpreter"
//! that decodes envelopes, runs canned behaviors by function name, and does
//! the remote half of the handle keep-alive bookkeeping.

// Each test binary compiles its own copy; not every binary uses every helper.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use farshore::{
    BridgeConfig, FunctionFacts, RemoteFn, RuntimeKind, Session, Side, Value, remote_fn,
};
use farshore_protocol::{decode_blob, encode_blob};
use farshore_runtime::{Transport, TransportConfig};

pub const TEST_MODULE: &str = "\
def test_echo(remote_ctx, value):
    return value


def test_add(remote_ctx, a, b):
    return a + b


def test_raise_assertion(remote_ctx):
    assert 1 == 2, 'values differ'


def test_raise_foreign(remote_ctx):
    raise WasmHeapError('heap corrupted')


def test_wrap(remote_ctx, value):
    return Handle(value)


def test_wrap_twice(remote_ctx, value):
    h = Handle(value)
    return (h, h)


def test_use_handle(remote_ctx, handle):
    return handle


def test_sleep(remote_ctx):
    sleep_forever()
";

pub fn line_of(name: &str) -> u32 {
    TEST_MODULE
        .lines()
        .position(|l| l.starts_with(&format!("def {name}")))
        .map(|i| i as u32 + 1)
        .unwrap_or_else(|| panic!("function {name} not in TEST_MODULE"))
}

pub fn build_fn(name: &str) -> RemoteFn {
    remote_fn()
        .build(
            TEST_MODULE,
            "test_module.py",
            name,
            line_of(name),
            &FunctionFacts::new(),
        )
        .unwrap()
}

/// The remote side of the mock: live objects and their keep-alive counts.
#[derive(Default)]
pub struct MockRemote {
    live: Mutex<HashMap<u64, (Value, u32)>>,
    next_address: AtomicU64,
    in_flight: AtomicBool,
    overlap: AtomicBool,
    initializations: AtomicU64,
    pub capability_loads: Mutex<Vec<Vec<String>>>,
}

impl MockRemote {
    pub fn keep_alive(&self, address: u64) -> u32 {
        self.live
            .lock()
            .get(&address)
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }

    pub fn is_live(&self, address: u64) -> bool {
        self.live.lock().contains_key(&address)
    }

    pub fn saw_overlapping_calls(&self) -> bool {
        self.overlap.load(Ordering::SeqCst)
    }

    pub fn initializations(&self) -> u64 {
        self.initializations.load(Ordering::SeqCst)
    }

    /// Register a live object and apply the encode-pass keep-alive
    /// increment, once per object per payload.
    fn wrap_value(&self, value: Value) -> Value {
        let address = self.next_address.fetch_add(1, Ordering::SeqCst) + 1;
        self.live.lock().insert(address, (value, 1));
        Value::handle(address, Side::Remote)
    }

    fn release(&self, address: u64) {
        let mut live = self.live.lock();
        if let Some((_, count)) = live.get_mut(&address) {
            *count -= 1;
            if *count == 0 {
                live.remove(&address);
            }
        }
    }

    fn resolve(&self, value: &Value) -> Result<Value, Value> {
        match value.as_handle() {
            Some((address, Side::Remote)) => match self.live.lock().get(&address) {
                Some((stored, _)) => Ok(stored.clone()),
                None => Err(Value::exception(
                    "KeyError",
                    format!("no live object at address {address}"),
                    None,
                )),
            },
            _ => Ok(value.clone()),
        }
    }

    async fn behave(&self, func_name: &str, args: Vec<Value>) -> Result<Value, Value> {
        match func_name {
            "test_echo" => Ok(args.into_iter().next().unwrap_or(Value::None)),
            "test_add" => {
                let mut total = 0;
                for arg in &args {
                    match arg {
                        Value::Int { value } => total += value,
                        _ => {
                            return Err(Value::exception(
                                "TypeError",
                                "unsupported operand type",
                                None,
                            ));
                        }
                    }
                }
                Ok(Value::int(total))
            }
            "test_raise_assertion" => Err(Value::exception(
                "AssertionError",
                "values differ\nassert 1 == 2",
                Some(
                    "Traceback (most recent call last):\n  File \"test_module.py\", line 9, in test_raise_assertion\nAssertionError: values differ"
                        .to_string(),
                ),
            )),
            "test_raise_foreign" => Err(Value::exception(
                "WasmHeapError",
                "heap corrupted",
                Some("Traceback (most recent call last):\n  ...".to_string()),
            )),
            "test_wrap" => Ok(self.wrap_value(args.into_iter().next().unwrap_or(Value::None))),
            "test_wrap_twice" => {
                let record = self.wrap_value(args.into_iter().next().unwrap_or(Value::None));
                Ok(Value::tuple(vec![record.clone(), record]))
            }
            "test_use_handle" => self.resolve(args.first().unwrap_or(&Value::None)),
            "test_sleep" => {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(Value::None)
            }
            other => Err(Value::exception(
                "NameError",
                format!("name '{other}' is not defined"),
                None,
            )),
        }
    }
}

/// Transport whose "remote runtime" is the in-process [`MockRemote`].
pub struct MockTransport {
    remote: Arc<MockRemote>,
    timeout: Duration,
    initialized: bool,
    logs: Vec<String>,
}

impl MockTransport {
    pub fn new(remote: Arc<MockRemote>, timeout: Duration) -> Self {
        MockTransport {
            remote,
            timeout,
            initialized: false,
            logs: Vec::new(),
        }
    }

    async fn evaluate(&mut self, script: &str) -> farshore_runtime::Result<serde_json::Value> {
        if self.remote.in_flight.swap(true, Ordering::SeqCst) {
            self.remote.overlap.store(true, Ordering::SeqCst);
        }
        let outcome = tokio::time::timeout(self.timeout, dispatch(&self.remote, script)).await;
        self.remote.in_flight.store(false, Ordering::SeqCst);
        match outcome {
            Ok(result) => result,
            Err(_) => Err(farshore_runtime::Error::Timeout(format!(
                "mock evaluation exceeded {:?}",
                self.timeout
            ))),
        }
    }
}

async fn dispatch(
    remote: &Arc<MockRemote>,
    script: &str,
) -> farshore_runtime::Result<serde_json::Value> {
    if script.contains("_farshore_install") {
        return Ok(json!(true));
    }
    if script.contains("run_remote") {
        let quoted = single_quoted(script);
        assert!(
            quoted.len() >= 4,
            "call script must carry callable/args/filename/func fields: {script}"
        );
        let args: Vec<Value> = decode_blob(&quoted[1])
            .map_err(|e| farshore_runtime::Error::Transport(e.to_string()))?;
        let func_name = quoted[3].clone();
        let outcome = remote.behave(&func_name, args).await;
        let pair = match outcome {
            Ok(value) => json!([
                0,
                encode_blob(&value).map_err(|e| farshore_runtime::Error::Transport(e.to_string()))?
            ]),
            Err(exception) => json!([
                1,
                encode_blob(&exception)
                    .map_err(|e| farshore_runtime::Error::Transport(e.to_string()))?
            ]),
        };
        return Ok(pair);
    }
    if let Some(tail) = script.split("release(").nth(1) {
        let digits: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
        if let Ok(address) = digits.parse::<u64>() {
            remote.release(address);
        }
        return Ok(json!(true));
    }
    Ok(serde_json::Value::Null)
}

/// Substrings between single quotes, in order. Blob and name fields of the
/// generated call script are single-quoted and never contain quotes.
fn single_quoted(script: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = script;
    while let Some(start) = rest.find('\'') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('\'') else { break };
        out.push(after[..end].to_string());
        rest = &after[end + 1..];
    }
    out
}

#[async_trait]
impl Transport for MockTransport {
    async fn initialize(&mut self, _config: &TransportConfig) -> farshore_runtime::Result<()> {
        self.initialized = true;
        self.remote.initializations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn evaluate_sync(&mut self, script: &str) -> farshore_runtime::Result<serde_json::Value> {
        self.evaluate(script).await
    }

    async fn evaluate_async(&mut self, script: &str) -> farshore_runtime::Result<serde_json::Value> {
        self.evaluate(script).await
    }

    async fn load_capability(&mut self, names: &[String]) -> farshore_runtime::Result<()> {
        self.remote.capability_loads.lock().push(names.to_vec());
        Ok(())
    }

    async fn close(&mut self) -> farshore_runtime::Result<()> {
        self.initialized = false;
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

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn mock_session_with_timeout(timeout: Duration) -> (Session, Arc<MockRemote>) {
    init_tracing();
    let remote = Arc::new(MockRemote::default());
    let transport = MockTransport::new(Arc::clone(&remote), timeout);
    let session = Session::new(BridgeConfig::new("http://127.0.0.1:8000"));
    session.insert_transport(RuntimeKind::Chrome, Box::new(transport));
    (session, remote)
}

pub fn mock_session() -> (Session, Arc<MockRemote>) {
    mock_session_with_timeout(Duration::from_secs(5))
}
