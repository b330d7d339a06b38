//! The session context: transports, handle state, and the invoke path.
//!
//! One [`Session`] owns a mapping from runtime kind to transport instance
//! and the per-transport handle registries. Transports are created on first
//! use and closed at session end, explicitly. Calls against one transport
//! are serialized: the per-slot async lock guarantees at most one in-flight
//! call per browser tab/process.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use farshore_protocol::{Side, Status, StatusResult, Value};
use farshore_runtime::{RuntimeKind, Transport, create_transport};

use crate::codec::Codec;
use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::handle::{Handle, HandleRegistry};
use crate::remote_fn::RemoteFn;
use crate::script;

struct TransportSlot {
    transport: Box<dyn Transport>,
    initialized: bool,
}

type SlotRef = Arc<AsyncMutex<TransportSlot>>;

/// The explicit context object consumed by the test-collection layer.
pub struct Session {
    config: BridgeConfig,
    transports: Mutex<HashMap<RuntimeKind, SlotRef>>,
    handles: Mutex<HashMap<RuntimeKind, Arc<HandleRegistry>>>,
    loaded: Mutex<HashMap<RuntimeKind, HashSet<String>>>,
}

impl Session {
    pub fn new(config: BridgeConfig) -> Self {
        Session {
            config,
            transports: Mutex::new(HashMap::new()),
            handles: Mutex::new(HashMap::new()),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Installs a pre-built transport for `runtime` instead of the one the
    /// static lookup table would create.
    pub fn insert_transport(&self, runtime: RuntimeKind, transport: Box<dyn Transport>) {
        self.transports.lock().insert(
            runtime,
            Arc::new(AsyncMutex::new(TransportSlot {
                transport,
                initialized: false,
            })),
        );
    }

    /// The handle registry keyed to `runtime`'s transport instance.
    pub fn registry(&self, runtime: RuntimeKind) -> Arc<HandleRegistry> {
        self.handles
            .lock()
            .entry(runtime)
            .or_insert_with(|| Arc::new(HandleRegistry::new()))
            .clone()
    }

    fn slot(&self, runtime: RuntimeKind) -> Result<SlotRef> {
        let mut map = self.transports.lock();
        if let Some(slot) = map.get(&runtime) {
            return Ok(slot.clone());
        }
        let runner = self.config.runner_for(runtime);
        let transport = create_transport(runner, runtime)?;
        let slot = Arc::new(AsyncMutex::new(TransportSlot {
            transport,
            initialized: false,
        }));
        map.insert(runtime, slot.clone());
        Ok(slot)
    }

    async fn ensure_ready(&self, runtime: RuntimeKind, slot: &mut TransportSlot) -> Result<()> {
        if slot.initialized {
            return Ok(());
        }
        let transport_config = self.config.transport_config(runtime);
        slot.transport.initialize(&transport_config).await?;
        slot.transport
            .evaluate_sync(&script::render_install_script())
            .await?;
        slot.initialized = true;
        tracing::debug!(runtime = runtime.name(), "transport ready");
        Ok(())
    }

    /// Routes decrements owed by dropped handles. Failures degrade to a
    /// reported leak, never an error.
    async fn flush_dropped_handles(
        &self,
        registry: &Arc<HandleRegistry>,
        slot: &mut TransportSlot,
    ) {
        for address in registry.drain_pending() {
            if let Err(err) = slot
                .transport
                .evaluate_sync(&script::render_release_script(address))
                .await
            {
                tracing::warn!(address, %err, "could not release dropped handle; leaking it");
            }
        }
    }

    async fn ensure_capabilities(
        &self,
        runtime: RuntimeKind,
        packages: &[String],
        slot: &mut TransportSlot,
    ) -> Result<()> {
        let missing: Vec<String> = {
            let loaded = self.loaded.lock();
            let have = loaded.get(&runtime);
            packages
                .iter()
                .filter(|p| have.is_none_or(|set| !set.contains(*p)))
                .cloned()
                .collect()
        };
        if missing.is_empty() {
            return Ok(());
        }
        slot.transport.load_capability(&missing).await?;
        let mut loaded = self.loaded.lock();
        loaded.entry(runtime).or_default().extend(missing);
        Ok(())
    }

    /// Runs `f` remotely with positional `args`, blocking until the single
    /// status result comes back. The full cycle: encode, serialize on the
    /// transport, evaluate, decode, and re-raise remote failures.
    pub async fn invoke(
        &self,
        runtime: RuntimeKind,
        f: &RemoteFn,
        args: &[Value],
    ) -> Result<Value> {
        f.check_args(args.len())?;
        let registry = self.registry(runtime);
        let codec = Codec::new(&registry, &self.config.exceptions);

        let args_blob = codec.encode_args(args)?;
        let envelope = f.envelope(args_blob)?;
        let call_script = script::render_call_script(&envelope);

        let slot = self.slot(runtime)?;
        let raw = {
            let mut guard = slot.lock().await;
            self.ensure_ready(runtime, &mut guard).await?;
            self.flush_dropped_handles(&registry, &mut guard).await;
            self.ensure_capabilities(runtime, f.packages(), &mut guard)
                .await?;
            guard.transport.evaluate_async(&call_script).await?
        };

        let status = StatusResult::from_json(&raw).map_err(Error::from)?;
        match status.status {
            Status::Ok => codec.decode_result(&status.payload),
            Status::Error => Err(codec.decode_failure(&status.payload)),
        }
    }

    /// Like [`Session::invoke`] with a scoped script-timeout override,
    /// restored afterwards.
    pub async fn invoke_with_timeout(
        &self,
        runtime: RuntimeKind,
        f: &RemoteFn,
        args: &[Value],
        timeout: Duration,
    ) -> Result<Value> {
        let slot = self.slot(runtime)?;
        let previous = {
            let mut guard = slot.lock().await;
            let previous = guard.transport.script_timeout();
            guard.transport.set_script_timeout(timeout);
            previous
        };
        let result = self.invoke(runtime, f, args).await;
        {
            let mut guard = slot.lock().await;
            guard.transport.set_script_timeout(previous);
        }
        result
    }

    /// Adopts a decoded reference record into a live [`Handle`] bound to
    /// this session.
    pub fn handle_from(&self, runtime: RuntimeKind, value: &Value) -> Result<Handle> {
        let (address, side) = value.as_handle().ok_or_else(|| Error::Arguments {
            name: "handle_from".to_string(),
            detail: format!("value is not a handle record: {value:?}"),
        })?;
        match side {
            Side::Remote => Handle::adopt(&self.registry(runtime), address, side),
            Side::Host => Err(Error::Arguments {
                name: "handle_from".to_string(),
                detail: "host-homed handles are created with Session::wrap".to_string(),
            }),
        }
    }

    /// Wraps a host-homed value for cross-boundary passage.
    pub fn wrap(&self, runtime: RuntimeKind, value: Value) -> Handle {
        let registry = self.registry(runtime);
        let address = registry.wrap_local(value);
        Handle::local(&registry, address)
    }

    /// Releases a handle. Idempotent: the first call routes exactly one
    /// keep-alive decrement to the object's home side; later calls (and
    /// releases of clones) are no-ops.
    pub async fn release(&self, runtime: RuntimeKind, handle: &Handle) -> Result<()> {
        if !handle.mark_released() {
            return Ok(());
        }
        let registry = self.registry(runtime);
        match handle.side() {
            Side::Host => {
                registry.release_local(handle.address());
                Ok(())
            }
            Side::Remote => {
                registry.note_released(handle.address());
                let slot = self.slot(runtime)?;
                let mut guard = slot.lock().await;
                if !guard.initialized {
                    return Ok(());
                }
                if let Err(err) = guard
                    .transport
                    .evaluate_sync(&script::render_release_script(handle.address()))
                    .await
                {
                    tracing::warn!(
                        address = handle.address(),
                        %err,
                        "could not release remote handle; leaking it"
                    );
                }
                Ok(())
            }
        }
    }

    /// Reinitializes `runtime`'s page/process while keeping the transport
    /// instance registered. Loaded capabilities are forgotten.
    pub async fn refresh(&self, runtime: RuntimeKind) -> Result<()> {
        let slot = self.slot(runtime)?;
        let mut guard = slot.lock().await;
        guard.transport.close().await?;
        guard.initialized = false;
        self.loaded.lock().remove(&runtime);
        Ok(())
    }

    /// Diagnostic output collected by `runtime`'s transport.
    pub async fn logs(&self, runtime: RuntimeKind) -> String {
        let slot = { self.transports.lock().get(&runtime).cloned() };
        match slot {
            Some(slot) => slot.lock().await.transport.logs(),
            None => String::new(),
        }
    }

    pub async fn clear_logs(&self, runtime: RuntimeKind) {
        let slot = { self.transports.lock().get(&runtime).cloned() };
        if let Some(slot) = slot {
            slot.lock().await.transport.clear_logs();
        }
    }

    /// Closes every transport, routing outstanding dropped-handle releases
    /// first. Failures are reported, not raised.
    pub async fn close(&self) -> Result<()> {
        let slots: Vec<(RuntimeKind, SlotRef)> = self.transports.lock().drain().collect();
        for (runtime, slot) in slots {
            let registry = self.registry(runtime);
            let mut guard = slot.lock().await;
            if guard.initialized {
                self.flush_dropped_handles(&registry, &mut guard).await;
            }
            if let Err(err) = guard.transport.close().await {
                tracing::warn!(runtime = runtime.name(), %err, "transport teardown failed");
            }
        }
        Ok(())
    }
}
