//! Handle/reference lifecycle bookkeeping.
//!
//! A [`Handle`] names an object that physically lives on the other side of
//! the transport. While any foreign-side handle exists, the object's
//! keep-alive count on its home side stays incremented; releasing the last
//! handle routes exactly one compensating decrement. Handles are never
//! silently converted to copies.
//!
//! The registry is the only mutable shared structure in the bridge and is
//! keyed per transport instance.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use thiserror::Error;

use farshore_protocol::{Side, Value};

/// Use of a handle after it was released. A programming error by the test
/// author; raised immediately rather than corrupting state.
#[derive(Debug, Error)]
#[error("handle {address} was already released")]
pub struct StaleHandleError {
    pub address: u64,
}

#[derive(Default)]
struct AddrState {
    /// Decoded reference records not yet adopted into a live [`Handle`].
    unadopted: u32,
    /// Live handles pointing at this address.
    holders: u32,
}

#[derive(Default)]
struct RegistryInner {
    remote: HashMap<u64, AddrState>,
    /// Addresses whose handles were dropped without an explicit release;
    /// drained on the next transport interaction (best-effort collection).
    pending: Vec<u64>,
    /// Host-homed objects wrapped for cross-boundary passage.
    host_live: HashMap<u64, (Value, u32)>,
    next_host_address: u64,
}

/// Per-transport handle state.
#[derive(Default)]
pub struct HandleRegistry {
    inner: Mutex<RegistryInner>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notes one decoded reference record for `address`. Called once per
    /// address per decode pass.
    pub fn bind(&self, address: u64) {
        let mut inner = self.inner.lock();
        inner.remote.entry(address).or_default().unadopted += 1;
    }

    /// Moves one decoded record into a live holder slot.
    pub(crate) fn adopt(&self, address: u64) -> bool {
        let mut inner = self.inner.lock();
        let Some(state) = inner.remote.get_mut(&address) else {
            return false;
        };
        if state.unadopted == 0 {
            return false;
        }
        state.unadopted -= 1;
        state.holders += 1;
        true
    }

    /// A handle record may only be re-encoded while the referent is still
    /// held alive from this side.
    pub(crate) fn ensure_live(&self, address: u64) -> Result<(), StaleHandleError> {
        let inner = self.inner.lock();
        match inner.remote.get(&address) {
            Some(state) if state.unadopted + state.holders > 0 => Ok(()),
            _ => Err(StaleHandleError { address }),
        }
    }

    pub(crate) fn note_released(&self, address: u64) {
        let mut inner = self.inner.lock();
        if let Some(state) = inner.remote.get_mut(&address) {
            state.holders = state.holders.saturating_sub(1);
        }
    }

    pub(crate) fn enqueue_drop(&self, address: u64) {
        self.inner.lock().pending.push(address);
    }

    /// Addresses owed a decrement because their handles were dropped.
    pub(crate) fn drain_pending(&self) -> Vec<u64> {
        let mut inner = self.inner.lock();
        let pending = std::mem::take(&mut inner.pending);
        for address in &pending {
            if let Some(state) = inner.remote.get_mut(address) {
                state.holders = state.holders.saturating_sub(1);
            }
        }
        pending
    }

    /// Outstanding references (adopted or not) for diagnostics and tests.
    pub fn live_refs(&self, address: u64) -> u32 {
        let inner = self.inner.lock();
        inner
            .remote
            .get(&address)
            .map(|s| s.unadopted + s.holders)
            .unwrap_or(0)
    }

    /// Wraps a host-homed value, incrementing its keep-alive count so it
    /// stays resident while the remote side can name it.
    pub fn wrap_local(&self, value: Value) -> u64 {
        let mut inner = self.inner.lock();
        inner.next_host_address += 1;
        let address = inner.next_host_address;
        inner.host_live.insert(address, (value, 1));
        address
    }

    pub fn resolve_local(&self, address: u64) -> Option<Value> {
        self.inner
            .lock()
            .host_live
            .get(&address)
            .map(|(value, _)| value.clone())
    }

    /// Keep-alive side effect of encoding a host-homed handle; exactly once
    /// per encode pass (the codec deduplicates addresses).
    pub(crate) fn note_encoded_local(&self, address: u64) -> Result<(), StaleHandleError> {
        let mut inner = self.inner.lock();
        match inner.host_live.get_mut(&address) {
            Some((_, count)) => {
                *count += 1;
                Ok(())
            }
            None => Err(StaleHandleError { address }),
        }
    }

    pub(crate) fn release_local(&self, address: u64) {
        let mut inner = self.inner.lock();
        if let Some((_, count)) = inner.host_live.get_mut(&address) {
            *count -= 1;
            if *count == 0 {
                inner.host_live.remove(&address);
            }
        }
    }

    pub fn local_keep_alive(&self, address: u64) -> u32 {
        self.inner
            .lock()
            .host_live
            .get(&address)
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }
}

struct HandleCore {
    address: u64,
    side: Side,
    released: AtomicBool,
    registry: Weak<HandleRegistry>,
}

impl Drop for HandleCore {
    fn drop(&mut self) {
        if !self.released.load(Ordering::SeqCst) {
            if let Some(registry) = self.registry.upgrade() {
                tracing::debug!(address = self.address, "handle dropped without release");
                registry.enqueue_drop(self.address);
            }
        }
    }
}

/// A live cross-boundary reference bound to one transport's registry.
///
/// Clones share release state: releasing any clone releases them all, and
/// the underlying decrement is routed exactly once.
#[derive(Clone)]
pub struct Handle {
    core: Arc<HandleCore>,
}

impl Handle {
    /// Adopts a decoded reference record into a live handle.
    pub(crate) fn adopt(
        registry: &Arc<HandleRegistry>,
        address: u64,
        side: Side,
    ) -> Result<Self, crate::Error> {
        if !registry.adopt(address) {
            return Err(crate::Error::HandleUnavailable(address));
        }
        Ok(Handle {
            core: Arc::new(HandleCore {
                address,
                side,
                released: AtomicBool::new(false),
                registry: Arc::downgrade(registry),
            }),
        })
    }

    /// Wraps a host-homed value into a handle.
    pub(crate) fn local(registry: &Arc<HandleRegistry>, address: u64) -> Self {
        Handle {
            core: Arc::new(HandleCore {
                address,
                side: Side::Host,
                released: AtomicBool::new(false),
                registry: Arc::downgrade(registry),
            }),
        }
    }

    pub fn address(&self) -> u64 {
        self.core.address
    }

    pub fn side(&self) -> Side {
        self.core.side
    }

    pub fn is_released(&self) -> bool {
        self.core.released.load(Ordering::SeqCst)
    }

    /// The wire record for this handle. Fails once released: a stale handle
    /// must never silently reach an envelope.
    pub fn as_value(&self) -> Result<Value, StaleHandleError> {
        if self.is_released() {
            return Err(StaleHandleError {
                address: self.core.address,
            });
        }
        Ok(Value::handle(self.core.address, self.core.side))
    }

    /// Flags the handle released; true on the first call only.
    pub(crate) fn mark_released(&self) -> bool {
        !self.core.released.swap(true, Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("address", &self.core.address)
            .field("side", &self.core.side)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adopt_consumes_decoded_records() {
        let registry = Arc::new(HandleRegistry::new());
        registry.bind(5);
        assert_eq!(registry.live_refs(5), 1);

        let handle = Handle::adopt(&registry, 5, Side::Remote).unwrap();
        assert_eq!(registry.live_refs(5), 1);
        assert_eq!(handle.address(), 5);

        // A second adoption without a second record fails.
        let err = Handle::adopt(&registry, 5, Side::Remote).unwrap_err();
        assert!(matches!(err, crate::Error::HandleUnavailable(5)));
    }

    #[test]
    fn released_handles_are_stale() {
        let registry = Arc::new(HandleRegistry::new());
        registry.bind(7);
        let handle = Handle::adopt(&registry, 7, Side::Remote).unwrap();
        assert!(handle.as_value().is_ok());

        assert!(handle.mark_released());
        registry.note_released(7);
        assert!(!handle.mark_released(), "second release is a no-op");

        let err = handle.as_value().unwrap_err();
        assert_eq!(err.address, 7);
        assert_eq!(registry.live_refs(7), 0);
        assert!(registry.ensure_live(7).is_err());
    }

    #[test]
    fn dropped_handles_queue_a_best_effort_release() {
        let registry = Arc::new(HandleRegistry::new());
        registry.bind(9);
        let handle = Handle::adopt(&registry, 9, Side::Remote).unwrap();
        drop(handle);

        assert_eq!(registry.drain_pending(), vec![9]);
        assert_eq!(registry.live_refs(9), 0);
        // Draining twice is harmless.
        assert!(registry.drain_pending().is_empty());
    }

    #[test]
    fn explicitly_released_handles_do_not_queue_on_drop() {
        let registry = Arc::new(HandleRegistry::new());
        registry.bind(11);
        let handle = Handle::adopt(&registry, 11, Side::Remote).unwrap();
        assert!(handle.mark_released());
        registry.note_released(11);
        drop(handle);
        assert!(registry.drain_pending().is_empty());
    }

    #[test]
    fn clones_share_release_state() {
        let registry = Arc::new(HandleRegistry::new());
        registry.bind(13);
        let handle = Handle::adopt(&registry, 13, Side::Remote).unwrap();
        let twin = handle.clone();
        assert!(handle.mark_released());
        assert!(twin.is_released());
        assert!(twin.as_value().is_err());
        drop(handle);
        drop(twin);
        assert!(registry.drain_pending().is_empty());
    }

    #[test]
    fn local_wrap_tracks_keep_alive() {
        let registry = Arc::new(HandleRegistry::new());
        let address = registry.wrap_local(Value::str("resident"));
        assert_eq!(registry.local_keep_alive(address), 1);
        assert_eq!(registry.resolve_local(address), Some(Value::str("resident")));

        registry.note_encoded_local(address).unwrap();
        assert_eq!(registry.local_keep_alive(address), 2);

        registry.release_local(address);
        registry.release_local(address);
        assert_eq!(registry.local_keep_alive(address), 0);
        assert_eq!(registry.resolve_local(address), None);
        assert!(registry.note_encoded_local(address).is_err());
    }
}
