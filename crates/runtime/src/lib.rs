//! Farshore Runtime - browser-automation transports.
//!
//! This crate provides the uniform transport layer the bridge uses to inject
//! script text into a remote interpreter runtime and retrieve one structured
//! result per call:
//!
//! - **Transport trait**: initialize / evaluate_sync / evaluate_async /
//!   load_capability / close, implemented once per backend
//! - **WebDriver backend**: W3C JSON wire protocol over HTTP; asynchronous
//!   scripts complete through an out-of-band callback because the protocol
//!   cannot await a promise directly
//! - **DevTools backend**: Chrome DevTools Protocol over WebSocket; promises
//!   are awaited in-band via `Runtime.evaluate`
//! - **Node backend**: a spawned headless JS process driven over stdio with
//!   correlation-token framing, because the only channel is a shared text
//!   stream that interleaves log output with command results
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │   farshore   │  Session, codec, handle lifecycle
//! └──────┬───────┘
//!        │ Box<dyn Transport>
//! ┌──────▼───────┐
//! │   runtime    │  This crate
//! │ ┌──────────┐ │
//! │ │WebDriver │ │  HTTP + callback pattern
//! │ ├──────────┤ │
//! │ │ DevTools │ │  WebSocket + awaitPromise
//! │ ├──────────┤ │
//! │ │   Node   │ │  stdio + sentinel framing
//! │ └──────────┘ │
//! └──────────────┘
//! ```
//!
//! Backend-specific failures never escape: everything surfaces as the
//! [`Error`] taxonomy in this crate (bootstrap, remote script, timeout).

pub mod cdp;
pub mod error;
pub mod node;
pub mod scripts;
pub mod transport;
pub mod webdriver;

pub use cdp::CdpTransport;
pub use error::{Error, Result};
pub use node::NodeTransport;
pub use transport::{
    RunnerKind, RuntimeKind, ScriptType, Transport, TransportConfig, create_transport,
};
pub use webdriver::WebDriverTransport;
