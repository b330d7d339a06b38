//! Farshore - run test functions inside an isolated interpreter hosted in a
//! browser or headless JS runtime, as if the call had been local.
//!
//! A decorated function definition flows through four stages:
//!
//! 1. **Transplant** (`farshore-transplant`): the function's syntax tree is
//!    extracted from its defining module and rewritten to stand alone, with
//!    decoration-time values captured into an auxiliary table.
//! 2. **Encode** (`farshore-protocol`): the callable, its arguments, and
//!    metadata become a text-safe envelope.
//! 3. **Transport** (`farshore-runtime`): a browser-automation backend
//!    injects the generated script, the remote side decodes, compiles, and
//!    executes, and one `[status, payload]` pair comes back.
//! 4. **Decode**: the payload becomes a return value, or the remote
//!    exception re-raises on the host with the remote traceback appended.
//!
//! The [`Session`] context object owns one transport per runtime kind plus
//! the per-transport handle state; nothing lives in ambient module state.
//! Live objects that cannot cross the boundary by value travel as
//! [`Handle`]s with explicit keep-alive bookkeeping on their home side.

pub mod codec;
pub mod config;
pub mod error;
pub mod handle;
pub mod remote_fn;
mod remote_module;
pub mod script;
pub mod session;

pub use config::BridgeConfig;
pub use error::{Error, Result};
pub use handle::{Handle, HandleRegistry, StaleHandleError};
pub use remote_fn::{RemoteFn, RemoteFnBuilder, remote_fn};
pub use session::Session;

// The pieces of the lower layers that callers interact with directly.
pub use farshore_protocol::{ExceptionMap, Side, Value};
pub use farshore_runtime::{
    RunnerKind, RuntimeKind, ScriptType, Transport, TransportConfig,
};
pub use farshore_transplant::{FunctionFacts, RESERVED_PREFIX};
