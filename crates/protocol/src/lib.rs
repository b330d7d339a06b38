//! Wire types for the farshore cross-runtime value protocol.
//!
//! This crate contains the serde-serializable types used to move call
//! arguments, return values, and exceptions between the host and a remote
//! interpreter instance. These types represent the "protocol layer" - the
//! shapes of data as they appear on the wire.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! - **Pure data**: No behavior beyond serialization/deserialization and
//!   structural traversal
//! - **Text-safe**: Every payload can be rendered as base64 text so it can be
//!   interpolated into a generated script body
//! - **Side-agnostic**: The same value model is used by the host and by the
//!   decode/execute module installed into the remote interpreter
//!
//! Live handle bookkeeping and transport plumbing are built on top of these
//! types in the `farshore` and `farshore-runtime` crates.

pub mod blob;
pub mod envelope;
pub mod error;
pub mod exception;
pub mod value;

pub use blob::{decode_blob, encode_blob};
pub use envelope::{Envelope, Status, StatusResult};
pub use error::{Error, Result};
pub use exception::{ExceptionMap, ExceptionRecord, ResolvedException};
pub use value::{Side, Value};
