//! Exception records and the foreign-class mapping extension point.
//!
//! Exceptions cross the boundary as data. At decode time the class name is
//! resolved against the set of classes known on this side; classes that only
//! exist in the remote execution environment can be mapped to a local
//! equivalent through [`ExceptionMap`]. Anything still unknown fails with
//! [`Error::ForeignType`] so the caller gets an actionable message naming the
//! original class instead of an opaque decode failure.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::value::Value;

/// Exception classes assumed to exist on both sides of the boundary.
const SHARED_CLASSES: &[&str] = &[
    "ArithmeticError",
    "AssertionError",
    "AttributeError",
    "BaseException",
    "Exception",
    "FileNotFoundError",
    "ImportError",
    "IndentationError",
    "IndexError",
    "KeyError",
    "LookupError",
    "MemoryError",
    "ModuleNotFoundError",
    "NameError",
    "NotImplementedError",
    "OSError",
    "OverflowError",
    "PermissionError",
    "RecursionError",
    "RuntimeError",
    "StopAsyncIteration",
    "StopIteration",
    "SyntaxError",
    "TimeoutError",
    "TypeError",
    "ValueError",
    "ZeroDivisionError",
];

/// A raised exception as it travels over the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionRecord {
    pub class: String,
    pub message: String,
    pub traceback: Option<String>,
}

impl ExceptionRecord {
    /// Extracts the record from a decoded value, if it is an exception.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Exception {
                class,
                message,
                traceback,
            } => Some(ExceptionRecord {
                class: class.clone(),
                message: message.clone(),
                traceback: traceback.clone(),
            }),
            _ => None,
        }
    }
}

/// An exception record whose class resolved to something known locally.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedException {
    /// The locally-known class name (after any mapping).
    pub class: String,
    pub message: String,
    pub traceback: Option<String>,
}

/// Maps foreign-runtime-only exception class names to locally-known classes.
///
/// This is the protocol's one extension point: exceptions raised purely
/// inside the remote runtime (e.g. an error type belonging to the execution
/// environment itself) surface as a recognizable type on the host.
#[derive(Debug, Clone, Default)]
pub struct ExceptionMap {
    map: BTreeMap<String, String>,
}

impl ExceptionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `foreign` as decoding to the locally-known `local` class.
    pub fn register(&mut self, foreign: impl Into<String>, local: impl Into<String>) {
        self.map.insert(foreign.into(), local.into());
    }

    /// Resolves a record's class against the shared set and this map.
    pub fn resolve(&self, record: &ExceptionRecord) -> Result<ResolvedException> {
        let class = if SHARED_CLASSES.contains(&record.class.as_str()) {
            record.class.clone()
        } else if let Some(local) = self.map.get(&record.class) {
            local.clone()
        } else {
            return Err(Error::ForeignType {
                class: record.class.clone(),
                message: record.message.clone(),
            });
        };
        Ok(ResolvedException {
            class,
            message: record.message.clone(),
            traceback: record.traceback.clone(),
        })
    }
}
