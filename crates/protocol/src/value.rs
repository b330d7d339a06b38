//! The self-describing value model moved across the runtime boundary.
//!
//! Every value is tagged with its kind so the decoding side never has to
//! guess. Two record kinds are special:
//!
//! - `handle` is an opaque reference to a live object that stays resident on
//!   its home side; it is never a copy of the referent.
//! - `exception` carries a raised error (class name, message, and the remote
//!   traceback rendered as text).

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

/// Which side of the transport an object lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// The process initiating calls.
    Host,
    /// The isolated interpreter instance inside the browser/JS runtime.
    Remote,
}

/// A transportable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Value {
    /// The null/none value.
    None,
    Bool {
        value: bool,
    },
    Int {
        value: i64,
    },
    Float {
        value: f64,
    },
    Str {
        value: String,
    },
    /// Binary data, base64-encoded so the record stays text-safe.
    Bytes {
        b64: String,
    },
    List {
        items: Vec<Value>,
    },
    Tuple {
        items: Vec<Value>,
    },
    Set {
        items: Vec<Value>,
    },
    /// Key/value pairs in insertion order. Keys are full values, not just
    /// strings, so the remote side can rebuild non-string-keyed mappings.
    Dict {
        entries: Vec<(Value, Value)>,
    },
    /// Tagged reference record for an object that is not transported by
    /// value. `address` is an opaque identifier minted by the owning side.
    Handle {
        address: u64,
        side: Side,
    },
    /// A raised exception, transported as data.
    Exception {
        class: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        traceback: Option<String>,
    },
}

impl Value {
    pub fn int(value: i64) -> Self {
        Value::Int { value }
    }

    pub fn float(value: f64) -> Self {
        Value::Float { value }
    }

    pub fn bool(value: bool) -> Self {
        Value::Bool { value }
    }

    pub fn str(value: impl Into<String>) -> Self {
        Value::Str {
            value: value.into(),
        }
    }

    pub fn bytes(data: &[u8]) -> Self {
        Value::Bytes {
            b64: BASE64.encode(data),
        }
    }

    pub fn list(items: impl Into<Vec<Value>>) -> Self {
        Value::List {
            items: items.into(),
        }
    }

    pub fn tuple(items: impl Into<Vec<Value>>) -> Self {
        Value::Tuple {
            items: items.into(),
        }
    }

    pub fn set(items: impl Into<Vec<Value>>) -> Self {
        Value::Set {
            items: items.into(),
        }
    }

    pub fn dict(entries: impl Into<Vec<(Value, Value)>>) -> Self {
        Value::Dict {
            entries: entries.into(),
        }
    }

    pub fn handle(address: u64, side: Side) -> Self {
        Value::Handle { address, side }
    }

    pub fn exception(
        class: impl Into<String>,
        message: impl Into<String>,
        traceback: Option<String>,
    ) -> Self {
        Value::Exception {
            class: class.into(),
            message: message.into(),
            traceback,
        }
    }

    /// Decoded bytes payload, if this is a bytes record.
    pub fn as_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Value::Bytes { b64 } => BASE64.decode(b64).ok(),
            _ => None,
        }
    }

    /// The `(address, side)` pair, if this is a handle record.
    pub fn as_handle(&self) -> Option<(u64, Side)> {
        match self {
            Value::Handle { address, side } => Some((*address, *side)),
            _ => None,
        }
    }

    /// True if the tree contains no handle or exception records.
    pub fn is_plain(&self) -> bool {
        let mut plain = true;
        self.visit(&mut |v| {
            if matches!(v, Value::Handle { .. } | Value::Exception { .. }) {
                plain = false;
            }
        });
        plain
    }

    /// Collects every handle record in the tree, in traversal order.
    pub fn collect_handles(&self, out: &mut Vec<(u64, Side)>) {
        self.visit(&mut |v| {
            if let Value::Handle { address, side } = v {
                out.push((*address, *side));
            }
        });
    }

    fn visit(&self, f: &mut impl FnMut(&Value)) {
        f(self);
        match self {
            Value::List { items } | Value::Tuple { items } | Value::Set { items } => {
                for item in items {
                    item.visit(f);
                }
            }
            Value::Dict { entries } => {
                for (key, value) in entries {
                    key.visit(f);
                    value.visit(f);
                }
            }
            _ => {}
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int { value }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float { value }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool { value }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::str(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str { value }
    }
}
