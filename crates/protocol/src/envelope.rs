//! The per-call unit of transport.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Everything the remote side needs to run one call.
///
/// All payload fields are already blob-encoded (base64 of JSON), so the whole
/// envelope can be interpolated into a generated script body as plain text.
/// Produced per call; consumed once by the remote side; not reused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Blob-encoded transplanted callable.
    pub callable: String,
    /// Blob-encoded positional call arguments.
    pub args: String,
    /// Source filename, used only for diagnostics and traceback mapping.
    pub filename: String,
    /// Name of the function to look up after the callable executes.
    pub func_name: String,
    /// Whether the remote side must await the call's result.
    pub is_async: bool,
}

/// Call outcome status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error,
}

/// The only thing a transport call produces: a status and a blob payload
/// holding either the encoded return value or the encoded exception.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusResult {
    pub status: Status,
    pub payload: String,
}

impl StatusResult {
    /// Parses the `[status, payload]` pair produced by the remote runner.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let pair = value
            .as_array()
            .filter(|a| a.len() == 2)
            .ok_or_else(|| Error::Protocol(format!("expected [status, payload], got: {value}")))?;
        let status = match pair[0].as_i64() {
            Some(0) => Status::Ok,
            Some(1) => Status::Error,
            _ => {
                return Err(Error::Protocol(format!(
                    "unrecognized status marker: {}",
                    pair[0]
                )));
            }
        };
        let payload = pair[1]
            .as_str()
            .ok_or_else(|| Error::Protocol(format!("payload is not text: {}", pair[1])))?
            .to_string();
        Ok(StatusResult { status, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ok_and_error_pairs() {
        let ok = StatusResult::from_json(&serde_json::json!([0, "YWJj"])).unwrap();
        assert_eq!(ok.status, Status::Ok);
        assert_eq!(ok.payload, "YWJj");

        let err = StatusResult::from_json(&serde_json::json!([1, "ZGVm"])).unwrap();
        assert_eq!(err.status, Status::Error);
    }

    #[test]
    fn rejects_malformed_pairs() {
        for bad in [
            serde_json::json!(null),
            serde_json::json!([0]),
            serde_json::json!([2, "x"]),
            serde_json::json!([0, 17]),
            serde_json::json!({"status": 0}),
        ] {
            assert!(StatusResult::from_json(&bad).is_err(), "accepted: {bad}");
        }
    }
}
