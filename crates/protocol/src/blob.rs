//! Text-safe payload encoding.
//!
//! Payloads are JSON-serialized and then base64-encoded so they can be
//! interpolated into a generated script body without any escaping concerns.
//! Decode failures keep the underlying error text; callers need it to tell
//! "this value cannot round-trip" apart from an internal protocol bug.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Serializes `value` and wraps it base64 for embedding in script text.
pub fn encode_blob<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value).map_err(Error::malformed)?;
    Ok(BASE64.encode(json))
}

/// Inverse of [`encode_blob`].
pub fn decode_blob<T: DeserializeOwned>(blob: &str) -> Result<T> {
    let bytes = BASE64
        .decode(blob.trim())
        .map_err(|e| Error::malformed(format!("invalid base64: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| Error::malformed(format!("invalid payload: {e}")))
}
