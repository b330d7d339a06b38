//! Error types for the value protocol.

use thiserror::Error;

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while encoding or decoding protocol payloads.
#[derive(Debug, Error)]
pub enum Error {
    /// A blob could not be decoded (bad base64, bad JSON, or a shape
    /// mismatch). Carries the original failure text so the caller can tell
    /// a genuinely untransportable value from an internal protocol bug.
    #[error("malformed protocol blob: {detail}")]
    MalformedBlob { detail: String },

    /// A decoded value referenced a class that does not exist on the
    /// decoding side. Common when a result's type exists only in the remote
    /// execution environment.
    #[error(
        "type '{class}' from the remote runtime cannot be reconstructed on this side. \
         The original message is: {message}"
    )]
    ForeignType { class: String, message: String },

    /// A payload had the wrong overall shape (e.g., a status result that is
    /// not a two-element array).
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl Error {
    pub(crate) fn malformed(detail: impl std::fmt::Display) -> Self {
        Error::MalformedBlob {
            detail: detail.to_string(),
        }
    }
}
