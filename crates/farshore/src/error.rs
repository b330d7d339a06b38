//! Error taxonomy for the bridge.
//!
//! Build-time errors surface at decoration time, transport and protocol
//! errors per call, and lifecycle errors immediately at the misuse site.
//! Remote exceptions re-raise here with the remote traceback appended as
//! text, so a failure report reads like a local stack trace augmented with
//! the remote one.

use thiserror::Error;

use crate::handle::StaleHandleError;

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while invoking a function remotely.
#[derive(Debug, Error)]
pub enum Error {
    /// Building the RemoteCallable failed (location or signature).
    #[error(transparent)]
    Build(#[from] farshore_transplant::Error),

    /// Encoding or decoding a payload failed.
    #[error(transparent)]
    Protocol(#[from] farshore_protocol::Error),

    /// The transport failed (bootstrap, script error, timeout).
    #[error(transparent)]
    Transport(#[from] farshore_runtime::Error),

    /// A released handle was used again.
    #[error(transparent)]
    Stale(#[from] StaleHandleError),

    /// The remote call raised; re-raised here with its traceback attached.
    #[error("{}", fmt_remote(class, message, remote_traceback.as_deref()))]
    Remote {
        class: String,
        message: String,
        remote_traceback: Option<String>,
    },

    /// The supplied arguments do not fit the function's signature.
    #[error("argument mismatch calling '{name}': {detail}")]
    Arguments { name: String, detail: String },

    /// No decoded reference record is available to adopt for this address.
    #[error("no decoded reference available to adopt for address {0}")]
    HandleUnavailable(u64),
}

fn fmt_remote(class: &str, message: &str, traceback: Option<&str>) -> String {
    let head = if message.is_empty() {
        class.to_string()
    } else {
        format!("{class}: {message}")
    };
    match traceback {
        Some(tb) if !tb.is_empty() => format!("{head}\n\nRemote traceback:\n{tb}"),
        _ => head,
    }
}

impl Error {
    /// Class name of the re-raised remote exception, if this is one.
    pub fn remote_class(&self) -> Option<&str> {
        match self {
            Error::Remote { class, .. } => Some(class),
            _ => None,
        }
    }

    /// Returns true if this failure was a script timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Transport(e) if e.is_timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_display_appends_traceback() {
        let err = Error::Remote {
            class: "AssertionError".to_string(),
            message: "assert 1 == 2".to_string(),
            remote_traceback: Some(
                "Traceback (most recent call last):\n  File \"t.py\", line 3".to_string(),
            ),
        };
        let text = err.to_string();
        assert!(text.starts_with("AssertionError: assert 1 == 2"));
        assert!(text.contains("Remote traceback:"));
        assert!(text.contains("File \"t.py\", line 3"));
    }

    #[test]
    fn remote_display_without_traceback_is_just_the_head() {
        let err = Error::Remote {
            class: "ValueError".to_string(),
            message: "bad".to_string(),
            remote_traceback: None,
        };
        assert_eq!(err.to_string(), "ValueError: bad");
    }
}
