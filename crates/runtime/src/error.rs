//! Error types for the transport layer.

use thiserror::Error;

use crate::transport::{RunnerKind, RuntimeKind};

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a remote runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// The backend could not reach a working interpreter handle.
    #[error("bootstrap failed: {message}{}", diagnostics.as_deref().map(|d| format!("\n{d}")).unwrap_or_default())]
    Bootstrap {
        message: String,
        /// Backend output collected while bootstrapping, when available.
        diagnostics: Option<String>,
    },

    /// A script raised inside the remote runtime.
    #[error("{}", fmt_remote(message, stack.as_deref()))]
    RemoteScript {
        message: String,
        stack: Option<String>,
    },

    /// An evaluation exceeded the configured script timeout. All-or-nothing:
    /// no partial results are surfaced.
    #[error("script timeout: {0}")]
    Timeout(String),

    /// Backend plumbing failure (HTTP, WebSocket, pipe).
    #[error("transport error: {0}")]
    Transport(String),

    /// No backend implements this (runner, runtime) combination.
    #[error("no transport for runner {runner:?} with runtime {runtime:?}")]
    UnsupportedPair {
        runner: RunnerKind,
        runtime: RuntimeKind,
    },

    /// The remote process exited while a call was in flight.
    #[error("remote process exited: {0}")]
    ProcessExited(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Builds a remote-script error, dropping a message that merely repeats
    /// the head of the stack (Chrome embeds the message in the stack).
    pub fn remote_script(message: impl Into<String>, stack: Option<String>) -> Self {
        let mut message = message.into();
        if let Some(stack) = &stack {
            if !message.is_empty() && stack.starts_with(&message) {
                message = String::new();
            }
        }
        Error::RemoteScript { message, stack }
    }

    pub fn bootstrap(message: impl Into<String>) -> Self {
        Error::Bootstrap {
            message: message.into(),
            diagnostics: None,
        }
    }

    /// Returns true if this is a timeout failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

fn fmt_remote(message: &str, stack: Option<&str>) -> String {
    let parts: Vec<&str> = [Some(message), stack]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .collect();
    parts.join("\n\n")
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Transport(err.to_string())
    }
}
