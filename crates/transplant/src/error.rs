//! Build-time errors raised while constructing a RemoteCallable.
//!
//! All of these are fatal and surface at decoration/collection time, never at
//! call time.

use thiserror::Error;

/// Result type alias for transplant operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while extracting a function for remote execution.
#[derive(Debug, Error)]
pub enum Error {
    /// The defining module's source did not parse.
    #[error("could not parse module '{filename}': {detail}")]
    Parse { filename: String, detail: String },

    /// The function was not found in the module tree. This indicates a
    /// tooling bug (stale line information, wrong file) and aborts the run.
    #[error("did not find function '{name}' (line {line}) in module '{filename}'")]
    Location {
        name: String,
        line: u32,
        filename: String,
    },

    /// A function definition was found at the expected position but its name
    /// does not match the target.
    #[error("looking for function '{expected}' at line {line} but found '{found}'")]
    NameMismatch {
        expected: String,
        found: String,
        line: u32,
    },

    /// The function does not follow the remote-context calling convention.
    #[error(
        "function '{name}' must take a first parameter whose name starts with \
         '{prefix}', found {}",
        found.as_deref().map(|p| format!("'{p}'")).unwrap_or_else(|| "no parameters".to_string())
    )]
    Signature {
        name: String,
        prefix: &'static str,
        found: Option<String>,
    },

    /// The captured decoration-time facts do not fit the parameter list.
    #[error("function '{name}': {detail}")]
    Facts { name: String, detail: String },
}
