//! Syntax-tree extraction and rewriting for standalone remote execution.
//!
//! Given the source of the module a test function was defined in, this crate
//! produces a [`RemoteCallable`]: the part of the function definition that
//! can be reproduced verbatim inside the remote interpreter, stripped of
//! host-only context.
//!
//! The transform is pure: input a parsed module tree plus the captured
//! decoration-time values ([`FunctionFacts`]), output a self-contained
//! serializable tree. Nothing is looked up from the environment afterwards.
//!
//! # What the rewrite does
//!
//! - Strips all decorators (they are meaningless across the boundary and may
//!   reference host-only objects).
//! - Nulls out every parameter annotation, default, keyword default, and the
//!   return annotation, replacing each with a load-by-name reference into the
//!   [`AuxValueTable`] holding the *original* live value. Values are moved as
//!   data because they are not generally representable as source literals,
//!   and because re-evaluating their expressions remotely would lose the
//!   enclosing lexical scope they were defined in.
//! - Preserves the original body line numbers so failures reported by the
//!   remote interpreter map back to a position in the original file.

pub mod callable;
pub mod error;
pub mod facts;
mod locate;

pub use callable::{AuxValueTable, Param, ParamSpec, RemoteCallable, SupportImport, extract};
pub use error::{Error, Result};
pub use facts::FunctionFacts;

/// Reserved prefix identifying a function's first parameter as the
/// remote-context argument.
pub const RESERVED_PREFIX: &str = "remote";
