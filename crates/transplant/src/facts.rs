//! Captured decoration-time facts about the live function object.

use std::collections::BTreeMap;

use farshore_protocol::Value;

use crate::callable::SupportImport;

/// Key under which the return annotation is recorded, mirroring the
/// convention of the annotations mapping on a live function object.
pub const RETURN_KEY: &str = "return";

/// The values a function object carried at decoration time.
///
/// Defaults and annotations are captured as *values*, pulled off the live
/// function in the scope it was defined in. The tree rewrite references them
/// by table name instead of re-evaluating their source expressions, so
/// values that depended on the enclosing lexical scope survive the move.
#[derive(Debug, Clone, Default)]
pub struct FunctionFacts {
    /// Default values for the trailing positional parameters, in order.
    pub defaults: Vec<Value>,
    /// Default values for keyword-only parameters, by name.
    pub kwdefaults: BTreeMap<String, Value>,
    /// Annotation values by parameter name; the return annotation is under
    /// [`RETURN_KEY`].
    pub annotations: BTreeMap<String, Value>,
    /// Import-rewriting marker statements injected by the collection layer
    /// (e.g. assertion-rewrite support imports). These must precede the
    /// transplanted definition.
    pub rewrite_markers: Vec<SupportImport>,
}

impl FunctionFacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.defaults.push(value);
        self
    }

    pub fn with_kwdefault(mut self, name: impl Into<String>, value: Value) -> Self {
        self.kwdefaults.insert(name.into(), value);
        self
    }

    pub fn with_annotation(mut self, name: impl Into<String>, value: Value) -> Self {
        self.annotations.insert(name.into(), value);
        self
    }

    pub fn with_rewrite_marker(mut self, module: impl Into<String>, alias: impl Into<String>) -> Self {
        self.rewrite_markers.push(SupportImport {
            module: module.into(),
            alias: alias.into(),
        });
        self
    }
}
