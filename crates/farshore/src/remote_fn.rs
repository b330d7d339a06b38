//! The public decorator-role API: build once, invoke many times.

use farshore_protocol::{Envelope, encode_blob};
use farshore_transplant::{FunctionFacts, ParamSpec, RemoteCallable, extract};

use crate::error::{Error, Result};

/// Starts building a remotely-executed function.
///
/// This plays the role a decorator plays in the defining language: it is
/// applied to an ordinary function definition (located by file, name, and
/// line) and yields a callable wrapper with the same external signature.
pub fn remote_fn() -> RemoteFnBuilder {
    RemoteFnBuilder::new()
}

/// Options applied while building a [`RemoteFn`].
#[derive(Debug, Clone, Default)]
pub struct RemoteFnBuilder {
    packages: Vec<String>,
}

impl RemoteFnBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Packages to load into the remote environment before the first run.
    pub fn packages<I, S>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.packages.extend(packages.into_iter().map(Into::into));
        self
    }

    /// Extracts the function and builds the reusable wrapper.
    ///
    /// Location and signature problems surface here, at decoration time,
    /// never at call time.
    pub fn build(
        self,
        source: &str,
        filename: &str,
        name: &str,
        line: u32,
        facts: &FunctionFacts,
    ) -> Result<RemoteFn> {
        let callable = extract(source, filename, name, line, facts)?;
        Ok(RemoteFn {
            callable,
            packages: self.packages,
        })
    }
}

/// A function prepared for remote execution.
///
/// Immutable once built; safe to reuse across repeated calls and across
/// transports. Invoke through [`crate::Session::invoke`].
#[derive(Debug, Clone)]
pub struct RemoteFn {
    callable: RemoteCallable,
    packages: Vec<String>,
}

impl RemoteFn {
    pub fn name(&self) -> &str {
        &self.callable.name
    }

    pub fn filename(&self) -> &str {
        &self.callable.filename
    }

    pub fn is_async(&self) -> bool {
        self.callable.is_async
    }

    /// The rewritten signature, for introspection by callers.
    pub fn signature(&self) -> &ParamSpec {
        &self.callable.params
    }

    pub fn packages(&self) -> &[String] {
        &self.packages
    }

    /// Verifies `supplied` positional arguments fit the signature (the
    /// remote-context parameter is filled in remotely and not counted).
    pub(crate) fn check_args(&self, supplied: usize) -> Result<()> {
        let params = self.signature();
        if let Some(capacity) = params.positional_capacity() {
            if supplied > capacity {
                return Err(Error::Arguments {
                    name: self.name().to_string(),
                    detail: format!("takes at most {capacity} arguments, got {supplied}"),
                });
            }
        }
        let required = params.required_positional();
        if supplied < required {
            return Err(Error::Arguments {
                name: self.name().to_string(),
                detail: format!("requires at least {required} arguments, got {supplied}"),
            });
        }
        Ok(())
    }

    /// Produces the per-call envelope around already-encoded arguments.
    pub(crate) fn envelope(&self, args_blob: String) -> Result<Envelope> {
        Ok(Envelope {
            callable: encode_blob(&self.callable)?,
            args: args_blob,
            filename: self.callable.filename.clone(),
            func_name: self.callable.name.clone(),
            is_async: self.callable.is_async,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "\
def test_pair(remote_ctx, a, b=1):
    return (a, b)


def test_variadic(remote_ctx, *remote_args):
    return remote_args
";

    fn build(name: &str, line: u32) -> RemoteFn {
        remote_fn()
            .packages(["toolkit"])
            .build(
                SOURCE,
                "m.py",
                name,
                line,
                &FunctionFacts::new().with_default(farshore_protocol::Value::int(1)),
            )
            .unwrap()
    }

    #[test]
    fn wrapper_exposes_the_original_signature() {
        let f = build("test_pair", 1);
        assert_eq!(f.name(), "test_pair");
        assert_eq!(
            f.signature().all_names(),
            vec!["remote_ctx", "a", "b"]
        );
        assert_eq!(f.packages(), ["toolkit"]);
        assert!(!f.is_async());
    }

    #[test]
    fn argument_counts_are_checked_before_transport() {
        let f = build("test_pair", 1);
        assert!(f.check_args(1).is_ok());
        assert!(f.check_args(2).is_ok());
        assert!(matches!(
            f.check_args(0),
            Err(Error::Arguments { .. })
        ));
        assert!(matches!(
            f.check_args(3),
            Err(Error::Arguments { .. })
        ));
    }

    #[test]
    fn varargs_lift_the_upper_bound() {
        let f = remote_fn()
            .build(SOURCE, "m.py", "test_variadic", 5, &FunctionFacts::new())
            .unwrap();
        assert!(f.check_args(0).is_ok());
        assert!(f.check_args(12).is_ok());
    }

    #[test]
    fn envelope_is_reusable_per_call() {
        let f = build("test_pair", 1);
        let envelope = f.envelope("QQ==".to_string()).unwrap();
        assert_eq!(envelope.func_name, "test_pair");
        assert_eq!(envelope.filename, "m.py");
        assert!(!envelope.is_async);
        assert!(!envelope.callable.is_empty());
    }
}
