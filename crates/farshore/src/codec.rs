//! Encode/decode wiring between the value protocol and the handle registry.
//!
//! Encoding applies the keep-alive side effect for host-homed handles
//! (exactly once per address per envelope, however often the same object is
//! wrapped in one call) and refuses stale references. Decoding binds every
//! remote reference record to this transport's registry so a later release
//! can be routed to the correct remote instance.

use std::collections::HashSet;
use std::sync::Arc;

use farshore_protocol::{
    ExceptionMap, ExceptionRecord, Side, Value, decode_blob, encode_blob,
};

use crate::error::{Error, Result};
use crate::handle::HandleRegistry;

pub(crate) struct Codec<'a> {
    registry: &'a Arc<HandleRegistry>,
    exceptions: &'a ExceptionMap,
}

impl<'a> Codec<'a> {
    pub(crate) fn new(registry: &'a Arc<HandleRegistry>, exceptions: &'a ExceptionMap) -> Self {
        Codec {
            registry,
            exceptions,
        }
    }

    /// Encodes positional call arguments into a blob, performing the handle
    /// bookkeeping side effects.
    pub(crate) fn encode_args(&self, args: &[Value]) -> Result<String> {
        let mut handles = Vec::new();
        for arg in args {
            arg.collect_handles(&mut handles);
        }
        let mut seen = HashSet::new();
        for (address, side) in handles {
            match side {
                // Remote-homed: the keep-alive obligation sits with the
                // remote side (applied there when the record was produced);
                // here we only refuse to ship a dead reference.
                Side::Remote => self.registry.ensure_live(address)?,
                // Host-homed: encoding is what exposes the object, so the
                // keep-alive increment happens here, once per envelope.
                Side::Host => {
                    if seen.insert(address) {
                        self.registry.note_encoded_local(address)?;
                    }
                }
            }
        }
        Ok(encode_blob(&args.to_vec())?)
    }

    /// Decodes a success payload, binding remote reference records to this
    /// transport's registry.
    pub(crate) fn decode_result(&self, blob: &str) -> Result<Value> {
        let value: Value = decode_blob(blob)?;
        let mut handles = Vec::new();
        value.collect_handles(&mut handles);
        let mut seen = HashSet::new();
        for (address, side) in handles {
            // One record per address per decode pass: repeated occurrences
            // of the same object inside one payload share one reference.
            if side == Side::Remote && seen.insert(address) {
                self.registry.bind(address);
            }
        }
        Ok(value)
    }

    /// Decodes an error payload into the exception to re-raise.
    pub(crate) fn decode_failure(&self, blob: &str) -> Error {
        let value: Value = match decode_blob(blob) {
            Ok(value) => value,
            Err(err) => return err.into(),
        };
        let Some(record) = ExceptionRecord::from_value(&value) else {
            return Error::Protocol(farshore_protocol::Error::Protocol(format!(
                "error payload was not an exception record: {value:?}"
            )));
        };
        match self.exceptions.resolve(&record) {
            Ok(resolved) => Error::Remote {
                class: resolved.class,
                message: resolved.message,
                remote_traceback: resolved.traceback,
            },
            Err(foreign) => foreign.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec_parts() -> (Arc<HandleRegistry>, ExceptionMap) {
        (Arc::new(HandleRegistry::new()), ExceptionMap::new())
    }

    #[test]
    fn encoding_host_handles_increments_keep_alive_once_per_envelope() {
        let (registry, exceptions) = codec_parts();
        let address = registry.wrap_local(Value::int(99));
        assert_eq!(registry.local_keep_alive(address), 1);

        let codec = Codec::new(&registry, &exceptions);
        // The same object wrapped twice in one call: one increment.
        let record = Value::handle(address, Side::Host);
        codec
            .encode_args(&[record.clone(), Value::list(vec![record.clone()])])
            .unwrap();
        assert_eq!(registry.local_keep_alive(address), 2);

        // A second envelope increments again.
        codec.encode_args(&[record]).unwrap();
        assert_eq!(registry.local_keep_alive(address), 3);
    }

    #[test]
    fn encoding_a_dead_remote_reference_is_stale() {
        let (registry, exceptions) = codec_parts();
        let codec = Codec::new(&registry, &exceptions);
        let err = codec
            .encode_args(&[Value::handle(404, Side::Remote)])
            .unwrap_err();
        assert!(matches!(err, Error::Stale(_)), "got {err}");
    }

    #[test]
    fn decoding_binds_remote_references() {
        let (registry, exceptions) = codec_parts();
        let codec = Codec::new(&registry, &exceptions);
        let payload = encode_blob(&Value::tuple(vec![
            Value::handle(21, Side::Remote),
            Value::handle(21, Side::Remote),
            Value::handle(22, Side::Remote),
        ]))
        .unwrap();
        codec.decode_result(&payload).unwrap();
        // Same address twice in one payload shares one reference.
        assert_eq!(registry.live_refs(21), 1);
        assert_eq!(registry.live_refs(22), 1);
    }

    #[test]
    fn failure_payloads_resolve_through_the_exception_map() {
        let (registry, mut exceptions) = codec_parts();
        exceptions.register("JsException", "RuntimeError");
        let codec = Codec::new(&registry, &exceptions);

        let blob = encode_blob(&Value::exception(
            "JsException",
            "ReferenceError: x is not defined",
            Some("Traceback ...".to_string()),
        ))
        .unwrap();
        match codec.decode_failure(&blob) {
            Error::Remote { class, message, .. } => {
                assert_eq!(class, "RuntimeError");
                assert!(message.contains("x is not defined"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_exception_classes_become_foreign_type_errors() {
        let (registry, exceptions) = codec_parts();
        let codec = Codec::new(&registry, &exceptions);
        let blob = encode_blob(&Value::exception("PixelBufferError", "oops", None)).unwrap();
        match codec.decode_failure(&blob) {
            Error::Protocol(farshore_protocol::Error::ForeignType { class, message }) => {
                assert_eq!(class, "PixelBufferError");
                assert_eq!(message, "oops");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn non_exception_error_payloads_are_protocol_errors() {
        let (registry, exceptions) = codec_parts();
        let codec = Codec::new(&registry, &exceptions);
        let blob = encode_blob(&Value::int(3)).unwrap();
        match codec.decode_failure(&blob) {
            Error::Protocol(farshore_protocol::Error::Protocol(text)) => {
                assert!(text.contains("not an exception record"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
