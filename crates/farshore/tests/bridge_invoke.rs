//! End-to-end invoke behavior against the mock transport: round-trip
//! fidelity, failure re-raising, capability loading, and call serialization.

mod common;

use std::time::Duration;

use common::{build_fn, mock_session, mock_session_with_timeout};
use farshore::{Error, RuntimeKind, Value, remote_fn};

const RUNTIME: RuntimeKind = RuntimeKind::Chrome;

#[tokio::test]
async fn plain_values_round_trip_identically() {
    let (session, _remote) = mock_session();
    let echo = build_fn("test_echo");

    let value = Value::dict(vec![
        (
            Value::str("numbers"),
            Value::list(vec![Value::int(1), Value::int(-2), Value::float(0.5)]),
        ),
        (Value::str("blob"), Value::bytes(b"\x00\x01binary")),
        (
            Value::str("nested"),
            Value::tuple(vec![Value::None, Value::bool(true), Value::set(vec![Value::int(9)])]),
        ),
    ]);

    let returned = session.invoke(RUNTIME, &echo, &[value.clone()]).await.unwrap();
    assert_eq!(returned, value);
}

#[tokio::test]
async fn results_compute_remotely() {
    let (session, _remote) = mock_session();
    let add = build_fn("test_add");
    let sum = session
        .invoke(RUNTIME, &add, &[Value::int(19), Value::int(23)])
        .await
        .unwrap();
    assert_eq!(sum, Value::int(42));
}

#[tokio::test]
async fn assertion_failures_re_raise_with_the_original_message() {
    let (session, _remote) = mock_session();
    let f = build_fn("test_raise_assertion");

    let err = session.invoke(RUNTIME, &f, &[]).await.unwrap_err();
    match &err {
        Error::Remote { class, message, remote_traceback } => {
            assert_eq!(class, "AssertionError");
            assert!(message.contains("values differ"));
            assert!(remote_traceback.as_deref().unwrap().contains("test_module.py"));
        }
        other => panic!("unexpected error: {other}"),
    }
    // The displayed failure reads like a local trace plus the remote one.
    let text = err.to_string();
    assert!(text.contains("AssertionError"));
    assert!(text.contains("Remote traceback:"));
}

#[tokio::test]
async fn unknown_exception_classes_decode_to_foreign_type_errors() {
    let (session, _remote) = mock_session();
    let f = build_fn("test_raise_foreign");

    let err = session.invoke(RUNTIME, &f, &[]).await.unwrap_err();
    match err {
        Error::Protocol(farshore_protocol::Error::ForeignType { class, message }) => {
            assert_eq!(class, "WasmHeapError");
            assert_eq!(message, "heap corrupted");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn argument_mismatches_fail_before_the_transport() {
    let (session, remote) = mock_session();
    let add = build_fn("test_add");
    let err = session.invoke(RUNTIME, &add, &[Value::int(1)]).await.unwrap_err();
    assert!(matches!(err, Error::Arguments { .. }), "got {err}");
    // Nothing reached the mock.
    assert!(!remote.is_live(1));
}

#[tokio::test]
async fn capabilities_load_once_per_transport() {
    let (session, remote) = mock_session();
    let f = remote_fn()
        .packages(["numpy", "toolkit"])
        .build(
            common::TEST_MODULE,
            "test_module.py",
            "test_echo",
            common::line_of("test_echo"),
            &farshore::FunctionFacts::new(),
        )
        .unwrap();

    session.invoke(RUNTIME, &f, &[Value::int(1)]).await.unwrap();
    session.invoke(RUNTIME, &f, &[Value::int(2)]).await.unwrap();

    let loads = remote.capability_loads.lock().clone();
    assert_eq!(loads.len(), 1, "second call must reuse loaded capabilities");
    assert_eq!(loads[0], vec!["numpy".to_string(), "toolkit".to_string()]);
}

#[tokio::test]
async fn concurrent_calls_on_one_transport_serialize() {
    let (session, remote) = mock_session();
    let add = build_fn("test_add");

    let args_a = [Value::int(1), Value::int(2)];
    let args_b = [Value::int(3), Value::int(4)];
    let (a, b) = tokio::join!(
        session.invoke(RUNTIME, &add, &args_a),
        session.invoke(RUNTIME, &add, &args_b),
    );
    assert_eq!(a.unwrap(), Value::int(3));
    assert_eq!(b.unwrap(), Value::int(7));
    assert!(
        !remote.saw_overlapping_calls(),
        "at most one call may be in flight per transport instance"
    );
}

#[tokio::test]
async fn refresh_reinitializes_the_same_transport() {
    let (session, remote) = mock_session();
    let add = build_fn("test_add");

    session
        .invoke(RUNTIME, &add, &[Value::int(1), Value::int(2)])
        .await
        .unwrap();
    assert_eq!(remote.initializations(), 1);

    session.refresh(RUNTIME).await.unwrap();
    session
        .invoke(RUNTIME, &add, &[Value::int(3), Value::int(4)])
        .await
        .unwrap();
    assert_eq!(remote.initializations(), 2, "refresh re-bootstraps the page");
}

#[tokio::test]
async fn timeouts_surface_uniformly() {
    let (session, _remote) = mock_session_with_timeout(Duration::from_millis(20));
    let f = build_fn("test_sleep");

    let err = session.invoke(RUNTIME, &f, &[]).await.unwrap_err();
    assert!(err.is_timeout(), "expected a timeout failure, got {err}");
}

#[tokio::test]
async fn scoped_timeout_override_is_restored() {
    let (session, _remote) = mock_session();
    let f = build_fn("test_sleep");

    // Generous override lets the sleeping call finish.
    session
        .invoke_with_timeout(RUNTIME, &f, &[], Duration::from_secs(2))
        .await
        .unwrap();

    let quick = build_fn("test_add");
    session
        .invoke(RUNTIME, &quick, &[Value::int(1), Value::int(1)])
        .await
        .unwrap();
}
