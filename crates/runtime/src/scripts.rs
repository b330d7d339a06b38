//! Bootstrap script constants and script-text helpers shared by backends.

/// Page setup run before the interpreter loads: deep stack traces, a stable
/// `globalThis`, small helpers for tests, and a log sink the backends can
/// drain.
pub const SETUP_SCRIPT: &str = r#"
Error.stackTraceLimit = Infinity;

// globalThis is broken in some Firefox builds, fall back to window.
globalThis.globalThis = globalThis.window || globalThis;

self.logs = self.logs || [];
if (!self.__consoleHooked) {
    self.__consoleHooked = true;
    const original = console.log.bind(console);
    console.log = function (...args) {
        self.logs.push(args.map(String).join(" "));
        original(...args);
    };
}

globalThis.sleep = function (s) {
    return new Promise((resolve) => setTimeout(resolve, s));
};

globalThis.assert = function (cb, message = "") {
    if (message !== "") {
        message = "\n" + message;
    }
    if (cb() !== true) {
        throw new Error(`Assertion failed: ${cb.toString().slice(6)}${message}`);
    }
};

globalThis.assertAsync = async function (cb, message = "") {
    if (message !== "") {
        message = "\n" + message;
    }
    if ((await cb()) !== true) {
        throw new Error(`Assertion failed: ${cb.toString().slice(12)}${message}`);
    }
};
"#;

/// Default script loading the interpreter runtime and storing its handle.
pub const DEFAULT_LOAD_SCRIPT: &str = r#"
let interp = await loadInterpreter({ fullStdLib: false, jsglobals: self });
self.interp = interp;
globalThis.interp = interp;
"#;

/// Installs the helper that converts interpreter results into plain JS
/// values, destroying any proxy so nothing leaks across calls.
pub const RESULT_HANDLER_SCRIPT: &str = r#"
self.interp.$handleResult = function (result) {
    if (!(result && result.toJs)) {
        return result;
    }
    let converted = result.toJs();
    if (converted && converted.toJs) {
        converted = undefined;
    }
    result.destroy();
    return converted;
};
return true;
"#;

/// Default warm-up run once after loading.
pub const DEFAULT_INITIALIZE_SCRIPT: &str = "self.interp.runScript('');";

/// Script ensuring the named packages are available remotely.
pub fn load_capability_script(names: &[String]) -> String {
    let list = names
        .iter()
        .map(|n| js_string_literal(n))
        .collect::<Vec<_>>()
        .join(", ");
    format!("await self.interp.loadBundle([{list}]);\nreturn true;")
}

/// Renders `s` as a double-quoted JavaScript string literal.
pub fn js_string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Interprets the `[status, ...]` array produced by the backend-side
/// try/catch wrappers: `[0, value]` on success, `[1, message, stack]` when
/// the script threw.
pub fn classify_wrapped_result(value: serde_json::Value) -> crate::Result<serde_json::Value> {
    let Some(parts) = value.as_array() else {
        return Err(crate::Error::Transport(format!(
            "wrapper returned a non-array result: {value}"
        )));
    };
    match parts.first().and_then(|v| v.as_i64()) {
        Some(0) => Ok(parts.get(1).cloned().unwrap_or(serde_json::Value::Null)),
        Some(1) => {
            let message = parts
                .get(1)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let stack = parts
                .get(2)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            Err(crate::Error::remote_script(message, stack))
        }
        _ => Err(crate::Error::Transport(format!(
            "wrapper returned an unrecognized status: {value}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn js_literal_escapes_control_and_quote_characters() {
        assert_eq!(
            js_string_literal("a\"b\\c\nd\te"),
            "\"a\\\"b\\\\c\\nd\\te\""
        );
        assert_eq!(js_string_literal("plain"), "\"plain\"");
        assert_eq!(js_string_literal("\u{1}"), "\"\\u0001\"");
    }

    #[test]
    fn classify_unwraps_success() {
        let value = serde_json::json!([0, {"x": 1}]);
        assert_eq!(
            classify_wrapped_result(value).unwrap(),
            serde_json::json!({"x": 1})
        );
    }

    #[test]
    fn classify_turns_failure_into_remote_script_error() {
        let value = serde_json::json!([1, "Error: nope", "Error: nope\n  at x"]);
        let err = classify_wrapped_result(value).unwrap_err();
        match err {
            crate::Error::RemoteScript { message, stack } => {
                assert!(message.is_empty(), "message folded into stack");
                assert_eq!(stack.as_deref(), Some("Error: nope\n  at x"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn classify_rejects_garbage() {
        assert!(classify_wrapped_result(serde_json::json!("huh")).is_err());
        assert!(classify_wrapped_result(serde_json::json!([7, "x"])).is_err());
    }

    #[test]
    fn capability_script_quotes_names() {
        let script = load_capability_script(&["numpy".to_string(), "tool-kit".to_string()]);
        assert!(script.contains("[\"numpy\", \"tool-kit\"]"));
    }
}
