//! Generation of the script bodies handed to a transport.
//!
//! Every payload that reaches a script is text-safe (base64 or escaped
//! literals), so envelopes can be interpolated without quoting surprises.

use farshore_protocol::Envelope;
use farshore_runtime::scripts::js_string_literal;

use crate::remote_module::REMOTE_MODULE;

/// Renders `s` as a single-quoted interpreter string literal.
pub(crate) fn py_string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Script installing the `_farshore_remote` module into the interpreter.
pub(crate) fn render_install_script() -> String {
    let install = format!(
        "def _farshore_install():\n\
         \x20   from importlib.machinery import ModuleSpec\n\
         \x20   from importlib.util import module_from_spec\n\
         \x20   import sys\n\
         \x20   mod = module_from_spec(ModuleSpec('_farshore_remote', None))\n\
         \x20   exec({source}, mod.__dict__)\n\
         \x20   sys.modules['_farshore_remote'] = mod\n\
         _farshore_install()\n\
         del _farshore_install\n",
        source = py_string_literal(REMOTE_MODULE),
    );
    format!(
        "self.interp.runScript({});\nreturn true;",
        js_string_literal(&install)
    )
}

/// Script running one envelope and producing the `[status, payload]` pair.
pub(crate) fn render_call_script(envelope: &Envelope) -> String {
    // Blob fields are base64 and safe inside single quotes verbatim.
    let code = format!(
        "from _farshore_remote import run_remote\n\
         await run_remote(\n\
         \x20   '{callable}',\n\
         \x20   '{args}',\n\
         \x20   {filename},\n\
         \x20   {func_name},\n\
         \x20   {is_async},\n\
         )",
        callable = envelope.callable,
        args = envelope.args,
        filename = py_string_literal(&envelope.filename),
        func_name = py_string_literal(&envelope.func_name),
        is_async = if envelope.is_async { "True" } else { "False" },
    );
    format!(
        "let code = {};\n\
         let result = await self.interp.runScriptAsync(code);\n\
         return self.interp.$handleResult(result);",
        js_string_literal(&code)
    )
}

/// Script routing one keep-alive decrement to the remote side.
pub(crate) fn render_release_script(address: u64) -> String {
    let code = format!("from _farshore_remote import release\nrelease({address})");
    format!(
        "self.interp.runScript({});\nreturn true;",
        js_string_literal(&code)
    )
}
