//! The decode/execute module shipped into the remote interpreter.
//!
//! This source is never imported here; it is installed at bootstrap time as
//! the module `_farshore_remote` inside the remote interpreter (see
//! [`crate::script::render_install_script`]). It mirrors the host-side
//! protocol: the same tagged value records, the same blob framing, and the
//! remote half of the handle keep-alive bookkeeping, done as explicit
//! registry bookkeeping rather than pointer games.

pub(crate) const REMOTE_MODULE: &str = r#"
import ast
import base64
import json
import traceback

# address -> [object, keep_alive_count]
_live = {}


class Handle:
    """Marks an object to be handed to the host by reference, not by value.

    The object stays resident here; the host receives an opaque address it
    can pass back into later calls or release.
    """

    def __init__(self, obj):
        self.obj = obj


def keep_alive(address):
    entry = _live.get(address)
    if entry is None:
        raise KeyError(f"no live object at address {address}")
    entry[1] += 1


def release(address):
    entry = _live.get(address)
    if entry is None:
        return
    entry[1] -= 1
    if entry[1] <= 0:
        del _live[address]


def _to_wire(value, seen):
    if value is None:
        return {"kind": "none"}
    if isinstance(value, Handle):
        address = id(value.obj)
        if address not in _live:
            _live[address] = [value.obj, 0]
        if address not in seen:
            # Exactly one keep-alive increment per encode pass, however many
            # times the same object is wrapped in one payload.
            seen.add(address)
            _live[address][1] += 1
        return {"kind": "handle", "address": address, "side": "remote"}
    if isinstance(value, bool):
        return {"kind": "bool", "value": value}
    if isinstance(value, int):
        return {"kind": "int", "value": value}
    if isinstance(value, float):
        return {"kind": "float", "value": value}
    if isinstance(value, str):
        return {"kind": "str", "value": value}
    if isinstance(value, bytes):
        return {"kind": "bytes", "b64": base64.b64encode(value).decode()}
    if isinstance(value, tuple):
        return {"kind": "tuple", "items": [_to_wire(v, seen) for v in value]}
    if isinstance(value, list):
        return {"kind": "list", "items": [_to_wire(v, seen) for v in value]}
    if isinstance(value, set):
        return {"kind": "set", "items": [_to_wire(v, seen) for v in value]}
    if isinstance(value, dict):
        return {
            "kind": "dict",
            "entries": [
                [_to_wire(k, seen), _to_wire(v, seen)] for k, v in value.items()
            ],
        }
    if isinstance(value, BaseException):
        return {
            "kind": "exception",
            "class": type(value).__name__,
            "message": str(value),
            "traceback": "".join(
                traceback.format_exception(type(value), value, value.__traceback__)
            ),
        }
    # Not representable by value: fall back to an implicit reference.
    return _to_wire(Handle(value), seen)


def _from_wire(record):
    kind = record["kind"]
    if kind == "none":
        return None
    if kind in ("bool", "int", "float", "str"):
        return record["value"]
    if kind == "bytes":
        return base64.b64decode(record["b64"])
    if kind == "list":
        return [_from_wire(v) for v in record["items"]]
    if kind == "tuple":
        return tuple(_from_wire(v) for v in record["items"])
    if kind == "set":
        return {_from_wire(v) for v in record["items"]}
    if kind == "dict":
        return {_from_wire(k): _from_wire(v) for k, v in record["entries"]}
    if kind == "handle":
        if record["side"] != "remote":
            raise ValueError("host-side handles cannot be resolved here")
        entry = _live.get(record["address"])
        if entry is None:
            raise KeyError(f"no live object at address {record['address']}")
        return entry[0]
    raise ValueError(f"unexpected wire record kind: {kind}")


def encode(value):
    return base64.b64encode(json.dumps(_to_wire(value, set())).encode()).decode()


def _decode_blob(blob):
    return json.loads(base64.b64decode(blob))


def _name_or_none(name):
    if name is None:
        return None
    return ast.Name(id=name, ctx=ast.Load())


def _make_arg(param):
    if param is None:
        return None
    return ast.arg(arg=param["name"], annotation=_name_or_none(param.get("annotation")))


def _build_function(spec, filename, func_name):
    params = spec["params"]
    arguments = ast.arguments(
        posonlyargs=[_make_arg(p) for p in params.get("posonly", [])],
        args=[_make_arg(p) for p in params.get("args", [])],
        vararg=_make_arg(params.get("vararg")),
        kwonlyargs=[_make_arg(p) for p in params.get("kwonly", [])],
        kw_defaults=[_name_or_none(p.get("default")) for p in params.get("kwonly", [])],
        kwarg=_make_arg(params.get("kwarg")),
        defaults=[
            _name_or_none(p["default"])
            for p in params.get("posonly", []) + params.get("args", [])
            if p.get("default") is not None
        ],
    )

    body = ast.parse(spec["body"], filename, "exec").body
    cls = ast.AsyncFunctionDef if spec["is_async"] else ast.FunctionDef
    funcdef = cls(
        name=spec["name"],
        args=arguments,
        body=body,
        decorator_list=[],
        returns=_name_or_none(params.get("returns")),
        lineno=1,
        col_offset=0,
    )
    statements = [
        ast.Import(names=[ast.alias(name=imp["module"], asname=imp["alias"])])
        for imp in spec.get("supports", [])
    ]
    statements.append(funcdef)
    module = ast.Module(statements, type_ignores=[])
    ast.fix_missing_locations(module)
    # Line numbers map back to the original file; the synthetic header sits
    # just above the first body statement.
    ast.increment_lineno(module, spec["body_line"] - 1)

    namespace = {name: _from_wire(value) for name, value in spec["aux"].items()}
    exec(compile(module, filename, "exec"), namespace)
    return namespace[func_name]


async def run_remote(callable_blob, args_blob, filename, func_name, is_async):
    spec = _decode_blob(callable_blob)
    args = [_from_wire(a) for a in _decode_blob(args_blob)]
    try:
        func = _build_function(spec, filename, func_name)
        result = func(None, *args)
        if is_async:
            result = await result
        return [0, encode(result)]
    except BaseException as error:
        return [1, encode(error)]
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_carries_both_protocol_halves() {
        // The remote half must speak the same record kinds the host emits.
        for kind in [
            "\"kind\": \"none\"",
            "\"kind\": \"handle\"",
            "\"kind\": \"exception\"",
            "\"kind\": \"tuple\"",
        ] {
            assert!(REMOTE_MODULE.contains(kind), "missing {kind}");
        }
        assert!(REMOTE_MODULE.contains("async def run_remote"));
        assert!(REMOTE_MODULE.contains("def release"));
        assert!(REMOTE_MODULE.contains("increment_lineno"));
    }
}
