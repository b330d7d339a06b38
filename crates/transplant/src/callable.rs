//! The transplanted function representation and the extraction transform.

use std::collections::BTreeMap;

use rustpython_parser::parser::parse_program;
use serde::{Deserialize, Serialize};

use farshore_protocol::Value;

use crate::RESERVED_PREFIX;
use crate::error::{Error, Result};
use crate::facts::{FunctionFacts, RETURN_KEY};
use crate::locate::locate;

/// A supporting top-level import statement that must precede the function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportImport {
    pub module: String,
    /// Alias the module is bound to; marker aliases begin with '@' and are
    /// only expressible as tree nodes, never as source text.
    pub alias: String,
}

/// One parameter slot after the rewrite. Annotation and default carry
/// auxiliary-table names instead of values or expressions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl Param {
    fn plain(name: &str) -> Self {
        Param {
            name: name.to_string(),
            annotation: None,
            default: None,
        }
    }
}

/// The full rewritten parameter list, preserving every binding class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub posonly: Vec<Param>,
    pub args: Vec<Param>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vararg: Option<Param>,
    pub kwonly: Vec<Param>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kwarg: Option<Param>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returns: Option<String>,
}

impl ParamSpec {
    /// Parameter names in declaration order: positional-only, positional,
    /// vararg, keyword-only, kwarg.
    pub fn all_names(&self) -> Vec<&str> {
        self.posonly
            .iter()
            .chain(self.args.iter())
            .chain(self.vararg.iter())
            .chain(self.kwonly.iter())
            .chain(self.kwarg.iter())
            .map(|p| p.name.as_str())
            .collect()
    }

    /// Name of the remote-context parameter (the first one).
    pub fn context_name(&self) -> Option<&str> {
        self.all_names().first().copied()
    }

    /// Number of positional slots after the context parameter, or `None`
    /// when a vararg makes the function accept arbitrarily many.
    pub fn positional_capacity(&self) -> Option<usize> {
        if self.vararg.is_some() {
            None
        } else {
            Some(self.posonly.len() + self.args.len() - 1)
        }
    }

    /// Number of positional arguments (after the context parameter) that
    /// must be supplied because they carry no default.
    pub fn required_positional(&self) -> usize {
        let without_default = self
            .posonly
            .iter()
            .chain(self.args.iter())
            .filter(|p| p.default.is_none())
            .count();
        without_default.saturating_sub(1)
    }
}

/// Mapping from synthetic, guaranteed-unique names to captured host values.
///
/// Names use the `v-N` shape, which is deliberately not a valid identifier:
/// nothing in the transplanted body can collide with or shadow an entry. The
/// remote side executes the rebuilt tree in a namespace seeded with these
/// entries, and the rewritten slots load them by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuxValueTable {
    entries: BTreeMap<String, Value>,
}

impl AuxValueTable {
    /// Stores a value and returns the synthetic name that now refers to it.
    pub fn intern(&mut self, value: Value) -> String {
        let name = format!("v-{}", self.entries.len());
        self.entries.insert(name.clone(), value);
        name
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// The part of a function definition reproducible verbatim on the other
/// side: rewritten header as structure, body as source with its original
/// line offset, and the captured values the rewritten slots refer to.
///
/// Built once at decoration time and immutable afterwards; safe to reuse
/// across repeated calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCallable {
    /// Statements that must precede the definition, in order.
    pub supports: Vec<SupportImport>,
    pub name: String,
    pub params: ParamSpec,
    /// Dedented body source. Compiled remotely, not interpreted here.
    pub body: String,
    /// 1-based line of the first body statement in the original file.
    pub body_line: u32,
    pub filename: String,
    pub is_async: bool,
    pub aux: AuxValueTable,
}

/// Extracts `name` from `source`, producing a standalone callable.
///
/// `line` is the function's 1-based starting line as reported by the live
/// function object (the first decorator line for decorated functions).
/// `facts` carries the decoration-time default/annotation values and any
/// injected rewrite markers.
pub fn extract(
    source: &str,
    filename: &str,
    name: &str,
    line: u32,
    facts: &FunctionFacts,
) -> Result<RemoteCallable> {
    let module = parse_program(source, filename).map_err(|e| Error::Parse {
        filename: filename.to_string(),
        detail: e.to_string(),
    })?;

    let (mut supports, parts) = locate(&module, name, line, filename)?;
    supports.extend(facts.rewrite_markers.iter().cloned());

    let mut posonly: Vec<Param> = parts
        .args
        .posonlyargs
        .iter()
        .map(|a| Param::plain(&a.node.arg))
        .collect();
    let mut args: Vec<Param> = parts
        .args
        .args
        .iter()
        .map(|a| Param::plain(&a.node.arg))
        .collect();
    let mut vararg = parts
        .args
        .vararg
        .as_deref()
        .map(|a| Param::plain(&a.node.arg));
    let mut kwonly: Vec<Param> = parts
        .args
        .kwonlyargs
        .iter()
        .map(|a| Param::plain(&a.node.arg))
        .collect();
    let mut kwarg = parts
        .args
        .kwarg
        .as_deref()
        .map(|a| Param::plain(&a.node.arg));

    check_context_param(name, &posonly, &args, &vararg, &kwonly, &kwarg)?;

    // Move the live values into the table, slot by slot, in declaration
    // order so table names are deterministic.
    let mut aux = AuxValueTable::default();
    for param in posonly
        .iter_mut()
        .chain(args.iter_mut())
        .chain(vararg.iter_mut())
        .chain(kwonly.iter_mut())
        .chain(kwarg.iter_mut())
    {
        if let Some(value) = facts.annotations.get(&param.name) {
            param.annotation = Some(aux.intern(value.clone()));
        }
    }
    let returns = facts
        .annotations
        .get(RETURN_KEY)
        .map(|value| aux.intern(value.clone()));

    // Defaults align to the tail of the combined positional list.
    let positional_len = posonly.len() + args.len();
    if facts.defaults.len() > positional_len {
        return Err(Error::Facts {
            name: name.to_string(),
            detail: format!(
                "{} default values for {} positional parameters",
                facts.defaults.len(),
                positional_len
            ),
        });
    }
    let offset = positional_len - facts.defaults.len();
    for (i, value) in facts.defaults.iter().enumerate() {
        let index = offset + i;
        let param = if index < posonly.len() {
            &mut posonly[index]
        } else {
            &mut args[index - posonly.len()]
        };
        param.default = Some(aux.intern(value.clone()));
    }
    for param in kwonly.iter_mut() {
        if let Some(value) = facts.kwdefaults.get(&param.name) {
            param.default = Some(aux.intern(value.clone()));
        }
    }

    let (body, body_line) = extract_body(source, parts.body, name)?;

    Ok(RemoteCallable {
        supports,
        name: name.to_string(),
        params: ParamSpec {
            posonly,
            args,
            vararg,
            kwonly,
            kwarg,
            returns,
        },
        body,
        body_line,
        filename: filename.to_string(),
        is_async: parts.is_async,
        aux,
    })
}

fn check_context_param(
    name: &str,
    posonly: &[Param],
    args: &[Param],
    vararg: &Option<Param>,
    kwonly: &[Param],
    kwarg: &Option<Param>,
) -> Result<()> {
    let first = posonly
        .first()
        .or(args.first())
        .or(vararg.as_ref())
        .or(kwonly.first())
        .or(kwarg.as_ref());
    match first {
        Some(param) if param.name.starts_with(RESERVED_PREFIX) => Ok(()),
        Some(param) => Err(Error::Signature {
            name: name.to_string(),
            prefix: RESERVED_PREFIX,
            found: Some(param.name.clone()),
        }),
        None => Err(Error::Signature {
            name: name.to_string(),
            prefix: RESERVED_PREFIX,
            found: None,
        }),
    }
}

/// Slices the body's source lines out of the module and dedents them,
/// keeping the 1-based line of the first statement so the remote side can
/// restore original line numbers.
fn extract_body(
    source: &str,
    body: &[rustpython_parser::ast::Stmt],
    name: &str,
) -> Result<(String, u32)> {
    let first = body.first().ok_or_else(|| Error::Facts {
        name: name.to_string(),
        detail: "function has an empty body".to_string(),
    })?;
    let last = body.last().unwrap_or(first);

    let start = first.location.row();
    let end = last
        .end_location
        .map(|loc| loc.row())
        .unwrap_or(start)
        .max(start);

    let lines: Vec<&str> = source.lines().collect();
    if start == 0 || start > lines.len() {
        return Err(Error::Facts {
            name: name.to_string(),
            detail: format!("body start line {start} outside module source"),
        });
    }
    let slice = &lines[start - 1..end.min(lines.len())];

    let indent = slice
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    let dedented: Vec<&str> = slice
        .iter()
        .map(|l| {
            if l.trim().is_empty() {
                ""
            } else {
                &l[indent.min(l.len())..]
            }
        })
        .collect();

    Ok((dedented.join("\n"), start as u32))
}
