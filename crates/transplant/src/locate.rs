//! Locating the target function node in a module tree.

use rustpython_parser::ast::{Arguments, Stmt, StmtKind};

use crate::callable::SupportImport;
use crate::error::{Error, Result};

/// The pieces of a located function definition node.
pub(crate) struct FnParts<'a> {
    pub args: &'a Arguments,
    pub body: &'a [Stmt],
    pub is_async: bool,
}

/// Statement kinds we descend into when their span covers the target line.
fn body_of(kind: &StmtKind) -> Option<&Vec<Stmt>> {
    match kind {
        StmtKind::FunctionDef { body, .. }
        | StmtKind::AsyncFunctionDef { body, .. }
        | StmtKind::ClassDef { body, .. }
        | StmtKind::With { body, .. }
        | StmtKind::AsyncWith { body, .. }
        | StmtKind::If { body, .. }
        | StmtKind::While { body, .. }
        | StmtKind::For { body, .. }
        | StmtKind::AsyncFor { body, .. }
        | StmtKind::Try { body, .. } => Some(body),
        _ => None,
    }
}

/// Finds the function definition for `name` starting at or after `line`,
/// collecting the import-rewriting marker statements that must precede it.
///
/// `line` is the 1-based starting line of the decorated function (its first
/// decorator, the way a live function object reports it), so the matching
/// `def` node begins at or after it. When a candidate statement's span covers
/// the target line we descend into its body; this finds functions nested
/// inside wrapper definitions.
pub(crate) fn locate<'a>(
    module: &'a [Stmt],
    name: &str,
    line: u32,
    filename: &str,
) -> Result<(Vec<SupportImport>, FnParts<'a>)> {
    let mut supports = Vec::new();
    let mut stmts = module;

    'scan: loop {
        for node in stmts {
            // Magic imports inserted by assertion rewriting carry an alias
            // starting with '@'; they must travel with the function.
            if let StmtKind::Import { names } = &node.node {
                if let Some(alias) = names.first() {
                    if let Some(asname) = &alias.node.asname {
                        if asname.starts_with('@') {
                            supports.push(SupportImport {
                                module: alias.node.name.clone(),
                                alias: asname.clone(),
                            });
                        }
                    }
                }
            }

            let start = node.location.row() as u32;
            let end = node
                .end_location
                .map(|loc| loc.row() as u32)
                .unwrap_or(start);
            if start < line && end > line {
                if let Some(body) = body_of(&node.node) {
                    stmts = body;
                    continue 'scan;
                }
            }

            let (found, args, body, is_async) = match &node.node {
                StmtKind::FunctionDef {
                    name, args, body, ..
                } => (name.as_str(), args.as_ref(), body.as_slice(), false),
                StmtKind::AsyncFunctionDef {
                    name, args, body, ..
                } => (name.as_str(), args.as_ref(), body.as_slice(), true),
                _ => continue,
            };

            if start < line {
                continue;
            }
            if found != name {
                return Err(Error::NameMismatch {
                    expected: name.to_string(),
                    found: found.to_string(),
                    line,
                });
            }
            return Ok((
                supports,
                FnParts {
                    args,
                    body,
                    is_async,
                },
            ));
        }

        return Err(Error::Location {
            name: name.to_string(),
            line,
            filename: filename.to_string(),
        });
    }
}
