//! Module bodies.
//!
//! Every module ends up as the body of a `function (require, exports, module)`
//! factory. CommonJS and JSON need almost nothing; AMD gets a local `define`;
//! globals get their `exports` wired up; ES modules are lowered to CommonJS
//! with live bindings by [`super::esm`]. Source lines stay one-to-one with
//! body lines so the source map can point back at them.

use super::{esm, js_string};
use crate::error::Result;
use crate::scan::cached_regex;
use crate::sourcemap::is_ident_char;
use crate::tree::{ModuleFormat, TreeNode};
use regex_lite::{Captures, Regex};
use std::sync::OnceLock;

pub(crate) const GLOBAL_OBJECT: &str = r#"typeof globalThis !== "undefined" ? globalThis : typeof self !== "undefined" ? self : typeof window !== "undefined" ? window : typeof global !== "undefined" ? global : {}"#;

const AMD_DEFINE: &str = r#"var define = function (a, b, c) { if (typeof a === "string") { a = b; b = c; } var deps = Array.isArray(a) ? a : ["require", "exports", "module"]; var factory = Array.isArray(a) ? b : a; var result = typeof factory === "function" ? factory.apply(exports, deps.map(function (d) { return d === "require" ? require : d === "exports" ? exports : d === "module" ? module : require(d); })) : factory; if (result !== undefined) module.exports = result; }; define.amd = {};"#;

/// Where a body line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Origin {
    /// Zero-based line in the module source.
    pub line: u32,
    /// `true` when the text is unchanged, so columns match too.
    pub verbatim: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Line {
    pub text: String,
    pub origin: Option<Origin>,
}

impl Line {
    pub(crate) fn synthetic(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            origin: None,
        }
    }

    pub(crate) fn verbatim(text: impl Into<String>, line: usize) -> Self {
        Self::from_source(text.into(), line, true)
    }

    pub(crate) fn rewritten(text: impl Into<String>, line: usize) -> Self {
        Self::from_source(text.into(), line, false)
    }

    fn from_source(text: String, line: usize, verbatim: bool) -> Self {
        Self {
            text,
            origin: Some(Origin {
                line: u32::try_from(line).unwrap_or(u32::MAX),
                verbatim,
            }),
        }
    }
}

/// Body of the factory for `node`.
pub(crate) fn module_body(node: &TreeNode, normalize: bool) -> Result<Vec<Line>> {
    let lines = match node.metadata.format {
        ModuleFormat::Esm => return esm::lower(node, normalize),
        ModuleFormat::Cjs => script_lines(node, normalize),
        ModuleFormat::Amd => {
            let mut lines = vec![Line::synthetic(AMD_DEFINE)];
            lines.extend(script_lines(node, normalize));
            lines
        }
        ModuleFormat::Global => global_body(node, normalize),
        ModuleFormat::Json => json_body(node),
        ModuleFormat::Register => node
            .source
            .lines()
            .enumerate()
            .map(|(i, text)| Line::verbatim(text, i))
            .collect(),
    };
    Ok(lines)
}

pub(super) fn require_target<'a>(node: &'a TreeNode, written: &'a str, normalize: bool) -> &'a str {
    if normalize {
        node.dependency_map
            .get(written)
            .map_or(written, String::as_str)
    } else {
        written
    }
}

fn script_lines(node: &TreeNode, normalize: bool) -> Vec<Line> {
    node.source
        .lines()
        .enumerate()
        .map(|(i, text)| {
            match normalize.then(|| normalize_requires(node, text)).flatten() {
                Some(rewritten) => Line::rewritten(rewritten, i),
                None => Line::verbatim(text, i),
            }
        })
        .collect()
}

/// Point `require("written")` calls at resolved names. `None` when the line
/// has nothing to rewrite.
fn normalize_requires(node: &TreeNode, line: &str) -> Option<String> {
    static REQUIRE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = cached_regex(
        &REQUIRE,
        r#"\brequire\s*\(\s*(?:"([^"\n]*)"|'([^'\n]*)')\s*\)"#,
    )?;
    if !re.is_match(line) {
        return None;
    }
    let out = re.replace_all(line, |caps: &Captures<'_>| {
        let written = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
        match node.dependency_map.get(written) {
            Some(resolved) => format!("require({})", js_string(resolved)),
            None => caps[0].to_string(),
        }
    });
    (out != line).then(|| out.into_owned())
}

fn global_body(node: &TreeNode, normalize: bool) -> Vec<Line> {
    let mut lines: Vec<Line> = node
        .dependencies
        .iter()
        .filter(|written| node.dependency_map.contains_key(written.as_str()))
        .map(|written| {
            Line::synthetic(format!(
                "require({});",
                js_string(require_target(node, written, normalize))
            ))
        })
        .collect();
    let Some(name) = node.metadata.exports.as_deref() else {
        lines.extend(node.source.lines().enumerate().map(|(i, t)| Line::verbatim(t, i)));
        return lines;
    };

    lines.push(Line::synthetic(format!("var __fpGlobal = {GLOBAL_OBJECT};")));
    lines.extend(node.source.lines().enumerate().map(|(i, t)| Line::verbatim(t, i)));
    if is_identifier(name) {
        lines.push(Line::synthetic(format!(
            "if (typeof {name} !== \"undefined\") __fpGlobal[{}] = {name};",
            js_string(name)
        )));
    }
    lines.push(Line::synthetic(format!(
        "module.exports = {}.split(\".\").reduce(function (o, k) {{ return o == null ? o : o[k]; }}, __fpGlobal);",
        js_string(name)
    )));
    lines
}

fn json_body(node: &TreeNode) -> Vec<Line> {
    let source: Vec<&str> = node.source.trim_end().lines().collect();
    if source.is_empty() {
        return vec![Line::synthetic("module.exports = null;")];
    }
    let last = source.len() - 1;
    source
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let mut out = String::with_capacity(text.len() + 20);
            if i == 0 {
                out.push_str("module.exports = ");
            }
            out.push_str(text);
            if i == last {
                out.push(';');
            }
            if i == 0 || i == last {
                Line::rewritten(out, i)
            } else {
                Line::verbatim(out, i)
            }
        })
        .collect()
}

pub(super) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(is_ident_start) && chars.all(is_ident_char)
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}
