//! Dependency scanner.
//!
//! Finds module specifiers in source text without a full parse: ES
//! `import`/`export ... from`, `require("...")`, AMD `define([...])` and
//! `System.register([...])` dependency arrays, and the deferred forms
//! `import("...")` and `System.import("...")`. Also detects the module format.

use crate::tree::ModuleFormat;
use regex_lite::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// How a specifier was referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportKind {
    Import,
    ExportFrom,
    Require,
    AmdDependency,
    RegisterDependency,
    DynamicImport,
    SystemImport,
}

impl ImportKind {
    /// Deferred imports are not followed by the tracer.
    #[must_use]
    pub fn is_deferred(self) -> bool {
        matches!(self, Self::DynamicImport | Self::SystemImport)
    }
}

/// A specifier found in source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedImport {
    pub specifier: String,
    pub kind: ImportKind,
    /// 1-based line of the keyword.
    pub line: u32,
}

/// AMD pseudo-dependencies that are supplied by the `define` shim.
const AMD_SPECIAL: [&str; 3] = ["require", "exports", "module"];

/// Scan for every specifier, in first-appearance order.
///
/// Static and deferred references are de-duplicated separately, so a module
/// that is both imported and lazily imported shows up once in each group.
#[must_use]
pub fn scan_imports(source: &str) -> Vec<ScannedImport> {
    let chars: Vec<char> = source.chars().collect();
    let len = chars.len();
    let mut results = Vec::new();
    let mut seen: HashSet<(String, bool)> = HashSet::new();
    let mut line: u32 = 1;
    let mut i = 0;

    let mut push = |results: &mut Vec<ScannedImport>, specifier: String, kind: ImportKind, line: u32| {
        if specifier.is_empty() {
            return;
        }
        if seen.insert((specifier.clone(), kind.is_deferred())) {
            results.push(ScannedImport { specifier, kind, line });
        }
    };

    while i < len {
        let c = chars[i];
        if c == '\n' {
            line += 1;
            i += 1;
            continue;
        }

        if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < len && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        if c == '/' && chars.get(i + 1) == Some(&'*') {
            i += 2;
            while i < len && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                if chars[i] == '\n' {
                    line += 1;
                }
                i += 1;
            }
            i += 2;
            continue;
        }

        if c == '"' || c == '\'' || c == '`' {
            i = skip_string(&chars, i, &mut line);
            continue;
        }

        if matches_keyword(&chars, i, "import") {
            let start_line = line;
            if preceded_by_dot(&chars, i) {
                if preceded_by_system(&chars, i) {
                    if let Some((spec, end)) = scan_call_argument(&chars, i + 6, &mut line) {
                        push(&mut results, spec, ImportKind::SystemImport, start_line);
                        i = end;
                        continue;
                    }
                }
                i += 6;
                continue;
            }
            if let Some((spec, kind, end)) = scan_import_statement(&chars, i + 6, &mut line) {
                push(&mut results, spec, kind, start_line);
                i = end;
                continue;
            }
            i += 6;
            continue;
        }

        if matches_keyword(&chars, i, "export") && !preceded_by_dot(&chars, i) {
            let start_line = line;
            if let Some((spec, end)) = scan_export_from(&chars, i + 6, &mut line) {
                push(&mut results, spec, ImportKind::ExportFrom, start_line);
                i = end;
                continue;
            }
            i += 6;
            continue;
        }

        if matches_keyword(&chars, i, "require") && !preceded_by_dot(&chars, i) {
            let start_line = line;
            if let Some((spec, end)) = scan_call_argument(&chars, i + 7, &mut line) {
                push(&mut results, spec, ImportKind::Require, start_line);
                i = end;
                continue;
            }
            i += 7;
            continue;
        }

        if matches_keyword(&chars, i, "define") && !preceded_by_dot(&chars, i) {
            let start_line = line;
            if let Some((deps, end)) = scan_dependency_array(&chars, i + 6, &mut line) {
                for dep in deps {
                    if !AMD_SPECIAL.contains(&dep.as_str()) {
                        push(&mut results, dep, ImportKind::AmdDependency, start_line);
                    }
                }
                i = end;
                continue;
            }
            i += 6;
            continue;
        }

        let register_len = if matches_keyword(&chars, i, "register") {
            8
        } else if matches_keyword(&chars, i, "registerDynamic") {
            15
        } else {
            0
        };
        if register_len > 0 && preceded_by_system(&chars, i) {
            let start_line = line;
            if let Some((deps, end)) = scan_dependency_array(&chars, i + register_len, &mut line) {
                for dep in deps {
                    push(&mut results, dep, ImportKind::RegisterDependency, start_line);
                }
                i = end;
                continue;
            }
            i += register_len;
            continue;
        }

        i += 1;
    }

    results
}

/// Specifiers the tracer follows for a module of `format`.
#[must_use]
pub fn static_dependencies(source: &str, format: ModuleFormat) -> Vec<String> {
    let wanted = |kind: ImportKind| match format {
        ModuleFormat::Esm => matches!(kind, ImportKind::Import | ImportKind::ExportFrom),
        ModuleFormat::Cjs => kind == ImportKind::Require,
        ModuleFormat::Amd => matches!(kind, ImportKind::AmdDependency | ImportKind::Require),
        ModuleFormat::Register => kind == ImportKind::RegisterDependency,
        ModuleFormat::Global | ModuleFormat::Json => false,
    };
    scan_imports(source)
        .into_iter()
        .filter(|import| wanted(import.kind))
        .map(|import| import.specifier)
        .collect()
}

/// Specifiers referenced through `import()` or `System.import()`.
#[must_use]
pub fn deferred_imports(source: &str) -> Vec<String> {
    scan_imports(source)
        .into_iter()
        .filter(|import| import.kind.is_deferred())
        .map(|import| import.specifier)
        .collect()
}

pub(crate) fn cached_regex(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

/// Guess the module format from source text.
///
/// Checks, in order: `System.register`, top-level ES syntax, AMD `define`,
/// CommonJS markers. Anything else is a global script.
#[must_use]
pub fn detect_format(source: &str) -> ModuleFormat {
    static REGISTER: OnceLock<Option<Regex>> = OnceLock::new();
    static ESM: OnceLock<Option<Regex>> = OnceLock::new();
    static AMD: OnceLock<Option<Regex>> = OnceLock::new();
    static CJS: OnceLock<Option<Regex>> = OnceLock::new();

    let code = strip_comments(source);
    let is = |cell: &'static OnceLock<Option<Regex>>, pattern: &str| {
        cached_regex(cell, pattern).is_some_and(|re| re.is_match(&code))
    };

    if is(&REGISTER, r"(^|[^.\w$])System\.register(Dynamic)?\s*\(") {
        ModuleFormat::Register
    } else if is(
        &ESM,
        r#"(?m)^[ \t]*(import\s*[\w${*'"]|export\s*(default|const|let|var|function|async|class|\{|\*))"#,
    ) {
        ModuleFormat::Esm
    } else if is(&AMD, r"(^|[^.\w$])define\s*\(") {
        ModuleFormat::Amd
    } else if is(&CJS, r"(^|[^.\w$])(require\s*\(|module\.exports|exports\.[\w$]+\s*=)") {
        ModuleFormat::Cjs
    } else {
        ModuleFormat::Global
    }
}

/// Blank out comments, keeping newlines and string contents.
#[must_use]
pub fn strip_comments(source: &str) -> String {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut i = 0;
    let mut quote: Option<char> = None;

    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            out.push(c);
            if c == '\\' {
                if let Some(&next) = chars.get(i + 1) {
                    out.push(next);
                    i += 1;
                }
            } else if c == q || (c == '\n' && q != '`') {
                quote = None;
            }
            i += 1;
            continue;
        }
        match (c, chars.get(i + 1)) {
            ('/', Some('/')) => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            ('/', Some('*')) => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    if chars[i] == '\n' {
                        out.push('\n');
                    }
                    i += 1;
                }
                i += 2;
                out.push(' ');
            }
            ('"' | '\'' | '`', _) => {
                quote = Some(c);
                out.push(c);
                i += 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

fn is_ident(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// `keyword` at `pos` with identifier boundaries on both sides.
fn matches_keyword(chars: &[char], pos: usize, keyword: &str) -> bool {
    let mut end = pos;
    for k in keyword.chars() {
        if chars.get(end) != Some(&k) {
            return false;
        }
        end += 1;
    }
    if pos > 0 && is_ident(chars[pos - 1]) {
        return false;
    }
    !chars.get(end).copied().is_some_and(is_ident)
}

fn preceded_by_dot(chars: &[char], pos: usize) -> bool {
    chars[..pos]
        .iter()
        .rev()
        .find(|c| !c.is_whitespace())
        .is_some_and(|&c| c == '.')
}

fn preceded_by_system(chars: &[char], pos: usize) -> bool {
    let prefix: Vec<char> = "System.".chars().collect();
    pos >= prefix.len()
        && chars[pos - prefix.len()..pos] == prefix[..]
        && (pos == prefix.len() || !is_ident(chars[pos - prefix.len() - 1]))
}

fn skip_whitespace(chars: &[char], mut i: usize, line: &mut u32) -> usize {
    while i < chars.len() && chars[i].is_whitespace() {
        if chars[i] == '\n' {
            *line += 1;
        }
        i += 1;
    }
    i
}

/// Skip past a string literal starting at `start`, returning the index after it.
fn skip_string(chars: &[char], start: usize, line: &mut u32) -> usize {
    let quote = chars[start];
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 1,
            '\n' if quote != '`' => return i,
            '\n' => *line += 1,
            c if c == quote => return i + 1,
            _ => {}
        }
        i += 1;
    }
    i
}

/// Read a quoted literal at `i`. Returns `(contents, index after closing quote)`.
fn read_string(chars: &[char], i: usize) -> Option<(String, usize)> {
    let quote = *chars.get(i)?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let mut value = String::new();
    let mut j = i + 1;
    while j < chars.len() {
        match chars[j] {
            '\\' => {
                if let Some(&next) = chars.get(j + 1) {
                    value.push(next);
                }
                j += 2;
            }
            '\n' => return None,
            c if c == quote => return Some((value, j + 1)),
            c => {
                value.push(c);
                j += 1;
            }
        }
    }
    None
}

/// `( "spec" )` with a single string-literal argument.
fn scan_call_argument(chars: &[char], start: usize, line: &mut u32) -> Option<(String, usize)> {
    let mut scratch = *line;
    let mut i = skip_whitespace(chars, start, &mut scratch);
    if chars.get(i) != Some(&'(') {
        return None;
    }
    i = skip_whitespace(chars, i + 1, &mut scratch);
    let (spec, end) = read_string(chars, i)?;
    let end = skip_whitespace(chars, end, &mut scratch);
    if chars.get(end) != Some(&')') && chars.get(end) != Some(&',') {
        return None;
    }
    *line = scratch;
    Some((spec, end))
}

fn scan_import_statement(
    chars: &[char],
    start: usize,
    line: &mut u32,
) -> Option<(String, ImportKind, usize)> {
    let mut scratch = *line;
    let i = skip_whitespace(chars, start, &mut scratch);

    if chars.get(i) == Some(&'(') {
        let (spec, end) = scan_call_argument(chars, start, line)?;
        return Some((spec, ImportKind::DynamicImport, end));
    }

    // `import "side-effect";`
    if let Some((spec, end)) = read_string(chars, i) {
        *line = scratch;
        return Some((spec, ImportKind::Import, end));
    }

    // `import a, { b } from "spec"`: the clause never contains `;` or quotes.
    let mut j = i;
    while j < chars.len() {
        match chars[j] {
            ';' | '"' | '\'' | '`' | '(' => return None,
            '\n' => scratch += 1,
            _ if matches_keyword(chars, j, "from") => {
                let k = skip_whitespace(chars, j + 4, &mut scratch);
                let (spec, end) = read_string(chars, k)?;
                *line = scratch;
                return Some((spec, ImportKind::Import, end));
            }
            _ => {}
        }
        j += 1;
    }
    None
}

fn scan_export_from(chars: &[char], start: usize, line: &mut u32) -> Option<(String, usize)> {
    let mut scratch = *line;
    let i = skip_whitespace(chars, start, &mut scratch);
    match chars.get(i) {
        Some('{' | '*') => {}
        _ => return None,
    }
    let mut j = i;
    while j < chars.len() {
        match chars[j] {
            ';' | '"' | '\'' | '`' | '(' | '=' => return None,
            '\n' => scratch += 1,
            _ if matches_keyword(chars, j, "from") => {
                let k = skip_whitespace(chars, j + 4, &mut scratch);
                let (spec, end) = read_string(chars, k)?;
                *line = scratch;
                return Some((spec, end));
            }
            _ => {}
        }
        j += 1;
    }
    None
}

/// `( ["a", "b"], ...` or `( "name", ["a", "b"], ...`.
fn scan_dependency_array(chars: &[char], start: usize, line: &mut u32) -> Option<(Vec<String>, usize)> {
    let mut scratch = *line;
    let mut i = skip_whitespace(chars, start, &mut scratch);
    if chars.get(i) != Some(&'(') {
        return None;
    }
    i = skip_whitespace(chars, i + 1, &mut scratch);

    if let Some((_, end)) = read_string(chars, i) {
        i = skip_whitespace(chars, end, &mut scratch);
        if chars.get(i) != Some(&',') {
            return None;
        }
        i = skip_whitespace(chars, i + 1, &mut scratch);
    }

    if chars.get(i) != Some(&'[') {
        return None;
    }
    i += 1;

    let mut deps = Vec::new();
    loop {
        i = skip_whitespace(chars, i, &mut scratch);
        match chars.get(i) {
            Some(']') => {
                *line = scratch;
                return Some((deps, i + 1));
            }
            Some(',') => i += 1,
            _ => {
                let (dep, end) = read_string(chars, i)?;
                deps.push(dep);
                i = end;
            }
        }
    }
}
