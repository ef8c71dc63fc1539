//! ES module lowering.
//!
//! The module is parsed with swc and run through the scope resolver, so a
//! reference to an imported binding is told apart from a parameter or local
//! of the same name by its syntax context. Import and export statements are
//! replaced in place and reads of imported bindings become member reads on
//! the required module, which keeps them live. Edits never add or remove a
//! newline, so body line `n` is still source line `n`.

use super::js_string;
use super::transform::{is_identifier, require_target, Line};
use crate::error::{BuilderError, Result};
use crate::tree::TreeNode;
use rustc_hash::{FxHashMap, FxHashSet};
use swc_common::{sync::Lrc, BytePos, FileName, Globals, Mark, SourceMap, Span, Spanned, GLOBALS};
use swc_ecma_ast::{
    BindingIdent, CallExpr, Callee, Decl, DefaultDecl, EsVersion, ExportSpecifier, Expr, Id,
    ImportDecl, ImportSpecifier, ModuleDecl, ModuleExportName, ModuleItem, Program, Prop, Str,
};
use swc_ecma_parser::{lexer::Lexer, EsSyntax, Parser, StringInput, Syntax};
use swc_ecma_transforms_base::resolver;
use swc_ecma_visit::{FoldWith, Visit, VisitWith};

pub(crate) const INTEROP: &str = r#"function __interop(m) { if (m && m.__esModule) return m; var ns = Object.create(m !== null && (typeof m === "object" || typeof m === "function") ? m : null); ns["default"] = m; return ns; }"#;

pub(crate) const EXPORT_STAR: &str = r#"function __exportStar(m) { Object.keys(m).forEach(function (k) { if (k !== "default" && k !== "__esModule" && !Object.prototype.hasOwnProperty.call(exports, k)) Object.defineProperty(exports, k, { enumerable: true, get: function () { return m[k]; } }); }); }"#;

/// Lower an ES module to a CommonJS factory body.
///
/// Exports become getters defined before any module code runs, so a module
/// that requires this one while it is still executing (a cycle) already sees
/// every export name and reads its current value.
///
/// # Errors
///
/// Returns an assembly error when the source does not parse as a module or
/// uses a module declaration that has no CommonJS form.
pub(crate) fn lower(node: &TreeNode, normalize: bool) -> Result<Vec<Line>> {
    let fail = |message: String| BuilderError::assembly(Some(node.name.as_str()), message);

    let cm: Lrc<SourceMap> = Default::default();
    let fm = cm.new_source_file(
        Lrc::new(FileName::Custom(node.name.clone())),
        node.source.clone(),
    );
    let lexer = Lexer::new(
        Syntax::Es(EsSyntax::default()),
        EsVersion::EsNext,
        StringInput::from(&*fm),
        None,
    );
    let mut parser = Parser::new_from(lexer);
    let lines = LineIndex::new(&node.source, fm.start_pos);

    let module = parser.parse_module().map_err(|e| {
        fail(format!(
            "cannot parse ES module: {:?} at line {}",
            e.kind(),
            lines.line_of_pos(e.span().lo) + 1
        ))
    })?;
    if let Some(e) = parser.take_errors().into_iter().next() {
        return Err(fail(format!(
            "cannot parse ES module: {:?} at line {}",
            e.kind(),
            lines.line_of_pos(e.span().lo) + 1
        )));
    }

    let program = GLOBALS.set(&Globals::default(), || {
        let unresolved_mark = Mark::new();
        let top_level_mark = Mark::new();
        Program::Module(module).fold_with(&mut resolver(unresolved_mark, top_level_mark, false))
    });
    let Program::Module(module) = program else {
        return Err(fail("ES module parsed as a script".to_string()));
    };

    let mut lowering = Lowering {
        node,
        normalize,
        lines: &lines,
        edits: Vec::new(),
        bindings: FxHashMap::default(),
        imported: FxHashMap::default(),
        exports: Vec::new(),
        temps: 0,
        interop: false,
        export_star: false,
    };
    for item in &module.body {
        if let ModuleItem::ModuleDecl(decl) = item {
            lowering.lower_decl(decl).map_err(|message| {
                fail(format!(
                    "{message} at line {}",
                    lines.line_of_pos(decl.span().lo) + 1
                ))
            })?;
        }
    }
    if !lowering.bindings.is_empty() {
        let mut reads = BindingReads {
            bindings: &lowering.bindings,
            lines: &lines,
            edits: Vec::new(),
        };
        module.visit_with(&mut reads);
        lowering.edits.extend(reads.edits);
    }

    Ok(lowering.finish())
}

/// A replacement of `start..end` in the module source.
#[derive(Debug)]
struct Edit {
    start: usize,
    end: usize,
    text: String,
}

/// Byte offsets and line starts of one source file.
struct LineIndex<'a> {
    source: &'a str,
    base: u32,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(source: &'a str, base: BytePos) -> Self {
        let starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            source,
            base: base.0,
            starts,
        }
    }

    fn offset(&self, pos: BytePos) -> usize {
        (pos.0.saturating_sub(self.base) as usize).min(self.source.len())
    }

    fn line_of(&self, offset: usize) -> usize {
        self.starts.partition_point(|&s| s <= offset).saturating_sub(1)
    }

    fn line_of_pos(&self, pos: BytePos) -> usize {
        self.line_of(self.offset(pos))
    }

    /// An edit replacing `start..end` with `text`, padded with the newlines
    /// it removes.
    fn edit(&self, start: usize, end: usize, text: String) -> Edit {
        let mut text = text;
        let removed = self.source.get(start..end).unwrap_or_default();
        text.extend(removed.matches('\n').map(|_| '\n'));
        Edit { start, end, text }
    }

    fn span_edit(&self, span: Span, text: String) -> Edit {
        self.edit(self.offset(span.lo), self.offset(span.hi), text)
    }

    /// End of the leading `words` (and the whitespace after them) at `start`.
    fn after_keywords(&self, start: usize, words: &[&str]) -> usize {
        let mut at = start;
        for word in words.iter().copied().chain(std::iter::once("")) {
            let rest = &self.source[at..];
            at += rest.len() - rest.trim_start().len();
            if !word.is_empty() && self.source[at..].starts_with(word) {
                at += word.len();
            }
        }
        at
    }
}

struct Lowering<'a> {
    node: &'a TreeNode,
    normalize: bool,
    lines: &'a LineIndex<'a>,
    edits: Vec<Edit>,
    /// Imported binding to the expression that reads it.
    bindings: FxHashMap<Id, String>,
    /// The same reads by local name, for export lists.
    imported: FxHashMap<String, String>,
    /// Exported name to the expression backing it, in source order.
    exports: Vec<(String, String)>,
    temps: usize,
    interop: bool,
    export_star: bool,
}

impl Lowering<'_> {
    fn temp(&mut self) -> String {
        let name = format!("__fp{}", self.temps);
        self.temps += 1;
        name
    }

    fn require(&self, src: &Str) -> String {
        format!(
            "require({})",
            js_string(require_target(self.node, &src.value, self.normalize))
        )
    }

    fn replace(&mut self, span: Span, text: String) {
        let edit = self.lines.span_edit(span, text);
        self.edits.push(edit);
    }

    /// Replace the leading `words` of `span` with `text`.
    fn replace_keywords(&mut self, span: Span, words: &[&str], text: &str) {
        let start = self.lines.offset(span.lo);
        let end = self.lines.after_keywords(start, words);
        let edit = self.lines.edit(start, end, text.to_string());
        self.edits.push(edit);
    }

    fn bind(&mut self, local: &swc_ecma_ast::Ident, read: String) {
        self.imported.insert(local.sym.to_string(), read.clone());
        self.bindings.insert(local.to_id(), read);
    }

    fn lower_decl(&mut self, decl: &ModuleDecl) -> std::result::Result<(), String> {
        match decl {
            ModuleDecl::Import(import) => self.lower_import(import),
            ModuleDecl::ExportDecl(export) => {
                let names = declared_names(&export.decl);
                if names.is_empty() {
                    return Err("export declaration without a name".to_string());
                }
                self.exports.extend(names.into_iter().map(|n| (n.clone(), n)));
                self.replace_keywords(export.span, &["export"], "");
            }
            ModuleDecl::ExportDefaultDecl(export) => {
                let ident = match &export.decl {
                    DefaultDecl::Fn(f) => f.ident.as_ref(),
                    DefaultDecl::Class(c) => c.ident.as_ref(),
                    DefaultDecl::TsInterfaceDecl(_) => {
                        return Err("unsupported export default".to_string())
                    }
                };
                match ident {
                    Some(ident) => {
                        self.exports.push(("default".to_string(), ident.sym.to_string()));
                        self.replace_keywords(export.span, &["export", "default"], "");
                    }
                    None => {
                        self.exports.push(("default".to_string(), "__default".to_string()));
                        self.replace_keywords(export.span, &["export", "default"], "var __default = ");
                        let end = self.lines.offset(export.span.hi);
                        self.edits.push(self.lines.edit(end, end, ";".to_string()));
                    }
                }
            }
            ModuleDecl::ExportDefaultExpr(export) => {
                self.exports.push(("default".to_string(), "__default".to_string()));
                self.replace_keywords(export.span, &["export", "default"], "var __default = ");
            }
            ModuleDecl::ExportNamed(named) => {
                let Some(src) = &named.src else {
                    for spec in &named.specifiers {
                        if let ExportSpecifier::Named(spec) = spec {
                            let local = export_name(&spec.orig);
                            let exported = spec.exported.as_ref().map_or_else(|| local.clone(), export_name);
                            let read = self.imported.get(&local).cloned().unwrap_or(local);
                            self.exports.push((exported, read));
                        }
                    }
                    self.replace(named.span, String::new());
                    return Ok(());
                };
                let var = self.temp();
                for spec in &named.specifiers {
                    let (exported, read) = match spec {
                        ExportSpecifier::Named(spec) => {
                            let orig = export_name(&spec.orig);
                            let exported = spec.exported.as_ref().map_or_else(|| orig.clone(), export_name);
                            (exported, member(&var, &orig))
                        }
                        ExportSpecifier::Namespace(ns) => (export_name(&ns.name), var.clone()),
                        ExportSpecifier::Default(d) => (d.exported.sym.to_string(), format!("{var}.default")),
                    };
                    self.exports.push((exported, read));
                }
                self.interop = true;
                let text = format!("var {var} = __interop({});", self.require(src));
                self.replace(named.span, text);
            }
            ModuleDecl::ExportAll(all) => {
                self.export_star = true;
                let text = format!("__exportStar({});", self.require(&all.src));
                self.replace(all.span, text);
            }
            _ => return Err("unsupported module declaration".to_string()),
        }
        Ok(())
    }

    fn lower_import(&mut self, import: &ImportDecl) {
        if import.specifiers.is_empty() {
            let text = format!("{};", self.require(&import.src));
            self.replace(import.span, text);
            return;
        }
        let namespace = import.specifiers.iter().find_map(|s| match s {
            ImportSpecifier::Namespace(ns) => Some(ns.local.sym.to_string()),
            _ => None,
        });
        let var = match namespace {
            Some(ns) => ns,
            None => self.temp(),
        };
        for spec in &import.specifiers {
            match spec {
                ImportSpecifier::Named(named) => {
                    let imported = named
                        .imported
                        .as_ref()
                        .map_or_else(|| named.local.sym.to_string(), export_name);
                    self.bind(&named.local, member(&var, &imported));
                }
                ImportSpecifier::Default(default) => {
                    self.bind(&default.local, format!("{var}.default"));
                }
                ImportSpecifier::Namespace(_) => {}
            }
        }
        self.interop = true;
        let text = format!("var {var} = __interop({});", self.require(&import.src));
        self.replace(import.span, text);
    }

    fn finish(self) -> Vec<Line> {
        let source = self.lines.source;
        let mut edits = self.edits;
        edits.sort_by_key(|e| (e.start, e.end));

        let mut out = String::with_capacity(source.len() + 256);
        let mut touched: FxHashSet<usize> = FxHashSet::default();
        let mut cursor = 0;
        for edit in edits {
            if edit.start < cursor {
                continue;
            }
            out.push_str(&source[cursor..edit.start]);
            out.push_str(&edit.text);
            touched.extend(self.lines.line_of(edit.start)..=self.lines.line_of(edit.end));
            cursor = edit.end;
        }
        out.push_str(&source[cursor..]);

        let mut body = vec![
            Line::synthetic("\"use strict\";"),
            Line::synthetic("Object.defineProperty(exports, \"__esModule\", { value: true });"),
        ];
        if self.interop {
            body.push(Line::synthetic(INTEROP));
        }
        if self.export_star {
            body.push(Line::synthetic(EXPORT_STAR));
        }
        let mut exported: FxHashSet<&str> = FxHashSet::default();
        for (name, read) in &self.exports {
            if !exported.insert(name.as_str()) {
                continue;
            }
            body.push(Line::synthetic(format!(
                "Object.defineProperty(exports, {}, {{ enumerable: true, get: function () {{ return {read}; }} }});",
                js_string(name)
            )));
        }
        body.extend(out.lines().enumerate().map(|(i, text)| {
            if touched.contains(&i) {
                Line::rewritten(text, i)
            } else {
                Line::verbatim(text, i)
            }
        }));
        body
    }
}

/// Rewrites reads of imported bindings. Only identifiers resolved to the
/// import itself match; parameters and locals that shadow it keep their own
/// syntax context.
struct BindingReads<'a> {
    bindings: &'a FxHashMap<Id, String>,
    lines: &'a LineIndex<'a>,
    edits: Vec<Edit>,
}

impl BindingReads<'_> {
    fn read(&self, ident: &swc_ecma_ast::Ident) -> Option<&String> {
        self.bindings.get(&ident.to_id())
    }

    fn push(&mut self, span: Span, text: String) {
        let edit = self.lines.span_edit(span, text);
        self.edits.push(edit);
    }
}

impl Visit for BindingReads<'_> {
    fn visit_import_decl(&mut self, _: &ImportDecl) {}

    fn visit_expr(&mut self, expr: &Expr) {
        if let Expr::Ident(ident) = expr {
            if let Some(read) = self.read(ident).cloned() {
                self.push(ident.span, read);
            }
            return;
        }
        expr.visit_children_with(self);
    }

    // An imported function is called without a receiver.
    fn visit_call_expr(&mut self, call: &CallExpr) {
        if let Callee::Expr(callee) = &call.callee {
            if let Expr::Ident(ident) = &**callee {
                if let Some(read) = self.read(ident).cloned() {
                    self.push(ident.span, format!("(0, {read})"));
                    for arg in &call.args {
                        arg.visit_with(self);
                    }
                    return;
                }
            }
        }
        call.visit_children_with(self);
    }

    fn visit_prop(&mut self, prop: &Prop) {
        if let Prop::Shorthand(ident) = prop {
            if let Some(read) = self.read(ident).cloned() {
                self.push(ident.span, format!("{}: {read}", ident.sym));
            }
            return;
        }
        prop.visit_children_with(self);
    }
}

/// Names bound by a declaration pattern. Default values and computed keys
/// are skipped.
#[derive(Default)]
struct BindingNames(Vec<String>);

impl Visit for BindingNames {
    fn visit_binding_ident(&mut self, ident: &BindingIdent) {
        self.0.push(ident.id.sym.to_string());
    }

    fn visit_expr(&mut self, _: &Expr) {}
}

fn declared_names(decl: &Decl) -> Vec<String> {
    match decl {
        Decl::Fn(f) => vec![f.ident.sym.to_string()],
        Decl::Class(c) => vec![c.ident.sym.to_string()],
        Decl::Var(var) => {
            let mut names = BindingNames::default();
            for declarator in &var.decls {
                declarator.name.visit_with(&mut names);
            }
            names.0
        }
        _ => Vec::new(),
    }
}

fn export_name(name: &ModuleExportName) -> String {
    match name {
        ModuleExportName::Ident(ident) => ident.sym.to_string(),
        ModuleExportName::Str(s) => s.value.to_string(),
    }
}

fn member(object: &str, property: &str) -> String {
    if is_identifier(property) {
        format!("{object}.{property}")
    } else {
        format!("{object}[{}]", js_string(property))
    }
}
