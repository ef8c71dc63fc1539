//! Bundle assembly.
//!
//! Orders a [`ModuleTree`], renders each module body, wraps it for the
//! requested [`OutputFormat`], and concatenates everything into one source
//! text, recording source map positions on the way.

mod envelope;
mod esm;
mod order;
mod transform;

pub use envelope::OutputFormat;
pub use order::emission_order;

use crate::error::Result;
use crate::sourcemap::{token_starts, Mapping, SourceMapSpec};
use crate::tree::{ModuleTree, TreeNode};
use envelope::{Envelope, EnvelopeOptions};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use transform::Line;

/// How to assemble a bundle.
#[derive(Debug, Clone)]
pub struct AssembleOptions {
    pub format: OutputFormat,
    /// Include a runtime and evaluate the entry modules on load.
    pub self_executing: bool,
    /// Entry modules, in request order. They lead the emission order and
    /// are what a self-executing bundle evaluates.
    pub entries: Vec<String>,
    pub global_name: Option<String>,
    /// External module name to the global expression that provides it.
    pub global_deps: BTreeMap<String, String>,
    /// Rewrite dependency references to resolved names.
    pub normalize: bool,
    /// Register modules without names.
    pub anonymous: bool,
    pub system_global: String,
    pub source_maps: bool,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            self_executing: false,
            entries: Vec::new(),
            global_name: None,
            global_deps: BTreeMap::new(),
            normalize: false,
            anonymous: false,
            system_global: "System".to_string(),
            source_maps: false,
        }
    }
}

/// An assembled bundle, before minification.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub source: String,
    pub source_map: Option<SourceMapSpec>,
    /// Emitted module names, in emission order.
    pub modules: Vec<String>,
}

/// Assemble `tree` into a single bundle.
///
/// # Errors
///
/// Returns an assembly error when the output format cannot carry the tree:
/// a loader-only format used self-executing (or the reverse), a
/// `System.register` module outside a register bundle, an external without
/// a global in a self-executing global bundle, or an ES module whose
/// imports cannot be lowered.
pub fn assemble(tree: &ModuleTree, options: &AssembleOptions) -> Result<Assembly> {
    let emitted: Vec<&Arc<TreeNode>> = emission_order(tree, &options.entries)
        .into_iter()
        .filter(|node| node.metadata.build)
        .collect();

    let roots: Vec<&str> = {
        let requested: Vec<&str> = options
            .entries
            .iter()
            .map(String::as_str)
            .filter(|name| emitted.iter().any(|n| n.name == *name))
            .collect();
        if requested.is_empty() {
            order::unreferenced(&emitted)
        } else {
            requested
        }
    };

    let envelope = Envelope::new(
        EnvelopeOptions {
            format: options.format,
            self_executing: options.self_executing,
            anonymous: options.anonymous,
            normalize: options.normalize,
            system_global: &options.system_global,
            global_name: options.global_name.as_deref(),
            global_deps: &options.global_deps,
        },
        &emitted,
        &roots,
    )?;

    let rendered: Vec<Vec<Line>> = emitted
        .par_iter()
        .map(|node| {
            let body = transform::module_body(node, options.normalize)?;
            envelope.wrap_module(node, body)
        })
        .collect::<Result<_>>()?;

    let mut out = Output::new(options.source_maps);
    out.push_block(&envelope.header());
    for (source, lines) in rendered.iter().enumerate() {
        out.push_module(u32::try_from(source).unwrap_or(u32::MAX), lines);
    }
    out.push_block(&envelope.footer());

    debug!(
        format = %options.format,
        self_executing = options.self_executing,
        modules = emitted.len(),
        externals = envelope.externals().len(),
        "assembled bundle"
    );

    let source_map = out.mappings.map(|mappings| SourceMapSpec {
        sources: emitted.iter().map(|n| n.name.clone()).collect(),
        sources_content: emitted.iter().map(|n| n.source.clone()).collect(),
        mappings,
    });
    Ok(Assembly {
        source: out.text,
        source_map,
        modules: emitted.iter().map(|n| n.name.clone()).collect(),
    })
}

/// JavaScript string literal for `s`.
pub(crate) fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\""))
}

struct Output {
    text: String,
    line: u32,
    mappings: Option<Vec<Mapping>>,
}

impl Output {
    fn new(source_maps: bool) -> Self {
        Self {
            text: String::new(),
            line: 0,
            mappings: source_maps.then(Vec::new),
        }
    }

    fn push_block(&mut self, block: &str) {
        if block.is_empty() {
            return;
        }
        for line in block.lines() {
            self.push_line(line);
        }
    }

    fn push_module(&mut self, source: u32, lines: &[Line]) {
        for line in lines {
            // A line's text may carry embedded newlines (a multi-line
            // `meta.exports` getter, a rewritten statement). Each physical
            // line gets its own generated line; only verbatim text maps
            // past the first one.
            for (offset, piece) in (0u32..).zip(line.text.split('\n')) {
                if let (Some(mappings), Some(origin)) = (self.mappings.as_mut(), line.origin) {
                    let mapping = |column: u32| Mapping {
                        generated_line: self.line,
                        generated_column: column,
                        source,
                        original_line: origin.line.saturating_add(offset),
                        original_column: if origin.verbatim { column } else { 0 },
                    };
                    if origin.verbatim {
                        mappings.extend(token_starts(piece).into_iter().map(mapping));
                    } else if offset == 0 {
                        mappings.push(mapping(0));
                    }
                }
                self.push_line(piece);
            }
        }
    }

    /// Append `text` and count every line it spans.
    fn push_line(&mut self, text: &str) {
        for piece in text.split('\n') {
            self.text.push_str(piece);
            self.text.push('\n');
            self.line += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{ModuleFormat, TreeMetadata};

    fn module(name: &str, format: ModuleFormat, source: &str, deps: &[(&str, &str)]) -> Arc<TreeNode> {
        let mut node = TreeNode::new(name, format!("/p/{name}"));
        node.metadata = TreeMetadata {
            format,
            ..TreeMetadata::default()
        };
        node.source = source.to_string();
        for (written, resolved) in deps {
            node.dependencies.push((*written).to_string());
            node.dependency_map
                .insert((*written).to_string(), (*resolved).to_string());
        }
        Arc::new(node)
    }

    fn sample_tree() -> ModuleTree {
        [
            module(
                "app/main.js",
                ModuleFormat::Esm,
                "import { greet } from './greet.js';\nexport const message = greet('world');",
                &[("./greet.js", "app/greet.js")],
            ),
            module(
                "app/greet.js",
                ModuleFormat::Cjs,
                "exports.greet = function (who) {\n  return 'hello ' + who;\n};",
                &[],
            ),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_loader_bundle_order_and_names() {
        let assembly = assemble(
            &sample_tree(),
            &AssembleOptions {
                format: OutputFormat::Register,
                entries: vec!["app/main.js".into()],
                ..AssembleOptions::default()
            },
        )
        .unwrap();
        assert_eq!(assembly.modules, ["app/greet.js", "app/main.js"]);
        let greet = assembly
            .source
            .find("System.registerDynamic(\"app/greet.js\", [], true")
            .unwrap();
        let main = assembly
            .source
            .find("System.registerDynamic(\"app/main.js\", [\"./greet.js\"], true")
            .unwrap();
        assert!(greet < main);
        assert!(assembly.source_map.is_none());
    }

    #[test]
    fn test_build_false_modules_are_left_out() {
        let mut tree = sample_tree();
        let mut greet = (**tree.get("app/greet.js").unwrap()).clone();
        greet.metadata.build = false;
        tree.insert(Arc::new(greet));

        let assembly = assemble(
            &tree,
            &AssembleOptions {
                self_executing: true,
                format: OutputFormat::Cjs,
                ..AssembleOptions::default()
            },
        )
        .unwrap();
        assert_eq!(assembly.modules, ["app/main.js"]);
        assert!(assembly.source.contains("require(\"app/greet.js\")"));
    }

    #[test]
    fn test_self_executing_evaluates_entry() {
        let assembly = assemble(
            &sample_tree(),
            &AssembleOptions {
                self_executing: true,
                global_name: Some("Greeter".into()),
                entries: vec!["app/main.js".into()],
                ..AssembleOptions::default()
            },
        )
        .unwrap();
        assert!(assembly.source.starts_with("(function (root, factory) {"));
        assert!(assembly.source.contains("var __fpResult = __fp.load(1);"));
        assert!(assembly.source.contains("[\"Greeter\"] = __fpResult;"));
        assert!(assembly.source.ends_with("});\n"));
    }

    #[test]
    fn test_source_map_points_at_module_lines() {
        let assembly = assemble(
            &sample_tree(),
            &AssembleOptions {
                format: OutputFormat::Amd,
                entries: vec!["app/main.js".into()],
                source_maps: true,
                ..AssembleOptions::default()
            },
        )
        .unwrap();
        let map = assembly.source_map.unwrap();
        assert_eq!(map.sources, ["app/greet.js", "app/main.js"]);
        assert_eq!(map.sources_content[0], sample_tree().get("app/greet.js").unwrap().source);

        let lines: Vec<&str> = assembly.source.lines().collect();
        let body_line = lines
            .iter()
            .position(|l| *l == "  return 'hello ' + who;")
            .unwrap();
        let hit = map
            .mappings
            .iter()
            .find(|m| m.generated_line as usize == body_line)
            .unwrap();
        assert_eq!((hit.source, hit.original_line, hit.original_column), (0, 1, 2));
        assert_eq!(hit.generated_column, 2);
    }

    #[test]
    fn test_register_module_in_self_executing_bundle_is_error() {
        let tree: ModuleTree = [module(
            "app/sys.js",
            ModuleFormat::Register,
            "System.register([], function () { return { execute: function () {} }; });",
            &[],
        )]
        .into_iter()
        .collect();
        let err = assemble(
            &tree,
            &AssembleOptions {
                self_executing: true,
                ..AssembleOptions::default()
            },
        )
        .unwrap_err();
        assert_eq!(err.module(), Some("app/sys.js"));
    }

    #[test]
    fn test_cycle_emits_both_modules() {
        let tree: ModuleTree = [
            module("a", ModuleFormat::Cjs, "require('./b');", &[("./b", "b")]),
            module("b", ModuleFormat::Cjs, "require('./a');", &[("./a", "a")]),
        ]
        .into_iter()
        .collect();
        let assembly = assemble(
            &tree,
            &AssembleOptions {
                entries: vec!["a".into()],
                ..AssembleOptions::default()
            },
        )
        .unwrap();
        assert_eq!(assembly.modules, ["b", "a"]);
    }

    #[test]
    fn test_multiline_text_counts_every_line() {
        let mut out = Output::new(true);
        out.push_module(
            0,
            &[
                Line::rewritten("var a = 1;\nvar b = 2;", 0),
                Line::verbatim("first;\n  second;", 3),
                Line::synthetic("});"),
            ],
        );
        out.push_line("tail\nend");
        assert_eq!(out.line, 7);
        assert_eq!(out.text.lines().count(), 7);

        let mappings = out.mappings.unwrap();
        let rewritten: Vec<u32> = mappings
            .iter()
            .filter(|m| m.original_line == 0)
            .map(|m| m.generated_line)
            .collect();
        assert_eq!(rewritten, [0]);
        let second = mappings.iter().find(|m| m.original_line == 4).unwrap();
        assert_eq!((second.generated_line, second.generated_column), (3, 2));
        assert!(mappings.iter().all(|m| m.generated_line < 4));
    }

    #[test]
    fn test_common_and_page_bundles_share_the_fallback_registry() {
        let tree = sample_tree();
        let common: ModuleTree = [Arc::clone(tree.get("app/greet.js").unwrap())]
            .into_iter()
            .collect();
        let page: ModuleTree = [Arc::clone(tree.get("app/main.js").unwrap())]
            .into_iter()
            .collect();
        for part in [&common, &page] {
            let assembly = assemble(part, &AssembleOptions::default()).unwrap();
            assert!(assembly
                .source
                .contains("var runtime = global.__fastpack || (global.__fastpack = "));
        }
        let page = assemble(&page, &AssembleOptions::default()).unwrap();
        // The page bundle reaches app/greet.js by name through the shared registry.
        assert!(page
            .source
            .contains("__fpRegister(\"app/main.js\", [\"./greet.js\"], {\"./greet.js\":\"app/greet.js\"}"));
    }
}
