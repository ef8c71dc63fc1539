//! Minification.
//!
//! [`Minifier`] is the seam for a real JavaScript minifier. The built-in
//! [`LineMinifier`] parses the bundle with swc and only removes what it can
//! prove is layout: indentation, trailing blanks, blank lines and whole-line
//! `//` comments, never touching the inside of a multi-line literal. It never
//! joins lines, so it cannot change how automatic semicolon insertion reads
//! the bundle, and it carries source map positions through.

use crate::error::{BuilderError, Result};
use crate::sourcemap::Mapping;
use swc_common::{sync::Lrc, FileName, SourceMap, Span};
use swc_ecma_ast::{EsVersion, Str, Tpl};
use swc_ecma_parser::{lexer::Lexer, EsSyntax, Parser, StringInput, Syntax};
use swc_ecma_visit::{Visit, VisitWith};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MinifyOptions {
    /// Rename local identifiers.
    pub mangle: bool,
    /// Extra settings passed through to the minifier.
    pub uglify: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinifyOutput {
    pub code: String,
    /// `Some` when mappings were passed in.
    pub mappings: Option<Vec<Mapping>>,
}

pub trait Minifier: Send + Sync {
    /// Minify `source`, moving `mappings` (positions in `source`) along.
    ///
    /// # Errors
    ///
    /// Implementations fail when they cannot parse the bundle.
    fn minify(
        &self,
        source: &str,
        mappings: Option<&[Mapping]>,
        options: &MinifyOptions,
    ) -> Result<MinifyOutput>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LineMinifier;

impl Minifier for LineMinifier {
    fn minify(
        &self,
        source: &str,
        mappings: Option<&[Mapping]>,
        options: &MinifyOptions,
    ) -> Result<MinifyOutput> {
        if options.mangle {
            debug!("line minifier does not rename identifiers; ignoring mangle");
        }

        let layout = line_layout(source)?;
        let mut code = String::with_capacity(source.len());
        // Input line to (output line, columns removed from its start).
        let mut moved: Vec<Option<(u32, u32)>> = Vec::new();
        let mut out_line: u32 = 0;

        for (i, line) in source.lines().enumerate() {
            let layout = layout.get(i).copied().unwrap_or(Layout::Code);
            if layout == Layout::InsideLiteral {
                moved.push(Some((out_line, 0)));
                code.push_str(line);
                code.push('\n');
                out_line += 1;
                continue;
            }

            let trimmed = line.trim_start();
            let kept = if layout == Layout::OpensLiteral { trimmed } else { trimmed.trim_end() };
            if kept.is_empty() || (layout == Layout::Code && kept.starts_with("//")) {
                moved.push(None);
                continue;
            }
            let removed = line[..line.len() - trimmed.len()].chars().count();
            moved.push(Some((out_line, u32::try_from(removed).unwrap_or(u32::MAX))));
            code.push_str(kept);
            code.push('\n');
            out_line += 1;
        }

        let mappings = mappings.map(|mappings| {
            mappings
                .iter()
                .filter_map(|m| {
                    let (line, shift) = (*moved.get(m.generated_line as usize)?)?;
                    Some(Mapping {
                        generated_line: line,
                        generated_column: m.generated_column.saturating_sub(shift),
                        ..*m
                    })
                })
                .collect()
        });
        Ok(MinifyOutput { code, mappings })
    }
}

/// What may be trimmed from a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Code,
    /// A multi-line literal starts here; trailing blanks belong to it.
    OpensLiteral,
    /// Continues a multi-line literal; kept as is.
    InsideLiteral,
}

/// Parse the bundle and classify each line by the literals crossing it.
fn line_layout(source: &str) -> Result<Vec<Layout>> {
    let fail = |kind: String| {
        BuilderError::assembly(None, format!("cannot parse bundle for minification: {kind}"))
    };

    let cm: Lrc<SourceMap> = Default::default();
    let fm = cm.new_source_file(
        Lrc::new(FileName::Custom("bundle.js".to_string())),
        source.to_string(),
    );
    let lexer = Lexer::new(
        Syntax::Es(EsSyntax::default()),
        EsVersion::EsNext,
        StringInput::from(&*fm),
        None,
    );
    let mut parser = Parser::new_from(lexer);
    let program = parser.parse_program().map_err(|e| fail(format!("{:?}", e.kind())))?;
    if let Some(e) = parser.take_errors().into_iter().next() {
        return Err(fail(format!("{:?}", e.kind())));
    }

    let mut literals = MultilineLiterals {
        cm: &cm,
        layout: vec![Layout::Code; source.lines().count()],
    };
    program.visit_with(&mut literals);
    Ok(literals.layout)
}

struct MultilineLiterals<'a> {
    cm: &'a SourceMap,
    layout: Vec<Layout>,
}

impl MultilineLiterals<'_> {
    fn mark(&mut self, span: Span) {
        let first = self.cm.lookup_char_pos(span.lo).line.saturating_sub(1);
        let last = self.cm.lookup_char_pos(span.hi).line.saturating_sub(1);
        if first == last {
            return;
        }
        if let Some(layout) = self.layout.get_mut(first) {
            if *layout == Layout::Code {
                *layout = Layout::OpensLiteral;
            }
        }
        for layout in self.layout.iter_mut().take(last + 1).skip(first + 1) {
            *layout = Layout::InsideLiteral;
        }
    }
}

impl Visit for MultilineLiterals<'_> {
    fn visit_tpl(&mut self, tpl: &Tpl) {
        self.mark(tpl.span);
        tpl.visit_children_with(self);
    }

    // A string continued with a trailing backslash.
    fn visit_str(&mut self, s: &Str) {
        self.mark(s.span);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minify(source: &str) -> String {
        LineMinifier
            .minify(source, None, &MinifyOptions::default())
            .unwrap()
            .code
    }

    #[test]
    fn test_strips_layout() {
        let source = "function f() {\n    // comment\n\n    return 1;   \n}\n";
        assert_eq!(minify(source), "function f() {\nreturn 1;\n}\n");
    }

    #[test]
    fn test_template_literal_lines_untouched() {
        let source = "var t = `\n    keep   \n\n  // not a comment\n`;\n  x();";
        assert_eq!(
            minify(source),
            "var t = `\n    keep   \n\n  // not a comment\n`;\nx();\n"
        );
    }

    #[test]
    fn test_url_in_string_is_not_a_comment() {
        assert_eq!(minify("  var u = 'http://x';"), "var u = 'http://x';\n");
    }

    #[test]
    fn test_mappings_follow_lines() {
        let mapping = |line, col| Mapping {
            generated_line: line,
            generated_column: col,
            source: 0,
            original_line: line,
            original_column: col,
        };
        let source = "a();\n\n  // gone\n    b();";
        let out = LineMinifier
            .minify(
                source,
                Some(&[mapping(0, 0), mapping(2, 2), mapping(3, 4), mapping(3, 5)]),
                &MinifyOptions {
                    mangle: true,
                    uglify: serde_json::Value::Null,
                },
            )
            .unwrap();
        assert_eq!(out.code, "a();\nb();\n");
        let mappings = out.mappings.unwrap();
        assert_eq!(mappings.len(), 3);
        assert_eq!((mappings[1].generated_line, mappings[1].generated_column), (1, 0));
        assert_eq!((mappings[2].generated_line, mappings[2].generated_column), (1, 1));
        assert_eq!(mappings[2].original_column, 5);
    }

    #[test]
    fn test_regex_with_comment_like_text_keeps_literals_intact() {
        let source = "var re = /a\\/*/;\nvar t = `\n    indented   \n`;\nvar s = 'one \\\n    two';\n  x();";
        assert_eq!(
            minify(source),
            "var re = /a\\/*/;\nvar t = `\n    indented   \n`;\nvar s = 'one \\\n    two';\nx();\n"
        );
    }

    #[test]
    fn test_unparsable_bundle_is_error() {
        let err = LineMinifier
            .minify("var = ;", None, &MinifyOptions::default())
            .unwrap_err();
        assert_eq!(err.code(), crate::error::codes::ASSEMBLY_ERROR);
    }
}
