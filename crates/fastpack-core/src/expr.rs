//! Tree expressions.
//!
//! `app/main.js - app/vendor.js`, `(a.js + b.js) & $common`, `[app/a.js]`.
//! Operators are `+` (union), `-` (subtract) and `&` (intersect), evaluated
//! left to right, and must be separated from operands by whitespace because
//! module names may contain `-` and `+`. `[name]` is the module without its
//! dependencies, `$name` a tree registered on the builder.

use crate::error::{BuilderError, Result};
use crate::tree::{add_trees, intersect_trees, subtract_trees, ModuleTree};
use std::collections::{BTreeMap, HashMap};

/// A set of modules traced together.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleLeaf {
    pub names: Vec<String>,
    pub follow_dependencies: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeOp {
    Union,
    Subtract,
    Intersect,
}

/// Parsed tree expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeExpr {
    Modules(ModuleLeaf),
    Variable(String),
    Binary(TreeOp, Box<TreeExpr>, Box<TreeExpr>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Name(String),
    Bracketed(String),
    Variable(String),
    Op(TreeOp),
    Open,
    Close,
}

impl TreeExpr {
    /// A leaf tracing `names` with their dependencies.
    #[must_use]
    pub fn modules<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Modules(ModuleLeaf {
            names: names.into_iter().map(Into::into).collect(),
            follow_dependencies: true,
        })
    }

    /// Module leaves in left-to-right order.
    #[must_use]
    pub fn module_leaves(&self) -> Vec<&ModuleLeaf> {
        let mut leaves = Vec::new();
        self.collect_leaves(&mut leaves);
        leaves
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a ModuleLeaf>) {
        match self {
            Self::Modules(leaf) => out.push(leaf),
            Self::Variable(_) => {}
            Self::Binary(_, left, right) => {
                left.collect_leaves(out);
                right.collect_leaves(out);
            }
        }
    }

    /// Module names on the positive side of the expression, in order.
    ///
    /// Names that are only ever subtracted or intersected away are left out.
    #[must_use]
    pub fn entry_names(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_entries(&mut out);
        out
    }

    fn collect_entries<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Modules(leaf) => out.extend(leaf.names.iter().map(String::as_str)),
            Self::Variable(_) => {}
            Self::Binary(TreeOp::Subtract, left, _) => left.collect_entries(out),
            Self::Binary(_, left, right) => {
                left.collect_entries(out);
                right.collect_entries(out);
            }
        }
    }

    /// Evaluate with already-traced leaves and the builder's tree variables.
    pub fn evaluate(
        &self,
        traced: &HashMap<ModuleLeaf, ModuleTree>,
        variables: &BTreeMap<String, ModuleTree>,
    ) -> Result<ModuleTree> {
        match self {
            Self::Modules(leaf) => traced.get(leaf).cloned().ok_or_else(|| {
                BuilderError::expression(leaf.names.join(" "), "module set was not traced")
            }),
            Self::Variable(name) => variables.get(name).cloned().ok_or_else(|| {
                BuilderError::expression(format!("${name}"), "unknown tree variable")
            }),
            Self::Binary(op, left, right) => {
                let left = left.evaluate(traced, variables)?;
                let right = right.evaluate(traced, variables)?;
                Ok(match op {
                    TreeOp::Union => add_trees(&left, &right),
                    TreeOp::Subtract => subtract_trees(&left, &right),
                    TreeOp::Intersect => intersect_trees(&left, &right),
                })
            }
        }
    }
}

/// Parse a tree expression.
pub fn parse(expr: &str) -> Result<TreeExpr> {
    let tokens = tokenize(expr)?;
    if tokens.is_empty() {
        return Err(BuilderError::expression(expr, "expression is empty"));
    }
    let mut parser = Parser {
        expr,
        tokens: &tokens,
        pos: 0,
    };
    let tree = parser.expression()?;
    match parser.tokens.get(parser.pos) {
        None => Ok(tree),
        Some(Token::Close) => Err(parser.error("unbalanced ')'")),
        Some(_) => Err(parser.error("expected an operator between operands")),
    }
}

fn tokenize(expr: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let ends_word = |c: Option<&char>| c.map_or(true, |c| c.is_whitespace() || *c == ')');

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            '+' | '-' | '&' if ends_word(chars.get(i + 1)) => {
                tokens.push(Token::Op(match c {
                    '+' => TreeOp::Union,
                    '-' => TreeOp::Subtract,
                    _ => TreeOp::Intersect,
                }));
                i += 1;
            }
            '[' => {
                let close = chars[i + 1..]
                    .iter()
                    .position(|&c| c == ']')
                    .ok_or_else(|| BuilderError::expression(expr, "missing ']'"))?;
                let name: String = chars[i + 1..i + 1 + close].iter().collect();
                let name = name.trim();
                if name.is_empty() {
                    return Err(BuilderError::expression(expr, "empty '[]'"));
                }
                tokens.push(Token::Bracketed(name.to_string()));
                i += close + 2;
            }
            _ => {
                let start = i;
                while !ends_word(chars.get(i)) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.strip_prefix('$') {
                    Some("") => return Err(BuilderError::expression(expr, "empty variable name")),
                    Some(var) => tokens.push(Token::Variable(var.to_string())),
                    None => tokens.push(Token::Name(word)),
                }
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    expr: &'a str,
    tokens: &'a [Token],
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, message: &str) -> BuilderError {
        BuilderError::expression(self.expr, message)
    }

    fn expression(&mut self) -> Result<TreeExpr> {
        let tokens = self.tokens;
        let mut left = self.term()?;
        while let Some(&Token::Op(op)) = tokens.get(self.pos) {
            self.pos += 1;
            let right = self.term()?;
            left = TreeExpr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<TreeExpr> {
        let tokens = self.tokens;
        let token = tokens
            .get(self.pos)
            .ok_or_else(|| self.error("expected a module, variable or '('"))?;
        self.pos += 1;
        match token {
            Token::Name(name) => Ok(TreeExpr::modules([name.clone()])),
            Token::Bracketed(name) => Ok(TreeExpr::Modules(ModuleLeaf {
                names: vec![name.clone()],
                follow_dependencies: false,
            })),
            Token::Variable(name) => Ok(TreeExpr::Variable(name.clone())),
            Token::Open => {
                let inner = self.expression()?;
                match self.tokens.get(self.pos) {
                    Some(Token::Close) => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    _ => Err(self.error("missing ')'")),
                }
            }
            Token::Op(_) => Err(self.error("operator without a left operand")),
            Token::Close => Err(self.error("unexpected ')'")),
        }
    }
}
