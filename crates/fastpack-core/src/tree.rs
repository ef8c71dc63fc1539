//! Module trees and the tree algebra.
//!
//! A [`ModuleTree`] maps normalized module names to shared, immutable
//! [`TreeNode`]s. Union, subtraction and intersection build new trees that
//! share nodes with their inputs; inputs are never modified.

use crate::config::PackageConfig;
use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Source format of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleFormat {
    #[serde(alias = "es6")]
    Esm,
    #[serde(alias = "commonjs")]
    Cjs,
    Amd,
    Global,
    #[serde(alias = "system")]
    Register,
    Json,
}

impl ModuleFormat {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Esm => "esm",
            Self::Cjs => "cjs",
            Self::Amd => "amd",
            Self::Global => "global",
            Self::Register => "register",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for ModuleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "esm" | "es6" => Ok(Self::Esm),
            "cjs" | "commonjs" => Ok(Self::Cjs),
            "amd" => Ok(Self::Amd),
            "global" => Ok(Self::Global),
            "register" | "system" => Ok(Self::Register),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown module format '{other}'")),
        }
    }
}

/// Build-relevant metadata of a traced module.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeMetadata {
    pub format: ModuleFormat,
    /// `false` keeps the module out of bundles; it is treated as external.
    pub build: bool,
    /// Global name exported by a global-format module.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exports: Option<String>,
}

impl Default for TreeMetadata {
    fn default() -> Self {
        Self {
            format: ModuleFormat::Cjs,
            build: true,
            exports: None,
        }
    }
}

/// A dynamic import found in a module, resolved relative to `parent`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DeferredImport {
    pub name: String,
    pub parent: String,
}

/// One resolved and loaded module.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub name: String,
    pub path: PathBuf,
    pub metadata: TreeMetadata,
    /// Dependencies as written, in declaration order, without duplicates.
    pub dependencies: Vec<String>,
    /// Written dependency name to resolved module name.
    pub dependency_map: BTreeMap<String, String>,
    pub source: String,
    /// `true` when this load did not come from the cache.
    pub fresh: bool,
    pub loaded_at: DateTime<Utc>,
    pub config_fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    pub plugin_is_runtime: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_metadata: Option<PackageConfig>,
    pub is_package_config_module: bool,
    pub deferred_imports: Vec<DeferredImport>,
    pub compacted_loads: Vec<TreeNode>,
}

impl TreeNode {
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            metadata: TreeMetadata::default(),
            dependencies: Vec::new(),
            dependency_map: BTreeMap::new(),
            source: String::new(),
            fresh: true,
            loaded_at: Utc::now(),
            config_fingerprint: String::new(),
            plugin: None,
            plugin_is_runtime: false,
            package_metadata: None,
            is_package_config_module: false,
            deferred_imports: Vec::new(),
            compacted_loads: Vec::new(),
        }
    }

    /// Resolved names of this module's dependencies, in declaration order.
    pub fn resolved_dependencies(&self) -> impl Iterator<Item = &str> {
        self.dependencies
            .iter()
            .filter_map(|dep| self.dependency_map.get(dep).map(String::as_str))
    }
}

/// Ordered map from module name to module record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleTree {
    nodes: BTreeMap<String, Arc<TreeNode>>,
}

impl ModuleTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node under its own name, replacing any node of the same name.
    pub fn insert(&mut self, node: Arc<TreeNode>) -> Option<Arc<TreeNode>> {
        self.nodes.insert(node.name.clone(), node)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<TreeNode>> {
        self.nodes.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<TreeNode>> {
        self.nodes.values()
    }
}

impl FromIterator<Arc<TreeNode>> for ModuleTree {
    fn from_iter<I: IntoIterator<Item = Arc<TreeNode>>>(iter: I) -> Self {
        let mut tree = Self::new();
        for node in iter {
            tree.insert(node);
        }
        tree
    }
}

impl Serialize for ModuleTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.nodes.len()))?;
        for (name, node) in &self.nodes {
            map.serialize_entry(name, node.as_ref())?;
        }
        map.end()
    }
}

/// Every module of `a` and `b`. Nodes from `b` win on shared names.
#[must_use]
pub fn add_trees(a: &ModuleTree, b: &ModuleTree) -> ModuleTree {
    let mut nodes = a.nodes.clone();
    for (name, node) in &b.nodes {
        nodes.insert(name.clone(), Arc::clone(node));
    }
    ModuleTree { nodes }
}

/// Modules of `a` whose name is not in `b`.
#[must_use]
pub fn subtract_trees(a: &ModuleTree, b: &ModuleTree) -> ModuleTree {
    let nodes = a
        .nodes
        .iter()
        .filter(|(name, _)| !b.nodes.contains_key(*name))
        .map(|(name, node)| (name.clone(), Arc::clone(node)))
        .collect();
    ModuleTree { nodes }
}

/// Modules present in both trees, taking nodes from `a`.
#[must_use]
pub fn intersect_trees(a: &ModuleTree, b: &ModuleTree) -> ModuleTree {
    let nodes = a
        .nodes
        .iter()
        .filter(|(name, _)| b.nodes.contains_key(*name))
        .map(|(name, node)| (name.clone(), Arc::clone(node)))
        .collect();
    ModuleTree { nodes }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, source: &str) -> Arc<TreeNode> {
        let mut n = TreeNode::new(name, format!("/base/{name}"));
        n.source = source.to_string();
        Arc::new(n)
    }

    fn tree(entries: &[(&str, &str)]) -> ModuleTree {
        entries.iter().map(|(n, s)| node(n, s)).collect()
    }

    #[test]
    fn test_union_prefers_right_operand() {
        let a = tree(&[("a.js", "A1"), ("shared.js", "from a")]);
        let b = tree(&[("b.js", "B1"), ("shared.js", "from b")]);

        let u = add_trees(&a, &b);
        assert_eq!(u.names().collect::<Vec<_>>(), ["a.js", "b.js", "shared.js"]);
        assert_eq!(u.get("shared.js").unwrap().source, "from b");
    }

    #[test]
    fn test_subtract_by_name() {
        let a = tree(&[("a.js", ""), ("b.js", ""), ("c.js", "")]);
        let b = tree(&[("b.js", "different source")]);

        let d = subtract_trees(&a, &b);
        assert_eq!(d.names().collect::<Vec<_>>(), ["a.js", "c.js"]);
    }

    #[test]
    fn test_intersect_takes_left_values() {
        let a = tree(&[("a.js", "left"), ("b.js", "")]);
        let b = tree(&[("a.js", "right"), ("c.js", "")]);

        let i = intersect_trees(&a, &b);
        assert_eq!(i.len(), 1);
        assert_eq!(i.get("a.js").unwrap().source, "left");
    }

    #[test]
    fn test_identities() {
        let a = tree(&[("a.js", ""), ("b.js", "")]);
        let empty = ModuleTree::new();

        assert_eq!(add_trees(&a, &empty), a);
        assert_eq!(add_trees(&empty, &a), a);
        assert_eq!(subtract_trees(&a, &empty), a);
        assert!(intersect_trees(&a, &empty).is_empty());
    }

    #[test]
    fn test_idempotence() {
        let a = tree(&[("a.js", ""), ("b.js", "")]);

        assert_eq!(add_trees(&a, &a), a);
        assert!(subtract_trees(&a, &a).is_empty());
        assert_eq!(intersect_trees(&a, &a), a);
    }

    #[test]
    fn test_inputs_are_not_modified() {
        let a = tree(&[("a.js", "")]);
        let b = tree(&[("b.js", "")]);
        let a_before = a.clone();

        let _ = add_trees(&a, &b);
        let _ = subtract_trees(&a, &b);
        assert_eq!(a, a_before);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_union_shares_nodes() {
        let a = tree(&[("a.js", "")]);
        let u = add_trees(&a, &ModuleTree::new());
        assert!(Arc::ptr_eq(a.get("a.js").unwrap(), u.get("a.js").unwrap()));
    }

    #[test]
    fn test_resolved_dependencies_skip_unmapped() {
        let mut n = TreeNode::new("a.js", "/base/a.js");
        n.dependencies = vec!["./b.js".into(), "optional-thing".into()];
        n.dependency_map.insert("./b.js".into(), "b.js".into());
        assert_eq!(n.resolved_dependencies().collect::<Vec<_>>(), ["b.js"]);
    }

    #[test]
    fn test_module_format_parse() {
        assert_eq!("es6".parse::<ModuleFormat>().unwrap(), ModuleFormat::Esm);
        assert_eq!("System".parse::<ModuleFormat>().unwrap(), ModuleFormat::Register);
        assert!("cjs2".parse::<ModuleFormat>().is_err());
    }

    #[test]
    fn test_tree_serializes_as_map() {
        let a = tree(&[("a.js", "x")]);
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["a.js"]["name"], "a.js");
        assert_eq!(json["a.js"]["metadata"]["format"], "cjs");
    }
}
