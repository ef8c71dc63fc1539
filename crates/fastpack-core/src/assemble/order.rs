//! Emission order.
//!
//! Depth-first post-order over the tree, so dependencies come before their
//! dependents. Roots are visited in this order: the requested entries, then
//! modules nothing in the tree imports (by name), then whatever is left,
//! which can only be modules on pure cycles (by name). Dependencies are
//! followed in declaration order. An edge to a module still on the DFS stack
//! closes a cycle and is skipped, so within a cycle the module reached first
//! is emitted last.

use crate::tree::{ModuleTree, TreeNode};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Modules of `tree` in emission order.
#[must_use]
pub fn emission_order<'a>(tree: &'a ModuleTree, entries: &[String]) -> Vec<&'a Arc<TreeNode>> {
    let edges: FxHashMap<&str, Vec<&str>> = tree
        .nodes()
        .map(|node| {
            let deps = node
                .resolved_dependencies()
                .filter(|dep| tree.contains(dep))
                .collect();
            (node.name.as_str(), deps)
        })
        .collect();

    let mut marks: FxHashMap<&str, Mark> = FxHashMap::default();
    let mut order: Vec<&'a Arc<TreeNode>> = Vec::with_capacity(tree.len());

    for root in root_order(tree, entries, &edges) {
        if marks.contains_key(root) {
            continue;
        }
        marks.insert(root, Mark::Visiting);
        let mut stack: Vec<(&str, usize)> = vec![(root, 0)];

        while let Some(&(name, next)) = stack.last() {
            let deps = edges.get(name).map_or(&[][..], Vec::as_slice);
            if let Some(&dep) = deps.get(next) {
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                if !marks.contains_key(dep) {
                    marks.insert(dep, Mark::Visiting);
                    stack.push((dep, 0));
                }
                continue;
            }
            marks.insert(name, Mark::Done);
            stack.pop();
            if let Some(node) = tree.get(name) {
                order.push(node);
            }
        }
    }

    debug_assert!(marks.values().all(|m| *m == Mark::Done));
    order
}

fn root_order<'a>(
    tree: &'a ModuleTree,
    entries: &'a [String],
    edges: &FxHashMap<&'a str, Vec<&'a str>>,
) -> Vec<&'a str> {
    let referenced: FxHashSet<&str> = edges.values().flatten().copied().collect();

    let mut roots: Vec<&str> = entries
        .iter()
        .map(String::as_str)
        .filter(|name| tree.contains(name))
        .collect();
    roots.extend(tree.names().filter(|name| !referenced.contains(name)));
    roots.extend(tree.names());
    roots
}

/// Modules of `emitted` that no other emitted module depends on, in name order.
///
/// Falls back to the first emitted module when every module is on a cycle.
#[must_use]
pub fn unreferenced<'a>(emitted: &[&'a Arc<TreeNode>]) -> Vec<&'a str> {
    let names: FxHashSet<&str> = emitted.iter().map(|n| n.name.as_str()).collect();
    let referenced: FxHashSet<&str> = emitted
        .iter()
        .flat_map(|n| n.resolved_dependencies())
        .filter(|dep| names.contains(dep))
        .collect();
    let mut roots: Vec<&str> = emitted
        .iter()
        .map(|n| n.name.as_str())
        .filter(|name| !referenced.contains(name))
        .collect();
    roots.sort_unstable();
    if roots.is_empty() {
        roots.extend(emitted.first().map(|n| n.name.as_str()));
    }
    roots
}
