//! Load cache.
//!
//! Thread-safe store of loaded modules keyed by module name and
//! configuration fingerprint. Entries are never evicted; callers drop them
//! explicitly through [`LoadCache::invalidate`].

use crate::tree::TreeNode;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Cache key: normalized module name and the fingerprint of the config it was loaded under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub name: String,
    pub fingerprint: String,
}

impl CacheKey {
    #[must_use]
    pub fn new(name: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fingerprint: fingerprint.into(),
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub modules: usize,
}

/// Shared load cache.
#[derive(Debug, Default)]
pub struct LoadCache {
    entries: DashMap<CacheKey, Arc<TreeNode>>,
}

impl LoadCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a module loaded under `fingerprint`.
    ///
    /// Stored nodes are never fresh, so hits come back with `fresh == false`.
    #[must_use]
    pub fn get(&self, name: &str, fingerprint: &str) -> Option<Arc<TreeNode>> {
        let key = CacheKey::new(name, fingerprint);
        self.entries.get(&key).map(|entry| Arc::clone(entry.value()))
    }

    /// Store a fully built node. The last write for a key wins.
    pub fn put(&self, node: &TreeNode) {
        let mut cached = node.clone();
        cached.fresh = false;
        let key = CacheKey::new(cached.name.clone(), cached.config_fingerprint.clone());
        debug!(module = %key.name, "cache store");
        self.entries.insert(key, Arc::new(cached));
    }

    /// Drop one module (every fingerprint) or, with `None`, everything.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate(&self, name: Option<&str>) -> usize {
        let before = self.entries.len();
        match name {
            Some(name) => self.entries.retain(|key, _| key.name != name),
            None => self.entries.clear(),
        }
        let removed = before.saturating_sub(self.entries.len());
        debug!(module = name.unwrap_or("*"), removed, "cache invalidate");
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().name.clone()).collect();
        names.sort_unstable();
        names.dedup();
        CacheStats {
            entries: self.entries.len(),
            modules: names.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(name: &str, fingerprint: &str) -> TreeNode {
        let mut node = TreeNode::new(name, format!("/base/{name}"));
        node.config_fingerprint = fingerprint.to_string();
        node
    }

    #[test]
    fn test_hit_is_not_fresh() {
        let cache = LoadCache::new();
        let node = loaded("a.js", "f1");
        assert!(node.fresh);

        cache.put(&node);
        let hit = cache.get("a.js", "f1").unwrap();
        assert!(!hit.fresh);
        assert_eq!(hit.name, "a.js");
    }

    #[test]
    fn test_fingerprint_mismatch_is_miss() {
        let cache = LoadCache::new();
        cache.put(&loaded("a.js", "f1"));
        assert!(cache.get("a.js", "f2").is_none());
    }

    #[test]
    fn test_last_write_wins() {
        let cache = LoadCache::new();
        let mut first = loaded("a.js", "f1");
        first.source = "one".into();
        let mut second = loaded("a.js", "f1");
        second.source = "two".into();

        cache.put(&first);
        cache.put(&second);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a.js", "f1").unwrap().source, "two");
    }

    #[test]
    fn test_invalidate_by_name_drops_all_fingerprints() {
        let cache = LoadCache::new();
        cache.put(&loaded("a.js", "f1"));
        cache.put(&loaded("a.js", "f2"));
        cache.put(&loaded("b.js", "f1"));

        assert_eq!(cache.invalidate(Some("a.js")), 2);
        assert!(cache.get("a.js", "f1").is_none());
        assert!(cache.get("b.js", "f1").is_some());
    }

    #[test]
    fn test_invalidate_all() {
        let cache = LoadCache::new();
        cache.put(&loaded("a.js", "f1"));
        cache.put(&loaded("b.js", "f1"));

        assert_eq!(cache.invalidate(None), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_stats_counts_distinct_modules() {
        let cache = LoadCache::new();
        cache.put(&loaded("a.js", "f1"));
        cache.put(&loaded("a.js", "f2"));
        cache.put(&loaded("b.js", "f1"));

        assert_eq!(
            cache.stats(),
            CacheStats {
                entries: 3,
                modules: 2
            }
        );
    }

    #[test]
    fn test_concurrent_puts() {
        let cache = Arc::new(LoadCache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for j in 0..50 {
                        cache.put(&loaded(&format!("m{}.js", j % 10), &format!("f{i}")));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 80);
        assert_eq!(cache.stats().modules, 10);
    }
}
