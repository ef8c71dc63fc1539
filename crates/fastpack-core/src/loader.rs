//! Source loading and loader plugins.
//!
//! [`SourceLoader`] reads raw module text. [`LoaderPlugin`]s translate text
//! for `name!plugin` modules into something the assembler can emit. A
//! [`FetchHook`] can replace the source loader for a single build.

use crate::tree::ModuleFormat;
use chrono::{DateTime, Utc};
use fastpack_util::fs::read_to_string_lossy;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// Reads module sources.
pub trait SourceLoader: Send + Sync {
    fn load(&self, path: &Path) -> io::Result<String>;

    /// Last modification time, used to detect stale cache entries.
    ///
    /// Loaders that cannot tell return `None`, which never invalidates.
    fn modified(&self, _path: &Path) -> Option<DateTime<Utc>> {
        None
    }
}

/// Loads sources from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsLoader;

impl SourceLoader for FsLoader {
    fn load(&self, path: &Path) -> io::Result<String> {
        read_to_string_lossy(path)
    }

    fn modified(&self, path: &Path) -> Option<DateTime<Utc>> {
        let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
        Some(DateTime::<Utc>::from(modified))
    }
}

/// In-memory loader for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryLoader {
    files: RwLock<HashMap<PathBuf, (String, DateTime<Utc>)>>,
}

impl MemoryLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a file; its modification time becomes now.
    pub fn insert(&self, path: impl Into<PathBuf>, source: impl Into<String>) {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), (source.into(), Utc::now()));
    }

    pub fn remove(&self, path: &Path) {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
    }
}

impl SourceLoader for MemoryLoader {
    fn load(&self, path: &Path) -> io::Result<String> {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .map(|(source, _)| source.clone())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{} not found", path.display())))
    }

    fn modified(&self, path: &Path) -> Option<DateTime<Utc>> {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .map(|(_, modified)| *modified)
    }
}

/// What is being loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub name: String,
    pub path: PathBuf,
    pub plugin: Option<String>,
}

/// Per-build override of source loading. Receives the default loader so it can delegate.
pub type FetchHook = Arc<dyn Fn(&LoadRequest, &dyn SourceLoader) -> io::Result<String> + Send + Sync>;

/// Translated plugin output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginOutput {
    pub source: String,
    pub format: ModuleFormat,
}

/// A loader plugin, selected by `name!plugin` or by meta `loader`.
pub trait LoaderPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Turn raw source into a module body.
    fn translate(&self, request: &LoadRequest, source: String) -> io::Result<PluginOutput>;

    /// Module the plugin needs at runtime. When set it is traced as a dependency.
    fn runtime_module(&self) -> Option<&str> {
        None
    }
}

/// Exports the file content as a string.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextPlugin;

impl LoaderPlugin for TextPlugin {
    fn name(&self) -> &str {
        "text"
    }

    fn translate(&self, _request: &LoadRequest, source: String) -> io::Result<PluginOutput> {
        let literal = serde_json::to_string(&source).map_err(io::Error::other)?;
        Ok(PluginOutput {
            source: format!("module.exports = {literal};"),
            format: ModuleFormat::Cjs,
        })
    }
}

/// Validates JSON and emits it as a json module.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPlugin;

impl LoaderPlugin for JsonPlugin {
    fn name(&self) -> &str {
        "json"
    }

    fn translate(&self, request: &LoadRequest, source: String) -> io::Result<PluginOutput> {
        if let Err(e) = serde_json::from_str::<serde_json::Value>(&source) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not valid JSON: {e}", request.name),
            ));
        }
        Ok(PluginOutput {
            source: source.trim().to_string(),
            format: ModuleFormat::Json,
        })
    }
}

/// Registered loader plugins by name.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Arc<dyn LoaderPlugin>>,
}

impl PluginRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `text` and `json` plugins.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TextPlugin));
        registry.register(Arc::new(JsonPlugin));
        registry
    }

    /// Register a plugin, replacing one with the same name.
    pub fn register(&mut self, plugin: Arc<dyn LoaderPlugin>) {
        self.plugins.insert(plugin.name().to_string(), plugin);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn LoaderPlugin>> {
        self.plugins.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.plugins.keys()).finish()
    }
}
