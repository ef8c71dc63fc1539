//! Dependency tracing.
//!
//! Loads run in waves: every module discovered by the previous wave is
//! loaded concurrently (bounded by the configured concurrency), and the
//! driver loop is the only writer of the scheduled set and the result tree.
//! A module is scheduled at most once, so import cycles terminate while both
//! edges are still recorded in the nodes' dependency maps.

use crate::cache::LoadCache;
use crate::config::{BuilderConfig, MetaConfig};
use crate::error::{BuilderError, Result};
use crate::loader::{FetchHook, LoadRequest, PluginRegistry, SourceLoader};
use crate::resolve::{split_plugin, Resolve, ResolvedModule};
use crate::scan::{deferred_imports, detect_format, static_dependencies};
use crate::tree::{DeferredImport, ModuleFormat, ModuleTree, TreeMetadata, TreeNode};
use futures::stream::{self, StreamExt, TryStreamExt};
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Default number of module loads in flight per trace.
pub const DEFAULT_LOAD_CONCURRENCY: usize = 32;

/// A module to start tracing from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub name: String,
    /// `false` loads only the module itself.
    pub follow_dependencies: bool,
}

impl TraceEntry {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            follow_dependencies: true,
        }
    }

    #[must_use]
    pub fn module_only(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            follow_dependencies: false,
        }
    }
}

/// Collaborators and configuration snapshot for one trace.
#[derive(Clone)]
pub struct TraceContext {
    pub config: Arc<BuilderConfig>,
    pub fingerprint: String,
    pub resolver: Arc<dyn Resolve>,
    pub cache: Arc<LoadCache>,
    pub loader: Arc<dyn SourceLoader>,
    pub plugins: Arc<PluginRegistry>,
    /// Replaces the loader and bypasses the cache when set.
    pub fetch: Option<FetchHook>,
    pub concurrency: usize,
}

#[derive(Debug, Clone)]
struct PendingLoad {
    module: ResolvedModule,
    /// Entry first, ending with the importing module.
    chain: Vec<String>,
    follow: bool,
    optional: bool,
    package_config: bool,
}

#[derive(Debug, Clone)]
struct ResolvedDependency {
    module: ResolvedModule,
    optional: bool,
}

struct Loaded {
    node: Arc<TreeNode>,
    chain: Vec<String>,
    follow: bool,
    dependencies: Vec<ResolvedDependency>,
    package_config: Option<ResolvedModule>,
}

/// Builds module trees.
pub struct Tracer {
    ctx: TraceContext,
}

impl Tracer {
    #[must_use]
    pub fn new(ctx: TraceContext) -> Self {
        Self { ctx }
    }

    /// Trace `entries` and everything they statically depend on.
    ///
    /// Fails on the first required module that cannot be resolved or
    /// loaded; no partial tree is returned.
    pub async fn trace(&self, entries: &[TraceEntry]) -> Result<ModuleTree> {
        let mut scheduled: FxHashSet<String> = FxHashSet::default();
        let mut pending: Vec<PendingLoad> = Vec::new();

        for entry in merge_entries(entries) {
            let module = self.ctx.resolver.resolve(&entry.name, None)?;
            if scheduled.insert(module.name.clone()) {
                pending.push(PendingLoad {
                    module,
                    chain: Vec::new(),
                    follow: entry.follow_dependencies,
                    optional: false,
                    package_config: false,
                });
            }
        }

        let mut tree = ModuleTree::new();
        let concurrency = self.ctx.concurrency.max(1);

        while !pending.is_empty() {
            let batch = std::mem::take(&mut pending);
            debug!(modules = batch.len(), "trace wave");

            let loaded: Vec<Option<Loaded>> = stream::iter(batch)
                .map(|load| self.load_module(load))
                .buffer_unordered(concurrency)
                .try_collect()
                .await?;

            for loaded in loaded.into_iter().flatten() {
                if loaded.follow {
                    for dep in loaded.dependencies {
                        if scheduled.insert(dep.module.name.clone()) {
                            pending.push(PendingLoad {
                                module: dep.module,
                                chain: loaded.chain.clone(),
                                follow: true,
                                optional: dep.optional,
                                package_config: false,
                            });
                        }
                    }
                }
                if let Some(module) = loaded.package_config {
                    if scheduled.insert(module.name.clone()) {
                        pending.push(PendingLoad {
                            module,
                            chain: loaded.chain.clone(),
                            follow: false,
                            optional: false,
                            package_config: true,
                        });
                    }
                }
                tree.insert(loaded.node);
            }
        }

        debug!(modules = tree.len(), "trace complete");
        Ok(tree)
    }

    async fn load_module(&self, load: PendingLoad) -> Result<Option<Loaded>> {
        match self.load_node(&load).await {
            Ok(loaded) => Ok(Some(loaded)),
            Err(e) if load.optional => {
                debug!(module = %load.module.name, error = %e, "skipping optional module");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn load_node(&self, load: &PendingLoad) -> Result<Loaded> {
        let name = load.module.name.as_str();
        let mut chain = load.chain.clone();
        chain.push(name.to_string());

        let meta = self.ctx.config.meta_for(split_plugin(name).0);

        let (node, dependencies) = match self.cached(&load.module) {
            Some(hit) => {
                let deps = if load.follow {
                    self.resolve_dependencies(&hit, &chain)?
                } else {
                    Vec::new()
                };
                (hit, deps)
            }
            None => {
                let mut node = self.build_node(load, &meta, &chain).await?;
                let deps = if load.package_config {
                    Vec::new()
                } else {
                    self.resolve_dependencies(&node, &chain)?
                };
                node.dependency_map = deps
                    .iter()
                    .map(|(written, dep)| (written.clone(), dep.module.name.clone()))
                    .collect();
                if self.ctx.fetch.is_none() {
                    self.ctx.cache.put(&node);
                }
                let deps = if load.follow { deps } else { Vec::new() };
                (Arc::new(node), deps)
            }
        };

        let package_config = if load.package_config {
            None
        } else {
            self.package_config_module(name)
        };

        Ok(Loaded {
            node,
            chain,
            follow: load.follow,
            dependencies: dependencies.into_iter().map(|(_, dep)| dep).collect(),
            package_config,
        })
    }

    /// A cache hit that is still current.
    fn cached(&self, module: &ResolvedModule) -> Option<Arc<TreeNode>> {
        if self.ctx.fetch.is_some() {
            return None;
        }
        let hit = self.ctx.cache.get(&module.name, &self.ctx.fingerprint)?;
        if let Some(modified) = self.ctx.loader.modified(&hit.path) {
            if modified > hit.loaded_at {
                debug!(module = %module.name, "cache entry is stale");
                return None;
            }
        }
        debug!(module = %module.name, "cache hit");
        Some(hit)
    }

    async fn build_node(&self, load: &PendingLoad, meta: &MetaConfig, chain: &[String]) -> Result<TreeNode> {
        let module = &load.module;
        let mut node = TreeNode::new(module.name.clone(), module.path.clone());
        node.config_fingerprint.clone_from(&self.ctx.fingerprint);
        node.package_metadata = self
            .ctx
            .config
            .package_for(split_plugin(&module.name).0)
            .map(|(_, pkg)| pkg.clone());
        node.is_package_config_module = load.package_config;
        node.metadata = TreeMetadata {
            format: ModuleFormat::Cjs,
            build: meta.build.unwrap_or(true),
            exports: meta.exports.clone(),
        };

        if module.is_empty_module() {
            debug!(module = %module.name, "empty module");
            return Ok(node);
        }

        let load_error = |source: io::Error| BuilderError::Load {
            name: module.name.clone(),
            path: module.path.clone(),
            parent: load.chain.last().cloned(),
            chain: chain.to_vec(),
            source,
        };

        let plugin_name = module.plugin.clone().or_else(|| meta.loader.clone());
        let request = LoadRequest {
            name: module.name.clone(),
            path: module.path.clone(),
            plugin: plugin_name.clone(),
        };

        let raw = self.read_source(request.clone()).await.map_err(load_error)?;

        let mut runtime_dependency = None;
        let (source, format) = match &plugin_name {
            Some(plugin_name) => {
                let plugin = self.ctx.plugins.get(plugin_name).ok_or_else(|| {
                    load_error(io::Error::new(
                        io::ErrorKind::Unsupported,
                        format!("loader plugin '{plugin_name}' is not registered"),
                    ))
                })?;
                let output = plugin.translate(&request, raw).map_err(load_error)?;
                if let Some(runtime) = plugin.runtime_module() {
                    node.plugin_is_runtime = true;
                    runtime_dependency = Some(runtime.to_string());
                }
                (output.source, output.format)
            }
            None if load.package_config || is_json_path(&module.path) => (raw, ModuleFormat::Json),
            None => {
                let format = meta.format.unwrap_or_else(|| detect_format(&raw));
                (raw, format)
            }
        };

        let mut dependencies: Vec<String> = Vec::new();
        if !load.package_config {
            let candidates = runtime_dependency
                .into_iter()
                .chain(meta.deps.iter().cloned())
                .chain(static_dependencies(&source, format));
            for dep in candidates {
                if !dependencies.contains(&dep) {
                    dependencies.push(dep);
                }
            }
        }

        node.plugin = plugin_name;
        node.metadata.format = format;
        node.source = source;
        node.dependencies = dependencies;
        debug!(module = %node.name, format = %format, deps = node.dependencies.len(), "loaded");
        Ok(node)
    }

    async fn read_source(&self, request: LoadRequest) -> io::Result<String> {
        let loader = Arc::clone(&self.ctx.loader);
        let fetch = self.ctx.fetch.clone();
        tokio::task::spawn_blocking(move || match fetch {
            Some(fetch) => fetch(&request, loader.as_ref()),
            None => loader.load(&request.path),
        })
        .await
        .map_err(io::Error::other)?
    }

    /// Resolve a node's written dependencies, keeping declaration order.
    fn resolve_dependencies(
        &self,
        node: &TreeNode,
        chain: &[String],
    ) -> Result<Vec<(String, ResolvedDependency)>> {
        let mut resolved = Vec::with_capacity(node.dependencies.len());
        for written in &node.dependencies {
            let written_optional = self.ctx.config.meta_for(written).is_optional();
            match self.ctx.resolver.resolve(written, Some(&node.name)) {
                Ok(module) => {
                    let optional = written_optional
                        || self
                            .ctx
                            .config
                            .meta_for(split_plugin(&module.name).0)
                            .is_optional();
                    resolved.push((written.clone(), ResolvedDependency { module, optional }));
                }
                Err(e) if written_optional => {
                    debug!(module = %node.name, dependency = %written, error = %e, "optional dependency unresolved");
                }
                Err(e) => return Err(e.with_chain(chain.to_vec())),
            }
        }
        Ok(resolved)
    }

    fn package_config_module(&self, name: &str) -> Option<ResolvedModule> {
        let (pkg_name, pkg) = self.ctx.config.package_for(split_plugin(name).0)?;
        let config_module = pkg.config_module.as_deref()?;
        let config_name = format!("{pkg_name}/{}", config_module.trim_start_matches("./"));
        if config_name == name {
            return None;
        }
        match self.ctx.resolver.resolve(&config_name, None) {
            Ok(module) => Some(module),
            Err(e) => {
                debug!(package = %pkg_name, error = %e, "package config module unresolved");
                None
            }
        }
    }
}

/// Collapse duplicate entries; an entry followed anywhere is followed.
fn merge_entries(entries: &[TraceEntry]) -> Vec<TraceEntry> {
    let mut merged: Vec<TraceEntry> = Vec::with_capacity(entries.len());
    for entry in entries {
        match merged.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => existing.follow_dependencies |= entry.follow_dependencies,
            None => merged.push(entry.clone()),
        }
    }
    merged
}

fn is_json_path(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Resolve the dynamic imports of every module in `tree`.
///
/// Only modules with at least one resolvable deferred import appear in the result.
#[must_use]
pub fn collect_deferred_imports(
    tree: &ModuleTree,
    resolver: &dyn Resolve,
) -> BTreeMap<String, Vec<DeferredImport>> {
    let mut result = BTreeMap::new();
    for node in tree.nodes() {
        let mut found = Vec::new();
        for specifier in deferred_imports(&node.source) {
            match resolver.resolve(&specifier, Some(&node.name)) {
                Ok(module) => found.push(DeferredImport {
                    name: module.name,
                    parent: node.name.clone(),
                }),
                Err(e) => debug!(module = %node.name, specifier = %specifier, error = %e, "deferred import unresolved"),
            }
        }
        if !found.is_empty() {
            result.insert(node.name.clone(), found);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{LoaderPlugin, MemoryLoader, PluginOutput};
    use crate::resolve::ConfigResolver;
    use std::path::PathBuf;

    const BASE: &str = "/project";

    fn context(loader: Arc<MemoryLoader>, config_json: &str) -> TraceContext {
        let config = Arc::new(BuilderConfig::from_json_str(config_json).unwrap());
        TraceContext {
            fingerprint: config.fingerprint(),
            resolver: Arc::new(ConfigResolver::new(Arc::clone(&config), BASE)),
            config,
            cache: Arc::new(LoadCache::new()),
            loader,
            plugins: Arc::new(PluginRegistry::with_defaults()),
            fetch: None,
            concurrency: 4,
        }
    }

    fn files(entries: &[(&str, &str)]) -> Arc<MemoryLoader> {
        let loader = MemoryLoader::new();
        for (name, source) in entries {
            loader.insert(PathBuf::from(BASE).join(name), *source);
        }
        Arc::new(loader)
    }

    #[tokio::test]
    async fn test_trace_follows_static_dependencies_in_order() {
        let loader = files(&[
            ("app/main.js", "import b from './b.js';\nimport a from './a.js';\nimport('./lazy.js');"),
            ("app/a.js", "module.exports = 'a';"),
            ("app/b.js", "var a = require('./a.js');"),
        ]);
        let tracer = Tracer::new(context(loader, "{}"));

        let tree = tracer.trace(&[TraceEntry::new("app/main.js")]).await.unwrap();
        assert_eq!(tree.names().collect::<Vec<_>>(), ["app/a.js", "app/b.js", "app/main.js"]);

        let main = tree.get("app/main.js").unwrap();
        assert_eq!(main.dependencies, ["./b.js", "./a.js"]);
        assert_eq!(main.dependency_map["./b.js"], "app/b.js");
        assert_eq!(main.metadata.format, ModuleFormat::Esm);
        assert!(main.fresh);
        assert!(main.deferred_imports.is_empty());
        assert_eq!(tree.get("app/b.js").unwrap().metadata.format, ModuleFormat::Cjs);
    }

    #[tokio::test]
    async fn test_cycle_terminates_with_both_edges() {
        let loader = files(&[
            ("a.js", "import { b } from './b.js'; export const a = 1;"),
            ("b.js", "import { a } from './a.js'; export const b = 2;"),
        ]);
        let tracer = Tracer::new(context(loader, "{}"));

        let tree = tracer.trace(&[TraceEntry::new("a.js")]).await.unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.get("a.js").unwrap().dependency_map["./b.js"], "b.js");
        assert_eq!(tree.get("b.js").unwrap().dependency_map["./a.js"], "a.js");
    }

    #[tokio::test]
    async fn test_missing_dependency_reports_chain() {
        let loader = files(&[
            ("a.js", "require('./b.js');"),
            ("b.js", "require('./missing.js');"),
        ]);
        let tracer = Tracer::new(context(loader, "{}"));

        let err = tracer.trace(&[TraceEntry::new("a.js")]).await.unwrap_err();
        match err {
            BuilderError::Load { name, parent, chain, .. } => {
                assert_eq!(name, "missing.js");
                assert_eq!(parent.as_deref(), Some("b.js"));
                assert_eq!(chain, ["a.js", "b.js", "missing.js"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unresolvable_dependency_is_resolution_error() {
        let loader = files(&[("app/a.js", "require('../../outside.js');")]);
        let tracer = Tracer::new(context(loader, "{}"));

        let err = tracer.trace(&[TraceEntry::new("app/a.js")]).await.unwrap_err();
        assert_eq!(err.code(), crate::error::codes::RESOLUTION_ERROR);
        match err {
            BuilderError::Resolution { parent, chain, .. } => {
                assert_eq!(parent.as_deref(), Some("app/a.js"));
                assert_eq!(chain, ["app/a.js"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_optional_dependency_is_dropped() {
        let loader = files(&[("a.js", "require('./maybe.js'); require('./b.js');"), ("b.js", "")]);
        let tracer = Tracer::new(context(loader, r#"{ "meta": { "maybe.js": { "optional": true } } }"#));

        let tree = tracer.trace(&[TraceEntry::new("a.js")]).await.unwrap();
        assert_eq!(tree.names().collect::<Vec<_>>(), ["a.js", "b.js"]);
        assert_eq!(tree.get("a.js").unwrap().dependencies, ["./maybe.js", "./b.js"]);
    }

    #[tokio::test]
    async fn test_module_only_entry() {
        let loader = files(&[("a.js", "require('./b.js');"), ("b.js", "")]);
        let tracer = Tracer::new(context(loader, "{}"));

        let tree = tracer.trace(&[TraceEntry::module_only("a.js")]).await.unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.get("a.js").unwrap().dependency_map["./b.js"], "b.js");
    }

    #[tokio::test]
    async fn test_second_trace_hits_cache() {
        let loader = files(&[("a.js", "require('./b.js');"), ("b.js", "")]);
        let tracer = Tracer::new(context(loader, "{}"));

        let first = tracer.trace(&[TraceEntry::new("a.js")]).await.unwrap();
        let second = tracer.trace(&[TraceEntry::new("a.js")]).await.unwrap();
        assert!(first.nodes().all(|n| n.fresh));
        assert!(second.nodes().all(|n| !n.fresh));
        assert_eq!(second.get("a.js").unwrap().dependency_map["./b.js"], "b.js");
    }

    #[tokio::test]
    async fn test_modified_source_is_reloaded() {
        let loader = files(&[("a.js", "module.exports = 1;")]);
        let tracer = Tracer::new(context(Arc::clone(&loader), "{}"));

        tracer.trace(&[TraceEntry::new("a.js")]).await.unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        loader.insert(PathBuf::from(BASE).join("a.js"), "module.exports = 2;");

        let tree = tracer.trace(&[TraceEntry::new("a.js")]).await.unwrap();
        let node = tree.get("a.js").unwrap();
        assert!(node.fresh);
        assert_eq!(node.source, "module.exports = 2;");
    }

    #[tokio::test]
    async fn test_fetch_hook_bypasses_cache() {
        let loader = files(&[("a.js", "module.exports = 1;")]);
        let mut ctx = context(loader, "{}");
        let fetch: FetchHook = Arc::new(|request: &LoadRequest, default: &dyn SourceLoader| {
            let source = default.load(&request.path)?;
            Ok(format!("{source}\n// fetched {}", request.name))
        });
        ctx.fetch = Some(fetch);
        let cache = Arc::clone(&ctx.cache);
        let tracer = Tracer::new(ctx);

        let tree = tracer.trace(&[TraceEntry::new("a.js")]).await.unwrap();
        assert!(tree.get("a.js").unwrap().source.ends_with("// fetched a.js"));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_meta_deps_come_first_and_build_flag() {
        let loader = files(&[
            ("vendor/plugin.js", "window.$.fn.x = 1;"),
            ("vendor/jquery.js", "window.$ = {};"),
        ]);
        let tracer = Tracer::new(context(
            loader,
            r#"{ "meta": { "vendor/plugin.js": { "deps": ["vendor/jquery.js"], "format": "global" }, "vendor/jquery.js": { "build": false, "exports": "$" } } }"#,
        ));

        let tree = tracer.trace(&[TraceEntry::new("vendor/plugin.js")]).await.unwrap();
        let plugin = tree.get("vendor/plugin.js").unwrap();
        assert_eq!(plugin.dependencies, ["vendor/jquery.js"]);
        assert_eq!(plugin.metadata.format, ModuleFormat::Global);
        let jquery = tree.get("vendor/jquery.js").unwrap();
        assert!(!jquery.metadata.build);
        assert_eq!(jquery.metadata.exports.as_deref(), Some("$"));
    }

    struct CssPlugin;

    impl LoaderPlugin for CssPlugin {
        fn name(&self) -> &str {
            "css"
        }

        fn translate(&self, _request: &LoadRequest, source: String) -> io::Result<PluginOutput> {
            Ok(PluginOutput {
                source: format!("require('css-runtime').inject({});", serde_json::to_string(&source)?),
                format: ModuleFormat::Cjs,
            })
        }

        fn runtime_module(&self) -> Option<&str> {
            Some("css-runtime")
        }
    }

    #[tokio::test]
    async fn test_runtime_plugin_adds_dependency() {
        let loader = files(&[
            ("app/a.js", "require('./style.css!css');"),
            ("app/style.css", "body { color: red }"),
            ("css-runtime.js", "module.exports = { inject: function () {} };"),
        ]);
        let mut ctx = context(loader, r#"{ "map": { "css-runtime": "css-runtime.js" } }"#);
        let mut plugins = PluginRegistry::with_defaults();
        plugins.register(Arc::new(CssPlugin));
        ctx.plugins = Arc::new(plugins);
        let tracer = Tracer::new(ctx);

        let tree = tracer.trace(&[TraceEntry::new("app/a.js")]).await.unwrap();
        let css = tree.get("app/style.css!css").unwrap();
        assert!(css.plugin_is_runtime);
        assert_eq!(css.plugin.as_deref(), Some("css"));
        assert_eq!(css.dependencies, ["css-runtime"]);
        assert!(tree.contains("css-runtime.js"));
    }

    #[tokio::test]
    async fn test_unknown_plugin_is_load_error() {
        let loader = files(&[("a.js", "require('./x.txt!nope');"), ("x.txt", "")]);
        let tracer = Tracer::new(context(loader, "{}"));

        let err = tracer.trace(&[TraceEntry::new("a.js")]).await.unwrap_err();
        assert_eq!(err.code(), crate::error::codes::LOAD_ERROR);
        assert!(err.to_string().contains("not registered"));
    }

    #[tokio::test]
    async fn test_package_config_module_is_traced() {
        let loader = files(&[
            ("lib/index.js", "module.exports = 1;"),
            ("lib/package.json", "{ \"name\": \"lib\" }"),
        ]);
        let tracer = Tracer::new(context(
            loader,
            r#"{ "packages": { "lib": { "configModule": "package.json" } } }"#,
        ));

        let tree = tracer.trace(&[TraceEntry::new("lib")]).await.unwrap();
        let config = tree.get("lib/package.json").unwrap();
        assert!(config.is_package_config_module);
        assert_eq!(config.metadata.format, ModuleFormat::Json);
        assert!(tree.get("lib/index.js").unwrap().package_metadata.is_some());
    }

    #[tokio::test]
    async fn test_empty_module() {
        let loader = files(&[("a.js", "var fs = require('fs');")]);
        let tracer = Tracer::new(context(loader, r#"{ "map": { "fs": "@empty" } }"#));

        let tree = tracer.trace(&[TraceEntry::new("a.js")]).await.unwrap();
        let empty = tree.get("@empty").unwrap();
        assert!(empty.source.is_empty());
        assert_eq!(tree.get("a.js").unwrap().dependency_map["fs"], "@empty");
    }

    #[tokio::test]
    async fn test_collect_deferred_imports() {
        let loader = files(&[
            ("a.js", "import b from './b.js';\nimport('./lazy.js');\nimport('./gone/../../../x.js');"),
            ("b.js", "export default 1;"),
        ]);
        let ctx = context(loader, "{}");
        let resolver = Arc::clone(&ctx.resolver);
        let tracer = Tracer::new(ctx);

        let tree = tracer.trace(&[TraceEntry::new("a.js")]).await.unwrap();
        let deferred = collect_deferred_imports(&tree, resolver.as_ref());
        assert_eq!(deferred.len(), 1);
        assert_eq!(
            deferred["a.js"],
            [DeferredImport {
                name: "lazy.js".to_string(),
                parent: "a.js".to_string()
            }]
        );
    }

    #[test]
    fn test_merge_entries() {
        let merged = merge_entries(&[
            TraceEntry::module_only("a.js"),
            TraceEntry::new("b.js"),
            TraceEntry::new("a.js"),
        ]);
        assert_eq!(merged, [TraceEntry::new("a.js"), TraceEntry::new("b.js")]);
    }
}
