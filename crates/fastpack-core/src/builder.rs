//! The build pipeline.
//!
//! [`Builder`] owns the configuration, the load cache, named trees and the
//! pluggable collaborators. Every call snapshots the configuration, so a
//! `configure` running alongside a bundle never changes it halfway.

use crate::assemble::{assemble, AssembleOptions, OutputFormat};
use crate::cache::{CacheStats, LoadCache};
use crate::config::{self, BuilderConfig};
use crate::error::{BuilderError, Result};
use crate::expr::{self, ModuleLeaf, TreeExpr};
use crate::loader::{FetchHook, FsLoader, LoaderPlugin, PluginRegistry, SourceLoader};
use crate::minify::{LineMinifier, Minifier, MinifyOptions};
use crate::output::{FileWriter, FsWriter};
use crate::resolve::{ConfigResolver, Resolve};
use crate::sourcemap::{EncodeOptions, SourceMapEncoder, VlqEncoder};
use crate::trace::{collect_deferred_imports, TraceContext, TraceEntry, Tracer, DEFAULT_LOAD_CONCURRENCY};
use crate::tree::{self, DeferredImport, ModuleTree};
use fastpack_util::fs::to_slash_relative;
use futures::future::try_join_all;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tracing::{debug, info};

/// Options for [`Builder::bundle`] and [`Builder::build_static`].
#[derive(Clone)]
pub struct BundleOptions {
    pub minify: bool,
    pub mangle: bool,
    /// Settings handed to the minifier as they are.
    pub uglify: serde_json::Value,
    pub source_maps: bool,
    /// Embed original sources in the source map.
    pub source_map_contents: bool,
    /// One mapping per generated line.
    pub low_res_source_maps: bool,
    /// Global that receives the entry exports; makes the bundle self-executing.
    pub global_name: Option<String>,
    /// External module name to the global that provides it.
    pub global_deps: BTreeMap<String, String>,
    /// Replaces the source loader for this build and bypasses the cache.
    pub fetch: Option<FetchHook>,
    pub normalize: bool,
    pub anonymous: bool,
    pub system_global: String,
    /// `umd`, `register`, `amd`, `cjs`, `esm` or `global`.
    pub format: String,
}

impl Default for BundleOptions {
    fn default() -> Self {
        Self {
            minify: true,
            mangle: false,
            uglify: serde_json::Value::Null,
            source_maps: false,
            source_map_contents: false,
            low_res_source_maps: false,
            global_name: None,
            global_deps: BTreeMap::new(),
            fetch: None,
            normalize: false,
            anonymous: false,
            system_global: "System".to_string(),
            format: OutputFormat::default().as_str().to_string(),
        }
    }
}

impl fmt::Debug for BundleOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleOptions")
            .field("minify", &self.minify)
            .field("mangle", &self.mangle)
            .field("source_maps", &self.source_maps)
            .field("global_name", &self.global_name)
            .field("global_deps", &self.global_deps)
            .field("fetch", &self.fetch.is_some())
            .field("normalize", &self.normalize)
            .field("anonymous", &self.anonymous)
            .field("system_global", &self.system_global)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

/// What to bundle.
#[derive(Debug, Clone)]
pub enum BundleSource {
    /// A tree expression such as `app/main.js - app/vendor.js`.
    Expression(String),
    /// Module names traced with their dependencies.
    Modules(Vec<String>),
    /// An already computed tree.
    Tree(ModuleTree),
}

impl From<&str> for BundleSource {
    fn from(expr: &str) -> Self {
        Self::Expression(expr.to_string())
    }
}

impl From<String> for BundleSource {
    fn from(expr: String) -> Self {
        Self::Expression(expr)
    }
}

impl From<Vec<String>> for BundleSource {
    fn from(names: Vec<String>) -> Self {
        Self::Modules(names)
    }
}

impl From<ModuleTree> for BundleSource {
    fn from(tree: ModuleTree) -> Self {
        Self::Tree(tree)
    }
}

/// Result of a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleOutput {
    pub source: String,
    /// Encoded source map, when requested.
    pub source_map: Option<String>,
    /// Bundled module names, in emission order.
    pub modules: Vec<String>,
}

/// Traces, combines and bundles module trees.
pub struct Builder {
    root: PathBuf,
    initial_config: Arc<BuilderConfig>,
    config: RwLock<Arc<BuilderConfig>>,
    trees: RwLock<BTreeMap<String, ModuleTree>>,
    cache: Arc<LoadCache>,
    loader: Arc<dyn SourceLoader>,
    resolver: Option<Arc<dyn Resolve>>,
    plugins: Arc<PluginRegistry>,
    minifier: Arc<dyn Minifier>,
    encoder: Arc<dyn SourceMapEncoder>,
    writer: Arc<dyn FileWriter>,
    concurrency: usize,
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("root", &self.root)
            .field("config", &self.config())
            .field("cache", &self.cache.stats())
            .field("plugins", &self.plugins)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl Builder {
    /// A builder resolving `baseURL` against `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let initial = Arc::new(BuilderConfig::default());
        Self {
            root: root.into(),
            config: RwLock::new(Arc::clone(&initial)),
            initial_config: initial,
            trees: RwLock::new(BTreeMap::new()),
            cache: Arc::new(LoadCache::new()),
            loader: Arc::new(FsLoader),
            resolver: None,
            plugins: Arc::new(PluginRegistry::with_defaults()),
            minifier: Arc::new(LineMinifier),
            encoder: Arc::new(VlqEncoder),
            writer: Arc::new(FsWriter),
            concurrency: DEFAULT_LOAD_CONCURRENCY,
        }
    }

    /// Set the configuration [`Builder::reset`] returns to.
    ///
    /// # Errors
    ///
    /// Returns a config error when `config` does not validate.
    pub fn with_config(self, config: BuilderConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&config);
        Ok(Self {
            initial_config: config,
            ..self
        })
    }

    #[must_use]
    pub fn with_loader(mut self, loader: Arc<dyn SourceLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// Use `resolver` instead of resolving from the configuration.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolve>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    #[must_use]
    pub fn with_plugin(mut self, plugin: Arc<dyn LoaderPlugin>) -> Self {
        Arc::make_mut(&mut self.plugins).register(plugin);
        self
    }

    #[must_use]
    pub fn with_minifier(mut self, minifier: Arc<dyn Minifier>) -> Self {
        self.minifier = minifier;
        self
    }

    #[must_use]
    pub fn with_encoder(mut self, encoder: Arc<dyn SourceMapEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    #[must_use]
    pub fn with_writer(mut self, writer: Arc<dyn FileWriter>) -> Self {
        self.writer = writer;
        self
    }

    /// Maximum module loads in flight per trace.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Current configuration snapshot.
    #[must_use]
    pub fn config(&self) -> Arc<BuilderConfig> {
        Arc::clone(&self.config.read().unwrap_or_else(PoisonError::into_inner))
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Merge `config` into the current configuration.
    ///
    /// Loads cached under the previous configuration stay in the cache but
    /// no longer match, so the next trace reloads them.
    ///
    /// # Errors
    ///
    /// Returns a config error when the merged configuration does not validate;
    /// the current configuration is then left unchanged.
    pub fn configure(&self, config: BuilderConfig) -> Result<()> {
        let mut slot = self.config.write().unwrap_or_else(PoisonError::into_inner);
        let mut merged = BuilderConfig::clone(&slot);
        merged.merge(config);
        merged.validate()?;
        debug!(fingerprint = %merged.fingerprint(), "configuration updated");
        *slot = Arc::new(merged);
        Ok(())
    }

    /// Read a JSON config file and [`configure`](Self::configure) with it.
    ///
    /// # Errors
    ///
    /// Returns a config error naming the file when it cannot be read or parsed.
    pub async fn load_config(&self, path: impl AsRef<Path>) -> Result<()> {
        let config = config::load_config(path.as_ref()).await?;
        self.configure(config)
    }

    /// Blocking variant of [`load_config`](Self::load_config).
    ///
    /// # Errors
    ///
    /// Returns a config error naming the file when it cannot be read or parsed.
    pub fn load_config_sync(&self, path: impl AsRef<Path>) -> Result<()> {
        let config = config::load_config_sync(path.as_ref())?;
        self.configure(config)
    }

    /// Restore the construction-time configuration. The cache is kept.
    pub fn reset(&self) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) =
            Arc::clone(&self.initial_config);
    }

    /// Drop cached loads of `name`, or of every module. Returns how many
    /// cache entries went away.
    pub fn invalidate(&self, name: Option<&str>) -> usize {
        let Some(name) = name else {
            return self.cache.invalidate(None);
        };
        let mut removed = self.cache.invalidate(Some(name));
        let config = self.config();
        if let Ok(resolved) = self.resolver(&config).resolve(name, None) {
            if resolved.name != name {
                removed += self.cache.invalidate(Some(&resolved.name));
            }
        }
        removed
    }

    /// Register `tree` for use as `$name` in expressions.
    pub fn define_tree(&self, name: impl Into<String>, tree: ModuleTree) {
        self.trees
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), tree);
    }

    /// Evaluate a tree expression.
    ///
    /// # Errors
    ///
    /// Returns an expression error for malformed expressions or unknown
    /// variables, and resolution or load errors from tracing.
    pub async fn trace(&self, expression: &str) -> Result<ModuleTree> {
        let expr = expr::parse(expression)?;
        Ok(self.evaluate(&expr, None).await?.0)
    }

    /// Trace `names` and their dependencies, without expression parsing.
    ///
    /// # Errors
    ///
    /// Returns resolution or load errors from tracing.
    pub async fn trace_modules<I, S>(&self, names: I) -> Result<ModuleTree>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let expr = TreeExpr::modules(names);
        Ok(self.evaluate(&expr, None).await?.0)
    }

    /// Dynamic imports of every module in the traced tree, resolved.
    ///
    /// # Errors
    ///
    /// Same as [`trace`](Self::trace).
    pub async fn get_deferred_imports(
        &self,
        expression: &str,
    ) -> Result<BTreeMap<String, Vec<DeferredImport>>> {
        let expr = expr::parse(expression)?;
        let (tree, _) = self.evaluate(&expr, None).await?;
        let config = self.config();
        Ok(collect_deferred_imports(&tree, self.resolver(&config).as_ref()))
    }

    #[must_use]
    pub fn add_trees(&self, a: &ModuleTree, b: &ModuleTree) -> ModuleTree {
        tree::add_trees(a, b)
    }

    #[must_use]
    pub fn subtract_trees(&self, a: &ModuleTree, b: &ModuleTree) -> ModuleTree {
        tree::subtract_trees(a, b)
    }

    #[must_use]
    pub fn intersect_trees(&self, a: &ModuleTree, b: &ModuleTree) -> ModuleTree {
        tree::intersect_trees(a, b)
    }

    /// Bundle for a runtime loader, writing to `out` when given.
    ///
    /// Setting `global_name` makes the bundle self-executing.
    ///
    /// # Errors
    ///
    /// Returns expression, resolution, load, assembly or write errors.
    pub async fn bundle(
        &self,
        source: impl Into<BundleSource>,
        out: Option<&Path>,
        options: &BundleOptions,
    ) -> Result<BundleOutput> {
        self.run(source.into(), out, options, false).await
    }

    /// Bundle that runs its entry modules without a loader.
    ///
    /// # Errors
    ///
    /// Same as [`bundle`](Self::bundle).
    pub async fn build_static(
        &self,
        source: impl Into<BundleSource>,
        out: Option<&Path>,
        options: &BundleOptions,
    ) -> Result<BundleOutput> {
        self.run(source.into(), out, options, true).await
    }

    async fn run(
        &self,
        source: BundleSource,
        out: Option<&Path>,
        options: &BundleOptions,
        self_executing: bool,
    ) -> Result<BundleOutput> {
        let started = Instant::now();
        let format: OutputFormat = options.format.parse()?;

        let (tree, entries) = match source {
            BundleSource::Expression(text) => {
                let expr = expr::parse(&text)?;
                self.evaluate(&expr, options.fetch.clone()).await?
            }
            BundleSource::Modules(names) => {
                let expr = TreeExpr::modules(names);
                self.evaluate(&expr, options.fetch.clone()).await?
            }
            BundleSource::Tree(tree) => (tree, Vec::new()),
        };

        let assembly = assemble(
            &tree,
            &AssembleOptions {
                format,
                self_executing: self_executing || options.global_name.is_some(),
                entries,
                global_name: options.global_name.clone(),
                global_deps: options.global_deps.clone(),
                normalize: options.normalize,
                anonymous: options.anonymous,
                system_global: options.system_global.clone(),
                source_maps: options.source_maps,
            },
        )?;

        let mut code = assembly.source;
        let mut map_spec = assembly.source_map;
        if options.minify {
            let minified = self.minifier.minify(
                &code,
                map_spec.as_ref().map(|spec| spec.mappings.as_slice()),
                &MinifyOptions {
                    mangle: options.mangle,
                    uglify: options.uglify.clone(),
                },
            )?;
            code = minified.code;
            if let (Some(spec), Some(mappings)) = (map_spec.as_mut(), minified.mappings) {
                spec.mappings = mappings;
            }
        }

        let file_name = out
            .and_then(Path::file_name)
            .and_then(|n| n.to_str())
            .unwrap_or("bundle.js")
            .to_string();
        let source_map = map_spec.map(|spec| {
            self.encoder.encode(
                &file_name,
                &spec,
                EncodeOptions {
                    include_contents: options.source_map_contents,
                    low_resolution: options.low_res_source_maps,
                },
            )
        });

        if let Some(out) = out {
            if let Some(map) = &source_map {
                let map_path = map_path(out);
                self.writer.write(&map_path, map)?;
                if !code.ends_with('\n') {
                    code.push('\n');
                }
                code.push_str("//# sourceMappingURL=");
                code.push_str(&file_name);
                code.push_str(".map\n");
            }
            self.writer.write(out, &code)?;
        }

        info!(
            format = %format,
            modules = assembly.modules.len(),
            bytes = code.len(),
            duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "bundle complete"
        );
        Ok(BundleOutput {
            source: code,
            source_map,
            modules: assembly.modules,
        })
    }

    fn resolver(&self, config: &Arc<BuilderConfig>) -> Arc<dyn Resolve> {
        match &self.resolver {
            Some(resolver) => Arc::clone(resolver),
            None => Arc::new(ConfigResolver::new(Arc::clone(config), self.base_dir(config))),
        }
    }

    /// Absolute directory that module names are relative to.
    fn base_dir(&self, config: &BuilderConfig) -> PathBuf {
        match config.base_url() {
            "." | "" => self.root.clone(),
            base => self.root.join(base).components().collect(),
        }
    }

    /// Trace every module leaf of `expr` and combine the results. Also
    /// returns the resolved entry names in expression order.
    async fn evaluate(
        &self,
        expr: &TreeExpr,
        fetch: Option<FetchHook>,
    ) -> Result<(ModuleTree, Vec<String>)> {
        let config = self.config();
        let base_dir = self.base_dir(&config);
        let resolver = self.resolver(&config);
        let ctx = TraceContext {
            fingerprint: config.fingerprint(),
            config: Arc::clone(&config),
            resolver: Arc::clone(&resolver),
            cache: Arc::clone(&self.cache),
            loader: Arc::clone(&self.loader),
            plugins: Arc::clone(&self.plugins),
            fetch,
            concurrency: self.concurrency,
        };

        let mut seen: HashSet<&ModuleLeaf> = HashSet::new();
        let mut plans: Vec<(ModuleLeaf, Vec<TraceEntry>)> = Vec::new();
        for leaf in expr.module_leaves() {
            if !seen.insert(leaf) {
                continue;
            }
            let mut entries = Vec::new();
            for name in &leaf.names {
                for expanded in expand_wildcard(name, &base_dir)? {
                    entries.push(if leaf.follow_dependencies {
                        TraceEntry::new(expanded)
                    } else {
                        TraceEntry::module_only(expanded)
                    });
                }
            }
            plans.push((leaf.clone(), entries));
        }

        let traced: HashMap<ModuleLeaf, ModuleTree> = try_join_all(plans.into_iter().map(|(leaf, entries)| {
            let tracer = Tracer::new(ctx.clone());
            async move { tracer.trace(&entries).await.map(|tree| (leaf, tree)) }
        }))
        .await?
        .into_iter()
        .collect();

        let variables = self
            .trees
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let tree = expr.evaluate(&traced, &variables)?;

        let mut entries: Vec<String> = Vec::new();
        for name in expr.entry_names() {
            for expanded in expand_wildcard(name, &base_dir)? {
                if let Ok(module) = resolver.resolve(&expanded, None) {
                    if !entries.contains(&module.name) {
                        entries.push(module.name);
                    }
                }
            }
        }
        debug!(modules = tree.len(), entries = entries.len(), "expression evaluated");
        Ok((tree, entries))
    }
}

/// `<out>.map` next to the bundle.
fn map_path(out: &Path) -> PathBuf {
    let mut name = out.as_os_str().to_os_string();
    name.push(".map");
    PathBuf::from(name)
}

/// Expand a `*` name into the matching files under `base_dir`, sorted.
fn expand_wildcard(name: &str, base_dir: &Path) -> Result<Vec<String>> {
    if !name.contains('*') {
        return Ok(vec![name.to_string()]);
    }
    let fail = |reason: String| BuilderError::resolution(name, None, reason);
    let pattern = base_dir.join(name);
    let pattern = pattern
        .to_str()
        .ok_or_else(|| fail("pattern is not valid UTF-8".to_string()))?;
    let paths = glob::glob(pattern).map_err(|e| fail(format!("invalid wildcard: {e}")))?;

    let mut names: Vec<String> = paths
        .filter_map(std::result::Result::ok)
        .filter(|path| path.is_file())
        .filter_map(|path| {
            path.strip_prefix(base_dir)
                .ok()
                .and_then(to_slash_relative)
        })
        .collect();
    names.sort();
    if names.is_empty() {
        return Err(fail("wildcard matched no modules".to_string()));
    }
    Ok(names)
}
