//! Builder configuration.
//!
//! A small, serde-backed subset of the loader configuration language:
//! `baseURL`, `map`, `paths`, `packages`, `meta` and `defaultJSExtensions`.
//! Configurations merge key by key, and the active configuration is
//! identified by its fingerprint, a blake3 digest of its canonical JSON form.

use crate::error::{BuilderError, Result};
use crate::tree::ModuleFormat;
use fastpack_util::hash::blake3_bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Top-level builder configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuilderConfig {
    /// Directory module names are relative to, itself relative to the builder root.
    #[serde(rename = "baseURL", skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Append `.js` to names without an extension.
    #[serde(rename = "defaultJSExtensions", skip_serializing_if = "Option::is_none")]
    pub default_js_extensions: Option<bool>,

    /// Name prefix mapping. The longest matching key wins.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub map: BTreeMap<String, String>,

    /// Wildcard path mapping, e.g. `"lib/*": "vendor/lib/*"`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub paths: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub packages: BTreeMap<String, PackageConfig>,

    /// Per-module metadata; keys may contain one `*`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, MetaConfig>,
}

/// Configuration for one package directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PackageConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<ModuleFormat>,
    /// Extension added to extensionless names inside the package. Empty disables it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_extension: Option<String>,
    /// Package-local map, applied to `./`-relative names inside the package.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub map: BTreeMap<String, String>,
    /// Meta keyed relative to the package directory.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, MetaConfig>,
    /// Package configuration file traced alongside the package, e.g. `package.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_module: Option<String>,
}

/// Module metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetaConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<ModuleFormat>,
    /// Extra dependencies, traced before the ones found in source.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deps: Vec<String>,
    /// Global name a global-format module exports.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exports: Option<String>,
    /// `false` keeps the module out of bundles.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<bool>,
    /// Loader plugin name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loader: Option<String>,
    /// Failures to resolve or load this module are ignored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
}

impl MetaConfig {
    /// Overlay `other` on top of `self`. Scalars in `other` win; deps accumulate.
    pub fn merge(&mut self, other: &MetaConfig) {
        if other.format.is_some() {
            self.format = other.format;
        }
        for dep in &other.deps {
            if !self.deps.contains(dep) {
                self.deps.push(dep.clone());
            }
        }
        if other.exports.is_some() {
            self.exports.clone_from(&other.exports);
        }
        if other.build.is_some() {
            self.build = other.build;
        }
        if other.loader.is_some() {
            self.loader.clone_from(&other.loader);
        }
        if other.optional.is_some() {
            self.optional = other.optional;
        }
    }

    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.optional.unwrap_or(false)
    }
}

impl PackageConfig {
    fn merge(&mut self, other: PackageConfig) {
        if other.main.is_some() {
            self.main = other.main;
        }
        if other.format.is_some() {
            self.format = other.format;
        }
        if other.default_extension.is_some() {
            self.default_extension = other.default_extension;
        }
        if other.config_module.is_some() {
            self.config_module = other.config_module;
        }
        self.map.extend(other.map);
        for (key, meta) in other.meta {
            self.meta.entry(key).or_default().merge(&meta);
        }
    }
}

impl BuilderConfig {
    /// Parse a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| BuilderError::config(format!("malformed config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Merge `other` into `self`; keys present in `other` override.
    pub fn merge(&mut self, other: BuilderConfig) {
        if other.base_url.is_some() {
            self.base_url = other.base_url;
        }
        if other.default_js_extensions.is_some() {
            self.default_js_extensions = other.default_js_extensions;
        }
        self.map.extend(other.map);
        self.paths.extend(other.paths);
        for (name, pkg) in other.packages {
            self.packages.entry(name).or_default().merge(pkg);
        }
        for (key, meta) in other.meta {
            self.meta.entry(key).or_default().merge(&meta);
        }
    }

    /// Reject configurations the resolver cannot interpret.
    pub fn validate(&self) -> Result<()> {
        for key in self.map.keys() {
            if key.is_empty() {
                return Err(BuilderError::config("map keys must not be empty"));
            }
        }
        for (key, target) in &self.paths {
            check_wildcard("paths", key)?;
            check_wildcard("paths", target)?;
        }
        for key in self.meta.keys() {
            check_wildcard("meta", key)?;
        }
        for (name, pkg) in &self.packages {
            if name.is_empty() || name.contains('*') {
                return Err(BuilderError::config(format!(
                    "invalid package name '{name}'"
                )));
            }
            for key in pkg.meta.keys() {
                check_wildcard("package meta", key)?;
            }
        }
        Ok(())
    }

    /// Hex digest identifying this configuration in the load cache.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        // BTreeMap fields give a canonical key order.
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        blake3_bytes(&canonical)
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(".")
    }

    /// The package containing `name`, as `(package_name, config)`.
    ///
    /// The longest package name that equals `name` or is a `/`-bounded prefix wins.
    #[must_use]
    pub fn package_for(&self, name: &str) -> Option<(&str, &PackageConfig)> {
        self.packages
            .iter()
            .filter(|(pkg, _)| {
                name == pkg.as_str()
                    || (name.starts_with(pkg.as_str())
                        && name.as_bytes().get(pkg.len()) == Some(&b'/'))
            })
            .max_by_key(|(pkg, _)| pkg.len())
            .map(|(pkg, cfg)| (pkg.as_str(), cfg))
    }

    /// Effective metadata for a normalized module name.
    ///
    /// Wildcard entries apply first, less specific before more specific,
    /// then the exact entry, then package meta and package format.
    #[must_use]
    pub fn meta_for(&self, name: &str) -> MetaConfig {
        let mut merged = MetaConfig::default();
        apply_meta(&mut merged, &self.meta, name);

        if let Some((pkg_name, pkg)) = self.package_for(name) {
            if merged.format.is_none() {
                merged.format = pkg.format;
            }
            let subpath = name
                .strip_prefix(pkg_name)
                .map(|rest| rest.trim_start_matches('/'))
                .unwrap_or_default();
            if !subpath.is_empty() {
                apply_meta(&mut merged, &pkg.meta, subpath);
            }
        }
        merged
    }
}

fn apply_meta(merged: &mut MetaConfig, table: &BTreeMap<String, MetaConfig>, name: &str) {
    let mut wildcards: Vec<(&String, &MetaConfig)> = table
        .iter()
        .filter(|(pattern, _)| pattern.contains('*') && match_wildcard(pattern, name).is_some())
        .collect();
    wildcards.sort_by_key(|(pattern, _)| pattern.len());
    for (_, meta) in wildcards {
        merged.merge(meta);
    }
    if let Some(meta) = table.get(name) {
        merged.merge(meta);
    }
}

fn check_wildcard(section: &str, pattern: &str) -> Result<()> {
    if pattern.matches('*').count() > 1 {
        return Err(BuilderError::config(format!(
            "{section} pattern '{pattern}' has more than one '*'"
        )));
    }
    Ok(())
}

/// Match a single-`*` pattern, returning the text the `*` stands for.
#[must_use]
pub fn match_wildcard<'a>(pattern: &str, name: &'a str) -> Option<&'a str> {
    let (prefix, suffix) = pattern.split_once('*')?;
    if name.len() < prefix.len() + suffix.len() {
        return None;
    }
    let rest = name.strip_prefix(prefix)?;
    rest.strip_suffix(suffix)
}

/// Read and parse a JSON config file.
pub async fn load_config(path: &Path) -> Result<BuilderConfig> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| read_error(path, &e))?;
    BuilderConfig::from_json_str(&text).map_err(|e| with_path(e, path))
}

/// Blocking variant of [`load_config`].
pub fn load_config_sync(path: &Path) -> Result<BuilderConfig> {
    let text = std::fs::read_to_string(path).map_err(|e| read_error(path, &e))?;
    BuilderConfig::from_json_str(&text).map_err(|e| with_path(e, path))
}

fn read_error(path: &Path, e: &std::io::Error) -> BuilderError {
    BuilderError::Config {
        message: format!("cannot read config file: {e}"),
        path: Some(path.to_path_buf()),
    }
}

fn with_path(err: BuilderError, file: &Path) -> BuilderError {
    match err {
        BuilderError::Config { message, .. } => BuilderError::Config {
            message,
            path: Some(file.to_path_buf()),
        },
        other => other,
    }
}
