//! Module name resolution.
//!
//! The tracer only talks to [`Resolve`]. [`ConfigResolver`] implements the
//! subset of the loader configuration language that [`BuilderConfig`]
//! models: plugin suffixes, relative names, `map`, `paths`, packages and
//! default extensions.

use crate::config::{match_wildcard, BuilderConfig};
use crate::error::{BuilderError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Name of the module that stands in for anything mapped away.
pub const EMPTY_MODULE: &str = "@empty";

/// Outcome of resolving one module name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModule {
    /// Normalized name, including any `!plugin` suffix.
    pub name: String,
    /// Location of the module source. Empty for [`EMPTY_MODULE`].
    pub path: PathBuf,
    /// Loader plugin named by the `!plugin` suffix.
    pub plugin: Option<String>,
}

impl ResolvedModule {
    #[must_use]
    pub fn is_empty_module(&self) -> bool {
        self.name == EMPTY_MODULE
    }
}

/// Resolver adapter used by the tracer.
pub trait Resolve: Send + Sync {
    /// Resolve `name` as imported by the normalized module `parent`.
    ///
    /// `parent` is `None` for entry points.
    fn resolve(&self, name: &str, parent: Option<&str>) -> Result<ResolvedModule>;
}

/// Default resolver driven by a [`BuilderConfig`] snapshot.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    config: Arc<BuilderConfig>,
    base_dir: PathBuf,
}

impl ConfigResolver {
    /// `base_dir` is the absolute directory that module names are relative to.
    #[must_use]
    pub fn new(config: Arc<BuilderConfig>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            base_dir: base_dir.into(),
        }
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn resolve_module(&self, name: &str, parent: Option<&str>) -> Result<String> {
        if name == EMPTY_MODULE {
            return Ok(EMPTY_MODULE.to_string());
        }

        let fail = |reason: &str| BuilderError::resolution(name, parent, reason);

        let candidate = if is_relative(name) {
            let parent = parent.map(strip_plugin);
            let local = parent.and_then(|p| self.package_local_map(p, name));
            match local {
                Some(mapped) if is_relative(&mapped) => join_relative(parent, &mapped),
                Some(mapped) => self.apply_map(&mapped),
                None => join_relative(parent, name),
            }
        } else if Path::new(name).is_absolute() {
            let path = dunce::simplified(Path::new(name));
            let relative = path
                .strip_prefix(&self.base_dir)
                .map_err(|_| fail("absolute path is outside the base URL"))?;
            relative
                .to_str()
                .ok_or_else(|| fail("path is not valid UTF-8"))?
                .replace('\\', "/")
        } else {
            self.apply_map(name)
        };

        if candidate == EMPTY_MODULE {
            return Ok(candidate);
        }

        let normalized = normalize_segments(&candidate).ok_or_else(|| fail("name escapes the base URL"))?;
        if normalized.is_empty() {
            return Err(fail("name is empty after normalization"));
        }
        Ok(self.apply_package_defaults(normalized))
    }

    fn package_local_map(&self, parent: &str, name: &str) -> Option<String> {
        let (pkg_name, pkg) = self.config.package_for(parent)?;
        let target = pkg.map.get(name)?;
        if let Some(rest) = target.strip_prefix("./") {
            Some(format!("{pkg_name}/{rest}"))
        } else {
            Some(target.clone())
        }
    }

    fn apply_map(&self, name: &str) -> String {
        let best = self
            .config
            .map
            .iter()
            .filter(|(key, _)| {
                name == key.as_str()
                    || (name.starts_with(key.as_str())
                        && name.as_bytes().get(key.len()) == Some(&b'/'))
            })
            .max_by_key(|(key, _)| key.len());

        match best {
            Some((key, target)) => {
                let mapped = format!("{target}{}", &name[key.len()..]);
                mapped.strip_prefix("./").map(str::to_string).unwrap_or(mapped)
            }
            None => name.to_string(),
        }
    }

    fn apply_package_defaults(&self, name: String) -> String {
        let name = match self.config.packages.get(&name) {
            Some(pkg) => {
                let main = pkg.main.as_deref().unwrap_or("index.js");
                format!("{name}/{}", main.trim_start_matches("./"))
            }
            None => name,
        };

        let last_segment = name.rsplit('/').next().unwrap_or(&name);
        if last_segment.contains('.') {
            return name;
        }

        let package_ext = self
            .config
            .package_for(&name)
            .and_then(|(_, pkg)| pkg.default_extension.clone());
        match package_ext {
            Some(ext) if ext.is_empty() => name,
            Some(ext) => format!("{name}.{}", ext.trim_start_matches('.')),
            None if self.config.default_js_extensions.unwrap_or(false) => format!("{name}.js"),
            None => name,
        }
    }

    fn locate(&self, name: &str) -> PathBuf {
        let best = self
            .config
            .paths
            .iter()
            .filter_map(|(pattern, target)| {
                if pattern.contains('*') {
                    match_wildcard(pattern, name).map(|hit| (pattern.len(), target.replace('*', hit)))
                } else if pattern == name {
                    Some((usize::MAX, target.clone()))
                } else {
                    None
                }
            })
            .max_by_key(|(specificity, _)| *specificity)
            .map(|(_, target)| target);

        let location = best.unwrap_or_else(|| name.to_string());
        let location = Path::new(&location);
        if location.is_absolute() {
            return location.to_path_buf();
        }
        let mut path = self.base_dir.clone();
        for segment in location.to_string_lossy().split('/').filter(|s| !s.is_empty() && *s != ".") {
            path.push(segment);
        }
        path
    }
}

impl Resolve for ConfigResolver {
    fn resolve(&self, name: &str, parent: Option<&str>) -> Result<ResolvedModule> {
        let (module, plugin) = split_plugin(name);
        let module_name = self.resolve_module(module, parent)?;

        if module_name == EMPTY_MODULE {
            return Ok(ResolvedModule {
                name: EMPTY_MODULE.to_string(),
                path: PathBuf::new(),
                plugin: None,
            });
        }

        let path = self.locate(&module_name);
        let plugin = plugin.map(|p| {
            if p.is_empty() {
                module_name
                    .rsplit_once('.')
                    .map(|(_, ext)| ext.to_string())
                    .unwrap_or_default()
            } else {
                p.to_string()
            }
        });

        let name = match &plugin {
            Some(p) => format!("{module_name}!{p}"),
            None => module_name,
        };
        Ok(ResolvedModule { name, path, plugin })
    }
}

/// Split `module!plugin` into its parts. Names without `!` have no plugin.
#[must_use]
pub fn split_plugin(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('!') {
        Some((module, plugin)) if !module.is_empty() => (module, Some(plugin)),
        _ => (name, None),
    }
}

fn strip_plugin(name: &str) -> &str {
    split_plugin(name).0
}

fn is_relative(name: &str) -> bool {
    name == "." || name == ".." || name.starts_with("./") || name.starts_with("../")
}

fn join_relative(parent: Option<&str>, name: &str) -> String {
    let dir = parent
        .and_then(|p| p.rsplit_once('/').map(|(dir, _)| dir))
        .unwrap_or("");
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Collapse `.`, `..` and empty segments. `None` if `..` climbs above the root.
fn normalize_segments(name: &str) -> Option<String> {
    let mut out: Vec<&str> = Vec::new();
    for segment in name.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                out.pop()?;
            }
            s => out.push(s),
        }
    }
    Some(out.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(json: &str) -> ConfigResolver {
        let config = BuilderConfig::from_json_str(json).unwrap();
        ConfigResolver::new(Arc::new(config), "/project/src")
    }

    #[test]
    fn test_relative_to_parent_directory() {
        let r = resolver("{}");
        let m = r.resolve("./b.js", Some("app/lib/a.js")).unwrap();
        assert_eq!(m.name, "app/lib/b.js");
        assert_eq!(m.path, PathBuf::from("/project/src/app/lib/b.js"));

        let up = r.resolve("../util.js", Some("app/lib/a.js")).unwrap();
        assert_eq!(up.name, "app/util.js");
    }

    #[test]
    fn test_entry_relative_name_is_base_relative() {
        let r = resolver("{}");
        assert_eq!(r.resolve("./app/main.js", None).unwrap().name, "app/main.js");
    }

    #[test]
    fn test_escaping_base_fails() {
        let r = resolver("{}");
        let err = r.resolve("../../x.js", Some("app/a.js")).unwrap_err();
        assert_eq!(err.code(), crate::error::codes::RESOLUTION_ERROR);
    }

    #[test]
    fn test_absolute_path_under_base() {
        let r = resolver("{}");
        assert_eq!(
            r.resolve("/project/src/app/a.js", None).unwrap().name,
            "app/a.js"
        );
        assert!(r.resolve("/elsewhere/a.js", None).is_err());
    }

    #[test]
    fn test_map_longest_prefix() {
        let r = resolver(
            r#"{ "map": { "lib": "vendor/lib", "lib/special": "special", "jquery": "vendor/jquery.js" } }"#,
        );
        assert_eq!(r.resolve("jquery", None).unwrap().name, "vendor/jquery.js");
        assert_eq!(r.resolve("lib/a.js", Some("app/x.js")).unwrap().name, "vendor/lib/a.js");
        assert_eq!(r.resolve("lib/special/b.js", None).unwrap().name, "special/b.js");
        assert_eq!(r.resolve("libx/a.js", None).unwrap().name, "libx/a.js");
    }

    #[test]
    fn test_map_to_empty() {
        let r = resolver(r#"{ "map": { "fs": "@empty" } }"#);
        let m = r.resolve("fs", Some("app/a.js")).unwrap();
        assert!(m.is_empty_module());
        assert_eq!(m.path, PathBuf::new());
    }

    #[test]
    fn test_paths_change_location_only() {
        let r = resolver(r#"{ "paths": { "cdn/*": "vendor/cdn/*.js", "react": "/opt/react.js" } }"#);
        let m = r.resolve("cdn/lodash", None).unwrap();
        assert_eq!(m.name, "cdn/lodash");
        assert_eq!(m.path, PathBuf::from("/project/src/vendor/cdn/lodash.js"));
        assert_eq!(r.resolve("react", None).unwrap().path, PathBuf::from("/opt/react.js"));
    }

    #[test]
    fn test_package_main_and_default_extension() {
        let r = resolver(
            r#"{ "packages": { "app": { "main": "./main", "defaultExtension": "js", "map": { "./env": "./env-browser" } } } }"#,
        );
        assert_eq!(r.resolve("app", None).unwrap().name, "app/main.js");
        assert_eq!(r.resolve("./util", Some("app/main.js")).unwrap().name, "app/util.js");
        assert_eq!(r.resolve("./env", Some("app/main.js")).unwrap().name, "app/env-browser.js");
    }

    #[test]
    fn test_default_js_extensions() {
        let r = resolver(r#"{ "defaultJSExtensions": true }"#);
        assert_eq!(r.resolve("./b", Some("app/a.js")).unwrap().name, "app/b.js");
        assert_eq!(r.resolve("./data.json", Some("app/a.js")).unwrap().name, "app/data.json");
    }

    #[test]
    fn test_plugin_suffix() {
        let r = resolver("{}");
        let explicit = r.resolve("./style.css!text", Some("app/a.js")).unwrap();
        assert_eq!(explicit.name, "app/style.css!text");
        assert_eq!(explicit.plugin.as_deref(), Some("text"));
        assert_eq!(explicit.path, PathBuf::from("/project/src/app/style.css"));

        let by_ext = r.resolve("./data.json!", Some("app/a.js")).unwrap();
        assert_eq!(by_ext.name, "app/data.json!json");
    }

    #[test]
    fn test_relative_to_plugin_parent() {
        let r = resolver("{}");
        let m = r.resolve("./other.css", Some("app/style.css!text")).unwrap();
        assert_eq!(m.name, "app/other.css");
    }

    #[test]
    fn test_split_plugin() {
        assert_eq!(split_plugin("a.css!css"), ("a.css", Some("css")));
        assert_eq!(split_plugin("a.js"), ("a.js", None));
        assert_eq!(split_plugin("!x"), ("!x", None));
    }
}
