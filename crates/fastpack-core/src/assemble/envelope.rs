//! Output envelopes.
//!
//! Two layers: every module body is wrapped in a registration call, and the
//! whole bundle gets a header and footer. Loader bundles register modules
//! with a host loader (`System.registerDynamic`, AMD `define`, or, for UMD,
//! whichever is present). Self-executing bundles carry a small runtime,
//! evaluate their roots on load and hand the result to the outer format.

use super::js_string;
use super::transform::{Line, GLOBAL_OBJECT};
use crate::error::{BuilderError, Result};
use crate::tree::{ModuleFormat, TreeNode};
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Bundle output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    #[default]
    Umd,
    Register,
    Amd,
    Cjs,
    Esm,
    Global,
}

impl OutputFormat {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Umd => "umd",
            Self::Register => "register",
            Self::Amd => "amd",
            Self::Cjs => "cjs",
            Self::Esm => "esm",
            Self::Global => "global",
        }
    }

    /// Formats that only make sense for a self-executing bundle.
    #[must_use]
    pub fn requires_self_executing(self) -> bool {
        matches!(self, Self::Cjs | Self::Esm | Self::Global)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = BuilderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "umd" => Ok(Self::Umd),
            "register" | "system" => Ok(Self::Register),
            "amd" => Ok(Self::Amd),
            "cjs" | "commonjs" => Ok(Self::Cjs),
            "esm" | "es6" | "es" => Ok(Self::Esm),
            "global" | "iife" => Ok(Self::Global),
            other => Err(BuilderError::assembly(
                None,
                format!("unknown output format '{other}'"),
            )),
        }
    }
}

/// Module registry used by self-executing bundles and by UMD bundles that
/// find no host loader. Records are cached before a factory runs, so a
/// cycle sees the partially filled exports of the module that started it.
/// UMD bundles share one instance through `global.__fastpack`.
const RUNTIME: &str = r#"function (externals) {
  var defs = [], byName = {}, records = [];
  var has = Object.prototype.hasOwnProperty;
  function load(id) {
    if (records[id]) return records[id].exports;
    var def = defs[id];
    var module = records[id] = { id: id, exports: {} };
    def.factory.call(module.exports, function (dep) { return resolve(def.deps, dep); }, module.exports, module);
    return module.exports;
  }
  function resolve(deps, dep) {
    var target = has.call(deps, dep) ? deps[dep] : dep;
    if (typeof target === "number") return load(target);
    if (has.call(byName, target)) return load(byName[target]);
    if (has.call(externals, target)) return externals[target];
    throw new Error("Module " + target + " is not part of this bundle");
  }
  return {
    define: function (name, deps, factory) {
      if (name !== null) byName[name] = defs.length;
      defs.push({ deps: deps, factory: factory });
    },
    load: load,
    size: function () { return defs.length; },
    require: function (name) { return resolve({}, name); }
  };
}"#;

/// A dependency that is not part of the bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct External {
    /// Resolved name.
    pub name: String,
    /// Name as written by the first importer.
    pub written: String,
    pub importer: String,
}

pub(crate) struct EnvelopeOptions<'a> {
    pub format: OutputFormat,
    pub self_executing: bool,
    pub anonymous: bool,
    pub normalize: bool,
    pub system_global: &'a str,
    pub global_name: Option<&'a str>,
    pub global_deps: &'a BTreeMap<String, String>,
}

pub(crate) struct Envelope<'a> {
    options: EnvelopeOptions<'a>,
    /// Emitted module name to its position in the bundle.
    index: FxHashMap<&'a str, usize>,
    externals: Vec<External>,
    /// Emission positions of the modules a self-executing bundle evaluates.
    roots: Vec<(&'a str, usize)>,
}

impl<'a> Envelope<'a> {
    pub(crate) fn new(
        options: EnvelopeOptions<'a>,
        emitted: &[&'a Arc<TreeNode>],
        roots: &[&'a str],
    ) -> Result<Self> {
        if options.format.requires_self_executing() && !options.self_executing {
            return Err(BuilderError::assembly(
                None,
                format!(
                    "output format '{}' needs a self-executing bundle (build static or set a global name)",
                    options.format
                ),
            ));
        }
        if options.format == OutputFormat::Register && options.self_executing {
            return Err(BuilderError::assembly(
                None,
                "output format 'register' cannot be self-executing",
            ));
        }

        let index: FxHashMap<&str, usize> = emitted
            .iter()
            .enumerate()
            .map(|(i, node)| (node.name.as_str(), i))
            .collect();

        let mut externals: Vec<External> = Vec::new();
        for node in emitted {
            for written in &node.dependencies {
                let Some(resolved) = node.dependency_map.get(written) else {
                    continue;
                };
                if index.contains_key(resolved.as_str())
                    || externals.iter().any(|e| &e.name == resolved)
                {
                    continue;
                }
                externals.push(External {
                    name: resolved.clone(),
                    written: written.clone(),
                    importer: node.name.clone(),
                });
            }
        }

        let roots = roots
            .iter()
            .filter_map(|name| index.get(name).map(|&i| (*name, i)))
            .collect();

        let envelope = Self {
            options,
            index,
            externals,
            roots,
        };
        if envelope.options.self_executing && envelope.options.format == OutputFormat::Global {
            for external in &envelope.externals {
                if envelope.global_for(external).is_none() {
                    return Err(BuilderError::assembly(
                        Some(&external.importer),
                        format!(
                            "external dependency '{}' has no globalDeps entry",
                            external.name
                        ),
                    ));
                }
            }
        }
        Ok(envelope)
    }

    fn global_for(&self, external: &External) -> Option<&'a str> {
        self.options
            .global_deps
            .get(&external.name)
            .or_else(|| self.options.global_deps.get(&external.written))
            .map(String::as_str)
    }

    /// Wrap one module body in its registration call.
    pub(crate) fn wrap_module(&self, node: &TreeNode, body: Vec<Line>) -> Result<Vec<Line>> {
        if node.metadata.format == ModuleFormat::Register {
            if self.options.self_executing || self.options.format != OutputFormat::Register {
                return Err(BuilderError::assembly(
                    Some(&node.name),
                    format!(
                        "System.register module cannot be emitted as {}{}",
                        self.options.format,
                        if self.options.self_executing { " (self-executing)" } else { "" }
                    ),
                ));
            }
            return Ok(self.register_passthrough(node, body));
        }

        let name = if self.options.anonymous {
            None
        } else {
            Some(js_string(&node.name))
        };
        let factory = "function (require, exports, module) {";
        let open = if self.options.self_executing {
            format!(
                "__fp.define({}, {}, {factory}",
                name.as_deref().unwrap_or("null"),
                self.dependency_map(node)
            )
        } else {
            match self.options.format {
                OutputFormat::Register => format!(
                    "{}.registerDynamic({}{}, true, {factory}",
                    self.options.system_global,
                    name.map(|n| format!("{n}, ")).unwrap_or_default(),
                    self.dependency_list(node, &[])
                ),
                OutputFormat::Amd => format!(
                    "define({}{}, {factory}",
                    name.map(|n| format!("{n}, ")).unwrap_or_default(),
                    self.dependency_list(node, &["require", "exports", "module"])
                ),
                _ => format!(
                    "__fpRegister({}, {}, {}, {factory}",
                    name.as_deref().unwrap_or("null"),
                    self.dependency_list(node, &[]),
                    self.dependency_map(node)
                ),
            }
        };

        let mut lines = Vec::with_capacity(body.len() + 2);
        lines.push(Line::synthetic(open));
        lines.extend(body);
        lines.push(Line::synthetic("});"));
        Ok(lines)
    }

    /// JSON array of dependency names handed to a host loader.
    fn dependency_list(&self, node: &TreeNode, leading: &[&str]) -> String {
        let mut deps: Vec<&str> = leading.to_vec();
        for written in &node.dependencies {
            let Some(resolved) = node.dependency_map.get(written) else {
                continue;
            };
            deps.push(if self.options.normalize { resolved } else { written });
        }
        serde_json::to_string(&deps).unwrap_or_else(|_| "[]".to_string())
    }

    /// JSON object mapping each written dependency to the module it resolves
    /// to: an emission position for anonymous bundles, a name otherwise.
    fn dependency_map(&self, node: &TreeNode) -> String {
        let mut map: BTreeMap<&str, Value> = BTreeMap::new();
        for written in &node.dependencies {
            let Some(resolved) = node.dependency_map.get(written) else {
                continue;
            };
            let target = match self.index.get(resolved.as_str()) {
                Some(&i) if self.options.anonymous => Value::from(i),
                _ => Value::from(resolved.as_str()),
            };
            if self.options.normalize {
                map.insert(resolved, target.clone());
            }
            map.insert(written, target);
        }
        serde_json::to_string(&map).unwrap_or_else(|_| "{}".to_string())
    }

    /// Name an anonymous `System.register` call and point it at the
    /// configured loader global.
    fn register_passthrough(&self, node: &TreeNode, body: Vec<Line>) -> Vec<Line> {
        let mut done = false;
        body.into_iter()
            .map(|line| {
                if done {
                    return line;
                }
                let Some(text) = self.rename_register_call(&node.name, &line.text) else {
                    return line;
                };
                done = true;
                let origin = line.origin.map(|o| o.line as usize);
                match origin {
                    Some(l) => Line::rewritten(text, l),
                    None => Line::synthetic(text),
                }
            })
            .collect()
    }

    fn rename_register_call(&self, name: &str, text: &str) -> Option<String> {
        let at = text.find("System.register")?;
        let mut method_end = at + "System.register".len();
        if text[method_end..].starts_with("Dynamic") {
            method_end += "Dynamic".len();
        }
        let method = &text[at + "System.".len()..method_end];
        let rest = &text[method_end..];
        let paren = rest.find('(').filter(|&p| rest[..p].trim().is_empty())?;
        let args = &rest[paren + 1..];

        let mut out = String::with_capacity(text.len() + name.len() + 4);
        out.push_str(&text[..at]);
        out.push_str(self.options.system_global);
        out.push('.');
        out.push_str(method);
        out.push('(');
        if !self.options.anonymous && args.trim_start().starts_with('[') {
            out.push_str(&js_string(name));
            out.push_str(", ");
        }
        out.push_str(args);
        (out != text).then_some(out)
    }

    /// Text before the first module.
    pub(crate) fn header(&self) -> String {
        if !self.options.self_executing {
            return match self.options.format {
                OutputFormat::Umd => self.umd_dispatcher(),
                _ => String::new(),
            };
        }

        let params = self.external_params();
        let outer = match self.options.format {
            OutputFormat::Umd => {
                let amd_deps = self.external_names_json();
                let cjs_args = self.external_args(|e| format!("require({})", js_string(&e.name)));
                let root_args = self.external_args(|e| match self.global_for(e) {
                    Some(global) => global.to_string(),
                    None => format!("root[{}]", js_string(&e.name)),
                });
                format!(
                    "(function (root, factory) {{\n  if (typeof define === \"function\" && define.amd) define({amd_deps}, factory);\n  else if (typeof module === \"object\" && module.exports) module.exports = factory({cjs_args});\n  else factory({root_args});\n}})({GLOBAL_OBJECT}, function ({params}) {{"
                )
            }
            OutputFormat::Cjs => format!("module.exports = (function ({params}) {{"),
            OutputFormat::Amd => format!(
                "define({}, function ({params}) {{",
                self.external_names_json()
            ),
            OutputFormat::Esm => {
                let mut imports: String = self
                    .externals
                    .iter()
                    .enumerate()
                    .map(|(i, e)| format!("import __fpExt{i} from {};\n", js_string(&e.name)))
                    .collect();
                imports.push_str(&format!("var __fpResult = (function ({params}) {{"));
                imports
            }
            OutputFormat::Global | OutputFormat::Register => format!("(function ({params}) {{"),
        };

        let externals: BTreeMap<&str, String> = self
            .externals
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name.as_str(), format!("__fpExt{i}")))
            .collect();
        let externals = externals
            .iter()
            .map(|(name, param)| format!("{}: {param}", js_string(name)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{outer}\nvar __fp = ({RUNTIME})({{{externals}}});")
    }

    /// Text after the last module.
    pub(crate) fn footer(&self) -> String {
        if !self.options.self_executing {
            return String::new();
        }

        let mut out = String::new();
        match self.roots.as_slice() {
            [] => out.push_str("var __fpResult = {};\n"),
            [(_, index)] => out.push_str(&format!("var __fpResult = __fp.load({index});\n")),
            roots => {
                out.push_str("var __fpResult = {};\n");
                for (name, index) in roots {
                    out.push_str(&format!(
                        "__fpResult[{}] = __fp.load({index});\n",
                        js_string(name)
                    ));
                }
            }
        }
        if let Some(global_name) = self.options.global_name {
            out.push_str(&format!(
                "({GLOBAL_OBJECT})[{}] = __fpResult;\n",
                js_string(global_name)
            ));
        }
        out.push_str("return __fpResult;\n");

        let args = match self.options.format {
            OutputFormat::Cjs => self.external_args(|e| format!("require({})", js_string(&e.name))),
            OutputFormat::Esm => self.external_params(),
            OutputFormat::Global => self.external_args(|e| {
                self.global_for(e).map_or_else(|| "undefined".to_string(), str::to_string)
            }),
            OutputFormat::Umd | OutputFormat::Amd | OutputFormat::Register => String::new(),
        };
        match self.options.format {
            OutputFormat::Umd | OutputFormat::Amd => out.push_str("});"),
            OutputFormat::Esm => out.push_str(&format!("}})({args});\nexport default __fpResult;")),
            _ => out.push_str(&format!("}})({args});")),
        }
        out
    }

    fn umd_dispatcher(&self) -> String {
        format!(
            r#"var __fpRegister = (function (global) {{
  var loader = global[{sg}];
  if (loader && typeof loader.registerDynamic === "function") {{
    return function (name, deps, depMap, factory) {{
      if (name === null) loader.registerDynamic(deps, true, factory);
      else loader.registerDynamic(name, deps, true, factory);
    }};
  }}
  if (typeof define === "function" && define.amd) {{
    return function (name, deps, depMap, factory) {{
      var args = ["require", "exports", "module"].concat(deps);
      if (name === null) define(args, factory);
      else define(name, args, factory);
    }};
  }}
  var runtime = global.__fastpack || (global.__fastpack = ({RUNTIME})({{}}));
  var base = runtime.size();
  return function (name, deps, depMap, factory) {{
    var shifted = {{}};
    for (var dep in depMap) {{
      var target = depMap[dep];
      shifted[dep] = typeof target === "number" ? target + base : target;
    }}
    runtime.define(name, shifted, factory);
  }};
}})({GLOBAL_OBJECT});"#,
            sg = js_string(self.options.system_global)
        )
    }

    fn external_params(&self) -> String {
        (0..self.externals.len())
            .map(|i| format!("__fpExt{i}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn external_args(&self, arg: impl Fn(&External) -> String) -> String {
        self.externals.iter().map(arg).collect::<Vec<_>>().join(", ")
    }

    fn external_names_json(&self) -> String {
        let names: Vec<&str> = self.externals.iter().map(|e| e.name.as_str()).collect();
        serde_json::to_string(&names).unwrap_or_else(|_| "[]".to_string())
    }

    pub(crate) fn externals(&self) -> &[External] {
        &self.externals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::TreeMetadata;

    fn node(name: &str, deps: &[(&str, &str)]) -> Arc<TreeNode> {
        let mut node = TreeNode::new(name, format!("/p/{name}"));
        for (written, resolved) in deps {
            node.dependencies.push((*written).to_string());
            node.dependency_map
                .insert((*written).to_string(), (*resolved).to_string());
        }
        Arc::new(node)
    }

    fn options(format: OutputFormat, self_executing: bool, deps: &BTreeMap<String, String>) -> EnvelopeOptions<'_> {
        EnvelopeOptions {
            format,
            self_executing,
            anonymous: false,
            normalize: false,
            system_global: "System",
            global_name: None,
            global_deps: deps,
        }
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("UMD".parse::<OutputFormat>().unwrap(), OutputFormat::Umd);
        assert_eq!("system".parse::<OutputFormat>().unwrap(), OutputFormat::Register);
        assert_eq!("commonjs".parse::<OutputFormat>().unwrap(), OutputFormat::Cjs);
        let err = "bogus".parse::<OutputFormat>().unwrap_err();
        assert_eq!(err.code(), crate::error::codes::ASSEMBLY_ERROR);
        assert_eq!(OutputFormat::default(), OutputFormat::Umd);
    }

    #[test]
    fn test_format_needs_self_executing() {
        let deps = BTreeMap::new();
        let a = node("a", &[]);
        let emitted = [&a];
        assert!(Envelope::new(options(OutputFormat::Cjs, false, &deps), &emitted, &["a"]).is_err());
        assert!(Envelope::new(options(OutputFormat::Register, true, &deps), &emitted, &["a"]).is_err());
        assert!(Envelope::new(options(OutputFormat::Cjs, true, &deps), &emitted, &["a"]).is_ok());
    }

    #[test]
    fn test_register_wrapper_and_dependency_list() {
        let deps = BTreeMap::new();
        let a = node("app/a.js", &[("./b.js", "app/b.js")]);
        let emitted = [&a];
        let mut opts = options(OutputFormat::Register, false, &deps);
        opts.system_global = "SystemJS";
        let env = Envelope::new(opts, &emitted, &[]).unwrap();
        let lines = env.wrap_module(&a, vec![Line::verbatim("x();", 0)]).unwrap();
        assert_eq!(
            lines[0].text,
            "SystemJS.registerDynamic(\"app/a.js\", [\"./b.js\"], true, function (require, exports, module) {"
        );
        assert_eq!(lines[1].text, "x();");
        assert_eq!(lines[2].text, "});");
    }

    #[test]
    fn test_amd_wrapper_anonymous_normalized() {
        let deps = BTreeMap::new();
        let a = node("app/a.js", &[("./b.js", "app/b.js")]);
        let emitted = [&a];
        let mut opts = options(OutputFormat::Amd, false, &deps);
        opts.anonymous = true;
        opts.normalize = true;
        let env = Envelope::new(opts, &emitted, &[]).unwrap();
        let lines = env.wrap_module(&a, Vec::new()).unwrap();
        assert_eq!(
            lines[0].text,
            "define([\"require\",\"exports\",\"module\",\"app/b.js\"], function (require, exports, module) {"
        );
    }

    #[test]
    fn test_self_executing_dependency_map() {
        let deps = BTreeMap::new();
        let a = node("app/a.js", &[("./b.js", "app/b.js"), ("jquery", "jquery")]);
        let b = node("app/b.js", &[]);
        let emitted = [&b, &a];

        let env = Envelope::new(options(OutputFormat::Umd, true, &deps), &emitted, &["app/a.js"]).unwrap();
        let lines = env.wrap_module(&a, Vec::new()).unwrap();
        assert_eq!(
            lines[0].text,
            "__fp.define(\"app/a.js\", {\"./b.js\":\"app/b.js\",\"jquery\":\"jquery\"}, function (require, exports, module) {"
        );
        assert_eq!(env.externals().len(), 1);
        assert_eq!(env.externals()[0].importer, "app/a.js");

        let mut opts = options(OutputFormat::Umd, true, &deps);
        opts.anonymous = true;
        let env = Envelope::new(opts, &emitted, &["app/a.js"]).unwrap();
        let lines = env.wrap_module(&a, Vec::new()).unwrap();
        assert_eq!(
            lines[0].text,
            "__fp.define(null, {\"./b.js\":0,\"jquery\":\"jquery\"}, function (require, exports, module) {"
        );
        assert!(env.footer().contains("var __fpResult = __fp.load(1);"));
    }

    #[test]
    fn test_global_format_needs_global_deps() {
        let a = node("app/a.js", &[("jquery", "jquery")]);
        let emitted = [&a];
        let empty = BTreeMap::new();
        let err = Envelope::new(options(OutputFormat::Global, true, &empty), &emitted, &[])
            .err()
            .unwrap();
        assert_eq!(err.module(), Some("app/a.js"));

        let mut mapped = BTreeMap::new();
        mapped.insert("jquery".to_string(), "jQuery".to_string());
        let env = Envelope::new(options(OutputFormat::Global, true, &mapped), &emitted, &["app/a.js"]).unwrap();
        assert!(env.header().starts_with("(function (__fpExt0) {"));
        assert!(env.header().contains("({\"jquery\": __fpExt0});"));
        assert!(env.footer().ends_with("})(jQuery);"));
    }

    #[test]
    fn test_footer_multiple_roots_and_global_name() {
        let deps = BTreeMap::new();
        let a = node("a", &[]);
        let b = node("b", &[]);
        let emitted = [&a, &b];
        let mut opts = options(OutputFormat::Cjs, true, &deps);
        opts.global_name = Some("Lib");
        let env = Envelope::new(opts, &emitted, &["a", "b"]).unwrap();
        let footer = env.footer();
        assert!(footer.contains("__fpResult[\"a\"] = __fp.load(0);"));
        assert!(footer.contains("__fpResult[\"b\"] = __fp.load(1);"));
        assert!(footer.contains("[\"Lib\"] = __fpResult;"));
        assert!(footer.ends_with("})();"));
        assert!(env.header().starts_with("module.exports = (function () {"));
    }

    #[test]
    fn test_register_module_passthrough() {
        let deps = BTreeMap::new();
        let mut n = TreeNode::new("app/r.js", "/p/app/r.js");
        n.metadata = TreeMetadata {
            format: ModuleFormat::Register,
            ..TreeMetadata::default()
        };
        let n = Arc::new(n);
        let emitted = [&n];
        let body = vec![
            Line::verbatim("System.register(['./x.js'], function (_export) {", 0),
            Line::verbatim("});", 1),
        ];

        let env = Envelope::new(options(OutputFormat::Register, false, &deps), &emitted, &[]).unwrap();
        let lines = env.wrap_module(&n, body.clone()).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0].text,
            "System.register(\"app/r.js\", ['./x.js'], function (_export) {"
        );
        assert!(!lines[0].origin.unwrap().verbatim);

        let env = Envelope::new(options(OutputFormat::Amd, false, &deps), &emitted, &[]).unwrap();
        let err = env.wrap_module(&n, body).unwrap_err();
        assert_eq!(err.module(), Some("app/r.js"));
    }

    #[test]
    fn test_umd_loader_header_uses_system_global() {
        let deps = BTreeMap::new();
        let a = node("a", &[]);
        let emitted = [&a];
        let env = Envelope::new(options(OutputFormat::Umd, false, &deps), &emitted, &[]).unwrap();
        assert!(env.header().contains("var loader = global[\"System\"];"));
        assert!(env.footer().is_empty());
    }

    #[test]
    fn test_umd_fallback_registry_is_shared_between_bundles() {
        let deps = BTreeMap::new();
        let a = node("a", &[]);
        let emitted = [&a];
        let env = Envelope::new(options(OutputFormat::Umd, false, &deps), &emitted, &[]).unwrap();
        let header = env.header();
        assert!(header
            .contains("var runtime = global.__fastpack || (global.__fastpack = (function (externals) {"));
        // Positions in a later bundle are offset by the modules already defined.
        assert!(header.contains("var base = runtime.size();"));
        assert!(header.contains("target + base"));
        assert!(!header.contains("if (!global.__fastpack)"));
    }
}
