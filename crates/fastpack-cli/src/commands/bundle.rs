//! `fastpack bundle` and `fastpack build`.

use super::{fail, print_json, runtime, Context, ErrorJson};
use fastpack_core::BundleOptions;
use miette::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

#[derive(clap::Args, Debug, Clone)]
pub struct BundleArgs {
    /// Tree expression, e.g. "app/main.js + app/extra.js"
    pub expression: String,

    /// Output file (prints to stdout if omitted)
    #[arg(short, long)]
    pub outfile: Option<PathBuf>,

    /// Output format (umd, register, amd, cjs, esm, global)
    #[arg(short, long, default_value = "umd")]
    pub format: String,

    /// Skip minification
    #[arg(long)]
    pub no_minify: bool,

    /// Ask the minifier to mangle names
    #[arg(long)]
    pub mangle: bool,

    /// Generate a source map next to the output file
    #[arg(long)]
    pub source_maps: bool,

    /// Embed original sources in the source map
    #[arg(long)]
    pub source_map_contents: bool,

    /// One mapping per generated line
    #[arg(long)]
    pub low_res_source_maps: bool,

    /// Global that receives the entry exports
    #[arg(long)]
    pub global_name: Option<String>,

    /// External module to global, e.g. jquery=jQuery (repeatable)
    #[arg(long = "global-dep", value_name = "NAME=GLOBAL")]
    pub global_deps: Vec<String>,

    /// Rewrite require() specifiers to normalized names
    #[arg(long)]
    pub normalize: bool,

    /// Leave the single entry module unnamed
    #[arg(long)]
    pub anonymous: bool,

    /// Name of the loader global in register output
    #[arg(long, default_value = "System")]
    pub system_global: String,
}

impl BundleArgs {
    fn options(&self) -> BundleOptions {
        let global_deps: BTreeMap<String, String> = self
            .global_deps
            .iter()
            .filter_map(|pair| pair.split_once('='))
            .map(|(name, global)| (name.trim().to_string(), global.trim().to_string()))
            .collect();
        BundleOptions {
            minify: !self.no_minify,
            mangle: self.mangle,
            source_maps: self.source_maps,
            source_map_contents: self.source_map_contents,
            low_res_source_maps: self.low_res_source_maps,
            global_name: self.global_name.clone(),
            global_deps,
            normalize: self.normalize,
            anonymous: self.anonymous,
            system_global: self.system_global.clone(),
            format: self.format.clone(),
            ..BundleOptions::default()
        }
    }
}

/// JSON output for bundle commands.
#[derive(Serialize)]
struct BundleResultJson {
    ok: bool,
    expression: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    outfile: Option<String>,
    format: String,
    self_executing: bool,
    modules: Vec<String>,
    size_bytes: usize,
    duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorJson>,
}

/// Run `bundle`, or `build` when `self_executing`.
pub fn run(ctx: &Context, args: BundleArgs, self_executing: bool) -> Result<()> {
    let start = Instant::now();
    let options = args.options();
    let outfile = args.outfile.as_ref().map(|p| ctx.cwd.join(p));

    let rt = runtime()?;
    let result = ctx.builder().and_then(|builder| {
        let expression = args.expression.as_str();
        rt.block_on(async {
            if self_executing {
                builder.build_static(expression, outfile.as_deref(), &options).await
            } else {
                builder.bundle(expression, outfile.as_deref(), &options).await
            }
        })
    });
    let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    let mut report = BundleResultJson {
        ok: true,
        expression: args.expression.clone(),
        outfile: outfile.as_ref().map(|p| p.display().to_string()),
        format: args.format.clone(),
        self_executing: self_executing || args.global_name.is_some(),
        modules: Vec::new(),
        size_bytes: 0,
        duration_ms,
        error: None,
    };

    match result {
        Ok(output) => {
            report.size_bytes = output.source.len();
            if ctx.json {
                report.modules = output.modules;
                print_json(&report)?;
            } else if let Some(outfile) = &outfile {
                println!(
                    "  {} -> {} ({} modules, {} bytes, {}ms)",
                    args.expression,
                    outfile.display(),
                    output.modules.len(),
                    report.size_bytes,
                    duration_ms
                );
            } else {
                print!("{}", output.source);
            }
            Ok(())
        }
        Err(e) => {
            report.ok = false;
            report.error = Some(ErrorJson::from(&e));
            fail(ctx.json, &report, &e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> BundleArgs {
        BundleArgs {
            expression: "app.js".into(),
            outfile: None,
            format: "umd".into(),
            no_minify: false,
            mangle: false,
            source_maps: false,
            source_map_contents: false,
            low_res_source_maps: false,
            global_name: None,
            global_deps: Vec::new(),
            normalize: false,
            anonymous: false,
            system_global: "System".into(),
        }
    }

    #[test]
    fn test_options_defaults_match_library() {
        let options = args().options();
        let defaults = BundleOptions::default();
        assert_eq!(options.minify, defaults.minify);
        assert_eq!(options.format, defaults.format);
        assert_eq!(options.system_global, defaults.system_global);
    }

    #[test]
    fn test_global_deps_parsing() {
        let mut args = args();
        args.global_deps = vec!["jquery=jQuery".into(), " lodash = _ ".into(), "broken".into()];
        let options = args.options();
        assert_eq!(options.global_deps.len(), 2);
        assert_eq!(options.global_deps["jquery"], "jQuery");
        assert_eq!(options.global_deps["lodash"], "_");
    }
}
