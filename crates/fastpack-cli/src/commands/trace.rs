//! `fastpack trace`.

use super::{fail, print_json, runtime, Context, ErrorJson};
use miette::Result;
use serde::Serialize;

#[derive(Serialize)]
struct TraceResultJson {
    ok: bool,
    expression: String,
    modules: Vec<ModuleJson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorJson>,
}

#[derive(Serialize)]
struct ModuleJson {
    name: String,
    format: String,
    build: bool,
    dependencies: Vec<String>,
}

pub fn run(ctx: &Context, expression: &str) -> Result<()> {
    let rt = runtime()?;
    let result = ctx
        .builder()
        .and_then(|builder| rt.block_on(builder.trace(expression)));

    match result {
        Ok(tree) => {
            if ctx.json {
                let modules = tree
                    .nodes()
                    .map(|node| ModuleJson {
                        name: node.name.clone(),
                        format: node.metadata.format.to_string(),
                        build: node.metadata.build,
                        dependencies: node.resolved_dependencies().map(str::to_string).collect(),
                    })
                    .collect();
                print_json(&TraceResultJson {
                    ok: true,
                    expression: expression.to_string(),
                    modules,
                    error: None,
                })?;
            } else {
                for node in tree.nodes() {
                    println!("{} ({})", node.name, node.metadata.format);
                }
            }
            Ok(())
        }
        Err(e) => {
            let report = TraceResultJson {
                ok: false,
                expression: expression.to_string(),
                modules: Vec::new(),
                error: Some(ErrorJson::from(&e)),
            };
            fail(ctx.json, &report, &e)
        }
    }
}
