//! `fastpack deferred`: dynamic imports that are left out of the bundle.

use super::{fail, print_json, runtime, Context, ErrorJson};
use fastpack_core::DeferredImport;
use miette::Result;
use serde::Serialize;

#[derive(Serialize)]
struct DeferredResultJson {
    ok: bool,
    expression: String,
    imports: Vec<DeferredImport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorJson>,
}

pub fn run(ctx: &Context, expression: &str) -> Result<()> {
    let rt = runtime()?;
    let result = ctx
        .builder()
        .and_then(|builder| rt.block_on(builder.get_deferred_imports(expression)));

    match result {
        Ok(found) => {
            let imports: Vec<DeferredImport> = found.into_values().flatten().collect();
            if ctx.json {
                print_json(&DeferredResultJson {
                    ok: true,
                    expression: expression.to_string(),
                    imports,
                    error: None,
                })?;
            } else {
                for import in &imports {
                    println!("{} <- {}", import.name, import.parent);
                }
            }
            Ok(())
        }
        Err(e) => {
            let report = DeferredResultJson {
                ok: false,
                expression: expression.to_string(),
                imports: Vec::new(),
                error: Some(ErrorJson::from(&e)),
            };
            fail(ctx.json, &report, &e)
        }
    }
}
