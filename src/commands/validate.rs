//! `stratum validate` - check declarations without touching state or the provider

use super::Session;
use crate::Context;
use crate::ui;
use anyhow::Result;

pub fn run(ctx: &Context) -> Result<()> {
    let session = Session::load(ctx)?;
    let graph = session.graph(ctx)?;

    if !ctx.quiet {
        ui::success(&format!(
            "Declarations are valid: {} resources, {} outputs",
            graph.len(),
            graph.outputs().len()
        ));
        if ctx.verbose > 0 {
            for address in graph.topological_order() {
                let deps: Vec<String> = graph.dependencies(address).map(ToString::to_string).collect();
                if deps.is_empty() {
                    ui::dim(&address.to_string());
                } else {
                    ui::dim(&format!("{address} ← {}", deps.join(", ")));
                }
            }
        }
    }
    Ok(())
}
