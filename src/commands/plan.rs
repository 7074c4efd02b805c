//! `stratum plan` - show what apply would change

use super::Session;
use crate::Context;
use crate::cli::PlanArgs;
use crate::ui;
use anyhow::Result;
use declarative::PlanMode;
use std::process::ExitCode;

/// Exit code when the plan has pending changes
pub const CHANGES_PENDING: u8 = 2;

pub fn run(ctx: &Context, args: &PlanArgs) -> Result<ExitCode> {
    let session = Session::load(ctx)?;
    let graph = session.graph(ctx)?;
    let mut store = session.open_store()?;
    let api = session.api()?;

    let drift = session.refresh(&mut store, &api)?;
    let mode = if args.destroy {
        PlanMode::Destroy
    } else {
        PlanMode::Apply
    };
    let plan = session.plan(ctx, &graph, &store, mode)?;

    if args.json {
        let doc = serde_json::json!({
            "mode": plan.mode,
            "summary": plan.summary(),
            "drift": drift,
            "changes": plan.actionable().collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else if !ctx.quiet {
        ui::drift(&drift);
        ui::plan(&plan, ctx.verbose > 0);
    }

    Ok(if plan.has_changes() {
        ExitCode::from(CHANGES_PENDING)
    } else {
        ExitCode::SUCCESS
    })
}
