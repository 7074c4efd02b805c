//! `stratum apply` and `stratum destroy`

use super::Session;
use crate::Context;
use crate::progress::{ApplyProgress, PromptConfirm};
use crate::ui;
use anyhow::Result;
use declarative::PlanMode;
use std::process::ExitCode;

pub fn run(ctx: &Context, mode: PlanMode) -> Result<ExitCode> {
    let session = Session::load(ctx)?;
    let graph = session.graph(ctx)?;
    let mut store = session.open_store()?;
    let api = session.api()?;

    let drift = session.refresh(&mut store, &api)?;
    let plan = session.plan(ctx, &graph, &store, mode)?;

    if !ctx.quiet {
        ui::drift(&drift);
        ui::plan(&plan, ctx.verbose > 0);
    }

    let mut progress = ApplyProgress::new(ctx.quiet);
    let mut confirm = PromptConfirm::new(ctx.auto_approve);
    let report = declarative::execute(
        &plan,
        &graph,
        &mut store,
        &api,
        &session.options,
        &mut progress,
        &mut confirm,
    )?;

    if !plan.has_changes() {
        return Ok(ExitCode::SUCCESS);
    }
    if confirm.answer == Some(false) {
        ui::warn("Apply cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    if !ctx.quiet {
        ui::report(&report);
        if report.is_success() && mode == PlanMode::Apply {
            ui::outputs(&store.state().outputs);
        }
    }

    if report.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        log::debug!("State written to {}", store.path().display());
        Ok(ExitCode::FAILURE)
    }
}
