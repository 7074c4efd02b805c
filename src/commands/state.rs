//! `stratum state` - inspect recorded resources

use super::Session;
use crate::Context;
use crate::cli::StateCommand;
use crate::ui;
use anyhow::Result;
use declarative::State;

pub fn run(ctx: &Context, cmd: &StateCommand) -> Result<()> {
    match cmd {
        StateCommand::List => list(ctx),
    }
}

fn list(ctx: &Context) -> Result<()> {
    let session = Session::load(ctx)?;
    let state = State::load(&session.state_path)?;

    if state.resources.is_empty() && state.pending.is_empty() {
        if !ctx.quiet {
            ui::info(&format!("No resources recorded in {}", session.state_path.display()));
        }
        return Ok(());
    }

    ui::records(state.resources.values(), ctx.verbose > 0);
    for entry in state.pending.values() {
        ui::warn(&format!(
            "{} has an unfinished {} from {}",
            entry.address,
            entry.operation,
            entry.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    if ctx.verbose > 0 {
        ui::kv("serial", &state.serial.to_string());
    }
    Ok(())
}
