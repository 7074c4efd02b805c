use chrono::{TimeDelta, Utc};
use colored::{ColoredString, Colorize};
use declarative::{
    ApplyReport, ApplyResult, AttributeDiff, Change, ChangeOp, DriftReport, ExecuteSummary,
    ExecutionPlan, OutputValue, Planned, StateRecord,
};
use serde_json::Value;
use std::collections::BTreeMap;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Plans
// ============================================================================

fn op_marker(op: ChangeOp) -> ColoredString {
    let symbol = op.symbol();
    match op {
        ChangeOp::Create => symbol.green().bold(),
        ChangeOp::Update => symbol.yellow().bold(),
        ChangeOp::Replace => symbol.magenta().bold(),
        ChangeOp::Destroy => symbol.red().bold(),
        ChangeOp::NoOp => symbol.normal(),
    }
}

/// Short form of a JSON value for attribute diffs
pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{s:?}"),
        other => other.to_string(),
    }
}

fn format_planned(planned: &Planned) -> String {
    match planned {
        Planned::Known(Value::Null) => "null".to_string(),
        Planned::Known(value) => format_value(value),
        Planned::Unknown => planned.to_string(),
    }
}

fn render_diff(diff: &AttributeDiff) -> String {
    let new = format_planned(&diff.new);
    let line = match &diff.old {
        Some(old) => format!("{}: {} → {}", diff.name, format_value(old), new),
        None => format!("{}: {}", diff.name, new),
    };
    if diff.forces_replacement {
        format!("{line} {}", "# forces replacement".red())
    } else {
        line
    }
}

fn render_change(change: &Change, verbose: bool) {
    println!(
        "  {:>3} {} {}",
        op_marker(change.op),
        change.address.to_string().bold(),
        format!("({})", change.reason).dimmed()
    );

    let show_diffs = verbose || change.op != ChangeOp::Create;
    if show_diffs {
        for diff in &change.diffs {
            println!("        {}", render_diff(diff));
        }
    }
}

/// Print a plan
///
/// Creates list their attributes only with `verbose`.
pub fn plan(plan: &ExecutionPlan, verbose: bool) {
    if !plan.has_changes() {
        success("No changes. Remote resources match the declarations.");
        return;
    }

    header("Plan");
    for change in plan.actionable() {
        render_change(change, verbose);
    }
    println!();
    println!("{} {}", "Plan:".bold(), plan.summary());
}

// ============================================================================
// Apply Reports
// ============================================================================

/// Short label for an apply result
pub fn result_label(result: &ApplyResult) -> ColoredString {
    match result {
        ApplyResult::NoChange => "unchanged".dimmed(),
        ApplyResult::Created { .. } => "created".green(),
        ApplyResult::Updated => "updated".yellow(),
        ApplyResult::Replaced { .. } => "replaced".magenta(),
        ApplyResult::Destroyed => "destroyed".red(),
        ApplyResult::Failed { .. } => "failed".red().bold(),
        ApplyResult::Skipped { .. } => "skipped".yellow(),
    }
}

fn print_summary(summary: &ExecuteSummary) {
    if summary.created > 0 {
        println!("    • {} created", summary.created);
    }
    if summary.updated > 0 {
        println!("    • {} updated", summary.updated);
    }
    if summary.replaced > 0 {
        println!("    • {} replaced", summary.replaced);
    }
    if summary.destroyed > 0 {
        println!("    • {} destroyed", summary.destroyed);
    }
    if summary.skipped > 0 {
        println!("    • {} skipped", summary.skipped);
    }
    if summary.failed > 0 {
        println!("    • {} {}", summary.failed, "failed".red());
    }
}

/// Print the outcome of an apply or destroy
pub fn report(report: &ApplyReport) {
    println!();
    if report.is_success() {
        println!(
            "  {} Apply complete: {} changed",
            "✓".green().bold(),
            report.summary.total_changes()
        );
    } else if report.timed_out {
        println!("  {} Apply timed out", "⚠".yellow().bold());
    } else {
        println!("  {} Apply finished with errors", "⚠".yellow().bold());
    }
    print_summary(&report.summary);

    if !report.failures.is_empty() {
        println!();
        println!("  {}", "Failed resources:".red().bold());
        for failure in &report.failures {
            println!(
                "    {} {} {}: {}",
                "✗".red(),
                failure.action,
                failure.address.to_string().bold(),
                failure.message
            );
        }
    }

    let skipped: Vec<_> = report
        .results
        .iter()
        .filter_map(|(address, result)| match result {
            ApplyResult::Skipped { reason } => Some((address, reason)),
            _ => None,
        })
        .collect();
    if !skipped.is_empty() {
        println!();
        for (address, reason) in skipped {
            println!("    {} {}: {}", "⊘".yellow(), address, reason.dimmed());
        }
    }
}

// ============================================================================
// Drift, Outputs and State
// ============================================================================

/// Print what refresh reconciled
pub fn drift(report: &DriftReport) {
    if report.is_empty() {
        return;
    }
    warn(&format!(
        "Refresh reconciled {} resource(s) with the provider:",
        report.len()
    ));
    for (address, drift) in &report.entries {
        println!("    {} {}: {}", "~".yellow(), address, drift);
    }
}

/// Print outputs as `name = value`
pub fn outputs(outputs: &BTreeMap<String, OutputValue>) {
    if outputs.is_empty() {
        dim("No outputs.");
        return;
    }
    header("Outputs");
    for (name, output) in outputs {
        let value = if output.sensitive {
            "(sensitive)".dimmed().to_string()
        } else {
            format_value(&output.value)
        };
        kv(name, &value);
    }
}

/// Format an elapsed time as a rough age, e.g. "3h ago"
pub fn format_age(elapsed: TimeDelta) -> String {
    if elapsed.num_days() > 0 {
        format!("{}d ago", elapsed.num_days())
    } else if elapsed.num_hours() > 0 {
        format!("{}h ago", elapsed.num_hours())
    } else if elapsed.num_minutes() > 0 {
        format!("{}m ago", elapsed.num_minutes())
    } else {
        "just now".to_string()
    }
}

/// Print recorded resources
pub fn records<'a>(records: impl IntoIterator<Item = &'a StateRecord>, verbose: bool) {
    for record in records {
        println!("{:<40} {}", record.address.to_string(), record.remote_id.dimmed());
        if verbose {
            kv(
                "applied",
                &format!(
                    "{} ({})",
                    record.applied_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    format_age(Utc::now() - record.applied_at)
                ),
            );
            if !record.dependencies.is_empty() {
                let deps: Vec<String> = record.dependencies.iter().map(ToString::to_string).collect();
                kv("depends on", &deps.join(", "));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&json!("10.0.0.0/16")), "\"10.0.0.0/16\"");
        assert_eq!(format_value(&json!(true)), "true");
        assert_eq!(format_value(&json!(["a"])), "[\"a\"]");
    }

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(TimeDelta::seconds(20)), "just now");
        assert_eq!(format_age(TimeDelta::minutes(5)), "5m ago");
        assert_eq!(format_age(TimeDelta::hours(30)), "1d ago");
    }

    #[test]
    fn test_render_diff() {
        colored::control::set_override(false);
        let diff = AttributeDiff {
            name: "cidr_block".to_string(),
            old: Some(json!("10.0.1.0/24")),
            new: Planned::Known(json!("10.0.2.0/24")),
            forces_replacement: true,
        };
        assert_eq!(
            render_diff(&diff),
            "cidr_block: \"10.0.1.0/24\" → \"10.0.2.0/24\" # forces replacement"
        );

        let diff = AttributeDiff {
            name: "network_id".to_string(),
            old: None,
            new: Planned::Unknown,
            forces_replacement: false,
        };
        assert_eq!(render_diff(&diff), "network_id: (known after apply)");
    }
}
