use comfy_table::{Cell, Color as TableColor};

use crate::report::{EntityChanges, EntityOutcome, RunMode, RunReport};

use super::styling::{bright, bright_green, bright_red, bright_yellow, cyan, dim};
use super::tables::{counts_cell, create_table, cyan_header, status_cell};

/// Prints the per-entity outcome of a run to stdout.
///
/// In validate-only mode the counts describe what would change; nothing was written.
pub fn print_summary(report: &RunReport) {
    println!("{}", render_summary(report));
}

#[allow(clippy::format_push_string)]
fn add_section_header(output: &mut String, emoji: &str, title: &str) {
    output.push_str(&format!("{} {}\n", bright(emoji), bright(title).underlined()));
}

fn settings_cell(changes: &EntityChanges) -> Cell {
    if changes.settings_drift.is_empty() {
        Cell::new("-").fg(TableColor::DarkGrey)
    } else {
        Cell::new(changes.settings_drift.join("\n"))
    }
}

fn variables_cell(changes: &EntityChanges) -> Cell {
    let cell = counts_cell(
        changes.variables_created,
        changes.variables_updated,
        changes.variables_deleted,
    );
    if changes.variables_kept == 0 {
        return cell;
    }
    Cell::new(format!(
        "+{} ~{} -{} ({} kept)",
        changes.variables_created,
        changes.variables_updated,
        changes.variables_deleted,
        changes.variables_kept
    ))
}

fn branches_cell(changes: &EntityChanges) -> Cell {
    if changes.branches_skipped {
        return Cell::new("skipped (subgroup)").fg(TableColor::DarkGrey);
    }
    counts_cell(
        changes.branches_created,
        changes.branches_replaced,
        changes.branches_deleted,
    )
}

#[allow(clippy::format_push_string)]
fn render_summary(report: &RunReport) -> String {
    let mut output = String::new();

    add_section_header(&mut output, "📊", "Overview");

    let mode = match report.mode {
        RunMode::Manual => "manual",
        RunMode::Auto => "auto",
    };
    let failed = report.failed();
    let failed_display = if failed == 0 {
        bright_green(failed)
    } else {
        bright_red(failed)
    };
    let elapsed = report.finished_at - report.started_at;

    output.push_str(&format!(
        "  {} {}\n  {} {}\n  {} {}\n  {} {}\n  {} {}\n  {} {}\n\n",
        dim("Mode:"),
        cyan(mode),
        dim("Entities:"),
        bright_yellow(report.entities.len()),
        dim("Failed:"),
        failed_display,
        dim("Skipped:"),
        bright_yellow(report.skipped()),
        dim(if report.validate_only {
            "Planned changes:"
        } else {
            "Changes applied:"
        }),
        bright_yellow(report.mutation_count()),
        dim("Duration:"),
        dim(format!("{:.1}s", elapsed.num_milliseconds() as f64 / 1000.0)),
    ));

    if report.entities.is_empty() {
        output.push_str(&format!("{}\n", bright_yellow("No entities matched.")));
        return output;
    }

    add_section_header(&mut output, "📋", "Entities");

    let mut table = create_table();
    table.set_header(cyan_header(&[
        "Entity",
        "Status",
        "Settings drift",
        "Variables",
        "Protected branches",
    ]));

    for entry in &report.entities {
        let mut row = vec![Cell::new(entry.entity.to_string()), status_cell(&entry.outcome)];
        match &entry.outcome {
            EntityOutcome::Converged { changes } => {
                row.push(settings_cell(changes));
                row.push(variables_cell(changes));
                row.push(branches_cell(changes));
            }
            EntityOutcome::Failed { error } => {
                row.push(Cell::new(error).fg(TableColor::Red));
                row.extend(vec![Cell::new(""); 2]);
            }
            EntityOutcome::Skipped => row.extend(vec![Cell::new(""); 3]),
        }
        table.add_row(row);
    }

    output.push_str(&format!("{table}\n\n"));

    if report.validate_only {
        output.push_str(&format!(
            "{}\n",
            bright_green("Configuration validated. No changes were written.")
        ));
    }

    output
}
