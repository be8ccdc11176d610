use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};

use crate::report::EntityOutcome;

pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn cyan_header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| Cell::new(*label).fg(TableColor::Cyan))
        .collect()
}

/// Green when converged without changes, yellow when changes were made or
/// planned, red on failure.
pub fn status_cell(outcome: &EntityOutcome) -> Cell {
    match outcome {
        EntityOutcome::Converged { changes } if changes.mutation_count() == 0 => {
            Cell::new("in sync").fg(TableColor::Green)
        }
        EntityOutcome::Converged { .. } => Cell::new("changed").fg(TableColor::Yellow),
        EntityOutcome::Failed { .. } => Cell::new("failed").fg(TableColor::Red),
        EntityOutcome::Skipped => Cell::new("skipped").fg(TableColor::DarkGrey),
    }
}

/// `created/updated/deleted` counts, or `-` when nothing moved.
pub fn counts_cell(created: usize, updated: usize, deleted: usize) -> Cell {
    if created + updated + deleted == 0 {
        return Cell::new("-").fg(TableColor::DarkGrey);
    }
    Cell::new(format!("+{created} ~{updated} -{deleted}"))
}
