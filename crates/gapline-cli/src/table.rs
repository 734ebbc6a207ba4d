//! Table formatting using comfy-table.

use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, ContentArrangement, Table};

/// Creates a table with a bold header row.
pub fn table(columns: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            columns
                .iter()
                .map(|column| Cell::new(column).add_attribute(Attribute::Bold)),
        );
    table
}

/// Prints `table` followed by a row count footer.
pub fn print_with_count(table: &Table, count: usize, noun: &str) {
    println!("{table}");
    let plural = if count == 1 { "" } else { "s" };
    println!("({count} {noun}{plural})");
}
