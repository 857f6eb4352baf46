//! Markdown table rendering.
//!
//! Pure functions from a [`TabularResult`] to its textual form: a header
//! line, a separator line, and one line per row. The output both goes back
//! to the model (sample data, schema context, final answers) and into logs,
//! so the shape is deterministic.

use crate::db::TabularResult;

/// Render a full result set as a Markdown table.
pub fn render_table(table: &TabularResult) -> String {
    let mut out = String::new();

    push_line(&mut out, &table.columns);
    push_separator(&mut out, table.column_count());
    for row in &table.rows {
        push_line(&mut out, row);
    }

    out
}

/// Render a single row with its header, used to describe one table candidate
/// at a time during schema discovery.
pub fn render_row(table: &TabularResult, index: usize) -> Option<String> {
    let row = table.rows.get(index)?;

    let mut out = String::new();
    push_line(&mut out, &table.columns);
    push_separator(&mut out, table.column_count());
    push_line(&mut out, row);

    Some(out)
}

fn push_line(out: &mut String, cells: &[String]) {
    for cell in cells {
        out.push_str("| ");
        out.push_str(cell);
        out.push(' ');
    }
    out.push_str("|\n");
}

fn push_separator(out: &mut String, columns: usize) {
    for _ in 0..columns {
        out.push_str("| --- ");
    }
    out.push_str("|\n");
}
