use crate::database::{CellValue, ResultSet, StatementResult};
use prettytable::format::{FormatBuilder, LinePosition, LineSeparator, TableFormat};
use prettytable::{Cell, Row, Table};

/// Appended to cells cut by the truncation limit.
pub const TRUNCATION_MARKER: &str = "[...]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    /// 0 disables truncation.
    pub truncate_chars: usize,
    /// 0 renders every row.
    pub max_rows: usize,
}

fn table_format() -> TableFormat {
    FormatBuilder::new()
        .column_separator('|')
        .separators(&[LinePosition::Title], LineSeparator::new('-', '+', '-', '-'))
        .padding(1, 1)
        .build()
}

/// Single-line display text for a value, cut to `truncate_chars` characters.
pub fn display_cell(value: &CellValue, truncate_chars: usize) -> String {
    clean_text(&value.display_text(), truncate_chars)
}

fn clean_text(text: &str, truncate_chars: usize) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| if matches!(c, '\n' | '\t' | '\r') { ' ' } else { c })
        .collect();

    if truncate_chars == 0 || cleaned.chars().count() <= truncate_chars {
        return cleaned;
    }
    let mut cut: String = cleaned.chars().take(truncate_chars).collect();
    cut.push_str(TRUNCATION_MARKER);
    cut
}

fn is_numeric(value: &CellValue) -> bool {
    matches!(value, CellValue::Int(_) | CellValue::UInt(_) | CellValue::Float(_))
}

fn render_rows(set: &ResultSet, options: RenderOptions) -> String {
    let total = set.rows.len();
    let shown = if options.max_rows > 0 {
        options.max_rows.min(total)
    } else {
        total
    };

    let mut table = Table::new();
    table.set_format(table_format());
    table.set_titles(Row::new(
        set.columns
            .iter()
            .map(|name| Cell::new(&clean_text(name, options.truncate_chars)))
            .collect(),
    ));

    for row in set.rows.iter().take(shown) {
        table.add_row(Row::new(
            row.iter()
                .map(|value| {
                    let cell = Cell::new(&display_cell(value, options.truncate_chars));
                    if is_numeric(value) {
                        cell.style_spec("r")
                    } else {
                        cell
                    }
                })
                .collect(),
        ));
    }

    let mut out = table.to_string();
    if shown < total {
        out.push_str(&format!(
            "... {} more row(s) not shown (use :rows 0 to show all)\n",
            total - shown
        ));
    }
    out.push_str(&format!("Rows returned: {total}\n"));
    out
}

/// Render one statement result for the terminal.
pub fn render_result(result: &StatementResult, options: RenderOptions) -> String {
    match result {
        StatementResult::Rows(set) => render_rows(set, options),
        StatementResult::RowsAffected(count) => format!("Rows affected: {count}\n"),
    }
}
