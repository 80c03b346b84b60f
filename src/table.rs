//! Plain-text table rendering for terminal output.

use std::{borrow::Cow, fmt::Write as _};

use crate::{
    data::{Value, display_cell},
    preview::Page,
    schema::ColumnDescriptor,
};

const MAX_CELL_WIDTH: usize = 40;
const NULL_MARKER: &str = "∅";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Align {
    Left,
    Right,
}

struct Column {
    header: String,
    align: Align,
}

/// Builds a column-aligned table. Cells wider than the cap are truncated with
/// an ellipsis, and control characters are flattened to spaces.
pub struct Table {
    columns: Vec<Column>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: headers
                .into_iter()
                .map(|header| Column {
                    header: header.into(),
                    align: Align::Left,
                })
                .collect(),
            rows: Vec::new(),
        }
    }

    /// Right-aligns column `idx`, used for counts and numbers.
    pub fn align_right(mut self, idx: usize) -> Self {
        if let Some(column) = self.columns.get_mut(idx) {
            column.align = Align::Right;
        }
        self
    }

    pub fn push_row(&mut self, cells: Vec<String>) {
        self.rows.push(cells);
    }

    pub fn render(&self) -> String {
        let rows = self
            .rows
            .iter()
            .map(|row| row.iter().map(|cell| clip(cell)).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        let mut widths = self
            .columns
            .iter()
            .map(|c| display_width(&c.header))
            .collect::<Vec<_>>();
        for row in &rows {
            for (idx, cell) in row.iter().enumerate().take(widths.len()) {
                widths[idx] = widths[idx].max(display_width(cell));
            }
        }

        let mut output = String::new();
        let headers = self
            .columns
            .iter()
            .map(|c| Cow::Borrowed(c.header.as_str()))
            .collect::<Vec<_>>();
        let _ = writeln!(output, "{}", self.format_line(&headers, &widths));
        let rules = widths
            .iter()
            .map(|w| Cow::Owned("-".repeat((*w).max(1))))
            .collect::<Vec<_>>();
        let _ = writeln!(output, "{}", self.format_line(&rules, &widths));
        for row in &rows {
            let _ = writeln!(output, "{}", self.format_line(row, &widths));
        }
        output
    }

    fn format_line(&self, cells: &[Cow<'_, str>], widths: &[usize]) -> String {
        let mut parts = Vec::with_capacity(widths.len());
        for (idx, width) in widths.iter().enumerate() {
            let cell = cells.get(idx).map(|c| c.as_ref()).unwrap_or("");
            let pad = " ".repeat(width.saturating_sub(display_width(cell)));
            match self.columns[idx].align {
                Align::Left => parts.push(format!("{cell}{pad}")),
                Align::Right => parts.push(format!("{pad}{cell}")),
            }
        }
        parts.join("  ").trim_end().to_string()
    }
}

pub fn render_page(page: &Page) -> String {
    let mut table = Table::new(std::iter::once("#".to_string()).chain(page.columns.iter().cloned()))
        .align_right(0);
    for row in &page.rows {
        let mut cells = Vec::with_capacity(page.columns.len() + 1);
        cells.push(row.index.to_string());
        cells.extend(
            (0..page.columns.len()).map(|idx| cell_text(row.cells.get(idx).and_then(Option::as_ref))),
        );
        table.push_row(cells);
    }
    let mut output = table.render();
    let _ = writeln!(
        output,
        "page {}/{} · {} row(s)",
        page.page_number,
        page.total_pages.max(1),
        page.total_rows
    );
    output
}

pub fn render_columns(columns: &[ColumnDescriptor]) -> String {
    let mut table = Table::new(["#", "name", "type", "sample", "nulls", "unique", "patterns"])
        .align_right(0)
        .align_right(4)
        .align_right(5);
    for (idx, column) in columns.iter().enumerate() {
        let patterns = [
            ("email", column.patterns.email),
            ("url", column.patterns.url),
            ("phone", column.patterns.phone),
        ]
        .iter()
        .filter(|(_, hit)| *hit)
        .map(|(label, _)| *label)
        .collect::<Vec<_>>()
        .join(",");
        table.push_row(vec![
            (idx + 1).to_string(),
            column.name.clone(),
            column.column_type.to_string(),
            cell_text(column.sample.as_ref()),
            column.null_count.to_string(),
            column.unique_count.to_string(),
            patterns,
        ]);
    }
    table.render()
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None => NULL_MARKER.to_string(),
        some => display_cell(some),
    }
}

fn clip(value: &str) -> Cow<'_, str> {
    let flattened: Cow<'_, str> = if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    };
    if display_width(&flattened) <= MAX_CELL_WIDTH {
        return flattened;
    }
    let mut clipped = flattened
        .chars()
        .take(MAX_CELL_WIDTH - 1)
        .collect::<String>();
    clipped.push('…');
    Cow::Owned(clipped)
}

fn display_width(value: &str) -> usize {
    value.chars().count()
}
