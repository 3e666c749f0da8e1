use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

use crate::model::IssueKind;
use crate::policy::TransformPolicy;
use crate::transform::context::ChapterDiagnostics;
use crate::util::escape_text;

mod header;
mod model;

pub use model::{Attributes, CellModel, NestedTable, RowModel, TableModel, layout};

/// Normalizes one top-level table at a time and renders it back to markup,
/// wrapped in a single responsive container.
pub struct TableReconstructor<'p> {
    policy: &'p TransformPolicy,
    caption: Regex,
    unit: Regex,
    number: Regex,
    cmidrule: Regex,
    rule_only: Regex,
    corruption: Vec<(Regex, String)>,
}

impl<'p> TableReconstructor<'p> {
    pub fn new(policy: &'p TransformPolicy) -> Result<Self> {
        let mut corruption = Vec::with_capacity(policy.corruption_fixes.len());
        for fix in &policy.corruption_fixes {
            let pattern = Regex::new(&fix.pattern).with_context(|| {
                format!("failed to compile corruption-fix regex: {}", fix.pattern)
            })?;
            corruption.push((pattern, fix.replacement.clone()));
        }

        Ok(Self {
            policy,
            caption: Regex::new(r"(?is)^(Table\s*[\d.]+[:.])\s*(.*)$")
                .context("failed to compile table caption regex")?,
            unit: Regex::new(r"(?i)\((?:s|ms|m|%)\)").context("failed to compile unit regex")?,
            number: Regex::new(r"\d+\.?\d*").context("failed to compile numeric run regex")?,
            cmidrule: Regex::new(r#"(?is)<span[^>]*class="[^"]*cmidrule[^"]*"[^>]*>.*?</span>"#)
                .context("failed to compile cmidrule regex")?,
            rule_only: Regex::new(r"(?is)^(?:\s|&nbsp;|\x{a0}|<hr\b[^>]*>|</?div[^>]*>)*$")
                .context("failed to compile rule-only cell regex")?,
            corruption,
        })
    }

    pub fn reconstruct(&self, mut table: TableModel, diag: &mut ChapterDiagnostics) -> String {
        diag.stats.tables += 1;

        self.clean(&mut table);
        let caption = self.take_caption(&mut table);
        self.flatten_nested(&mut table, diag);
        expand_category_rows(&mut table);
        self.ensure_header(&mut table, diag);

        let repaired = repair_colspans(&mut table);
        if repaired > 0 {
            diag.stats.colspans_repaired += repaired;
            debug!(chapter = diag.chapter, rows = repaired, "widened header colspans");
        }
        mark_group_starts(&mut table);

        if table.wrapped {
            return table.render_table();
        }

        diag.stats.tables_wrapped += 1;
        let mut out = String::from("<div class=\"table-wrapper\">\n");
        if let Some(caption) = caption {
            out.push_str(&self.render_caption(&caption));
            out.push('\n');
        }
        out.push_str(&table.render_table());
        out.push_str("\n</div>");
        out
    }

    fn clean(&self, table: &mut TableModel) {
        scrub_attrs(&mut table.attrs);
        table.attrs.add_class("book-table");

        for row in table.head.iter_mut().chain(table.body.iter_mut()) {
            scrub_attrs(&mut row.attrs);
            for cell in &mut row.cells {
                scrub_attrs(&mut cell.attrs);

                let mut html = self.cmidrule.replace_all(cell.raw_html(), "").into_owned();
                for (pattern, replacement) in &self.corruption {
                    html = pattern.replace_all(&html, replacement.as_str()).into_owned();
                }
                if html != cell.raw_html() {
                    cell.set_html(html);
                }
            }
        }

        table.head.retain(|row| !self.is_decorative(row));
        table.body.retain(|row| !self.is_decorative(row));
    }

    fn is_decorative(&self, row: &RowModel) -> bool {
        if row.attrs.has_class("hline") || row.attrs.has_class("cline") || row.cells.is_empty() {
            return true;
        }

        let rule_row = row
            .cells
            .iter()
            .all(|cell| self.rule_only.is_match(cell.raw_html()))
            && row
                .cells
                .iter()
                .any(|cell| cell.raw_html().to_ascii_lowercase().contains("<hr"));
        if rule_row {
            return true;
        }

        let spans_columns = row.cells.iter().any(|cell| {
            cell.attrs.class_contains("multicolumn") || cell.raw_html().contains("multicolumn")
        });
        row.cells.iter().all(CellModel::is_empty) && !spans_columns
    }

    fn take_caption(&self, table: &mut TableModel) -> Option<String> {
        if table.wrapped {
            return None;
        }
        if let Some(caption) = table.caption.take() {
            return Some(caption).filter(|caption| !caption.is_empty());
        }
        if !table.head.is_empty() {
            return None;
        }

        let first = table.body.first()?;
        let filled: Vec<&CellModel> = first.cells.iter().filter(|cell| !cell.is_empty()).collect();
        if filled.len() != 1 || !self.caption.is_match(filled[0].text()) {
            return None;
        }
        let text = filled[0].text().to_string();
        table.body.remove(0);
        Some(text)
    }

    fn render_caption(&self, caption: &str) -> String {
        match self.caption.captures(caption) {
            Some(parts) => format!(
                "<div class=\"table-caption\">{}<span class=\"note\">{}</span></div>",
                escape_text(&parts[1]),
                escape_text(parts[2].trim())
            ),
            None => format!("<div class=\"table-caption\">{}</div>", escape_text(caption)),
        }
    }

    fn flatten_nested(&self, table: &mut TableModel, diag: &mut ChapterDiagnostics) {
        for row in table.head.iter_mut().chain(table.body.iter_mut()) {
            for cell in &mut row.cells {
                if cell.nested.is_empty() {
                    continue;
                }

                let structural = cell
                    .nested
                    .iter()
                    .any(|nested| nested.rows.iter().any(|cells| cells.len() > 2));
                if structural {
                    diag.report(
                        IssueKind::NestedTableKept,
                        format!(
                            "nested table with more than two cells per row kept in cell '{}'",
                            truncate(cell.text(), 60)
                        ),
                    );
                    continue;
                }

                let lines: Vec<String> = cell
                    .nested
                    .iter()
                    .flat_map(|nested| nested.rows.iter())
                    .map(|cells| {
                        cells
                            .iter()
                            .map(|text| text.trim())
                            .filter(|text| !text.is_empty())
                            .collect::<Vec<_>>()
                            .join(" ")
                    })
                    .filter(|line| !line.is_empty())
                    .map(|line| escape_text(&line))
                    .collect();

                let slots = cell.nested.len();
                cell.nested.clear();
                if lines.is_empty() {
                    let mut html = cell.raw_html().to_string();
                    for index in 0..slots {
                        html = html.replace(&CellModel::slot(index), "");
                    }
                    cell.set_html(html);
                } else {
                    cell.set_html(lines.join("<br>"));
                    cell.attrs.add_class("stacked-cell");
                }
                diag.stats.nested_flattened += 1;
            }
        }
    }

    fn ensure_header(&self, table: &mut TableModel, diag: &mut ChapterDiagnostics) {
        if !table.head.is_empty() {
            for cell in table.head.iter_mut().flat_map(|row| row.cells.iter_mut()) {
                cell.header = true;
            }
            return;
        }

        let promoted = self.promote_scored_rows(table);
        if promoted > 0 {
            diag.stats.headers_promoted += 1;
            debug!(chapter = diag.chapter, rows = promoted, "promoted header rows");
            return;
        }

        if let Some(template) = self.synthesize_header(table) {
            diag.stats.headers_synthesized += 1;
            debug!(chapter = diag.chapter, template = %template, "synthesized header row");
            return;
        }

        if table.body.len() > 1 {
            let first = table.body.first().map(RowModel::text).unwrap_or_default();
            diag.report(
                IssueKind::TableHeaderNotFound,
                format!("no header candidate for table starting '{}'", truncate(&first, 60)),
            );
        }
    }
}

fn scrub_attrs(attrs: &mut Attributes) {
    attrs.remove("style");
    if attrs.get("id").is_some_and(|id| id.starts_with("TBL-")) {
        attrs.remove("id");
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// A body row whose only content is its first cell is a category divider and
/// spans the full table width.
fn expand_category_rows(table: &mut TableModel) {
    let max_cols = table.max_columns();
    if max_cols < 2 {
        return;
    }

    let grid = layout(&table.body);
    for (index, row) in table.body.iter_mut().enumerate() {
        if row.cells.is_empty() || row.cells.iter().all(|cell| cell.header) {
            continue;
        }
        if grid.starts[index].first().copied().unwrap_or(0) != 0 {
            continue;
        }
        if row.cells[0].is_empty() || row.cells[1..].iter().any(|cell| !cell.is_empty()) {
            continue;
        }
        if row.cells.len() == 1 && row.cells[0].colspan() >= max_cols {
            continue;
        }

        row.cells.truncate(1);
        let cell = &mut row.cells[0];
        cell.attrs.set("colspan", max_cols.to_string());
        cell.attrs.add_class("category-divider");
    }
}

/// Widens a header row that covers fewer columns than the data rows. The first
/// grouped cell absorbs the shortfall, else the last cell does.
fn repair_colspans(table: &mut TableModel) -> usize {
    let body_width = layout(&table.body).widths.into_iter().max().unwrap_or(0);
    if body_width == 0 {
        return 0;
    }

    let head_grid = layout(&table.head);
    let mut repaired = 0;
    for (index, row) in table.head.iter_mut().enumerate() {
        let width = head_grid.widths[index];
        if width >= body_width || row.cells.is_empty() {
            continue;
        }

        let shortfall = body_width - width;
        let target = row
            .cells
            .iter()
            .position(|cell| cell.colspan() > 1)
            .unwrap_or(row.cells.len() - 1);
        let cell = &mut row.cells[target];
        let widened = cell.colspan() + shortfall;
        cell.attrs.set("colspan", widened.to_string());
        repaired += 1;
    }
    repaired
}

/// Columns where a grouped header cell begins (after the first column) get a
/// `group-start` class in every row.
fn mark_group_starts(table: &mut TableModel) {
    let head_grid = layout(&table.head);
    let mut group_columns: Vec<usize> = Vec::new();
    for (row, starts) in table.head.iter().zip(&head_grid.starts) {
        for (cell, start) in row.cells.iter().zip(starts) {
            if *start > 0 && cell.colspan() > 1 && !group_columns.contains(start) {
                group_columns.push(*start);
            }
        }
    }
    if group_columns.is_empty() {
        return;
    }

    let body_grid = layout(&table.body);
    let sections = [
        (&mut table.head, head_grid),
        (&mut table.body, body_grid),
    ];
    for (rows, grid) in sections {
        for (row, starts) in rows.iter_mut().zip(&grid.starts) {
            for (cell, start) in row.cells.iter_mut().zip(starts) {
                if group_columns.contains(start) {
                    cell.attrs.add_class("group-start");
                }
            }
        }
    }
}
