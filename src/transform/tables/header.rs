use super::*;

impl TableReconstructor<'_> {
    pub(super) fn score_row(&self, row: &RowModel) -> i32 {
        if row.cells.is_empty() {
            return -1;
        }

        let weights = &self.policy.header_scoring;
        let mut score = 0;

        if row.cells.iter().any(|cell| cell.header) {
            score += weights.header_cell;
        }
        for cell in &row.cells {
            if cell.colspan() > 1 {
                score += weights.colspan;
            }
            if cell.rowspan() > 1 {
                score += weights.rowspan;
            }
        }

        let bold = row.cells.iter().any(|cell| {
            cell.attrs.class_contains("cmbx") || cell.raw_html().to_ascii_lowercase().contains("cmbx")
        });
        if bold {
            score += weights.bold_marker;
        }

        let text = row
            .cells
            .iter()
            .map(CellModel::text)
            .collect::<Vec<_>>()
            .join(" ");
        if self.unit.is_match(&text) {
            score += weights.unit_pattern;
        }

        let text = text.trim();
        let total = text.chars().count();
        if total > 0 {
            let numeric: usize = self
                .number
                .find_iter(text)
                .map(|found| found.as_str().chars().count())
                .sum();
            if (numeric as f64) / (total as f64) < weights.numeric_ratio_max {
                score += weights.low_numeric_density;
            }
        }

        score
    }

    /// Moves the leading run of header-like body rows into the header. A table
    /// is never left without body rows.
    pub(super) fn promote_scored_rows(&self, table: &mut TableModel) -> usize {
        let scoring = &self.policy.header_scoring;
        let count = table
            .body
            .iter()
            .take(scoring.rows_considered)
            .take_while(|row| self.score_row(row) >= scoring.threshold)
            .count();

        if count == 0 || count >= table.body.len() {
            return 0;
        }

        let mut promoted: Vec<RowModel> = table.body.drain(..count).collect();
        for cell in promoted.iter_mut().flat_map(|row| row.cells.iter_mut()) {
            cell.header = true;
        }
        table.head = promoted;
        count
    }

    /// Builds a header row from the first policy template whose pattern the
    /// table matches. Returns the template name.
    pub(super) fn synthesize_header(&self, table: &mut TableModel) -> Option<String> {
        let first = table.body.first()?;
        let first_text = first.text();
        let stacked: Vec<&CellModel> = first
            .cells
            .iter()
            .filter(|cell| cell.attrs.has_class("stacked-cell"))
            .collect();

        let template = self.policy.header_templates.iter().find(|template| {
            let marker_hit = template
                .first_row_markers
                .iter()
                .any(|marker| first_text.contains(marker.as_str()));
            let enough_stacked = stacked.len() >= template.min_stacked_cells;
            let stacked_hit = match &template.stacked_cell_marker {
                Some(marker) => stacked
                    .first()
                    .is_some_and(|cell| cell.text().to_lowercase().contains(marker.as_str())),
                None => true,
            };
            marker_hit && enough_stacked && stacked_hit
        })?;

        let mut labels = template.labels.clone();
        if let Some(pattern) = &template.per_stacked_label {
            labels.extend((1..=stacked.len()).map(|n| pattern.replace("{n}", &n.to_string())));
        }
        labels.truncate(first.cells.len());

        let cells = labels
            .iter()
            .map(|label| {
                CellModel::new(
                    true,
                    Attributes::from_pairs([("class", "inferred-th")]),
                    escape_text(label),
                    Vec::new(),
                )
            })
            .collect();
        table.head = vec![RowModel {
            attrs: Attributes::from_pairs([("class", "inferred-header")]),
            cells,
        }];

        Some(template.name.clone())
    }
}
