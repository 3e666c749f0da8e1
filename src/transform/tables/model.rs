use crate::util::{escape_attr, escape_text, visible_text};

pub const NESTED_SLOT_PREFIX: &str = "NESTED_TABLE_";
const MAX_COLSPAN: usize = 1000;
const MAX_ROWSPAN: usize = 65534;

/// Element attributes in source order. Rendering sorts by name, so a table
/// renders to the same bytes whichever backend parsed it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes(Vec<(String, String)>);

impl Attributes {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut attrs = Self::default();
        for (name, value) in pairs {
            let name = name.into().to_ascii_lowercase();
            if attrs.get(&name).is_none() {
                attrs.0.push((name, value.into()));
            }
        }
        attrs
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.0.iter_mut().find(|(key, _)| key == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name.to_string(), value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let pos = self.0.iter().position(|(key, _)| key == name)?;
        Some(self.0.remove(pos).1)
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.get("class")
            .map(|value| value.split_whitespace().any(|token| token == class))
            .unwrap_or(false)
    }

    pub fn class_contains(&self, fragment: &str) -> bool {
        self.get("class")
            .map(|value| value.contains(fragment))
            .unwrap_or(false)
    }

    pub fn add_class(&mut self, class: &str) {
        if self.has_class(class) {
            return;
        }
        let merged = match self.get("class").map(str::trim) {
            Some(existing) if !existing.is_empty() => format!("{existing} {class}"),
            _ => class.to_string(),
        };
        self.set("class", merged);
    }

    /// Numeric span attribute, clamped to 1..=1000 for `colspan` and
    /// 1..=65534 for `rowspan` as browsers do. Non-numeric values count as 1.
    pub fn span(&self, name: &str) -> usize {
        let max = if name == "rowspan" { MAX_ROWSPAN } else { MAX_COLSPAN };
        let Some(digits) = self
            .get(name)
            .map(str::trim)
            .filter(|value| !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()))
        else {
            return 1;
        };
        digits.parse::<usize>().unwrap_or(max).clamp(1, max)
    }

    pub fn render(&self) -> String {
        let mut pairs: Vec<&(String, String)> = self.0.iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));

        let mut out = String::new();
        for (name, value) in pairs {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            out.push_str(&escape_attr(value));
            out.push('"');
        }
        out
    }
}

/// A table found inside a cell. Its markup in the cell is replaced by a slot
/// token until flattening decides what goes there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestedTable {
    pub rows: Vec<Vec<String>>,
    pub original_html: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellModel {
    pub header: bool,
    pub attrs: Attributes,
    html: String,
    text: String,
    pub nested: Vec<NestedTable>,
}

impl CellModel {
    /// `html` may contain `NESTED_TABLE_<k>__` slots, one per entry of `nested`.
    pub fn new(header: bool, attrs: Attributes, html: String, nested: Vec<NestedTable>) -> Self {
        let mut cell = Self {
            header,
            attrs,
            html,
            text: String::new(),
            nested,
        };
        cell.refresh_text();
        cell
    }

    pub fn slot(index: usize) -> String {
        format!("{NESTED_SLOT_PREFIX}{index}__")
    }

    pub fn raw_html(&self) -> &str {
        &self.html
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_html(&mut self, html: String) {
        self.html = html;
        self.refresh_text();
    }

    /// Cell markup with every unresolved nested-table slot restored.
    pub fn inner_html(&self) -> String {
        let mut html = self.html.clone();
        for (index, nested) in self.nested.iter().enumerate() {
            html = html.replace(&Self::slot(index), &nested.original_html);
        }
        html
    }

    pub fn colspan(&self) -> usize {
        self.attrs.span("colspan")
    }

    pub fn rowspan(&self) -> usize {
        self.attrs.span("rowspan")
    }

    pub fn is_empty(&self) -> bool {
        if !self.text.trim_matches(|c: char| c.is_whitespace() || c == '\u{a0}').is_empty() {
            return false;
        }
        let lower = self.html.to_ascii_lowercase();
        !(lower.contains("<img") || lower.contains("<svg") || !self.nested.is_empty())
    }

    fn refresh_text(&mut self) {
        self.text = visible_text(&self.inner_html());
    }

    fn render(&self) -> String {
        let tag = if self.header { "th" } else { "td" };
        format!("<{tag}{}>{}</{tag}>", self.attrs.render(), self.inner_html())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowModel {
    pub attrs: Attributes,
    pub cells: Vec<CellModel>,
}

impl RowModel {
    pub fn text(&self) -> String {
        self.cells
            .iter()
            .map(CellModel::text)
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn render(&self) -> String {
        let mut out = format!("<tr{}>", self.attrs.render());
        for cell in &self.cells {
            out.push_str(&cell.render());
        }
        out.push_str("</tr>\n");
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableModel {
    pub attrs: Attributes,
    pub caption: Option<String>,
    pub colgroups: Vec<String>,
    pub head: Vec<RowModel>,
    pub body: Vec<RowModel>,
    /// The source already carried a header section.
    pub explicit_head: bool,
    /// The table already sits inside a responsive wrapper.
    pub wrapped: bool,
}

/// Grid placement of a row group: the starting column of every cell and the
/// occupied width of every row, honouring rowspans from earlier rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GridLayout {
    pub starts: Vec<Vec<usize>>,
    pub widths: Vec<usize>,
}

pub fn layout(rows: &[RowModel]) -> GridLayout {
    let mut occupied: Vec<usize> = Vec::new();
    let mut grid = GridLayout::default();

    for row in rows {
        let mut starts = Vec::with_capacity(row.cells.len());
        let mut col = 0;
        for cell in &row.cells {
            while occupied.get(col).copied().unwrap_or(0) > 0 {
                col += 1;
            }
            starts.push(col);

            let span = cell.colspan();
            if occupied.len() < col + span {
                occupied.resize(col + span, 0);
            }
            for slot in &mut occupied[col..col + span] {
                *slot = (*slot).max(cell.rowspan());
            }
            col += span;
        }

        let occupied_width = occupied
            .iter()
            .rposition(|remaining| *remaining > 0)
            .map(|pos| pos + 1)
            .unwrap_or(0);
        grid.widths.push(col.max(occupied_width));
        grid.starts.push(starts);

        for remaining in &mut occupied {
            *remaining = remaining.saturating_sub(1);
        }
    }

    grid
}

impl TableModel {
    pub fn max_columns(&self) -> usize {
        let head = layout(&self.head).widths.into_iter().max().unwrap_or(0);
        let body = layout(&self.body).widths.into_iter().max().unwrap_or(0);
        head.max(body)
    }

    pub fn render_table(&self) -> String {
        let mut out = format!("<table{}>\n", self.attrs.render());
        for colgroup in &self.colgroups {
            out.push_str(colgroup);
            out.push('\n');
        }
        if let Some(caption) = &self.caption {
            out.push_str(&format!("<caption>{}</caption>\n", escape_text(caption)));
        }
        if !self.head.is_empty() {
            out.push_str("<thead>\n");
            for row in &self.head {
                out.push_str(&row.render());
            }
            out.push_str("</thead>\n");
        }
        if !self.body.is_empty() {
            out.push_str("<tbody>\n");
            for row in &self.body {
                out.push_str(&row.render());
            }
            out.push_str("</tbody>\n");
        }
        out.push_str("</table>");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(text: &str, colspan: usize, rowspan: usize) -> CellModel {
        let mut attrs = Attributes::default();
        if colspan > 1 {
            attrs.set("colspan", colspan.to_string());
        }
        if rowspan > 1 {
            attrs.set("rowspan", rowspan.to_string());
        }
        CellModel::new(false, attrs, text.to_string(), Vec::new())
    }

    #[test]
    fn layout_accounts_for_rowspans_from_previous_rows() {
        let rows = vec![
            RowModel {
                attrs: Attributes::default(),
                cells: vec![cell("Model", 1, 2), cell("Accuracy", 2, 1)],
            },
            RowModel {
                attrs: Attributes::default(),
                cells: vec![cell("Top-1", 1, 1), cell("Top-5", 1, 1)],
            },
        ];

        let grid = layout(&rows);
        assert_eq!(grid.starts, vec![vec![0, 1], vec![1, 2]]);
        assert_eq!(grid.widths, vec![3, 3]);
    }

    #[test]
    fn oversized_spans_are_clamped() {
        let attrs = Attributes::from_pairs([
            ("colspan", "18446744073709551615"),
            ("rowspan", "999999999999999999999999"),
        ]);
        assert_eq!(attrs.span("colspan"), 1000);
        assert_eq!(attrs.span("rowspan"), 65534);
        assert_eq!(Attributes::from_pairs([("colspan", "0")]).span("colspan"), 1);
        assert_eq!(Attributes::from_pairs([("colspan", "2px")]).span("colspan"), 1);

        let huge = CellModel::new(
            false,
            Attributes::from_pairs([("colspan", "18446744073709551615")]),
            "wide".to_string(),
            Vec::new(),
        );
        let rows = vec![RowModel {
            attrs: Attributes::default(),
            cells: vec![huge, cell("next", 1, 1)],
        }];
        let grid = layout(&rows);
        assert_eq!(grid.starts, vec![vec![0, 1000]]);
        assert_eq!(grid.widths, vec![1001]);
    }

    #[test]
    fn attributes_render_sorted_and_escaped() {
        let mut attrs = Attributes::from_pairs([("title", "a \"b\""), ("class", "x")]);
        attrs.add_class("y");
        attrs.add_class("x");
        assert_eq!(attrs.render(), r#" class="x y" title="a &quot;b&quot;""#);
    }

    #[test]
    fn nested_slots_are_restored_when_rendering() {
        let nested = NestedTable {
            rows: vec![vec!["a".to_string()]],
            original_html: "<table><tr><td>a</td></tr></table>".to_string(),
        };
        let cell = CellModel::new(
            false,
            Attributes::default(),
            format!("lead {}", CellModel::slot(0)),
            vec![nested],
        );
        assert_eq!(cell.text(), "lead a");
        assert_eq!(
            cell.inner_html(),
            "lead <table><tr><td>a</td></tr></table>"
        );
    }
}
