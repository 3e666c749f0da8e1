use anyhow::Result;
use regex::Regex;
use tracing::debug;

use super::{HtmlTree, is_blank_text, is_chrome_class, is_layout_class};
use crate::transform::tables::{Attributes, CellModel, NestedTable, RowModel, TableModel};
use crate::util::{attr_value, class_attr, compile, decode_entities, strip_tags, visible_text};

const MAX_PASSES: usize = 5;

const VOID_TAGS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// One matched element: byte offsets of the open tag start, the content and
/// the end of the close tag.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ElementSpan {
    tag: String,
    attrs: String,
    start: usize,
    inner_start: usize,
    inner_end: usize,
    end: usize,
}

/// Tag-scanner backend. Elements are paired with a stack per document; a
/// close tag without an open partner is ignored and unclosed elements are
/// never matched.
pub struct ScanTree {
    element: Regex,
    script: Regex,
    empty_paragraph: Regex,
    layout_media: Regex,
    table_token: Regex,
    attr: Regex,
    wrapped_tail: Regex,
}

impl ScanTree {
    pub fn new() -> Result<Self> {
        Ok(Self {
            element: compile(r"(?i)<(/?)([a-z][a-z0-9]*)\b([^>]*)>", "element tag")?,
            script: compile(r"(?is)<script\b[^>]*>.*?</script\s*>", "script element")?,
            empty_paragraph: compile(
                r"(?is)<p\b([^>]*)>(?:\s|&nbsp;|&#160;|\x{a0}|<br\s*/?>)*</p>",
                "empty paragraph",
            )?,
            layout_media: compile(
                r"(?i)<(?:img|a|math|svg|table|figure|pre|code)\b",
                "layout media",
            )?,
            table_token: compile(
                r"(?i)<(/?)(table|thead|tbody|tfoot|tr|td|th|caption|colgroup)\b([^>]*)>",
                "table token",
            )?,
            attr: compile(
                r#"([a-zA-Z_:][-a-zA-Z0-9_:.]*)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+)))?"#,
                "attribute",
            )?,
            wrapped_tail: compile(
                r#"(?s)^[^>]*>\s*(?:<div class="table-caption">.*?</div>\s*)?$"#,
                "wrapped table tail",
            )?,
        })
    }

    fn elements(&self, html: &str) -> Vec<ElementSpan> {
        let mut open: Vec<(String, String, usize, usize)> = Vec::new();
        let mut spans = Vec::new();

        for caps in self.element.captures_iter(html) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let tag = caps[2].to_ascii_lowercase();
            let attrs = caps.get(3).map_or("", |m| m.as_str());
            if VOID_TAGS.contains(&tag.as_str()) {
                continue;
            }

            if caps[1].is_empty() {
                if !attrs.trim_end().ends_with('/') {
                    open.push((tag, attrs.to_string(), whole.start(), whole.end()));
                }
                continue;
            }

            let Some(pos) = open.iter().rposition(|(name, ..)| *name == tag) else {
                continue;
            };
            open.truncate(pos + 1);
            if let Some((tag, attrs, start, inner_start)) = open.pop() {
                spans.push(ElementSpan {
                    tag,
                    attrs,
                    start,
                    inner_start,
                    inner_end: whole.start(),
                    end: whole.end(),
                });
            }
        }

        spans.sort_by_key(|span| span.start);
        spans
    }

    /// Cuts the outermost of the given spans out of `html`.
    fn remove_spans(html: &str, mut spans: Vec<ElementSpan>) -> String {
        spans.sort_by_key(|span| span.start);
        let mut out = String::with_capacity(html.len());
        let mut last = 0;
        for span in spans {
            if span.start < last {
                continue;
            }
            out.push_str(&html[last..span.start]);
            last = span.end;
        }
        out.push_str(&html[last..]);
        out
    }

    fn is_empty_layout(&self, html: &str, span: &ElementSpan) -> bool {
        if span.tag != "div" || !class_attr(&span.attrs).is_some_and(is_layout_class) {
            return false;
        }
        let inner = &html[span.inner_start..span.inner_end];
        is_blank_text(&decode_entities(&strip_tags(inner))) && !self.layout_media.is_match(inner)
    }

    fn parse_attrs(&self, raw: &str) -> Attributes {
        Attributes::from_pairs(self.attr.captures_iter(raw).map(|caps| {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map_or(String::new(), |m| decode_entities(m.as_str()));
            (caps[1].to_string(), value)
        }))
    }

    fn outer_tables(&self, html: &str) -> Vec<(usize, usize)> {
        let mut spans = Vec::new();
        let mut depth = 0usize;
        let mut start = 0;
        for caps in self.table_token.captures_iter(html) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            if !caps[2].eq_ignore_ascii_case("table") {
                continue;
            }
            if caps[1].is_empty() {
                if depth == 0 {
                    start = whole.start();
                }
                depth += 1;
            } else if depth > 0 {
                depth -= 1;
                if depth == 0 {
                    spans.push((start, whole.end()));
                }
            }
        }
        spans
    }

    /// The table sits directly inside the nearest preceding wrapper, with at
    /// most a caption between them. A wrapper that already holds another
    /// table does not count.
    fn is_wrapped(&self, before: &str) -> bool {
        const WRAPPER: &str = "table-wrapper";
        let Some(pos) = before.rfind(WRAPPER) else {
            return false;
        };
        let tail = &before[pos + WRAPPER.len()..];
        let lower = tail.to_ascii_lowercase();
        !lower.contains("<table") && !lower.contains("</table") && self.wrapped_tail.is_match(tail)
    }

    fn parse_table(&self, html: &str) -> TableModel {
        let mut scan = TableScan::new(html);
        let mut depth = 0usize;
        let mut nested_start = None;

        for caps in self.table_token.captures_iter(html) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let closing = !caps[1].is_empty();
            let tag = caps[2].to_ascii_lowercase();
            let attrs = caps.get(3).map_or("", |m| m.as_str());

            if tag == "table" {
                if closing {
                    match depth {
                        1 => scan.close_row(self, whole.start()),
                        2 => {
                            if let Some(start) = nested_start.take() {
                                scan.nested_table(start, whole.end());
                            }
                        }
                        _ => {}
                    }
                    depth = depth.saturating_sub(1);
                } else {
                    depth += 1;
                    match depth {
                        1 => scan.model.attrs = self.parse_attrs(attrs),
                        2 => nested_start = Some(whole.start()),
                        _ => {}
                    }
                }
                continue;
            }
            if depth != 1 {
                continue;
            }

            match (tag.as_str(), closing) {
                ("caption", false) => scan.caption_start = Some(whole.end()),
                ("caption", true) => {
                    if let Some(start) = scan.caption_start.take() {
                        scan.model.caption = Some(visible_text(&html[start..whole.start()]));
                    }
                }
                ("colgroup", false) => scan.colgroup_start = Some(whole.start()),
                ("colgroup", true) => {
                    if let Some(start) = scan.colgroup_start.take() {
                        scan.model.colgroups.push(html[start..whole.end()].to_string());
                    }
                }
                ("thead", false) => {
                    scan.close_row(self, whole.start());
                    scan.in_head = true;
                    scan.model.explicit_head = true;
                }
                ("thead" | "tbody" | "tfoot", _) => {
                    scan.close_row(self, whole.start());
                    scan.in_head = false;
                }
                ("tr", false) => {
                    scan.close_row(self, whole.start());
                    scan.row = Some(RowModel {
                        attrs: self.parse_attrs(attrs),
                        cells: Vec::new(),
                    });
                }
                ("tr", true) => scan.close_row(self, whole.start()),
                ("td" | "th", false) => {
                    scan.close_cell(self, whole.start());
                    scan.row.get_or_insert_with(RowModel::default);
                    scan.cell = Some(OpenCell {
                        header: tag == "th",
                        attrs: self.parse_attrs(attrs),
                        content_start: whole.end(),
                        nested: Vec::new(),
                    });
                }
                ("td" | "th", true) => scan.close_cell(self, whole.start()),
                _ => {}
            }
        }

        scan.close_row(self, html.len());
        scan.model
    }

    fn nested_rows(&self, html: &str) -> Vec<Vec<String>> {
        let table = self.parse_table(html);
        table
            .head
            .iter()
            .chain(&table.body)
            .map(|row| row.cells.iter().map(|cell| cell.text().to_string()).collect())
            .collect()
    }
}

struct OpenCell {
    header: bool,
    attrs: Attributes,
    content_start: usize,
    nested: Vec<(usize, usize)>,
}

/// Cursor state while walking the tokens of one table.
struct TableScan<'a> {
    html: &'a str,
    model: TableModel,
    in_head: bool,
    row: Option<RowModel>,
    cell: Option<OpenCell>,
    caption_start: Option<usize>,
    colgroup_start: Option<usize>,
}

impl<'a> TableScan<'a> {
    fn new(html: &'a str) -> Self {
        Self {
            html,
            model: TableModel::default(),
            in_head: false,
            row: None,
            cell: None,
            caption_start: None,
            colgroup_start: None,
        }
    }

    fn nested_table(&mut self, start: usize, end: usize) {
        if let Some(cell) = &mut self.cell {
            cell.nested.push((start, end));
        }
    }

    fn close_cell(&mut self, tree: &ScanTree, end: usize) {
        let Some(open) = self.cell.take() else {
            return;
        };
        let end = end.max(open.content_start);

        let mut html = String::new();
        let mut nested = Vec::with_capacity(open.nested.len());
        let mut last = open.content_start;
        for (index, (start, stop)) in open.nested.iter().copied().enumerate() {
            html.push_str(&self.html[last..start]);
            html.push_str(&CellModel::slot(index));
            let original_html = self.html[start..stop].to_string();
            nested.push(NestedTable {
                rows: tree.nested_rows(&original_html),
                original_html,
            });
            last = stop;
        }
        html.push_str(&self.html[last..end]);

        let cell = CellModel::new(open.header, open.attrs, html, nested);
        self.row.get_or_insert_with(RowModel::default).cells.push(cell);
    }

    fn close_row(&mut self, tree: &ScanTree, end: usize) {
        self.close_cell(tree, end);
        let Some(row) = self.row.take() else {
            return;
        };
        if self.in_head {
            self.model.head.push(row);
        } else {
            self.model.body.push(row);
        }
    }
}

impl HtmlTree for ScanTree {
    fn name(&self) -> &'static str {
        "regex"
    }

    fn strip_chrome(&self, html: &str) -> Result<String> {
        let mut out = self.script.replace_all(html, "").into_owned();

        let chrome: Vec<ElementSpan> = self
            .elements(&out)
            .into_iter()
            .filter(|span| class_attr(&span.attrs).is_some_and(is_chrome_class))
            .collect();
        if !chrome.is_empty() {
            debug!(elements = chrome.len(), "stripped page chrome");
            out = Self::remove_spans(&out, chrome);
        }

        let innermost = self
            .elements(&out)
            .into_iter()
            .filter(|span| attr_value(&span.attrs, "id") == Some("doc_content"))
            .last();
        if let Some(span) = innermost {
            out = out[span.inner_start..span.inner_end].to_string();
        }

        Ok(out)
    }

    fn remove_empty_blocks(&self, html: &str) -> Result<String> {
        let mut out = html.to_string();
        for _ in 0..MAX_PASSES {
            let paragraphs = self.empty_paragraph.replace_all(&out, |caps: &regex::Captures| {
                if attr_value(&caps[1], "id").is_some() {
                    caps[0].to_string()
                } else {
                    String::new()
                }
            });
            let paragraphs = paragraphs.into_owned();

            let layouts: Vec<ElementSpan> = self
                .elements(&paragraphs)
                .into_iter()
                .filter(|span| self.is_empty_layout(&paragraphs, span))
                .collect();
            let next = if layouts.is_empty() {
                paragraphs
            } else {
                Self::remove_spans(&paragraphs, layouts)
            };

            if next == out {
                break;
            }
            out = next;
        }
        Ok(out)
    }

    fn rewrite_tables(
        &self,
        html: &str,
        rewrite: &mut dyn FnMut(TableModel) -> String,
    ) -> Result<String> {
        let spans = self.outer_tables(html);
        if spans.is_empty() {
            return Ok(html.to_string());
        }

        let mut out = String::with_capacity(html.len() + spans.len() * 64);
        let mut last = 0;
        for (start, end) in spans {
            out.push_str(&html[last..start]);
            let mut table = self.parse_table(&html[start..end]);
            table.wrapped = self.is_wrapped(&html[..start]);
            out.push_str(&rewrite(table));
            last = end;
        }
        out.push_str(&html[last..]);
        Ok(out)
    }
}
