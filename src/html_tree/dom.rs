use anyhow::{Result, anyhow};
use kuchiki::traits::TendrilSink;
use kuchiki::{NodeData, NodeRef};
use tracing::debug;

use super::{HtmlTree, is_blank_text, is_chrome_class, is_layout_class};
use crate::transform::tables::{Attributes, CellModel, NestedTable, RowModel, TableModel};
use crate::util::collapse_whitespace;

const MAX_PASSES: usize = 5;
const TABLE_SLOT_PREFIX: &str = "TABLE_SLOT_";

const PARAGRAPH_MEDIA: &str = "img, a, span, math, svg, table, figure";
const LAYOUT_MEDIA: &str = "img, a, math, svg, table, figure, pre, code";

/// Parsed-tree backend. Every edit parses the fragment into a document body,
/// mutates the tree and serializes the body's children back.
#[derive(Debug, Default)]
pub struct DomTree;

impl DomTree {
    pub fn new() -> Self {
        Self
    }
}

fn parse_body(html: &str) -> Result<NodeRef> {
    let document = kuchiki::parse_html().one(format!(
        "<!DOCTYPE html><html><head></head><body>{html}</body></html>"
    ));
    let body = document
        .select_first("body")
        .map_err(|_| anyhow!("parsed fragment has no body element"))?;
    Ok(body.as_node().clone())
}

fn serialize_children(node: &NodeRef) -> String {
    node.children().map(|child| child.to_string()).collect()
}

fn select_all(root: &NodeRef, selector: &str) -> Result<Vec<NodeRef>> {
    let matches = root
        .select(selector)
        .map_err(|_| anyhow!("invalid selector: {selector}"))?;
    Ok(matches.map(|found| found.as_node().clone()).collect())
}

fn has_match(root: &NodeRef, selector: &str) -> Result<bool> {
    let mut matches = root
        .select(selector)
        .map_err(|_| anyhow!("invalid selector: {selector}"))?;
    Ok(matches.next().is_some())
}

fn tag_name(node: &NodeRef) -> Option<String> {
    node.as_element()
        .map(|element| element.name.local.as_ref().to_ascii_lowercase())
}

fn attribute(node: &NodeRef, name: &str) -> Option<String> {
    node.as_element()
        .and_then(|element| element.attributes.borrow().get(name).map(str::to_string))
}

fn attributes(node: &NodeRef) -> Attributes {
    let Some(element) = node.as_element() else {
        return Attributes::default();
    };
    let attrs = element.attributes.borrow();
    Attributes::from_pairs(
        attrs
            .map
            .iter()
            .map(|(name, attr)| (name.local.as_ref().to_string(), attr.value.clone())),
    )
}

fn is_blank(node: &NodeRef) -> bool {
    is_blank_text(&node.text_contents())
}

/// Nearest table strictly above `node`.
fn enclosing_table(node: &NodeRef) -> Option<NodeRef> {
    node.ancestors()
        .find(|ancestor| tag_name(ancestor).as_deref() == Some("table"))
}

fn element_children(node: &NodeRef) -> impl Iterator<Item = NodeRef> {
    node.children()
        .filter(|child| matches!(child.data(), NodeData::Element(_)))
}

fn build_table(table: &NodeRef) -> Result<TableModel> {
    let mut model = TableModel {
        attrs: attributes(table),
        ..TableModel::default()
    };

    for child in element_children(table) {
        match tag_name(&child).as_deref() {
            Some("caption") => model.caption = Some(collapse_whitespace(&child.text_contents())),
            Some("colgroup") => model.colgroups.push(child.to_string()),
            Some("thead") => {
                model.explicit_head = true;
                for row in element_children(&child) {
                    if tag_name(&row).as_deref() == Some("tr") {
                        model.head.push(build_row(&row)?);
                    }
                }
            }
            Some("tbody" | "tfoot") => {
                for row in element_children(&child) {
                    if tag_name(&row).as_deref() == Some("tr") {
                        model.body.push(build_row(&row)?);
                    }
                }
            }
            Some("tr") => model.body.push(build_row(&child)?),
            _ => {}
        }
    }

    model.wrapped = table.parent().is_some_and(|parent| {
        tag_name(&parent).as_deref() == Some("div")
            && attribute(&parent, "class")
                .is_some_and(|class| class.split_whitespace().any(|token| token == "table-wrapper"))
    });
    Ok(model)
}

fn build_row(row: &NodeRef) -> Result<RowModel> {
    let mut cells = Vec::new();
    for cell in element_children(row) {
        let header = match tag_name(&cell).as_deref() {
            Some("th") => true,
            Some("td") => false,
            _ => continue,
        };

        let mut html = serialize_children(&cell);
        let mut nested = Vec::new();
        let outer = enclosing_table(&cell);
        for inner in select_all(&cell, "table")? {
            if enclosing_table(&inner) != outer {
                continue;
            }
            let original_html = inner.to_string();
            html = html.replacen(&original_html, &CellModel::slot(nested.len()), 1);
            nested.push(NestedTable {
                rows: nested_rows(&inner)?,
                original_html,
            });
        }

        cells.push(CellModel::new(header, attributes(&cell), html, nested));
    }
    Ok(RowModel {
        attrs: attributes(row),
        cells,
    })
}

fn nested_rows(table: &NodeRef) -> Result<Vec<Vec<String>>> {
    let mut rows = Vec::new();
    for row in select_all(table, "tr")? {
        if enclosing_table(&row).as_ref() != Some(table) {
            continue;
        }
        rows.push(
            element_children(&row)
                .filter(|cell| matches!(tag_name(cell).as_deref(), Some("td" | "th")))
                .map(|cell| collapse_whitespace(&cell.text_contents()))
                .collect(),
        );
    }
    Ok(rows)
}

impl HtmlTree for DomTree {
    fn name(&self) -> &'static str {
        "dom"
    }

    fn strip_chrome(&self, html: &str) -> Result<String> {
        let body = parse_body(html)?;

        let mut removed = 0;
        for node in select_all(&body, "[class], script")? {
            let chrome = tag_name(&node).as_deref() == Some("script")
                || attribute(&node, "class").is_some_and(|class| is_chrome_class(&class));
            if chrome {
                node.detach();
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(elements = removed, "stripped page chrome");
        }

        if let Some(innermost) = select_all(&body, "#doc_content")?.pop() {
            return Ok(serialize_children(&innermost));
        }
        Ok(serialize_children(&body))
    }

    fn remove_empty_blocks(&self, html: &str) -> Result<String> {
        let body = parse_body(html)?;

        for _ in 0..MAX_PASSES {
            let mut doomed = Vec::new();
            for paragraph in select_all(&body, "p")? {
                if attribute(&paragraph, "id").is_none()
                    && is_blank(&paragraph)
                    && !has_match(&paragraph, PARAGRAPH_MEDIA)?
                {
                    doomed.push(paragraph);
                }
            }
            for div in select_all(&body, "div[class]")? {
                let layout = attribute(&div, "class").is_some_and(|class| is_layout_class(&class));
                if layout && is_blank(&div) && !has_match(&div, LAYOUT_MEDIA)? {
                    doomed.push(div);
                }
            }

            if doomed.is_empty() {
                break;
            }
            for node in doomed {
                node.detach();
            }
        }

        Ok(serialize_children(&body))
    }

    fn rewrite_tables(
        &self,
        html: &str,
        rewrite: &mut dyn FnMut(TableModel) -> String,
    ) -> Result<String> {
        let body = parse_body(html)?;

        let tables: Vec<NodeRef> = select_all(&body, "table")?
            .into_iter()
            .filter(|table| enclosing_table(table).is_none())
            .collect();

        let mut rendered = Vec::with_capacity(tables.len());
        for (index, table) in tables.iter().enumerate() {
            let model = build_table(table)?;
            rendered.push(rewrite(model));
            table.insert_before(NodeRef::new_text(format!("{TABLE_SLOT_PREFIX}{index}__")));
            table.detach();
        }

        let mut out = serialize_children(&body);
        for (index, markup) in rendered.iter().enumerate() {
            out = out.replacen(&format!("{TABLE_SLOT_PREFIX}{index}__"), markup, 1);
        }
        Ok(out)
    }
}
