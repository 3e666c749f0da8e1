use anyhow::Result;
use tracing::info;

use crate::cli::HtmlBackendArg;
use crate::transform::tables::TableModel;

#[cfg(feature = "dom")]
mod dom;
mod scan;

#[cfg(feature = "dom")]
pub use dom::DomTree;
pub use scan::ScanTree;

/// Classes of page chrome that never belong inside chapter content.
pub const CHROME_CLASSES: [&str; 6] = [
    "sidebar",
    "top-bar",
    "main-wrapper",
    "content-scroll",
    "nav-btns",
    "float-nav",
];

/// Layout divs the converter leaves behind, removed when empty.
pub const LAYOUT_CLASSES: [&str; 3] = ["minipage", "parbox", "center"];

/// Structural edits that want a real tree. Both implementations keep the same
/// contract; the scanner trades precision on malformed markup for having no
/// parser dependency.
pub trait HtmlTree {
    fn name(&self) -> &'static str;

    /// Drops page chrome and scripts, and unwraps a nested `#doc_content`.
    fn strip_chrome(&self, html: &str) -> Result<String>;

    /// Drops id-less paragraphs and layout divs with no text and no media.
    fn remove_empty_blocks(&self, html: &str) -> Result<String>;

    /// Hands every top-level table to `rewrite` and splices its output back
    /// in place of the table element.
    fn rewrite_tables(
        &self,
        html: &str,
        rewrite: &mut dyn FnMut(TableModel) -> String,
    ) -> Result<String>;
}

pub fn select_backend(arg: HtmlBackendArg) -> Result<Box<dyn HtmlTree>> {
    let tree = match arg {
        HtmlBackendArg::Regex => scan_backend()?,
        HtmlBackendArg::Dom => dom_backend()?,
        HtmlBackendArg::Auto if cfg!(feature = "dom") => dom_backend()?,
        HtmlBackendArg::Auto => scan_backend()?,
    };
    info!(backend = tree.name(), "selected html backend");
    Ok(tree)
}

fn scan_backend() -> Result<Box<dyn HtmlTree>> {
    Ok(Box::new(ScanTree::new()?))
}

#[cfg(feature = "dom")]
fn dom_backend() -> Result<Box<dyn HtmlTree>> {
    Ok(Box::new(DomTree::new()))
}

#[cfg(not(feature = "dom"))]
fn dom_backend() -> Result<Box<dyn HtmlTree>> {
    anyhow::bail!("the dom html backend is not compiled in; rebuild with the `dom` feature")
}

pub(crate) fn is_layout_class(class: &str) -> bool {
    LAYOUT_CLASSES.iter().any(|layout| class.contains(layout))
}

pub(crate) fn is_chrome_class(class: &str) -> bool {
    class
        .split_whitespace()
        .any(|token| CHROME_CLASSES.contains(&token))
}

/// Visible text with non-breaking spaces treated as blank.
pub(crate) fn is_blank_text(text: &str) -> bool {
    text.chars().all(|c| c.is_whitespace() || c == '\u{a0}')
}
