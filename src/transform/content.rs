use anyhow::Result;
use regex::Regex;

use crate::transform::safety::{CONTENT_END, CONTENT_START};
use crate::util::compile;

const MAX_PEEL: usize = 10;
const WRAPPER_CLASSES: [&str; 4] = ["card", "container", "content-scroll", "card-body"];

/// Reduces a page on disk to the fragment the pipeline transforms.
pub struct ContentExtractor {
    body: Regex,
    wrapper_open: Regex,
}

impl ContentExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            body: compile(r"(?is)<body[^>]*>(.*)</body>", "page body")?,
            wrapper_open: compile(
                r#"(?is)^<div\s+class\s*=\s*["']([^"']*)["'][^>]*>"#,
                "wrapper div",
            )?,
        })
    }

    /// Content between the markers of a processed page, unwrapping pages a
    /// previous run nested inside each other; else the body; else everything.
    pub fn extract(&self, page: &str) -> String {
        if page.contains(CONTENT_START) {
            let mut content = page;
            for _ in 0..MAX_PEEL {
                let Some(start) = content.find(CONTENT_START) else {
                    break;
                };
                let from = start + CONTENT_START.len();
                let to = content.rfind(CONTENT_END).filter(|end| *end >= from);
                content = match to {
                    Some(end) => &content[from..end],
                    None => &content[from..],
                };
            }
            return content.trim().to_string();
        }

        match self.body.captures(page).and_then(|caps| caps.get(1)) {
            Some(body) => body.as_str().trim().to_string(),
            None => page.trim().to_string(),
        }
    }

    /// Drops leading card/container wrappers that enclose the whole fragment.
    pub fn peel_wrappers(&self, html: &str) -> String {
        let mut content = html.trim();
        for _ in 0..MAX_PEEL {
            let Some(open) = self.wrapper_open.captures(content) else {
                break;
            };
            let is_wrapper = WRAPPER_CLASSES.contains(&open[1].trim());
            let Some(open_end) = open.get(0).map(|m| m.end()) else {
                break;
            };
            let close = content
                .rfind("</div>")
                .filter(|close| *close >= open_end && content[*close..].trim_end() == "</div>");
            let Some(close) = close else {
                break;
            };
            if !is_wrapper {
                break;
            }
            content = content[open_end..close].trim();
        }
        content.to_string()
    }
}
