use anyhow::Result;
use regex::Regex;

use crate::transform::outline::{
    HeadingScanner, OutlineClassifier, Placement, SectionCounterState,
};
use crate::util::{compile, escape_attr, escape_text, visible_text};

const ENRICHMENT_MARKER: &str = "<span class=\"toc-emoji\" aria-hidden=\"true\">\u{1f4d8}</span>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub id: String,
    pub text: String,
    pub placement: Placement,
    pub enrichment: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableOfContents {
    pub entries: Vec<TocEntry>,
    /// `<li>` items for the shell's `ul.toc-list`.
    pub html: String,
}

/// Builds the in-page navigation list from the headings of a finished
/// chapter body, using the same classification as numbering.
pub struct TocExtractor {
    noise: Regex,
}

impl TocExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            noise: compile(r"(?i)^(?:Chapter\s*\d+|Lecture\s+\d+:)", "toc noise")?,
        })
    }

    pub fn extract(
        &self,
        html: &str,
        chapter: u32,
        scanner: &HeadingScanner,
        classifier: &OutlineClassifier,
    ) -> TableOfContents {
        let mut state = SectionCounterState::new(chapter);
        let mut entries = Vec::new();

        for found in scanner.scan(html) {
            let Some(class) = classifier.classify(&found) else {
                continue;
            };
            let (placement, number) = state.advance(class);
            if placement == Placement::Subsubsection {
                continue;
            }

            let text = visible_text(&found.inner);
            if text.is_empty() || self.noise.is_match(&text) {
                continue;
            }
            let text = if class.enrichment {
                format!("{number} {}", classifier.enrichment_title(&text))
            } else {
                text
            };
            let Some(id) = found.id() else {
                continue;
            };

            entries.push(TocEntry {
                id: id.to_string(),
                text,
                placement,
                enrichment: class.enrichment,
            });
        }

        let html = render(&entries);
        TableOfContents { entries, html }
    }
}

fn render(entries: &[TocEntry]) -> String {
    let mut out = String::new();
    let mut section_open = false;
    let mut sub_open = false;

    for entry in entries {
        match entry.placement {
            Placement::Section => {
                if sub_open {
                    out.push_str("</ul>\n");
                    sub_open = false;
                }
                if section_open {
                    out.push_str("</li>\n");
                }
                out.push_str(&format!("<li class=\"{}\">", item_class("toc-h3", entry)));
                out.push_str(&link(entry));
                section_open = true;
            }
            Placement::Subsection => {
                if !section_open {
                    continue;
                }
                if !sub_open {
                    out.push_str("\n<ul class=\"toc-sub-list\">\n");
                    sub_open = true;
                }
                out.push_str(&format!(
                    "<li class=\"{}\">{}</li>\n",
                    item_class("toc-h4", entry),
                    link(entry)
                ));
            }
            Placement::Subsubsection => {}
        }
    }

    if sub_open {
        out.push_str("</ul>\n");
    }
    if section_open {
        out.push_str("</li>\n");
    }
    out
}

fn item_class(base: &str, entry: &TocEntry) -> String {
    if entry.enrichment {
        format!("{base} toc-enrichment")
    } else {
        base.to_string()
    }
}

fn link(entry: &TocEntry) -> String {
    let marker = if entry.enrichment { ENRICHMENT_MARKER } else { "" };
    format!(
        "<a href=\"#{}\">{}{marker}</a>",
        escape_attr(&entry.id),
        escape_text(&entry.text)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(html: &str) -> TableOfContents {
        let scanner = HeadingScanner::new().expect("scanner");
        let classifier = OutlineClassifier::new().expect("classifier");
        TocExtractor::new()
            .expect("extractor")
            .extract(html, 7, &scanner, &classifier)
    }

    #[test]
    fn subsections_nest_under_their_section() {
        let toc = extract(concat!(
            "<h3 class=\"sectionHead\" id=\"intro\"><span class=\"titlemark\">7.1&nbsp;&nbsp;</span>Intro</h3>",
            "<h4 class=\"subsectionHead\" id=\"setup\"><span class=\"titlemark\">7.1.1&nbsp;&nbsp;</span>Setup</h4>",
            "<h5 class=\"subsubsectionHead\" id=\"detail\">Detail</h5>",
            "<h3 class=\"sectionHead\" id=\"pooling\"><span class=\"titlemark\">7.2&nbsp;&nbsp;</span>Pooling</h3>",
        ));

        assert_eq!(toc.entries.len(), 3);
        assert_eq!(
            toc.html,
            concat!(
                "<li class=\"toc-h3\"><a href=\"#intro\">7.1 Intro</a>\n",
                "<ul class=\"toc-sub-list\">\n",
                "<li class=\"toc-h4\"><a href=\"#setup\">7.1.1 Setup</a></li>\n",
                "</ul>\n</li>\n",
                "<li class=\"toc-h3\"><a href=\"#pooling\">7.2 Pooling</a></li>\n",
            )
        );
    }

    #[test]
    fn enrichment_run_is_marked_and_nested() {
        let toc = extract(concat!(
            "<h3 class=\"enrichment-title\" id=\"enrichment-vanishing-gradients\">Enrichment 7.1: Vanishing Gradients</h3>",
            "<h3 class=\"enrichment-title\" id=\"enrichment-exploding-gradients\">Enrichment 7.1.1: Exploding Gradients</h3>",
        ));

        assert_eq!(toc.entries[0].placement, Placement::Section);
        assert_eq!(toc.entries[1].placement, Placement::Subsection);
        assert_eq!(toc.entries[0].text, "7.1 Vanishing Gradients");
        assert_eq!(toc.entries[1].text, "7.1.1 Exploding Gradients");
        assert!(toc.html.starts_with(
            "<li class=\"toc-h3 toc-enrichment\"><a href=\"#enrichment-vanishing-gradients\">7.1 Vanishing Gradients<span class=\"toc-emoji\""
        ));
        assert!(toc.html.contains("<li class=\"toc-h4 toc-enrichment\">"));
    }

    #[test]
    fn orphan_subsections_are_not_emitted() {
        let toc = extract(
            "<h4 class=\"subsectionHead\" id=\"orphan\">Orphan</h4><h3 class=\"sectionHead\" id=\"s\">Lecture 7: Title</h3>",
        );
        assert!(toc.html.is_empty());
    }
}
