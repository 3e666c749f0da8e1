use anyhow::Result;
use regex::Regex;

use crate::util::{attr_value, compile, escape_text, visible_text};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NominalLevel {
    Section,
    Subsection,
    Subsubsection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadingClass {
    pub level: NominalLevel,
    pub enrichment: bool,
}

/// Where a heading lands in the outline once enrichment runs are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Section,
    Subsection,
    Subsubsection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub level: Placement,
    pub text: String,
    pub id: Option<String>,
    pub enrichment: bool,
    pub number: String,
}

/// One heading-like element located in a fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadingMatch {
    pub start: usize,
    pub open_end: usize,
    pub end: usize,
    pub tag: String,
    pub attrs: String,
    pub inner: String,
}

impl HeadingMatch {
    pub fn id(&self) -> Option<&str> {
        attr_value(&self.attrs, "id")
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        attr_value(&self.attrs, "class")
            .unwrap_or("")
            .split_whitespace()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes().any(|token| token == class)
    }
}

/// Finds `h1`-`h6` elements plus span/div elements carrying a converter
/// heading class, in document order.
pub struct HeadingScanner {
    heading: Regex,
    span_heading: Regex,
    div_heading: Regex,
}

impl HeadingScanner {
    pub fn new() -> Result<Self> {
        Ok(Self {
            heading: compile(r"(?is)<(h[1-6])\b([^>]*)>(.*?)</h[1-6]\s*>", "heading element")?,
            span_heading: compile(
                r#"(?is)<(span)(\s[^>]*class\s*=\s*"[^"]*(?:sectionHead|subsectionHead|subsubsectionHead|paragraphHead)[^"]*"[^>]*)>(.*?)</span\s*>"#,
                "span heading",
            )?,
            div_heading: compile(
                r#"(?is)<(div)(\s[^>]*class\s*=\s*"[^"]*(?:sectionHead|subsectionHead|subsubsectionHead|paragraphHead)[^"]*"[^>]*)>(.*?)</div\s*>"#,
                "div heading",
            )?,
        })
    }

    pub fn scan(&self, html: &str) -> Vec<HeadingMatch> {
        let mut found: Vec<HeadingMatch> = Vec::new();
        for pattern in [&self.heading, &self.span_heading, &self.div_heading] {
            for caps in pattern.captures_iter(html) {
                let (Some(whole), Some(tag), Some(attrs), Some(inner)) =
                    (caps.get(0), caps.get(1), caps.get(2), caps.get(3))
                else {
                    continue;
                };
                found.push(HeadingMatch {
                    start: whole.start(),
                    open_end: attrs.end() + 1,
                    end: whole.end(),
                    tag: tag.as_str().to_ascii_lowercase(),
                    attrs: attrs.as_str().to_string(),
                    inner: inner.as_str().to_string(),
                });
            }
        }

        found.sort_by_key(|heading| heading.start);
        let mut accepted: Vec<HeadingMatch> = Vec::with_capacity(found.len());
        for heading in found {
            if accepted.last().is_some_and(|prev| heading.start < prev.end) {
                continue;
            }
            accepted.push(heading);
        }
        accepted
    }
}

/// The single classification routine shared by numbering and the TOC.
pub struct OutlineClassifier {
    enrichment_text: Regex,
    enrichment_prefix: Regex,
}

impl OutlineClassifier {
    pub fn new() -> Result<Self> {
        Ok(Self {
            enrichment_text: compile(r"^Enrichment(?:\s+[\d.]+)?\s*:", "enrichment text")?,
            enrichment_prefix: compile(
                r"^(?:[\d.]+\s+)?Enrichment(?:\s+[\d.]+)?\s*:\s*",
                "enrichment prefix",
            )?,
        })
    }

    pub fn classify(&self, heading: &HeadingMatch) -> Option<HeadingClass> {
        if heading.has_class("chapterHead") {
            return None;
        }

        let text = visible_text(&heading.inner);
        let enrichment =
            heading.has_class("enrichment-title") || self.enrichment_text.is_match(&text);
        let level = match heading.tag.as_str() {
            "h3" if enrichment || heading.has_class("sectionHead") => NominalLevel::Section,
            "h4" if enrichment || heading.has_class("subsectionHead") => NominalLevel::Subsection,
            "h5" if enrichment || heading.has_class("subsubsectionHead") => {
                NominalLevel::Subsubsection
            }
            _ => return None,
        };

        Some(HeadingClass { level, enrichment })
    }

    /// Title text without any `Enrichment N.M:` prefix.
    pub fn enrichment_title(&self, text: &str) -> String {
        self.enrichment_prefix.replace(text, "").trim().to_string()
    }
}

/// Per-chapter counters plus the enrichment-run sub-state. Subsubsections do
/// not end an enrichment run.
#[derive(Debug, Clone)]
pub struct SectionCounterState {
    chapter: u32,
    section: u32,
    subsection: u32,
    subsubsection: u32,
    previous: Option<HeadingClass>,
}

impl SectionCounterState {
    pub fn new(chapter: u32) -> Self {
        Self {
            chapter,
            section: 0,
            subsection: 0,
            subsubsection: 0,
            previous: None,
        }
    }

    #[cfg(test)]
    pub fn with_section(chapter: u32, section: u32) -> Self {
        Self {
            section,
            ..Self::new(chapter)
        }
    }

    pub fn advance(&mut self, class: HeadingClass) -> (Placement, String) {
        let continues_run = self.previous.is_some_and(|previous| {
            previous.enrichment && previous.level == NominalLevel::Section
        });

        let placement = match class.level {
            NominalLevel::Section if class.enrichment && continues_run => Placement::Subsection,
            NominalLevel::Section => Placement::Section,
            NominalLevel::Subsection => Placement::Subsection,
            NominalLevel::Subsubsection => Placement::Subsubsection,
        };

        let number = match placement {
            Placement::Section => {
                self.section += 1;
                self.subsection = 0;
                self.subsubsection = 0;
                format!("{}.{}", self.chapter, self.section)
            }
            Placement::Subsection => {
                self.subsection += 1;
                self.subsubsection = 0;
                format!("{}.{}.{}", self.chapter, self.section, self.subsection)
            }
            Placement::Subsubsection => {
                self.subsubsection += 1;
                if self.subsection == 0 {
                    format!("{}.{}.{}", self.chapter, self.section, self.subsubsection)
                } else {
                    format!(
                        "{}.{}.{}.{}",
                        self.chapter, self.section, self.subsection, self.subsubsection
                    )
                }
            }
        };

        if class.level != NominalLevel::Subsubsection {
            self.previous = Some(class);
        }
        (placement, number)
    }
}

/// Writes hierarchical numbers into heading titles in document order.
pub struct SectionRenumberer {
    titlemark: Regex,
    empty_anchor: Regex,
}

impl SectionRenumberer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            titlemark: compile(
                r#"(?is)(<span[^>]*class\s*=\s*"[^"]*titlemark[^"]*"[^>]*>)[^<]*(</span>)"#,
                "titlemark",
            )?,
            empty_anchor: compile(r#"(?is)<a\s[^>]*\bid\s*=\s*"[^"]*"[^>]*>\s*</a>"#, "empty anchor")?,
        })
    }

    pub fn renumber(
        &self,
        html: &str,
        chapter: u32,
        scanner: &HeadingScanner,
        classifier: &OutlineClassifier,
    ) -> (String, Vec<Heading>) {
        let mut state = SectionCounterState::new(chapter);
        let mut headings = Vec::new();
        let mut out = String::with_capacity(html.len());
        let mut cursor = 0;

        for found in scanner.scan(html) {
            let Some(class) = classifier.classify(&found) else {
                continue;
            };
            let (placement, number) = state.advance(class);

            let inner = if class.enrichment {
                let anchors: String = self
                    .empty_anchor
                    .find_iter(&found.inner)
                    .map(|anchor| anchor.as_str())
                    .collect();
                let title = classifier.enrichment_title(&visible_text(&found.inner));
                format!("{anchors}Enrichment {number}: {}", escape_text(&title))
            } else if self.titlemark.is_match(&found.inner) {
                let replacement = format!("${{1}}{number}&nbsp;&nbsp;${{2}}");
                self.titlemark
                    .replacen(&found.inner, 1, replacement.as_str())
                    .into_owned()
            } else {
                found.inner.clone()
            };

            headings.push(Heading {
                level: placement,
                text: visible_text(&inner),
                id: found.id().map(str::to_string),
                enrichment: class.enrichment,
                number,
            });

            out.push_str(&html[cursor..found.open_end]);
            out.push_str(&inner);
            out.push_str(&format!("</{}>", found.tag));
            cursor = found.end;
        }

        out.push_str(&html[cursor..]);
        (out, headings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools() -> (HeadingScanner, OutlineClassifier, SectionRenumberer) {
        (
            HeadingScanner::new().expect("scanner"),
            OutlineClassifier::new().expect("classifier"),
            SectionRenumberer::new().expect("renumberer"),
        )
    }

    #[test]
    fn consecutive_enrichments_form_a_section_and_subsection() {
        let enrichment = HeadingClass {
            level: NominalLevel::Section,
            enrichment: true,
        };
        let mut state = SectionCounterState::with_section(7, 3);

        assert_eq!(state.advance(enrichment), (Placement::Section, "7.4".to_string()));
        assert_eq!(
            state.advance(enrichment),
            (Placement::Subsection, "7.4.1".to_string())
        );
    }

    #[test]
    fn plain_section_ends_an_enrichment_run() {
        let plain = HeadingClass {
            level: NominalLevel::Section,
            enrichment: false,
        };
        let enrichment = HeadingClass {
            level: NominalLevel::Section,
            enrichment: true,
        };
        let subsub = HeadingClass {
            level: NominalLevel::Subsubsection,
            enrichment: false,
        };
        let mut state = SectionCounterState::new(2);

        assert_eq!(state.advance(plain).1, "2.1");
        assert_eq!(state.advance(enrichment).1, "2.2");
        assert_eq!(state.advance(subsub).1, "2.2.1");
        assert_eq!(state.advance(enrichment).1, "2.2.1");
        assert_eq!(state.advance(plain).1, "2.3");
        assert_eq!(state.advance(enrichment).1, "2.4");
    }

    #[test]
    fn renumber_rewrites_titlemarks_and_enrichment_titles() {
        let (scanner, classifier, renumberer) = tools();
        let html = concat!(
            "<h2 class=\"chapterHead\">Chapter 7</h2>",
            "<h3 class=\"sectionHead\" id=\"intro\"><span class=\"titlemark\">3.1</span> <a id=\"x1-2\"></a>Intro</h3>",
            "<h4 class=\"subsectionHead\"><span class=\"titlemark\">3.1.1</span> Details</h4>",
            "<h3 class=\"enrichment-title\" id=\"enrichment-vanishing\"><a id=\"x1-9\"></a>Enrichment: Vanishing Gradients</h3>",
            "<h3 class=\"enrichment-title\">Enrichment 1.2: Exploding Gradients</h3>",
        );

        let (out, headings) = renumberer.renumber(html, 7, &scanner, &classifier);
        assert!(out.contains("<span class=\"titlemark\">7.1&nbsp;&nbsp;</span> <a id=\"x1-2\"></a>Intro</h3>"));
        assert!(out.contains("<span class=\"titlemark\">7.1.1&nbsp;&nbsp;</span> Details</h4>"));
        assert!(out.contains("<a id=\"x1-9\"></a>Enrichment 7.2: Vanishing Gradients</h3>"));
        assert!(out.contains(">Enrichment 7.2.1: Exploding Gradients</h3>"));

        let numbers: Vec<&str> = headings.iter().map(|h| h.number.as_str()).collect();
        assert_eq!(numbers, vec!["7.1", "7.1.1", "7.2", "7.2.1"]);
        assert_eq!(headings[2].id.as_deref(), Some("enrichment-vanishing"));

        let (again, _) = renumberer.renumber(&out, 7, &scanner, &classifier);
        assert_eq!(again, out);
    }

    #[test]
    fn scanner_skips_headings_nested_in_accepted_ranges() {
        let scanner = HeadingScanner::new().expect("scanner");
        let html = "<h3 class=\"sectionHead\">A <span class=\"paragraphHead\">B</span></h3><span class=\"paragraphHead\">C</span>";
        let found = scanner.scan(html);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].tag, "h3");
        assert_eq!(found[1].inner, "C");
    }
}
