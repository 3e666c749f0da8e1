use std::collections::BTreeMap;

use anyhow::Result;
use regex::{Captures, Regex};

use crate::model::IssueKind;
use crate::policy::KnownReference;
use crate::transform::context::ChapterDiagnostics;
use crate::transform::math_guard::MathTable;
use crate::util::{compile, escape_attr, escape_text, floor_char_boundary, strip_tags};

const WS: &str = r"(?:\s|\x{a0}|&nbsp;)";

const SECTION_TITLE: &str = "Cross-reference to another chapter";
const EQUATION_TITLE: &str = "Equation reference not resolved";
const FIGURE_TITLE: &str = "Figure reference not resolved";

/// Visible characters searched before and after a placeholder.
const SECTION_CONTEXT: (usize, usize) = (300, 100);
const EQUATION_CONTEXT: (usize, usize) = (500, 200);

/// Equation label -> displayed number for one chapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EquationLabels(BTreeMap<String, String>);

impl EquationLabels {
    #[cfg(test)]
    pub fn get(&self, label: &str) -> Option<&str> {
        self.0.get(label).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Resolves placeholders the converter leaves for references it could not
/// resolve: cross-chapter section refs, equation refs, figure refs and
/// malformed enrichment refs.
pub struct CrossReferenceResolver<'p> {
    references: &'p [KnownReference],
    section_patterns: Vec<Regex>,
    bold_section: Regex,
    bold_unknown: Regex,
    equation_patterns: Vec<Regex>,
    figure_patterns: Vec<Regex>,
    enrichment_ref: Regex,
    eq_comment: Regex,
    eq_label: Regex,
    broken: Regex,
}

impl<'p> CrossReferenceResolver<'p> {
    pub fn new(references: &'p [KnownReference]) -> Result<Self> {
        let section_patterns = vec![
            compile(
                r"<span[^>]*>(?:Â)?§</span>\s*<span[^>]*>\?\?</span>",
                "spanned section placeholder",
            )?,
            compile(r"(?:Â)?§\s*\?\?", "section placeholder")?,
            compile(
                r#"<span[^>]*class="broken-ref"[^>]*>\[(?:ref|(?:Â)?§)\]</span>"#,
                "converted section placeholder",
            )?,
        ];
        let equation_patterns = vec![
            compile(
                &format!(r"(?i)(Eq\.|Equation){WS}*\({WS}*<span[^>]*>\?\?</span>{WS}*\)"),
                "spanned equation placeholder",
            )?,
            compile(
                &format!(r"(?i)(Eq\.|Equation){WS}*\({WS}*\?\?{WS}*\)"),
                "equation placeholder",
            )?,
            compile(
                &format!(r#"(?i)(Eq\.){WS}+<span[^>]*class="[^"]*cmbx[^"]*"[^>]*>\?\?</span>"#),
                "bold equation placeholder",
            )?,
            compile(
                &format!(r#"(?i)(Eq\.|Equation){WS}*<span[^>]*class="broken-ref"[^>]*>\(\?\?\)</span>"#),
                "converted equation placeholder",
            )?,
        ];
        let figure_patterns = vec![
            compile(
                &format!(r#"(?i)(Figure){WS}+<span[^>]*class="[^"]*cmbx[^"]*"[^>]*>\?\?</span>"#),
                "bold figure placeholder",
            )?,
            compile(&format!(r"(?i)(Figure){WS}+\?\?"), "figure placeholder")?,
        ];

        Ok(Self {
            references,
            section_patterns,
            bold_section: compile(
                &format!(r#"(?i)<span[^>]*class="[^"]*cmbx[^"]*"[^>]*>Section{WS}+\?\?</span>"#),
                "bold section placeholder",
            )?,
            bold_unknown: compile(
                r#"<span[^>]*class="[^"]*cmbx[^"]*"[^>]*>\?\?</span>"#,
                "bold placeholder",
            )?,
            equation_patterns,
            figure_patterns,
            enrichment_ref: compile(
                r##"<a href="#([^"]+)">(\d+\.\d+(?:\.[1-9]\d*)?)\.0\.0(?:\.0)*(<!--[^>]*-->)?</a>"##,
                "malformed enrichment reference",
            )?,
            eq_comment: compile(
                r">(\d+\.\d+)<!--\s*tex4ht:ref:\s*(eq:[^\s>]+)\s*-->",
                "equation number comment",
            )?,
            eq_label: compile(r"\\label\s*\{(eq:[^}]+)\}", "equation label")?,
            broken: compile(
                r#"<span class="broken-ref" title="([^"]+)">[^<]*</span>"#,
                "broken reference marker",
            )?,
        })
    }

    /// Builds the label map from the converter's numbered ref comments, then
    /// numbers the remaining `\label{eq:...}` occurrences sequentially after
    /// the closest preceding numbered label.
    pub fn equation_labels(&self, html: &str, math: &MathTable, chapter: u32) -> EquationLabels {
        let mut map = BTreeMap::new();
        for caps in self.eq_comment.captures_iter(html) {
            map.entry(caps[2].trim().to_string())
                .or_insert_with(|| caps[1].to_string());
        }

        let mut ordered: Vec<String> = Vec::new();
        let sources = math.originals().chain(std::iter::once(html));
        for source in sources {
            for caps in self.eq_label.captures_iter(source) {
                let label = caps[1].trim().to_string();
                if !ordered.contains(&label) {
                    ordered.push(label);
                }
            }
        }

        let mut next = 1u32;
        for label in ordered {
            match map.get(&label) {
                Some(number) => {
                    next = equation_ordinal(number).map_or(next + 1, |ordinal| ordinal + 1);
                }
                None => {
                    map.insert(label, format!("{chapter}.{next}"));
                    next += 1;
                }
            }
        }

        EquationLabels(map)
    }

    pub fn resolve(&self, html: &str, equations: &EquationLabels, diag: &mut ChapterDiagnostics) -> String {
        let mut out = html.to_string();

        for pattern in &self.section_patterns {
            out = self.replace_sections(pattern, &out, "", diag);
        }
        for pattern in &self.equation_patterns {
            out = self.replace_equations(pattern, &out, equations, diag);
        }
        for pattern in &self.figure_patterns {
            let marker = broken_ref(FIGURE_TITLE, "[fig]");
            out = pattern
                .replace_all(&out, format!("${{1}} {marker}").as_str())
                .into_owned();
        }
        out = self.replace_sections(&self.bold_section, &out, "Section ", diag);
        out = self.replace_sections(&self.bold_unknown, &out, "", diag);
        out = self.enrichment_ref
            .replace_all(&out, |caps: &Captures| {
                let comment = caps.get(3).map_or("", |m| m.as_str());
                format!("<a href=\"#{}\">Enrichment {}{comment}</a>", &caps[1], &caps[2])
            })
            .into_owned();

        out
    }

    /// Adds one issue per placeholder left in `html`. Run on the final markup
    /// so repeated runs report the same set.
    pub fn report_unresolved(&self, html: &str, diag: &mut ChapterDiagnostics) {
        for caps in self.broken.captures_iter(html) {
            let kind = match &caps[1] {
                SECTION_TITLE => IssueKind::UnresolvedCrossReference,
                EQUATION_TITLE => IssueKind::UnresolvedEquationReference,
                FIGURE_TITLE => IssueKind::UnresolvedFigureReference,
                _ => continue,
            };
            let start = caps.get(0).map_or(0, |m| m.start());
            let context = visible_before(html, start, 60);
            diag.report(kind, format!("unresolved reference after '{}'", context.trim()));
        }
    }

    fn replace_sections(
        &self,
        pattern: &Regex,
        html: &str,
        lead: &str,
        diag: &mut ChapterDiagnostics,
    ) -> String {
        pattern
            .replace_all(html, |caps: &Captures| {
                let found = caps.get(0).map_or(0..0, |m| m.range());
                let context = context_window(html, found.start, found.end, SECTION_CONTEXT);
                let hit = self
                    .references
                    .iter()
                    .find(|reference| context.contains(&reference.needle.to_lowercase()));
                match hit {
                    Some(reference) => {
                        diag.stats.cross_refs_resolved += 1;
                        format!(
                            "{lead}<a class=\"cross-ref\" href=\"{}\">{}</a>",
                            escape_attr(&reference.href),
                            escape_text(&reference.label)
                        )
                    }
                    None => format!("{lead}{}", broken_ref(SECTION_TITLE, "[ref]")),
                }
            })
            .into_owned()
    }

    fn replace_equations(
        &self,
        pattern: &Regex,
        html: &str,
        equations: &EquationLabels,
        diag: &mut ChapterDiagnostics,
    ) -> String {
        pattern
            .replace_all(html, |caps: &Captures| {
                let prefix = &caps[1];
                let found = caps.get(0).map_or(0..0, |m| m.range());
                let context = context_window(html, found.start, found.end, EQUATION_CONTEXT);
                let hit = equations.0.iter().find(|(label, _)| {
                    let short = label_short_name(label).to_lowercase();
                    !short.is_empty()
                        && (context.contains(&short) || context.contains(&short.replace('_', " ")))
                });
                match hit {
                    Some((_, number)) => {
                        diag.stats.cross_refs_resolved += 1;
                        format!("{prefix} ({number})")
                    }
                    None => format!("{prefix} {}", broken_ref(EQUATION_TITLE, "(??)")),
                }
            })
            .into_owned()
    }
}

fn broken_ref(title: &str, text: &str) -> String {
    format!("<span class=\"broken-ref\" title=\"{title}\">{text}</span>")
}

/// `eq:chapter20_importance_identity` -> `importance_identity`.
fn label_short_name(label: &str) -> &str {
    let label = label.strip_prefix("eq:").unwrap_or(label);
    match label.split_once('_') {
        Some((head, tail)) if head.starts_with("chapter") => tail,
        _ => label,
    }
}

fn equation_ordinal(number: &str) -> Option<u32> {
    number.rsplit('.').next()?.parse().ok()
}

/// Lowercased visible text around `start..end`, the match itself excluded.
/// Markup is dropped so links inserted by earlier runs do not change what a
/// later run sees.
fn context_window(html: &str, start: usize, end: usize, (before, after): (usize, usize)) -> String {
    let mut context = visible_before(html, start, before);
    context.push(' ');
    context.push_str(&visible_after(html, end, after));
    context.to_lowercase()
}

fn visible_before(html: &str, start: usize, chars: usize) -> String {
    let from = floor_char_boundary(html, start.saturating_sub(chars * 8));
    let mut raw = &html[from..start];
    if let Some(close) = raw.find('>') {
        if raw.find('<').is_none_or(|open| close < open) {
            raw = &raw[close + 1..];
        }
    }
    let text = strip_tags(raw);
    let skip = text.chars().count().saturating_sub(chars);
    text.chars().skip(skip).collect()
}

fn visible_after(html: &str, end: usize, chars: usize) -> String {
    let to = floor_char_boundary(html, end + chars * 8);
    strip_tags(&html[end..to]).chars().take(chars).collect()
}
