use std::collections::{HashMap, HashSet};

use anyhow::Result;
use regex::{Captures, Regex};

use crate::transform::outline::HeadingScanner;
use crate::util::{compile, escape_attr, visible_text};

/// Assigns readable, unique anchor ids to heading-like elements and retargets
/// local links that pointed at the ids they replaced.
pub struct HeadingIdentifier {
    max_len: usize,
    leading_number: Regex,
    enrichment_number: Regex,
    math_token: Regex,
    inline_dollar: Regex,
    latex_with_arg: Regex,
    latex_command: Regex,
    non_alnum: Regex,
    id_attr: Regex,
    local_href: Regex,
    promote_nested: Regex,
    promote_flat: Regex,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct IdAssignment {
    pub html: String,
    pub headings: usize,
    pub ids_changed: usize,
    pub links_retargeted: usize,
}

impl HeadingIdentifier {
    pub fn new(max_len: usize) -> Result<Self> {
        Ok(Self {
            max_len,
            leading_number: compile(r"^\d+(?:\.\d+)*\s*", "leading section number")?,
            enrichment_number: compile(r"^(?i:enrichment)\s+[\d.]+", "enrichment number")?,
            math_token: compile(r"(?i)MATH_TOKEN_\d+__|math-token-\d+", "slug math token")?,
            inline_dollar: compile(r"\$[^$]*\$", "inline dollar math")?,
            latex_with_arg: compile(r"\\[a-zA-Z]+\{[^}]*\}", "latex command with argument")?,
            latex_command: compile(r"\\[a-zA-Z]+", "latex command")?,
            non_alnum: compile(r"[^a-zA-Z0-9]+", "slug separator")?,
            id_attr: compile(r#"(^|\s)id\s*=\s*("[^"]*"|'[^']*')"#, "id attribute")?,
            local_href: compile(r##"href="#([^"]+)""##, "local href")?,
            promote_nested: compile(
                r#"(?is)<p\b[^>]*>\s*<span\b[^>]*>\s*<span\b[^>]*class="[^"]*cmbx[^"]*"[^>]*>\s*(Enrichment(?:\s+[\d.]+)?\s*:[^<]*)</span>\s*</span>\s*</p>"#,
                "nested enrichment paragraph",
            )?,
            promote_flat: compile(
                r#"(?is)<p\b[^>]*>\s*<span\b[^>]*class="[^"]*cmbx[^"]*"[^>]*>\s*(Enrichment(?:\s+[\d.]+)?\s*:[^<]*)</span>\s*</p>"#,
                "enrichment paragraph",
            )?,
        })
    }

    /// Bold "Enrichment:" paragraphs become section-level enrichment headings.
    pub fn promote_enrichment_titles(&self, html: &str) -> (String, usize) {
        let mut promoted = 0;
        let mut current = html.to_string();
        for pattern in [&self.promote_nested, &self.promote_flat] {
            current = pattern
                .replace_all(&current, |caps: &Captures| {
                    promoted += 1;
                    format!(
                        "<h3 class=\"enrichment-title\">{}</h3>",
                        caps[1].trim()
                    )
                })
                .into_owned();
        }
        (current, promoted)
    }

    pub fn slug(&self, heading_html: &str) -> String {
        let text = visible_text(heading_html);
        let text = self.leading_number.replace(&text, "");
        let text = self.enrichment_number.replace(&text, "enrichment");
        let text = self.math_token.replace_all(&text, " ");
        let text = self.inline_dollar.replace_all(&text, " ");
        let text = self.latex_with_arg.replace_all(&text, " ");
        let text = self.latex_command.replace_all(&text, " ");

        let slug = self
            .non_alnum
            .replace_all(&text, "-")
            .trim_matches('-')
            .to_ascii_lowercase();

        let slug = if slug.len() > self.max_len {
            let cut = &slug[..self.max_len];
            match cut.rfind('-') {
                Some(pos) if pos > 0 => cut[..pos].to_string(),
                _ => cut.to_string(),
            }
        } else {
            slug
        };

        let slug = slug.trim_matches('-');
        if slug.is_empty() {
            "section".to_string()
        } else {
            slug.to_string()
        }
    }

    pub fn assign(
        &self,
        html: &str,
        scanner: &HeadingScanner,
        used: &mut HashSet<String>,
    ) -> IdAssignment {
        let mut retarget: HashMap<String, String> = HashMap::new();
        let mut result = IdAssignment::default();
        let mut out = String::with_capacity(html.len() + 256);
        let mut cursor = 0;

        for heading in scanner.scan(html) {
            let id = unique_id(&self.slug(&heading.inner), used);
            used.insert(id.clone());
            result.headings += 1;

            let old = heading.id().map(str::to_string);
            let attrs = match &old {
                Some(old_id) => {
                    if *old_id != id {
                        result.ids_changed += 1;
                        retarget.entry(old_id.clone()).or_insert_with(|| id.clone());
                    }
                    let replacement = format!("${{1}}id=\"{}\"", escape_attr(&id));
                    self.id_attr
                        .replacen(&heading.attrs, 1, replacement.as_str())
                        .into_owned()
                }
                None => format!("{} id=\"{}\"", heading.attrs.trim_end(), escape_attr(&id)),
            };

            out.push_str(&html[cursor..heading.start]);
            out.push('<');
            out.push_str(&heading.tag);
            out.push_str(&attrs);
            out.push('>');
            cursor = heading.open_end;
        }
        out.push_str(&html[cursor..]);

        if retarget.is_empty() {
            result.html = out;
            return result;
        }

        let mut links = 0;
        let html = self
            .local_href
            .replace_all(&out, |caps: &Captures| match retarget.get(&caps[1]) {
                Some(new_id) => {
                    links += 1;
                    format!("href=\"#{}\"", escape_attr(new_id))
                }
                None => caps[0].to_string(),
            })
            .into_owned();
        result.links_retargeted = links;
        result.html = html;
        result
    }

    /// Ids of heading-like elements, for seeding the used-id set from pages
    /// that are not re-processed in this run.
    pub fn existing_ids(&self, html: &str, scanner: &HeadingScanner) -> Vec<String> {
        scanner
            .scan(html)
            .iter()
            .filter_map(|heading| heading.id().map(str::to_string))
            .collect()
    }
}

fn unique_id(base: &str, used: &HashSet<String>) -> String {
    if !used.contains(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{base}-{n}"))
        .find(|candidate| !used.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identifier() -> (HeadingIdentifier, HeadingScanner) {
        (
            HeadingIdentifier::new(60).expect("identifier"),
            HeadingScanner::new().expect("scanner"),
        )
    }

    #[test]
    fn slug_strips_numbers_math_and_latex() {
        let (identifier, _) = identifier();
        assert_eq!(
            identifier.slug("<span class=\"titlemark\">3.2</span> Loss MATH_TOKEN_4__ and \\textbf{x} Functions"),
            "loss-and-functions"
        );
        assert_eq!(identifier.slug("Enrichment 7.4: Vanishing Gradients"), "enrichment-vanishing-gradients");
        assert_eq!(identifier.slug("Enrichment: Vanishing Gradients"), "enrichment-vanishing-gradients");
        assert_eq!(identifier.slug("MATH_TOKEN_0__"), "section");
    }

    #[test]
    fn slug_truncates_at_word_boundary() {
        let identifier = HeadingIdentifier::new(20).expect("identifier");
        assert_eq!(
            identifier.slug("Convolutional networks for visual recognition"),
            "convolutional"
        );
    }

    #[test]
    fn duplicate_slugs_get_numeric_suffixes() {
        let (identifier, scanner) = identifier();
        let mut used = HashSet::new();
        let html = "<h3>Summary</h3><h3>Summary</h3><h4>$x$</h4><h4>\\alpha</h4>";

        let result = identifier.assign(html, &scanner, &mut used);
        assert_eq!(
            result.html,
            "<h3 id=\"summary\">Summary</h3><h3 id=\"summary-2\">Summary</h3><h4 id=\"section\">$x$</h4><h4 id=\"section-2\">\\alpha</h4>"
        );
        assert_eq!(result.headings, 4);
    }

    #[test]
    fn replaced_ids_retarget_local_links() {
        let (identifier, scanner) = identifier();
        let mut used = HashSet::new();
        let html = concat!(
            "<p><a href=\"#x1-20001\">see</a> and <a href=\"#other\">other</a></p>",
            "<h3 class=\"sectionHead\" id=\"x1-20001\"><span class=\"titlemark\">2</span> Training Loop</h3>",
        );

        let result = identifier.assign(html, &scanner, &mut used);
        assert!(result.html.contains("<a href=\"#training-loop\">see</a>"));
        assert!(result.html.contains("<a href=\"#other\">other</a>"));
        assert!(result.html.contains("<h3 class=\"sectionHead\" id=\"training-loop\">"));
        assert_eq!(result.ids_changed, 1);
        assert_eq!(result.links_retargeted, 1);

        let mut used_again = HashSet::new();
        let again = identifier.assign(&result.html, &scanner, &mut used_again);
        assert_eq!(again.html, result.html);
        assert_eq!(again.ids_changed, 0);
    }

    #[test]
    fn ids_stay_unique_across_chapters_sharing_a_used_set() {
        let (identifier, scanner) = identifier();
        let mut used = HashSet::new();
        let first = identifier.assign("<h3>Introduction</h3>", &scanner, &mut used);
        let second = identifier.assign("<h3>Introduction</h3>", &scanner, &mut used);
        assert!(first.html.contains("id=\"introduction\""));
        assert!(second.html.contains("id=\"introduction-2\""));
    }

    #[test]
    fn enrichment_paragraphs_are_promoted() {
        let (identifier, _) = identifier();
        let html = "<p class=\"noindent\"><span class=\"cmbx-12\">Enrichment: Weight Decay</span></p>";
        let (out, count) = identifier.promote_enrichment_titles(html);
        assert_eq!(out, "<h3 class=\"enrichment-title\">Enrichment: Weight Decay</h3>");
        assert_eq!(count, 1);
    }
}
