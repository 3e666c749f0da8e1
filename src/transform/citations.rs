use std::collections::{BTreeMap, HashSet};

use anyhow::Result;
use regex::{Captures, Regex};

use crate::model::IssueKind;
use crate::transform::context::ChapterDiagnostics;
use crate::util::compile;

const KEY_PREFIXES: [&str; 2] = ["X0-", "0_"];
/// Word prefixes stripped only when a separator follows, so keys such as
/// `bibby2019` survive and normalizing a canonical key is a no-op.
const WORD_PREFIXES: [&str; 2] = ["cite", "bib"];
const KEY_SEPARATORS: [char; 4] = ['.', '-', '_', ':'];

/// Canonical key -> global display number. Built once from the rendered
/// bibliography page and only read afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BibIndex {
    numbers: BTreeMap<String, u32>,
}

impl BibIndex {
    pub fn from_pairs<I: IntoIterator<Item = (String, u32)>>(pairs: I) -> Self {
        let mut numbers = BTreeMap::new();
        for (key, number) in pairs {
            numbers.entry(key).or_insert(number);
        }
        Self { numbers }
    }

    pub fn number(&self, key: &str) -> Option<u32> {
        self.numbers.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.numbers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty()
    }
}

/// Strips engine artifacts from a citation target: a leading `N@`, then the
/// first matching known prefix, then leftover separators.
pub fn normalize_key(raw: &str) -> String {
    let mut key = raw.trim().trim_start_matches('#');

    if let Some((head, tail)) = key.split_once('@') {
        if !head.is_empty() && head.bytes().all(|b| b.is_ascii_digit()) {
            key = tail;
        }
    }

    if let Some(rest) = KEY_PREFIXES.iter().find_map(|prefix| strip_prefix_ci(key, prefix)) {
        return rest.trim_start_matches(KEY_SEPARATORS).to_string();
    }
    for prefix in WORD_PREFIXES {
        let separated = strip_prefix_ci(key, prefix).filter(|rest| rest.starts_with(KEY_SEPARATORS));
        if let Some(rest) = separated {
            key = rest;
            break;
        }
    }

    key.trim_start_matches(KEY_SEPARATORS).to_string()
}

fn strip_prefix_ci<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    key.get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .map(|_| &key[prefix.len()..])
}

pub fn looks_like_citation(target: &str) -> bool {
    let lower = target.to_ascii_lowercase();
    lower.contains("cite")
        || lower.contains("bib")
        || lower.starts_with("0_")
        || lower.starts_with("x0-")
        || target.contains('@')
}

pub struct CitationResolver {
    page: String,
    local_link: Regex,
    element_id: Regex,
    numbered_link: Regex,
}

impl CitationResolver {
    pub fn new(bibliography_page: &str) -> Result<Self> {
        let numbered = format!(
            r#"href="{}#bib-([^"]+)"([^>]*)>\s*(\[?)\s*(\d+)\s*(\]?)\s*</a>"#,
            regex::escape(bibliography_page)
        );
        Ok(Self {
            page: bibliography_page.to_string(),
            local_link: compile(r##"href="#([^"]+)""##, "local citation link")?,
            element_id: compile(r#"\sid\s*=\s*"([^"]+)""#, "element id")?,
            numbered_link: compile(&numbered, "numbered citation link")?,
        })
    }

    /// Points citation-like local anchors at the bibliography page. Targets
    /// that exist as ids in this fragment are real local anchors and stay.
    pub fn rewrite_links(&self, html: &str, diag: &mut ChapterDiagnostics) -> String {
        let local_ids: HashSet<&str> = self
            .element_id
            .captures_iter(html)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect();

        let mut rewritten = 0;
        let out = self
            .local_link
            .replace_all(html, |caps: &Captures| {
                let target = &caps[1];
                if !looks_like_citation(target) || local_ids.contains(target) {
                    return caps[0].to_string();
                }
                let key = normalize_key(target);
                if key.is_empty() {
                    return caps[0].to_string();
                }
                rewritten += 1;
                format!("href=\"{}#bib-{key}\"", self.page)
            })
            .into_owned();

        diag.stats.citation_links += rewritten;
        out
    }

    /// Replaces the displayed number of every bibliography link whose key is
    /// known. Unknown keys keep their number and are reported once each.
    pub fn renumber(&self, html: &str, index: &BibIndex, diag: &mut ChapterDiagnostics) -> String {
        let mut unknown: Vec<String> = Vec::new();
        let mut renumbered = 0;

        let out = self
            .numbered_link
            .replace_all(html, |caps: &Captures| {
                let key = normalize_key(&caps[1]);
                match index.number(&key) {
                    Some(number) => {
                        renumbered += 1;
                        format!(
                            "href=\"{}#bib-{key}\"{}>{}{number}{}</a>",
                            self.page, &caps[2], &caps[3], &caps[5]
                        )
                    }
                    None => {
                        if !unknown.contains(&key) {
                            unknown.push(key);
                        }
                        caps[0].to_string()
                    }
                }
            })
            .into_owned();

        diag.stats.citations_renumbered += renumbered;
        for key in unknown {
            diag.report(
                IssueKind::UnknownCitation,
                format!("citation key '{key}' is not in the bibliography index"),
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_key_strips_engine_prefixes() {
        assert_eq!(normalize_key("#0_smith2020"), "smith2020");
        assert_eq!(normalize_key("cite.he2016deep"), "he2016deep");
        assert_eq!(normalize_key("3@bib.vaswani2017"), "vaswani2017");
        assert_eq!(normalize_key("X0-lecun1998"), "lecun1998");
        assert_eq!(normalize_key("CITE.Kingma"), "Kingma");
        assert_eq!(normalize_key("bib-goodfellow"), "goodfellow");
        assert_eq!(normalize_key("user@host"), "user@host");
    }

    #[test]
    fn normalizing_a_canonical_key_is_a_no_op() {
        for key in ["bibby2019", "citeseer2001", "smith2020"] {
            assert_eq!(normalize_key(key), key);
            assert_eq!(normalize_key(&normalize_key(&format!("X0-{key}"))), key);
        }
    }

    #[test]
    fn keys_starting_with_bib_are_renumbered() {
        let resolver = CitationResolver::new("bibliography.html").expect("resolver");
        let index = BibIndex::from_pairs([("bibby2019".to_string(), 9)]);
        let mut diag = ChapterDiagnostics::new(4);

        let linked = resolver.rewrite_links("<a href=\"#X0-bibby2019\">2</a>", &mut diag);
        let numbered = resolver.renumber(&linked, &index, &mut diag);

        assert_eq!(numbered, "<a href=\"bibliography.html#bib-bibby2019\">9</a>");
        assert!(diag.issues.is_empty());
    }

    #[test]
    fn citation_anchor_is_rewritten_and_renumbered() {
        let resolver = CitationResolver::new("bibliography.html").expect("resolver");
        let index = BibIndex::from_pairs([("smith2020".to_string(), 12)]);
        let mut diag = ChapterDiagnostics::new(3);

        let linked = resolver.rewrite_links("<a href=\"#0_smith2020\">3</a>", &mut diag);
        assert_eq!(linked, "<a href=\"bibliography.html#bib-smith2020\">3</a>");

        let numbered = resolver.renumber(&linked, &index, &mut diag);
        assert_eq!(numbered, "<a href=\"bibliography.html#bib-smith2020\">12</a>");
        assert_eq!(diag.stats.citations_renumbered, 1);
        assert!(diag.issues.is_empty());

        let again = resolver.renumber(
            &resolver.rewrite_links(&numbered, &mut diag),
            &index,
            &mut diag,
        );
        assert_eq!(again, numbered);
    }

    #[test]
    fn bracketed_numbers_keep_their_brackets() {
        let resolver = CitationResolver::new("bibliography.html").expect("resolver");
        let index = BibIndex::from_pairs([("he2016".to_string(), 4)]);
        let mut diag = ChapterDiagnostics::new(1);

        let out = resolver.renumber(
            "<a href=\"bibliography.html#bib-cite.he2016\" class=\"cite\"> [17] </a>",
            &index,
            &mut diag,
        );
        assert_eq!(out, "<a href=\"bibliography.html#bib-he2016\" class=\"cite\">[4]</a>");
    }

    #[test]
    fn unknown_keys_keep_their_number_and_are_reported() {
        let resolver = CitationResolver::new("bibliography.html").expect("resolver");
        let mut diag = ChapterDiagnostics::new(5);
        let html = "<a href=\"bibliography.html#bib-ghost\">7</a> <a href=\"bibliography.html#bib-ghost\">7</a>";

        let out = resolver.renumber(html, &BibIndex::default(), &mut diag);
        assert_eq!(out, html);
        assert_eq!(diag.issues.len(), 1);
        assert_eq!(diag.issues[0].kind, IssueKind::UnknownCitation);
    }

    #[test]
    fn local_heading_anchors_are_not_treated_as_citations() {
        let resolver = CitationResolver::new("bibliography.html").expect("resolver");
        let mut diag = ChapterDiagnostics::new(2);
        let html = "<h3 id=\"bibliographic-notes\">Notes</h3><a href=\"#bibliographic-notes\">notes</a>";

        assert_eq!(resolver.rewrite_links(html, &mut diag), html);
        assert_eq!(diag.stats.citation_links, 0);
    }
}
