use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{info, warn};

use super::assemble::{PageShell, PageSpec};
use super::commit_page;
use crate::model::BibliographySummary;
use crate::transform::citations::BibIndex;
use crate::transform::safety::SafetyValidator;
use crate::util::{collapse_whitespace, compile, decode_entities, escape_attr, escape_text, read_html_lossy};

const MAX_BIB_ENTRIES: usize = 500;
const DEFAULT_BBL_NAME: &str = "main_html.bbl";
const DEFAULT_BIB_NAME: &str = "bibliography.bib";

/// One reference as rendered on the bibliography page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct BibEntry {
    pub key: String,
    pub authors: String,
    pub title: String,
    pub year: String,
    pub url: Option<String>,
}

/// Where phase 1 reads references from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum BibSource {
    Bbl(PathBuf),
    Bib(PathBuf),
}

impl BibSource {
    /// The compiled `.bbl` wins; the raw `.bib` is a fallback whose
    /// numbering may not match the typeset book.
    pub fn locate(work_dir: &Path, bbl: Option<&Path>, bib: Option<&Path>) -> Option<Self> {
        let bbl = bbl.map_or_else(|| work_dir.join(DEFAULT_BBL_NAME), Path::to_path_buf);
        if bbl.is_file() {
            return Some(Self::Bbl(bbl));
        }
        let bib = bib.map_or_else(|| work_dir.join(DEFAULT_BIB_NAME), Path::to_path_buf);
        bib.is_file().then_some(Self::Bib(bib))
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Bbl(path) | Self::Bib(path) => path,
        }
    }
}

pub(super) struct BibliographyBuilder {
    bbl_field: Regex,
    bbl_family: Regex,
    bbl_given: Regex,
    bbl_url: Regex,
    bbl_refsection: Regex,
    bib_entry: Regex,
    bib_field_name: Regex,
    page_entry: Regex,
}

impl BibliographyBuilder {
    pub fn new() -> Result<Self> {
        Ok(Self {
            bbl_field: compile(r"\\field\{(\w+)\}\{([^}]*)\}", "bbl field")?,
            bbl_family: compile(r"family=\{([^}]+)\}", "bbl family name")?,
            bbl_given: compile(r"given=\{([^}]+)\}", "bbl given name")?,
            bbl_url: compile(r"(?s)\\verb\{url\}\s*\\verb (.*?)\s*\\endverb", "bbl url")?,
            bbl_refsection: compile(r"^\d+@", "bbl refsection prefix")?,
            bib_entry: compile(r"(?s)@(\w+)\s*\{\s*([^,\s]+)\s*,([^@]*)", "bib entry")?,
            bib_field_name: compile(r"(?i)\b([a-z]+)\s*=\s*", "bib field name")?,
            page_entry: compile(
                r#"(?s)<div[^>]*class="bib-entry"[^>]*id="bib-([^"]+)"[^>]*>.*?<div[^>]*class="bib-label"[^>]*>\[(\d+)\]</div>"#,
                "bibliography page entry",
            )?,
        })
    }

    pub fn parse(&self, source: &BibSource) -> Result<Vec<BibEntry>> {
        let raw = fs::read(source.path())
            .with_context(|| format!("failed to read {}", source.path().display()))?;
        let text = String::from_utf8_lossy(&raw);
        Ok(match source {
            BibSource::Bbl(_) => self.parse_bbl(&text),
            BibSource::Bib(_) => self.parse_bib(&text),
        })
    }

    /// biblatex `\entry{key}{type}{}` blocks in typeset order.
    pub fn parse_bbl(&self, text: &str) -> Vec<BibEntry> {
        let mut entries = Vec::new();
        for block in text.split("\\entry{").skip(1) {
            let Some((key, body)) = block.split_once('}') else {
                continue;
            };
            let key = key.replace("#cite.", "").replace("#bib.", "");
            let key = self.bbl_refsection.replace(key.trim(), "").into_owned();
            if key.is_empty() {
                continue;
            }

            let fields: BTreeMap<&str, &str> = self
                .bbl_field
                .captures_iter(body)
                .filter_map(|caps| Some((caps.get(1)?.as_str(), caps.get(2)?.as_str())))
                .collect();

            let flat = body.replace('\n', " ");
            let families: Vec<&str> = self
                .bbl_family
                .captures_iter(&flat)
                .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
                .collect();
            let givens: Vec<&str> = self
                .bbl_given
                .captures_iter(&flat)
                .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
                .collect();
            let authors: Vec<String> = if families.len() == givens.len() {
                givens
                    .iter()
                    .zip(&families)
                    .map(|(given, family)| format!("{given} {family}"))
                    .collect()
            } else {
                families.iter().map(|family| family.to_string()).collect()
            };

            let url = self
                .bbl_url
                .captures(body)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().trim().to_string())
                .filter(|url| !url.is_empty());

            entries.push(BibEntry {
                key,
                authors: join_authors(&authors),
                title: fields.get("title").copied().unwrap_or("Untitled").to_string(),
                year: fields.get("year").copied().unwrap_or_default().to_string(),
                url,
            });
        }
        entries
    }

    /// `@type{key, field = {...}}` records, capped at the first 500.
    pub fn parse_bib(&self, text: &str) -> Vec<BibEntry> {
        let mut entries = Vec::new();
        for caps in self.bib_entry.captures_iter(text).take(MAX_BIB_ENTRIES) {
            let key = caps[2].trim().to_string();
            let fields = self.bib_fields(&caps[3]);
            let field = |name: &str| fields.get(name).cloned().unwrap_or_default();

            let url = Some(field("url"))
                .filter(|url| !url.is_empty())
                .or_else(|| Some(field("doi")).filter(|doi| !doi.is_empty()))
                .map(|url| {
                    if url.starts_with("10.") {
                        format!("https://doi.org/{url}")
                    } else {
                        url
                    }
                });

            let authors: Vec<String> = field("author")
                .split(" and ")
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect();

            entries.push(BibEntry {
                key,
                authors: join_authors(&authors),
                title: Some(field("title"))
                    .filter(|title| !title.is_empty())
                    .unwrap_or_else(|| "Untitled".to_string()),
                year: field("year"),
                url,
            });
        }
        entries
    }

    /// Field values with balanced braces or quotes, braces dropped.
    fn bib_fields(&self, body: &str) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        let mut search = 0;
        while let Some(caps) = self.bib_field_name.captures_at(body, search) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                break;
            };
            let (value, consumed) = read_bib_value(&body[whole.end()..]);
            search = (whole.end() + consumed.max(1)).min(body.len());
            fields
                .entry(name.as_str().to_ascii_lowercase())
                .or_insert_with(|| collapse_whitespace(&value.replace(['{', '}'], "")));
            if search >= body.len() {
                break;
            }
        }
        fields
    }

    pub fn render_entries(&self, entries: &[BibEntry]) -> String {
        let mut out = String::from("<h1 class=\"bib-heading\">Bibliography</h1>\n<div class=\"bib-list\">\n");
        for (index, entry) in entries.iter().enumerate() {
            out.push_str(&format!(
                "<div class=\"bib-entry\" id=\"bib-{}\">\n<div class=\"bib-label\">[{}]</div>\n<div class=\"bib-content\">",
                escape_attr(&entry.key),
                index + 1
            ));
            out.push_str(&format!(
                "<span class=\"bib-author\">{}</span> <span class=\"bib-title\">{}</span>",
                escape_text(&entry.authors),
                escape_text(&entry.title)
            ));
            if !entry.year.is_empty() {
                out.push_str(&format!(" <span class=\"bib-year\">{}</span>", escape_text(&entry.year)));
            }
            if let Some(url) = &entry.url {
                out.push_str(&format!(
                    " <a class=\"bib-ref-link\" href=\"{}\" target=\"_blank\">Paper</a>",
                    escape_attr(url)
                ));
            }
            out.push_str("</div>\n</div>\n");
        }
        out.push_str("</div>");
        out
    }

    /// Key to number map as shown on a rendered page. The first number
    /// displayed for a key wins.
    pub fn load_index(&self, page: &str) -> BibIndex {
        BibIndex::from_pairs(self.page_entry.captures_iter(page).filter_map(|caps| {
            let number = caps[2].parse::<u32>().ok()?;
            Some((decode_entities(&caps[1]), number))
        }))
    }
}

fn join_authors(authors: &[String]) -> String {
    if authors.is_empty() {
        "Unknown Author".to_string()
    } else {
        authors.join(", ")
    }
}

/// Reads one `.bib` value from the start of `rest`: `{...}` with nesting,
/// `"..."`, or a bare token up to the next comma. Returns the value and the
/// bytes consumed.
fn read_bib_value(rest: &str) -> (String, usize) {
    let mut chars = rest.char_indices();
    match chars.next() {
        Some((_, '{')) => {
            let mut depth = 1usize;
            for (pos, ch) in chars {
                match ch {
                    '{' => depth += 1,
                    '}' => {
                        depth -= 1;
                        if depth == 0 {
                            return (rest[1..pos].to_string(), pos + 1);
                        }
                    }
                    _ => {}
                }
            }
            (rest[1..].to_string(), rest.len())
        }
        Some((_, '"')) => match rest[1..].find('"') {
            Some(end) => (rest[1..end + 1].to_string(), end + 2),
            None => (rest[1..].to_string(), rest.len()),
        },
        Some(_) => {
            let end = rest.find([',', '\n', '}']).unwrap_or(rest.len());
            (rest[..end].trim().to_string(), end)
        }
        None => (String::new(), 0),
    }
}

/// Phase 1: render the bibliography page, gate it, write it, and load the
/// global index back from the page as it stands on disk afterwards.
pub(super) fn build_bibliography(
    work_dir: &Path,
    bbl_path: Option<&Path>,
    bib_path: Option<&Path>,
    page_name: &str,
    shell: &PageShell<'_>,
    validator: &SafetyValidator,
    dry_run: bool,
) -> Result<(BibliographySummary, BibIndex)> {
    let builder = BibliographyBuilder::new()?;
    let page_path = work_dir.join(page_name);
    let mut summary = BibliographySummary::default();

    let source = BibSource::locate(work_dir, bbl_path, bib_path);
    let entries = match &source {
        Some(source) => {
            if matches!(source, BibSource::Bib(_)) {
                warn!(path = %source.path().display(), "no .bbl found, falling back to .bib; numbering may differ from the typeset book");
            }
            summary.source = Some(source.path().display().to_string());
            builder.parse(source)?
        }
        None => {
            warn!(work_dir = %work_dir.display(), "no bibliography source found");
            Vec::new()
        }
    };
    summary.entries_parsed = entries.len();

    let mut rendered = None;
    if entries.is_empty() {
        if source.is_some() {
            warn!("bibliography source has no entries; keeping the existing page");
        }
    } else {
        let body = builder.render_entries(&entries);
        let page = shell.render(&PageSpec {
            title: "Bibliography",
            body: &body,
            active: None,
            local_toc: "",
        });
        let write = commit_page(&page_path, &page, validator, dry_run)?;
        info!(
            entries = entries.len(),
            status = write.status.as_str(),
            "bibliography page processed"
        );
        summary.page_status = Some(write.status);
        summary.violation = write.violation;
        if dry_run && summary.violation.is_none() {
            rendered = Some(page);
        }
    }

    let index_page = match rendered {
        Some(page) => Some(page),
        None if page_path.is_file() => Some(read_html_lossy(&page_path)?),
        None => None,
    };
    let index = match index_page {
        Some(page) => builder.load_index(&page),
        None => {
            warn!(path = %page_path.display(), "no bibliography page; citation numbers stay chapter-local");
            BibIndex::default()
        }
    };
    summary.index_entries = index.len();
    if index.is_empty() {
        warn!("global bibliography index is empty; citation numbers stay chapter-local");
    } else {
        info!(entries = index.len(), "loaded global bibliography index");
    }

    Ok((summary, index))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BBL: &str = r"\refsection{0}
  \entry{0@smith2020}{article}{}
    \name{author}{2}{}{%
      {{hash=1}{family={Smith},familyi={S\bibinitperiod},given={Jane},giveni={J\bibinitperiod}}}%
      {{hash=2}{family={Doe},familyi={D\bibinitperiod},given={John},giveni={J\bibinitperiod}}}%
    }
    \field{title}{Deep Things}
    \field{year}{2020}
    \verb{url}
    \verb https://example.org/deep
    \endverb
  \endentry
  \entry{#cite.lecun1998}{article}{}
    \field{title}{Gradient-Based Learning}
  \endentry
";

    fn builder() -> BibliographyBuilder {
        BibliographyBuilder::new().expect("builder")
    }

    #[test]
    fn bbl_entries_keep_order_and_strip_key_artifacts() {
        let entries = builder().parse_bbl(BBL);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, "smith2020");
        assert_eq!(entries[0].authors, "Jane Smith, John Doe");
        assert_eq!(entries[0].title, "Deep Things");
        assert_eq!(entries[0].year, "2020");
        assert_eq!(entries[0].url.as_deref(), Some("https://example.org/deep"));
        assert_eq!(entries[1].key, "lecun1998");
        assert_eq!(entries[1].authors, "Unknown Author");
    }

    #[test]
    fn bib_fallback_reads_nested_braces_and_doi() {
        let bib = r#"@article{he2016,
  title = {Deep Residual Learning for {Image} Recognition},
  author = {He, Kaiming and Zhang, Xiangyu},
  year = 2016,
  doi = "10.1109/CVPR.2016.90"
}
@inproceedings{vaswani2017, title={Attention Is All You Need}}"#;
        let entries = builder().parse_bib(bib);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title, "Deep Residual Learning for Image Recognition");
        assert_eq!(entries[0].authors, "He, Kaiming, Zhang, Xiangyu");
        assert_eq!(entries[0].year, "2016");
        assert_eq!(entries[0].url.as_deref(), Some("https://doi.org/10.1109/CVPR.2016.90"));
        assert_eq!(entries[1].key, "vaswani2017");
        assert_eq!(entries[1].year, "");
    }

    #[test]
    fn index_is_read_back_from_rendered_entries() {
        let builder = builder();
        let entries = builder.parse_bbl(BBL);
        let html = builder.render_entries(&entries);

        assert!(html.contains("<div class=\"bib-entry\" id=\"bib-smith2020\">\n<div class=\"bib-label\">[1]</div>"));
        let index = builder.load_index(&html);
        assert_eq!(index.len(), 2);
        assert_eq!(index.number("smith2020"), Some(1));
        assert_eq!(index.number("lecun1998"), Some(2));
    }
}
