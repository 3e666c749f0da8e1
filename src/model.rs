use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterEntry {
    pub number: u32,
    pub title: String,
    pub filename: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterInventoryManifest {
    pub manifest_version: u32,
    pub generated_at: String,
    pub source_directory: String,
    pub chapter_count: usize,
    pub chapters: Vec<ChapterEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    UnknownCitation,
    UnresolvedCrossReference,
    UnresolvedEquationReference,
    UnresolvedFigureReference,
    TableHeaderNotFound,
    NestedTableKept,
    SafetyViolation,
}

impl IssueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnknownCitation => "unknown_citation",
            Self::UnresolvedCrossReference => "unresolved_cross_reference",
            Self::UnresolvedEquationReference => "unresolved_equation_reference",
            Self::UnresolvedFigureReference => "unresolved_figure_reference",
            Self::TableHeaderNotFound => "table_header_not_found",
            Self::NestedTableKept => "nested_table_kept",
            Self::SafetyViolation => "safety_violation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterStatus {
    Written,
    Unchanged,
    Rejected,
    DryRun,
}

impl ChapterStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Written => "written",
            Self::Unchanged => "unchanged",
            Self::Rejected => "rejected",
            Self::DryRun => "dry_run",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformStats {
    pub math_tokens: usize,
    pub headings: usize,
    pub ids_changed: usize,
    pub links_retargeted: usize,
    pub enrichments_promoted: usize,
    pub headings_numbered: usize,
    pub tables: usize,
    pub tables_wrapped: usize,
    pub headers_promoted: usize,
    pub headers_synthesized: usize,
    pub colspans_repaired: usize,
    pub nested_flattened: usize,
    pub citation_links: usize,
    pub citations_renumbered: usize,
    pub cross_refs_resolved: usize,
    pub code_blocks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterReport {
    pub number: u32,
    pub filename: String,
    pub title: String,
    pub status: ChapterStatus,
    pub violation: Option<String>,
    pub output_sha256: Option<String>,
    pub toc_entries: usize,
    pub stats: TransformStats,
    pub issues: Vec<Issue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildPaths {
    pub work_dir: String,
    pub bibliography_page: String,
    pub report_path: String,
    pub policy_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BibliographySummary {
    pub source: Option<String>,
    pub entries_parsed: usize,
    pub page_status: Option<ChapterStatus>,
    pub violation: Option<String>,
    pub index_entries: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildCounts {
    pub chapters_discovered: usize,
    pub chapters_processed: usize,
    pub chapters_written: usize,
    pub chapters_unchanged: usize,
    pub chapters_rejected: usize,
    pub ids_reserved: usize,
    pub issues_total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRunReport {
    pub manifest_version: u32,
    pub run_id: String,
    pub status: String,
    pub started_at: String,
    pub completed_at: String,
    pub html_backend: String,
    pub id_scope: String,
    pub dry_run: bool,
    pub selected_chapters: Vec<u32>,
    pub paths: BuildPaths,
    pub bibliography: BibliographySummary,
    pub counts: BuildCounts,
    pub chapters: Vec<ChapterReport>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageValidation {
    pub filename: String,
    pub passed: bool,
    pub violation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub manifest_version: u32,
    pub generated_at: String,
    pub work_dir: String,
    pub min_content_chars: usize,
    pub pages_checked: usize,
    pub pages_failed: usize,
    pub pages: Vec<PageValidation>,
}
