use std::collections::HashSet;

use tracing::debug;

use crate::cli::IdScope;
use crate::html_tree::HtmlTree;
use crate::model::{Issue, IssueKind, TransformStats};
use crate::transform::citations::BibIndex;

/// Counters and resolution misses collected while one chapter is transformed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChapterDiagnostics {
    pub chapter: u32,
    pub stats: TransformStats,
    pub issues: Vec<Issue>,
}

impl ChapterDiagnostics {
    pub fn new(chapter: u32) -> Self {
        Self {
            chapter,
            ..Self::default()
        }
    }

    pub fn report(&mut self, kind: IssueKind, detail: impl Into<String>) {
        let detail = detail.into();
        debug!(chapter = self.chapter, kind = kind.as_str(), detail = %detail, "transform issue");
        self.issues.push(Issue { kind, detail });
    }
}

/// State shared by every chapter of one run: the read-only bibliography
/// index, the selected tree backend and the set of heading ids already
/// handed out.
pub struct PipelineContext {
    pub bib_index: BibIndex,
    pub tree: Box<dyn HtmlTree>,
    pub id_scope: IdScope,
    used_ids: HashSet<String>,
}

impl PipelineContext {
    pub fn new(bib_index: BibIndex, tree: Box<dyn HtmlTree>, id_scope: IdScope) -> Self {
        Self {
            bib_index,
            tree,
            id_scope,
            used_ids: HashSet::new(),
        }
    }

    /// With per-chapter uniqueness every chapter starts from an empty set.
    pub fn begin_chapter(&mut self) {
        if self.id_scope == IdScope::Chapter {
            self.used_ids.clear();
        }
    }

    /// Marks ids as taken. Returns how many were new.
    pub fn reserve_ids<I>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        ids.into_iter()
            .filter(|id| self.used_ids.insert(id.clone()))
            .count()
    }

    pub fn used_ids_mut(&mut self) -> &mut HashSet<String> {
        &mut self.used_ids
    }

    pub fn reserved_count(&self) -> usize {
        self.used_ids.len()
    }
}
