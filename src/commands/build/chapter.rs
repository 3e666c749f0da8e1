use std::collections::BTreeMap;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use super::assemble::{PageShell, PageSpec};
use super::commit_page;
use crate::commands::inventory::DiscoveredChapter;
use crate::model::{ChapterReport, Issue, IssueKind};
use crate::transform::ChapterPipeline;
use crate::transform::context::PipelineContext;
use crate::transform::safety::SafetyValidator;
use crate::util::read_html_lossy;

/// Stages shared by every chapter of one build.
pub(super) struct ChapterRunner<'a, 'p> {
    pub pipeline: &'a ChapterPipeline<'p>,
    pub shell: &'a PageShell<'a>,
    pub validator: &'a SafetyValidator,
    pub dry_run: bool,
}

impl ChapterRunner<'_, '_> {
    /// Transform, assemble, gate and commit one chapter page. A safety
    /// rejection is recorded in the report and leaves the file untouched.
    pub fn process(
        &self,
        ctx: &mut PipelineContext,
        chapter: &DiscoveredChapter,
    ) -> Result<ChapterReport> {
        let page = read_html_lossy(&chapter.path)?;
        let fragment = self.pipeline.content().extract(&page);

        ctx.begin_chapter();
        let result = self
            .pipeline
            .transform(ctx, chapter.number, &fragment)
            .with_context(|| format!("failed to transform {}", chapter.filename))?;
        for heading in &result.headings {
            debug!(
                chapter = chapter.number,
                number = %heading.number,
                level = ?heading.level,
                enrichment = heading.enrichment,
                id = heading.id.as_deref().unwrap_or(""),
                text = %heading.text,
                "numbered heading"
            );
        }

        let assembled = self.shell.render(&PageSpec {
            title: &chapter.title,
            body: &result.body,
            active: Some(chapter.number),
            local_toc: &result.toc.html,
        });
        let write = commit_page(&chapter.path, &assembled, self.validator, self.dry_run)?;

        let mut issues = result.diagnostics.issues;
        if let Some(violation) = &write.violation {
            issues.push(Issue {
                kind: IssueKind::SafetyViolation,
                detail: violation.clone(),
            });
        }
        log_issue_summary(chapter.number, &issues);

        info!(
            chapter = chapter.number,
            status = write.status.as_str(),
            headings = result.diagnostics.stats.headings_numbered,
            tables = result.diagnostics.stats.tables,
            toc_entries = result.toc.entries.len(),
            "chapter processed"
        );

        Ok(ChapterReport {
            number: chapter.number,
            filename: chapter.filename.clone(),
            title: chapter.title.clone(),
            status: write.status,
            violation: write.violation,
            output_sha256: write.sha256,
            toc_entries: result.toc.entries.len(),
            stats: result.diagnostics.stats,
            issues,
        })
    }

    /// Reserves the heading ids of a chapter that is not re-processed in
    /// this run, so later chapters see the same taken set as a full run.
    pub fn seed_ids(&self, ctx: &mut PipelineContext, chapter: &DiscoveredChapter) -> Result<usize> {
        let page = read_html_lossy(&chapter.path)?;
        let fragment = self.pipeline.content().extract(&page);
        let ids = self
            .pipeline
            .identifier()
            .existing_ids(&fragment, self.pipeline.scanner());
        Ok(ctx.reserve_ids(ids))
    }
}

fn log_issue_summary(chapter: u32, issues: &[Issue]) {
    if issues.is_empty() {
        return;
    }
    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    for issue in issues {
        *counts.entry(issue.kind.as_str()).or_default() += 1;
    }
    for (kind, count) in counts {
        warn!(chapter, kind, count, "unresolved items in chapter");
    }
}
