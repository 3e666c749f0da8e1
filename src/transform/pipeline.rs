use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::policy::TransformPolicy;
use crate::transform::citations::CitationResolver;
use crate::transform::code_blocks::CodeBlockFormatter;
use crate::transform::content::ContentExtractor;
use crate::transform::context::{ChapterDiagnostics, PipelineContext};
use crate::transform::cross_refs::CrossReferenceResolver;
use crate::transform::headings::HeadingIdentifier;
use crate::transform::math_guard::MathGuard;
use crate::transform::outline::{Heading, HeadingScanner, OutlineClassifier, SectionRenumberer};
use crate::transform::tables::TableReconstructor;
use crate::transform::text_rules::{RuleEnv, RuleSet};
use crate::transform::toc::{TableOfContents, TocExtractor};

/// Everything one chapter transform produces.
#[derive(Debug)]
pub struct ChapterTransform {
    pub body: String,
    pub toc: TableOfContents,
    pub headings: Vec<Heading>,
    pub diagnostics: ChapterDiagnostics,
}

/// Compiled stages, built once per run and applied to every chapter in a
/// fixed order.
pub struct ChapterPipeline<'p> {
    content: ContentExtractor,
    math: MathGuard,
    scanner: HeadingScanner,
    classifier: OutlineClassifier,
    identifier: HeadingIdentifier,
    renumberer: SectionRenumberer,
    tables: TableReconstructor<'p>,
    citations: CitationResolver,
    cross_refs: CrossReferenceResolver<'p>,
    code_blocks: CodeBlockFormatter,
    toc: TocExtractor,
    pre_protect: RuleSet,
    body: RuleSet,
    post_restore: RuleSet,
}

impl<'p> ChapterPipeline<'p> {
    pub fn new(policy: &'p TransformPolicy, bibliography_page: &str) -> Result<Self> {
        Ok(Self {
            content: ContentExtractor::new()?,
            math: MathGuard::new()?,
            scanner: HeadingScanner::new()?,
            classifier: OutlineClassifier::new()?,
            identifier: HeadingIdentifier::new(policy.slug_max_len)?,
            renumberer: SectionRenumberer::new()?,
            tables: TableReconstructor::new(policy)?,
            citations: CitationResolver::new(bibliography_page)?,
            cross_refs: CrossReferenceResolver::new(&policy.known_references)?,
            code_blocks: CodeBlockFormatter::new()?,
            toc: TocExtractor::new()?,
            pre_protect: RuleSet::pre_protect()?,
            body: RuleSet::body()?,
            post_restore: RuleSet::post_restore()?,
        })
    }

    pub fn content(&self) -> &ContentExtractor {
        &self.content
    }

    pub fn scanner(&self) -> &HeadingScanner {
        &self.scanner
    }

    pub fn identifier(&self) -> &HeadingIdentifier {
        &self.identifier
    }

    /// Runs every stage over one chapter fragment. Math is protected for the
    /// whole span between `protect` and `restore`.
    pub fn transform(
        &self,
        ctx: &mut PipelineContext,
        chapter: u32,
        fragment: &str,
    ) -> Result<ChapterTransform> {
        let env = RuleEnv { chapter };
        let mut diag = ChapterDiagnostics::new(chapter);

        let html = self.pre_protect.apply(fragment, &env);
        let (html, math) = self.math.protect(&html);
        diag.stats.math_tokens = math.len();

        let html = ctx
            .tree
            .strip_chrome(&html)
            .with_context(|| format!("failed to strip page chrome in chapter {chapter}"))?;
        let html = self.content.peel_wrappers(&html);
        let html = ctx
            .tree
            .remove_empty_blocks(&html)
            .with_context(|| format!("failed to remove empty blocks in chapter {chapter}"))?;

        let (html, promoted) = self.identifier.promote_enrichment_titles(&html);
        diag.stats.enrichments_promoted = promoted;

        let assignment = self
            .identifier
            .assign(&html, &self.scanner, ctx.used_ids_mut());
        diag.stats.headings = assignment.headings;
        diag.stats.ids_changed = assignment.ids_changed;
        diag.stats.links_retargeted = assignment.links_retargeted;
        let html = assignment.html;

        let equations = self.cross_refs.equation_labels(&html, &math, chapter);
        if !equations.is_empty() {
            debug!(chapter, labels = equations.len(), "equation labels collected");
        }
        let html = self.cross_refs.resolve(&html, &equations, &mut diag);

        let html = self.citations.rewrite_links(&html, &mut diag);
        let html = self.citations.renumber(&html, &ctx.bib_index, &mut diag);

        let html = ctx
            .tree
            .rewrite_tables(&html, &mut |table| self.tables.reconstruct(table, &mut diag))
            .with_context(|| format!("failed to rewrite tables in chapter {chapter}"))?;

        let (html, code_blocks) = self.code_blocks.format(&html);
        diag.stats.code_blocks = code_blocks;

        let html = self.body.apply(&html, &env);

        let (html, headings) = self
            .renumberer
            .renumber(&html, chapter, &self.scanner, &self.classifier);
        diag.stats.headings_numbered = headings.len();

        let html = self.math.restore(&html, &math);
        if self.math.contains_token(&html) {
            warn!(chapter, "math placeholders survived restore");
        }
        let html = self.post_restore.apply(&html, &env);

        self.cross_refs.report_unresolved(&html, &mut diag);
        let toc = self.toc.extract(&html, chapter, &self.scanner, &self.classifier);

        Ok(ChapterTransform {
            body: html.trim().to_string(),
            toc,
            headings,
            diagnostics: diag,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::cli::IdScope;
    use crate::html_tree::ScanTree;
    use crate::transform::citations::BibIndex;

    const FRAGMENT: &str = concat!(
        "<h2 class=\"chapterHead\"><span class=\"titlemark\">Chapter 7</span><br><a id=\"x1-1000\"></a>Convolutional Networks</h2>\n",
        "<h3 class=\"sectionHead\" id=\"x1-2000\"><span class=\"titlemark\">1.1</span> <a id=\"x1-2001\"></a>Filters</h3>\n",
        "<p>A filter \\(w \\in \\mathbb{R}^{3\\times 3}\\) slides over the input, see <a href=\"#x1-2000\">above</a> and <a href=\"#0_lecun1998\">4</a>.</p>\n",
        "<p class=\"noindent\"><span class=\"cmbx-10x-x-109\">Enrichment: Receptive Fields</span></p>\n",
        "<p>Stacking layers grows the receptive field.</p>\n",
        "<div class=\"tabular\"><table id=\"TBL-2\" class=\"tabular\"><tr><th style=\"x\">Layer</th><th>Size (px)</th></tr><tr><td>conv1</td><td>3</td></tr><tr><td>conv2</td><td>5</td></tr></table></div>\n",
        "<p>   </p>\n",
    );

    fn run(fragment: &str, used: &mut HashSet<String>) -> ChapterTransform {
        let policy = TransformPolicy::default();
        let pipeline = ChapterPipeline::new(&policy, "bibliography.html").expect("pipeline");
        let index = BibIndex::from_pairs([("lecun1998".to_string(), 31)]);
        let mut ctx = PipelineContext::new(index, Box::new(ScanTree::new().expect("tree")), IdScope::Corpus);
        ctx.reserve_ids(used.drain());
        let result = pipeline.transform(&mut ctx, 7, fragment).expect("transform");
        used.extend(ctx.used_ids_mut().drain());
        result
    }

    #[test]
    fn fragment_is_numbered_linked_and_wrapped() {
        let result = run(FRAGMENT, &mut HashSet::new());
        let body = &result.body;

        assert!(body.contains("<h3 class=\"sectionHead\" id=\"filters\"><span class=\"titlemark\">7.1&nbsp;&nbsp;</span>"));
        assert!(body.contains("<a href=\"#filters\">above</a>"));
        assert!(body.contains("<a href=\"bibliography.html#bib-lecun1998\">31</a>"));
        assert!(body.contains("\\(w \\in \\mathbb{R}^{3\\times 3}\\)"));
        assert!(body.contains("Enrichment 7.2: Receptive Fields"));
        assert!(body.contains("<div class=\"table-wrapper\">"));
        assert!(!body.contains("Chapter 7</span>"));
        assert!(!body.contains("<p>   </p>"));
        assert!(!body.contains("MATH_TOKEN_"));
        assert_eq!(result.toc.entries.len(), 2);
        assert!(result.diagnostics.issues.is_empty());
    }

    #[test]
    fn second_pass_is_byte_identical() {
        let once = run(FRAGMENT, &mut HashSet::new());
        let twice = run(&once.body, &mut HashSet::new());
        assert_eq!(once.body.trim(), once.body);
        assert_eq!(twice.body, once.body);
        assert_eq!(twice.toc, once.toc);
    }

    #[test]
    fn ids_taken_by_earlier_chapters_get_suffixes() {
        let mut used = HashSet::from(["filters".to_string()]);
        let result = run(FRAGMENT, &mut used);
        assert!(result.body.contains("id=\"filters-2\""));
        assert!(used.contains("filters-2"));
    }
}
