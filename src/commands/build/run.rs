use anyhow::{Result, bail};
use chrono::Utc;
use tracing::{debug, info, warn};

use super::assemble::PageShell;
use super::bibliography::build_bibliography;
use super::chapter::ChapterRunner;
use crate::cli::{BuildArgs, IdScope, default_report_dir};
use crate::commands::inventory::ChapterDiscovery;
use crate::html_tree::select_backend;
use crate::model::{BuildCounts, BuildPaths, BuildRunReport, ChapterStatus};
use crate::policy::TransformPolicy;
use crate::transform::ChapterPipeline;
use crate::transform::context::PipelineContext;
use crate::transform::safety::SafetyValidator;
use crate::util::{now_utc_string, utc_compact_string, write_json_pretty};

pub fn run(args: BuildArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("build-{}", utc_compact_string(started_ts));
    let report_dir = args
        .report_dir
        .clone()
        .unwrap_or_else(|| default_report_dir(&args.work_dir));
    let report_path = report_dir.join(format!("build_run_{}.json", utc_compact_string(started_ts)));

    info!(work_dir = %args.work_dir.display(), run_id = %run_id, dry_run = args.dry_run, "starting build");

    let policy = TransformPolicy::load(args.policy_path.as_deref())?;
    let chapters = ChapterDiscovery::new(&args.chapter_pattern)?.discover(&args.work_dir)?;
    if chapters.is_empty() {
        bail!(
            "no chapter pages matching '{}' found in {}",
            args.chapter_pattern,
            args.work_dir.display()
        );
    }

    let unknown: Vec<u32> = args
        .chapters
        .iter()
        .copied()
        .filter(|number| !chapters.iter().any(|chapter| chapter.number == *number))
        .collect();
    if !unknown.is_empty() {
        bail!("requested chapters not found: {unknown:?}");
    }

    let shell = PageShell::new(&chapters, &args.bibliography_page);
    let validator = SafetyValidator::new(args.min_content_chars)?;

    info!(chapters = chapters.len(), "phase 1: bibliography");
    let (bibliography, bib_index) = build_bibliography(
        &args.work_dir,
        args.bbl_path.as_deref(),
        args.bib_path.as_deref(),
        &args.bibliography_page,
        &shell,
        &validator,
        args.dry_run,
    )?;

    info!("phase 2: chapters");
    let tree = select_backend(args.html_backend)?;
    let backend = tree.name();
    let pipeline = ChapterPipeline::new(&policy, &args.bibliography_page)?;
    let mut ctx = PipelineContext::new(bib_index, tree, args.id_scope);
    let runner = ChapterRunner {
        pipeline: &pipeline,
        shell: &shell,
        validator: &validator,
        dry_run: args.dry_run,
    };

    let mut counts = BuildCounts {
        chapters_discovered: chapters.len(),
        ..BuildCounts::default()
    };
    let mut reports = Vec::new();
    for chapter in &chapters {
        let selected = args.chapters.is_empty() || args.chapters.contains(&chapter.number);
        if !selected {
            let precedes_selection = args.chapters.iter().any(|number| *number > chapter.number);
            if args.id_scope == IdScope::Corpus && precedes_selection {
                counts.ids_reserved += runner.seed_ids(&mut ctx, chapter)?;
            }
            continue;
        }

        let report = runner.process(&mut ctx, chapter)?;
        match report.status {
            ChapterStatus::Written => counts.chapters_written += 1,
            ChapterStatus::Unchanged => counts.chapters_unchanged += 1,
            ChapterStatus::Rejected => counts.chapters_rejected += 1,
            ChapterStatus::DryRun => {}
        }
        counts.issues_total += report.issues.len();
        counts.chapters_processed += 1;
        reports.push(report);
    }
    debug!(ids = ctx.reserved_count(), "heading ids in use after build");

    let status = if counts.chapters_rejected > 0 {
        "completed_with_rejections"
    } else {
        "completed"
    };
    let mut warnings = Vec::new();
    if bibliography.index_entries == 0 {
        warnings.push("global bibliography index is empty; citation numbers were not rewritten".to_string());
    }
    if let Some(violation) = &bibliography.violation {
        warnings.push(format!("bibliography page rejected: {violation}"));
    }

    let report = BuildRunReport {
        manifest_version: 1,
        run_id: run_id.clone(),
        status: status.to_string(),
        started_at,
        completed_at: now_utc_string(),
        html_backend: backend.to_string(),
        id_scope: args.id_scope.as_str().to_string(),
        dry_run: args.dry_run,
        selected_chapters: args.chapters.clone(),
        paths: BuildPaths {
            work_dir: args.work_dir.display().to_string(),
            bibliography_page: args.bibliography_page.clone(),
            report_path: report_path.display().to_string(),
            policy_path: args.policy_path.as_ref().map(|path| path.display().to_string()),
        },
        bibliography,
        counts,
        chapters: reports,
        warnings,
    };
    write_json_pretty(&report_path, &report)?;
    info!(path = %report_path.display(), "wrote build run report");

    info!(
        run_id = %run_id,
        processed = report.counts.chapters_processed,
        written = report.counts.chapters_written,
        unchanged = report.counts.chapters_unchanged,
        rejected = report.counts.chapters_rejected,
        issues = report.counts.issues_total,
        "build completed"
    );

    if report.counts.chapters_rejected > 0 {
        warn!(rejected = report.counts.chapters_rejected, "some chapters kept their previous output");
        if args.strict {
            bail!(
                "{} chapter(s) rejected by the safety gate (see {})",
                report.counts.chapters_rejected,
                report_path.display()
            );
        }
    }

    Ok(())
}
