use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::{StatusArgs, default_report_dir, state_dir};
use crate::model::{BuildRunReport, ChapterInventoryManifest, ChapterStatus};

pub fn run(args: StatusArgs) -> Result<()> {
    let report_dir = args
        .report_dir
        .clone()
        .unwrap_or_else(|| default_report_dir(&args.work_dir));
    let inventory_path = state_dir(&args.work_dir)
        .join("manifests")
        .join("chapter_inventory.json");

    info!(work_dir = %args.work_dir.display(), "status requested");

    if inventory_path.exists() {
        let raw = fs::read(&inventory_path)
            .with_context(|| format!("failed to read {}", inventory_path.display()))?;
        let inventory: ChapterInventoryManifest = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse {}", inventory_path.display()))?;

        info!(
            generated_at = %inventory.generated_at,
            chapter_count = inventory.chapter_count,
            "loaded inventory manifest"
        );
    } else {
        warn!(path = %inventory_path.display(), "inventory manifest missing");
    }

    let Some((path, report)) = latest_build_report(&report_dir)? else {
        warn!(report_dir = %report_dir.display(), "no build run report found");
        return Ok(());
    };

    info!(
        path = %path.display(),
        run_id = %report.run_id,
        status = %report.status,
        started_at = %report.started_at,
        completed_at = %report.completed_at,
        html_backend = %report.html_backend,
        id_scope = %report.id_scope,
        dry_run = report.dry_run,
        bibliography_entries = report.bibliography.index_entries,
        "loaded build run report"
    );

    let summary = StatusSummary::from_report(&report);
    for (status, count) in &summary.statuses {
        info!(status = *status, count = *count, "chapters by status");
    }
    for (kind, count) in &summary.issues {
        info!(kind = *kind, count = *count, "issues by kind");
    }
    for (number, violation) in &summary.rejected {
        warn!(chapter = *number, violation = %violation, "chapter rejected in last build");
    }
    for warning in &report.warnings {
        warn!(warning = %warning, "build warning");
    }

    Ok(())
}

/// Counts derived from one build run report.
#[derive(Debug, Default, PartialEq, Eq)]
struct StatusSummary {
    statuses: BTreeMap<&'static str, usize>,
    issues: BTreeMap<&'static str, usize>,
    rejected: Vec<(u32, String)>,
}

impl StatusSummary {
    fn from_report(report: &BuildRunReport) -> Self {
        let mut summary = Self::default();
        for chapter in &report.chapters {
            *summary.statuses.entry(chapter.status.as_str()).or_default() += 1;
            for issue in &chapter.issues {
                *summary.issues.entry(issue.kind.as_str()).or_default() += 1;
            }
            if chapter.status == ChapterStatus::Rejected {
                summary.rejected.push((
                    chapter.number,
                    chapter.violation.clone().unwrap_or_default(),
                ));
            }
        }
        summary
    }
}

/// Newest `build_run_*.json` in `report_dir`. Names carry a compact UTC
/// timestamp, so the lexicographic maximum is the latest run.
fn latest_build_report(report_dir: &Path) -> Result<Option<(PathBuf, BuildRunReport)>> {
    if !report_dir.is_dir() {
        return Ok(None);
    }

    let entries = fs::read_dir(report_dir)
        .with_context(|| format!("failed to read {}", report_dir.display()))?;
    let mut latest: Option<PathBuf> = None;
    for entry in entries {
        let path = entry
            .with_context(|| format!("failed to read entry in {}", report_dir.display()))?
            .path();
        let is_build_report = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("build_run_") && name.ends_with(".json"));
        if is_build_report && latest.as_ref().is_none_or(|current| path > *current) {
            latest = Some(path);
        }
    }

    let Some(path) = latest else {
        return Ok(None);
    };
    let raw = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
    let report: BuildRunReport = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some((path, report)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        BibliographySummary, BuildCounts, BuildPaths, ChapterReport, Issue, IssueKind,
        TransformStats,
    };
    use crate::util::write_json_pretty;

    fn chapter(number: u32, status: ChapterStatus, issues: Vec<Issue>) -> ChapterReport {
        ChapterReport {
            number,
            filename: format!("Chapter_{number}_X.html"),
            title: "X".to_string(),
            status,
            violation: (status == ChapterStatus::Rejected).then(|| "content markers are missing".to_string()),
            output_sha256: None,
            toc_entries: 0,
            stats: TransformStats::default(),
            issues,
        }
    }

    fn report(run_id: &str, chapters: Vec<ChapterReport>) -> BuildRunReport {
        BuildRunReport {
            manifest_version: 1,
            run_id: run_id.to_string(),
            status: "completed".to_string(),
            started_at: String::new(),
            completed_at: String::new(),
            html_backend: "regex".to_string(),
            id_scope: "corpus".to_string(),
            dry_run: false,
            selected_chapters: Vec::new(),
            paths: BuildPaths {
                work_dir: ".".to_string(),
                bibliography_page: "bibliography.html".to_string(),
                report_path: String::new(),
                policy_path: None,
            },
            bibliography: BibliographySummary::default(),
            counts: BuildCounts::default(),
            chapters,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn newest_build_report_wins() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_json_pretty(
            &temp.path().join("build_run_20240101T000000Z.json"),
            &report("old", Vec::new()),
        )
        .expect("old");
        write_json_pretty(
            &temp.path().join("build_run_20250101T000000Z.json"),
            &report("new", Vec::new()),
        )
        .expect("new");
        std::fs::write(temp.path().join("validate_run_20260101T000000Z.json"), "{}").expect("other");

        let (_, latest) = latest_build_report(temp.path())
            .expect("load")
            .expect("report present");
        assert_eq!(latest.run_id, "new");
    }

    #[test]
    fn missing_report_dir_is_not_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(latest_build_report(&temp.path().join("absent")).expect("load").is_none());
    }

    #[test]
    fn summary_counts_statuses_issues_and_rejections() {
        let unknown = Issue {
            kind: IssueKind::UnknownCitation,
            detail: "smith".to_string(),
        };
        let report = report(
            "r",
            vec![
                chapter(1, ChapterStatus::Written, vec![unknown.clone(), unknown]),
                chapter(2, ChapterStatus::Rejected, Vec::new()),
                chapter(3, ChapterStatus::Written, Vec::new()),
            ],
        );

        let summary = StatusSummary::from_report(&report);
        assert_eq!(summary.statuses.get("written"), Some(&2));
        assert_eq!(summary.statuses.get("rejected"), Some(&1));
        assert_eq!(summary.issues.get("unknown_citation"), Some(&2));
        assert_eq!(summary.rejected, vec![(2, "content markers are missing".to_string())]);
    }
}
