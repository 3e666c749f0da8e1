use std::path::Path;

use anyhow::{Result, bail};
use chrono::Utc;
use tracing::{info, warn};

use crate::cli::{ValidateArgs, default_report_dir};
use crate::commands::inventory::ChapterDiscovery;
use crate::model::{PageValidation, ValidationReport};
use crate::transform::safety::SafetyValidator;
use crate::util::{now_utc_string, read_html_lossy, utc_compact_string, write_json_pretty};

pub fn run(args: ValidateArgs) -> Result<()> {
    let report_path = args.report_path.clone().unwrap_or_else(|| {
        default_report_dir(&args.work_dir)
            .join(format!("validate_run_{}.json", utc_compact_string(Utc::now())))
    });

    let report = validate_pages(
        &args.work_dir,
        &args.chapter_pattern,
        &args.bibliography_page,
        args.min_content_chars,
    )?;
    write_json_pretty(&report_path, &report)?;
    info!(path = %report_path.display(), "wrote validation report");
    info!(
        checked = report.pages_checked,
        failed = report.pages_failed,
        "validation completed"
    );

    if report.pages_failed > 0 {
        bail!(
            "{} of {} pages failed validation (see {})",
            report.pages_failed,
            report.pages_checked,
            report_path.display()
        );
    }
    Ok(())
}

/// Runs the safety checks over the pages currently on disk. A missing
/// bibliography page is skipped, not failed.
pub fn validate_pages(
    work_dir: &Path,
    chapter_pattern: &str,
    bibliography_page: &str,
    min_content_chars: usize,
) -> Result<ValidationReport> {
    let validator = SafetyValidator::new(min_content_chars)?;
    let chapters = ChapterDiscovery::new(chapter_pattern)?.discover(work_dir)?;
    if chapters.is_empty() {
        warn!(work_dir = %work_dir.display(), "no chapter pages to validate");
    }

    let mut targets: Vec<(String, std::path::PathBuf)> = chapters
        .into_iter()
        .map(|chapter| (chapter.filename, chapter.path))
        .collect();
    let bibliography = work_dir.join(bibliography_page);
    if bibliography.is_file() {
        targets.push((bibliography_page.to_string(), bibliography));
    } else {
        warn!(path = %bibliography.display(), "bibliography page missing; skipped");
    }

    let mut pages = Vec::with_capacity(targets.len());
    for (filename, path) in targets {
        let page = read_html_lossy(&path)?;
        let violation = validator.check(&page).err().map(|violation| violation.to_string());
        if let Some(violation) = &violation {
            warn!(page = %filename, violation = %violation, "page failed validation");
        }
        pages.push(PageValidation {
            filename,
            passed: violation.is_none(),
            violation,
        });
    }

    let pages_failed = pages.iter().filter(|page| !page.passed).count();
    Ok(ValidationReport {
        manifest_version: 1,
        generated_at: now_utc_string(),
        work_dir: work_dir.display().to_string(),
        min_content_chars,
        pages_checked: pages.len(),
        pages_failed,
        pages,
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::cli::DEFAULT_CHAPTER_PATTERN;
    use crate::transform::safety::{CONTENT_END, CONTENT_START};

    fn assembled(body: &str) -> String {
        format!(
            "<aside class=\"sidebar\"></aside><header class=\"top-bar\"></header>\
             <div class=\"card-body\" id=\"doc_content\">\n{CONTENT_START}\n{body}\n{CONTENT_END}\n</div>"
        )
    }

    #[test]
    fn raw_pages_fail_and_assembled_pages_pass() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(
            temp.path().join("Chapter_1_Intro.html"),
            assembled("<h2>Intro</h2><p>Enough words to pass a small minimum.</p>"),
        )
        .expect("chapter 1");
        fs::write(
            temp.path().join("Chapter_2_Raw.html"),
            "<html><body><h2>Raw</h2></body></html>",
        )
        .expect("chapter 2");

        let report = validate_pages(temp.path(), DEFAULT_CHAPTER_PATTERN, "bibliography.html", 20)
            .expect("validate");

        assert_eq!(report.pages_checked, 2);
        assert_eq!(report.pages_failed, 1);
        assert!(report.pages[0].passed);
        assert_eq!(report.pages[1].filename, "Chapter_2_Raw.html");
        assert_eq!(
            report.pages[1].violation.as_deref(),
            Some("expected exactly one content container, found 0")
        );
    }

    #[test]
    fn run_fails_when_any_page_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("Chapter_1_Intro.html"), assembled("<p>no heading</p>"))
            .expect("chapter");
        let report_path = temp.path().join("validate.json");

        let result = run(ValidateArgs {
            work_dir: temp.path().to_path_buf(),
            chapter_pattern: DEFAULT_CHAPTER_PATTERN.to_string(),
            bibliography_page: "bibliography.html".to_string(),
            min_content_chars: 1,
            report_path: Some(report_path.clone()),
        });

        assert!(result.is_err());
        assert!(report_path.exists());
    }
}
