use std::fs;
use std::path::{Path, PathBuf};

use super::*;
use crate::cli::{BuildArgs, DEFAULT_CHAPTER_PATTERN, HtmlBackendArg, IdScope};
use crate::model::BuildRunReport;
use crate::transform::safety::SafetyValidator;

const BBL: &str = r"\refsection{0}
  \entry{0@smith2020}{article}{}
    \field{title}{Deep Things}
    \field{year}{2020}
  \endentry
  \entry{0@lecun1998}{article}{}
    \field{title}{Gradient-Based Learning}
    \field{year}{1998}
  \endentry
\endrefsection
";

fn chapter_page(number: u32, title: &str) -> String {
    format!(
        concat!(
            "<html><head><title>{title}</title></head><body>\n",
            "<h2 class=\"chapterHead\"><span class=\"titlemark\">Chapter {n}</span><br><a id=\"x1-1000\"></a>{title}</h2>\n",
            "<h3 class=\"sectionHead\" id=\"x1-2000\"><span class=\"titlemark\">{n}.1</span> <a id=\"x1-2001\"></a>Overview</h3>\n",
            "<p>Gradient descent on \\(f(x) = x^2\\) converges, see <a href=\"#x1-2000\">above</a> and <a href=\"#0_lecun1998\">9</a>.</p>\n",
            "<p>Each update moves the parameters against the gradient by a fixed step.</p>\n",
            "</body></html>\n",
        ),
        n = number,
        title = title,
    )
}

fn book(dir: &Path) {
    fs::write(dir.join("Chapter_1_Intro.html"), chapter_page(1, "Intro Topics")).expect("chapter 1");
    fs::write(dir.join("Chapter_2_Optimization.html"), chapter_page(2, "Optimization")).expect("chapter 2");
    fs::write(dir.join("main_html.bbl"), BBL).expect("bbl");
}

fn args(dir: &Path, report_dir: &str) -> BuildArgs {
    BuildArgs {
        work_dir: dir.to_path_buf(),
        chapter_pattern: DEFAULT_CHAPTER_PATTERN.to_string(),
        chapters: Vec::new(),
        html_backend: HtmlBackendArg::Regex,
        id_scope: IdScope::Corpus,
        policy_path: None,
        bbl_path: None,
        bib_path: None,
        bibliography_page: "bibliography.html".to_string(),
        min_content_chars: 50,
        report_dir: Some(dir.join(report_dir)),
        dry_run: false,
        strict: false,
    }
}

fn read(dir: &Path, name: &str) -> String {
    fs::read_to_string(dir.join(name)).expect("read page")
}

fn only_report(report_dir: PathBuf) -> BuildRunReport {
    let mut paths: Vec<PathBuf> = fs::read_dir(report_dir)
        .expect("report dir")
        .map(|entry| entry.expect("entry").path())
        .collect();
    assert_eq!(paths.len(), 1);
    let raw = fs::read(paths.remove(0)).expect("report");
    serde_json::from_slice(&raw).expect("report json")
}

#[test]
fn full_build_renumbers_links_and_assembles_pages() {
    let temp = tempfile::tempdir().expect("tempdir");
    book(temp.path());

    run(args(temp.path(), "reports")).expect("build");

    let first = read(temp.path(), "Chapter_1_Intro.html");
    let second = read(temp.path(), "Chapter_2_Optimization.html");
    assert!(first.contains("<h3 class=\"sectionHead\" id=\"overview\">"));
    assert!(second.contains("<h3 class=\"sectionHead\" id=\"overview-2\">"));
    assert!(first.contains("<a href=\"bibliography.html#bib-lecun1998\">2</a>"));
    assert!(first.contains("\\(f(x) = x^2\\)"));
    assert!(first.contains("<a class=\"nav-btn next\" href=\"Chapter_2_Optimization.html\">Next</a>"));

    let bibliography = read(temp.path(), "bibliography.html");
    assert!(bibliography.contains("id=\"bib-smith2020\""));

    let report = only_report(temp.path().join("reports"));
    assert_eq!(report.status, "completed");
    assert_eq!(report.html_backend, "regex");
    assert_eq!(report.counts.chapters_written, 2);
    assert_eq!(report.bibliography.index_entries, 2);
}

#[test]
fn second_build_leaves_every_page_unchanged() {
    let temp = tempfile::tempdir().expect("tempdir");
    book(temp.path());

    run(args(temp.path(), "first")).expect("first build");
    let before = (
        read(temp.path(), "Chapter_1_Intro.html"),
        read(temp.path(), "Chapter_2_Optimization.html"),
        read(temp.path(), "bibliography.html"),
    );

    run(args(temp.path(), "second")).expect("second build");
    let after = (
        read(temp.path(), "Chapter_1_Intro.html"),
        read(temp.path(), "Chapter_2_Optimization.html"),
        read(temp.path(), "bibliography.html"),
    );
    assert_eq!(after, before);

    let report = only_report(temp.path().join("second"));
    assert_eq!(report.counts.chapters_unchanged, 2);
    assert_eq!(report.counts.chapters_written, 0);
    assert_eq!(report.bibliography.page_status, Some(ChapterStatus::Unchanged));
}

#[test]
fn single_chapter_build_reserves_ids_of_earlier_chapters() {
    let temp = tempfile::tempdir().expect("tempdir");
    book(temp.path());
    run(args(temp.path(), "full")).expect("full build");
    let full = read(temp.path(), "Chapter_2_Optimization.html");

    let mut partial = args(temp.path(), "partial");
    partial.chapters = vec![2];
    run(partial).expect("partial build");

    assert_eq!(read(temp.path(), "Chapter_2_Optimization.html"), full);
    let report = only_report(temp.path().join("partial"));
    assert_eq!(report.counts.chapters_processed, 1);
    assert!(report.counts.ids_reserved > 0);
    assert_eq!(report.chapters[0].status, ChapterStatus::Unchanged);
}

#[test]
fn rejected_page_keeps_previous_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    book(temp.path());
    let original = read(temp.path(), "Chapter_1_Intro.html");

    let mut strict = args(temp.path(), "reports");
    strict.min_content_chars = 100_000;
    strict.strict = true;
    let err = run(strict).expect_err("strict build fails on rejection");
    assert!(err.to_string().contains("rejected"));

    assert_eq!(read(temp.path(), "Chapter_1_Intro.html"), original);
    let report = only_report(temp.path().join("reports"));
    assert_eq!(report.counts.chapters_rejected, 2);
    assert_eq!(report.status, "completed_with_rejections");
    assert!(
        report.chapters[0]
            .issues
            .iter()
            .any(|issue| issue.kind == crate::model::IssueKind::SafetyViolation)
    );
}

#[test]
fn dry_run_writes_only_the_report() {
    let temp = tempfile::tempdir().expect("tempdir");
    book(temp.path());
    let original = read(temp.path(), "Chapter_2_Optimization.html");

    let mut dry = args(temp.path(), "reports");
    dry.dry_run = true;
    run(dry).expect("dry run");

    assert_eq!(read(temp.path(), "Chapter_2_Optimization.html"), original);
    assert!(!temp.path().join("bibliography.html").exists());
    let report = only_report(temp.path().join("reports"));
    assert_eq!(report.chapters[1].status, ChapterStatus::DryRun);
    assert_eq!(report.bibliography.index_entries, 2);
}

#[test]
fn unknown_chapter_selection_is_an_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    book(temp.path());
    let mut selected = args(temp.path(), "reports");
    selected.chapters = vec![9];
    assert!(run(selected).is_err());
}

#[test]
fn commit_page_skips_identical_bytes() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("page.html");
    let validator = SafetyValidator::new(10).expect("validator");
    let page = format!(
        "<aside class=\"sidebar\"></aside><header class=\"top-bar\"></header><div id=\"doc_content\">{}\n<h1>Title</h1><p>Body text long enough.</p>\n{}</div>",
        crate::transform::safety::CONTENT_START,
        crate::transform::safety::CONTENT_END
    );

    let first = commit_page(&path, &page, &validator, false).expect("first");
    let second = commit_page(&path, &page, &validator, false).expect("second");
    assert_eq!(first.status, ChapterStatus::Written);
    assert_eq!(second.status, ChapterStatus::Unchanged);
    assert_eq!(first.sha256, second.sha256);
}
