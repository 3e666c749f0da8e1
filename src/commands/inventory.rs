use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use regex::Regex;
use tracing::{debug, info};

use crate::cli::{InventoryArgs, state_dir};
use crate::model::{ChapterEntry, ChapterInventoryManifest};
use crate::util::{
    compile, now_utc_string, read_html_lossy, sha256_file, visible_text, write_json_pretty,
};

/// A chapter page found in the working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredChapter {
    pub number: u32,
    pub title: String,
    pub filename: String,
    pub path: PathBuf,
}

pub fn run(args: InventoryArgs) -> Result<()> {
    let manifest = build_manifest(&args.work_dir, &args.chapter_pattern)?;

    if args.dry_run {
        info!(
            chapter_count = manifest.chapter_count,
            source = %manifest.source_directory,
            "inventory dry-run complete"
        );
        return Ok(());
    }

    let manifest_path = args.manifest_path.unwrap_or_else(|| {
        state_dir(&args.work_dir)
            .join("manifests")
            .join("chapter_inventory.json")
    });

    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote inventory manifest");
    info!(chapter_count = manifest.chapter_count, "inventory completed");

    Ok(())
}

pub fn build_manifest(work_dir: &Path, chapter_pattern: &str) -> Result<ChapterInventoryManifest> {
    let discovery = ChapterDiscovery::new(chapter_pattern)?;
    let chapters = discovery.discover(work_dir)?;
    if chapters.is_empty() {
        bail!(
            "no chapter pages matching '{}' found in {}",
            chapter_pattern,
            work_dir.display()
        );
    }

    let mut entries = Vec::with_capacity(chapters.len());
    for chapter in chapters {
        let sha256 = sha256_file(&chapter.path)?;
        entries.push(ChapterEntry {
            number: chapter.number,
            title: chapter.title,
            filename: chapter.filename,
            sha256,
        });
    }

    Ok(ChapterInventoryManifest {
        manifest_version: 1,
        generated_at: now_utc_string(),
        source_directory: work_dir.display().to_string(),
        chapter_count: entries.len(),
        chapters: entries,
    })
}

/// Finds chapter pages by filename and derives their display titles.
pub struct ChapterDiscovery {
    filename: Regex,
    chapter_head: Regex,
    titlemark: Regex,
    title_tag: Regex,
    chapter_prefix: Regex,
    lecture_prefix: Regex,
    number_prefix: Regex,
    camel_boundary: Regex,
}

impl ChapterDiscovery {
    pub fn new(chapter_pattern: &str) -> Result<Self> {
        let filename = Regex::new(chapter_pattern)
            .with_context(|| format!("failed to compile chapter pattern: {chapter_pattern}"))?;
        if filename.captures_len() < 2 {
            bail!("chapter pattern must capture the chapter number: {chapter_pattern}");
        }

        Ok(Self {
            filename,
            chapter_head: compile(
                r#"(?is)<h[12][^>]*class="[^"]*chapterHead[^"]*"[^>]*>(.*?)</h[12]>"#,
                "chapter heading",
            )?,
            titlemark: compile(
                r#"(?is)<span[^>]*class="[^"]*titlemark[^"]*"[^>]*>.*?</span>"#,
                "titlemark",
            )?,
            title_tag: compile(r"(?is)<title[^>]*>(.*?)</title>", "title tag")?,
            chapter_prefix: compile(r"(?i)^Chapter\s+\d+\s*:?\s*", "chapter prefix")?,
            lecture_prefix: compile(r"(?i)^Lecture\s+\d+\s*:?\s*", "lecture prefix")?,
            number_prefix: compile(r"^\d+\.\d+\s+", "dotted number prefix")?,
            camel_boundary: compile(r"([a-z])([A-Z])", "camel-case boundary")?,
        })
    }

    /// Chapter pages in `work_dir`, ordered by chapter number.
    pub fn discover(&self, work_dir: &Path) -> Result<Vec<DiscoveredChapter>> {
        let entries = fs::read_dir(work_dir)
            .with_context(|| format!("failed to read {}", work_dir.display()))?;

        let mut chapters = Vec::new();
        for entry in entries {
            let entry =
                entry.with_context(|| format!("failed to read entry in {}", work_dir.display()))?;
            let path = entry.path();
            if !entry
                .file_type()
                .with_context(|| format!("failed to inspect file type: {}", path.display()))?
                .is_file()
            {
                continue;
            }

            let Some(filename) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let Some(number) = self.chapter_number(filename)? else {
                continue;
            };

            let html = read_html_lossy(&path)?;
            let title = self.title(&html, filename);
            debug!(chapter = number, title = %title, "discovered chapter");
            chapters.push(DiscoveredChapter {
                number,
                title,
                filename: filename.to_string(),
                path,
            });
        }

        chapters.sort_by(|a, b| a.number.cmp(&b.number).then(a.filename.cmp(&b.filename)));
        Ok(chapters)
    }

    fn chapter_number(&self, filename: &str) -> Result<Option<u32>> {
        let Some(captures) = self.filename.captures(filename) else {
            return Ok(None);
        };
        let number = captures
            .get(1)
            .map(|m| m.as_str())
            .context("missing chapter number capture")?
            .parse::<u32>()
            .with_context(|| format!("invalid chapter number in filename: {filename}"))?;
        Ok(Some(number))
    }

    /// Title from the chapter heading, then `<title>`, then the filename. The
    /// converter's titlemark and lecture prefix are dropped, so raw and
    /// processed pages give the same answer.
    pub fn title(&self, html: &str, filename: &str) -> String {
        let from_heading = self
            .chapter_head
            .captures(html)
            .and_then(|caps| caps.get(1))
            .map(|inner| self.clean_title(&self.titlemark.replace_all(inner.as_str(), "")))
            .filter(|title| !title.is_empty());
        if let Some(title) = from_heading {
            return title;
        }

        let from_title_tag = self
            .title_tag
            .captures(html)
            .and_then(|caps| caps.get(1))
            .map(|inner| self.clean_title(inner.as_str()))
            .filter(|title| !title.is_empty());
        if let Some(title) = from_title_tag {
            return title;
        }

        self.filename_title(filename)
    }

    fn clean_title(&self, html: &str) -> String {
        let text = visible_text(html);
        let text = self.chapter_prefix.replace(&text, "");
        let text = self.lecture_prefix.replace(&text, "");
        self.number_prefix.replace(&text, "").trim().to_string()
    }

    fn filename_title(&self, filename: &str) -> String {
        let stem = filename.strip_suffix(".html").unwrap_or(filename);
        let rest = self
            .filename
            .captures(filename)
            .and_then(|caps| caps.get(1))
            .map(|number| &stem[number.end().min(stem.len())..])
            .unwrap_or(stem);
        let words = rest.trim_matches('_').replace('_', " ");
        let words = self.lecture_prefix.replace(&words, "");
        self.camel_boundary
            .replace_all(&words, "${1}-${2}")
            .trim()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::DEFAULT_CHAPTER_PATTERN;

    fn discovery() -> ChapterDiscovery {
        ChapterDiscovery::new(DEFAULT_CHAPTER_PATTERN).expect("discovery")
    }

    #[test]
    fn title_is_stable_across_raw_and_processed_pages() {
        let discovery = discovery();
        let raw = "<h2 class=\"chapterHead\"><span class=\"titlemark\">Chapter 7</span><br><a id=\"x1-1000\"></a>Lecture 7: Convolutional Networks</h2>";
        let processed = "<h2 class=\"chapterHead\" id=\"lecture-7-convolutional-networks\"><a id=\"x1-1000\"></a>Lecture 7: Convolutional Networks</h2>";
        let file = "Chapter_7_Lecture_7_Convolutional_Networks.html";

        assert_eq!(discovery.title(raw, file), "Convolutional Networks");
        assert_eq!(discovery.title(processed, file), "Convolutional Networks");
    }

    #[test]
    fn title_falls_back_to_title_tag_then_filename() {
        let discovery = discovery();
        assert_eq!(
            discovery.title("<title>Lecture 3: Linear Classifiers</title>", "Chapter_3_x.html"),
            "Linear Classifiers"
        );
        assert_eq!(
            discovery.title("<p>no headings</p>", "Chapter_22_Lecture_22_SelfSupervised_Learning.html"),
            "Self-Supervised Learning"
        );
    }

    #[test]
    fn discovery_orders_by_number_and_skips_other_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("Chapter_10_Lecture_10_Training.html"), "<title>Training</title>")
            .expect("write chapter 10");
        fs::write(dir.path().join("Chapter_2_Lecture_2_Intro.html"), "<title>Intro</title>")
            .expect("write chapter 2");
        fs::write(dir.path().join("bibliography.html"), "<h1>Bibliography</h1>").expect("write bib");

        let chapters = discovery().discover(dir.path()).expect("discover");
        let numbers: Vec<u32> = chapters.iter().map(|chapter| chapter.number).collect();
        assert_eq!(numbers, vec![2, 10]);
        assert_eq!(chapters[1].title, "Training");

        let manifest = build_manifest(dir.path(), DEFAULT_CHAPTER_PATTERN).expect("manifest");
        assert_eq!(manifest.chapter_count, 2);
        assert_eq!(manifest.chapters[0].sha256.len(), 64);
    }

    #[test]
    fn pattern_without_capture_is_rejected() {
        assert!(ChapterDiscovery::new(r"^Chapter_.*\.html$").is_err());
    }
}
