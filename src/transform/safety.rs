use std::fmt;

use anyhow::Result;
use regex::Regex;

use crate::transform::math_guard::TOKEN_PREFIX;
use crate::util::compile;

pub const CONTENT_START: &str = "<!-- content-start -->";
pub const CONTENT_END: &str = "<!-- content-end -->";

/// Structural reasons an assembled page must not be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyViolation {
    ContentContainers(usize),
    MissingContentMarkers,
    ContentTooShort { chars: usize, min: usize },
    MissingTopHeading,
    UnrestoredMath(usize),
    NavigationContainers(usize),
    HeaderBars(usize),
}

impl fmt::Display for SafetyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContentContainers(count) => {
                write!(f, "expected exactly one content container, found {count}")
            }
            Self::MissingContentMarkers => write!(f, "content markers are missing"),
            Self::ContentTooShort { chars, min } => {
                write!(f, "content is {chars} chars, below the minimum of {min}")
            }
            Self::MissingTopHeading => write!(f, "no h1 or h2 heading in the content"),
            Self::UnrestoredMath(count) => write!(f, "{count} unrestored math tokens"),
            Self::NavigationContainers(count) => {
                write!(f, "expected exactly one navigation sidebar, found {count}")
            }
            Self::HeaderBars(count) => {
                write!(f, "expected exactly one header bar, found {count}")
            }
        }
    }
}

impl std::error::Error for SafetyViolation {}

/// Last check on a fully assembled page before it replaces the file on disk.
pub struct SafetyValidator {
    min_content_chars: usize,
    content_container: Regex,
    sidebar: Regex,
    top_bar: Regex,
    top_heading: Regex,
}

impl SafetyValidator {
    pub fn new(min_content_chars: usize) -> Result<Self> {
        Ok(Self {
            min_content_chars,
            content_container: compile(r#"\bid\s*=\s*"doc_content""#, "content container")?,
            sidebar: compile(r#"class\s*=\s*"sidebar""#, "sidebar container")?,
            top_bar: compile(r#"class\s*=\s*"top-bar""#, "header bar")?,
            top_heading: compile(r"(?i)<h[12][\s>]", "top-level heading")?,
        })
    }

    pub fn check(&self, page: &str) -> Result<(), SafetyViolation> {
        let containers = self.content_container.find_iter(page).count();
        if containers != 1 {
            return Err(SafetyViolation::ContentContainers(containers));
        }

        let content = content_between_markers(page).ok_or(SafetyViolation::MissingContentMarkers)?;
        let chars = content.trim().chars().count();
        if chars < self.min_content_chars {
            return Err(SafetyViolation::ContentTooShort {
                chars,
                min: self.min_content_chars,
            });
        }
        if !self.top_heading.is_match(content) {
            return Err(SafetyViolation::MissingTopHeading);
        }

        let tokens = page.matches(TOKEN_PREFIX).count();
        if tokens > 0 {
            return Err(SafetyViolation::UnrestoredMath(tokens));
        }

        let sidebars = self.sidebar.find_iter(page).count();
        if sidebars != 1 {
            return Err(SafetyViolation::NavigationContainers(sidebars));
        }
        let bars = self.top_bar.find_iter(page).count();
        if bars != 1 {
            return Err(SafetyViolation::HeaderBars(bars));
        }
        Ok(())
    }
}

/// Text between the first start marker and the last end marker.
pub fn content_between_markers(page: &str) -> Option<&str> {
    let start = page.find(CONTENT_START)? + CONTENT_START.len();
    let end = page.rfind(CONTENT_END)?;
    page.get(start..end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body: &str) -> String {
        format!(
            "<aside class=\"sidebar\" id=\"sidebar\"></aside><header class=\"top-bar\" id=\"topbar\"></header>\
             <div class=\"card-body\" id=\"doc_content\">\n{CONTENT_START}\n{body}\n{CONTENT_END}\n</div>"
        )
    }

    fn long_body() -> String {
        format!("<h2 class=\"chapterHead\">Networks</h2><p>{}</p>", "word ".repeat(40))
    }

    #[test]
    fn well_formed_page_passes() {
        let validator = SafetyValidator::new(100).expect("validator");
        assert_eq!(validator.check(&page(&long_body())), Ok(()));
    }

    #[test]
    fn truncated_content_is_rejected() {
        let validator = SafetyValidator::new(500).expect("validator");
        let err = validator.check(&page("<h2>Short</h2>")).expect_err("too short");
        assert!(matches!(err, SafetyViolation::ContentTooShort { min: 500, .. }));
    }

    #[test]
    fn leftover_math_token_is_rejected() {
        let validator = SafetyValidator::new(100).expect("validator");
        let body = format!("{}<p>{TOKEN_PREFIX}3__</p>", long_body());
        assert_eq!(validator.check(&page(&body)), Err(SafetyViolation::UnrestoredMath(1)));
    }

    #[test]
    fn nested_page_shell_is_rejected() {
        let validator = SafetyValidator::new(100).expect("validator");
        let doubled = page(&page(&long_body()));
        assert_eq!(validator.check(&doubled), Err(SafetyViolation::ContentContainers(2)));
    }

    #[test]
    fn missing_heading_is_rejected() {
        let validator = SafetyValidator::new(10).expect("validator");
        let body = format!("<p>{}</p>", "text ".repeat(10));
        assert_eq!(validator.check(&page(&body)), Err(SafetyViolation::MissingTopHeading));
    }
}
