use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::warn;

use crate::model::ChapterStatus;
use crate::transform::safety::SafetyValidator;
use crate::util::{sha256_bytes, write_atomic};

mod assemble;
mod bibliography;
mod chapter;
mod run;
#[cfg(test)]
mod tests;

pub use run::run;

/// Outcome of committing one assembled page.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PageWrite {
    status: ChapterStatus,
    violation: Option<String>,
    sha256: Option<String>,
}

/// Gates an assembled page through the validator and replaces the file on
/// disk only when it passes and its bytes changed.
fn commit_page(
    path: &Path,
    page: &str,
    validator: &SafetyValidator,
    dry_run: bool,
) -> Result<PageWrite> {
    if let Err(violation) = validator.check(page) {
        warn!(path = %path.display(), violation = %violation, "safety gate rejected page");
        return Ok(PageWrite {
            status: ChapterStatus::Rejected,
            violation: Some(violation.to_string()),
            sha256: None,
        });
    }

    let unchanged = path.exists()
        && fs::read(path).with_context(|| format!("failed to read {}", path.display()))?
            == page.as_bytes();
    let status = if unchanged {
        ChapterStatus::Unchanged
    } else if dry_run {
        ChapterStatus::DryRun
    } else {
        write_atomic(path, page.as_bytes())?;
        ChapterStatus::Written
    };

    Ok(PageWrite {
        status,
        violation: None,
        sha256: Some(sha256_bytes(page.as_bytes())),
    })
}
