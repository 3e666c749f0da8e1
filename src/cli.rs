use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

pub const DEFAULT_CHAPTER_PATTERN: &str = r"^Chapter_(\d+)_.*\.html$";

#[derive(Parser, Debug)]
#[command(
    name = "bookpress",
    version,
    about = "Post-processing for converter-generated multi-chapter HTML books"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Inventory(InventoryArgs),
    Build(BuildArgs),
    Validate(ValidateArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct InventoryArgs {
    #[arg(long, default_value = ".")]
    pub work_dir: PathBuf,

    #[arg(long, default_value = DEFAULT_CHAPTER_PATTERN)]
    pub chapter_pattern: String,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum HtmlBackendArg {
    Auto,
    Dom,
    Regex,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum IdScope {
    /// Heading ids are unique across every chapter of the book.
    Corpus,
    /// Heading ids are unique within each chapter only.
    Chapter,
}

impl IdScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Corpus => "corpus",
            Self::Chapter => "chapter",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    #[arg(long, default_value = ".")]
    pub work_dir: PathBuf,

    #[arg(long, default_value = DEFAULT_CHAPTER_PATTERN)]
    pub chapter_pattern: String,

    #[arg(long = "chapter")]
    pub chapters: Vec<u32>,

    #[arg(long, value_enum, default_value_t = HtmlBackendArg::Auto)]
    pub html_backend: HtmlBackendArg,

    #[arg(long, value_enum, default_value_t = IdScope::Corpus)]
    pub id_scope: IdScope,

    #[arg(long)]
    pub policy_path: Option<PathBuf>,

    #[arg(long)]
    pub bbl_path: Option<PathBuf>,

    #[arg(long)]
    pub bib_path: Option<PathBuf>,

    #[arg(long, default_value = "bibliography.html")]
    pub bibliography_page: String,

    #[arg(long, default_value_t = 500)]
    pub min_content_chars: usize,

    #[arg(long)]
    pub report_dir: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    #[arg(long, default_value_t = false)]
    pub strict: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    #[arg(long, default_value = ".")]
    pub work_dir: PathBuf,

    #[arg(long, default_value = DEFAULT_CHAPTER_PATTERN)]
    pub chapter_pattern: String,

    #[arg(long, default_value = "bibliography.html")]
    pub bibliography_page: String,

    #[arg(long, default_value_t = 500)]
    pub min_content_chars: usize,

    #[arg(long)]
    pub report_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".")]
    pub work_dir: PathBuf,

    #[arg(long)]
    pub report_dir: Option<PathBuf>,
}

pub fn state_dir(work_dir: &std::path::Path) -> PathBuf {
    work_dir.join(".bookpress")
}

pub fn default_report_dir(work_dir: &std::path::Path) -> PathBuf {
    state_dir(work_dir).join("reports")
}
