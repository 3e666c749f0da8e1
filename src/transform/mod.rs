pub mod citations;
pub mod code_blocks;
pub mod content;
pub mod context;
pub mod cross_refs;
pub mod headings;
pub mod math_guard;
pub mod outline;
pub mod pipeline;
pub mod safety;
pub mod tables;
pub mod text_rules;
pub mod toc;

pub use pipeline::ChapterPipeline;
