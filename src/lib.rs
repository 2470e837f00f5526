//! speccompiler — structured-Markdown specification compiler
//!
//! Transforms structured Markdown into word-processor documents, HTML,
//! Markdown and a JSON AST through a relational specification store
//! (SPEC-IR) and a five-phase incremental pipeline. The heavy lifting
//! lives in the workspace crates; this crate wires them behind the CLI.

pub mod cli;

pub use speccompiler_config::Config;
pub use speccompiler_engine::{BuildSummary, Driver};
pub use speccompiler_utils::ExitCode;
