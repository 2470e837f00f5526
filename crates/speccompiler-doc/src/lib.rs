//! Document AST for speccompiler
//!
//! A Pandoc-shaped block/inline tree with a deliberately small surface:
//! construct via the [`reader`] adapter, traverse with [`walk`], serialize
//! with [`Document::encode_json`]. The pipeline threads these values through
//! the store as JSON; it never grows the variant set to match any particular
//! writer.

pub mod ast;
pub mod reader;
pub mod walk;

pub use ast::{Alignment, Block, Document, Inline, Table};
pub use reader::parse_markdown;
pub use walk::{
    stringify_blocks, stringify_inlines, walk_blocks_mut, walk_inlines, walk_inlines_mut,
};

use thiserror::Error;

/// AST serialization errors.
#[derive(Error, Debug)]
pub enum DocError {
    #[error("Failed to encode document AST: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode document AST: {0}")]
    Decode(#[source] serde_json::Error),
}
