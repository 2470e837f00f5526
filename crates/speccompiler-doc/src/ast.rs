//! Block and inline node types

use crate::DocError;
use serde::{Deserialize, Serialize};

/// A parsed source document: blocks plus the source line count, which the
/// initializer uses to close the last heading's line range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Document {
    pub blocks: Vec<Block>,
    pub line_count: u32,
}

impl Document {
    /// Serialize to compact JSON.
    pub fn encode_json(&self) -> Result<String, DocError> {
        serde_json::to_string(self).map_err(DocError::Encode)
    }

    /// Deserialize from JSON produced by [`Self::encode_json`].
    pub fn decode_json(json: &str) -> Result<Self, DocError> {
        serde_json::from_str(json).map_err(DocError::Decode)
    }
}

/// Serialize a standalone block list to compact JSON.
pub fn encode_blocks(blocks: &[Block]) -> Result<String, DocError> {
    serde_json::to_string(blocks).map_err(DocError::Encode)
}

/// Deserialize a standalone block list.
pub fn decode_blocks(json: &str) -> Result<Vec<Block>, DocError> {
    serde_json::from_str(json).map_err(DocError::Decode)
}

/// Block-level node.
///
/// `line` fields are 1-based source lines in the include-expanded text; the
/// initializer maps them back to the originating file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Block {
    Header {
        level: u8,
        inlines: Vec<Inline>,
        line: u32,
    },
    Para {
        inlines: Vec<Inline>,
        line: u32,
    },
    Plain {
        inlines: Vec<Inline>,
    },
    CodeBlock {
        info: String,
        text: String,
        line: u32,
    },
    BlockQuote {
        blocks: Vec<Block>,
        line: u32,
    },
    BulletList {
        items: Vec<Vec<Block>>,
    },
    OrderedList {
        start: u64,
        items: Vec<Vec<Block>>,
    },
    Table(Table),
    HorizontalRule,
    RawBlock {
        format: String,
        text: String,
    },
}

/// Inline-level node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Inline {
    Str { text: String },
    Emph { inlines: Vec<Inline> },
    Strong { inlines: Vec<Inline> },
    Code { text: String },
    Link {
        inlines: Vec<Inline>,
        target: String,
        title: String,
    },
    Image {
        inlines: Vec<Inline>,
        target: String,
        title: String,
    },
    SoftBreak,
    LineBreak,
    RawInline { format: String, text: String },
}

impl Inline {
    /// Convenience constructor for plain text.
    #[must_use]
    pub fn str(text: impl Into<String>) -> Self {
        Self::Str { text: text.into() }
    }
}

/// Column alignment for [`Table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Alignment {
    Default,
    Left,
    Center,
    Right,
}

/// Table produced by internal float transformers (CSV, list-table).
///
/// The Markdown reader never emits tables; prose tables enter the system
/// as floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Table {
    pub caption: Vec<Inline>,
    pub aligns: Vec<Alignment>,
    /// Relative column widths, normalized to sum to 1.0 (empty = automatic).
    pub widths: Vec<f64>,
    pub header: Vec<Vec<Block>>,
    pub rows: Vec<Vec<Vec<Block>>>,
}

impl Default for Alignment {
    fn default() -> Self {
        Self::Default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip() {
        let doc = Document {
            blocks: vec![
                Block::Header {
                    level: 2,
                    inlines: vec![Inline::str("Title")],
                    line: 3,
                },
                Block::Para {
                    inlines: vec![
                        Inline::str("see "),
                        Inline::Link {
                            inlines: vec![Inline::str("HLR-001")],
                            target: "@".to_string(),
                            title: String::new(),
                        },
                    ],
                    line: 5,
                },
            ],
            line_count: 6,
        };
        let json = doc.encode_json().unwrap();
        assert_eq!(Document::decode_json(&json).unwrap(), doc);
    }

    #[test]
    fn block_list_round_trip() {
        let blocks = vec![Block::CodeBlock {
            info: "table:data".to_string(),
            text: "a,b\n1,2\n".to_string(),
            line: 1,
        }];
        let json = encode_blocks(&blocks).unwrap();
        assert_eq!(decode_blocks(&json).unwrap(), blocks);
    }
}
