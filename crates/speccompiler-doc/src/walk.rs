//! AST traversal helpers

use crate::ast::{Block, Inline};

/// Visit every inline in a block tree, depth-first, immutably.
pub fn walk_inlines<F: FnMut(&Inline)>(blocks: &[Block], f: &mut F) {
    for block in blocks {
        match block {
            Block::Header { inlines, .. }
            | Block::Para { inlines, .. }
            | Block::Plain { inlines } => visit_inlines(inlines, f),
            Block::BlockQuote { blocks, .. } => walk_inlines(blocks, f),
            Block::BulletList { items } | Block::OrderedList { items, .. } => {
                for item in items {
                    walk_inlines(item, f);
                }
            }
            Block::Table(table) => {
                visit_inlines(&table.caption, f);
                for cell in &table.header {
                    walk_inlines(cell, f);
                }
                for row in &table.rows {
                    for cell in row {
                        walk_inlines(cell, f);
                    }
                }
            }
            Block::CodeBlock { .. } | Block::HorizontalRule | Block::RawBlock { .. } => {}
        }
    }
}

fn visit_inlines<F: FnMut(&Inline)>(inlines: &[Inline], f: &mut F) {
    for inline in inlines {
        f(inline);
        match inline {
            Inline::Emph { inlines }
            | Inline::Strong { inlines }
            | Inline::Link { inlines, .. }
            | Inline::Image { inlines, .. } => visit_inlines(inlines, f),
            _ => {}
        }
    }
}

/// Visit every inline mutably. Children are visited after the node itself,
/// so a callback that rewrites a link target does not re-trigger on its own
/// replacement children.
pub fn walk_inlines_mut<F: FnMut(&mut Inline)>(blocks: &mut [Block], f: &mut F) {
    for block in blocks {
        match block {
            Block::Header { inlines, .. }
            | Block::Para { inlines, .. }
            | Block::Plain { inlines } => visit_inlines_mut(inlines, f),
            Block::BlockQuote { blocks, .. } => walk_inlines_mut(blocks, f),
            Block::BulletList { items } | Block::OrderedList { items, .. } => {
                for item in items {
                    walk_inlines_mut(item, f);
                }
            }
            Block::Table(table) => {
                visit_inlines_mut(&mut table.caption, f);
                for cell in &mut table.header {
                    walk_inlines_mut(cell, f);
                }
                for row in &mut table.rows {
                    for cell in row {
                        walk_inlines_mut(cell, f);
                    }
                }
            }
            Block::CodeBlock { .. } | Block::HorizontalRule | Block::RawBlock { .. } => {}
        }
    }
}

fn visit_inlines_mut<F: FnMut(&mut Inline)>(inlines: &mut [Inline], f: &mut F) {
    for inline in inlines {
        f(inline);
        match inline {
            Inline::Emph { inlines }
            | Inline::Strong { inlines }
            | Inline::Link { inlines, .. }
            | Inline::Image { inlines, .. } => visit_inlines_mut(inlines, f),
            _ => {}
        }
    }
}

/// Visit every block mutably, depth-first, parents before children.
pub fn walk_blocks_mut<F: FnMut(&mut Block)>(blocks: &mut [Block], f: &mut F) {
    for block in blocks {
        f(block);
        match block {
            Block::BlockQuote { blocks, .. } => walk_blocks_mut(blocks, f),
            Block::BulletList { items } | Block::OrderedList { items, .. } => {
                for item in items {
                    walk_blocks_mut(item, f);
                }
            }
            Block::Table(table) => {
                for cell in &mut table.header {
                    walk_blocks_mut(cell, f);
                }
                for row in &mut table.rows {
                    for cell in row {
                        walk_blocks_mut(cell, f);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Flatten inlines to plain text. Soft and hard breaks become newlines.
#[must_use]
pub fn stringify_inlines(inlines: &[Inline]) -> String {
    let mut out = String::new();
    stringify_into(inlines, &mut out);
    out
}

fn stringify_into(inlines: &[Inline], out: &mut String) {
    for inline in inlines {
        match inline {
            Inline::Str { text } | Inline::Code { text } => out.push_str(text),
            Inline::Emph { inlines }
            | Inline::Strong { inlines }
            | Inline::Link { inlines, .. }
            | Inline::Image { inlines, .. } => stringify_into(inlines, out),
            Inline::SoftBreak | Inline::LineBreak => out.push('\n'),
            Inline::RawInline { .. } => {}
        }
    }
}

/// Flatten a block list to plain text, blocks separated by newlines.
#[must_use]
pub fn stringify_blocks(blocks: &[Block]) -> String {
    let mut parts = Vec::new();
    for block in blocks {
        match block {
            Block::Header { inlines, .. }
            | Block::Para { inlines, .. }
            | Block::Plain { inlines } => parts.push(stringify_inlines(inlines)),
            Block::CodeBlock { text, .. } => parts.push(text.clone()),
            Block::BlockQuote { blocks, .. } => parts.push(stringify_blocks(blocks)),
            Block::BulletList { items } | Block::OrderedList { items, .. } => {
                for item in items {
                    parts.push(stringify_blocks(item));
                }
            }
            Block::Table(_) | Block::HorizontalRule | Block::RawBlock { .. } => {}
        }
    }
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Block> {
        vec![Block::Para {
            inlines: vec![
                Inline::str("see "),
                Inline::Emph {
                    inlines: vec![Inline::Link {
                        inlines: vec![Inline::str("HLR-001")],
                        target: "@".to_string(),
                        title: String::new(),
                    }],
                },
            ],
            line: 1,
        }]
    }

    #[test]
    fn counts_nested_links() {
        let blocks = sample();
        let mut links = 0;
        walk_inlines(&blocks, &mut |inline| {
            if matches!(inline, Inline::Link { .. }) {
                links += 1;
            }
        });
        assert_eq!(links, 1);
    }

    #[test]
    fn mutates_nested_targets() {
        let mut blocks = sample();
        walk_inlines_mut(&mut blocks, &mut |inline| {
            if let Inline::Link { target, .. } = inline {
                *target = "#hlr-001".to_string();
            }
        });
        let mut seen = String::new();
        walk_inlines(&blocks, &mut |inline| {
            if let Inline::Link { target, .. } = inline {
                seen = target.clone();
            }
        });
        assert_eq!(seen, "#hlr-001");
    }

    #[test]
    fn stringify_flattens() {
        assert_eq!(stringify_blocks(&sample()), "see HLR-001");
    }
}
