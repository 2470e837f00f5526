//! Markdown reader adapter
//!
//! Wraps pulldown-cmark and flattens its event stream into the [`Block`]
//! tree. Byte offsets from the offset iterator are mapped to 1-based line
//! numbers so the initializer can attribute every heading, code fence and
//! block-quote to a source line.
//!
//! Pipe tables are intentionally not enabled; tabular content enters the
//! system as floats and is transformed into [`crate::ast::Table`] blocks
//! later in the pipeline.

use crate::ast::{Block, Document, Inline};
use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd};

/// Parse include-expanded Markdown source into a [`Document`].
#[must_use]
pub fn parse_markdown(source: &str) -> Document {
    let mut reader = Reader::new(source);
    let parser = Parser::new_ext(source, Options::empty());
    for (event, range) in parser.into_offset_iter() {
        reader.handle(event, range.start);
    }
    reader.finish()
}

enum InlineScope {
    Plain,
    Para { line: u32 },
    Heading { level: u8, line: u32 },
    Emph,
    Strong,
    Link { target: String, title: String },
    Image { target: String, title: String },
}

struct ListBuild {
    start: Option<u64>,
    items: Vec<Vec<Block>>,
}

struct CodeBuild {
    info: String,
    text: String,
    line: u32,
}

struct Reader {
    line_starts: Vec<usize>,
    containers: Vec<Vec<Block>>,
    quote_lines: Vec<u32>,
    lists: Vec<ListBuild>,
    inlines: Vec<(InlineScope, Vec<Inline>)>,
    code: Option<CodeBuild>,
    html_block: Option<(String, u32)>,
}

impl Reader {
    fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        Self {
            line_starts,
            containers: vec![Vec::new()],
            quote_lines: Vec::new(),
            lists: Vec::new(),
            inlines: Vec::new(),
            code: None,
            html_block: None,
        }
    }

    fn line_of(&self, offset: usize) -> u32 {
        match self.line_starts.binary_search(&offset) {
            Ok(i) => (i + 1) as u32,
            Err(i) => i as u32,
        }
    }

    fn push_block(&mut self, block: Block) {
        if let Some(top) = self.containers.last_mut() {
            top.push(block);
        }
    }

    fn push_inline(&mut self, inline: Inline) {
        self.ensure_inline_scope();
        if let Some((_, buf)) = self.inlines.last_mut() {
            buf.push(inline);
        }
    }

    /// Tight list items carry bare text with no paragraph events; collect
    /// such runs under an implicit Plain scope.
    fn ensure_inline_scope(&mut self) {
        if self.inlines.is_empty() {
            self.inlines.push((InlineScope::Plain, Vec::new()));
        }
    }

    fn flush_plain(&mut self) {
        if matches!(self.inlines.last(), Some((InlineScope::Plain, _))) {
            if let Some((_, inlines)) = self.inlines.pop() {
                if !inlines.is_empty() {
                    self.push_block(Block::Plain { inlines });
                }
            }
        }
    }

    fn close_inline_scope(&mut self) {
        let Some((scope, inlines)) = self.inlines.pop() else {
            return;
        };
        match scope {
            InlineScope::Plain => {
                if !inlines.is_empty() {
                    self.push_block(Block::Plain { inlines });
                }
            }
            InlineScope::Para { line } => self.push_block(Block::Para { inlines, line }),
            InlineScope::Heading { level, line } => {
                self.push_block(Block::Header {
                    level,
                    inlines,
                    line,
                });
            }
            InlineScope::Emph => self.push_inline(Inline::Emph { inlines }),
            InlineScope::Strong => self.push_inline(Inline::Strong { inlines }),
            InlineScope::Link { target, title } => self.push_inline(Inline::Link {
                inlines,
                target,
                title,
            }),
            InlineScope::Image { target, title } => self.push_inline(Inline::Image {
                inlines,
                target,
                title,
            }),
        }
    }

    fn handle(&mut self, event: Event<'_>, offset: usize) {
        match event {
            Event::Start(tag) => self.handle_start(tag, offset),
            Event::End(tag) => self.handle_end(tag),
            Event::Text(text) => {
                if let Some(code) = self.code.as_mut() {
                    code.text.push_str(&text);
                } else if let Some((html, _)) = self.html_block.as_mut() {
                    html.push_str(&text);
                } else {
                    self.push_inline(Inline::str(text.into_string()));
                }
            }
            Event::Code(text) => self.push_inline(Inline::Code {
                text: text.into_string(),
            }),
            Event::Html(text) => {
                if let Some((html, _)) = self.html_block.as_mut() {
                    html.push_str(&text);
                } else {
                    self.flush_plain();
                    self.push_block(Block::RawBlock {
                        format: "html".to_string(),
                        text: text.into_string(),
                    });
                }
            }
            Event::InlineHtml(text) => self.push_inline(Inline::RawInline {
                format: "html".to_string(),
                text: text.into_string(),
            }),
            Event::SoftBreak => self.push_inline(Inline::SoftBreak),
            Event::HardBreak => self.push_inline(Inline::LineBreak),
            Event::Rule => {
                self.flush_plain();
                self.push_block(Block::HorizontalRule);
            }
            _ => {}
        }
    }

    fn handle_start(&mut self, tag: Tag<'_>, offset: usize) {
        let line = self.line_of(offset);
        match tag {
            Tag::Paragraph => {
                self.flush_plain();
                self.inlines.push((InlineScope::Para { line }, Vec::new()));
            }
            Tag::Heading { level, .. } => {
                self.flush_plain();
                self.inlines.push((
                    InlineScope::Heading {
                        level: heading_level(level),
                        line,
                    },
                    Vec::new(),
                ));
            }
            Tag::BlockQuote(_) => {
                self.flush_plain();
                self.quote_lines.push(line);
                self.containers.push(Vec::new());
            }
            Tag::CodeBlock(kind) => {
                self.flush_plain();
                let info = match kind {
                    CodeBlockKind::Fenced(info) => info.into_string(),
                    CodeBlockKind::Indented => String::new(),
                };
                self.code = Some(CodeBuild {
                    info,
                    text: String::new(),
                    line,
                });
            }
            Tag::HtmlBlock => {
                self.flush_plain();
                self.html_block = Some((String::new(), line));
            }
            Tag::List(start) => {
                self.flush_plain();
                self.lists.push(ListBuild {
                    start,
                    items: Vec::new(),
                });
            }
            Tag::Item => self.containers.push(Vec::new()),
            Tag::Emphasis => {
                self.ensure_inline_scope();
                self.inlines.push((InlineScope::Emph, Vec::new()));
            }
            Tag::Strong => {
                self.ensure_inline_scope();
                self.inlines.push((InlineScope::Strong, Vec::new()));
            }
            Tag::Link {
                dest_url, title, ..
            } => {
                self.ensure_inline_scope();
                self.inlines.push((
                    InlineScope::Link {
                        target: dest_url.into_string(),
                        title: title.into_string(),
                    },
                    Vec::new(),
                ));
            }
            Tag::Image {
                dest_url, title, ..
            } => {
                self.ensure_inline_scope();
                self.inlines.push((
                    InlineScope::Image {
                        target: dest_url.into_string(),
                        title: title.into_string(),
                    },
                    Vec::new(),
                ));
            }
            _ => {}
        }
    }

    fn handle_end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph
            | TagEnd::Heading(_)
            | TagEnd::Emphasis
            | TagEnd::Strong
            | TagEnd::Link
            | TagEnd::Image => self.close_inline_scope(),
            TagEnd::BlockQuote(_) => {
                self.flush_plain();
                let blocks = self.containers.pop().unwrap_or_default();
                let line = self.quote_lines.pop().unwrap_or(0);
                self.push_block(Block::BlockQuote { blocks, line });
            }
            TagEnd::CodeBlock => {
                if let Some(code) = self.code.take() {
                    self.push_block(Block::CodeBlock {
                        info: code.info,
                        text: code.text,
                        line: code.line,
                    });
                }
            }
            TagEnd::HtmlBlock => {
                if let Some((text, _)) = self.html_block.take() {
                    self.push_block(Block::RawBlock {
                        format: "html".to_string(),
                        text,
                    });
                }
            }
            TagEnd::Item => {
                self.flush_plain();
                let blocks = self.containers.pop().unwrap_or_default();
                if let Some(list) = self.lists.last_mut() {
                    list.items.push(blocks);
                }
            }
            TagEnd::List(_) => {
                if let Some(list) = self.lists.pop() {
                    let block = match list.start {
                        Some(start) => Block::OrderedList {
                            start,
                            items: list.items,
                        },
                        None => Block::BulletList { items: list.items },
                    };
                    self.push_block(block);
                }
            }
            _ => {}
        }
    }

    fn finish(mut self) -> Document {
        self.flush_plain();
        let blocks = self.containers.swap_remove(0);
        Document {
            blocks,
            line_count: self.line_starts.len() as u32,
        }
    }
}

const fn heading_level(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walk::{stringify_inlines, walk_inlines};

    const SAMPLE: &str = "\
# SRS: Sample System @SYS-1

Intro prose.

## HLR: First requirement @HLR-001

> status: draft
> priority: 3

Body with a link [HLR-002](@).

```plantuml:diag{caption=\"Overview\"}
A -> B
```

- item one
- item two
";

    #[test]
    fn headings_carry_level_and_line() {
        let doc = parse_markdown(SAMPLE);
        let headers: Vec<(u8, u32, String)> = doc
            .blocks
            .iter()
            .filter_map(|b| match b {
                Block::Header {
                    level,
                    line,
                    inlines,
                } => Some((*level, *line, stringify_inlines(inlines))),
                _ => None,
            })
            .collect();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0], (1, 1, "SRS: Sample System @SYS-1".to_string()));
        assert_eq!(headers[1].0, 2);
        assert_eq!(headers[1].1, 5);
    }

    #[test]
    fn block_quote_becomes_attribute_candidate() {
        let doc = parse_markdown(SAMPLE);
        let quote = doc
            .blocks
            .iter()
            .find_map(|b| match b {
                Block::BlockQuote { blocks, line } => Some((blocks.clone(), *line)),
                _ => None,
            })
            .unwrap();
        assert_eq!(quote.1, 7);
        let text = crate::walk::stringify_blocks(&quote.0);
        assert!(text.contains("status: draft"));
        assert!(text.contains("priority: 3"));
    }

    #[test]
    fn fenced_code_keeps_info_and_body() {
        let doc = parse_markdown(SAMPLE);
        let (info, text, line) = doc
            .blocks
            .iter()
            .find_map(|b| match b {
                Block::CodeBlock { info, text, line } => {
                    Some((info.clone(), text.clone(), *line))
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(info, "plantuml:diag{caption=\"Overview\"}");
        assert_eq!(text, "A -> B\n");
        assert_eq!(line, 12);
    }

    #[test]
    fn links_survive_with_targets() {
        let doc = parse_markdown(SAMPLE);
        let mut found = None;
        walk_inlines(&doc.blocks, &mut |inline| {
            if let Inline::Link { target, inlines, .. } = inline {
                found = Some((target.clone(), stringify_inlines(inlines)));
            }
        });
        assert_eq!(found, Some(("@".to_string(), "HLR-002".to_string())));
    }

    #[test]
    fn tight_list_items_are_plain() {
        let doc = parse_markdown(SAMPLE);
        let items = doc
            .blocks
            .iter()
            .find_map(|b| match b {
                Block::BulletList { items } => Some(items.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0][0], Block::Plain { .. }));
    }

    #[test]
    fn line_count_covers_document() {
        let doc = parse_markdown("a\nb\nc\n");
        assert_eq!(doc.line_count, 4);
    }
}
