//! EMIT: document assembly
//!
//! The assembler rebuilds one document's final AST from the store:
//! specification header (via the spec-type render hook), preamble, then
//! every object, float and block view interleaved in `file_seq` order.
//! Inline view placeholders left inside object ASTs are substituted from
//! their materialized or rendered content. Anchor nodes precede every
//! addressable element so rewritten links land somewhere in every output
//! format.

use anyhow::Result;
use serde_json::Value;
use speccompiler_doc::ast::decode_blocks;
use speccompiler_doc::{Block, Inline, walk_blocks_mut, walk_inlines_mut};
use speccompiler_phase_api::Context;
use speccompiler_store::Store;
use std::collections::BTreeMap;

use crate::registry::HandlerRegistry;

enum Piece {
    Object { ast: Option<String>, pid: Option<String> },
    Float {
        resolved_ast: Option<String>,
        label: Option<String>,
        anchor: Option<String>,
        caption: Option<String>,
        number: Option<i64>,
        caption_format: String,
    },
    View {
        resolved_ast: Option<String>,
        resolved_data: Option<String>,
        materializer: Option<String>,
    },
}

/// Assemble the final block list for one document.
pub fn assemble_document(
    store: &Store,
    handlers: &HandlerRegistry,
    ctx: &Context,
) -> Result<Vec<Block>> {
    let spec_rowid = resolve_spec_rowid(store, ctx)?;
    let mut blocks: Vec<Block> = Vec::new();

    for handler in handlers.handlers() {
        if let Some(render) = &handler.on_render_specification {
            if let Some(header) = render(store, ctx)? {
                blocks.extend(header);
                break;
            }
        }
    }

    let preamble: Option<String> = store.query_one(
        "SELECT body_ast FROM specifications WHERE id = ?1",
        &[&spec_rowid],
        |row| row.get(0),
    )?;
    if let Some(json) = preamble {
        blocks.extend(decode_blocks(&json)?);
    }

    let inline_views = inline_view_substitutions(store, spec_rowid)?;
    for (_, piece) in ordered_pieces(store, spec_rowid)? {
        match piece {
            Piece::Object { ast, pid } => {
                if let Some(pid) = pid.filter(|p| !p.is_empty()) {
                    blocks.push(anchor_block(&pid));
                }
                if let Some(json) = ast {
                    let mut body = decode_blocks(&json)?;
                    substitute_inline_views(&mut body, &inline_views);
                    blocks.extend(body);
                }
            }
            Piece::Float {
                resolved_ast,
                label,
                anchor,
                caption,
                number,
                caption_format,
            } => {
                let anchor = anchor.or_else(|| label.clone());
                if let Some(anchor) = anchor.filter(|a| !a.is_empty()) {
                    blocks.push(anchor_block(&anchor));
                }
                match resolved_ast {
                    Some(json) => blocks.extend(decode_blocks(&json)?),
                    None => blocks.push(Block::Para {
                        inlines: vec![Inline::Emph {
                            inlines: vec![Inline::str(format!(
                                "[{} unavailable]",
                                label.unwrap_or_default()
                            ))],
                        }],
                        line: 0,
                    }),
                }
                if let (Some(caption), Some(number)) = (caption, number) {
                    blocks.push(Block::Para {
                        inlines: vec![
                            Inline::Strong {
                                inlines: vec![Inline::str(format!(
                                    "{caption_format} {number}:"
                                ))],
                            },
                            Inline::str(format!(" {caption}")),
                        ],
                        line: 0,
                    });
                }
            }
            Piece::View {
                resolved_ast,
                resolved_data,
                materializer,
            } => {
                if let Some(json) = resolved_ast {
                    blocks.extend(decode_blocks(&json)?);
                } else if let Some(data) = resolved_data {
                    let value: Value = serde_json::from_str(&data)?;
                    if let Some(block) =
                        view_blocks(materializer.as_deref().unwrap_or("custom"), &value)
                    {
                        blocks.push(block);
                    }
                }
                // Unmaterialized views degrade to nothing; the verifier
                // already reported them.
            }
        }
    }

    for handler in handlers.handlers() {
        if let Some(hook) = &handler.on_render_code_block {
            let mut result = Ok(());
            walk_blocks_mut(&mut blocks, &mut |block| {
                if result.is_ok() && matches!(block, Block::CodeBlock { .. }) {
                    result = hook(store, ctx, block);
                }
            });
            result?;
        }
        if let Some(hook) = &handler.on_render_code {
            let mut result = Ok(());
            walk_inlines_mut(&mut blocks, &mut |inline| {
                if result.is_ok() && matches!(inline, Inline::Code { .. }) {
                    result = hook(store, ctx, inline);
                }
            });
            result?;
        }
    }
    Ok(blocks)
}

/// Swap the `.ext` cross-document sentinel for the format's extension.
pub fn swap_ext_sentinel(blocks: &mut [Block], format: &str) {
    let ext = match format {
        "html5" => "html",
        "docx" => "docx",
        _ => "md",
    };
    let needle = ".ext#";
    let replacement = format!(".{ext}#");
    walk_inlines_mut(blocks, &mut |inline| {
        if let Inline::Link { target, .. } = inline {
            if target.contains(needle) {
                *target = target.replace(needle, &replacement);
            }
        }
    });
}

fn resolve_spec_rowid(store: &Store, ctx: &Context) -> Result<i64> {
    if ctx.spec_rowid > 0 {
        return Ok(ctx.spec_rowid);
    }
    let rowid: Option<i64> = store.query_one(
        "SELECT id FROM specifications WHERE identifier = ?1",
        &[&ctx.spec_id],
        |row| row.get(0),
    )?;
    rowid.ok_or_else(|| {
        anyhow::anyhow!("specification '{}' is not in the store", ctx.spec_id)
    })
}

fn anchor_block(anchor: &str) -> Block {
    Block::RawBlock {
        format: "html".to_string(),
        text: format!("<a id=\"{anchor}\"></a>"),
    }
}

fn ordered_pieces(store: &Store, spec_rowid: i64) -> Result<Vec<(i64, Piece)>> {
    let mut pieces: Vec<(i64, Piece)> = store.query_all(
        "SELECT file_seq, ast, pid FROM spec_objects WHERE specification_ref = ?1",
        &[&spec_rowid],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                Piece::Object {
                    ast: row.get(1)?,
                    pid: row.get(2)?,
                },
            ))
        },
    )?;
    pieces.extend(store.query_all(
        "SELECT f.file_seq, f.resolved_ast, f.label, f.anchor, f.caption, f.number,
                coalesce(ft.caption_format, f.type_ref)
         FROM spec_floats f
         LEFT JOIN float_types ft ON ft.identifier = f.type_ref
         WHERE f.specification_ref = ?1",
        &[&spec_rowid],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                Piece::Float {
                    resolved_ast: row.get(1)?,
                    label: row.get(2)?,
                    anchor: row.get(3)?,
                    caption: row.get(4)?,
                    number: row.get(5)?,
                    caption_format: row.get(6)?,
                },
            ))
        },
    )?);
    pieces.extend(store.query_all(
        "SELECT v.file_seq, v.resolved_ast, v.resolved_data, vt.materializer_type
         FROM spec_views v
         LEFT JOIN view_types vt ON vt.identifier = v.type_ref
         WHERE v.specification_ref = ?1 AND v.is_inline = 0",
        &[&spec_rowid],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                Piece::View {
                    resolved_ast: row.get(1)?,
                    resolved_data: row.get(2)?,
                    materializer: row.get(3)?,
                },
            ))
        },
    )?);
    pieces.sort_by_key(|(seq, _)| *seq);
    Ok(pieces)
}

/// Inline views substitute into `Code` spans that carry their exact
/// authored text.
fn inline_view_substitutions(
    store: &Store,
    spec_rowid: i64,
) -> Result<BTreeMap<String, Vec<Inline>>> {
    let rows = store.query_all(
        "SELECT v.raw_content, v.resolved_ast, v.resolved_data, vt.materializer_type
         FROM spec_views v
         LEFT JOIN view_types vt ON vt.identifier = v.type_ref
         WHERE v.specification_ref = ?1 AND v.is_inline = 1",
        &[&spec_rowid],
        |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        },
    )?;
    let mut map = BTreeMap::new();
    for (raw_content, resolved_ast, resolved_data, materializer) in rows {
        let Some(raw) = raw_content else { continue };
        if let Some(json) = resolved_ast {
            let inlines = first_block_inlines(&decode_blocks(&json)?);
            map.insert(raw, inlines);
        } else if let Some(data) = resolved_data {
            let value: Value = serde_json::from_str(&data)?;
            if materializer.as_deref() == Some("abbrev_def") {
                if let Some(abbrev) = value.get("abbrev").and_then(Value::as_str) {
                    map.insert(raw, vec![Inline::str(abbrev)]);
                }
            }
        }
    }
    Ok(map)
}

fn first_block_inlines(blocks: &[Block]) -> Vec<Inline> {
    match blocks.first() {
        Some(Block::Plain { inlines } | Block::Para { inlines, .. }) => inlines.clone(),
        _ => Vec::new(),
    }
}

fn substitute_inline_views(blocks: &mut [Block], views: &BTreeMap<String, Vec<Inline>>) {
    if views.is_empty() {
        return;
    }
    walk_inlines_mut(blocks, &mut |inline| {
        if let Inline::Code { text } = inline {
            if let Some(replacement) = views.get(text) {
                if replacement.len() == 1 {
                    if let Some(first) = replacement.first() {
                        *inline = first.clone();
                    }
                } else if !replacement.is_empty() {
                    *inline = Inline::Emph {
                        inlines: replacement.clone(),
                    };
                }
            }
        }
    });
}

fn view_blocks(materializer: &str, data: &Value) -> Option<Block> {
    let entries = data.as_array()?;
    match materializer {
        "toc" => {
            let items = entries
                .iter()
                .map(|entry| {
                    let title = entry
                        .get("title")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    let pid = entry.get("pid").and_then(Value::as_str).unwrap_or_default();
                    vec![Block::Plain {
                        inlines: vec![Inline::Link {
                            inlines: vec![Inline::str(title)],
                            target: format!("#{pid}"),
                            title: String::new(),
                        }],
                    }]
                })
                .collect();
            Some(Block::BulletList { items })
        }
        "lof" => {
            let items = entries
                .iter()
                .map(|entry| {
                    let caption = entry
                        .get("caption")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    let anchor = entry
                        .get("anchor")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    let number = entry.get("number").and_then(Value::as_i64).unwrap_or(0);
                    let format = entry
                        .get("caption_format")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    vec![Block::Plain {
                        inlines: vec![Inline::Link {
                            inlines: vec![Inline::str(format!("{format} {number}: {caption}"))],
                            target: format!("#{anchor}"),
                            title: String::new(),
                        }],
                    }]
                })
                .collect();
            Some(Block::BulletList { items })
        }
        "abbrev_list" => {
            let items = entries
                .iter()
                .map(|entry| {
                    let abbrev = entry
                        .get("abbrev")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    let meaning = entry
                        .get("meaning")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    vec![Block::Plain {
                        inlines: vec![
                            Inline::Strong {
                                inlines: vec![Inline::str(abbrev)],
                            },
                            Inline::str(format!(" {meaning}")),
                        ],
                    }]
                })
                .collect();
            Some(Block::BulletList { items })
        }
        _ => None,
    }
}
