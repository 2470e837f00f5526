//! TRANSFORM: internal float transformers
//!
//! Float types without external rendering transform synchronously into a
//! document block, stored JSON-serialized in `resolved_ast` and memoized
//! by `content_sha` so an unchanged body in any specification reuses the
//! previous result.
//!
//! The table transformer understands three shapes: a list-table (bullet
//! markers, optionally preceded by metadata lines), CSV and TSV. Metadata
//! keys: `header-rows`, `header-cols`, `widths` (normalized to sum 1.0)
//! and `aligns` (comma list of `l|c|r`).

use anyhow::Result;
use speccompiler_doc::ast::encode_blocks;
use speccompiler_doc::{Alignment, Block, Inline, Table};
use speccompiler_model::TypeRegistry;
use speccompiler_store::Store;

/// Transform every internal float of a specification whose
/// `resolved_ast` is still null.
pub fn transform_internal_floats(
    store: &Store,
    registry: &TypeRegistry,
    spec_rowid: i64,
) -> Result<()> {
    let pending = store.query_all(
        "SELECT id, type_ref, content_sha, raw_content, syntax_key
         FROM spec_floats
         WHERE specification_ref = ?1 AND resolved_ast IS NULL
         ORDER BY file_seq",
        &[&spec_rowid],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        },
    )?;

    for (id, type_ref, content_sha, raw_content, syntax_key) in pending {
        let Some(float_type) = registry.float_type(&type_ref) else {
            continue;
        };
        if float_type.needs_external_render {
            continue;
        }

        // Memoized by content hash across the whole store.
        let cached: Option<String> = store.query_one(
            "SELECT resolved_ast FROM spec_floats
             WHERE content_sha = ?1 AND type_ref = ?2 AND resolved_ast IS NOT NULL
             ORDER BY id LIMIT 1",
            &[&content_sha, &type_ref],
            |row| row.get(0),
        )?;
        let resolved = match cached {
            Some(json) => json,
            None => {
                let raw = raw_content.unwrap_or_default();
                let block = transform(&raw, &type_ref, syntax_key.as_deref());
                encode_blocks(&[block])?
            }
        };
        store.execute(
            "UPDATE spec_floats SET resolved_ast = ?2 WHERE id = ?1",
            &[&id, &resolved],
        )?;
    }
    Ok(())
}

/// Synchronous transform of one float body into a block.
#[must_use]
pub fn transform(raw_content: &str, type_ref: &str, syntax_key: Option<&str>) -> Block {
    match type_ref {
        "table" => Block::Table(parse_table(raw_content)),
        "figure" => Block::Para {
            inlines: vec![Inline::Image {
                inlines: Vec::new(),
                target: raw_content.trim().to_string(),
                title: String::new(),
            }],
            line: 0,
        },
        "equation" => Block::Para {
            inlines: vec![Inline::Code {
                text: raw_content.trim().to_string(),
            }],
            line: 0,
        },
        _ => Block::CodeBlock {
            info: syntax_key.unwrap_or_default().to_string(),
            text: raw_content.to_string(),
            line: 0,
        },
    }
}

#[derive(Debug, Default)]
struct TableMeta {
    header_rows: usize,
    header_cols: usize,
    widths: Vec<f64>,
    aligns: Vec<Alignment>,
}

/// Parse a table float body. List-table when bullet markers (or metadata
/// followed by bullets) lead; otherwise CSV, with TSV detected by tabs in
/// the first line.
fn parse_table(raw: &str) -> Table {
    let mut meta = TableMeta::default();
    let mut body_lines: Vec<&str> = Vec::new();
    let mut in_meta = true;
    for line in raw.lines() {
        if in_meta {
            if let Some((key, value)) = line.trim().split_once(':') {
                if parse_meta(&mut meta, key.trim(), value.trim()) {
                    continue;
                }
            }
            if line.trim().is_empty() {
                continue;
            }
            in_meta = false;
        }
        body_lines.push(line);
    }

    let is_list_table = body_lines
        .first()
        .is_some_and(|l| l.trim_start().starts_with("- "));
    let rows = if is_list_table {
        parse_list_table_rows(&body_lines)
    } else {
        let delimiter = if body_lines.first().is_some_and(|l| l.contains('\t')) {
            '\t'
        } else {
            ','
        };
        body_lines
            .iter()
            .filter(|l| !l.trim().is_empty())
            .map(|l| split_delimited(l, delimiter))
            .collect()
    };
    build_table(rows, &meta)
}

fn parse_meta(meta: &mut TableMeta, key: &str, value: &str) -> bool {
    match key {
        "header-rows" => {
            meta.header_rows = value.parse().unwrap_or(0);
            true
        }
        "header-cols" => {
            meta.header_cols = value.parse().unwrap_or(0);
            true
        }
        "widths" => {
            let widths: Vec<f64> = value
                .split(',')
                .filter_map(|w| w.trim().parse::<f64>().ok())
                .collect();
            let total: f64 = widths.iter().sum();
            meta.widths = if total > 0.0 {
                widths.iter().map(|w| w / total).collect()
            } else {
                Vec::new()
            };
            true
        }
        "aligns" => {
            meta.aligns = value
                .split(',')
                .map(|a| match a.trim() {
                    "l" => Alignment::Left,
                    "c" => Alignment::Center,
                    "r" => Alignment::Right,
                    _ => Alignment::Default,
                })
                .collect();
            true
        }
        _ => false,
    }
}

/// List-table form: top-level bullets are rows, nested bullets are cells.
///
/// ```text
/// - - cell 1
///   - cell 2
/// - - cell 3
///   - cell 4
/// ```
fn parse_list_table_rows(lines: &[&str]) -> Vec<Vec<String>> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    for line in lines {
        let trimmed = line.trim_start();
        let indent = line.len() - trimmed.len();
        let Some(rest) = trimmed.strip_prefix("- ") else {
            continue;
        };
        if indent == 0 {
            // New row; the remainder may itself open the first cell.
            let mut row = Vec::new();
            if let Some(cell) = rest.strip_prefix("- ") {
                row.push(cell.trim().to_string());
            } else if !rest.trim().is_empty() {
                row.push(rest.trim().to_string());
            }
            rows.push(row);
        } else if let Some(row) = rows.last_mut() {
            row.push(rest.trim().to_string());
        }
    }
    rows
}

/// Split one delimited line, honoring double-quoted fields.
fn split_delimited(line: &str, delimiter: char) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        if in_quotes {
            if ch == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(ch);
            }
        } else if ch == '"' && current.is_empty() {
            in_quotes = true;
        } else if ch == delimiter {
            cells.push(current.trim().to_string());
            current = String::new();
        } else {
            current.push(ch);
        }
    }
    cells.push(current.trim().to_string());
    cells
}

fn build_table(rows: Vec<Vec<String>>, meta: &TableMeta) -> Table {
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let header_rows = if meta.header_rows > 0 {
        meta.header_rows
    } else {
        usize::from(!rows.is_empty())
    };

    let cell = |text: &str| -> Vec<Block> {
        vec![Block::Plain {
            inlines: vec![Inline::str(text)],
        }]
    };
    let to_cells = |row: &Vec<String>| -> Vec<Vec<Block>> {
        let mut cells: Vec<Vec<Block>> = row.iter().map(|c| cell(c)).collect();
        cells.resize_with(columns, Vec::new);
        cells
    };

    let mut aligns = meta.aligns.clone();
    aligns.resize(columns, Alignment::Default);
    let mut widths = meta.widths.clone();
    if !widths.is_empty() {
        widths.resize(columns, 0.0);
    }

    let header = rows
        .first()
        .filter(|_| header_rows > 0)
        .map(to_cells)
        .unwrap_or_default();
    let body = rows
        .iter()
        .skip(header_rows.min(rows.len()))
        .map(to_cells)
        .collect();

    Table {
        caption: Vec::new(),
        aligns,
        widths,
        header,
        rows: body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_with_header_and_quotes() {
        let table = parse_table("name,desc\nalpha,\"first, quoted\"\nbeta,second\n");
        assert_eq!(table.header.len(), 2);
        assert_eq!(table.rows.len(), 2);
        let Block::Plain { inlines } = &table.rows[0][1][0] else {
            panic!("expected plain cell");
        };
        assert_eq!(inlines, &[Inline::str("first, quoted")]);
    }

    #[test]
    fn tsv_detection() {
        let table = parse_table("a\tb\n1\t2\n");
        assert_eq!(table.header.len(), 2);
        assert_eq!(table.rows.len(), 1);
    }

    #[test]
    fn list_table_with_metadata() {
        let raw = "\
header-rows: 1
widths: 2, 2
aligns: l, r

- - Name
  - Value
- - alpha
  - 1
";
        let table = parse_table(raw);
        assert_eq!(table.header.len(), 2);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.aligns, vec![Alignment::Left, Alignment::Right]);
        assert!((table.widths[0] - 0.5).abs() < 1e-9);
        assert!((table.widths.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn ragged_rows_are_padded() {
        let table = parse_table("a,b,c\n1\n");
        assert_eq!(table.rows[0].len(), 3);
        assert!(table.rows[0][2].is_empty());
    }

    #[test]
    fn listing_transform_keeps_syntax_key() {
        let block = transform("fn main() {}\n", "listing", Some("rust"));
        let Block::CodeBlock { info, text, .. } = block else {
            panic!("expected code block");
        };
        assert_eq!(info, "rust");
        assert_eq!(text, "fn main() {}\n");
    }

    #[test]
    fn figure_transform_is_an_image() {
        let block = transform("assets/arch.png\n", "figure", None);
        let Block::Para { inlines, .. } = block else {
            panic!("expected para");
        };
        assert!(matches!(&inlines[0], Inline::Image { target, .. } if target == "assets/arch.png"));
    }
}
