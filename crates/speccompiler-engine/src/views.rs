//! TRANSFORM: view materialization
//!
//! Views are placeholders for generated content. The materializer
//! pre-computes each view's dataset into `resolved_data` (JSON); the
//! assembler turns datasets into blocks at EMIT. Externally rendered view
//! types (inline math) are left to the render orchestrator.

use anyhow::Result;
use serde_json::{Value, json};
use speccompiler_model::TypeRegistry;
use speccompiler_phase_api::Diagnostics;
use speccompiler_store::Store;

use crate::syntax;

/// Materialize every view of one specification.
pub fn materialize_views(
    store: &Store,
    registry: &TypeRegistry,
    spec_rowid: i64,
    diagnostics: &mut Diagnostics,
) -> Result<()> {
    let views = store.query_all(
        "SELECT id, type_ref, raw_content, from_file, start_line
         FROM spec_views WHERE specification_ref = ?1 ORDER BY file_seq",
        &[&spec_rowid],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<i64>>(4)?,
            ))
        },
    )?;

    // Definitions first, so an abbreviation list placed ahead of its
    // definitions still sees the full set.
    let mut views = views;
    views.sort_by_key(|(_, type_ref, ..)| {
        let is_def = registry
            .view_type(type_ref)
            .and_then(|vt| vt.materializer_type.as_deref())
            == Some("abbrev_def");
        !is_def
    });

    for (id, type_ref, raw_content, from_file, start_line) in views {
        let Some(view_type) = registry.view_type(&type_ref) else {
            continue;
        };
        if view_type.needs_external_render {
            continue;
        }
        let materializer = view_type.materializer_type.as_deref().unwrap_or("custom");
        let data = match materializer {
            "toc" => Some(toc_data(store, spec_rowid)?),
            "lof" => {
                let group = view_type
                    .counter_group
                    .as_deref()
                    .unwrap_or(&view_type.identifier);
                Some(lof_data(store, spec_rowid, group)?)
            }
            "abbrev_def" => abbrev_def_data(raw_content.as_deref().unwrap_or_default()),
            "abbrev_list" => Some(abbrev_list_data(store, spec_rowid)?),
            _ => None,
        };

        match data {
            Some(value) => {
                store.execute(
                    "UPDATE spec_views SET resolved_data = ?2 WHERE id = ?1",
                    &[&id, &value.to_string()],
                )?;
            }
            None => {
                let line = start_line.and_then(|l| u32::try_from(l).ok());
                diagnostics.report(
                    "view_materialization_failure",
                    format!("view '{type_ref}' produced no output"),
                    from_file.as_deref(),
                    line,
                );
            }
        }
    }
    Ok(())
}

/// All objects of the spec in file order.
fn toc_data(store: &Store, spec_rowid: i64) -> Result<Value> {
    let entries = store.query_all(
        "SELECT pid, title_text, label, level FROM spec_objects
         WHERE specification_ref = ?1 ORDER BY file_seq",
        &[&spec_rowid],
        |row| {
            Ok(json!({
                "pid": row.get::<_, Option<String>>(0)?,
                "title": row.get::<_, Option<String>>(1)?,
                "label": row.get::<_, Option<String>>(2)?,
                "level": row.get::<_, i64>(3)?,
            }))
        },
    )?;
    Ok(Value::Array(entries))
}

/// Captioned floats of one counter group in file order.
fn lof_data(store: &Store, spec_rowid: i64, counter_group: &str) -> Result<Value> {
    let entries = store.query_all(
        "SELECT f.label, coalesce(f.anchor, f.label), f.caption, f.number,
                coalesce(ft.caption_format, f.type_ref)
         FROM spec_floats f
         LEFT JOIN float_types ft ON ft.identifier = f.type_ref
         WHERE f.specification_ref = ?1
           AND coalesce(ft.counter_group, f.type_ref) = ?2
           AND f.number IS NOT NULL
         ORDER BY f.file_seq",
        &[&spec_rowid, &counter_group],
        |row| {
            Ok(json!({
                "label": row.get::<_, Option<String>>(0)?,
                "anchor": row.get::<_, Option<String>>(1)?,
                "caption": row.get::<_, Option<String>>(2)?,
                "number": row.get::<_, i64>(3)?,
                "caption_format": row.get::<_, String>(4)?,
            }))
        },
    )?;
    Ok(Value::Array(entries))
}

/// `abbrev: ABBR = meaning` definition.
fn abbrev_def_data(raw_content: &str) -> Option<Value> {
    let inline = syntax::parse_inline_view(raw_content)?;
    let (abbrev, meaning) = inline.content.split_once('=')?;
    let abbrev = abbrev.trim();
    let meaning = meaning.trim();
    if abbrev.is_empty() || meaning.is_empty() {
        return None;
    }
    Some(json!({ "abbrev": abbrev, "meaning": meaning }))
}

/// Distinct `(abbrev, meaning)` pairs sorted by uppercase abbreviation.
fn abbrev_list_data(store: &Store, spec_rowid: i64) -> Result<Value> {
    let defs = store.query_all(
        "SELECT v.resolved_data FROM spec_views v
         JOIN view_types vt ON vt.identifier = v.type_ref
         WHERE v.specification_ref = ?1 AND vt.materializer_type = 'abbrev_def'
           AND v.resolved_data IS NOT NULL",
        &[&spec_rowid],
        |row| row.get::<_, String>(0),
    )?;
    let mut pairs: Vec<(String, String)> = defs
        .iter()
        .filter_map(|raw| serde_json::from_str::<Value>(raw).ok())
        .filter_map(|v| {
            Some((
                v.get("abbrev")?.as_str()?.to_string(),
                v.get("meaning")?.as_str()?.to_string(),
            ))
        })
        .collect();
    pairs.sort_by(|a, b| a.0.to_uppercase().cmp(&b.0.to_uppercase()));
    pairs.dedup();
    Ok(Value::Array(
        pairs
            .into_iter()
            .map(|(abbrev, meaning)| json!({ "abbrev": abbrev, "meaning": meaning }))
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use speccompiler_model::TypeRegistry;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn setup() -> (Store, TypeRegistry, i64) {
        let dir = TempDir::new().unwrap();
        let store = Store::open_in_memory().unwrap();
        let registry = TypeRegistry::load(dir.path(), "default").unwrap();
        registry.persist(&store).unwrap();
        store
            .execute(
                "INSERT INTO specifications(identifier, root_path) VALUES('a', 'a.md')",
                &[],
            )
            .unwrap();
        let spec = store.last_insert_rowid();
        (store, registry, spec)
    }

    fn add_view(store: &Store, spec: i64, type_ref: &str, seq: i64, raw: &str, inline: bool) -> i64 {
        store
            .execute(
                "INSERT INTO spec_views(specification_ref, type_ref, file_seq, raw_content,
                    is_inline)
                 VALUES(?1, ?2, ?3, ?4, ?5)",
                &[&spec, &type_ref, &seq, &raw, &inline],
            )
            .unwrap();
        store.last_insert_rowid()
    }

    fn resolved(store: &Store, id: i64) -> Option<String> {
        store
            .query_one(
                "SELECT resolved_data FROM spec_views WHERE id = ?1",
                &[&id],
                |r| r.get(0),
            )
            .unwrap()
            .unwrap()
    }

    #[test]
    fn toc_lists_objects_in_file_order() {
        let (store, registry, spec) = setup();
        for (seq, pid) in [(1, "HLR-001"), (2, "HLR-002")] {
            store
                .execute(
                    "INSERT INTO spec_objects(content_sha, specification_ref, type_ref,
                        from_file, file_seq, pid, title_text, label, level)
                     VALUES('x', ?1, 'HLR', 'a.md', ?2, ?3, ?3, lower(?3), 2)",
                    &[&spec, &seq, &pid],
                )
                .unwrap();
        }
        let toc = add_view(&store, spec, "toc", 3, "", false);
        let mut diags = Diagnostics::collecting(BTreeMap::new());
        materialize_views(&store, &registry, spec, &mut diags).unwrap();

        let data: Value = serde_json::from_str(&resolved(&store, toc).unwrap()).unwrap();
        let pids: Vec<&str> = data
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["pid"].as_str().unwrap())
            .collect();
        assert_eq!(pids, vec!["HLR-001", "HLR-002"]);
    }

    #[test]
    fn lof_includes_only_numbered_floats_of_its_group() {
        let (store, registry, spec) = setup();
        store
            .execute(
                "INSERT INTO spec_floats(content_sha, specification_ref, type_ref, from_file,
                    file_seq, label, caption, number, raw_content)
                 VALUES('x', ?1, 'figure', 'a.md', 1, 'one', 'Captioned', 1, ''),
                        ('y', ?1, 'figure', 'a.md', 2, 'two', NULL, NULL, ''),
                        ('z', ?1, 'table', 'a.md', 3, 'three', 'Tab', 1, '')",
                &[&spec],
            )
            .unwrap();
        let lof = add_view(&store, spec, "lof", 4, "", false);
        let mut diags = Diagnostics::collecting(BTreeMap::new());
        materialize_views(&store, &registry, spec, &mut diags).unwrap();

        let data: Value = serde_json::from_str(&resolved(&store, lof).unwrap()).unwrap();
        let labels: Vec<&str> = data
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["label"].as_str().unwrap())
            .collect();
        assert_eq!(labels, vec!["one"]);
    }

    #[test]
    fn abbrev_defs_feed_the_sorted_list() {
        let (store, registry, spec) = setup();
        let zulu = add_view(&store, spec, "abbrev", 1, "abbrev: ZX = Zulu Exchange", true);
        let alpha = add_view(&store, spec, "abbrev", 2, "abbrev: api = app interface", true);
        let list = add_view(&store, spec, "abbreviations", 3, "abbreviations:", true);
        let mut diags = Diagnostics::collecting(BTreeMap::new());
        materialize_views(&store, &registry, spec, &mut diags).unwrap();

        assert!(resolved(&store, zulu).is_some());
        assert!(resolved(&store, alpha).is_some());
        let data: Value = serde_json::from_str(&resolved(&store, list).unwrap()).unwrap();
        let abbrevs: Vec<&str> = data
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["abbrev"].as_str().unwrap())
            .collect();
        assert_eq!(abbrevs, vec!["api", "ZX"]);
    }

    #[test]
    fn malformed_abbrev_reports_materialization_failure() {
        let (store, registry, spec) = setup();
        let bad = add_view(&store, spec, "abbrev", 1, "abbrev: no equals sign", true);
        let mut diags = Diagnostics::collecting(BTreeMap::new());
        materialize_views(&store, &registry, spec, &mut diags).unwrap();
        assert_eq!(resolved(&store, bad), None);
        assert_eq!(diags.warn_count(), 1);
    }
}
