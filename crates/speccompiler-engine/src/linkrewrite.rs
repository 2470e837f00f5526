//! TRANSFORM: link rewriting
//!
//! Resolved relations drive a rewrite of every stored block and attribute
//! AST: link targets become final anchors (`#pid`, `#label`, or
//! `{spec}.ext#anchor` across documents) and link bodies become display
//! text (section titles, PIDs, or `Figure N`). The `.ext` sentinel is
//! swapped for the real extension per output format at EMIT.
//!
//! Only links whose target is exactly a registered selector are touched,
//! so running the rewrite twice leaves already-rewritten links alone.

use anyhow::Result;
use speccompiler_doc::ast::{decode_blocks, encode_blocks};
use speccompiler_doc::{Inline, stringify_inlines, walk_inlines_mut};
use speccompiler_model::TypeRegistry;
use speccompiler_store::Store;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct RewriteEntry {
    target_spec: String,
    anchor: String,
    display: String,
}

type RewriteKey = (i64, String, String);

/// Rewrite all links of one specification.
pub fn rewrite_links(
    store: &Store,
    registry: &TypeRegistry,
    spec_rowid: i64,
    spec_identifier: &str,
) -> Result<()> {
    let lookup = build_lookup(store, registry, spec_rowid)?;
    let selectors = registry.selectors();

    let objects = store.query_all(
        "SELECT id, ast FROM spec_objects WHERE specification_ref = ?1 AND ast IS NOT NULL",
        &[&spec_rowid],
        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
    )?;
    for (object_id, ast_json) in objects {
        if let Some(updated) =
            rewrite_ast(&ast_json, object_id, spec_identifier, &lookup, &selectors)?
        {
            store.execute(
                "UPDATE spec_objects SET ast = ?2 WHERE id = ?1",
                &[&object_id, &updated],
            )?;
        }
    }

    let attributes = store.query_all(
        "SELECT av.id, av.object_ref, av.ast
         FROM attribute_values av
         JOIN spec_objects o ON o.id = av.object_ref
         WHERE o.specification_ref = ?1 AND av.ast IS NOT NULL",
        &[&spec_rowid],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        },
    )?;
    for (attr_id, object_id, ast_json) in attributes {
        if let Some(updated) =
            rewrite_ast(&ast_json, object_id, spec_identifier, &lookup, &selectors)?
        {
            store.execute(
                "UPDATE attribute_values SET ast = ?2 WHERE id = ?1",
                &[&attr_id, &updated],
            )?;
        }
    }
    Ok(())
}

fn rewrite_ast(
    ast_json: &str,
    source_object_id: i64,
    spec_identifier: &str,
    lookup: &BTreeMap<RewriteKey, RewriteEntry>,
    selectors: &[String],
) -> Result<Option<String>> {
    let mut blocks = decode_blocks(ast_json)?;
    walk_inlines_mut(&mut blocks, &mut |inline| {
        let Inline::Link {
            inlines, target, ..
        } = inline
        else {
            return;
        };
        if !selectors.iter().any(|s| s == target) {
            return;
        }
        let text = stringify_inlines(inlines).trim().to_string();
        let key = (source_object_id, target.clone(), text.clone());
        if let Some(entry) = lookup.get(&key) {
            if entry.target_spec == spec_identifier {
                *target = format!("#{}", entry.anchor);
            } else {
                *target = format!("{}.ext#{}", entry.target_spec, entry.anchor);
            }
            *inlines = vec![Inline::str(entry.display.clone())];
        } else if target == "@" || target == "#" {
            // Conservative fallback: keep the body, point the target at
            // an anchor-like string with any type qualifier stripped.
            let anchor = text.rsplit(':').next().unwrap_or(&text).to_string();
            *target = format!("#{anchor}");
        }
    });
    let updated = encode_blocks(&blocks)?;
    if updated == ast_json {
        Ok(None)
    } else {
        Ok(Some(updated))
    }
}

fn build_lookup(
    store: &Store,
    registry: &TypeRegistry,
    spec_rowid: i64,
) -> Result<BTreeMap<RewriteKey, RewriteEntry>> {
    let mut lookup = BTreeMap::new();

    let object_targets = store.query_all(
        "SELECT r.source_object_id, r.link_selector, r.target_text,
                t.pid, t.title_text, ot.is_composite, s.identifier
         FROM spec_relations r
         JOIN spec_objects t ON t.id = r.target_object_id
         JOIN specifications s ON s.id = t.specification_ref
         LEFT JOIN object_types ot ON ot.identifier = t.type_ref
         WHERE r.specification_ref = ?1 AND r.type_ref IS NOT NULL
           AND r.target_object_id IS NOT NULL AND r.source_object_id IS NOT NULL",
        &[&spec_rowid],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<bool>>(5)?,
                row.get::<_, String>(6)?,
            ))
        },
    )?;
    let this_spec: Option<String> = store.query_one(
        "SELECT identifier FROM specifications WHERE id = ?1",
        &[&spec_rowid],
        |row| row.get(0),
    )?;
    let this_spec = this_spec.unwrap_or_default();

    for (source, selector, text, pid, title, is_composite, target_spec) in object_targets {
        let pid = pid.unwrap_or_default();
        let display = if is_composite.unwrap_or(false) {
            let title = title.unwrap_or_else(|| pid.clone());
            if target_spec == this_spec {
                title
            } else {
                format!("{target_spec}: {title}")
            }
        } else {
            pid.clone()
        };
        lookup.insert(
            (source, selector, text),
            RewriteEntry {
                target_spec,
                anchor: pid,
                display,
            },
        );
    }

    let float_targets = store.query_all(
        "SELECT r.source_object_id, r.link_selector, r.target_text,
                coalesce(f.anchor, f.label), f.number, f.label,
                coalesce(ft.caption_format, f.type_ref), s.identifier
         FROM spec_relations r
         JOIN spec_floats f ON f.id = r.target_float_id
         JOIN specifications s ON s.id = f.specification_ref
         LEFT JOIN float_types ft ON ft.identifier = f.type_ref
         WHERE r.specification_ref = ?1 AND r.type_ref IS NOT NULL
           AND r.target_float_id IS NOT NULL AND r.source_object_id IS NOT NULL",
        &[&spec_rowid],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
            ))
        },
    )?;

    for (source, selector, text, anchor, number, label, caption_format, target_spec) in
        float_targets
    {
        let anchor = anchor.or(label.clone()).unwrap_or_default();
        let display = match number {
            Some(n) => format!("{caption_format} {n}"),
            None => label.unwrap_or_else(|| anchor.clone()),
        };
        let entry = RewriteEntry {
            target_spec,
            anchor,
            display,
        };
        // Alias fan-out: `plantuml:label` and `puml:label` are the same
        // authored reference.
        for variant in target_text_variants(registry, &text) {
            lookup.insert((source, selector.clone(), variant), entry.clone());
        }
    }
    Ok(lookup)
}

/// All spellings of a float-typed target text across the type's aliases.
fn target_text_variants(registry: &TypeRegistry, text: &str) -> Vec<String> {
    let mut variants = vec![text.to_string()];
    let Some((qualifier, rest)) = text.split_once(':') else {
        return variants;
    };
    let Some(float_type) = registry.resolve_float(qualifier) else {
        return variants;
    };
    let mut names = vec![float_type.identifier.clone()];
    names.extend(float_type.aliases.iter().cloned());
    for name in names {
        let variant = format!("{name}:{rest}");
        if !variants.contains(&variant) {
            variants.push(variant);
        }
    }
    variants
}
