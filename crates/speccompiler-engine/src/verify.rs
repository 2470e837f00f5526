//! VERIFY: declarative validation proofs
//!
//! Each proof is a read-only query against the store; findings report at
//! the severity configured for the proof's policy key. Proofs never
//! write and never abort the phase; the emitted diagnostics decide the
//! process exit code.

use anyhow::Result;
use speccompiler_phase_api::Diagnostics;
use speccompiler_store::Store;

/// Run every proof for one specification.
pub fn verify_specification(
    store: &Store,
    spec_rowid: i64,
    diagnostics: &mut Diagnostics,
) -> Result<()> {
    spec_missing_required(store, spec_rowid, diagnostics)?;
    object_missing_required(store, spec_rowid, diagnostics)?;
    object_cardinality_over(store, spec_rowid, diagnostics)?;
    attribute_cast_proofs(store, spec_rowid, diagnostics)?;
    object_duplicate_pid(store, spec_rowid, diagnostics)?;
    float_orphan(store, spec_rowid, diagnostics)?;
    float_duplicate_label(store, spec_rowid, diagnostics)?;
    relation_unresolved(store, spec_rowid, diagnostics)?;
    relation_dangling(store, spec_rowid, diagnostics)?;
    relation_ambiguous(store, spec_rowid, diagnostics)?;
    view_materialization_failure(store, spec_rowid, diagnostics)?;
    Ok(())
}

fn spec_missing_required(
    store: &Store,
    spec_rowid: i64,
    diagnostics: &mut Diagnostics,
) -> Result<()> {
    let incomplete: Option<(String, String)> = store.query_one(
        "SELECT identifier, root_path FROM specifications
         WHERE id = ?1 AND (long_name IS NULL OR long_name = '' OR pid IS NULL)",
        &[&spec_rowid],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    if let Some((identifier, root_path)) = incomplete {
        diagnostics.report(
            "spec_missing_required",
            format!("specification '{identifier}' is missing its title heading"),
            Some(&root_path),
            Some(1),
        );
    }
    Ok(())
}

fn object_missing_required(
    store: &Store,
    spec_rowid: i64,
    diagnostics: &mut Diagnostics,
) -> Result<()> {
    let findings = store.query_all(
        "SELECT o.pid, at.name, at.min_occurs, o.from_file, o.start_line
         FROM spec_objects o
         JOIN attribute_types at ON at.object_type_ref = o.type_ref
         WHERE o.specification_ref = ?1 AND at.min_occurs > 0
           AND (SELECT count(*) FROM attribute_values av
                WHERE av.object_ref = o.id AND av.name = at.name) < at.min_occurs",
        &[&spec_rowid],
        |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<i64>>(4)?,
            ))
        },
    )?;
    for (pid, name, min_occurs, file, line) in findings {
        diagnostics.report(
            "object_missing_required",
            format!(
                "object '{}' requires attribute '{name}' at least {min_occurs} time(s)",
                pid.unwrap_or_default()
            ),
            Some(&file),
            line.and_then(|l| u32::try_from(l).ok()),
        );
    }
    Ok(())
}

fn object_cardinality_over(
    store: &Store,
    spec_rowid: i64,
    diagnostics: &mut Diagnostics,
) -> Result<()> {
    let findings = store.query_all(
        "SELECT o.pid, at.name, at.max_occurs, count(av.id), o.from_file, o.start_line
         FROM spec_objects o
         JOIN attribute_types at ON at.object_type_ref = o.type_ref
         JOIN attribute_values av ON av.object_ref = o.id AND av.name = at.name
         WHERE o.specification_ref = ?1 AND at.max_occurs IS NOT NULL
         GROUP BY o.id, at.name HAVING count(av.id) > at.max_occurs",
        &[&spec_rowid],
        |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<i64>>(5)?,
            ))
        },
    )?;
    for (pid, name, max_occurs, count, file, line) in findings {
        diagnostics.report(
            "object_cardinality_over",
            format!(
                "object '{}' has {count} occurrences of '{name}' (max {max_occurs})",
                pid.unwrap_or_default()
            ),
            Some(&file),
            line.and_then(|l| u32::try_from(l).ok()),
        );
    }
    Ok(())
}

/// Cast failures recorded by the initializer, split by failure kind into
/// the matching policy key.
fn attribute_cast_proofs(
    store: &Store,
    spec_rowid: i64,
    diagnostics: &mut Diagnostics,
) -> Result<()> {
    let findings = store.query_all(
        "SELECT av.name, av.cast_error, av.cast_error_kind, av.from_file, av.line
         FROM attribute_values av
         JOIN spec_objects o ON o.id = av.object_ref
         WHERE o.specification_ref = ?1 AND av.cast_error IS NOT NULL
         ORDER BY av.id",
        &[&spec_rowid],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<i64>>(4)?,
            ))
        },
    )?;
    for (name, error, kind, file, line) in findings {
        let key = match kind.as_deref() {
            Some("enum") => "object_invalid_enum",
            Some("date") => "object_invalid_date",
            Some("bounds") => "object_bounds_violation",
            _ => "object_cast_failures",
        };
        diagnostics.report(
            key,
            format!("attribute '{name}': {error}"),
            file.as_deref(),
            line.and_then(|l| u32::try_from(l).ok()),
        );
    }
    Ok(())
}

fn object_duplicate_pid(
    store: &Store,
    spec_rowid: i64,
    diagnostics: &mut Diagnostics,
) -> Result<()> {
    let findings = store.query_all(
        "SELECT pid, count(*), min(from_file), min(start_line)
         FROM spec_objects
         WHERE specification_ref = ?1 AND pid IS NOT NULL
         GROUP BY pid HAVING count(*) > 1",
        &[&spec_rowid],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<i64>>(3)?,
            ))
        },
    )?;
    for (pid, count, file, line) in findings {
        diagnostics.report(
            "object_duplicate_pid",
            format!("PID '{pid}' is declared by {count} objects"),
            file.as_deref(),
            line.and_then(|l| u32::try_from(l).ok()),
        );
    }
    Ok(())
}

fn float_orphan(store: &Store, spec_rowid: i64, diagnostics: &mut Diagnostics) -> Result<()> {
    let findings = store.query_all(
        "SELECT label, from_file, start_line FROM spec_floats
         WHERE specification_ref = ?1 AND parent_object_id IS NULL",
        &[&spec_rowid],
        |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<i64>>(2)?,
            ))
        },
    )?;
    for (label, file, line) in findings {
        diagnostics.report(
            "float_orphan",
            format!("float '{}' has no enclosing object", label.unwrap_or_default()),
            file.as_deref(),
            line.and_then(|l| u32::try_from(l).ok()),
        );
    }
    Ok(())
}

fn float_duplicate_label(
    store: &Store,
    spec_rowid: i64,
    diagnostics: &mut Diagnostics,
) -> Result<()> {
    let findings = store.query_all(
        "SELECT label, count(*), min(from_file), min(start_line)
         FROM spec_floats
         WHERE specification_ref = ?1 AND label IS NOT NULL AND label != ''
         GROUP BY label HAVING count(*) > 1",
        &[&spec_rowid],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<i64>>(3)?,
            ))
        },
    )?;
    for (label, count, file, line) in findings {
        diagnostics.report(
            "float_duplicate_label",
            format!("float label '{label}' is declared {count} times"),
            file.as_deref(),
            line.and_then(|l| u32::try_from(l).ok()),
        );
    }
    Ok(())
}

fn relation_unresolved(
    store: &Store,
    spec_rowid: i64,
    diagnostics: &mut Diagnostics,
) -> Result<()> {
    let findings = store.query_all(
        "SELECT link_selector, target_text, from_file, link_line
         FROM spec_relations
         WHERE specification_ref = ?1
           AND target_object_id IS NULL AND target_float_id IS NULL",
        &[&spec_rowid],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<i64>>(3)?,
            ))
        },
    )?;
    for (selector, text, file, line) in findings {
        diagnostics.report(
            "relation_unresolved",
            format!("reference '{text}' ({selector}) has no target"),
            file.as_deref(),
            line.and_then(|l| u32::try_from(l).ok()),
        );
    }
    Ok(())
}

fn relation_dangling(
    store: &Store,
    spec_rowid: i64,
    diagnostics: &mut Diagnostics,
) -> Result<()> {
    let findings = store.query_all(
        "SELECT target_text, from_file, link_line
         FROM spec_relations
         WHERE specification_ref = ?1
           AND ((target_object_id IS NOT NULL
                 AND target_object_id NOT IN (SELECT id FROM spec_objects))
             OR (target_float_id IS NOT NULL
                 AND target_float_id NOT IN (SELECT id FROM spec_floats)))",
        &[&spec_rowid],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<i64>>(2)?,
            ))
        },
    )?;
    for (text, file, line) in findings {
        diagnostics.report(
            "relation_dangling",
            format!("resolved reference '{text}' points at a deleted target"),
            file.as_deref(),
            line.and_then(|l| u32::try_from(l).ok()),
        );
    }
    Ok(())
}

fn relation_ambiguous(
    store: &Store,
    spec_rowid: i64,
    diagnostics: &mut Diagnostics,
) -> Result<()> {
    let findings = store.query_all(
        "SELECT target_text, link_selector, from_file, link_line
         FROM spec_relations
         WHERE specification_ref = ?1 AND is_ambiguous = 1",
        &[&spec_rowid],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<i64>>(3)?,
            ))
        },
    )?;
    for (text, selector, file, line) in findings {
        diagnostics.report(
            "relation_ambiguous",
            format!("reference '{text}' ({selector}) matched more than one candidate"),
            file.as_deref(),
            line.and_then(|l| u32::try_from(l).ok()),
        );
    }
    Ok(())
}

fn view_materialization_failure(
    store: &Store,
    spec_rowid: i64,
    diagnostics: &mut Diagnostics,
) -> Result<()> {
    let findings = store.query_all(
        "SELECT type_ref, from_file, start_line
         FROM spec_views
         WHERE specification_ref = ?1
           AND resolved_data IS NULL AND resolved_ast IS NULL",
        &[&spec_rowid],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<i64>>(2)?,
            ))
        },
    )?;
    for (type_ref, file, line) in findings {
        diagnostics.report(
            "view_materialization_failure",
            format!("view '{type_ref}' has no materialized content"),
            file.as_deref(),
            line.and_then(|l| u32::try_from(l).ok()),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use speccompiler_model::TypeRegistry;
    use speccompiler_phase_api::Severity;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn setup() -> (Store, i64) {
        let dir = TempDir::new().unwrap();
        let store = Store::open_in_memory().unwrap();
        TypeRegistry::load(dir.path(), "default")
            .unwrap()
            .persist(&store)
            .unwrap();
        store
            .execute(
                "INSERT INTO specifications(identifier, root_path, long_name, pid)
                 VALUES('a', 'a.md', 'Spec A', 'A')",
                &[],
            )
            .unwrap();
        let spec = store.last_insert_rowid();
        (store, spec)
    }

    fn keys(diags: &Diagnostics) -> Vec<String> {
        diags
            .records()
            .iter()
            .filter_map(|d| d.key.clone())
            .collect()
    }

    #[test]
    fn clean_specification_passes_all_proofs() {
        let (store, spec) = setup();
        let mut diags = Diagnostics::collecting(BTreeMap::new());
        verify_specification(&store, spec, &mut diags).unwrap();
        assert_eq!(diags.records().len(), 0);
    }

    #[test]
    fn duplicate_pids_and_orphan_floats_are_reported() {
        let (store, spec) = setup();
        for seq in 1..=2 {
            store
                .execute(
                    "INSERT INTO spec_objects(content_sha, specification_ref, type_ref,
                        from_file, file_seq, pid, title_text, label, level)
                     VALUES('x', ?1, 'HLR', 'a.md', ?2, 'HLR-001', 't', 'l' || ?2, 2)",
                    &[&spec, &seq],
                )
                .unwrap();
        }
        store
            .execute(
                "INSERT INTO spec_floats(content_sha, specification_ref, type_ref, from_file,
                    file_seq, label, raw_content)
                 VALUES('x', ?1, 'figure', 'a.md', 3, 'fig', '')",
                &[&spec],
            )
            .unwrap();

        let mut diags = Diagnostics::collecting(BTreeMap::new());
        verify_specification(&store, spec, &mut diags).unwrap();
        let keys = keys(&diags);
        assert!(keys.contains(&"object_duplicate_pid".to_string()));
        assert!(keys.contains(&"float_orphan".to_string()));
        assert!(diags.has_errors());
    }

    #[test]
    fn missing_required_attribute_is_reported() {
        let (store, spec) = setup();
        // TERM requires `definition`.
        store
            .execute(
                "INSERT INTO spec_objects(content_sha, specification_ref, type_ref, from_file,
                    file_seq, pid, title_text, label, level)
                 VALUES('x', ?1, 'TERM', 'a.md', 1, 'T-1', 'term', 'term', 2)",
                &[&spec],
            )
            .unwrap();
        let mut diags = Diagnostics::collecting(BTreeMap::new());
        verify_specification(&store, spec, &mut diags).unwrap();
        assert!(keys(&diags).contains(&"object_missing_required".to_string()));
    }

    #[test]
    fn cast_error_kinds_map_to_policy_keys() {
        let (store, spec) = setup();
        store
            .execute(
                "INSERT INTO spec_objects(content_sha, specification_ref, type_ref, from_file,
                    file_seq, pid, title_text, label, level)
                 VALUES('x', ?1, 'HLR', 'a.md', 1, 'HLR-001', 't', 'l', 2)",
                &[&spec],
            )
            .unwrap();
        let object = store.last_insert_rowid();
        for (kind, _key) in [
            ("enum", "object_invalid_enum"),
            ("date", "object_invalid_date"),
            ("bounds", "object_bounds_violation"),
            ("cast", "object_cast_failures"),
        ] {
            store
                .execute(
                    "INSERT INTO attribute_values(object_ref, name, raw_value, datatype,
                        cast_error, cast_error_kind)
                     VALUES(?1, 'attr', 'bad', 'STRING', 'failed', ?2)",
                    &[&object, &kind],
                )
                .unwrap();
        }
        let mut diags = Diagnostics::collecting(BTreeMap::new());
        verify_specification(&store, spec, &mut diags).unwrap();
        let keys = keys(&diags);
        for key in [
            "object_invalid_enum",
            "object_invalid_date",
            "object_bounds_violation",
            "object_cast_failures",
        ] {
            assert!(keys.contains(&key.to_string()), "missing {key}");
        }
    }

    #[test]
    fn severity_override_downgrades_unresolved_relations() {
        let (store, spec) = setup();
        store
            .execute(
                "INSERT INTO spec_relations(specification_ref, target_text, link_selector)
                 VALUES(?1, 'GHOST', '@')",
                &[&spec],
            )
            .unwrap();
        let mut overrides = BTreeMap::new();
        overrides.insert("relation_unresolved".to_string(), Severity::Warn);
        let mut diags = Diagnostics::collecting(overrides);
        verify_specification(&store, spec, &mut diags).unwrap();
        assert!(!diags.has_errors());
        assert_eq!(diags.warn_count(), 1);
    }
}
