//! ANALYZE: stale-reference sweep and relation resolution
//!
//! Before resolution, a store-wide sweep nulls the target and type of any
//! relation pointing at a row deleted by this pass's re-initialization;
//! those relations rejoin the unresolved working set regardless of which
//! specification owns them. Resolution then runs in two independent
//! steps: target lookup by selector and scope, and type inference by
//! specificity scoring over `(selector, source attribute, source type,
//! target type)`.

use anyhow::Result;
use speccompiler_phase_api::Diagnostics;
use speccompiler_store::Store;
use tracing::debug;

/// Null out relations whose resolved target row no longer exists.
///
/// Returns the number of swept relations.
pub fn stale_reference_sweep(store: &Store) -> Result<usize> {
    let swept = store.execute(
        "UPDATE spec_relations
         SET target_object_id = NULL, target_float_id = NULL, type_ref = NULL,
             is_ambiguous = 0
         WHERE (target_object_id IS NOT NULL
                AND target_object_id NOT IN (SELECT id FROM spec_objects))
            OR (target_float_id IS NOT NULL
                AND target_float_id NOT IN (SELECT id FROM spec_floats))",
        &[],
    )?;
    if swept > 0 {
        debug!(swept, "stale-reference sweep invalidated relations");
    }
    Ok(swept)
}

#[derive(Debug)]
struct UnresolvedRelation {
    id: i64,
    spec_rowid: i64,
    source_object_id: Option<i64>,
    target_text: String,
    link_selector: String,
    source_attribute: Option<String>,
    from_file: Option<String>,
    link_line: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Object(i64),
    Float(i64),
}

#[derive(Debug)]
struct TargetHit {
    target: Target,
    ambiguous: bool,
}

#[derive(Debug)]
struct CandidateType {
    identifier: String,
    link_selector: Option<String>,
    source_type_ref: Option<String>,
    target_type_ref: Option<String>,
    source_attribute: Option<String>,
}

/// Resolve every unresolved relation in the store.
pub fn analyze_relations(store: &Store, diagnostics: &mut Diagnostics) -> Result<()> {
    let unresolved = store.query_all(
        "SELECT id, specification_ref, source_object_id, target_text, link_selector,
                source_attribute, from_file, link_line
         FROM spec_relations
         WHERE target_object_id IS NULL AND target_float_id IS NULL
         ORDER BY id",
        &[],
        |row| {
            Ok(UnresolvedRelation {
                id: row.get(0)?,
                spec_rowid: row.get(1)?,
                source_object_id: row.get(2)?,
                target_text: row.get(3)?,
                link_selector: row.get(4)?,
                source_attribute: row.get(5)?,
                from_file: row.get(6)?,
                link_line: row.get(7)?,
            })
        },
    )?;
    if unresolved.is_empty() {
        return Ok(());
    }

    // Abstract bases (named by some extends) never participate in scoring.
    let candidates = store.query_all(
        "SELECT identifier, link_selector, source_type_ref, target_type_ref, source_attribute
         FROM relation_types
         WHERE identifier NOT IN
            (SELECT DISTINCT extends FROM relation_types WHERE extends IS NOT NULL)
         ORDER BY identifier",
        &[],
        |row| {
            Ok(CandidateType {
                identifier: row.get(0)?,
                link_selector: row.get(1)?,
                source_type_ref: row.get(2)?,
                target_type_ref: row.get(3)?,
                source_attribute: row.get(4)?,
            })
        },
    )?;

    for relation in unresolved {
        let Some(hit) = resolve_target(store, &relation)? else {
            continue;
        };
        let mut ambiguous = hit.ambiguous;

        let target_type: Option<String> = match hit.target {
            Target::Object(id) => store.query_one(
                "SELECT type_ref FROM spec_objects WHERE id = ?1",
                &[&id],
                |row| row.get(0),
            )?,
            Target::Float(id) => store.query_one(
                "SELECT type_ref FROM spec_floats WHERE id = ?1",
                &[&id],
                |row| row.get(0),
            )?,
        };
        let source_type: Option<String> = match relation.source_object_id {
            Some(id) => store.query_one(
                "SELECT type_ref FROM spec_objects WHERE id = ?1",
                &[&id],
                |row| row.get(0),
            )?,
            None => None,
        };

        let (type_ref, tie) = infer_type(
            &candidates,
            &relation.link_selector,
            relation.source_attribute.as_deref(),
            source_type.as_deref(),
            target_type.as_deref(),
        );
        if tie {
            ambiguous = true;
        }
        let Some(type_ref) = type_ref else {
            // Every candidate was eliminated by a constraint mismatch;
            // the relation stays unresolved for the verifier to report.
            continue;
        };

        if ambiguous {
            let line = relation.link_line.and_then(|l| u32::try_from(l).ok());
            diagnostics.report(
                "relation_ambiguous",
                format!(
                    "ambiguous reference '{}' ({}): resolved to {:?} as '{type_ref}'",
                    relation.target_text, relation.link_selector, hit.target
                ),
                relation.from_file.as_deref(),
                line,
            );
        }

        let (target_object_id, target_float_id) = match hit.target {
            Target::Object(id) => (Some(id), None),
            Target::Float(id) => (None, Some(id)),
        };
        store.execute(
            "UPDATE spec_relations
             SET target_object_id = ?2, target_float_id = ?3, type_ref = ?4, is_ambiguous = ?5
             WHERE id = ?1",
            &[
                &relation.id,
                &target_object_id,
                &target_float_id,
                &type_ref,
                &ambiguous,
            ],
        )?;
    }
    Ok(())
}

/// Target resolution per selector family.
fn resolve_target(store: &Store, relation: &UnresolvedRelation) -> Result<Option<TargetHit>> {
    if relation.link_selector.starts_with('@') {
        return resolve_pid_target(store, relation);
    }
    resolve_label_target(store, relation)
}

/// `@`-family: target text is a PID, same specification first, then any.
/// PID comparison is case-sensitive (SQLite TEXT equality).
fn resolve_pid_target(
    store: &Store,
    relation: &UnresolvedRelation,
) -> Result<Option<TargetHit>> {
    let local: Option<i64> = store.query_one(
        "SELECT id FROM spec_objects
         WHERE specification_ref = ?1 AND pid = ?2 ORDER BY id LIMIT 1",
        &[&relation.spec_rowid, &relation.target_text],
        |row| row.get(0),
    )?;
    if let Some(id) = local {
        return Ok(Some(TargetHit {
            target: Target::Object(id),
            ambiguous: false,
        }));
    }
    let global: Option<i64> = store.query_one(
        "SELECT id FROM spec_objects WHERE pid = ?1 ORDER BY id LIMIT 1",
        &[&relation.target_text],
        |row| row.get(0),
    )?;
    Ok(global.map(|id| TargetHit {
        target: Target::Object(id),
        ambiguous: false,
    }))
}

/// `#`: `label`, `type:label`, `scope_pid:label` or `scope_pid:type:label`.
fn resolve_label_target(
    store: &Store,
    relation: &UnresolvedRelation,
) -> Result<Option<TargetHit>> {
    let parts: Vec<&str> = relation.target_text.split(':').collect();
    match parts.as_slice() {
        [label] => resolve_bare_label(store, relation.spec_rowid, label),
        [qualifier, label] => {
            // A qualifier naming a float type (canonically or by alias)
            // filters by type; otherwise it is a scope PID.
            if let Some(type_ref) = float_type_for(store, qualifier)? {
                resolve_typed_label(store, relation.spec_rowid, Some(&type_ref), label)
            } else {
                resolve_scoped_label(store, relation, qualifier, None, label)
            }
        }
        [scope, qualifier, label] => {
            let type_ref = float_type_for(store, qualifier)?;
            resolve_scoped_label(store, relation, scope, type_ref.as_deref(), label)
        }
        _ => Ok(None),
    }
}

fn float_type_for(store: &Store, name: &str) -> Result<Option<String>> {
    let needle = name.trim().to_lowercase();
    let wrapped = format!(",{needle},");
    Ok(store.query_one(
        "SELECT identifier FROM float_types
         WHERE lower(identifier) = ?1 OR instr(aliases, ?2) > 0
         ORDER BY identifier LIMIT 1",
        &[&needle, &wrapped],
        |row| row.get(0),
    )?)
}

/// Bare label: same spec across objects and floats, then global.
/// Multiple hits at the tightest scope mark the relation ambiguous but
/// still pick deterministically (objects before floats, rowid ascending).
fn resolve_bare_label(
    store: &Store,
    spec_rowid: i64,
    label: &str,
) -> Result<Option<TargetHit>> {
    for scope in [Some(spec_rowid), None] {
        let mut hits: Vec<Target> = Vec::new();
        let (object_sql, float_sql): (&str, &str) = if scope.is_some() {
            (
                "SELECT id FROM spec_objects
                 WHERE specification_ref = ?1 AND label = ?2 ORDER BY id",
                "SELECT id FROM spec_floats
                 WHERE specification_ref = ?1 AND label = ?2 ORDER BY id",
            )
        } else {
            (
                "SELECT id FROM spec_objects WHERE label = ?1 ORDER BY id",
                "SELECT id FROM spec_floats WHERE label = ?1 ORDER BY id",
            )
        };
        let objects: Vec<i64> = match scope {
            Some(spec) => store.query_all(object_sql, &[&spec, &label], |r| r.get(0))?,
            None => store.query_all(object_sql, &[&label], |r| r.get(0))?,
        };
        let floats: Vec<i64> = match scope {
            Some(spec) => store.query_all(float_sql, &[&spec, &label], |r| r.get(0))?,
            None => store.query_all(float_sql, &[&label], |r| r.get(0))?,
        };
        hits.extend(objects.into_iter().map(Target::Object));
        hits.extend(floats.into_iter().map(Target::Float));
        if let Some(first) = hits.first() {
            return Ok(Some(TargetHit {
                target: *first,
                ambiguous: hits.len() > 1,
            }));
        }
    }
    Ok(None)
}

/// `type:label`: floats of that type, same spec first, then global.
fn resolve_typed_label(
    store: &Store,
    spec_rowid: i64,
    type_ref: Option<&str>,
    label: &str,
) -> Result<Option<TargetHit>> {
    for scope in [Some(spec_rowid), None] {
        let hits: Vec<i64> = match (scope, type_ref) {
            (Some(spec), Some(t)) => store.query_all(
                "SELECT id FROM spec_floats
                 WHERE specification_ref = ?1 AND type_ref = ?2 AND label = ?3 ORDER BY id",
                &[&spec, &t, &label],
                |r| r.get(0),
            )?,
            (Some(spec), None) => store.query_all(
                "SELECT id FROM spec_floats
                 WHERE specification_ref = ?1 AND label = ?2 ORDER BY id",
                &[&spec, &label],
                |r| r.get(0),
            )?,
            (None, Some(t)) => store.query_all(
                "SELECT id FROM spec_floats WHERE type_ref = ?1 AND label = ?2 ORDER BY id",
                &[&t, &label],
                |r| r.get(0),
            )?,
            (None, None) => store.query_all(
                "SELECT id FROM spec_floats WHERE label = ?1 ORDER BY id",
                &[&label],
                |r| r.get(0),
            )?,
        };
        if let Some(first) = hits.first() {
            return Ok(Some(TargetHit {
                target: Target::Float(*first),
                ambiguous: hits.len() > 1,
            }));
        }
    }
    Ok(None)
}

/// `scope_pid:[type:]label`: resolve the scope object (same spec first),
/// then search its floats.
fn resolve_scoped_label(
    store: &Store,
    relation: &UnresolvedRelation,
    scope_pid: &str,
    type_ref: Option<&str>,
    label: &str,
) -> Result<Option<TargetHit>> {
    let scope: Option<i64> = store
        .query_one(
            "SELECT id FROM spec_objects
             WHERE specification_ref = ?1 AND pid = ?2 ORDER BY id LIMIT 1",
            &[&relation.spec_rowid, &scope_pid],
            |row| row.get(0),
        )?
        .map_or_else(
            || {
                store.query_one(
                    "SELECT id FROM spec_objects WHERE pid = ?1 ORDER BY id LIMIT 1",
                    &[&scope_pid],
                    |row| row.get(0),
                )
            },
            |id| Ok(Some(id)),
        )?;
    let Some(scope_id) = scope else {
        return Ok(None);
    };

    let hits: Vec<i64> = match type_ref {
        Some(t) => store.query_all(
            "SELECT id FROM spec_floats
             WHERE parent_object_id = ?1 AND type_ref = ?2 AND label = ?3 ORDER BY id",
            &[&scope_id, &t, &label],
            |r| r.get(0),
        )?,
        None => store.query_all(
            "SELECT id FROM spec_floats
             WHERE parent_object_id = ?1 AND label = ?2 ORDER BY id",
            &[&scope_id, &label],
            |r| r.get(0),
        )?,
    };
    Ok(hits.first().map(|first| TargetHit {
        target: Target::Float(*first),
        ambiguous: hits.len() > 1,
    }))
}

/// Specificity scoring (§ relation type inference).
///
/// Returns `(winner, tie)`. A non-null constraint that the relation
/// violates eliminates the candidate; a null constraint is a wildcard
/// worth zero. Among survivors the maximum score wins; ties resolve to
/// the lexicographically first identifier and are flagged.
fn infer_type(
    candidates: &[CandidateType],
    link_selector: &str,
    source_attribute: Option<&str>,
    source_type: Option<&str>,
    target_type: Option<&str>,
) -> (Option<String>, bool) {
    let mut best: Option<(&str, i32)> = None;
    let mut tie = false;

    for candidate in candidates {
        let mut score = 0;
        // Selectors compare by exact string equality, so `@cite` and `@`
        // are distinct rules.
        match candidate.link_selector.as_deref() {
            Some(s) if s == link_selector => score += 1,
            Some(_) => continue,
            None => {}
        }
        match (candidate.source_attribute.as_deref(), source_attribute) {
            (Some(a), Some(b)) if a == b => score += 1,
            (Some(_), _) => continue,
            (None, _) => {}
        }
        match (candidate.source_type_ref.as_deref(), source_type) {
            (Some(a), Some(b)) if a == b => score += 1,
            (Some(_), _) => continue,
            (None, _) => {}
        }
        match (candidate.target_type_ref.as_deref(), target_type) {
            (Some(a), Some(b)) if a == b => score += 1,
            (Some(_), _) => continue,
            (None, _) => {}
        }

        match best {
            None => best = Some((&candidate.identifier, score)),
            Some((_, best_score)) if score > best_score => {
                best = Some((&candidate.identifier, score));
                tie = false;
            }
            // Candidates iterate in identifier order, so on a tie the
            // current best is already the lexicographically first.
            Some((_, best_score)) if score == best_score => tie = true,
            Some(_) => {}
        }
    }
    (best.map(|(id, _)| id.to_string()), tie)
}
