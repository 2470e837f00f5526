//! TRANSFORM: float numbering
//!
//! Numbers are assigned per specification and per counter group, in
//! `file_seq` order, counting only captioned floats. A float type without
//! a declared counter group numbers in its own namespace (the type
//! identifier). Non-captioned floats keep a null number and stay out of
//! list-of views.

use anyhow::Result;
use speccompiler_store::Store;
use std::collections::BTreeMap;

/// Assign numbers for one specification's floats.
pub fn number_floats(store: &Store, spec_rowid: i64) -> Result<()> {
    let rows = store.query_all(
        "SELECT f.id, coalesce(ft.counter_group, f.type_ref) AS counter_group,
                f.caption
         FROM spec_floats f
         LEFT JOIN float_types ft ON ft.identifier = f.type_ref
         WHERE f.specification_ref = ?1
         ORDER BY f.file_seq",
        &[&spec_rowid],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        },
    )?;

    let mut counters: BTreeMap<String, i64> = BTreeMap::new();
    for (id, group, caption) in rows {
        let number: Option<i64> = if caption.as_deref().is_some_and(|c| !c.trim().is_empty()) {
            let counter = counters.entry(group).or_insert(0);
            *counter += 1;
            Some(*counter)
        } else {
            None
        };
        store.execute(
            "UPDATE spec_floats SET number = ?2 WHERE id = ?1",
            &[&id, &number],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use speccompiler_model::TypeRegistry;
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
                "INSERT INTO specifications(identifier, root_path) VALUES('a', 'a.md')",
                &[],
            )
            .unwrap();
        let spec = store.last_insert_rowid();
        (store, spec)
    }

    fn add_float(store: &Store, spec: i64, type_ref: &str, seq: i64, caption: Option<&str>) -> i64 {
        store
            .execute(
                "INSERT INTO spec_floats(content_sha, specification_ref, type_ref, from_file,
                    file_seq, label, caption, raw_content)
                 VALUES('x', ?1, ?2, 'a.md', ?3, 'l' || ?3, ?4, '')",
                &[&spec, &type_ref, &seq, &caption],
            )
            .unwrap();
        store.last_insert_rowid()
    }

    fn number_of(store: &Store, id: i64) -> Option<i64> {
        store
            .query_one("SELECT number FROM spec_floats WHERE id = ?1", &[&id], |r| {
                r.get(0)
            })
            .unwrap()
            .unwrap()
    }

    #[test]
    fn counter_groups_share_a_sequence() {
        let (store, spec) = setup();
        // figure and plantuml share counter_group "figure".
        let fig = add_float(&store, spec, "figure", 1, Some("First"));
        let tbl = add_float(&store, spec, "table", 2, Some("Data"));
        let uml = add_float(&store, spec, "plantuml", 3, Some("Flow"));

        number_floats(&store, spec).unwrap();
        assert_eq!(number_of(&store, fig), Some(1));
        assert_eq!(number_of(&store, tbl), Some(1));
        assert_eq!(number_of(&store, uml), Some(2));
    }

    #[test]
    fn uncaptioned_floats_are_skipped() {
        let (store, spec) = setup();
        let a = add_float(&store, spec, "figure", 1, Some("Visible"));
        let b = add_float(&store, spec, "figure", 2, None);
        let c = add_float(&store, spec, "figure", 3, Some(""));
        let d = add_float(&store, spec, "figure", 4, Some("Also visible"));

        number_floats(&store, spec).unwrap();
        assert_eq!(number_of(&store, a), Some(1));
        assert_eq!(number_of(&store, b), None);
        assert_eq!(number_of(&store, c), None);
        assert_eq!(number_of(&store, d), Some(2));
    }

    #[test]
    fn numbering_is_per_specification() {
        let (store, spec_a) = setup();
        store
            .execute(
                "INSERT INTO specifications(identifier, root_path) VALUES('b', 'b.md')",
                &[],
            )
            .unwrap();
        let spec_b = store.last_insert_rowid();
        let in_a = add_float(&store, spec_a, "figure", 1, Some("A"));
        let in_b = add_float(&store, spec_b, "figure", 1, Some("B"));

        number_floats(&store, spec_a).unwrap();
        number_floats(&store, spec_b).unwrap();
        assert_eq!(number_of(&store, in_a), Some(1));
        assert_eq!(number_of(&store, in_b), Some(1));
    }

    #[test]
    fn unknown_type_numbers_in_its_own_namespace() {
        let (store, spec) = setup();
        let custom = add_float(&store, spec, "customtype", 1, Some("X"));
        let fig = add_float(&store, spec, "figure", 2, Some("Y"));
        number_floats(&store, spec).unwrap();
        assert_eq!(number_of(&store, custom), Some(1));
        assert_eq!(number_of(&store, fig), Some(1));
    }
}
