//! Full-text index population
//!
//! Three inverted indices over objects, attributes and floats with
//! porter/unicode61 tokenization. Populated during EMIT for every dirty
//! specification; fresh specifications keep their previous rows.

use crate::error::StoreError;
use crate::store::Store;

/// Replace a specification's rows in all three FTS indices.
pub fn reindex_specification(store: &Store, spec_rowid: i64, spec_id: &str) -> Result<(), StoreError> {
    store.execute("DELETE FROM fts_objects WHERE spec_id = ?1", &[&spec_id])?;
    store.execute("DELETE FROM fts_attributes WHERE spec_id = ?1", &[&spec_id])?;
    store.execute("DELETE FROM fts_floats WHERE spec_id = ?1", &[&spec_id])?;

    store.execute(
        "INSERT INTO fts_objects(spec_id, object_id, pid, title, body)
         SELECT ?1, o.id, coalesce(o.pid, ''), coalesce(o.title_text, ''), coalesce(o.ast, '')
         FROM spec_objects o WHERE o.specification_ref = ?2",
        &[&spec_id, &spec_rowid],
    )?;
    store.execute(
        "INSERT INTO fts_attributes(spec_id, attribute_id, name, value)
         SELECT ?1, av.id, av.name, coalesce(av.raw_value, '')
         FROM attribute_values av
         JOIN spec_objects o ON o.id = av.object_ref
         WHERE o.specification_ref = ?2",
        &[&spec_id, &spec_rowid],
    )?;
    store.execute(
        "INSERT INTO fts_floats(spec_id, float_id, label, caption, content)
         SELECT ?1, f.id, coalesce(f.label, ''), coalesce(f.caption, ''),
                coalesce(f.raw_content, '')
         FROM spec_floats f WHERE f.specification_ref = ?2",
        &[&spec_id, &spec_rowid],
    )?;
    Ok(())
}
