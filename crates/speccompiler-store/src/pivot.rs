//! EAV pivot views
//!
//! One generated view per object type materializes that type's declared
//! attributes as typed columns, so external consumers can query objects
//! without knowing the EAV layout. The pipeline itself never reads these
//! views; it queries the raw `attribute_values` rows.

use crate::error::StoreError;
use crate::store::Store;

/// Regenerate every per-type pivot view from the current type tables.
///
/// Called once after the model loader has persisted the type overlay.
pub fn regenerate(store: &Store) -> Result<(), StoreError> {
    let existing = store.query_all(
        "SELECT name FROM sqlite_master WHERE type = 'view' AND name LIKE 'pivot_%'",
        &[],
        |row| row.get::<_, String>(0),
    )?;
    for view in existing {
        store.execute_batch(&format!("DROP VIEW IF EXISTS \"{view}\""))?;
    }

    let type_ids = store.query_all(
        "SELECT identifier FROM object_types ORDER BY identifier",
        &[],
        |row| row.get::<_, String>(0),
    )?;

    for type_id in type_ids {
        let attrs = store.query_all(
            "SELECT name, datatype FROM attribute_types
             WHERE object_type_ref = ?1 ORDER BY id",
            &[&type_id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )?;

        let mut columns = String::new();
        for (name, datatype) in &attrs {
            let value_column = value_column_for(datatype);
            columns.push_str(&format!(
                ", (SELECT av.{value_column} FROM attribute_values av
                    WHERE av.object_ref = o.id AND av.name = '{name}'
                    ORDER BY av.id LIMIT 1) AS \"{name}\""
            ));
        }

        let sql = format!(
            "CREATE VIEW \"pivot_{type_id}\" AS
             SELECT o.id, o.specification_ref, o.pid, o.title_text, o.label{columns}
             FROM spec_objects o WHERE o.type_ref = '{type_id}'"
        );
        store.execute_batch(&sql)?;
    }
    Ok(())
}

fn value_column_for(datatype: &str) -> &'static str {
    match datatype {
        "INTEGER" => "int_value",
        "REAL" => "real_value",
        "BOOLEAN" => "bool_value",
        "DATE" => "date_value",
        "ENUM" => "enum_ref",
        "XHTML" => "xhtml_value",
        _ => "string_value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pivot_exposes_typed_columns() -> Result<(), StoreError> {
        let store = Store::open_in_memory()?;
        store.execute(
            "INSERT INTO object_types(identifier) VALUES('HLR')",
            &[],
        )?;
        store.execute(
            "INSERT INTO attribute_types(object_type_ref, name, datatype)
             VALUES('HLR', 'priority', 'INTEGER')",
            &[],
        )?;
        store.execute(
            "INSERT INTO spec_objects(content_sha, specification_ref, type_ref, from_file,
                file_seq, pid, title_text, level)
             VALUES('x', 1, 'HLR', 'a.md', 1, 'HLR-001', 'First', 2)",
            &[],
        )?;
        let object_id = store.last_insert_rowid();
        store.execute(
            "INSERT INTO attribute_values(object_ref, name, raw_value, datatype, int_value)
             VALUES(?1, 'priority', '3', 'INTEGER', 3)",
            &[&object_id],
        )?;

        regenerate(&store)?;

        let row: Option<(String, i64)> = store.query_one(
            "SELECT pid, priority FROM pivot_HLR WHERE id = ?1",
            &[&object_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        assert_eq!(row, Some(("HLR-001".to_string(), 3)));
        Ok(())
    }

    #[test]
    fn regenerate_is_idempotent() -> Result<(), StoreError> {
        let store = Store::open_in_memory()?;
        store.execute("INSERT INTO object_types(identifier) VALUES('HLR')", &[])?;
        regenerate(&store)?;
        regenerate(&store)?;
        Ok(())
    }
}
