//! The Store handle
//!
//! Exclusive owner of the SQLite connection. Every other component holds a
//! shared `&Store` and submits reads and writes through it. Transactions
//! are explicit so a handler can group its multi-row writes; nested
//! transactions are rejected rather than silently flattened.

use crate::error::StoreError;
use crate::schema;
use rusqlite::{Connection, OptionalExtension, Row, ToSql};
use std::cell::Cell;
use std::path::Path;

/// Shared handle to the embedded database.
pub struct Store {
    conn: Connection,
    in_transaction: Cell<bool>,
}

impl Store {
    /// Open (or create) the store at `path` and apply the schema.
    ///
    /// Type tables are dropped and recreated; content and build tables
    /// persist. A second driver opening the same file will fail on the
    /// exclusive locking mode, which is the documented behavior for
    /// concurrent runs.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::OpenFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        conn.pragma_update(None, "journal_mode", "wal")?;
        conn.pragma_update(None, "locking_mode", "exclusive")?;
        conn.pragma_update(None, "foreign_keys", "on")?;
        schema::apply(&conn)?;
        Ok(Self {
            conn,
            in_transaction: Cell::new(false),
        })
    }

    /// Open an in-memory store. Used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        schema::apply(&conn)?;
        Ok(Self {
            conn,
            in_transaction: Cell::new(false),
        })
    }

    /// Execute a statement, returning the number of affected rows.
    pub fn execute(&self, sql: &str, params: &[&dyn ToSql]) -> Result<usize, StoreError> {
        Ok(self.conn.execute(sql, params)?)
    }

    /// Execute a batch of semicolon-separated statements.
    pub fn execute_batch(&self, sql: &str) -> Result<(), StoreError> {
        Ok(self.conn.execute_batch(sql)?)
    }

    /// Run a query expected to return at most one row.
    pub fn query_one<T, F>(
        &self,
        sql: &str,
        params: &[&dyn ToSql],
        f: F,
    ) -> Result<Option<T>, StoreError>
    where
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        Ok(self.conn.query_row(sql, params, f).optional()?)
    }

    /// Run a query, mapping every row.
    pub fn query_all<T, F>(
        &self,
        sql: &str,
        params: &[&dyn ToSql],
        mut f: F,
    ) -> Result<Vec<T>, StoreError>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| f(row))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Rowid of the most recent insert.
    #[must_use]
    pub fn last_insert_rowid(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    /// Begin an explicit transaction.
    pub fn begin(&self) -> Result<(), StoreError> {
        if self.in_transaction.get() {
            return Err(StoreError::TransactionActive);
        }
        self.conn.execute_batch("BEGIN")?;
        self.in_transaction.set(true);
        Ok(())
    }

    /// Commit the active transaction.
    pub fn commit(&self) -> Result<(), StoreError> {
        if !self.in_transaction.get() {
            return Err(StoreError::NoActiveTransaction);
        }
        self.conn.execute_batch("COMMIT")?;
        self.in_transaction.set(false);
        Ok(())
    }

    /// Roll back the active transaction.
    pub fn rollback(&self) -> Result<(), StoreError> {
        if !self.in_transaction.get() {
            return Err(StoreError::NoActiveTransaction);
        }
        self.conn.execute_batch("ROLLBACK")?;
        self.in_transaction.set(false);
        Ok(())
    }

    /// Whether an explicit transaction is active.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.in_transaction.get()
    }

    /// Get a value from the process-wide key-value table.
    pub fn kv_get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.query_one(
            "SELECT value FROM kv_store WHERE key = ?1",
            &[&key],
            |row| row.get(0),
        )
    }

    /// Upsert a value into the key-value table.
    pub fn kv_put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.execute(
            "INSERT INTO kv_store(key, value) VALUES(?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            &[&key, &value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_creates_schema() -> Result<(), StoreError> {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("specir.db"))?;
        let count: Option<i64> = store.query_one(
            "SELECT count(*) FROM spec_objects",
            &[],
            |row| row.get(0),
        )?;
        assert_eq!(count, Some(0));
        Ok(())
    }

    #[test]
    fn reopen_drops_type_tables_but_keeps_content() -> Result<(), StoreError> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("specir.db");
        {
            let store = Store::open(&path)?;
            store.execute(
                "INSERT INTO object_types(identifier) VALUES('HLR')",
                &[],
            )?;
            store.execute(
                "INSERT INTO specifications(identifier, root_path) VALUES('a', 'a.md')",
                &[],
            )?;
        }
        let store = Store::open(&path)?;
        let types: Option<i64> =
            store.query_one("SELECT count(*) FROM object_types", &[], |r| r.get(0))?;
        let specs: Option<i64> =
            store.query_one("SELECT count(*) FROM specifications", &[], |r| r.get(0))?;
        assert_eq!(types, Some(0));
        assert_eq!(specs, Some(1));
        Ok(())
    }

    #[test]
    fn transaction_lifecycle() -> Result<(), StoreError> {
        let store = Store::open_in_memory()?;
        store.begin()?;
        assert!(matches!(store.begin(), Err(StoreError::TransactionActive)));
        store.execute(
            "INSERT INTO specifications(identifier, root_path) VALUES('a', 'a.md')",
            &[],
        )?;
        store.rollback()?;
        let count: Option<i64> =
            store.query_one("SELECT count(*) FROM specifications", &[], |r| r.get(0))?;
        assert_eq!(count, Some(0));
        assert!(matches!(
            store.commit(),
            Err(StoreError::NoActiveTransaction)
        ));
        Ok(())
    }

    #[test]
    fn kv_round_trip() -> Result<(), StoreError> {
        let store = Store::open_in_memory()?;
        assert_eq!(store.kv_get("reference.docx")?, None);
        store.kv_put("reference.docx", "abc123")?;
        store.kv_put("reference.docx", "def456")?;
        assert_eq!(store.kv_get("reference.docx")?, Some("def456".to_string()));
        Ok(())
    }
}
