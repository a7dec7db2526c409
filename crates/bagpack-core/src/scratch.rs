//! Per-operation scratch catalog.
//!
//! An ordered key/value store backed by a sqlite database in a private
//! temp directory. One Build, Verify or Extract owns it exclusively and
//! it vanishes with the operation; durability past the process is not a
//! goal. Iteration order is insertion order, which the builder relies on
//! for stable manifest lines.

use crate::errors::{BagError, BagResult, IoResultExt};
use rusqlite::{params, Connection, OptionalExtension};
use tempfile::TempDir;

pub struct Scratch {
    conn: Connection,
    _dir: TempDir,
}

impl Scratch {
    pub fn new() -> BagResult<Self> {
        let dir = TempDir::new().io_context(|| "cannot create scratch directory")?;
        let conn = Connection::open(dir.path().join("scratch.db"))?;
        conn.execute_batch(
            "CREATE TABLE kv (
                seq   INTEGER PRIMARY KEY AUTOINCREMENT,
                key   TEXT NOT NULL UNIQUE,
                value TEXT NOT NULL
             );",
        )?;
        Ok(Self { conn, _dir: dir })
    }

    /// Inserts a record. Keys are unique; a duplicate means the same path
    /// was recorded twice, which the formats forbid.
    pub fn put(&self, key: &str, value: &str) -> BagResult<()> {
        self.conn
            .execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(f, _)
                    if f.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    BagError::Config(format!("duplicate path '{key}'"))
                }
                other => other.into(),
            })?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> BagResult<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Visits every record in insertion order.
    pub fn for_each<F>(&self, mut f: F) -> BagResult<()>
    where
        F: FnMut(&str, &str) -> BagResult<()>,
    {
        let mut stmt = self.conn.prepare("SELECT key, value FROM kv ORDER BY seq")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let key: String = row.get(0)?;
            let value: String = row.get(1)?;
            f(&key, &value)?;
        }
        Ok(())
    }

    pub fn len(&self) -> BagResult<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM kv", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> BagResult<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iteration_follows_insertion_order() {
        let scratch = Scratch::new().unwrap();
        // Deliberately not in lexicographic order.
        for key in ["zeta", "alpha", "mid"] {
            scratch.put(key, &format!("v-{key}")).unwrap();
        }

        let mut seen = Vec::new();
        scratch
            .for_each(|k, _v| {
                seen.push(k.to_string());
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn duplicate_key_rejected() {
        let scratch = Scratch::new().unwrap();
        scratch.put("p", "1").unwrap();
        let err = scratch.put("p", "2").unwrap_err();
        assert!(matches!(err, BagError::Config(_)));
    }

    #[test]
    fn get_missing_is_none() {
        let scratch = Scratch::new().unwrap();
        assert_eq!(scratch.get("nope").unwrap(), None);
        scratch.put("yes", "1").unwrap();
        assert_eq!(scratch.get("yes").unwrap().as_deref(), Some("1"));
    }
}
