//! Relational SQLite backend.
//!
//! One SQLite file per database, one lazily created table per store:
//! `(id INTEGER PRIMARY KEY, key TEXT UNIQUE, value TEXT)`. Writes are
//! upserts via `INSERT OR REPLACE`, which deletes and re-inserts the row,
//! so the row id is reassigned on every update. `key_at(n)` addresses current
//! row ids, so its answer can silently change after updates. This is
//! long-standing behavior of the fixed schema and is kept as is.
//!
//! Every value passes through the text serializer; quota-exhausted writes
//! are retried exactly once before surfacing.

use crate::backend::{Backend, BackendConfig, DropTarget, Visitor};
use crate::error::{BackendError, BackendResult};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use strata_codec::{deserialize, serialize, Value};
use tracing::warn;

/// Default SQLite page size, used to turn the byte quota into a page cap.
const PAGE_SIZE: u64 = 4096;

/// SQLite-backed storage.
pub struct SqlBackend {
    name: String,
    root_dir: PathBuf,
    path: Option<PathBuf>,
    conn: Option<Connection>,
    tables: HashSet<String>,
}

impl SqlBackend {
    /// Opens (creating as needed) the database file named by the
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Connection`] if the file cannot be opened.
    pub fn open(cfg: &BackendConfig) -> BackendResult<Self> {
        fs::create_dir_all(&cfg.root_dir)?;
        let path = cfg
            .root_dir
            .join(format!("{}.sqlite", sanitize_ident(&cfg.name)));

        let conn = Connection::open(&path)
            .map_err(|e| BackendError::connection(format!("cannot open {path:?}: {e}")))?;
        apply_size_hint(&conn, cfg.size);

        Ok(Self {
            name: cfg.name.clone(),
            root_dir: cfg.root_dir.clone(),
            path: Some(path),
            conn: Some(conn),
            tables: HashSet::new(),
        })
    }

    /// Opens an in-memory database, for tests.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Connection`] if SQLite refuses the open.
    pub fn in_memory(name: impl Into<String>) -> BackendResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| BackendError::connection(e.to_string()))?;
        Ok(Self {
            name: name.into(),
            root_dir: PathBuf::new(),
            path: None,
            conn: Some(conn),
            tables: HashSet::new(),
        })
    }

    fn conn(&self) -> BackendResult<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| BackendError::stale("connection is closed"))
    }

    /// Runs a statement against the store's table, recreating the table
    /// and retrying once if it has gone missing (dropped then reused).
    fn with_table<T>(
        &self,
        store: &str,
        f: impl Fn(&Connection, &str) -> rusqlite::Result<T>,
    ) -> BackendResult<T> {
        let table = quoted_ident(store);
        let conn = self.conn()?;
        match f(conn, &table) {
            Ok(v) => Ok(v),
            Err(e) if is_missing_table(&e) => {
                create_table(conn, store)?;
                f(conn, &table).map_err(Into::into)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Backend for SqlBackend {
    fn ensure_store(&mut self, store: &str, _version: u32) -> BackendResult<()> {
        create_table(self.conn()?, store)?;
        self.tables.insert(store.to_string());
        Ok(())
    }

    fn get(&mut self, store: &str, key: &str) -> BackendResult<Option<Value>> {
        let text: Option<String> = self.with_table(store, |conn, table| {
            conn.query_row(
                &format!("SELECT value FROM {table} WHERE key = ?1 LIMIT 1"),
                params![key],
                |row| row.get(0),
            )
            .optional()
        })?;

        match text {
            Some(text) => Ok(Some(deserialize(&text)?)),
            None => Ok(None),
        }
    }

    fn set(&mut self, store: &str, key: &str, value: &Value) -> BackendResult<()> {
        let text = serialize(value)?;
        let mut retried = false;

        loop {
            let result = self.with_table(store, |conn, table| {
                conn.execute(
                    &format!("INSERT OR REPLACE INTO {table} (key, value) VALUES (?1, ?2)"),
                    params![key, text],
                )
            });

            match result {
                Ok(_) => return Ok(()),
                Err(e) if is_quota(&e) && !retried => {
                    // One retry: the engine may have reclaimed pages since
                    // the failed attempt.
                    warn!(store, key, "write hit the quota; retrying once");
                    retried = true;
                }
                Err(e) if is_quota(&e) => {
                    return Err(BackendError::aborted(e.to_string(), true));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn remove(&mut self, store: &str, key: &str) -> BackendResult<()> {
        self.with_table(store, |conn, table| {
            conn.execute(
                &format!("DELETE FROM {table} WHERE key = ?1"),
                params![key],
            )
        })?;
        Ok(())
    }

    fn clear(&mut self, store: &str) -> BackendResult<()> {
        self.with_table(store, |conn, table| {
            conn.execute(&format!("DELETE FROM {table}"), [])
        })?;
        Ok(())
    }

    fn length(&mut self, store: &str) -> BackendResult<usize> {
        let count: i64 = self.with_table(store, |conn, table| {
            conn.query_row(&format!("SELECT COUNT(key) FROM {table}"), [], |row| {
                row.get(0)
            })
        })?;
        Ok(count.max(0) as usize)
    }

    fn key_at(&mut self, store: &str, index: usize) -> BackendResult<Option<String>> {
        // Row-id addressing: upserts reassign ids, shifting answers.
        let id = index as i64 + 1;
        let key = self.with_table(store, |conn, table| {
            conn.query_row(
                &format!("SELECT key FROM {table} WHERE id = ?1 LIMIT 1"),
                params![id],
                |row| row.get(0),
            )
            .optional()
        })?;
        Ok(key)
    }

    fn keys(&mut self, store: &str) -> BackendResult<Vec<String>> {
        self.with_table(store, |conn, table| {
            let mut stmt = conn.prepare(&format!("SELECT key FROM {table}"))?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect()
        })
    }

    fn iterate(&mut self, store: &str, visitor: &mut Visitor<'_>) -> BackendResult<Option<Value>> {
        let rows: Vec<(String, String)> = self.with_table(store, |conn, table| {
            let mut stmt = conn.prepare(&format!("SELECT key, value FROM {table}"))?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect()
        })?;

        for (i, (key, text)) in rows.iter().enumerate() {
            let value = deserialize(text)?;
            if let Some(result) = visitor(value, key, (i + 1) as u64) {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.tables.clear();
        self.conn = None;
    }

    fn drop_instance(&mut self, target: &DropTarget) -> BackendResult<()> {
        if target.name != self.name {
            let cfg = BackendConfig::new(&target.name, &self.root_dir);
            let mut other = Self::open(&cfg)?;
            return other.drop_instance(target);
        }

        match &target.store_name {
            Some(store) => {
                let table = quoted_ident(store);
                self.conn()?
                    .execute(&format!("DROP TABLE IF EXISTS {table}"), [])?;
                self.tables.remove(store);
                Ok(())
            }
            None => {
                self.close();
                if let Some(path) = self.path.take() {
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Ok(())
            }
        }
    }
}

fn create_table(conn: &Connection, store: &str) -> rusqlite::Result<()> {
    let table = quoted_ident(store);
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {table} \
             (id INTEGER PRIMARY KEY, key TEXT UNIQUE, value TEXT)"
        ),
        [],
    )?;
    Ok(())
}

fn apply_size_hint(conn: &Connection, size: u64) {
    if size == 0 {
        return;
    }
    let pages = i64::try_from((size / PAGE_SIZE).max(1)).unwrap_or(i64::MAX);
    // This pragma answers with the resulting count; a hint, not a hard
    // contract, so engines that refuse it are only logged.
    let applied = conn.query_row(&format!("PRAGMA max_page_count = {pages}"), [], |_row| Ok(()));
    if let Err(e) = applied {
        warn!(size, "could not apply size hint: {e}");
    }
}

fn is_missing_table(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(_, Some(message)) if message.contains("no such table")
    )
}

fn is_quota(e: &BackendError) -> bool {
    matches!(
        e,
        BackendError::Sql(rusqlite::Error::SqliteFailure(inner, _))
            if inner.code == ErrorCode::DiskFull
    )
}

fn sanitize_ident(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn quoted_ident(name: &str) -> String {
    format!("\"{}\"", sanitize_ident(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> SqlBackend {
        let mut b = SqlBackend::in_memory("testdb").unwrap();
        b.ensure_store("kv", 1).unwrap();
        b
    }

    #[test]
    fn set_get_roundtrip() {
        let mut b = backend();
        b.set("kv", "a", &Value::Json(serde_json::json!({"x": 1})))
            .unwrap();
        assert_eq!(
            b.get("kv", "a").unwrap(),
            Some(Value::Json(serde_json::json!({"x": 1})))
        );
        assert_eq!(b.get("kv", "missing").unwrap(), None);
    }

    #[test]
    fn binary_values_roundtrip_as_text() {
        let mut b = backend();
        let value = Value::Uint16(vec![7, 65535]);
        b.set("kv", "bin", &value).unwrap();
        assert_eq!(b.get("kv", "bin").unwrap(), Some(value));
    }

    #[test]
    fn upsert_replaces_value() {
        let mut b = backend();
        b.set("kv", "a", &Value::text("first")).unwrap();
        b.set("kv", "a", &Value::text("second")).unwrap();
        assert_eq!(b.get("kv", "a").unwrap(), Some(Value::text("second")));
        assert_eq!(b.length("kv").unwrap(), 1);
    }

    #[test]
    fn key_at_follows_row_ids_after_upsert() {
        let mut b = backend();
        b.set("kv", "a", &Value::text("1")).unwrap();
        b.set("kv", "b", &Value::text("2")).unwrap();
        assert_eq!(b.key_at("kv", 0).unwrap().as_deref(), Some("a"));

        // The upsert deletes row 1 and re-inserts "a" with a fresh id.
        b.set("kv", "a", &Value::text("updated")).unwrap();
        assert_eq!(b.key_at("kv", 0).unwrap(), None);
        assert_eq!(b.key_at("kv", 1).unwrap().as_deref(), Some("b"));
        assert_eq!(b.key_at("kv", 2).unwrap().as_deref(), Some("a"));
    }

    #[test]
    fn clear_and_remove() {
        let mut b = backend();
        b.set("kv", "a", &Value::text("1")).unwrap();
        b.set("kv", "b", &Value::text("2")).unwrap();

        b.remove("kv", "a").unwrap();
        assert_eq!(b.get("kv", "a").unwrap(), None);
        assert_eq!(b.length("kv").unwrap(), 1);

        b.clear("kv").unwrap();
        assert_eq!(b.length("kv").unwrap(), 0);
        assert!(b.keys("kv").unwrap().is_empty());
    }

    #[test]
    fn iterate_visits_in_row_order() {
        let mut b = backend();
        for key in ["x", "y", "z"] {
            b.set("kv", key, &Value::text(key)).unwrap();
        }

        let mut seen = Vec::new();
        let result = b
            .iterate("kv", &mut |_value, key, index| {
                seen.push((key.to_string(), index));
                None
            })
            .unwrap();
        assert_eq!(result, None);
        assert_eq!(
            seen,
            vec![
                ("x".to_string(), 1),
                ("y".to_string(), 2),
                ("z".to_string(), 3)
            ]
        );
    }

    #[test]
    fn dropped_table_is_recreated_on_use() {
        let mut b = backend();
        b.set("kv", "a", &Value::text("1")).unwrap();
        b.drop_instance(&DropTarget {
            name: "testdb".into(),
            store_name: Some("kv".into()),
        })
        .unwrap();

        // The missing table is recreated transparently; the store is empty.
        assert_eq!(b.get("kv", "a").unwrap(), None);
        b.set("kv", "b", &Value::text("2")).unwrap();
        assert_eq!(b.length("kv").unwrap(), 1);
    }

    #[test]
    fn quota_errors_are_classified() {
        let full = BackendError::Sql(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
            None,
        ));
        assert!(is_quota(&full));
        assert!(!full.is_stale());

        let busy = BackendError::Sql(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(!is_quota(&busy));
    }

    #[test]
    fn closed_connection_reports_stale() {
        let mut b = backend();
        b.close();
        assert!(b.get("kv", "a").unwrap_err().is_stale());
    }

    #[test]
    fn file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = BackendConfig::new("filedb", dir.path());
        {
            let mut b = SqlBackend::open(&cfg).unwrap();
            b.ensure_store("kv", 1).unwrap();
            b.set("kv", "a", &Value::text("kept")).unwrap();
        }
        let mut b = SqlBackend::open(&cfg).unwrap();
        b.ensure_store("kv", 1).unwrap();
        assert_eq!(b.get("kv", "a").unwrap(), Some(Value::text("kept")));
    }
}
