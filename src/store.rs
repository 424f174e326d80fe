//! File-backed key-value stores for the neuron database and subscriptions.
//!
//! Each store is a single SQLite file holding JSON values by string key. A
//! store is opened per operation, and every operation runs inside
//! [`KvStore::transact`], which serialises access through a process-wide mutex
//! and wraps the work in a transaction: either the whole span commits or none
//! of it does.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::Result;

const SCHEMA_SQL: &str = "CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);";

#[derive(Debug)]
pub(crate) struct KvStore {
    path: PathBuf,
    lock: Mutex<()>,
}

/// Read/write view of a store for the duration of one transaction.
pub(crate) struct KvTxn<'a> {
    tx: &'a Transaction<'a>,
}

impl KvStore {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` with exclusive access; commit if it returns `Ok`, roll back otherwise.
    pub(crate) fn transact<T>(&self, f: impl FnOnce(&KvTxn<'_>) -> Result<T>) -> Result<T> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut conn = open_connection(&self.path)?;
        let tx = conn.transaction()?;
        let value = f(&KvTxn { tx: &tx })?;
        tx.commit()?;
        Ok(value)
    }

    /// Every entry as one pretty-printed JSON object keyed by store key.
    pub(crate) fn dump_json(&self) -> Result<String> {
        let entries: Vec<(String, serde_json::Value)> = self.transact(|txn| txn.entries())?;
        let object: serde_json::Map<String, serde_json::Value> = entries.into_iter().collect();
        Ok(serde_json::to_string_pretty(&serde_json::Value::Object(object))?)
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(conn)
}

impl KvTxn<'_> {
    pub(crate) fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw = self
            .tx
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.tx.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, text, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    pub(crate) fn delete(&self, key: &str) -> Result<bool> {
        let rows = self.tx.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(rows > 0)
    }

    pub(crate) fn contains(&self, key: &str) -> Result<bool> {
        let found = self
            .tx
            .query_row("SELECT 1 FROM kv WHERE key = ?1", params![key], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    pub(crate) fn keys(&self) -> Result<Vec<String>> {
        let mut stmt = self.tx.prepare("SELECT key FROM kv ORDER BY key")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut keys = Vec::new();
        for key in rows {
            keys.push(key?);
        }
        Ok(keys)
    }

    pub(crate) fn entries<T: DeserializeOwned>(&self) -> Result<Vec<(String, T)>> {
        let mut stmt = self.tx.prepare("SELECT key, value FROM kv ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut entries = Vec::new();
        for row in rows {
            let (key, text) = row?;
            entries.push((key, serde_json::from_str(&text)?));
        }
        Ok(entries)
    }
}

/// Both persisted stores, opened lazily per operation.
#[derive(Debug)]
pub(crate) struct Stores {
    pub(crate) neurondb: KvStore,
    pub(crate) subscriptions: KvStore,
}

impl Stores {
    pub(crate) fn new(neurondb: impl Into<PathBuf>, subscriptions: impl Into<PathBuf>) -> Self {
        Self {
            neurondb: KvStore::new(neurondb),
            subscriptions: KvStore::new(subscriptions),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BotError;
    use std::sync::Arc;
    use std::thread;

    fn temp_store_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("catbot_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("store_{}_{name}.sqlite", std::process::id()));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn put_get_delete() {
        let path = temp_store_path("put_get");
        let store = KvStore::new(&path);

        store.transact(|txn| txn.put("16", &vec![1, 2, 3])).unwrap();
        let value: Option<Vec<i32>> = store.transact(|txn| txn.get("16")).unwrap();
        assert_eq!(value, Some(vec![1, 2, 3]));

        assert!(store.transact(|txn| txn.contains("16")).unwrap());
        assert!(store.transact(|txn| txn.delete("16")).unwrap());
        assert!(!store.transact(|txn| txn.delete("16")).unwrap());
        let value: Option<Vec<i32>> = store.transact(|txn| txn.get("16")).unwrap();
        assert!(value.is_none());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn dump_is_a_json_object() {
        let path = temp_store_path("dump");
        let store = KvStore::new(&path);
        store.transact(|txn| txn.put("U2", &serde_json::json!({"daily_updates": false}))).unwrap();
        store.transact(|txn| txn.put("U1", &serde_json::json!({"subscriptions": [16]}))).unwrap();

        let dumped: serde_json::Value = serde_json::from_str(&store.dump_json().unwrap()).unwrap();
        assert_eq!(dumped["U1"]["subscriptions"][0], 16);
        assert_eq!(dumped["U2"]["daily_updates"], false);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn failed_span_rolls_back() {
        let path = temp_store_path("rollback");
        let store = KvStore::new(&path);
        store.transact(|txn| txn.put("a", &"old")).unwrap();

        let result: Result<()> = store.transact(|txn| {
            txn.put("a", &"new")?;
            txn.put("b", &"partial")?;
            Err(BotError::Config("boom".into()))
        });
        assert!(result.is_err());

        let keys = store.transact(|txn| txn.keys()).unwrap();
        assert_eq!(keys, vec!["a".to_string()]);
        let a: Option<String> = store.transact(|txn| txn.get("a")).unwrap();
        assert_eq!(a.as_deref(), Some("old"));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn entries_are_sorted_by_key() {
        let path = temp_store_path("entries");
        let store = KvStore::new(&path);
        store
            .transact(|txn| {
                txn.put("b", &2)?;
                txn.put("a", &1)
            })
            .unwrap();
        let entries: Vec<(String, i32)> = store.transact(|txn| txn.entries()).unwrap();
        assert_eq!(entries, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn concurrent_read_modify_write_is_serialised() {
        let path = temp_store_path("concurrent");
        let store = Arc::new(KvStore::new(&path));
        store.transact(|txn| txn.put("counter", &0u32)).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..25 {
                        store
                            .transact(|txn| {
                                let n: u32 = txn.get("counter")?.unwrap_or(0);
                                txn.put("counter", &(n + 1))
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let n: Option<u32> = store.transact(|txn| txn.get("counter")).unwrap();
        assert_eq!(n, Some(200));
        std::fs::remove_file(&path).ok();
    }
}
