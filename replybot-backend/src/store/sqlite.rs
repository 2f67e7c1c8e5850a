use super::{CursorStore, DedupLedger};
use crate::error::StoreError;
use crate::models::LedgerRecord;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Local SQLite file holding both the reply ledger and the cursor.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(database_url: &str) -> Result<Self, StoreError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = Path::new(database_url).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Unavailable(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }
        }

        let conn = Connection::open(database_url)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        log::info!("[store] SQLite store opened at {}", database_url);
        Ok(store)
    }

    /// In-memory database, mostly for tests and dry runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("SQLite connection lock poisoned".to_string()))
    }

    fn init(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;

        // WAL keeps readers unblocked; returns a row so it cannot go through execute
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS reply_ledger (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                dedup_key TEXT UNIQUE NOT NULL,
                mention_id TEXT NOT NULL,
                target_post_id TEXT NOT NULL,
                target_text TEXT NOT NULL,
                reply_post_id TEXT NOT NULL,
                reply_text TEXT NOT NULL,
                mentioned_at TEXT,
                replied_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS cursor_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    /// All ledger rows, oldest first.
    pub fn records(&self) -> Result<Vec<LedgerRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT dedup_key, mention_id, target_post_id, target_text, reply_post_id, reply_text, mentioned_at, replied_at
             FROM reply_ledger ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(LedgerRecord {
                dedup_key: row.get(0)?,
                mention_id: row.get(1)?,
                target_post_id: row.get(2)?,
                target_text: row.get(3)?,
                reply_post_id: row.get(4)?,
                reply_text: row.get(5)?,
                mentioned_at: row.get(6)?,
                replied_at: row.get(7)?,
            })
        })?;
        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

#[async_trait]
impl DedupLedger for SqliteStore {
    async fn insert(&self, record: &LedgerRecord) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO reply_ledger
                (dedup_key, mention_id, target_post_id, target_text, reply_post_id, reply_text, mentioned_at, replied_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.dedup_key,
                record.mention_id,
                record.target_post_id,
                record.target_text,
                record.reply_post_id,
                record.reply_text,
                record.mentioned_at,
                record.replied_at,
            ],
        )?;
        if inserted == 0 {
            log::warn!(
                "[store] Ledger already has key {}, reply {} not recorded",
                record.dedup_key,
                record.reply_post_id
            );
        }
        Ok(())
    }

    async fn contains(&self, dedup_key: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM reply_ledger WHERE dedup_key = ?1",
                [dedup_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl CursorStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.lock()?;
        let value = conn
            .query_row("SELECT value FROM cursor_state WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO cursor_state (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, reply: &str) -> LedgerRecord {
        LedgerRecord {
            dedup_key: key.to_string(),
            mention_id: "105".to_string(),
            target_post_id: key.to_string(),
            target_text: "the moon is made of cheese".to_string(),
            reply_post_id: reply.to_string(),
            reply_text: "It is not.".to_string(),
            mentioned_at: None,
            replied_at: "2024-03-01T12:00:00+00:00".to_string(),
        }
    }

    #[tokio::test]
    async fn test_ledger_insert_and_contains() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(!store.contains("100").await.unwrap());
        store.insert(&record("100", "2000")).await.unwrap();
        assert!(store.contains("100").await.unwrap());
        assert!(!store.contains("101").await.unwrap());
    }

    #[tokio::test]
    async fn test_ledger_keeps_first_record_per_key() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert(&record("100", "2000")).await.unwrap();
        store.insert(&record("100", "2001")).await.unwrap();
        let records = store.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reply_post_id, "2000");
    }

    #[tokio::test]
    async fn test_cursor_get_and_overwrite() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.get("cursor").await.unwrap(), None);
        store.set("cursor", "10").await.unwrap();
        store.set("cursor", "12").await.unwrap();
        assert_eq!(store.get("cursor").await.unwrap(), Some("12".to_string()));
        assert_eq!(store.get("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("replybot.db");
        let path = path.to_str().unwrap();

        {
            let store = SqliteStore::open(path).unwrap();
            store.insert(&record("100", "2000")).await.unwrap();
            store.set("cursor", "105").await.unwrap();
        }

        let store = SqliteStore::open(path).unwrap();
        assert!(store.contains("100").await.unwrap());
        assert_eq!(store.get("cursor").await.unwrap(), Some("105".to_string()));
    }
}
