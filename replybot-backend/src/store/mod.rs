//! Durable state shared across runs: the reply ledger and the mention cursor.

mod airtable;
mod redis_cursor;
mod sqlite;

pub use airtable::AirtableLedger;
pub use redis_cursor::RedisCursorStore;
pub use sqlite::SqliteStore;

use crate::error::StoreError;
use crate::models::LedgerRecord;
use async_trait::async_trait;

/// Append-only record of replies, keyed by `LedgerRecord::dedup_key`.
#[async_trait]
pub trait DedupLedger: Send + Sync {
    /// Append a record. A record whose key is already present is ignored.
    async fn insert(&self, record: &LedgerRecord) -> Result<(), StoreError>;

    async fn contains(&self, dedup_key: &str) -> Result<bool, StoreError>;
}

/// Single-value key/value store holding the last processed mention id.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Durable once this returns.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}
