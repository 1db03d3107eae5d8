//! Persistent key/value store trait and SQLite implementation.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::SyncError;

/// Asynchronous byte storage. Best-effort durable, no cross-key ordering.
#[async_trait]
pub trait PersistentStore: Send + Sync {
  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SyncError>;

  async fn set(&self, key: &str, value: &[u8]) -> Result<(), SyncError>;

  async fn remove(&self, key: &str) -> Result<(), SyncError>;
}

/// Storage key for one entity set of one user.
///
/// The user id is hashed so keys are fixed-length and do not leak it.
pub fn storage_key(entity_type: &str, owner_id: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(owner_id.as_bytes());
  format!("{}:{}", entity_type, hex::encode(hasher.finalize()))
}

/// Storage implementation that doesn't persist anything.
/// Used when persistence is disabled - all operations are no-ops.
pub struct NoopStorage;

#[async_trait]
impl PersistentStore for NoopStorage {
  async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, SyncError> {
    Ok(None) // Always miss
  }

  async fn set(&self, _key: &str, _value: &[u8]) -> Result<(), SyncError> {
    Ok(()) // Discard
  }

  async fn remove(&self, _key: &str) -> Result<(), SyncError> {
    Ok(())
  }
}

/// SQLite-based store.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

/// Schema for the key/value table.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SqliteStorage {
  /// Open the store at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open the store at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a throwaway in-memory store.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("hrsync").join("cache.db"))
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>, SyncError> {
    self
      .conn
      .lock()
      .map_err(|e| SyncError::Storage(format!("Lock poisoned: {}", e)))
  }
}

#[async_trait]
impl PersistentStore for SqliteStorage {
  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SyncError> {
    let conn = self.conn()?;
    let value = conn
      .query_row(
        "SELECT value FROM kv_store WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()?;
    Ok(value)
  }

  async fn set(&self, key: &str, value: &[u8]) -> Result<(), SyncError> {
    let conn = self.conn()?;
    conn.execute(
      "INSERT OR REPLACE INTO kv_store (key, value, updated_at)
       VALUES (?, ?, datetime('now'))",
      params![key, value],
    )?;
    Ok(())
  }

  async fn remove(&self, key: &str) -> Result<(), SyncError> {
    let conn = self.conn()?;
    conn.execute("DELETE FROM kv_store WHERE key = ?", params![key])?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_sqlite_set_get_remove() {
    let store = SqliteStorage::open_in_memory().expect("store");

    assert_eq!(store.get("k").await.expect("get"), None);

    store.set("k", b"first").await.expect("set");
    store.set("k", b"second").await.expect("overwrite");
    assert_eq!(store.get("k").await.expect("get"), Some(b"second".to_vec()));

    store.remove("k").await.expect("remove");
    assert_eq!(store.get("k").await.expect("get"), None);
  }

  #[tokio::test]
  async fn test_noop_always_misses() {
    let store = NoopStorage;
    store.set("k", b"value").await.expect("set");
    assert_eq!(store.get("k").await.expect("get"), None);
  }

  #[test]
  fn test_storage_key_is_per_owner() {
    let a = storage_key("requests", "alice");
    let b = storage_key("requests", "bob");
    assert_ne!(a, b);
    assert!(a.starts_with("requests:"));
    assert!(!a.contains("alice"));
    assert_eq!(a, storage_key("requests", "alice"));
  }
}
