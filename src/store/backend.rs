//! Key-value backend trait and its SQLite and in-memory implementations.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::StoreError;

/// Trait for durable string-keyed, string-valued storage.
///
/// Implementations are origin-scoped and may be shared by several processes;
/// concurrent writers are last-write-wins.
pub trait KeyValueBackend: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

  fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

  fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Process-local backend. Used as the degradation target when durable
/// storage is unavailable, and directly in tests.
#[derive(Default)]
pub struct MemoryBackend {
  map: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, String>>, StoreError> {
    self
      .map
      .lock()
      .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {}", e)))
  }
}

impl KeyValueBackend for MemoryBackend {
  fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
    Ok(self.lock()?.get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
    self.lock()?.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), StoreError> {
    self.lock()?.remove(key);
    Ok(())
  }
}

/// SQLite-based durable backend.
pub struct SqliteBackend {
  conn: Mutex<Connection>,
}

/// Schema for the shared state table.
const KV_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SqliteBackend {
  /// Open the backend at the default location.
  pub fn open() -> Result<Self, StoreError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| StoreError::Unavailable("could not determine data directory".to_string()))?;

    Self::open_at(&data_dir.join("edquery").join("state.db"))
  }

  /// Open the backend at an explicit path, creating parent directories.
  pub fn open_at(path: &Path) -> Result<Self, StoreError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| StoreError::Unavailable(format!("failed to create state directory: {}", e)))?;
    }

    let conn = Connection::open(path)?;

    let backend = Self {
      conn: Mutex::new(conn),
    };
    backend.run_migrations()?;

    Ok(backend)
  }

  fn run_migrations(&self) -> Result<(), StoreError> {
    self.lock()?.execute_batch(KV_SCHEMA)?;
    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
    self
      .conn
      .lock()
      .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {}", e)))
  }
}

impl KeyValueBackend for SqliteBackend {
  fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
    let conn = self.lock()?;

    let value = conn
      .query_row(
        "SELECT value FROM kv_store WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()?;

    Ok(value)
  }

  fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
    let conn = self.lock()?;

    conn.execute(
      "INSERT OR REPLACE INTO kv_store (key, value, updated_at)
       VALUES (?, ?, datetime('now'))",
      params![key, value],
    )?;

    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), StoreError> {
    let conn = self.lock()?;

    conn.execute("DELETE FROM kv_store WHERE key = ?", params![key])?;

    Ok(())
  }
}
