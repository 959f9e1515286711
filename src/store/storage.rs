//! SQLite and in-memory store backends.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::{ensure_storable, CacheStorage, StoredResponse};
use crate::request::{RequestKey, ResponseSnapshot};

/// Store backend kept entirely in memory.
/// Used for `--ephemeral` runs; nothing survives the process.
#[derive(Default)]
pub struct MemoryStorage {
  stores: Mutex<BTreeMap<String, HashMap<String, StoredResponse>>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStorage for MemoryStorage {
  fn open(&self, store: &str) -> Result<()> {
    let mut stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    stores.entry(store.to_string()).or_default();
    Ok(())
  }

  fn has(&self, store: &str) -> Result<bool> {
    let stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(stores.contains_key(store))
  }

  fn names(&self) -> Result<Vec<String>> {
    let stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(stores.keys().cloned().collect())
  }

  fn delete(&self, store: &str) -> Result<bool> {
    let mut stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(stores.remove(store).is_some())
  }

  fn get(&self, store: &str, key: &RequestKey) -> Result<Option<StoredResponse>> {
    let stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      stores
        .get(store)
        .and_then(|entries| entries.get(key.hash()))
        .cloned(),
    )
  }

  fn put(&self, store: &str, key: &RequestKey, response: &ResponseSnapshot) -> Result<()> {
    ensure_storable(key)?;
    let mut stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    stores.entry(store.to_string()).or_default().insert(
      key.hash().to_string(),
      StoredResponse {
        response: response.clone(),
        cached_at: Utc::now(),
      },
    );
    Ok(())
  }

  fn len(&self, store: &str) -> Result<usize> {
    let stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(stores.get(store).map(HashMap::len).unwrap_or(0))
  }
}

/// SQLite-based store backend.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the store database at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create store directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open store database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory store: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("okapi-sw").join("stores.db"))
  }

  /// Run database migrations for store tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run store migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for store tables.
const STORE_SCHEMA: &str = r#"
-- One row per store generation
CREATE TABLE IF NOT EXISTS stores (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots keyed by request identity
CREATE TABLE IF NOT EXISTS entries (
    store_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (store_name, request_key)
);

CREATE INDEX IF NOT EXISTS idx_entries_store ON entries(store_name);
"#;

impl CacheStorage for SqliteStorage {
  fn open(&self, store: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO stores (name) VALUES (?)",
        params![store],
      )
      .map_err(|e| eyre!("Failed to open store {}: {}", store, e))?;

    Ok(())
  }

  fn has(&self, store: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let found: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM stores WHERE name = ?",
        params![store],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up store {}: {}", store, e))?;

    Ok(found.is_some())
  }

  fn names(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM stores ORDER BY created_at, name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list stores: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read store name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, store: &str) -> Result<bool> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entries WHERE store_name = ?", params![store])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", store, e))?;
    let removed = tx
      .execute("DELETE FROM stores WHERE name = ?", params![store])
      .map_err(|e| eyre!("Failed to delete store {}: {}", store, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn get(&self, store: &str, key: &RequestKey) -> Result<Option<StoredResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, cached_at FROM entries
         WHERE store_name = ? AND request_key = ?",
        params![store, key.hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in {}: {}", key, store, e))?;

    match row {
      Some((status, headers, body, cached_at)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers of {}: {}", key, e))?;
        let mut response = ResponseSnapshot::new(status, body);
        response.headers = headers;
        Ok(Some(StoredResponse {
          response,
          cached_at: parse_datetime(&cached_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, store: &str, key: &RequestKey, response: &ResponseSnapshot) -> Result<()> {
    ensure_storable(key)?;

    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO stores (name) VALUES (?)",
      params![store],
    )
    .map_err(|e| eyre!("Failed to open store {}: {}", store, e))?;

    tx.execute(
      "INSERT OR REPLACE INTO entries (store_name, request_key, method, url, status, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        store,
        key.hash(),
        key.method(),
        key.url(),
        response.status,
        headers,
        response.body.as_ref()
      ],
    )
    .map_err(|e| eyre!("Failed to store {}: {}", key, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn len(&self, store: &str) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM entries WHERE store_name = ?",
        params![store],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of {}: {}", store, e))?;

    Ok(count as usize)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
