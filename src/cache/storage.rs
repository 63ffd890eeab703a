//! Cache storage trait and SQLite implementation.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

use super::traits::{CacheEntry, SyncRegistrar};

/// Trait for named-cache storage backends.
///
/// Every method is atomic on its own: a reader never sees half of a `put_all`
/// or a cache that is half deleted.
pub trait CacheStorage: Send + Sync {
  /// Create the cache if it does not exist yet.
  fn open_cache(&self, cache: &str) -> Result<()>;

  fn has_cache(&self, cache: &str) -> Result<bool>;

  /// All cache names, oldest first.
  fn cache_names(&self) -> Result<Vec<String>>;

  /// Delete a cache and every entry in it. Returns false if it did not exist.
  fn delete_cache(&self, cache: &str) -> Result<bool>;

  fn get<T: CacheEntry>(&self, cache: &str, key: &str) -> Result<Option<T>>;

  /// Insert or replace one entry, creating the cache if needed.
  fn put<T: CacheEntry>(&self, cache: &str, entry: &T) -> Result<()>;

  /// Insert only if the key is free. Returns whether the entry was stored.
  fn put_if_absent<T: CacheEntry>(&self, cache: &str, entry: &T) -> Result<bool>;

  /// Store all entries or none of them.
  fn put_all<T: CacheEntry>(&self, cache: &str, entries: &[T]) -> Result<()>;

  /// Delete one entry. Returns false if it was not there.
  fn delete(&self, cache: &str, key: &str) -> Result<bool>;

  /// All entries of a cache in insertion order. Rows that fail to decode are skipped.
  fn entries<T: CacheEntry>(&self, cache: &str) -> Result<Vec<T>>;

  /// Every stored key of a cache in insertion order, readable or not.
  fn keys(&self, cache: &str) -> Result<Vec<String>>;

  fn count(&self, cache: &str) -> Result<usize>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
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

    Ok(data_dir.join("formsync").join("cache.db"))
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.conn()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Named caches (one per asset generation, plus the submission queue)
CREATE TABLE IF NOT EXISTS caches (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Entries keep their id across replacement so enumeration follows first insertion
CREATE TABLE IF NOT EXISTS cache_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cache_name TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (cache_name, entry_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_cache ON cache_entries(cache_name, id);

-- Background sync tags waiting for connectivity
CREATE TABLE IF NOT EXISTS sync_registrations (
    tag TEXT PRIMARY KEY,
    registered_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

const UPSERT_ENTRY: &str = "INSERT INTO cache_entries (cache_name, entry_key, data, cached_at)
   VALUES (?, ?, ?, datetime('now'))
   ON CONFLICT (cache_name, entry_key)
   DO UPDATE SET data = excluded.data, cached_at = excluded.cached_at";

fn encode<T: CacheEntry>(entry: &T) -> Result<Vec<u8>> {
  serde_json::to_vec(entry).map_err(|e| eyre!("Failed to serialize cache entry: {}", e))
}

fn ensure_cache(conn: &Connection, cache: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO caches (name) VALUES (?)",
      params![cache],
    )
    .map_err(|e| eyre!("Failed to create cache {}: {}", cache, e))?;
  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn open_cache(&self, cache: &str) -> Result<()> {
    let conn = self.conn()?;
    ensure_cache(&conn, cache)
  }

  fn has_cache(&self, cache: &str) -> Result<bool> {
    let conn = self.conn()?;
    let found: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM caches WHERE name = ?",
        params![cache],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up cache {}: {}", cache, e))?;
    Ok(found.is_some())
  }

  fn cache_names(&self) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM caches ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn delete_cache(&self, cache: &str) -> Result<bool> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE cache_name = ?",
      params![cache],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", cache, e))?;
    let removed = tx
      .execute("DELETE FROM caches WHERE name = ?", params![cache])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", cache, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn get<T: CacheEntry>(&self, cache: &str, key: &str) -> Result<Option<T>> {
    let conn = self.conn()?;
    let data: Option<Vec<u8>> = conn
      .query_row(
        "SELECT data FROM cache_entries WHERE cache_name = ? AND entry_key = ?",
        params![cache, key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {} from {}: {}", key, cache, e))?;

    match data {
      Some(data) => {
        let entry = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize {} from {}: {}", key, cache, e))?;
        Ok(Some(entry))
      }
      None => Ok(None),
    }
  }

  fn put<T: CacheEntry>(&self, cache: &str, entry: &T) -> Result<()> {
    let data = encode(entry)?;
    let key = entry.cache_key();
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_cache(&tx, cache)?;
    tx.execute(UPSERT_ENTRY, params![cache, key, data])
      .map_err(|e| eyre!("Failed to store {} in {}: {}", key, cache, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn put_if_absent<T: CacheEntry>(&self, cache: &str, entry: &T) -> Result<bool> {
    let data = encode(entry)?;
    let key = entry.cache_key();
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_cache(&tx, cache)?;
    let inserted = tx
      .execute(
        "INSERT OR IGNORE INTO cache_entries (cache_name, entry_key, data) VALUES (?, ?, ?)",
        params![cache, key, data],
      )
      .map_err(|e| eyre!("Failed to store {} in {}: {}", key, cache, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(inserted > 0)
  }

  fn put_all<T: CacheEntry>(&self, cache: &str, entries: &[T]) -> Result<()> {
    let encoded = entries
      .iter()
      .map(|entry| Ok((entry.cache_key(), encode(entry)?)))
      .collect::<Result<Vec<_>>>()?;

    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_cache(&tx, cache)?;
    for (key, data) in &encoded {
      tx.execute(UPSERT_ENTRY, params![cache, key, data])
        .map_err(|e| eyre!("Failed to store {} in {}: {}", key, cache, e))?;
    }

    // Dropping the transaction on an early return rolls everything back
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn delete(&self, cache: &str, key: &str) -> Result<bool> {
    let conn = self.conn()?;
    let removed = conn
      .execute(
        "DELETE FROM cache_entries WHERE cache_name = ? AND entry_key = ?",
        params![cache, key],
      )
      .map_err(|e| eyre!("Failed to delete {} from {}: {}", key, cache, e))?;
    Ok(removed > 0)
  }

  fn entries<T: CacheEntry>(&self, cache: &str) -> Result<Vec<T>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT entry_key, data FROM cache_entries WHERE cache_name = ? ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare entry query: {}", e))?;

    let rows = stmt
      .query_map(params![cache], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
      })
      .map_err(|e| eyre!("Failed to query entries of {}: {}", cache, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read entries of {}: {}", cache, e))?;

    let entries = rows
      .into_iter()
      .filter_map(|(key, data)| match serde_json::from_slice(&data) {
        Ok(entry) => Some(entry),
        Err(e) => {
          warn!(cache, key = %key, error = %e, "Skipping unreadable cache entry");
          None
        }
      })
      .collect();

    Ok(entries)
  }

  fn keys(&self, cache: &str) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT entry_key FROM cache_entries WHERE cache_name = ? ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare key query: {}", e))?;

    let keys = stmt
      .query_map(params![cache], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query keys of {}: {}", cache, e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read keys of {}: {}", cache, e))?;

    Ok(keys)
  }

  fn count(&self, cache: &str) -> Result<usize> {
    let conn = self.conn()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE cache_name = ?",
        params![cache],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of {}: {}", cache, e))?;
    Ok(count as usize)
  }
}

impl SyncRegistrar for SqliteStorage {
  fn register(&self, tag: &str) -> Result<()> {
    let conn = self.conn()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO sync_registrations (tag) VALUES (?)",
        params![tag],
      )
      .map_err(|e| eyre!("Failed to register sync {}: {}", tag, e))?;
    Ok(())
  }

  fn pending(&self) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT tag FROM sync_registrations ORDER BY registered_at, tag")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let tags = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list sync registrations: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read sync registration: {}", e))?;

    Ok(tags)
  }

  fn complete(&self, tag: &str) -> Result<()> {
    let conn = self.conn()?;
    conn
      .execute(
        "DELETE FROM sync_registrations WHERE tag = ?",
        params![tag],
      )
      .map_err(|e| eyre!("Failed to complete sync {}: {}", tag, e))?;
    Ok(())
  }
}
