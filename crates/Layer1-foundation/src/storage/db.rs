//! SQLite disk store for cached tool results
//!
//! One database per cache directory (`{dir}/cache.db`):
//! - `cache_entries`: key → encoded value with optional absolute expiry
//! - `schema_version`: schema tracking
//!
//! WAL mode plus a busy timeout lets several processes share one directory.
//! Values are opaque bytes; the decorator layer owns their encoding.

use crate::clock::{Clock, SystemClock};
use crate::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

/// Database file inside a cache directory
pub const STORE_FILE_NAME: &str = "cache.db";

/// Current schema version
const CURRENT_SCHEMA_VERSION: i32 = 1;

/// How long a writer waits on another process's transaction
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Entry types
// ============================================================================

/// How a stored value was encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Exact serde_json encoding of the value
    Json,
    /// Lossy textual rendering stored as a JSON string
    Text,
}

impl Encoding {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Encoding::Json => "json",
            Encoding::Text => "text",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "json" => Some(Encoding::Json),
            "text" => Some(Encoding::Text),
            _ => None,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// A value as held by the store
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub encoding: Encoding,
    pub value: Vec<u8>,
}

impl StoredEntry {
    pub fn new(encoding: Encoding, value: Vec<u8>) -> Self {
        Self { encoding, value }
    }

    pub fn size(&self) -> usize {
        self.value.len()
    }
}

// ============================================================================
// DiskStore
// ============================================================================

/// Persistent key-value store with per-entry expiry and a byte size limit
pub struct DiskStore {
    directory: PathBuf,
    size_limit: u64,
    conn: Mutex<Connection>,
}

impl fmt::Debug for DiskStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskStore")
            .field("directory", &self.directory)
            .field("size_limit", &self.size_limit)
            .finish()
    }
}

impl DiskStore {
    /// Open (or create) the store in `directory`
    pub fn open(directory: impl Into<PathBuf>, size_limit: u64) -> Result<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)
            .map_err(|e| Error::Storage(format!("Failed to create cache directory: {}", e)))?;

        let db_path = directory.join(STORE_FILE_NAME);
        let conn = Connection::open(&db_path)
            .map_err(|e| Error::Storage(format!("Failed to open cache database: {}", e)))?;

        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| Error::Storage(format!("Failed to set busy timeout: {}", e)))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| Error::Storage(format!("Failed to set pragmas: {}", e)))?;

        let store = Self {
            directory,
            size_limit,
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;

        debug!(
            "Opened cache store at {} (size limit {} bytes)",
            store.directory.display(),
            size_limit
        );
        Ok(store)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn size_limit(&self) -> u64 {
        self.size_limit
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                encoding TEXT NOT NULL,
                value BLOB NOT NULL,
                size INTEGER NOT NULL,
                stored_at REAL NOT NULL,
                expire_at REAL
            );

            CREATE INDEX IF NOT EXISTS idx_cache_entries_stored
                ON cache_entries(stored_at);
            CREATE INDEX IF NOT EXISTS idx_cache_entries_expire
                ON cache_entries(expire_at);
            "#,
        )
        .map_err(|e| Error::Storage(format!("Failed to initialize schema: {}", e)))?;

        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| Error::Storage(format!("Failed to record schema version: {}", e)))?;

        Ok(())
    }

    // ========================================================================
    // Entry Operations
    // ========================================================================

    /// Fetch a live entry. Expired entries are deleted and reported absent.
    pub fn get(&self, key: &str) -> Result<Option<StoredEntry>> {
        let conn = self.lock()?;
        let now = SystemClock.now();

        let row: Option<(String, Vec<u8>, Option<f64>)> = conn
            .query_row(
                "SELECT encoding, value, expire_at FROM cache_entries WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(|e| Error::Storage(format!("Failed to read cache entry: {}", e)))?;

        let Some((encoding, value, expire_at)) = row else {
            return Ok(None);
        };

        if expire_at.is_some_and(|at| at <= now) {
            conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])
                .map_err(|e| Error::Storage(format!("Failed to drop expired entry: {}", e)))?;
            return Ok(None);
        }

        match Encoding::from_db_str(&encoding) {
            Some(encoding) => Ok(Some(StoredEntry { encoding, value })),
            None => {
                warn!("Unknown cache encoding '{}' for key {}, ignoring entry", encoding, key);
                Ok(None)
            }
        }
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Store an entry, overwriting any previous value for `key`
    pub fn set(&self, key: &str, entry: &StoredEntry, expire: Option<Duration>) -> Result<()> {
        let conn = self.lock()?;
        let now = SystemClock.now();
        let expire_at = expire.map(|ttl| now + ttl.as_secs_f64());

        conn.execute(
            r#"
            INSERT OR REPLACE INTO cache_entries (key, encoding, value, size, stored_at, expire_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                key,
                entry.encoding.as_db_str(),
                entry.value,
                entry.size() as i64,
                now,
                expire_at,
            ],
        )
        .map_err(|e| Error::Storage(format!("Failed to write cache entry: {}", e)))?;

        self.cull(&conn, now)
    }

    pub fn remove(&self, key: &str) -> Result<bool> {
        let conn = self.lock()?;
        let removed = conn
            .execute("DELETE FROM cache_entries WHERE key = ?1", params![key])
            .map_err(|e| Error::Storage(format!("Failed to remove cache entry: {}", e)))?;
        Ok(removed > 0)
    }

    /// Remove every entry, returning how many were removed
    pub fn clear(&self) -> Result<usize> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM cache_entries", [])
            .map_err(|e| Error::Storage(format!("Failed to clear cache: {}", e)))
    }

    /// Remove expired entries, returning how many were removed
    pub fn purge_expired(&self) -> Result<usize> {
        let conn = self.lock()?;
        Self::purge_expired_locked(&conn, SystemClock.now())
    }

    fn purge_expired_locked(conn: &Connection, now: f64) -> Result<usize> {
        conn.execute(
            "DELETE FROM cache_entries WHERE expire_at IS NOT NULL AND expire_at <= ?1",
            params![now],
        )
        .map_err(|e| Error::Storage(format!("Failed to purge expired entries: {}", e)))
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Number of live (unexpired) entries
    pub fn len(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM cache_entries WHERE expire_at IS NULL OR expire_at > ?1",
                params![SystemClock.now()],
                |row| row.get(0),
            )
            .map_err(|e| Error::Storage(format!("Failed to count entries: {}", e)))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Bytes occupied by stored values
    pub fn volume(&self) -> Result<u64> {
        let conn = self.lock()?;
        Self::volume_locked(&conn)
    }

    fn volume_locked(conn: &Connection) -> Result<u64> {
        let bytes: i64 = conn
            .query_row(
                "SELECT COALESCE(SUM(size), 0) FROM cache_entries",
                [],
                |row| row.get(0),
            )
            .map_err(|e| Error::Storage(format!("Failed to compute volume: {}", e)))?;
        Ok(bytes.max(0) as u64)
    }

    /// Enforce the size limit: expired entries go first, then the oldest.
    fn cull(&self, conn: &Connection, now: f64) -> Result<()> {
        let mut volume = Self::volume_locked(conn)?;
        if volume <= self.size_limit {
            return Ok(());
        }

        let purged = Self::purge_expired_locked(conn, now)?;
        if purged > 0 {
            volume = Self::volume_locked(conn)?;
        }

        let mut evicted = 0usize;
        while volume > self.size_limit {
            let removed = conn
                .execute(
                    r#"
                    DELETE FROM cache_entries WHERE key IN (
                        SELECT key FROM cache_entries ORDER BY stored_at ASC, rowid ASC LIMIT 1
                    )
                    "#,
                    [],
                )
                .map_err(|e| Error::Storage(format!("Failed to evict entry: {}", e)))?;
            if removed == 0 {
                break;
            }
            evicted += removed;
            volume = Self::volume_locked(conn)?;
        }

        if purged + evicted > 0 {
            debug!(
                "Culled {} expired and {} oldest entries from {}",
                purged,
                evicted,
                self.directory.display()
            );
        }
        Ok(())
    }
}
