//! Snapshot persistence for board state.
//!
//! The board saves a handful of named key→value snapshots (entities,
//! conversations, topics, turn counts) on every mutation and loads them at
//! startup. Backends implement [`SnapshotStore`]:
//!
//! - [`SqliteSnapshotStore`]: one row per snapshot key:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS snapshots (
//!     key        TEXT PRIMARY KEY,
//!     data       BLOB NOT NULL,
//!     updated_at TEXT NOT NULL,
//!     checksum   TEXT
//! );
//! ```
//!
//! - [`MemorySnapshotStore`]: a map behind a mutex, for tests and ephemeral
//!   boards.
//!
//! Loading never fails the board: a missing, unreadable or corrupt snapshot
//! is logged and replaced by the compiled-in default (see [`load_or_default`]).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::config::PersistenceConfig;
use crate::error::{FragmentError, Result};

/// Snapshot key for the entity list.
pub const ENTITIES_KEY: &str = "fragment_entities";
/// Snapshot key for pair → messages.
pub const CONVERSATIONS_KEY: &str = "fragment_autonomous_conversations";
/// Snapshot key for pair → topic.
pub const TOPICS_KEY: &str = "fragment_autonomous_topics";
/// Snapshot key for pair → turn count.
pub const MESSAGE_COUNTS_KEY: &str = "fragment_autonomous_message_counts";
/// Snapshot key for pair → restarted rounds.
pub const ROUNDS_KEY: &str = "fragment_autonomous_rounds";

/// A key→bytes store for board snapshots.
pub trait SnapshotStore: Send {
    /// Read the bytes stored under `key`.
    ///
    /// # Errors
    /// Backend failures, or [`FragmentError::CorruptSnapshot`] when the stored
    /// bytes fail verification.
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Replace the bytes stored under `key`.
    ///
    /// # Errors
    /// Backend failures.
    fn save(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Remove every snapshot whose key starts with `prefix`. Returns how many
    /// were removed.
    ///
    /// # Errors
    /// Backend failures.
    fn clear_prefix(&self, prefix: &str) -> Result<usize>;
}

/// Serialise `value` as JSON and save it under `key`.
///
/// # Errors
/// [`FragmentError::Serialization`] or backend failures.
pub fn save_json<T: Serialize>(store: &dyn SnapshotStore, key: &str, value: &T) -> Result<()> {
    let json = serde_json::to_vec(value).map_err(|e| FragmentError::Serialization(e.to_string()))?;
    store.save(key, &json)
}

/// Load and decode the JSON snapshot under `key`.
///
/// # Errors
/// Backend failures, corruption, or [`FragmentError::Serialization`].
pub fn load_json<T: DeserializeOwned>(store: &dyn SnapshotStore, key: &str) -> Result<Option<T>> {
    let Some(data) = store.load(key)? else {
        return Ok(None);
    };
    let value = serde_json::from_slice(&data).map_err(|e| FragmentError::Serialization(e.to_string()))?;
    Ok(Some(value))
}

/// Load the snapshot under `key`, falling back to `default` when it is
/// missing, unreadable or corrupt. Failures are logged, never returned.
pub fn load_or_default<T: DeserializeOwned>(store: &dyn SnapshotStore, key: &str, default: T) -> T {
    match load_json(store, key) {
        Ok(Some(value)) => value,
        Ok(None) => default,
        Err(e) => {
            warn!(key, error = %e, "Snapshot unreadable, using defaults");
            default
        }
    }
}

// ---------------------------------------------------------------------------
// CRC-32 checksum helper
// ---------------------------------------------------------------------------

fn crc32_hex(data: &[u8]) -> String {
    format!("{:08x}", crc32_compute(data))
}

/// CRC-32 (ISO 3309 / ITU-T V.42).
fn crc32_compute(data: &[u8]) -> u32 {
    const POLY: u32 = 0xEDB8_8320;
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            if crc & 1 == 1 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

// ---------------------------------------------------------------------------
// SqliteSnapshotStore
// ---------------------------------------------------------------------------

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS snapshots (
    key        TEXT PRIMARY KEY,
    data       BLOB NOT NULL,
    updated_at TEXT NOT NULL,
    checksum   TEXT
);";

/// SQLite-backed snapshot store.
pub struct SqliteSnapshotStore {
    conn: Mutex<Connection>,
    checksum_enabled: bool,
    db_path: PathBuf,
}

impl std::fmt::Debug for SqliteSnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSnapshotStore")
            .field("db_path", &self.db_path)
            .field("checksum_enabled", &self.checksum_enabled)
            .finish_non_exhaustive()
    }
}

impl SqliteSnapshotStore {
    /// Open (or create) a database at `path`.
    ///
    /// # Errors
    /// Returns [`FragmentError::Database`] on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P, config: &PersistenceConfig) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(&db_path, flags)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %db_path.display(), "Snapshot store opened");

        Ok(Self {
            conn: Mutex::new(conn),
            checksum_enabled: config.checksum_enabled,
            db_path,
        })
    }

    /// Open an in-memory database (useful for tests).
    ///
    /// # Errors
    /// Returns [`FragmentError::Database`] on SQLite failures.
    pub fn open_in_memory(config: &PersistenceConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            checksum_enabled: config.checksum_enabled,
            db_path: PathBuf::from(":memory:"),
        })
    }

    /// Path to the database file (or `:memory:`).
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT data, checksum FROM snapshots WHERE key = ?1")?;
        let row: Option<(Vec<u8>, Option<String>)> = match stmt.query_row(params![key], |row| Ok((row.get(0)?, row.get(1)?))) {
            Ok(row) => Some(row),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };

        let Some((data, stored_checksum)) = row else {
            return Ok(None);
        };

        if self.checksum_enabled {
            if let Some(expected) = stored_checksum {
                let actual = crc32_hex(&data);
                if expected != actual {
                    return Err(FragmentError::CorruptSnapshot {
                        key: key.to_string(),
                        reason: format!("checksum {actual} does not match stored {expected}"),
                    });
                }
            }
        }

        Ok(Some(data))
    }

    fn save(&self, key: &str, data: &[u8]) -> Result<()> {
        let start = Instant::now();
        let checksum = self.checksum_enabled.then(|| crc32_hex(data));
        let now = Utc::now().to_rfc3339();

        self.conn.lock().execute(
            "INSERT INTO snapshots (key, data, updated_at, checksum)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at,
                checksum = excluded.checksum",
            params![key, data, now, checksum],
        )?;

        debug!(
            key,
            bytes = data.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Saved snapshot"
        );
        Ok(())
    }

    fn clear_prefix(&self, prefix: &str) -> Result<usize> {
        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM snapshots WHERE key LIKE ?1 ESCAPE '\\'", params![pattern])?;
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// MemorySnapshotStore
// ---------------------------------------------------------------------------

/// Snapshot store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySnapshotStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing has been saved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn save(&self, key: &str, data: &[u8]) -> Result<()> {
        self.entries.lock().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn clear_prefix(&self, prefix: &str) -> Result<usize> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok(before - entries.len())
    }
}

/// Open the backend named by `config.backend`, or `None` for `"none"`.
///
/// # Errors
/// [`FragmentError::Config`] for an unknown backend, or SQLite failures.
pub fn open_store(config: &PersistenceConfig) -> Result<Option<Box<dyn SnapshotStore>>> {
    match config.backend.as_str() {
        "sqlite" => Ok(Some(Box::new(SqliteSnapshotStore::open(&config.path, config)?))),
        "memory" => Ok(Some(Box::new(MemorySnapshotStore::new()))),
        "none" => Ok(None),
        other => Err(FragmentError::Config(format!("unknown persistence backend '{other}'"))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
