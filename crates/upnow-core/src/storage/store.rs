//! SQLite-backed pipeline state.
//!
//! Provides persistent storage for:
//! - The process-wide "has pending alarms" flag read at boot
//! - Theme fallback colors used when a trigger carries none
//! - Exact-alarm registrations (see [`super::registrations`])

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection};

use super::data_dir;
use crate::alarm::Theme;
use crate::error::{CoreError, StorageError};

const KEY_PENDING_ALARMS: &str = "has_pending_alarms";
const KEY_THEME_FALLBACK: &str = "theme_fallback";

/// SQLite database for alarm pipeline state.
///
/// The connection sits behind a mutex so one store can be shared between
/// the scheduler and the router across tasks.
pub struct AlarmStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for AlarmStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlarmStore").finish_non_exhaustive()
    }
}

impl AlarmStore {
    /// Open the database at `~/.config/upnow/upnow.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the data directory or database cannot be opened.
    pub fn open_default() -> Result<Self, CoreError> {
        let path = data_dir()?.join("upnow.db");
        Ok(Self::open(&path)?)
    }

    /// Open (or create) the database at `path`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path).map_err(|source| StorageError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory database.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub fn open_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Locked)
    }

    fn migrate(&self) -> Result<(), StorageError> {
        self.conn()?.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS registrations (
                alarm_id    TEXT PRIMARY KEY,
                slot        INTEGER NOT NULL,
                fire_at     TEXT NOT NULL,
                payload     TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_registrations_fire_at ON registrations(fire_at);",
        )?;
        Ok(())
    }

    /// Get a value from the kv store.
    pub fn kv_get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
        let result = stmt.query_row(params![key], |row| row.get::<_, String>(0));
        match result {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Set a value in the kv store.
    pub fn kv_set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Whether at least one alarm was registered when the flag was last written.
    ///
    /// An absent flag reads as `false`.
    pub fn has_pending_alarms(&self) -> Result<bool, StorageError> {
        match self.kv_get(KEY_PENDING_ALARMS)?.as_deref() {
            None => Ok(false),
            Some("true") => Ok(true),
            Some("false") => Ok(false),
            Some(other) => Err(StorageError::Corrupt {
                key: KEY_PENDING_ALARMS.into(),
                message: format!("expected boolean, found '{other}'"),
            }),
        }
    }

    /// Only the trigger scheduler writes this flag.
    pub(crate) fn set_pending_alarms(&self, pending: bool) -> Result<(), StorageError> {
        self.kv_set(KEY_PENDING_ALARMS, if pending { "true" } else { "false" })
    }

    /// Theme colors to use when a trigger arrives without any.
    pub fn theme_fallback(&self) -> Result<Option<Theme>, StorageError> {
        match self.kv_get(KEY_THEME_FALLBACK)? {
            None => Ok(None),
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| StorageError::Corrupt {
                    key: KEY_THEME_FALLBACK.into(),
                    message: e.to_string(),
                }),
        }
    }

    pub fn set_theme_fallback(&self, theme: &Theme) -> Result<(), StorageError> {
        let json = serde_json::to_string(theme).map_err(|e| StorageError::Corrupt {
            key: KEY_THEME_FALLBACK.into(),
            message: e.to_string(),
        })?;
        self.kv_set(KEY_THEME_FALLBACK, &json)
    }
}
