//! SQLite-backed preference store.
//!
//! Holds the handful of key/value settings the sync engine and the host UI
//! share: endpoint, token, poll interval, directory, sync switch and the two
//! counters updated after every successful upload.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::error::Result;

pub const PREF_API_URL: &str = "api_url";
pub const PREF_TOKEN: &str = "token";
pub const PREF_INTERVAL: &str = "interval";
pub const PREF_DIRECTORY_PATH: &str = "directory_uri";
pub const PREF_LAST_SYNC_TIME: &str = "last_sync_time";
pub const PREF_TOTAL_UPLOAD_NUMBER: &str = "total_upload_number";
pub const PREF_SYNC_ENABLED: &str = "is_sync_enabled";

/// Format used for the persisted last-sync timestamp.
pub const SYNC_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS preferences (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// One run flag per database file, shared by every store opened on it
lazy_static::lazy_static! {
    static ref RUN_FLAGS: Mutex<HashMap<PathBuf, Arc<AtomicBool>>> = Mutex::new(HashMap::new());
}

fn run_flag_for(path: &Path) -> Arc<AtomicBool> {
    let mut flags = RUN_FLAGS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    flags.entry(path.to_path_buf()).or_default().clone()
}

pub struct PreferenceStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    run_flag: Arc<AtomicBool>,
}

impl PreferenceStore {
    /// Open (or create) the store at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        info!("Preference store opened at {:?}", db_path);

        let canonical = std::fs::canonicalize(db_path).unwrap_or_else(|_| db_path.to_path_buf());
        let run_flag = run_flag_for(&canonical);
        Self::with_connection(conn, Some(canonical), run_flag)
    }

    /// In-memory stores get a run flag of their own.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(
            Connection::open_in_memory()?,
            None,
            Arc::new(AtomicBool::new(false)),
        )
    }

    fn with_connection(conn: Connection, path: Option<PathBuf>, run_flag: Arc<AtomicBool>) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
            run_flag,
        })
    }

    /// Canonical database path; `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Single-flight flag shared by every engine syncing this database.
    pub fn run_flag(&self) -> Arc<AtomicBool> {
        self.run_flag.clone()
    }

    pub fn run_in_progress(&self) -> bool {
        self.run_flag.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A panic while holding the lock leaves the connection itself intact.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get_string(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock();
        let value = conn
            .query_row(
                "SELECT value FROM preferences WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn put_string(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO preferences (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        debug!("Preference {} updated", key);
        Ok(())
    }

    pub fn get_i64(&self, key: &str, default: i64) -> Result<i64> {
        Ok(self
            .get_string(key)?
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default))
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        Ok(match self.get_string(key)?.as_deref() {
            Some("true") => true,
            Some("false") => false,
            _ => default,
        })
    }

    pub fn put_bool(&self, key: &str, value: bool) -> Result<()> {
        self.put_string(key, if value { "true" } else { "false" })
    }

    /// Store the three values edited on the settings screen as raw text.
    pub fn save_parameters(&self, api_url: &str, token: &str, interval: &str) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for (key, value) in [
            (PREF_API_URL, api_url),
            (PREF_TOKEN, token),
            (PREF_INTERVAL, interval),
        ] {
            tx.execute(
                "INSERT OR REPLACE INTO preferences (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
        }
        tx.commit()?;
        info!("Parameters saved");
        Ok(())
    }

    pub fn set_directory(&self, reference: &str) -> Result<()> {
        self.put_string(PREF_DIRECTORY_PATH, reference)
    }

    pub fn sync_enabled(&self) -> Result<bool> {
        self.get_bool(PREF_SYNC_ENABLED, false)
    }

    pub fn set_sync_enabled(&self, enabled: bool) -> Result<()> {
        self.put_bool(PREF_SYNC_ENABLED, enabled)
    }

    pub fn last_sync_time(&self) -> Result<Option<String>> {
        self.get_string(PREF_LAST_SYNC_TIME)
    }

    pub fn total_upload_number(&self) -> Result<i64> {
        self.get_i64(PREF_TOTAL_UPLOAD_NUMBER, 0)
    }

    /// Record one successful upload at `at`.
    ///
    /// The read-increment-write of the counter runs in a single transaction
    /// that takes the write lock up front, so it waits out other writers
    /// instead of failing on upgrade. Returns the formatted timestamp and
    /// the new total.
    pub fn record_upload(&self, at: DateTime<Local>) -> Result<(String, i64)> {
        let formatted = at.format(SYNC_TIME_FORMAT).to_string();

        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current: Option<String> = tx
            .query_row(
                "SELECT value FROM preferences WHERE key = ?1",
                params![PREF_TOTAL_UPLOAD_NUMBER],
                |row| row.get(0),
            )
            .optional()?;
        let total = current
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(0)
            + 1;

        tx.execute(
            "INSERT OR REPLACE INTO preferences (key, value) VALUES (?1, ?2)",
            params![PREF_LAST_SYNC_TIME, formatted],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO preferences (key, value) VALUES (?1, ?2)",
            params![PREF_TOTAL_UPLOAD_NUMBER, total.to_string()],
        )?;
        tx.commit()?;

        Ok((formatted, total))
    }
}
