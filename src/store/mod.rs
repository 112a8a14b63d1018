//! Durable key/value state store for the session core.
//!
//! Everything the console must remember across a restart (the session, the
//! lockout counters, the activity log) is persisted as string values under
//! the well-known keys below. The store offers no multi-key atomicity, so
//! callers order their writes to keep partial state safe: the session expiry
//! key is written last on login and removed first on logout, which makes a
//! half-written session read back as "no session".
//!
//! ## Backends
//! - [`SqliteStateStore`] for production; single `kv` table, WAL journal.
//! - [`MemoryStateStore`] for tests and ephemeral runs.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::Path;

// ── Well-known keys ──────────────────────────────────────────────

/// Opaque session token issued by the credential backend.
pub const KEY_SESSION_TOKEN: &str = "session.token";

/// Session user, JSON-encoded `AdminUser`.
pub const KEY_SESSION_USER: &str = "session.user";

/// Session expiry, RFC 3339 timestamp string. Written last on login and
/// removed first on logout; its absence means "no session".
pub const KEY_SESSION_EXPIRES: &str = "session.expires_at";

/// Consecutive failed-attempt count, integer string.
pub const KEY_LOCKOUT_ATTEMPTS: &str = "lockout.failed_attempts";

/// Lockout block deadline, RFC 3339 timestamp string.
pub const KEY_LOCKOUT_UNTIL: &str = "lockout.blocked_until";

/// Activity log, JSON array of `ActivityEntry`.
pub const KEY_ACTIVITY_LOG: &str = "activity.log";

// ── Store contract ───────────────────────────────────────────────

/// String-keyed durable store the session core persists through.
pub trait StateStore: Send + Sync {
    /// Read the value under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete `key`. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

// ── SQLite backend ───────────────────────────────────────────────

/// SQLite-backed store: one `kv` table behind a mutex-guarded connection.
pub struct SqliteStateStore {
    conn: Mutex<Connection>,
}

impl SqliteStateStore {
    /// Open (or create) the store at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open state DB: {}", db_path.display()))?;

        // WAL mode for concurrent reads + crash safety
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous  = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory SQLite store (for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory state DB")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }
}

impl StateStore for SqliteStateStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let row = conn.query_row(
            "SELECT value FROM kv WHERE key = ?1",
            rusqlite::params![key],
            |row| row.get::<_, String>(0),
        );

        match row {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            rusqlite::params![key, value, now],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM kv WHERE key = ?1", rusqlite::params![key])?;
        Ok(())
    }
}

// ── In-memory backend ────────────────────────────────────────────

/// Hash-map store with no persistence. Useful in tests and anywhere a
/// throwaway session (no restart survival) is acceptable.
#[derive(Default)]
pub struct MemoryStateStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn check_store(store: &dyn StateStore) {
        assert_eq!(store.get("missing").unwrap(), None);

        store.set("session.token", "tok_1").unwrap();
        assert_eq!(store.get("session.token").unwrap().as_deref(), Some("tok_1"));

        store.set("session.token", "tok_2").unwrap();
        assert_eq!(store.get("session.token").unwrap().as_deref(), Some("tok_2"));

        store.remove("session.token").unwrap();
        assert_eq!(store.get("session.token").unwrap(), None);

        // Removing an absent key is fine
        store.remove("session.token").unwrap();
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryStateStore::new();
        check_store(&store);
    }

    #[test]
    fn sqlite_store_roundtrip() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        check_store(&store);
    }

    #[test]
    fn sqlite_store_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("state.db");

        {
            let store = SqliteStateStore::open(&db_path).unwrap();
            store.set("lockout.failed_attempts", "3").unwrap();
        }

        let store = SqliteStateStore::open(&db_path).unwrap();
        assert_eq!(
            store.get("lockout.failed_attempts").unwrap().as_deref(),
            Some("3")
        );
    }

    #[test]
    fn keys_are_independent() {
        let store = MemoryStateStore::new();
        store.set("session.token", "tok").unwrap();
        store.set("session.user", "{}").unwrap();

        store.remove("session.token").unwrap();
        assert_eq!(store.get("session.user").unwrap().as_deref(), Some("{}"));
    }
}
