//! SQLite key-value storage.
//!
//! Durable home for checkpoints, cached blobs, continuation handles and
//! leases. Values are opaque strings; expiry is stored alongside and only
//! interpreted by callers.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{Error, Result};

/// A stored value and its optional expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub value: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Keyed blob storage. Implementations must make `put_unless_live` atomic.
pub trait KvStore {
    fn put(&self, key: &str, value: &str, expires_at: Option<DateTime<Utc>>) -> Result<()>;

    fn get(&self, key: &str) -> Result<Option<Entry>>;

    fn delete(&self, key: &str) -> Result<()>;

    /// Write `value` unless a live entry with a different value exists.
    /// Returns the blocking entry when the write was refused.
    fn put_unless_live(
        &self,
        key: &str,
        value: &str,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Option<Entry>>;

    /// Drop every entry that expired at or before `now`. Returns the count.
    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Storage backend. Owns the SQLite connection.
pub struct SqliteKvStore {
    conn: Connection,
}

impl SqliteKvStore {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<()> {
        // WAL mode so the dispatcher and manual runs can share the file
        self.conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS kv (
                key         TEXT PRIMARY KEY,
                value       TEXT NOT NULL,
                expires_at  TEXT,
                updated_at  TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_kv_expiry ON kv(expires_at)
                WHERE expires_at IS NOT NULL;
            ",
        )?;

        Ok(())
    }

    /// Keys currently stored under a prefix, live or not.
    pub fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key FROM kv WHERE substr(key, 1, ?2) = ?1 ORDER BY key ASC")?;
        let keys = stmt
            .query_map(params![prefix, prefix.chars().count() as i64], |row| {
                row.get(0)
            })?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }
}

impl KvStore for SqliteKvStore {
    fn put(&self, key: &str, value: &str, expires_at: Option<DateTime<Utc>>) -> Result<()> {
        put_on(&self.conn, key, value, expires_at)
    }

    fn get(&self, key: &str) -> Result<Option<Entry>> {
        get_on(&self.conn, key)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn put_unless_live(
        &self,
        key: &str,
        value: &str,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Option<Entry>> {
        let tx = self.conn.unchecked_transaction()?;
        if let Some(current) = get_on(&tx, key)? {
            if current.is_live(now) && current.value != value {
                return Ok(Some(current));
            }
        }
        put_on(&tx, key, value, expires_at)?;
        tx.commit()?;
        Ok(None)
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        // RFC 3339 in UTC sorts lexicographically
        let n = self.conn.execute(
            "DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![to_stored(now)],
        )?;
        Ok(n)
    }
}

// ---------------------------------------------------------------------------
// Inner functions take &Connection so they work with both
// Connection (auto-commit) and Transaction (deref to Connection).
// ---------------------------------------------------------------------------

fn put_on(
    conn: &Connection,
    key: &str,
    value: &str,
    expires_at: Option<DateTime<Utc>>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO kv (key, value, expires_at, updated_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            expires_at = excluded.expires_at,
            updated_at = excluded.updated_at",
        params![key, value, expires_at.map(to_stored), to_stored(Utc::now())],
    )?;
    Ok(())
}

fn get_on(conn: &Connection, key: &str) -> Result<Option<Entry>> {
    let row: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT value, expires_at FROM kv WHERE key = ?1",
            params![key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    row.map(|(value, expires)| {
        let expires_at = expires
            .map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|d| d.with_timezone(&Utc))
                    .map_err(|e| Error::Other(format!("bad expiry for {key}: {e}")))
            })
            .transpose()?;
        Ok(Entry { value, expires_at })
    })
    .transpose()
}

fn to_stored(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
