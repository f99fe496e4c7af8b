//! Two interchangeable idempotency-store backends with identical semantics
//! (spec.md §4.4): an in-memory map and a single-file SQLite table, both
//! guarded by a reentrant mutex per spec.md §5 ("the idempotency store...
//! is protected by a single reentrant mutex that wraps each public
//! operation"). Grounded on `original_source/core/execution/
//! _idem_store_sqlite.py` (literal schema/pragma/SQL) and
//! `cooprefr-bettersys/rust-backend/src/vault/vault_db.rs` (WAL +
//! synchronous=NORMAL pragma pattern).

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use rusqlite::Connection;

use crate::clock::Clock;

use super::IdempotencyError;

/// Default TTL applied by `put` when no TTL is given and the key is new
/// (`idem_guard.py`'s default `ttl_sec=600.0` for `pre_submit_check`, but
/// the store-level default mirrors `IdempotencyStore.mark`'s 300s).
pub const DEFAULT_TTL_S: f64 = 300.0;

/// Default retention window applied by `cleanup_expired` (spec.md §3, §4.4:
/// 30 days unless the caller overrides it).
pub const DEFAULT_RETENTION_S: f64 = 30.0 * 24.0 * 3600.0;

/// Default path for the durable backend when none is configured (spec.md §6).
pub const DEFAULT_SQLITE_PATH: &str = "data/idem.db";

fn ns(seconds: f64) -> i64 {
    (seconds * 1e9) as i64
}

fn is_unexpired(expiry_ns: Option<i64>, now_ns: i64) -> bool {
    match expiry_ns {
        Some(exp) => exp >= now_ns,
        None => true,
    }
}

/// Common contract for both backends. All operations are non-destructive on
/// read (spec.md invariant: `seen`/`get` never delete); only
/// `cleanup_expired` deletes, and only rows past the retention window.
pub trait IdempotencyStore: Send + Sync {
    fn seen(&self, key: &str) -> Result<bool, IdempotencyError>;
    fn get(&self, key: &str) -> Result<Option<String>, IdempotencyError>;
    /// `ttl_s = None` preserves the existing expiry if `key` already has a
    /// row, otherwise applies `DEFAULT_TTL_S`.
    fn put(&self, key: &str, value: &str, ttl_s: Option<f64>) -> Result<(), IdempotencyError>;
    /// Upserts a presence marker with a new expiry, preserving the existing
    /// value (if any) rather than clobbering it with an empty one.
    fn mark(&self, key: &str, ttl_s: f64) -> Result<(), IdempotencyError>;
    fn cleanup_expired(&self, retention_s: f64) -> Result<usize, IdempotencyError>;
    fn clear(&self) -> Result<(), IdempotencyError>;
    fn size(&self) -> Result<usize, IdempotencyError>;
    /// Best-effort; callers share the backend via `Arc` so the connection
    /// itself still closes only when the last reference drops.
    fn close(&self) -> Result<(), IdempotencyError> {
        Ok(())
    }
}

struct MemoryEntry {
    value: Option<String>,
    expiry_ns: Option<i64>,
    #[allow(dead_code)]
    updated_ns: i64,
}

/// In-memory backend: a map under a reentrant mutex (spec.md §4.4).
pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    state: ReentrantMutex<RefCell<HashMap<String, MemoryEntry>>>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: ReentrantMutex::new(RefCell::new(HashMap::new())),
        }
    }
}

impl IdempotencyStore for MemoryStore {
    fn seen(&self, key: &str) -> Result<bool, IdempotencyError> {
        let now = self.clock.now_ns();
        let guard = self.state.lock();
        let map = guard.borrow();
        Ok(map.get(key).map(|e| is_unexpired(e.expiry_ns, now)).unwrap_or(false))
    }

    fn get(&self, key: &str) -> Result<Option<String>, IdempotencyError> {
        let now = self.clock.now_ns();
        let guard = self.state.lock();
        let map = guard.borrow();
        Ok(map
            .get(key)
            .filter(|e| is_unexpired(e.expiry_ns, now))
            .and_then(|e| e.value.clone()))
    }

    fn put(&self, key: &str, value: &str, ttl_s: Option<f64>) -> Result<(), IdempotencyError> {
        let now = self.clock.now_ns();
        let guard = self.state.lock();
        let mut map = guard.borrow_mut();
        let expiry_ns = match ttl_s {
            Some(ttl) => Some(now + ns(ttl)),
            None => map
                .get(key)
                .and_then(|e| e.expiry_ns)
                .or(Some(now + ns(DEFAULT_TTL_S))),
        };
        map.insert(
            key.to_string(),
            MemoryEntry {
                value: Some(value.to_string()),
                expiry_ns,
                updated_ns: now,
            },
        );
        Ok(())
    }

    fn mark(&self, key: &str, ttl_s: f64) -> Result<(), IdempotencyError> {
        let now = self.clock.now_ns();
        let guard = self.state.lock();
        let mut map = guard.borrow_mut();
        let existing_value = map.get(key).and_then(|e| e.value.clone());
        map.insert(
            key.to_string(),
            MemoryEntry {
                value: existing_value,
                expiry_ns: Some(now + ns(ttl_s)),
                updated_ns: now,
            },
        );
        Ok(())
    }

    fn cleanup_expired(&self, retention_s: f64) -> Result<usize, IdempotencyError> {
        let now = self.clock.now_ns();
        let cutoff = now - ns(retention_s);
        let guard = self.state.lock();
        let mut map = guard.borrow_mut();
        let before = map.len();
        map.retain(|_, e| match e.expiry_ns {
            Some(exp) => !(exp < now && exp < cutoff),
            None => true,
        });
        Ok(before - map.len())
    }

    fn clear(&self) -> Result<(), IdempotencyError> {
        self.state.lock().borrow_mut().clear();
        Ok(())
    }

    fn size(&self) -> Result<usize, IdempotencyError> {
        Ok(self.state.lock().borrow().len())
    }
}

fn map_sqlite_err(e: rusqlite::Error) -> IdempotencyError {
    if let rusqlite::Error::SqliteFailure(err, _) = &e {
        if err.code == rusqlite::ErrorCode::DatabaseBusy {
            return IdempotencyError::StoreBusy(e.to_string());
        }
    }
    IdempotencyError::StoreUnavailable(e.to_string())
}

/// Durable backend: a single SQLite file, WAL mode, `synchronous=NORMAL`,
/// one connection behind a reentrant mutex (spec.md §4.4, §6).
pub struct SqliteStore {
    clock: Arc<dyn Clock>,
    conn: ReentrantMutex<RefCell<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self, IdempotencyError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| IdempotencyError::StoreUnavailable(e.to_string()))?;
            }
        }
        let conn = Connection::open(path).map_err(map_sqlite_err)?;
        conn.pragma_update(None, "journal_mode", "WAL").map_err(map_sqlite_err)?;
        conn.pragma_update(None, "synchronous", "NORMAL").map_err(map_sqlite_err)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS entries (
                key TEXT PRIMARY KEY,
                value TEXT,
                expiry_ns INTEGER,
                updated_ns INTEGER
            )",
            [],
        )
        .map_err(map_sqlite_err)?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_entries_expiry ON entries(expiry_ns)",
            [],
        )
        .map_err(map_sqlite_err)?;

        Ok(Self {
            clock,
            conn: ReentrantMutex::new(RefCell::new(conn)),
        })
    }

    fn existing_row(conn: &Connection, key: &str) -> Result<Option<(Option<String>, Option<i64>)>, IdempotencyError> {
        conn.query_row(
            "SELECT value, expiry_ns FROM entries WHERE key = ?1",
            [key],
            |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<i64>>(1)?)),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(map_sqlite_err(other)),
        })
    }

    fn upsert(&self, key: &str, value: Option<&str>, expiry_ns: Option<i64>, now: i64) -> Result<(), IdempotencyError> {
        let guard = self.conn.lock();
        let conn = guard.borrow();
        conn.execute(
            "INSERT INTO entries(key, value, expiry_ns, updated_ns) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expiry_ns = excluded.expiry_ns, updated_ns = excluded.updated_ns",
            rusqlite::params![key, value, expiry_ns, now],
        )
        .map_err(map_sqlite_err)?;
        Ok(())
    }
}

impl IdempotencyStore for SqliteStore {
    fn seen(&self, key: &str) -> Result<bool, IdempotencyError> {
        let now = self.clock.now_ns();
        let guard = self.conn.lock();
        let conn = guard.borrow();
        Ok(Self::existing_row(&conn, key)?
            .map(|(_, expiry)| is_unexpired(expiry, now))
            .unwrap_or(false))
    }

    fn get(&self, key: &str) -> Result<Option<String>, IdempotencyError> {
        let now = self.clock.now_ns();
        let guard = self.conn.lock();
        let conn = guard.borrow();
        Ok(Self::existing_row(&conn, key)?.and_then(|(value, expiry)| {
            if is_unexpired(expiry, now) {
                value
            } else {
                None
            }
        }))
    }

    fn put(&self, key: &str, value: &str, ttl_s: Option<f64>) -> Result<(), IdempotencyError> {
        let now = self.clock.now_ns();
        let existing = {
            let guard = self.conn.lock();
            let conn = guard.borrow();
            Self::existing_row(&conn, key)?
        };
        let expiry_ns = match ttl_s {
            Some(ttl) => Some(now + ns(ttl)),
            None => existing.and_then(|(_, e)| e).or(Some(now + ns(DEFAULT_TTL_S))),
        };
        self.upsert(key, Some(value), expiry_ns, now)
    }

    fn mark(&self, key: &str, ttl_s: f64) -> Result<(), IdempotencyError> {
        let now = self.clock.now_ns();
        let existing_value = {
            let guard = self.conn.lock();
            let conn = guard.borrow();
            Self::existing_row(&conn, key)?.and_then(|(v, _)| v)
        };
        self.upsert(key, existing_value.as_deref(), Some(now + ns(ttl_s)), now)
    }

    fn cleanup_expired(&self, retention_s: f64) -> Result<usize, IdempotencyError> {
        let now = self.clock.now_ns();
        let cutoff = now - ns(retention_s);
        let guard = self.conn.lock();
        let conn = guard.borrow();
        let removed = conn
            .execute(
                "DELETE FROM entries WHERE expiry_ns IS NOT NULL AND expiry_ns < ?1 AND expiry_ns < ?2",
                rusqlite::params![now, cutoff],
            )
            .map_err(map_sqlite_err)?;
        Ok(removed)
    }

    fn clear(&self) -> Result<(), IdempotencyError> {
        let guard = self.conn.lock();
        guard.borrow().execute("DELETE FROM entries", []).map_err(map_sqlite_err)?;
        Ok(())
    }

    fn size(&self) -> Result<usize, IdempotencyError> {
        let guard = self.conn.lock();
        let conn = guard.borrow();
        let count: i64 = conn
            .query_row("SELECT COUNT(1) FROM entries", [], |row| row.get(0))
            .map_err(map_sqlite_err)?;
        Ok(count as usize)
    }
}

/// Selects a backend from a free-form configuration string. Unknown values
/// fall back to `memory` with a logged warning rather than failing loudly
/// (spec.md §4.4).
pub fn build_store(
    backend: &str,
    sqlite_path: Option<&Path>,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn IdempotencyStore>, IdempotencyError> {
    match backend {
        "memory" => Ok(Arc::new(MemoryStore::new(clock))),
        "sqlite" => {
            let path = sqlite_path
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| std::path::PathBuf::from(DEFAULT_SQLITE_PATH));
            Ok(Arc::new(SqliteStore::open(path, clock)?))
        }
        other => {
            tracing::warn!(backend = %other, "unknown idempotency backend, falling back to memory");
            Ok(Arc::new(MemoryStore::new(clock)))
        }
    }
}
