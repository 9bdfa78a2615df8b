//! Per-tab session identity.
//!
//! The session token lives in a session-scoped key/value store: an in-memory
//! map for a single page life, or the SQLite `session_storage` table when the
//! driver keeps state between replays. Clearing the store starts a new
//! session.

use std::collections::HashMap;
use std::sync::Mutex;

use rusqlite::{params, OptionalExtension};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::DbPool;
use crate::errors::TrackingError;

pub const SESSION_KEY: &str = "stem_session_id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
}

impl Session {
    fn generate() -> Self {
        Self {
            session_id: format!("session_{}", Uuid::new_v4().simple()),
        }
    }

    /// Load the current session or create one on first use.
    pub fn resolve(store: &dyn SessionStore) -> Result<Self, TrackingError> {
        if let Some(existing) = store.get(SESSION_KEY)? {
            return Ok(Self {
                session_id: existing,
            });
        }
        let session = Self::generate();
        store.set(SESSION_KEY, &session.session_id)?;
        log::debug!("started session {}", session.session_id);
        Ok(session)
    }

    /// Session used when the store itself is unusable. Not persisted.
    pub fn ephemeral() -> Self {
        Self::generate()
    }
}

/// Key/value storage with the lifetime of one browsing session.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, TrackingError>;
    fn set(&self, key: &str, value: &str) -> Result<(), TrackingError>;
    fn clear(&self) -> Result<(), TrackingError>;
}

#[derive(Default)]
pub struct MemorySessionStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Result<Option<String>, TrackingError> {
        let values = self
            .values
            .lock()
            .map_err(|_| TrackingError::Storage("session store poisoned".into()))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), TrackingError> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| TrackingError::Storage("session store poisoned".into()))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), TrackingError> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| TrackingError::Storage("session store poisoned".into()))?;
        values.clear();
        Ok(())
    }
}

pub struct SqliteSessionStore {
    pool: DbPool,
}

impl SqliteSessionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl SessionStore for SqliteSessionStore {
    fn get(&self, key: &str) -> Result<Option<String>, TrackingError> {
        let conn = self.pool.get()?;
        let value = conn
            .query_row(
                "SELECT value FROM session_storage WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), TrackingError> {
        let conn = self.pool.get()?;
        let now = OffsetDateTime::now_utc().unix_timestamp();
        conn.execute(
            "INSERT INTO session_storage (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }

    fn clear(&self) -> Result<(), TrackingError> {
        let conn = self.pool.get()?;
        conn.execute("DELETE FROM session_storage", [])?;
        Ok(())
    }
}
