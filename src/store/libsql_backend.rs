//! libSQL backend for [`SessionStore`].
//!
//! Each session is one row of `dialog_sessions` holding the JSON-encoded
//! `DialogState` next to its version. Version checks happen inside a single
//! `INSERT`/`UPDATE` statement so concurrent writers cannot both win.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::dialog::DialogState;
use crate::error::StoreError;
use crate::store::migrations;
use crate::store::traits::SessionStore;

/// libSQL session store over a single reused connection.
pub struct LibSqlSessionStore {
    /// Owns the database handle for as long as `conn` is in use; never read.
    _db: LibSqlDatabase,
    conn: Connection,
}

impl LibSqlSessionStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Session store opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self { _db: db, conn })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Stored version of a session, 0 if absent.
    async fn stored_version(&self, session_id: &str) -> Result<u64, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT version FROM dialog_sessions WHERE session_id = ?1",
                params![session_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("stored_version: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("stored_version: {e}")))?
        {
            Some(row) => {
                let version: i64 = row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("stored_version: {e}")))?;
                Ok(version.max(0) as u64)
            }
            None => Ok(0),
        }
    }
}

#[async_trait]
impl SessionStore for LibSqlSessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<DialogState>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT state, version FROM dialog_sessions WHERE session_id = ?1",
                params![session_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_session: {e}")))?;

        let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("get_session: {e}")))?
        else {
            return Ok(None);
        };

        let json: String = row
            .get(0)
            .map_err(|e| StoreError::Query(format!("get_session: {e}")))?;
        let version: i64 = row
            .get(1)
            .map_err(|e| StoreError::Query(format!("get_session: {e}")))?;

        let mut state: DialogState = serde_json::from_str(&json)
            .map_err(|e| StoreError::Serialization(format!("session {session_id}: {e}")))?;
        // The column is authoritative.
        state.version = version.max(0) as u64;
        Ok(Some(state))
    }

    async fn put(&self, session_id: &str, state: &DialogState) -> Result<u64, StoreError> {
        let next = state.version + 1;
        let mut stored = state.clone();
        stored.version = next;
        let json = serde_json::to_string(&stored)
            .map_err(|e| StoreError::Serialization(format!("session {session_id}: {e}")))?;
        let now = Utc::now().to_rfc3339();

        let result = if state.version == 0 {
            self.conn()
                .execute(
                    "INSERT INTO dialog_sessions (session_id, version, state, status, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(session_id) DO NOTHING",
                    params![session_id, next as i64, json, state.status.to_string(), now],
                )
                .await
        } else {
            self.conn()
                .execute(
                    "UPDATE dialog_sessions
                     SET version = ?1, state = ?2, status = ?3, updated_at = ?4
                     WHERE session_id = ?5 AND version = ?6",
                    params![
                        next as i64,
                        json,
                        state.status.to_string(),
                        now,
                        session_id,
                        state.version as i64
                    ],
                )
                .await
        };
        let changed = result.map_err(|e| StoreError::Query(format!("put_session: {e}")))?;

        if changed == 0 {
            let found = self.stored_version(session_id).await?;
            return Err(StoreError::VersionConflict {
                session_id: session_id.to_string(),
                expected: state.version,
                found,
            });
        }

        debug!(session_id, version = next, status = %state.status, "Session saved");
        Ok(next)
    }
}
