//! In-memory session store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::dialog::DialogState;
use crate::error::StoreError;
use crate::store::traits::SessionStore;

/// Process-local store. Sessions are lost on restart.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, DialogState>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<DialogState>, StoreError> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn put(&self, session_id: &str, state: &DialogState) -> Result<u64, StoreError> {
        let mut sessions = self.sessions.write().await;
        let found = sessions.get(session_id).map(|s| s.version).unwrap_or(0);
        if found != state.version {
            return Err(StoreError::VersionConflict {
                session_id: session_id.to_string(),
                expected: state.version,
                found,
            });
        }

        let mut stored = state.clone();
        stored.version = found + 1;
        sessions.insert(session_id.to_string(), stored);
        Ok(found + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get() {
        let store = MemorySessionStore::new();
        let state = DialogState::new("s1");
        assert_eq!(store.put("s1", &state).await.unwrap(), 1);

        let loaded = store.get("s1").await.unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.session_id, "s1");
        assert!(store.get("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_version_conflicts() {
        let store = MemorySessionStore::new();
        let state = DialogState::new("s1");
        store.put("s1", &state).await.unwrap();

        // Second writer still holds version 0.
        let err = store.put("s1", &state).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionConflict {
                expected: 0,
                found: 1,
                ..
            }
        ));
        assert_eq!(store.get("s1").await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn sequential_writes_advance_version() {
        let store = MemorySessionStore::new();
        let mut state = DialogState::new("s1");
        for expected in 1..=3 {
            state.version = store.put("s1", &state).await.unwrap();
            assert_eq!(state.version, expected);
        }
    }

    #[tokio::test]
    async fn stale_write_leaves_store_untouched() {
        let store = MemorySessionStore::new();
        let stale = DialogState {
            version: 4,
            ..DialogState::new("s1")
        };
        assert!(matches!(
            store.put("s1", &stale).await.unwrap_err(),
            StoreError::VersionConflict { found: 0, .. }
        ));
        assert!(store.is_empty().await);
        assert_eq!(store.len().await, 0);
    }
}
