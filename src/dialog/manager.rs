//! DialogStateManager: the load/save boundary around the session store.

use std::sync::Arc;

use chrono::Utc;

use crate::dialog::state::DialogState;
use crate::error::StoreError;
use crate::intent::EntityType;
use crate::store::SessionStore;

/// Loads and saves dialog state. All persistence goes through the store;
/// everything in between is plain value manipulation.
pub struct DialogStateManager {
    store: Arc<dyn SessionStore>,
}

impl DialogStateManager {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Load a session, or a fresh IDLE state if it was never saved.
    pub async fn load(&self, session_id: &str) -> Result<DialogState, StoreError> {
        match self.store.get(session_id).await? {
            Some(state) => {
                tracing::debug!(
                    session_id,
                    status = %state.status,
                    version = state.version,
                    "Session loaded"
                );
                Ok(state)
            }
            None => {
                tracing::debug!(session_id, "New session");
                Ok(DialogState::new(session_id))
            }
        }
    }

    /// Save a session. Fails with `VersionConflict` if another turn saved
    /// it since it was loaded; on success `state.version` is advanced.
    pub async fn save(&self, session_id: &str, state: &mut DialogState) -> Result<(), StoreError> {
        state.updated_at = Utc::now();
        let version = self.store.put(session_id, state).await?;
        state.version = version;
        Ok(())
    }

    /// Record a validated entity value and recompute the status.
    pub fn apply_entity(mut state: DialogState, entity: EntityType, value: &str) -> DialogState {
        let from = state.status;
        if state.apply_entity(entity, value) && from != state.status {
            tracing::info!(
                session_id = %state.session_id,
                entity = %entity,
                from = %from,
                to = %state.status,
                "Dialog transition"
            );
        }
        state
    }
}
