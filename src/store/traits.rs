//! `SessionStore` trait: keyed storage for per-session dialog state.

use async_trait::async_trait;

use crate::dialog::DialogState;
use crate::error::StoreError;

/// Backend-agnostic session state storage.
///
/// `put` is a compare-and-swap on [`DialogState::version`]: it succeeds only
/// when the stored version (0 for an absent session) equals the version the
/// state carries, and returns the new version. A mismatch yields
/// [`StoreError::VersionConflict`] and leaves the stored state untouched.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<DialogState>, StoreError>;

    async fn put(&self, session_id: &str, state: &DialogState) -> Result<u64, StoreError>;
}
