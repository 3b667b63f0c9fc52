//! Task handler contract and the intent-type → handler registry.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agents::task::TaskOutput;
use crate::error::TaskError;
use crate::intent::{EntityType, IntentType};

/// Everything a handler gets to work with.
#[derive(Debug, Clone)]
pub struct TaskInput {
    pub task_id: Uuid,
    pub intent_type: IntentType,
    /// Collected entities relevant to this intent.
    pub payload: BTreeMap<EntityType, String>,
    /// Outputs of succeeded prerequisites, keyed by their intent type.
    pub upstream: BTreeMap<IntentType, TaskOutput>,
}

impl TaskInput {
    /// Look up an entity value, failing the task if it is missing.
    pub fn entity(&self, entity: EntityType) -> Result<&str, TaskError> {
        self.payload
            .get(&entity)
            .map(String::as_str)
            .ok_or_else(|| TaskError::Execution(format!("missing {entity} in payload")))
    }
}

/// Per-invocation execution context.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: Uuid,
    pub budget: Duration,
    /// Cancelled when the budget elapses. Handlers that spawn work should
    /// watch it; the invocation future itself is dropped on timeout.
    pub cancel: CancellationToken,
}

/// A specialized agent fulfilling one intent type.
///
/// Handlers must not leave partial side effects visible when cancelled
/// past their deadline.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn intent_type(&self) -> IntentType;

    async fn execute(&self, input: TaskInput, ctx: TaskContext) -> Result<TaskOutput, TaskError>;
}

/// Registry of task handlers, resolved once at startup.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<IntentType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its intent type, replacing any previous one.
    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) -> Option<Arc<dyn TaskHandler>> {
        let intent_type = handler.intent_type();
        let previous = self.handlers.insert(intent_type, handler);
        if previous.is_some() {
            tracing::warn!(intent = %intent_type, "Replaced existing task handler");
        } else {
            tracing::debug!(intent = %intent_type, "Registered task handler");
        }
        previous
    }

    pub fn with(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn get(&self, intent_type: IntentType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&intent_type).cloned()
    }

    pub fn has(&self, intent_type: IntentType) -> bool {
        self.handlers.contains_key(&intent_type)
    }

    /// Registered intent types, sorted.
    pub fn list(&self) -> Vec<IntentType> {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort();
        types
    }

    pub fn count(&self) -> usize {
        self.handlers.len()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("intents", &self.list())
            .finish()
    }
}
