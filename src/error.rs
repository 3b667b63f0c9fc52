//! Error types for the dialog orchestrator.

use std::time::Duration;

use uuid::Uuid;

use crate::agents::task::TaskStatus;
use crate::intent::{EntityType, IntentType};

/// Top-level error type for a turn.
///
/// Only planning and store failures abort a turn. Entity-level and
/// task-level failures are recovered or recorded where they happen.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session store error: {0}")]
    Store(#[from] StoreError),

    #[error("Planning error: {0}")]
    Planning(#[from] PlanningError),

    #[error("NLU error: {0}")]
    Nlu(#[from] NluError),

    #[error("Merge inconsistency: {0}")]
    Merge(#[from] MergeError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid intent catalog: {0}")]
    Catalog(#[from] PlanningError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Session store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Session {session_id} was modified concurrently (expected version {expected}, found {found})")]
    VersionConflict {
        session_id: String,
        expected: u64,
        found: u64,
    },
}

/// Dependency configuration defects detected while building a plan.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanningError {
    #[error("Cyclic dependency: {}", format_path(.path))]
    Cycle { path: Vec<IntentType> },

    #[error("{intent} depends on {dependency}, which has dependencies of its own")]
    TooDeep {
        intent: IntentType,
        dependency: IntentType,
    },

    #[error("{intent} depends on {dependency}, which is not part of the plan")]
    MissingDependency {
        intent: IntentType,
        dependency: IntentType,
    },

    #[error("Intent {0} appears more than once")]
    DuplicateIntent(IntentType),

    #[error("No intents to plan")]
    EmptyPlan,
}

fn format_path(path: &[IntentType]) -> String {
    path.iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Failures from the external language collaborators.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NluError {
    #[error("Intent classification failed: {0}")]
    Classification(String),

    #[error("Extraction of {entity} failed: {reason}")]
    Extraction { entity: EntityType, reason: String },

    #[error("Prompt generation failed: {0}")]
    Generation(String),
}

/// A validator's rejection of a raw entity value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationRejection {
    pub message: String,
    pub suggestions: Vec<String>,
}

impl ValidationRejection {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }
}

/// Per-task failures. Recorded on the task, never propagated to siblings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("Task execution failed: {0}")]
    Execution(String),

    #[error("Task timed out after {0:?}")]
    Timeout(Duration),

    #[error("Handler panicked: {0}")]
    Panicked(String),

    #[error("No handler registered for {0}")]
    NoHandler(IntentType),

    #[error("Prerequisite {dependency} ended as {status}")]
    DependencyUnavailable {
        dependency: IntentType,
        status: TaskStatus,
    },
}

/// The provenance list does not match the executed plan.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    #[error("Task {task_id} has no provenance entry")]
    MissingProvenance { task_id: Uuid },

    #[error("Task {task_id} has {count} provenance entries")]
    DuplicateProvenance { task_id: Uuid, count: usize },

    #[error("Provenance entry for unknown task {task_id}")]
    UnknownTask { task_id: Uuid },
}

/// Result type alias for the orchestrator.
pub type Result<T> = std::result::Result<T, Error>;
