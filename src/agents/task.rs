//! Agent task lifecycle.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TaskError;
use crate::intent::{EntityType, IntentType};

/// State of an agent task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Planned, not yet started.
    Pending,
    /// Handler invocation in flight.
    Running,
    Succeeded,
    /// Handler returned an error or panicked.
    Failed,
    /// Handler did not finish within its budget.
    TimedOut,
    /// Never invoked because a prerequisite did not succeed.
    Skipped,
}

impl TaskStatus {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, target),
            (Pending, Running)
                | (Pending, Skipped)
                | (Pending, Failed)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, TimedOut)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::TimedOut | Self::Skipped
        )
    }

    /// Whether a dependent of a task in this state must be skipped.
    pub fn blocks_dependents(&self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut | Self::Skipped)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

/// Successful handler output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    /// Reply fragment shown to the user.
    pub text: String,
    /// Structured payload for dependents and callers.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl TaskOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: serde_json::Value::Null,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// One unit of work fulfilling one active intent.
#[derive(Debug, Clone)]
pub struct AgentTask {
    pub id: Uuid,
    pub intent_type: IntentType,
    /// Reply label from the intent catalog.
    pub label: String,
    /// Classifier confidence of the intent behind this task.
    pub confidence: f32,
    pub input_payload: BTreeMap<EntityType, String>,
    pub status: TaskStatus,
    pub result: Option<TaskOutput>,
    pub error: Option<TaskError>,
    /// Ids of tasks that must be terminal before this one runs.
    pub dependencies: Vec<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub timeout_budget: Duration,
}

impl AgentTask {
    pub fn new(intent_type: IntentType, label: impl Into<String>, timeout_budget: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            intent_type,
            label: label.into(),
            confidence: 1.0,
            input_payload: BTreeMap::new(),
            status: TaskStatus::Pending,
            result: None,
            error: None,
            dependencies: Vec::new(),
            started_at: None,
            finished_at: None,
            timeout_budget,
        }
    }

    /// Transition to a new status, stamping start and finish times.
    pub fn transition_to(&mut self, status: TaskStatus) -> Result<(), String> {
        if !self.status.can_transition_to(status) {
            return Err(format!(
                "Cannot transition task {} from {} to {}",
                self.id, self.status, status
            ));
        }
        self.status = status;
        match status {
            TaskStatus::Running => self.started_at = Some(Utc::now()),
            s if s.is_terminal() => self.finished_at = Some(Utc::now()),
            _ => {}
        }
        Ok(())
    }

    /// Mark the task dispatched to its handler.
    pub fn start(&mut self) -> Result<(), String> {
        self.transition_to(TaskStatus::Running)
    }

    /// Record the outcome of a running task. `started_at` is when the
    /// handler was actually invoked, after any wait for a permit.
    pub fn complete(
        &mut self,
        started_at: DateTime<Utc>,
        outcome: Result<TaskOutput, TaskError>,
    ) -> Result<(), String> {
        if self.status != TaskStatus::Running {
            return Err(format!(
                "Cannot complete task {} while {}",
                self.id, self.status
            ));
        }
        self.started_at = Some(started_at);
        match outcome {
            Ok(output) => {
                self.transition_to(TaskStatus::Succeeded)?;
                self.result = Some(output);
            }
            Err(error) => {
                let status = match error {
                    TaskError::Timeout(_) => TaskStatus::TimedOut,
                    _ => TaskStatus::Failed,
                };
                self.transition_to(status)?;
                self.error = Some(error);
            }
        }
        Ok(())
    }

    /// Mark the task skipped without invoking its handler.
    pub fn skip(&mut self, reason: TaskError) -> Result<(), String> {
        self.transition_to(TaskStatus::Skipped)?;
        self.error = Some(reason);
        Ok(())
    }

    /// Wall time between start and finish; zero if never started.
    pub fn latency(&self) -> Duration {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => end
                .signed_duration_since(start)
                .to_std()
                .unwrap_or(Duration::ZERO),
            _ => Duration::ZERO,
        }
    }
}
