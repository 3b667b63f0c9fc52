//! Merges task outputs into one ordered, provenance-tagged reply per turn.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agents::scheduler::ExecutionReport;
use crate::agents::task::{AgentTask, TaskStatus};
use crate::error::{MergeError, TaskError};
use crate::intent::IntentCatalog;

/// Who produced a part of the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "task_id")]
pub enum ResponseSource {
    Task(Uuid),
    SlotFilling,
}

impl std::fmt::Display for ResponseSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Task(id) => write!(f, "{id}"),
            Self::SlotFilling => write!(f, "slot_filling"),
        }
    }
}

/// Traceability record for one task contribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub agent_type: String,
    pub confidence: f32,
    pub latency_ms: u64,
    pub status: TaskStatus,
}

/// One part of the merged reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsePart {
    pub source: ResponseSource,
    pub text: String,
    /// Present for every task part, absent for slot-filling parts.
    pub provenance: Option<Provenance>,
}

/// Ordered reply for a turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedResponse {
    pub parts: Vec<ResponsePart>,
}

impl MergedResponse {
    /// A reply made only of a slot-filling message.
    pub fn slot_filling(text: impl Into<String>) -> Self {
        Self {
            parts: vec![ResponsePart {
                source: ResponseSource::SlotFilling,
                text: text.into(),
                provenance: None,
            }],
        }
    }

    /// Reply text, parts separated by blank lines.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Provenance entries of task parts, in reply order.
    pub fn provenance(&self) -> Vec<(Uuid, &Provenance)> {
        self.parts
            .iter()
            .filter_map(|p| match (p.source, &p.provenance) {
                (ResponseSource::Task(id), Some(prov)) => Some((id, prov)),
                _ => None,
            })
            .collect()
    }

    /// Check the one-entry-per-task contract against the planned task ids.
    pub fn verify(&self, task_ids: &[Uuid]) -> Result<(), MergeError> {
        let mut counts: HashMap<Uuid, usize> = HashMap::new();
        for (id, _) in self.provenance() {
            *counts.entry(id).or_insert(0) += 1;
        }
        for id in task_ids {
            match counts.remove(id) {
                None => return Err(MergeError::MissingProvenance { task_id: *id }),
                Some(1) => {}
                Some(count) => {
                    return Err(MergeError::DuplicateProvenance { task_id: *id, count });
                }
            }
        }
        match counts.into_keys().next() {
            Some(task_id) => Err(MergeError::UnknownTask { task_id }),
            None => Ok(()),
        }
    }
}

/// Builds merged responses from execution reports.
pub struct ResponseMerger {
    catalog: std::sync::Arc<IntentCatalog>,
}

impl ResponseMerger {
    pub fn new(catalog: std::sync::Arc<IntentCatalog>) -> Self {
        Self { catalog }
    }

    /// Merge task outputs: slot-filling messages first, then independent
    /// tasks, then dependent tasks, each group in plan order. Unsuccessful
    /// tasks contribute a fallback explaining what could not be done.
    pub fn merge(&self, slot_filling: &[String], report: &ExecutionReport) -> MergedResponse {
        let mut parts: Vec<ResponsePart> = slot_filling
            .iter()
            .map(|text| ResponsePart {
                source: ResponseSource::SlotFilling,
                text: text.clone(),
                provenance: None,
            })
            .collect();

        parts.extend(report.tasks().map(|task| ResponsePart {
            source: ResponseSource::Task(task.id),
            text: self.contribution(task),
            provenance: Some(Provenance {
                agent_type: task.intent_type.to_string(),
                confidence: task.confidence,
                latency_ms: task.latency().as_millis() as u64,
                status: task.status,
            }),
        }));

        MergedResponse { parts }
    }

    fn contribution(&self, task: &AgentTask) -> String {
        match task.status {
            TaskStatus::Succeeded => match &task.result {
                Some(output) => output.text.clone(),
                None => format!("Your {} is done.", task.label),
            },
            TaskStatus::TimedOut => format!(
                "Your {} is taking longer than expected, so I couldn't finish it right now. \
                 Please try again shortly.",
                task.label
            ),
            TaskStatus::Skipped => match &task.error {
                Some(TaskError::DependencyUnavailable { dependency, .. }) => format!(
                    "I didn't go ahead with your {} because the {} could not be completed.",
                    task.label,
                    self.catalog.label(*dependency)
                ),
                _ => format!("I didn't go ahead with your {}.", task.label),
            },
            TaskStatus::Failed | TaskStatus::Pending | TaskStatus::Running => format!(
                "Sorry, I couldn't complete your {} right now.",
                task.label
            ),
        }
    }
}
