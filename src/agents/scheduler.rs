//! Agent execution scheduler.
//!
//! Independent tasks fan out concurrently (bounded by a semaphore) and are
//! joined before any dependent task starts. Dependent tasks then run one at
//! a time in plan order. Every invocation runs in its own tokio task with
//! its own timeout and cancellation token, so a failure, panic or timeout
//! is recorded on that task alone.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agents::handler::{HandlerRegistry, TaskContext, TaskHandler, TaskInput};
use crate::agents::planner::ExecutionPlan;
use crate::agents::task::{AgentTask, TaskOutput, TaskStatus};
use crate::error::TaskError;
use crate::intent::IntentType;

/// Overall outcome of running a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// At least one task succeeded.
    Complete,
    /// Every task failed, timed out or was skipped.
    Failed,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Plan with every task in a terminal status.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub independent_tasks: Vec<AgentTask>,
    pub dependent_tasks: Vec<AgentTask>,
    pub status: ExecutionStatus,
    pub elapsed: Duration,
}

impl ExecutionReport {
    /// All tasks, independent first, each group in plan order.
    pub fn tasks(&self) -> impl Iterator<Item = &AgentTask> {
        self.independent_tasks.iter().chain(self.dependent_tasks.iter())
    }

    pub fn task_count(&self) -> usize {
        self.independent_tasks.len() + self.dependent_tasks.len()
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks().filter(|t| t.status == status).count()
    }
}

/// Result of one handler invocation.
struct Invocation {
    started_at: DateTime<Utc>,
    outcome: Result<TaskOutput, TaskError>,
}

/// Runs execution plans against the registered handlers.
pub struct Scheduler {
    handlers: Arc<HandlerRegistry>,
    max_concurrent_tasks: usize,
}

impl Scheduler {
    pub fn new(handlers: Arc<HandlerRegistry>, max_concurrent_tasks: usize) -> Self {
        Self {
            handlers,
            max_concurrent_tasks: max_concurrent_tasks.max(1),
        }
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    /// Run a plan to completion. Never fails: task errors are recorded on
    /// the tasks and reflected in the report status.
    pub async fn run(&self, plan: ExecutionPlan) -> ExecutionReport {
        let start = Instant::now();
        let ExecutionPlan {
            mut independent_tasks,
            mut dependent_tasks,
        } = plan;

        self.run_independent(&mut independent_tasks).await;

        let mut finished: HashMap<Uuid, (TaskStatus, AgentTaskSummary)> = independent_tasks
            .iter()
            .map(|t| (t.id, (t.status, AgentTaskSummary::of(t))))
            .collect();

        for task in dependent_tasks.iter_mut() {
            self.run_dependent(task, &finished).await;
            finished.insert(task.id, (task.status, AgentTaskSummary::of(task)));
        }

        let any_succeeded = independent_tasks
            .iter()
            .chain(dependent_tasks.iter())
            .any(|t| t.status == TaskStatus::Succeeded);
        let status = if any_succeeded {
            ExecutionStatus::Complete
        } else {
            ExecutionStatus::Failed
        };

        let report = ExecutionReport {
            independent_tasks,
            dependent_tasks,
            status,
            elapsed: start.elapsed(),
        };
        tracing::info!(
            status = %report.status,
            tasks = report.task_count(),
            succeeded = report.count(TaskStatus::Succeeded),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Execution plan finished"
        );
        report
    }

    /// Fan out every independent task and wait for all of them.
    async fn run_independent(&self, tasks: &mut [AgentTask]) {
        let permits = Arc::new(Semaphore::new(self.max_concurrent_tasks));
        for task in tasks.iter_mut() {
            start(task);
        }

        let invocations = tasks.iter().map(|task| {
            let handler = self.handlers.get(task.intent_type);
            let input = TaskInput {
                task_id: task.id,
                intent_type: task.intent_type,
                payload: task.input_payload.clone(),
                upstream: BTreeMap::new(),
            };
            let budget = task.timeout_budget;
            let permits = Arc::clone(&permits);
            async move {
                let _permit = permits.acquire_owned().await.ok();
                invoke(handler, input, budget).await
            }
        });

        let results = join_all(invocations).await;

        for (task, invocation) in tasks.iter_mut().zip(results) {
            record(task, invocation);
        }
    }

    /// Run one dependent task, or skip it if a prerequisite did not succeed.
    async fn run_dependent(
        &self,
        task: &mut AgentTask,
        finished: &HashMap<Uuid, (TaskStatus, AgentTaskSummary)>,
    ) {
        let mut upstream = BTreeMap::new();
        let mut blocked = None;
        for dependency in &task.dependencies {
            let Some((status, summary)) = finished.get(dependency) else {
                // Resolver guarantees prerequisites precede dependents.
                blocked = Some(TaskError::Execution(format!(
                    "prerequisite {dependency} never ran"
                )));
                break;
            };
            if status.blocks_dependents() || !status.is_terminal() {
                blocked = Some(TaskError::DependencyUnavailable {
                    dependency: summary.intent_type,
                    status: *status,
                });
                break;
            }
            if let Some(output) = &summary.output {
                upstream.insert(summary.intent_type, output.clone());
            }
        }

        if let Some(reason) = blocked {
            skip(task, reason);
            return;
        }

        let input = TaskInput {
            task_id: task.id,
            intent_type: task.intent_type,
            payload: task.input_payload.clone(),
            upstream,
        };
        start(task);
        let invocation = invoke(self.handlers.get(task.intent_type), input, task.timeout_budget).await;
        record(task, invocation);
    }
}

/// What a dependent needs to know about a finished prerequisite.
struct AgentTaskSummary {
    intent_type: IntentType,
    output: Option<TaskOutput>,
}

impl AgentTaskSummary {
    fn of(task: &AgentTask) -> Self {
        Self {
            intent_type: task.intent_type,
            output: task.result.clone(),
        }
    }
}

/// Invoke a handler in its own tokio task under a timeout.
async fn invoke(
    handler: Option<Arc<dyn TaskHandler>>,
    input: TaskInput,
    budget: Duration,
) -> Invocation {
    let started_at = Utc::now();
    let intent_type = input.intent_type;
    let Some(handler) = handler else {
        return Invocation {
            started_at,
            outcome: Err(TaskError::NoHandler(intent_type)),
        };
    };

    let task_id = input.task_id;
    let cancel = CancellationToken::new();
    let ctx = TaskContext {
        task_id,
        budget,
        cancel: cancel.clone(),
    };

    tracing::debug!(task_id = %task_id, intent = %intent_type, "Task started");
    let handle = tokio::spawn(async move {
        match tokio::time::timeout(budget, handler.execute(input, ctx)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                cancel.cancel();
                Err(TaskError::Timeout(budget))
            }
        }
    });

    let outcome = match handle.await {
        Ok(outcome) => outcome,
        Err(e) => Err(TaskError::Panicked(e.to_string())),
    };

    Invocation {
        started_at,
        outcome,
    }
}

fn start(task: &mut AgentTask) {
    if let Err(e) = task.start() {
        tracing::error!(task_id = %task.id, error = %e, "Invalid task transition");
    }
}

fn record(task: &mut AgentTask, invocation: Invocation) {
    if let Err(e) = task.complete(invocation.started_at, invocation.outcome) {
        tracing::error!(task_id = %task.id, error = %e, "Invalid task transition");
        return;
    }
    let latency_ms = task.latency().as_millis() as u64;
    match task.status {
        TaskStatus::Succeeded => {
            tracing::info!(task_id = %task.id, intent = %task.intent_type, latency_ms, "Task succeeded");
        }
        TaskStatus::TimedOut => {
            tracing::warn!(task_id = %task.id, intent = %task.intent_type, latency_ms, "Task timed out");
        }
        _ => {
            tracing::warn!(
                task_id = %task.id,
                intent = %task.intent_type,
                latency_ms,
                error = ?task.error,
                "Task failed"
            );
        }
    }
}

fn skip(task: &mut AgentTask, reason: TaskError) {
    tracing::info!(task_id = %task.id, intent = %task.intent_type, reason = %reason, "Task skipped");
    if let Err(e) = task.skip(reason) {
        tracing::error!(task_id = %task.id, error = %e, "Invalid task transition");
    }
}
