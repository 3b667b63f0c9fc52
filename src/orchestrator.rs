//! Orchestrator: one user turn end to end.
//!
//! load → slot filling → (resolve → schedule → merge) → save.
//! Constructed once at startup and shared by reference across requests.
//! Callers must serialize turns per session; concurrent turns on one session
//! are detected at save time through the store's version check.

use std::sync::Arc;

use serde::Serialize;

use crate::agents::{
    DependencyResolver, ExecutionReport, ExecutionStatus, HandlerRegistry, MergedResponse,
    ResponseMerger, Scheduler,
};
use crate::config::OrchestratorConfig;
use crate::dialog::{DialogState, DialogStateManager, DialogStatus, SlotDecision, SlotFillingMachine};
use crate::error::{Error, Result};
use crate::intent::IntentCatalog;
use crate::nlu::NluDeps;
use crate::store::SessionStore;

/// Collaborators for one orchestrator instance.
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub store: Arc<dyn SessionStore>,
    pub nlu: NluDeps,
    pub handlers: Arc<HandlerRegistry>,
    pub catalog: Arc<IntentCatalog>,
}

/// What one turn produced.
#[derive(Debug, Clone, Serialize)]
pub struct TurnReply {
    pub session_id: String,
    pub response: MergedResponse,
    /// COMPLETE or FAILED for an executed turn, otherwise the saved status.
    pub status: DialogStatus,
    /// Present when tasks ran this turn.
    #[serde(skip)]
    pub report: Option<ExecutionReport>,
    /// The turn was aborted and `response` is the generic apology.
    pub aborted: bool,
}

impl TurnReply {
    pub fn text(&self) -> String {
        self.response.text()
    }
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    dialogs: DialogStateManager,
    machine: SlotFillingMachine,
    resolver: DependencyResolver,
    scheduler: Scheduler,
    merger: ResponseMerger,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, deps: OrchestratorDeps) -> Self {
        let OrchestratorDeps {
            store,
            nlu,
            handlers,
            catalog,
        } = deps;

        for intent_type in crate::intent::IntentType::ALL {
            if catalog.contains(intent_type) && !handlers.has(intent_type) {
                tracing::warn!(intent = %intent_type, "No handler registered for catalog intent");
            }
        }

        Self {
            dialogs: DialogStateManager::new(store),
            machine: SlotFillingMachine::new(Arc::clone(&catalog), nlu, &config),
            resolver: DependencyResolver::new(Arc::clone(&catalog), config.task_timeout),
            scheduler: Scheduler::new(handlers, config.max_concurrent_tasks),
            merger: ResponseMerger::new(catalog),
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run one turn. Only planning and store failures are returned as
    /// errors; everything else is part of the reply.
    pub async fn handle_turn(&self, session_id: &str, text: &str) -> Result<TurnReply> {
        let state = self.dialogs.load(session_id).await?;
        let (mut state, decision) = self.machine.advance(state, text).await;

        let (response, status, report) = match decision {
            SlotDecision::Execute => {
                let (response, status, report) = self.execute(session_id, &mut state).await?;
                (response, status, Some(report))
            }
            SlotDecision::Ask { prompt, .. } | SlotDecision::Clarify { prompt } => {
                (MergedResponse::slot_filling(prompt), state.status, None)
            }
            SlotDecision::Abandon { message } => {
                (MergedResponse::slot_filling(message), state.status, None)
            }
        };

        self.dialogs.save(session_id, &mut state).await?;

        Ok(TurnReply {
            session_id: session_id.to_string(),
            response,
            status,
            report,
            aborted: false,
        })
    }

    /// Run one turn, turning an aborted turn into the apology reply.
    pub async fn reply(&self, session_id: &str, text: &str) -> TurnReply {
        match self.handle_turn(session_id, text).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(session_id, error = %e, "Turn aborted");
                TurnReply {
                    session_id: session_id.to_string(),
                    response: MergedResponse::slot_filling(self.config.messages.apology.clone()),
                    status: DialogStatus::Failed,
                    report: None,
                    aborted: true,
                }
            }
        }
    }

    /// READY → EXECUTING → COMPLETE/FAILED → IDLE.
    async fn execute(
        &self,
        session_id: &str,
        state: &mut DialogState,
    ) -> Result<(MergedResponse, DialogStatus, ExecutionReport)> {
        transition(state, DialogStatus::Executing);

        let plan = match self
            .resolver
            .resolve(&state.active_intents, &state.collected_entities)
        {
            Ok(plan) => plan,
            Err(e) => {
                // Drop the intents so the session does not retry a broken plan forever.
                state.reset();
                if let Err(save_err) = self.dialogs.save(session_id, state).await {
                    tracing::error!(session_id, error = %save_err, "Failed to reset session");
                }
                return Err(Error::Planning(e));
            }
        };

        let task_ids = plan.task_ids();
        tracing::info!(
            session_id,
            independent = plan.independent_tasks.len(),
            dependent = plan.dependent_tasks.len(),
            "Dispatching tasks"
        );
        let report = self.scheduler.run(plan).await;
        let response = self.merger.merge(&[], &report);

        if let Err(e) = response.verify(&task_ids) {
            tracing::error!(session_id, error = %e, "Merged response does not match the plan");
        }

        let outcome = match report.status {
            ExecutionStatus::Complete => DialogStatus::Complete,
            ExecutionStatus::Failed => DialogStatus::Failed,
        };
        transition(state, outcome);
        transition(state, DialogStatus::Idle);
        state.reset();

        Ok((response, outcome, report))
    }
}

fn transition(state: &mut DialogState, to: DialogStatus) {
    let from = state.status;
    match state.transition_to(to) {
        Ok(()) => {
            tracing::info!(session_id = %state.session_id, from = %from, to = %to, "Dialog transition");
        }
        Err(e) => tracing::error!(error = %e, "Invalid dialog transition"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{BookingLedger, register_builtin_handlers};
    use crate::store::MemorySessionStore;

    fn orchestrator() -> Orchestrator {
        let mut handlers = HandlerRegistry::new();
        register_builtin_handlers(&mut handlers, Arc::new(BookingLedger::new()));
        Orchestrator::new(
            OrchestratorConfig::default(),
            OrchestratorDeps {
                store: Arc::new(MemorySessionStore::new()),
                nlu: NluDeps::rule_based(),
                handlers: Arc::new(handlers),
                catalog: Arc::new(IntentCatalog::builtin()),
            },
        )
    }

    #[tokio::test]
    async fn ask_then_execute() {
        let orchestrator = orchestrator();
        let first = orchestrator
            .handle_turn("s1", "book a cleaning in Koramangala")
            .await
            .unwrap();
        assert_eq!(first.status, DialogStatus::AwaitingEntity);
        assert!(first.report.is_none());
        assert!(first.response.provenance().is_empty());

        let second = orchestrator.handle_turn("s1", "tomorrow 3pm").await.unwrap();
        assert_eq!(second.status, DialogStatus::Complete);
        assert_eq!(second.report.as_ref().unwrap().task_count(), 1);
        assert!(second.text().contains("BK-1001"));

        let saved = orchestrator.dialogs.load("s1").await.unwrap();
        assert_eq!(saved.status, DialogStatus::Idle);
        assert!(saved.active_intents.is_empty());
        assert_eq!(saved.turn_count, 2);
    }

    #[tokio::test]
    async fn failed_execution_still_resets_session() {
        let orchestrator = orchestrator();
        let reply = orchestrator
            .handle_turn("s1", "cancel booking BK-4242")
            .await
            .unwrap();
        assert_eq!(reply.status, DialogStatus::Failed);
        assert!(reply.text().starts_with("Sorry, I couldn't complete your booking cancellation"));
        assert_eq!(
            orchestrator.dialogs.load("s1").await.unwrap().status,
            DialogStatus::Idle
        );
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let orchestrator = orchestrator();
        orchestrator
            .handle_turn("a", "book a cleaning in Koramangala")
            .await
            .unwrap();
        let other = orchestrator.handle_turn("b", "hello").await.unwrap();
        assert_eq!(other.status, DialogStatus::Idle);
        assert_eq!(
            orchestrator.dialogs.load("a").await.unwrap().status,
            DialogStatus::AwaitingEntity
        );
    }
}
