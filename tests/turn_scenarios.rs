//! Multi-turn scenarios through the public orchestrator API.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use dialog_orchestrator::agents::{
    BookingLedger, ExecutionStatus, HandlerRegistry, ResponseSource, TaskContext, TaskHandler,
    TaskInput, TaskOutput, TaskStatus, register_builtin_handlers,
};
use dialog_orchestrator::dialog::{DialogState, DialogStatus};
use dialog_orchestrator::error::{StoreError, TaskError};
use dialog_orchestrator::intent::{EntityType, IntentCatalog, IntentType};
use dialog_orchestrator::nlu::NluDeps;
use dialog_orchestrator::store::{MemorySessionStore, SessionStore};
use dialog_orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorDeps, TurnReply};

// ── harness ─────────────────────────────────────────────────────────

struct Harness {
    orchestrator: Orchestrator,
    store: Arc<MemorySessionStore>,
}

impl Harness {
    fn new() -> Self {
        Self::with(OrchestratorConfig::default(), |_| {})
    }

    fn with(config: OrchestratorConfig, customize: impl FnOnce(&mut HandlerRegistry)) -> Self {
        let mut handlers = HandlerRegistry::new();
        register_builtin_handlers(&mut handlers, Arc::new(BookingLedger::new()));
        customize(&mut handlers);

        let store = Arc::new(MemorySessionStore::new());
        let orchestrator = Orchestrator::new(
            config,
            OrchestratorDeps {
                store: store.clone(),
                nlu: NluDeps::rule_based(),
                handlers: Arc::new(handlers),
                catalog: Arc::new(IntentCatalog::builtin()),
            },
        );
        Self {
            orchestrator,
            store,
        }
    }

    async fn turn(&self, session_id: &str, text: &str) -> TurnReply {
        self.orchestrator.handle_turn(session_id, text).await.unwrap()
    }

    async fn stored(&self, session_id: &str) -> DialogState {
        self.store.get(session_id).await.unwrap().unwrap()
    }
}

/// Never finishes on its own; only the scheduler's timeout ends it.
struct HangingHandler(IntentType);

#[async_trait]
impl TaskHandler for HangingHandler {
    fn intent_type(&self) -> IntentType {
        self.0
    }

    async fn execute(&self, _input: TaskInput, ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        ctx.cancel.cancelled().await;
        Err(TaskError::Execution("cancelled".into()))
    }
}

/// Counts invocations.
struct CountingHandler {
    intent_type: IntentType,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl TaskHandler for CountingHandler {
    fn intent_type(&self) -> IntentType {
        self.intent_type
    }

    async fn execute(&self, _input: TaskInput, _ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(TaskOutput::text("done"))
    }
}

/// Store whose writes always lose the race.
struct ContendedStore(MemorySessionStore);

#[async_trait]
impl SessionStore for ContendedStore {
    async fn get(&self, session_id: &str) -> Result<Option<DialogState>, StoreError> {
        self.0.get(session_id).await
    }

    async fn put(&self, session_id: &str, state: &DialogState) -> Result<u64, StoreError> {
        Err(StoreError::VersionConflict {
            session_id: session_id.to_string(),
            expected: state.version,
            found: state.version + 1,
        })
    }
}

// ── scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn booking_collects_missing_time_then_executes() {
    let h = Harness::new();

    let first = h.turn("s1", "book a cleaning in Koramangala").await;
    assert_eq!(first.status, DialogStatus::AwaitingEntity);
    assert!(first.report.is_none());
    assert!(first.text().starts_with("When would you like it"));

    let state = h.stored("s1").await;
    assert_eq!(state.pending_entity, Some(EntityType::Time));
    assert_eq!(state.active_intents.len(), 1);
    assert_eq!(state.active_intents[0].intent_type, IntentType::BookService);
    assert_eq!(
        state.collected_entities.get(&EntityType::Location).map(String::as_str),
        Some("Koramangala")
    );

    let second = h.turn("s1", "tomorrow 3pm").await;
    assert_eq!(second.status, DialogStatus::Complete);
    let report = second.report.as_ref().unwrap();
    assert_eq!(report.task_count(), 1);
    assert_eq!(report.count(TaskStatus::Succeeded), 1);
    assert_eq!(second.response.provenance().len(), 1);

    let state = h.stored("s1").await;
    assert_eq!(state.status, DialogStatus::Idle);
    assert!(state.collected_entities.is_empty());
}

#[tokio::test]
async fn failing_status_check_does_not_sink_booking() {
    let h = Harness::new();

    let reply = h
        .turn(
            "s1",
            "check the status of BK-9999 and book a cleaning in Indiranagar tomorrow 3pm",
        )
        .await;

    assert_eq!(reply.status, DialogStatus::Complete);
    let report = reply.report.as_ref().unwrap();
    assert_eq!(report.status, ExecutionStatus::Complete);
    assert_eq!(report.independent_tasks.len(), 2);
    assert!(report.dependent_tasks.is_empty());

    let status_of = |intent: IntentType| {
        report
            .tasks()
            .find(|t| t.intent_type == intent)
            .map(|t| t.status)
            .unwrap()
    };
    assert_eq!(status_of(IntentType::BookService), TaskStatus::Succeeded);
    assert_eq!(status_of(IntentType::BookingStatus), TaskStatus::Failed);

    let provenance = reply.response.provenance();
    assert_eq!(provenance.len(), 2);
    assert!(
        provenance
            .iter()
            .any(|(_, p)| p.agent_type == "booking_status" && p.status == TaskStatus::Failed)
    );
    assert!(reply.text().contains("BK-1001"));
}

#[tokio::test]
async fn timed_out_prerequisite_skips_dependent() {
    let confirm_calls = Arc::new(AtomicUsize::new(0));
    let config = OrchestratorConfig {
        task_timeout: Duration::from_millis(50),
        ..OrchestratorConfig::default()
    };
    let calls = Arc::clone(&confirm_calls);
    let h = Harness::with(config, move |handlers| {
        handlers.register(Arc::new(HangingHandler(IntentType::ResolvePincode)));
        handlers.register(Arc::new(CountingHandler {
            intent_type: IntentType::ConfirmAddress,
            calls,
        }));
    });

    let reply = h
        .turn("s1", "please confirm my address 12 MG Road, pincode 560034")
        .await;

    let report = reply.report.as_ref().unwrap();
    assert_eq!(report.status, ExecutionStatus::Failed);
    assert_eq!(reply.status, DialogStatus::Failed);
    assert_eq!(report.independent_tasks[0].intent_type, IntentType::ResolvePincode);
    assert_eq!(report.independent_tasks[0].status, TaskStatus::TimedOut);
    assert_eq!(report.dependent_tasks[0].intent_type, IntentType::ConfirmAddress);
    assert_eq!(report.dependent_tasks[0].status, TaskStatus::Skipped);
    assert_eq!(confirm_calls.load(Ordering::SeqCst), 0);

    let text = reply.text();
    assert!(text.contains("taking longer than expected"));
    assert!(text.contains("didn't go ahead with your address confirmation"));
    assert_eq!(h.stored("s1").await.status, DialogStatus::Idle);
}

#[tokio::test]
async fn address_confirmation_uses_resolved_pincode() {
    let h = Harness::new();

    let reply = h
        .turn("s1", "please confirm my address 12 MG Road, pincode 560034")
        .await;

    assert_eq!(reply.status, DialogStatus::Complete);
    assert!(reply.text().contains("Koramangala, Bengaluru 560034"));
}

#[tokio::test]
async fn unparseable_answers_abandon_after_retry_limit() {
    let h = Harness::new();

    h.turn("s1", "cancel my booking").await;
    assert_eq!(h.stored("s1").await.pending_entity, Some(EntityType::BookingId));

    let first = h.turn("s1", "no idea").await;
    assert_eq!(first.status, DialogStatus::AwaitingEntity);
    let second = h.turn("s1", "still no idea").await;
    assert_eq!(second.status, DialogStatus::AwaitingEntity);

    let third = h.turn("s1", "whatever").await;
    assert_eq!(third.status, DialogStatus::Idle);
    assert!(third.text().contains("booking ID"));
    assert!(third.report.is_none());

    let state = h.stored("s1").await;
    assert!(state.active_intents.is_empty());
    assert_eq!(state.turn_count, 4);
}

#[tokio::test]
async fn repeating_a_collected_value_changes_nothing() {
    let h = Harness::new();

    h.turn("s1", "book a cleaning in Koramangala").await;
    let before = h.stored("s1").await;

    // Location is already collected; the pending entity is still time.
    for _ in 0..3 {
        let reply = h.turn("s1", "in Koramangala").await;
        assert_eq!(reply.status, DialogStatus::AwaitingEntity);
        assert!(reply.text().starts_with("When would you like it"));
    }

    let mut after = h.stored("s1").await;
    assert_eq!(after.turn_count, before.turn_count + 3);
    assert!(after.entity_attempts.is_empty());

    after.turn_count = before.turn_count;
    after.version = before.version;
    after.updated_at = before.updated_at;
    assert_eq!(after, before);
}

#[tokio::test]
async fn provenance_covers_every_planned_task() {
    let h = Harness::new();

    let reply = h
        .turn(
            "s1",
            "check the status of BK-1234, and book plumbing at Fort on saturday 10am",
        )
        .await;

    let report = reply.report.as_ref().unwrap();
    let provenance = reply.response.provenance();
    assert_eq!(provenance.len(), report.task_count());
    for task in report.tasks() {
        assert_eq!(
            provenance.iter().filter(|(id, _)| *id == task.id).count(),
            1,
            "task {} must appear exactly once",
            task.id
        );
    }
    assert!(
        reply
            .response
            .parts
            .iter()
            .all(|p| matches!(p.source, ResponseSource::Task(_)))
    );
}

#[tokio::test]
async fn unknown_request_asks_to_clarify() {
    let h = Harness::new();

    let reply = h.turn("s1", "hello there").await;
    assert_eq!(reply.status, DialogStatus::Idle);
    assert!(reply.report.is_none());
    assert_eq!(
        reply.text(),
        OrchestratorConfig::default().messages.clarify_intent
    );
}

#[tokio::test]
async fn version_conflict_aborts_turn_with_apology() {
    let mut handlers = HandlerRegistry::new();
    register_builtin_handlers(&mut handlers, Arc::new(BookingLedger::new()));
    let orchestrator = Orchestrator::new(
        OrchestratorConfig::default(),
        OrchestratorDeps {
            store: Arc::new(ContendedStore(MemorySessionStore::new())),
            nlu: NluDeps::rule_based(),
            handlers: Arc::new(handlers),
            catalog: Arc::new(IntentCatalog::builtin()),
        },
    );

    let err = orchestrator
        .handle_turn("s1", "book a cleaning in Koramangala")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        dialog_orchestrator::Error::Store(StoreError::VersionConflict { .. })
    ));

    let reply = orchestrator.reply("s1", "book a cleaning in Koramangala").await;
    assert!(reply.aborted);
    assert_eq!(reply.status, DialogStatus::Failed);
    assert_eq!(reply.text(), OrchestratorConfig::default().messages.apology);
}

#[tokio::test]
async fn broken_stored_plan_aborts_and_resets_session() {
    let h = Harness::new();
    let catalog = IntentCatalog::builtin();

    // A READY session whose intents cannot be planned.
    let mut state = DialogState::new("s1");
    let intent = catalog.intent(IntentType::CategoryLookup, 0.9).unwrap();
    state.begin_intents(vec![intent.clone(), intent]);
    state.apply_entity(EntityType::Category, "cleaning");
    assert_eq!(state.status, DialogStatus::Ready);
    h.store.put("s1", &state).await.unwrap();

    let reply = h.orchestrator.reply("s1", "go ahead").await;
    assert!(reply.aborted);
    assert_eq!(reply.text(), OrchestratorConfig::default().messages.apology);

    let stored = h.stored("s1").await;
    assert_eq!(stored.status, DialogStatus::Idle);
    assert!(stored.active_intents.is_empty());
}
