//! Slot-filling state machine: the per-turn controller.
//!
//! Each call to [`SlotFillingMachine::advance`] takes the loaded state by
//! value plus the raw user text and returns the next state together with
//! what the orchestrator should do with it. Nothing is persisted here.

use std::collections::HashSet;
use std::sync::Arc;

use crate::config::{OrchestratorConfig, ResponseMessages};
use crate::dialog::state::{DialogState, DialogStatus};
use crate::error::ValidationRejection;
use crate::intent::{EntityType, Intent, IntentCatalog};
use crate::nlu::{NluDeps, SessionContext};

/// Outcome of one slot-filling step.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotDecision {
    /// Ask the user for `entity`.
    Ask { entity: EntityType, prompt: String },
    /// Nothing usable was classified; state stays IDLE.
    Clarify { prompt: String },
    /// The active intents were dropped; state is back to IDLE.
    Abandon { message: String },
    /// Every required entity is collected; plan and run the tasks.
    Execute,
}

impl SlotDecision {
    /// Text shown to the user for non-executing decisions.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Ask { prompt, .. } | Self::Clarify { prompt } => Some(prompt),
            Self::Abandon { message } => Some(message),
            Self::Execute => None,
        }
    }
}

pub struct SlotFillingMachine {
    catalog: Arc<IntentCatalog>,
    nlu: NluDeps,
    max_entity_retries: u32,
    min_intent_confidence: f32,
    max_slot_filling_turns: u64,
    messages: ResponseMessages,
}

impl SlotFillingMachine {
    pub fn new(catalog: Arc<IntentCatalog>, nlu: NluDeps, config: &OrchestratorConfig) -> Self {
        Self {
            catalog,
            nlu,
            max_entity_retries: config.max_entity_retries,
            min_intent_confidence: config.min_intent_confidence,
            max_slot_filling_turns: config.max_slot_filling_turns,
            messages: config.messages.clone(),
        }
    }

    /// Run one turn of slot filling.
    pub async fn advance(&self, mut state: DialogState, text: &str) -> (DialogState, SlotDecision) {
        state.turn_count += 1;

        match state.status {
            DialogStatus::Idle => self.classify(state, text).await,
            DialogStatus::AwaitingEntity => self.answer(state, text).await,
            DialogStatus::Ready => {
                tracing::info!(session_id = %state.session_id, "Resuming ready session");
                (state, SlotDecision::Execute)
            }
            DialogStatus::Executing | DialogStatus::Complete | DialogStatus::Failed => {
                tracing::warn!(
                    session_id = %state.session_id,
                    status = %state.status,
                    "Found session stuck mid-execution, resetting"
                );
                state.reset();
                self.classify(state, text).await
            }
        }
    }

    /// IDLE: classify, prefill from the same turn, then ask or execute.
    async fn classify(&self, mut state: DialogState, text: &str) -> (DialogState, SlotDecision) {
        let ctx = SessionContext::from_state(&state);
        let candidates = match self.nlu.classifier.classify(text, &ctx).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(session_id = %state.session_id, error = %e, "Classification failed");
                Vec::new()
            }
        };

        let mut seen = HashSet::new();
        let intents: Vec<Intent> = candidates
            .into_iter()
            .filter(|c| c.confidence >= self.min_intent_confidence)
            .filter(|c| seen.insert(c.intent_type))
            .filter_map(|c| {
                let intent = self.catalog.intent(c.intent_type, c.confidence);
                if intent.is_none() {
                    tracing::warn!(intent = %c.intent_type, "Classified intent is not in the catalog");
                }
                intent
            })
            .collect();

        if intents.is_empty() {
            tracing::info!(session_id = %state.session_id, "No usable intent, asking to clarify");
            return (
                state,
                SlotDecision::Clarify {
                    prompt: self.messages.clarify_intent.clone(),
                },
            );
        }

        let intents = self.catalog.expand(intents);
        tracing::info!(
            session_id = %state.session_id,
            intents = ?intents.iter().map(|i| i.intent_type).collect::<Vec<_>>(),
            "Intents classified"
        );
        state.begin_intents(intents);

        let entities = state.relevant_entities();
        self.prefill(&mut state, text, &entities).await;
        self.next_step(state).await
    }

    /// AWAITING_ENTITY: interpret the turn as the answer to the pending question.
    async fn answer(&self, mut state: DialogState, text: &str) -> (DialogState, SlotDecision) {
        if state.slot_filling_turns() > self.max_slot_filling_turns {
            tracing::warn!(
                session_id = %state.session_id,
                turns = state.slot_filling_turns(),
                "Slot filling turn limit reached, abandoning intents"
            );
            return self.abandon(state, self.messages.turn_limit.clone());
        }

        let Some(pending) = state.pending_entity else {
            state.recompute_status();
            return self.next_step(state).await;
        };

        let ctx = SessionContext::from_state(&state);
        let raw = match self.nlu.extractor.extract(text, pending, &ctx).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(session_id = %state.session_id, error = %e, "Extraction failed");
                None
            }
        };

        let rejection = match raw {
            Some(raw) => match self.nlu.validator.validate(pending, &raw).await {
                Ok(value) => {
                    state = crate::dialog::DialogStateManager::apply_entity(state, pending, &value);
                    // Pick up anything else the user volunteered.
                    let missing = state.missing_entities();
                    self.prefill(&mut state, text, &missing).await;
                    return self.next_step(state).await;
                }
                Err(rejection) => Some(rejection),
            },
            None => {
                if self.repeats_collected(&state, text).await {
                    tracing::debug!(
                        session_id = %state.session_id,
                        entity = %pending,
                        "Turn repeats collected values, asking again"
                    );
                    return self.next_step(state).await;
                }
                None
            }
        };

        self.retry(state, pending, rejection).await
    }

    /// Whether the turn carries a value equal to one already collected.
    async fn repeats_collected(&self, state: &DialogState, text: &str) -> bool {
        let mut ctx = SessionContext::from_state(state);
        ctx.pending_entity = None;

        for (&entity, collected) in &state.collected_entities {
            let Ok(Some(raw)) = self.nlu.extractor.extract(text, entity, &ctx).await else {
                continue;
            };
            match self.nlu.validator.validate(entity, &raw).await {
                Ok(value) if value == *collected => return true,
                _ => {}
            }
        }
        false
    }

    /// Count a failed attempt and either re-ask or give up.
    async fn retry(
        &self,
        mut state: DialogState,
        entity: EntityType,
        rejection: Option<ValidationRejection>,
    ) -> (DialogState, SlotDecision) {
        let attempts = state.record_failed_attempt(entity);
        tracing::info!(
            session_id = %state.session_id,
            entity = %entity,
            attempts,
            reason = rejection.as_ref().map(|r| r.message.as_str()).unwrap_or("not found"),
            "Entity attempt failed"
        );

        if attempts >= self.max_entity_retries {
            let message = self
                .messages
                .retries_exhausted
                .replace("{entity}", entity.display_name());
            return self.abandon(state, message);
        }

        let ctx = SessionContext::from_state(&state);
        let prompt = match self
            .nlu
            .questions
            .clarify(entity, rejection.as_ref(), &ctx)
            .await
        {
            Ok(prompt) => prompt,
            Err(e) => {
                tracing::warn!(error = %e, "Clarification prompt generation failed");
                fallback_question(entity)
            }
        };
        (state, SlotDecision::Ask { entity, prompt })
    }

    /// Extract and validate `entities` from the turn without consuming
    /// retries. Values that fail validation are ignored.
    async fn prefill(&self, state: &mut DialogState, text: &str, entities: &[EntityType]) {
        let mut ctx = SessionContext::from_state(state);
        ctx.pending_entity = None;

        for &entity in entities {
            if state.collected_entities.contains_key(&entity) {
                continue;
            }
            let Ok(Some(raw)) = self.nlu.extractor.extract(text, entity, &ctx).await else {
                continue;
            };
            match self.nlu.validator.validate(entity, &raw).await {
                Ok(value) => {
                    tracing::debug!(session_id = %state.session_id, entity = %entity, "Prefilled entity");
                    state.apply_entity(entity, value);
                }
                Err(rejection) => {
                    tracing::debug!(
                        session_id = %state.session_id,
                        entity = %entity,
                        reason = %rejection,
                        "Ignoring invalid prefill value"
                    );
                }
            }
        }
    }

    /// Ask for the next missing entity, or hand off to execution.
    async fn next_step(&self, state: DialogState) -> (DialogState, SlotDecision) {
        match (state.status, state.pending_entity) {
            (DialogStatus::Ready, _) => {
                tracing::info!(session_id = %state.session_id, "All entities collected");
                (state, SlotDecision::Execute)
            }
            (DialogStatus::AwaitingEntity, Some(entity)) => {
                let ctx = SessionContext::from_state(&state);
                let prompt = match self.nlu.questions.generate_prompt(entity, &ctx).await {
                    Ok(prompt) => prompt,
                    Err(e) => {
                        tracing::warn!(error = %e, "Prompt generation failed");
                        fallback_question(entity)
                    }
                };
                tracing::info!(session_id = %state.session_id, entity = %entity, "Awaiting entity");
                (state, SlotDecision::Ask { entity, prompt })
            }
            _ => (
                state,
                SlotDecision::Clarify {
                    prompt: self.messages.clarify_intent.clone(),
                },
            ),
        }
    }

    fn abandon(&self, mut state: DialogState, message: String) -> (DialogState, SlotDecision) {
        tracing::info!(
            session_id = %state.session_id,
            intents = ?state.active_intents.iter().map(|i| i.intent_type).collect::<Vec<_>>(),
            "Abandoning active intents"
        );
        state.reset();
        (state, SlotDecision::Abandon { message })
    }
}

fn fallback_question(entity: EntityType) -> String {
    format!("Could you tell me the {}?", entity.display_name())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::error::NluError;
    use crate::intent::IntentType;
    use crate::nlu::{IntentCandidate, IntentClassifier};

    struct FixedClassifier(Vec<IntentCandidate>);

    #[async_trait]
    impl IntentClassifier for FixedClassifier {
        async fn classify(
            &self,
            _text: &str,
            _ctx: &SessionContext,
        ) -> Result<Vec<IntentCandidate>, NluError> {
            Ok(self.0.clone())
        }
    }

    struct BrokenClassifier;

    #[async_trait]
    impl IntentClassifier for BrokenClassifier {
        async fn classify(
            &self,
            _text: &str,
            _ctx: &SessionContext,
        ) -> Result<Vec<IntentCandidate>, NluError> {
            Err(NluError::Classification("model offline".into()))
        }
    }

    fn machine_with(nlu: NluDeps, config: &OrchestratorConfig) -> SlotFillingMachine {
        SlotFillingMachine::new(Arc::new(IntentCatalog::builtin()), nlu, config)
    }

    fn machine() -> SlotFillingMachine {
        machine_with(NluDeps::rule_based(), &OrchestratorConfig::default())
    }

    #[tokio::test]
    async fn booking_with_location_asks_for_time() {
        let (state, decision) = machine()
            .advance(DialogState::new("s1"), "book a deep cleaning in Koramangala")
            .await;
        assert_eq!(state.status, DialogStatus::AwaitingEntity);
        assert_eq!(state.pending_entity, Some(EntityType::Time));
        assert!(matches!(
            decision,
            SlotDecision::Ask {
                entity: EntityType::Time,
                ..
            }
        ));
        assert_eq!(state.turn_count, 1);
        state.check_invariants().unwrap();
    }

    #[tokio::test]
    async fn answer_completes_slots() {
        let machine = machine();
        let (state, _) = machine
            .advance(DialogState::new("s1"), "book a cleaning in Koramangala")
            .await;
        let (state, decision) = machine.advance(state, "tomorrow 3pm").await;
        assert_eq!(decision, SlotDecision::Execute);
        assert_eq!(state.status, DialogStatus::Ready);
        assert_eq!(
            state.collected_entities.get(&EntityType::Time).map(String::as_str),
            Some("tomorrow 3pm")
        );
        state.check_invariants().unwrap();
    }

    #[tokio::test]
    async fn everything_in_one_turn_executes_immediately() {
        let (state, decision) = machine()
            .advance(
                DialogState::new("s1"),
                "book a plumber in Indiranagar tomorrow 10am",
            )
            .await;
        assert_eq!(decision, SlotDecision::Execute);
        assert_eq!(
            state.collected_entities.get(&EntityType::Service).map(String::as_str),
            Some("plumbing")
        );
    }

    #[tokio::test]
    async fn unclassifiable_turn_stays_idle() {
        let (state, decision) = machine().advance(DialogState::new("s1"), "hello").await;
        assert_eq!(state.status, DialogStatus::Idle);
        assert!(matches!(decision, SlotDecision::Clarify { .. }));
    }

    #[tokio::test]
    async fn classifier_error_is_clarification() {
        let nlu = NluDeps {
            classifier: Arc::new(BrokenClassifier),
            ..NluDeps::rule_based()
        };
        let (state, decision) = machine_with(nlu, &OrchestratorConfig::default())
            .advance(DialogState::new("s1"), "book a cleaning")
            .await;
        assert_eq!(state.status, DialogStatus::Idle);
        assert_eq!(
            decision,
            SlotDecision::Clarify {
                prompt: OrchestratorConfig::default().messages.clarify_intent
            }
        );
    }

    #[tokio::test]
    async fn low_confidence_and_duplicates_dropped() {
        let nlu = NluDeps {
            classifier: Arc::new(FixedClassifier(vec![
                IntentCandidate::new(IntentType::CancelBooking, 0.9),
                IntentCandidate::new(IntentType::CancelBooking, 0.6),
                IntentCandidate::new(IntentType::FileComplaint, 0.1),
            ])),
            ..NluDeps::rule_based()
        };
        let (state, _) = machine_with(nlu, &OrchestratorConfig::default())
            .advance(DialogState::new("s1"), "cancel it")
            .await;
        assert_eq!(state.active_intents.len(), 1);
        assert_eq!(state.active_intents[0].intent_type, IntentType::CancelBooking);
        assert_eq!(state.active_intents[0].confidence, 0.9);
    }

    #[tokio::test]
    async fn prerequisite_intent_added_and_filled() {
        let nlu = NluDeps {
            classifier: Arc::new(FixedClassifier(vec![IntentCandidate::new(
                IntentType::ConfirmAddress,
                0.8,
            )])),
            ..NluDeps::rule_based()
        };
        let (state, decision) = machine_with(nlu, &OrchestratorConfig::default())
            .advance(DialogState::new("s1"), "confirm my address, pincode 560034")
            .await;
        let types: Vec<_> = state.active_intents.iter().map(|i| i.intent_type).collect();
        assert_eq!(types, vec![IntentType::ResolvePincode, IntentType::ConfirmAddress]);
        assert_eq!(
            state.collected_entities.get(&EntityType::Pincode).map(String::as_str),
            Some("560034")
        );
        assert!(matches!(
            decision,
            SlotDecision::Ask {
                entity: EntityType::Address,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn invalid_answer_reasks_then_abandons_on_third() {
        let machine = machine();
        let (mut state, _) = machine
            .advance(DialogState::new("s1"), "book a cleaning in Koramangala")
            .await;

        for attempt in 1..=2 {
            let (next, decision) = machine.advance(state, "whenever works").await;
            state = next;
            assert_eq!(state.status, DialogStatus::AwaitingEntity);
            assert_eq!(state.attempts(EntityType::Time), attempt);
            assert!(matches!(
                decision,
                SlotDecision::Ask {
                    entity: EntityType::Time,
                    ..
                }
            ));
        }

        let (state, decision) = machine.advance(state, "whenever works").await;
        assert_eq!(state.status, DialogStatus::Idle);
        assert!(state.active_intents.is_empty());
        let SlotDecision::Abandon { message } = decision else {
            panic!("expected abandon, got {decision:?}");
        };
        assert!(message.contains("preferred time"));
        state.check_invariants().unwrap();
    }

    #[tokio::test]
    async fn repeated_collected_value_leaves_state_unchanged() {
        let machine = machine();
        let (before, _) = machine
            .advance(DialogState::new("s1"), "book a cleaning in Koramangala")
            .await;

        let mut state = before.clone();
        for _ in 0..3 {
            let (next, decision) = machine.advance(state, "in Koramangala").await;
            state = next;
            let SlotDecision::Ask { entity, prompt } = decision else {
                panic!("expected the pending question again, got {decision:?}");
            };
            assert_eq!(entity, EntityType::Time);
            assert!(prompt.starts_with("When would you like it"));
        }

        assert_eq!(state.turn_count, before.turn_count + 3);
        assert_eq!(state.attempts(EntityType::Time), 0);
        state.turn_count = before.turn_count;
        assert_eq!(state, before);
    }

    #[tokio::test]
    async fn rejection_message_used_in_reprompt() {
        let machine = machine();
        let (state, _) = machine
            .advance(DialogState::new("s1"), "what's the status of my booking")
            .await;
        assert_eq!(state.pending_entity, Some(EntityType::BookingId));
        let (_, decision) = machine.advance(state, "BK12").await;
        let SlotDecision::Ask { prompt, .. } = decision else {
            panic!("expected a re-ask");
        };
        assert!(prompt.starts_with("Sorry, I didn't catch the booking ID."));
    }

    #[tokio::test]
    async fn slot_turn_limit_abandons() {
        let config = OrchestratorConfig {
            max_slot_filling_turns: 1,
            max_entity_retries: 10,
            ..OrchestratorConfig::default()
        };
        let machine = machine_with(NluDeps::rule_based(), &config);
        let (state, _) = machine
            .advance(DialogState::new("s1"), "book a cleaning in Koramangala")
            .await;
        let (state, _) = machine.advance(state, "no idea").await;
        assert_eq!(state.status, DialogStatus::AwaitingEntity);
        let (state, decision) = machine.advance(state, "still no idea").await;
        assert_eq!(state.status, DialogStatus::Idle);
        assert_eq!(
            decision,
            SlotDecision::Abandon {
                message: config.messages.turn_limit.clone()
            }
        );
    }

    #[tokio::test]
    async fn ready_state_resumes_without_reading_text() {
        let mut state = DialogState::new("s1");
        state.begin_intents(vec![
            IntentCatalog::builtin()
                .intent(IntentType::CancelBooking, 0.9)
                .unwrap(),
        ]);
        state.apply_entity(EntityType::BookingId, "BK-1001");
        let (state, decision) = machine().advance(state, "gibberish").await;
        assert_eq!(decision, SlotDecision::Execute);
        assert_eq!(state.status, DialogStatus::Ready);
    }

    #[tokio::test]
    async fn stale_executing_state_is_reset() {
        let mut state = DialogState::new("s1");
        state.begin_intents(vec![
            IntentCatalog::builtin()
                .intent(IntentType::CancelBooking, 0.9)
                .unwrap(),
        ]);
        state.apply_entity(EntityType::BookingId, "BK-1001");
        state.status = DialogStatus::Executing;

        let (state, decision) = machine().advance(state, "hello").await;
        assert_eq!(state.status, DialogStatus::Idle);
        assert!(state.collected_entities.is_empty());
        assert!(matches!(decision, SlotDecision::Clarify { .. }));
    }
}
