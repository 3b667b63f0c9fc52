//! Dialog state: one conversation's slot-filling progress.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::intent::{EntityType, Intent};

/// Where a session is in the slot-filling lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogStatus {
    /// No active intent.
    #[default]
    Idle,
    /// Waiting for the user to supply `pending_entity`.
    AwaitingEntity,
    /// Every required entity collected; ready to dispatch.
    Ready,
    /// Tasks dispatched for this turn.
    Executing,
    /// At least one task succeeded.
    Complete,
    /// Every task failed, timed out or was skipped.
    Failed,
}

impl DialogStatus {
    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: DialogStatus) -> bool {
        use DialogStatus::*;
        matches!(
            (self, target),
            (Idle, AwaitingEntity)
                | (Idle, Ready)
                | (AwaitingEntity, AwaitingEntity)
                | (AwaitingEntity, Ready)
                | (AwaitingEntity, Idle)
                | (Ready, Executing)
                | (Ready, Idle)
                | (Executing, Complete)
                | (Executing, Failed)
                | (Executing, Idle)
                | (Complete, Idle)
                | (Failed, Idle)
        )
    }

    /// Statuses that exist only while a turn is executing.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Executing | Self::Complete | Self::Failed)
    }
}

impl std::fmt::Display for DialogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::AwaitingEntity => "awaiting_entity",
            Self::Ready => "ready",
            Self::Executing => "executing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Per-session dialog state, persisted between turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogState {
    pub session_id: String,
    pub status: DialogStatus,
    /// In detection order. Non-empty only between classification and completion.
    pub active_intents: Vec<Intent>,
    /// Validated values, one per entity type.
    pub collected_entities: BTreeMap<EntityType, String>,
    pub pending_entity: Option<EntityType>,
    pub turn_count: u64,
    /// Failed extraction/validation attempts per entity.
    #[serde(default)]
    pub entity_attempts: BTreeMap<EntityType, u32>,
    /// `turn_count` at which the active intents were classified.
    #[serde(default)]
    pub intent_started_turn: Option<u64>,
    /// Store version this state was loaded at; 0 when never saved.
    #[serde(default)]
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl DialogState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            status: DialogStatus::Idle,
            active_intents: Vec::new(),
            collected_entities: BTreeMap::new(),
            pending_entity: None,
            turn_count: 0,
            entity_attempts: BTreeMap::new(),
            intent_started_turn: None,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    /// Required entities not yet collected, in asking order: intents in
    /// detection order, each intent's entities in its declared priority.
    pub fn missing_entities(&self) -> Vec<EntityType> {
        let mut missing = Vec::new();
        for intent in &self.active_intents {
            for entity in &intent.required_entities {
                if !self.collected_entities.contains_key(entity) && !missing.contains(entity) {
                    missing.push(*entity);
                }
            }
        }
        missing
    }

    pub fn next_missing(&self) -> Option<EntityType> {
        self.missing_entities().into_iter().next()
    }

    /// Every entity any active intent may use, required first.
    pub fn relevant_entities(&self) -> Vec<EntityType> {
        let mut entities = Vec::new();
        for intent in &self.active_intents {
            for entity in intent.relevant_entities() {
                if !entities.contains(&entity) {
                    entities.push(entity);
                }
            }
        }
        entities
    }

    /// Transition to a new status.
    pub fn transition_to(&mut self, status: DialogStatus) -> Result<(), String> {
        if !self.status.can_transition_to(status) {
            return Err(format!(
                "Cannot transition session {} from {} to {}",
                self.session_id, self.status, status
            ));
        }
        self.status = status;
        Ok(())
    }

    /// Derive status and pending entity from the active intents and the
    /// collected entities. Leaves transient statuses alone.
    pub fn recompute_status(&mut self) {
        if self.status.is_transient() {
            return;
        }
        if self.active_intents.is_empty() {
            self.status = DialogStatus::Idle;
            self.pending_entity = None;
            return;
        }
        match self.next_missing() {
            Some(entity) => {
                self.status = DialogStatus::AwaitingEntity;
                self.pending_entity = Some(entity);
            }
            None => {
                self.status = DialogStatus::Ready;
                self.pending_entity = None;
            }
        }
    }

    /// Start collecting for newly classified intents.
    pub fn begin_intents(&mut self, intents: Vec<Intent>) {
        self.active_intents = intents;
        self.collected_entities.clear();
        self.entity_attempts.clear();
        self.intent_started_turn = Some(self.turn_count);
        self.recompute_status();
    }

    /// Store a validated value and recompute status. Re-applying the value
    /// already collected for that type changes nothing. Returns whether the
    /// state changed.
    pub fn apply_entity(&mut self, entity: EntityType, value: impl Into<String>) -> bool {
        let value = value.into();
        if self.collected_entities.get(&entity) == Some(&value) {
            return false;
        }
        self.collected_entities.insert(entity, value);
        self.entity_attempts.remove(&entity);
        if self.pending_entity == Some(entity) {
            self.pending_entity = None;
        }
        self.recompute_status();
        true
    }

    /// Count a failed attempt at `entity`; returns the new count.
    pub fn record_failed_attempt(&mut self, entity: EntityType) -> u32 {
        let attempts = self.entity_attempts.entry(entity).or_insert(0);
        *attempts += 1;
        *attempts
    }

    pub fn attempts(&self, entity: EntityType) -> u32 {
        self.entity_attempts.get(&entity).copied().unwrap_or(0)
    }

    /// Turns spent on the active intents since classification.
    pub fn slot_filling_turns(&self) -> u64 {
        self.intent_started_turn
            .map(|start| self.turn_count.saturating_sub(start))
            .unwrap_or(0)
    }

    /// Drop the active intents and everything collected for them.
    pub fn reset(&mut self) {
        self.status = DialogStatus::Idle;
        self.active_intents.clear();
        self.collected_entities.clear();
        self.pending_entity = None;
        self.entity_attempts.clear();
        self.intent_started_turn = None;
    }

    /// Check the status invariants.
    pub fn check_invariants(&self) -> Result<(), String> {
        match self.status {
            DialogStatus::Idle => {
                if !self.active_intents.is_empty() || self.pending_entity.is_some() {
                    return Err("idle session has active intents or a pending entity".into());
                }
            }
            DialogStatus::AwaitingEntity => {
                let Some(pending) = self.pending_entity else {
                    return Err("awaiting_entity without a pending entity".into());
                };
                if self.collected_entities.contains_key(&pending) {
                    return Err(format!("pending entity {pending} is already collected"));
                }
                let required = self
                    .active_intents
                    .iter()
                    .any(|i| i.required_entities.contains(&pending));
                if !required {
                    return Err(format!("pending entity {pending} is not required by any intent"));
                }
            }
            DialogStatus::Ready => {
                if self.active_intents.is_empty() {
                    return Err("ready without active intents".into());
                }
                if let Some(missing) = self.next_missing() {
                    return Err(format!("ready but {missing} is missing"));
                }
            }
            DialogStatus::Executing | DialogStatus::Complete | DialogStatus::Failed => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{IntentCatalog, IntentType};

    fn booking_state() -> DialogState {
        let mut state = DialogState::new("s1");
        let intent = IntentCatalog::builtin()
            .intent(IntentType::BookService, 0.9)
            .unwrap();
        state.begin_intents(vec![intent]);
        state
    }

    #[test]
    fn valid_transitions() {
        use DialogStatus::*;
        for (from, to) in [
            (Idle, AwaitingEntity),
            (Idle, Ready),
            (AwaitingEntity, Ready),
            (AwaitingEntity, Idle),
            (Ready, Executing),
            (Executing, Complete),
            (Executing, Failed),
            (Complete, Idle),
            (Failed, Idle),
        ] {
            assert!(from.can_transition_to(to), "{from} should transition to {to}");
        }
    }

    #[test]
    fn invalid_transitions() {
        use DialogStatus::*;
        assert!(!Idle.can_transition_to(Executing));
        assert!(!AwaitingEntity.can_transition_to(Executing));
        assert!(!Ready.can_transition_to(Complete));
        assert!(!Complete.can_transition_to(Ready));
    }

    #[test]
    fn missing_entities_follow_priority() {
        let state = booking_state();
        assert_eq!(
            state.missing_entities(),
            vec![EntityType::Location, EntityType::Time]
        );
        assert_eq!(state.status, DialogStatus::AwaitingEntity);
        assert_eq!(state.pending_entity, Some(EntityType::Location));
        state.check_invariants().unwrap();
    }

    #[test]
    fn partially_filled_is_not_ready() {
        let mut state = booking_state();
        state.apply_entity(EntityType::Location, "Koramangala");
        assert_eq!(state.status, DialogStatus::AwaitingEntity);
        assert_eq!(state.pending_entity, Some(EntityType::Time));
        state.check_invariants().unwrap();

        state.apply_entity(EntityType::Time, "tomorrow 3pm");
        assert_eq!(state.status, DialogStatus::Ready);
        assert!(state.pending_entity.is_none());
        state.check_invariants().unwrap();
    }

    #[test]
    fn optional_entity_does_not_gate_ready() {
        let mut state = booking_state();
        state.apply_entity(EntityType::Service, "deep cleaning");
        assert_eq!(state.status, DialogStatus::AwaitingEntity);
        assert_eq!(state.pending_entity, Some(EntityType::Location));
    }

    #[test]
    fn reapplying_same_value_is_noop() {
        let mut state = booking_state();
        state.apply_entity(EntityType::Location, "Koramangala");
        let before = state.clone();
        assert!(!state.apply_entity(EntityType::Location, "Koramangala"));
        assert_eq!(state, before);
    }

    #[test]
    fn apply_clears_attempts() {
        let mut state = booking_state();
        assert_eq!(state.record_failed_attempt(EntityType::Location), 1);
        assert_eq!(state.record_failed_attempt(EntityType::Location), 2);
        state.apply_entity(EntityType::Location, "Koramangala");
        assert_eq!(state.attempts(EntityType::Location), 0);
    }

    #[test]
    fn shared_entity_asked_once() {
        let catalog = IntentCatalog::builtin();
        let mut state = DialogState::new("s1");
        state.begin_intents(vec![
            catalog.intent(IntentType::BookingStatus, 0.9).unwrap(),
            catalog.intent(IntentType::FileComplaint, 0.8).unwrap(),
        ]);
        assert_eq!(
            state.missing_entities(),
            vec![EntityType::BookingId, EntityType::ComplaintText]
        );
    }

    #[test]
    fn invariant_violations_detected() {
        let mut state = booking_state();
        state.status = DialogStatus::Ready;
        assert!(state.check_invariants().is_err());

        let mut state = booking_state();
        state.pending_entity = Some(EntityType::BookingId);
        assert!(state.check_invariants().is_err());
    }

    #[test]
    fn reset_keeps_identity_and_counters() {
        let mut state = booking_state();
        state.turn_count = 4;
        state.version = 7;
        state.reset();
        assert_eq!(state.status, DialogStatus::Idle);
        assert!(state.active_intents.is_empty());
        assert_eq!(state.turn_count, 4);
        assert_eq!(state.version, 7);
        state.check_invariants().unwrap();
    }

    #[test]
    fn slot_filling_turns_counts_from_classification() {
        let mut state = DialogState::new("s1");
        state.turn_count = 3;
        state.begin_intents(vec![
            IntentCatalog::builtin()
                .intent(IntentType::CancelBooking, 0.9)
                .unwrap(),
        ]);
        state.turn_count = 5;
        assert_eq!(state.slot_filling_turns(), 2);
    }

    #[test]
    fn serde_roundtrip_keeps_entity_keys() {
        let mut state = booking_state();
        state.apply_entity(EntityType::Location, "Koramangala");
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["collected_entities"]["location"], "Koramangala");
        assert_eq!(json["status"], "awaiting_entity");
    }
}
