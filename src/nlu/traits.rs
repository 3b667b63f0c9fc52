//! Contracts for the language collaborators the state machine consults.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::dialog::DialogState;
use crate::error::{NluError, ValidationRejection};
use crate::intent::{EntityType, IntentType};

/// Read-only view of a session handed to collaborators.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub session_id: String,
    pub active_intents: Vec<IntentType>,
    pub collected_entities: BTreeMap<EntityType, String>,
    /// The entity the user was just asked for, if any. Extractors may treat
    /// the whole turn as the answer when it matches.
    pub pending_entity: Option<EntityType>,
    pub turn_count: u64,
}

impl SessionContext {
    pub fn from_state(state: &DialogState) -> Self {
        Self {
            session_id: state.session_id.clone(),
            active_intents: state.active_intents.iter().map(|i| i.intent_type).collect(),
            collected_entities: state.collected_entities.clone(),
            pending_entity: state.pending_entity,
            turn_count: state.turn_count,
        }
    }
}

/// One classifier guess. Slot requirements come from the intent catalog.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntentCandidate {
    pub intent_type: IntentType,
    pub confidence: f32,
}

impl IntentCandidate {
    pub fn new(intent_type: IntentType, confidence: f32) -> Self {
        Self {
            intent_type,
            confidence,
        }
    }
}

/// Text → intents, ordered by descending confidence. May return several
/// intents for one turn, or none.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(
        &self,
        text: &str,
        ctx: &SessionContext,
    ) -> Result<Vec<IntentCandidate>, NluError>;
}

/// Text → raw value for one expected entity type, or `None` if absent.
#[async_trait]
pub trait EntityExtractor: Send + Sync {
    async fn extract(
        &self,
        text: &str,
        entity: EntityType,
        ctx: &SessionContext,
    ) -> Result<Option<String>, NluError>;
}

/// Business-rule check; returns the normalized value.
#[async_trait]
pub trait EntityValidator: Send + Sync {
    async fn validate(&self, entity: EntityType, raw: &str) -> Result<String, ValidationRejection>;
}

/// Produces the questions asked while slot filling.
#[async_trait]
pub trait QuestionGenerator: Send + Sync {
    async fn generate_prompt(
        &self,
        entity: EntityType,
        ctx: &SessionContext,
    ) -> Result<String, NluError>;

    /// Re-ask `entity` after a failed attempt.
    async fn clarify(
        &self,
        entity: EntityType,
        rejection: Option<&ValidationRejection>,
        ctx: &SessionContext,
    ) -> Result<String, NluError> {
        let question = self.generate_prompt(entity, ctx).await?;
        Ok(match rejection {
            Some(rejection) => format!("{} {question}", rejection.message),
            None => format!("Sorry, I didn't catch the {}. {question}", entity.display_name()),
        })
    }
}

/// The collaborators one orchestrator instance talks to.
#[derive(Clone)]
pub struct NluDeps {
    pub classifier: Arc<dyn IntentClassifier>,
    pub extractor: Arc<dyn EntityExtractor>,
    pub validator: Arc<dyn EntityValidator>,
    pub questions: Arc<dyn QuestionGenerator>,
}
