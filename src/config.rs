//! Configuration types.

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// User-facing texts for turns that do not come from a task or a prompt.
#[derive(Debug, Clone)]
pub struct ResponseMessages {
    /// Classification produced nothing usable.
    pub clarify_intent: String,
    /// Retry bound hit for an entity. `{entity}` is replaced with its name.
    pub retries_exhausted: String,
    /// Slot filling ran past `max_slot_filling_turns`.
    pub turn_limit: String,
    /// The turn aborted (planning or store failure).
    pub apology: String,
}

impl Default for ResponseMessages {
    fn default() -> Self {
        Self {
            clarify_intent: "Sorry, I didn't quite get that. You can book a service, \
                             cancel or check a booking, or raise a complaint."
                .to_string(),
            retries_exhausted: "I still couldn't understand the {entity}, so I've set this \
                                request aside. What would you like to do next?"
                .to_string(),
            turn_limit: "This is taking a while, so I've set this request aside. \
                         Feel free to start again."
                .to_string(),
            apology: "Sorry, something went wrong on our side. Please try again in a moment."
                .to_string(),
        }
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Default timeout for one task handler invocation.
    pub task_timeout: Duration,
    /// Maximum independent tasks running at once within a turn.
    pub max_concurrent_tasks: usize,
    /// Failed attempts for one pending entity before the intent is abandoned.
    pub max_entity_retries: u32,
    /// Classifier candidates below this confidence are ignored.
    pub min_intent_confidence: f32,
    /// Turns an intent may spend collecting entities before it is abandoned.
    pub max_slot_filling_turns: u64,
    pub messages: ResponseMessages,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_secs(2),
            max_concurrent_tasks: 4,
            max_entity_retries: 3,
            min_intent_confidence: 0.3,
            max_slot_filling_turns: 12,
            messages: ResponseMessages::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Build a config from defaults overlaid with `ORCHESTRATOR_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let timeout_ms = env_or(
            "ORCHESTRATOR_TASK_TIMEOUT_MS",
            defaults.task_timeout.as_millis() as u64,
        )?;
        let config = Self {
            task_timeout: Duration::from_millis(timeout_ms),
            max_concurrent_tasks: env_or(
                "ORCHESTRATOR_MAX_CONCURRENT_TASKS",
                defaults.max_concurrent_tasks,
            )?,
            max_entity_retries: env_or(
                "ORCHESTRATOR_MAX_ENTITY_RETRIES",
                defaults.max_entity_retries,
            )?,
            min_intent_confidence: env_or(
                "ORCHESTRATOR_MIN_CONFIDENCE",
                defaults.min_intent_confidence,
            )?,
            max_slot_filling_turns: env_or(
                "ORCHESTRATOR_MAX_SLOT_TURNS",
                defaults.max_slot_filling_turns,
            )?,
            messages: defaults.messages,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the orchestrator misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.task_timeout.is_zero() {
            return Err(invalid("ORCHESTRATOR_TASK_TIMEOUT_MS", "must be positive"));
        }
        if self.max_concurrent_tasks == 0 {
            return Err(invalid("ORCHESTRATOR_MAX_CONCURRENT_TASKS", "must be at least 1"));
        }
        if self.max_entity_retries == 0 {
            return Err(invalid("ORCHESTRATOR_MAX_ENTITY_RETRIES", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.min_intent_confidence) {
            return Err(invalid("ORCHESTRATOR_MIN_CONFIDENCE", "must be within 0..=1"));
        }
        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{raw:?}: {e}"),
    })
}
