//! Language collaborators: intent classification, entity extraction and
//! validation, and question generation.

pub mod rules;
pub mod traits;

pub use rules::{KeywordClassifier, PatternExtractor, RuleValidator, TemplateQuestions};
pub use traits::{
    EntityExtractor, EntityValidator, IntentCandidate, IntentClassifier, NluDeps,
    QuestionGenerator, SessionContext,
};

use std::sync::Arc;

impl NluDeps {
    /// Regex-driven collaborators that need no external service.
    pub fn rule_based() -> Self {
        Self {
            classifier: Arc::new(KeywordClassifier::new()),
            extractor: Arc::new(PatternExtractor::new()),
            validator: Arc::new(RuleValidator::new()),
            questions: Arc::new(TemplateQuestions),
        }
    }
}
