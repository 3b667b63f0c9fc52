//! Rule-based collaborators driven by regular expressions, so the
//! orchestrator runs end to end without an NLP service.

use std::collections::HashMap;

use async_trait::async_trait;
use regex::Regex;

use crate::error::{NluError, ValidationRejection};
use crate::intent::{EntityType, IntentType};
use crate::nlu::traits::{
    EntityExtractor, EntityValidator, IntentCandidate, IntentClassifier, QuestionGenerator,
    SessionContext,
};

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            tracing::warn!(pattern, error = %e, "Skipping invalid pattern");
            None
        }
    }
}

const TIME_PATTERN: &str = r"(?i)\b(?:\d{4}-\d{2}-\d{2}(?:\s+\d{1,2}:\d{2})?|(?:today|tomorrow|tonight|(?:mon|tues|wednes|thurs|fri|satur|sun)day)(?:\s+(?:at\s+)?\d{1,2}(?::\d{2})?\s*(?:am|pm))?|\d{1,2}(?::\d{2})?\s*(?:am|pm))\b";

const SERVICES: &[(&str, &str)] = &[
    ("deep cleaning", "deep cleaning"),
    ("cleaning", "cleaning"),
    ("plumbing", "plumbing"),
    ("plumber", "plumbing"),
    ("electrician", "electrical"),
    ("electrical", "electrical"),
    ("ac service", "AC service"),
    ("ac repair", "AC service"),
    ("painting", "painting"),
    ("pest control", "pest control"),
    ("carpentry", "carpentry"),
];

const CATEGORIES: &[&str] = &["cleaning", "plumbing", "electrical", "appliance repair"];

// ── classifier ──────────────────────────────────────────────────────

struct IntentRule {
    intent_type: IntentType,
    confidence: f32,
    regex: Regex,
}

/// Keyword classifier: every rule whose pattern matches yields a candidate.
pub struct KeywordClassifier {
    rules: Vec<IntentRule>,
}

impl KeywordClassifier {
    pub fn new() -> Self {
        use IntentType::*;
        let rules = [
            (CancelBooking, 0.92, r"(?i)\bcancel"),
            (BookService, 0.9, r"(?i)\b(?:book|schedule|need an?|want an?)\b"),
            (
                FileComplaint,
                0.88,
                r"(?i)\b(?:complain|complaint|unhappy|not satisfied|poor service)",
            ),
            (
                BookingStatus,
                0.85,
                r"(?i)\b(?:status|track|where is my)\b",
            ),
            (
                ConfirmAddress,
                0.83,
                r"(?i)\b(?:confirm|verify|update|change)\b.*\baddress\b",
            ),
            (
                CategoryLookup,
                0.8,
                r"(?i)\b(?:what|which)\b.*\bservices\b|\bcategor(?:y|ies)\b",
            ),
            (ResolvePincode, 0.75, r"(?i)\bpin\s?code\b"),
        ];
        Self {
            rules: rules
                .into_iter()
                .filter_map(|(intent_type, confidence, pattern)| {
                    compile(pattern).map(|regex| IntentRule {
                        intent_type,
                        confidence,
                        regex,
                    })
                })
                .collect(),
        }
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IntentClassifier for KeywordClassifier {
    async fn classify(
        &self,
        text: &str,
        _ctx: &SessionContext,
    ) -> Result<Vec<IntentCandidate>, NluError> {
        let mut candidates: Vec<IntentCandidate> = self
            .rules
            .iter()
            .filter(|rule| rule.regex.is_match(text))
            .map(|rule| IntentCandidate::new(rule.intent_type, rule.confidence))
            .collect();
        candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Ok(candidates)
    }
}

// ── extractor ───────────────────────────────────────────────────────

/// Pattern extractor. Returns the first capture group when the pattern has
/// one, else the whole match. When the entity is the one just asked for,
/// free-text entities fall back to the whole turn.
pub struct PatternExtractor {
    patterns: HashMap<EntityType, Regex>,
}

impl PatternExtractor {
    pub fn new() -> Self {
        use EntityType::*;
        let service_words = SERVICES
            .iter()
            .map(|(word, _)| regex::escape(word))
            .collect::<Vec<_>>()
            .join("|");
        let category_words = CATEGORIES
            .iter()
            .map(|c| regex::escape(c))
            .collect::<Vec<_>>()
            .join("|");

        let patterns = [
            (BookingId, r"(?i)\b(BK-?\d{3,})\b".to_string()),
            (Pincode, r"\b([1-9]\d{5})\b".to_string()),
            (Time, TIME_PATTERN.to_string()),
            (
                Location,
                r"\b(?:in|at|near|In|At|Near)\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+)*)".to_string(),
            ),
            (Service, format!(r"(?i)\b({service_words})\b")),
            (Category, format!(r"(?i)\b({category_words})\b")),
            (
                Address,
                r"(?i)\b(\d+[\w/-]*,?\s+[\w .'-]*?\b(?:road|rd|street|st|cross|main|layout|nagar|lane|avenue))\b"
                    .to_string(),
            ),
            (
                ComplaintText,
                r"(?i)\b(?:complain(?:t)?\s+(?:about|that)|because)\s+(.+)$".to_string(),
            ),
        ];

        Self {
            patterns: patterns
                .into_iter()
                .filter_map(|(entity, pattern)| compile(&pattern).map(|regex| (entity, regex)))
                .collect(),
        }
    }

    fn accepts_whole_turn(entity: EntityType) -> bool {
        matches!(
            entity,
            EntityType::Location
                | EntityType::Address
                | EntityType::ComplaintText
                | EntityType::Service
                | EntityType::Category
        )
    }
}

impl Default for PatternExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntityExtractor for PatternExtractor {
    async fn extract(
        &self,
        text: &str,
        entity: EntityType,
        ctx: &SessionContext,
    ) -> Result<Option<String>, NluError> {
        let text = text.trim();
        let matched = self
            .patterns
            .get(&entity)
            .and_then(|regex| regex.captures(text))
            .and_then(|caps| caps.get(1).or_else(|| caps.get(0)))
            .map(|m| m.as_str().trim())
            .filter(|v| !v.is_empty());
        if let Some(value) = matched {
            return Ok(Some(value.to_string()));
        }

        if ctx.pending_entity == Some(entity) && Self::accepts_whole_turn(entity) && !text.is_empty()
        {
            return Ok(Some(text.to_string()));
        }
        Ok(None)
    }
}

// ── validator ───────────────────────────────────────────────────────

/// Business-rule validator with light normalization.
pub struct RuleValidator {
    booking_id: Option<Regex>,
    pincode: Option<Regex>,
    time: Option<Regex>,
}

impl RuleValidator {
    pub fn new() -> Self {
        Self {
            booking_id: compile(r"(?i)^BK-?(\d{3,})$"),
            pincode: compile(r"^[1-9]\d{5}$"),
            time: compile(&format!("^(?:{TIME_PATTERN})$")),
        }
    }
}

impl Default for RuleValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn matches(regex: &Option<Regex>, value: &str) -> bool {
    regex.as_ref().is_some_and(|r| r.is_match(value))
}

#[async_trait]
impl EntityValidator for RuleValidator {
    async fn validate(&self, entity: EntityType, raw: &str) -> Result<String, ValidationRejection> {
        let value = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        match entity {
            EntityType::BookingId => {
                let digits = self
                    .booking_id
                    .as_ref()
                    .and_then(|r| r.captures(&value))
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string());
                digits.map(|d| format!("BK-{d}")).ok_or_else(|| {
                    ValidationRejection::new("That doesn't look like a booking ID.")
                        .with_suggestions(vec!["BK-1001".into()])
                })
            }
            EntityType::Pincode => {
                if matches(&self.pincode, &value) {
                    Ok(value)
                } else {
                    Err(ValidationRejection::new("Pincodes have six digits."))
                }
            }
            EntityType::Time => {
                if matches(&self.time, &value) {
                    Ok(value.to_lowercase())
                } else {
                    Err(
                        ValidationRejection::new("I couldn't work out that time.").with_suggestions(
                            vec!["tomorrow 3pm".into(), "saturday 10am".into()],
                        ),
                    )
                }
            }
            EntityType::Location => {
                let plausible = (2..=60).contains(&value.chars().count())
                    && value.chars().any(char::is_alphabetic)
                    && !value.chars().any(|c| c.is_ascii_digit());
                if plausible {
                    Ok(value)
                } else {
                    Err(ValidationRejection::new("I couldn't recognise that locality."))
                }
            }
            EntityType::Service => {
                let lower = value.to_lowercase();
                SERVICES
                    .iter()
                    .find(|(word, _)| lower.contains(*word))
                    .map(|(_, canonical)| canonical.to_string())
                    .ok_or_else(|| {
                        ValidationRejection::new("We don't offer that service yet.")
                            .with_suggestions(vec!["cleaning".into(), "plumbing".into()])
                    })
            }
            EntityType::Category => {
                let lower = value.to_lowercase();
                CATEGORIES
                    .iter()
                    .find(|c| lower.contains(**c))
                    .map(|c| c.to_string())
                    .ok_or_else(|| {
                        ValidationRejection::new("That isn't one of our categories.")
                            .with_suggestions(CATEGORIES.iter().map(|c| c.to_string()).collect())
                    })
            }
            EntityType::Address => {
                if value.chars().count() >= 5 && value.chars().any(|c| c.is_ascii_digit()) {
                    Ok(value)
                } else {
                    Err(ValidationRejection::new(
                        "Please include the house or flat number.",
                    ))
                }
            }
            EntityType::ComplaintText => {
                if value.chars().count() >= 10 {
                    Ok(value)
                } else {
                    Err(ValidationRejection::new(
                        "Could you describe the problem in a little more detail?",
                    ))
                }
            }
        }
    }
}

// ── questions ───────────────────────────────────────────────────────

/// Fixed question per entity type.
#[derive(Debug, Default)]
pub struct TemplateQuestions;

#[async_trait]
impl QuestionGenerator for TemplateQuestions {
    async fn generate_prompt(
        &self,
        entity: EntityType,
        _ctx: &SessionContext,
    ) -> Result<String, NluError> {
        let question = match entity {
            EntityType::Service => "Which service do you need?",
            EntityType::Location => "Which area should we come to?",
            EntityType::Time => "When would you like it? For example, tomorrow 3pm.",
            EntityType::BookingId => "What's your booking ID? It looks like BK-1001.",
            EntityType::ComplaintText => "What went wrong?",
            EntityType::Category => "Which category are you interested in?",
            EntityType::Pincode => "What's your pincode?",
            EntityType::Address => "What's the full address, including the house number?",
        };
        Ok(question.to_string())
    }

    async fn clarify(
        &self,
        entity: EntityType,
        rejection: Option<&ValidationRejection>,
        ctx: &SessionContext,
    ) -> Result<String, NluError> {
        let question = self.generate_prompt(entity, ctx).await?;
        let Some(rejection) = rejection else {
            return Ok(format!(
                "Sorry, I didn't catch the {}. {question}",
                entity.display_name()
            ));
        };
        if rejection.suggestions.is_empty() {
            Ok(format!("{} {question}", rejection.message))
        } else {
            Ok(format!(
                "{} {question} (e.g. {})",
                rejection.message,
                rejection.suggestions.join(", ")
            ))
        }
    }
}
