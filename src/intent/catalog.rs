//! Static per-intent configuration: labels, slot priorities, dependencies.
//!
//! The catalog is validated once at construction. Cycles and chains deeper
//! than two levels are configuration defects and are rejected here, before
//! any turn is planned.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agents::planner::validate_dependency_graph;
use crate::error::{ConfigError, PlanningError};
use crate::intent::model::{EntityType, Intent, IntentType};

/// Configuration for one intent type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentSpec {
    pub intent_type: IntentType,
    /// Short phrase used in replies ("service booking").
    pub label: String,
    /// Entities to collect, in the order they are asked for.
    pub required_entities: Vec<EntityType>,
    /// Entities passed to the handler when present, never asked for.
    #[serde(default)]
    pub optional_entities: Vec<EntityType>,
    #[serde(default)]
    pub dependencies: Vec<IntentType>,
    /// Overrides the orchestrator-wide task timeout.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl IntentSpec {
    pub fn new(intent_type: IntentType, label: impl Into<String>) -> Self {
        Self {
            intent_type,
            label: label.into(),
            required_entities: Vec::new(),
            optional_entities: Vec::new(),
            dependencies: Vec::new(),
            timeout_ms: None,
        }
    }

    pub fn requiring(mut self, entities: impl IntoIterator<Item = EntityType>) -> Self {
        self.required_entities = entities.into_iter().collect();
        self
    }

    pub fn optional(mut self, entities: impl IntoIterator<Item = EntityType>) -> Self {
        self.optional_entities = entities.into_iter().collect();
        self
    }

    pub fn depending_on(mut self, intents: impl IntoIterator<Item = IntentType>) -> Self {
        self.dependencies = intents.into_iter().collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Deserialize)]
struct CatalogFile {
    intents: Vec<IntentSpec>,
}

/// Validated set of intent specs, keyed by intent type.
#[derive(Debug, Clone)]
pub struct IntentCatalog {
    specs: HashMap<IntentType, IntentSpec>,
}

impl IntentCatalog {
    /// Build a catalog, rejecting duplicate entries and invalid dependency graphs.
    pub fn new(specs: Vec<IntentSpec>) -> Result<Self, PlanningError> {
        let mut map = HashMap::with_capacity(specs.len());
        for spec in specs {
            let intent_type = spec.intent_type;
            if map.insert(intent_type, spec).is_some() {
                return Err(PlanningError::DuplicateIntent(intent_type));
            }
        }

        let mut edges: Vec<(IntentType, Vec<IntentType>)> = map
            .values()
            .map(|s| (s.intent_type, s.dependencies.clone()))
            .collect();
        edges.sort_by_key(|(t, _)| *t);
        validate_dependency_graph(&edges)?;

        Ok(Self { specs: map })
    }

    /// Parse a catalog from `{"intents": [...]}` JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let file: CatalogFile =
            serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        Ok(Self::new(file.intents)?)
    }

    /// The catalog shipped with the crate.
    pub fn builtin() -> Self {
        use EntityType::*;
        use IntentType::*;

        let specs = vec![
            IntentSpec::new(BookService, "service booking")
                .requiring([Location, Time])
                .optional([Service]),
            IntentSpec::new(CancelBooking, "booking cancellation").requiring([BookingId]),
            IntentSpec::new(FileComplaint, "complaint")
                .requiring([BookingId, ComplaintText]),
            IntentSpec::new(CategoryLookup, "category lookup").requiring([Category]),
            IntentSpec::new(BookingStatus, "booking status check").requiring([BookingId]),
            IntentSpec::new(ResolvePincode, "pincode lookup").requiring([Pincode]),
            IntentSpec::new(ConfirmAddress, "address confirmation")
                .requiring([Address])
                .depending_on([ResolvePincode]),
        ];

        match Self::new(specs) {
            Ok(catalog) => catalog,
            Err(e) => unreachable!("built-in catalog is invalid: {e}"),
        }
    }

    pub fn get(&self, intent_type: IntentType) -> Option<&IntentSpec> {
        self.specs.get(&intent_type)
    }

    pub fn contains(&self, intent_type: IntentType) -> bool {
        self.specs.contains_key(&intent_type)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Label for replies; falls back to the intent type name.
    pub fn label(&self, intent_type: IntentType) -> String {
        self.get(intent_type)
            .map(|s| s.label.clone())
            .unwrap_or_else(|| intent_type.to_string().replace('_', " "))
    }

    /// Build an `Intent` from its spec, or `None` for unconfigured types.
    pub fn intent(&self, intent_type: IntentType, confidence: f32) -> Option<Intent> {
        let spec = self.get(intent_type)?;
        let mut intent = Intent::new(intent_type, confidence)
            .requiring(spec.required_entities.iter().copied())
            .depending_on(spec.dependencies.iter().copied());
        intent.optional_entities = spec.optional_entities.clone();
        Some(intent)
    }

    /// Close the intent list over declared dependencies.
    ///
    /// A prerequisite that was not classified is inserted just before the
    /// first intent that needs it and inherits that intent's confidence.
    /// Duplicates keep their first position.
    pub fn expand(&self, intents: Vec<Intent>) -> Vec<Intent> {
        let mut expanded: Vec<Intent> = Vec::with_capacity(intents.len());
        let classified: Vec<IntentType> = intents.iter().map(|i| i.intent_type).collect();

        for intent in intents {
            for dependency in &intent.dependencies {
                let present = expanded.iter().any(|i| i.intent_type == *dependency)
                    || classified.contains(dependency);
                if present {
                    continue;
                }
                if let Some(prerequisite) = self.intent(*dependency, intent.confidence) {
                    tracing::debug!(
                        intent = %intent.intent_type,
                        prerequisite = %dependency,
                        "Adding implied prerequisite intent"
                    );
                    expanded.push(prerequisite);
                }
            }
            if !expanded.iter().any(|i| i.intent_type == intent.intent_type) {
                expanded.push(intent);
            }
        }

        expanded
    }
}

impl Default for IntentCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
