//! Intent and entity types.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Domain tasks the assistant can carry out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    BookService,
    CancelBooking,
    FileComplaint,
    CategoryLookup,
    BookingStatus,
    ResolvePincode,
    ConfirmAddress,
}

impl IntentType {
    pub const ALL: [IntentType; 7] = [
        IntentType::BookService,
        IntentType::CancelBooking,
        IntentType::FileComplaint,
        IntentType::CategoryLookup,
        IntentType::BookingStatus,
        IntentType::ResolvePincode,
        IntentType::ConfirmAddress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BookService => "book_service",
            Self::CancelBooking => "cancel_booking",
            Self::FileComplaint => "file_complaint",
            Self::CategoryLookup => "category_lookup",
            Self::BookingStatus => "booking_status",
            Self::ResolvePincode => "resolve_pincode",
            Self::ConfirmAddress => "confirm_address",
        }
    }
}

impl std::fmt::Display for IntentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown intent type: {s}"))
    }
}

/// Typed values an intent may need before it can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Service,
    Location,
    Time,
    BookingId,
    ComplaintText,
    Category,
    Pincode,
    Address,
}

impl EntityType {
    pub const ALL: [EntityType; 8] = [
        EntityType::Service,
        EntityType::Location,
        EntityType::Time,
        EntityType::BookingId,
        EntityType::ComplaintText,
        EntityType::Category,
        EntityType::Pincode,
        EntityType::Address,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Location => "location",
            Self::Time => "time",
            Self::BookingId => "booking_id",
            Self::ComplaintText => "complaint_text",
            Self::Category => "category",
            Self::Pincode => "pincode",
            Self::Address => "address",
        }
    }

    /// Human-readable name used in prompts.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Location => "location",
            Self::Time => "preferred time",
            Self::BookingId => "booking ID",
            Self::ComplaintText => "complaint details",
            Self::Category => "category",
            Self::Pincode => "pincode",
            Self::Address => "address",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown entity type: {s}"))
    }
}

/// A classified user goal with its slot requirements.
///
/// `required_entities` is ordered by asking priority; it is still treated as
/// a set when checking completeness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub intent_type: IntentType,
    pub confidence: f32,
    pub required_entities: Vec<EntityType>,
    #[serde(default)]
    pub optional_entities: Vec<EntityType>,
    #[serde(default)]
    pub dependencies: Vec<IntentType>,
}

impl Intent {
    pub fn new(intent_type: IntentType, confidence: f32) -> Self {
        Self {
            intent_type,
            confidence: confidence.clamp(0.0, 1.0),
            required_entities: Vec::new(),
            optional_entities: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn requiring(mut self, entities: impl IntoIterator<Item = EntityType>) -> Self {
        self.required_entities = entities.into_iter().collect();
        self
    }

    pub fn depending_on(mut self, intents: impl IntoIterator<Item = IntentType>) -> Self {
        self.dependencies = intents.into_iter().collect();
        self
    }

    pub fn is_independent(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Required entities followed by optional ones, without duplicates.
    pub fn relevant_entities(&self) -> impl Iterator<Item = EntityType> + '_ {
        self.required_entities.iter().copied().chain(
            self.optional_entities
                .iter()
                .copied()
                .filter(|e| !self.required_entities.contains(e)),
        )
    }
}
