//! Built-in demo handlers for every built-in intent type.
//!
//! Bookings live in an in-process [`BookingLedger`] so that a booking made in
//! one turn can be checked, cancelled or complained about in a later one.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::agents::handler::{HandlerRegistry, TaskContext, TaskHandler, TaskInput};
use crate::agents::task::TaskOutput;
use crate::error::TaskError;
use crate::intent::{EntityType, IntentType};

/// Lifecycle of a demo booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingState {
    Confirmed,
    Cancelled,
}

/// A booking made through [`BookServiceHandler`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub service: String,
    pub location: String,
    pub time: String,
    pub state: BookingState,
    pub created_at: DateTime<Utc>,
    pub complaints: Vec<String>,
}

/// Shared booking table for the demo handlers.
#[derive(Debug)]
pub struct BookingLedger {
    next_id: AtomicU64,
    bookings: RwLock<HashMap<String, Booking>>,
}

impl BookingLedger {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1001),
            bookings: RwLock::new(HashMap::new()),
        }
    }

    async fn create(&self, service: &str, location: &str, time: &str) -> Booking {
        let id = format!("BK-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let booking = Booking {
            id: id.clone(),
            service: service.to_string(),
            location: location.to_string(),
            time: time.to_string(),
            state: BookingState::Confirmed,
            created_at: Utc::now(),
            complaints: Vec::new(),
        };
        self.bookings.write().await.insert(id, booking.clone());
        booking
    }

    pub async fn get(&self, id: &str) -> Option<Booking> {
        self.bookings.read().await.get(id).cloned()
    }

    async fn update<T>(&self, id: &str, f: impl FnOnce(&mut Booking) -> T) -> Option<T> {
        self.bookings.write().await.get_mut(id).map(f)
    }
}

impl Default for BookingLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn unknown_booking(id: &str) -> TaskError {
    TaskError::Execution(format!("no booking found with id {id}"))
}

// ── book_service ────────────────────────────────────────────────────

pub struct BookServiceHandler {
    ledger: Arc<BookingLedger>,
}

#[async_trait]
impl TaskHandler for BookServiceHandler {
    fn intent_type(&self) -> IntentType {
        IntentType::BookService
    }

    async fn execute(&self, input: TaskInput, _ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        let location = input.entity(EntityType::Location)?;
        let time = input.entity(EntityType::Time)?;
        let service = input
            .payload
            .get(&EntityType::Service)
            .map(String::as_str)
            .unwrap_or("home service");

        let booking = self.ledger.create(service, location, time).await;
        tracing::info!(booking_id = %booking.id, service, "Booking created");

        Ok(TaskOutput::text(format!(
            "Your {} is booked in {} for {}. Booking id: {}.",
            booking.service, booking.location, booking.time, booking.id
        ))
        .with_data(serde_json::json!({ "booking_id": booking.id })))
    }
}

// ── cancel_booking ──────────────────────────────────────────────────

pub struct CancelBookingHandler {
    ledger: Arc<BookingLedger>,
}

#[async_trait]
impl TaskHandler for CancelBookingHandler {
    fn intent_type(&self) -> IntentType {
        IntentType::CancelBooking
    }

    async fn execute(&self, input: TaskInput, _ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        let id = input.entity(EntityType::BookingId)?;
        let previous = self
            .ledger
            .update(id, |b| std::mem::replace(&mut b.state, BookingState::Cancelled))
            .await
            .ok_or_else(|| unknown_booking(id))?;

        let text = match previous {
            BookingState::Cancelled => format!("Booking {id} was already cancelled."),
            BookingState::Confirmed => format!("Booking {id} has been cancelled."),
        };
        Ok(TaskOutput::text(text).with_data(serde_json::json!({ "booking_id": id })))
    }
}

// ── file_complaint ──────────────────────────────────────────────────

pub struct FileComplaintHandler {
    ledger: Arc<BookingLedger>,
}

#[async_trait]
impl TaskHandler for FileComplaintHandler {
    fn intent_type(&self) -> IntentType {
        IntentType::FileComplaint
    }

    async fn execute(&self, input: TaskInput, _ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        let id = input.entity(EntityType::BookingId)?;
        let complaint = input.entity(EntityType::ComplaintText)?;
        let count = self
            .ledger
            .update(id, |b| {
                b.complaints.push(complaint.to_string());
                b.complaints.len()
            })
            .await
            .ok_or_else(|| unknown_booking(id))?;

        let reference = format!("CMP-{id}-{count}");
        Ok(TaskOutput::text(format!(
            "I've registered your complaint about booking {id}. Reference: {reference}."
        ))
        .with_data(serde_json::json!({ "reference": reference })))
    }
}

// ── booking_status ──────────────────────────────────────────────────

pub struct BookingStatusHandler {
    ledger: Arc<BookingLedger>,
}

#[async_trait]
impl TaskHandler for BookingStatusHandler {
    fn intent_type(&self) -> IntentType {
        IntentType::BookingStatus
    }

    async fn execute(&self, input: TaskInput, _ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        let id = input.entity(EntityType::BookingId)?;
        let booking = self.ledger.get(id).await.ok_or_else(|| unknown_booking(id))?;
        let text = match booking.state {
            BookingState::Confirmed => format!(
                "Booking {} for {} in {} is confirmed for {}.",
                booking.id, booking.service, booking.location, booking.time
            ),
            BookingState::Cancelled => format!("Booking {} has been cancelled.", booking.id),
        };
        let data = serde_json::to_value(&booking).map_err(|e| TaskError::Execution(e.to_string()))?;
        Ok(TaskOutput::text(text).with_data(data))
    }
}

// ── category_lookup ─────────────────────────────────────────────────

const CATEGORIES: &[(&str, &[&str])] = &[
    ("cleaning", &["home deep cleaning", "bathroom cleaning", "sofa cleaning"]),
    ("plumbing", &["leak repair", "tap installation", "drain unblocking"]),
    ("electrical", &["fan installation", "wiring repair", "switchboard repair"]),
    ("appliance repair", &["AC service", "washing machine repair", "fridge repair"]),
];

pub struct CategoryLookupHandler;

#[async_trait]
impl TaskHandler for CategoryLookupHandler {
    fn intent_type(&self) -> IntentType {
        IntentType::CategoryLookup
    }

    async fn execute(&self, input: TaskInput, _ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        let category = input.entity(EntityType::Category)?.to_lowercase();
        let (name, services) = CATEGORIES
            .iter()
            .find(|(name, _)| *name == category)
            .ok_or_else(|| TaskError::Execution(format!("unknown category {category}")))?;
        Ok(
            TaskOutput::text(format!("Our {name} services: {}.", services.join(", ")))
                .with_data(serde_json::json!({ "category": name, "services": services })),
        )
    }
}

// ── resolve_pincode ─────────────────────────────────────────────────

const PINCODES: &[(&str, &str, &str)] = &[
    ("560034", "Koramangala", "Bengaluru"),
    ("560038", "Indiranagar", "Bengaluru"),
    ("400001", "Fort", "Mumbai"),
    ("110001", "Connaught Place", "New Delhi"),
    ("600017", "T. Nagar", "Chennai"),
];

pub struct ResolvePincodeHandler;

#[async_trait]
impl TaskHandler for ResolvePincodeHandler {
    fn intent_type(&self) -> IntentType {
        IntentType::ResolvePincode
    }

    async fn execute(&self, input: TaskInput, _ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        let pincode = input.entity(EntityType::Pincode)?;
        let (_, locality, city) = PINCODES
            .iter()
            .find(|(code, _, _)| *code == pincode)
            .ok_or_else(|| TaskError::Execution(format!("pincode {pincode} is not serviceable")))?;
        Ok(
            TaskOutput::text(format!("Pincode {pincode} is {locality}, {city}."))
                .with_data(serde_json::json!({
                    "pincode": pincode,
                    "locality": locality,
                    "city": city,
                })),
        )
    }
}

// ── confirm_address ─────────────────────────────────────────────────

pub struct ConfirmAddressHandler;

#[async_trait]
impl TaskHandler for ConfirmAddressHandler {
    fn intent_type(&self) -> IntentType {
        IntentType::ConfirmAddress
    }

    async fn execute(&self, input: TaskInput, _ctx: TaskContext) -> Result<TaskOutput, TaskError> {
        let address = input.entity(EntityType::Address)?;
        let resolved = input
            .upstream
            .get(&IntentType::ResolvePincode)
            .ok_or_else(|| TaskError::Execution("pincode was not resolved".into()))?;
        let field = |key: &str| {
            resolved.data[key]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| TaskError::Execution(format!("resolved pincode lacks {key}")))
        };
        let (pincode, locality, city) = (field("pincode")?, field("locality")?, field("city")?);

        let full = format!("{address}, {locality}, {city} {pincode}");
        Ok(TaskOutput::text(format!("Address confirmed: {full}."))
            .with_data(serde_json::json!({ "address": full })))
    }
}

/// Register a handler for every built-in intent type.
pub fn register_builtin_handlers(registry: &mut HandlerRegistry, ledger: Arc<BookingLedger>) {
    registry.register(Arc::new(BookServiceHandler {
        ledger: Arc::clone(&ledger),
    }));
    registry.register(Arc::new(CancelBookingHandler {
        ledger: Arc::clone(&ledger),
    }));
    registry.register(Arc::new(FileComplaintHandler {
        ledger: Arc::clone(&ledger),
    }));
    registry.register(Arc::new(BookingStatusHandler { ledger }));
    registry.register(Arc::new(CategoryLookupHandler));
    registry.register(Arc::new(ResolvePincodeHandler));
    registry.register(Arc::new(ConfirmAddressHandler));
}
