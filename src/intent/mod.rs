//! Intent and entity vocabulary plus the per-intent configuration catalog.

pub mod catalog;
pub mod model;

pub use catalog::{IntentCatalog, IntentSpec};
pub use model::{EntityType, Intent, IntentType};
