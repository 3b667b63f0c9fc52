//! Dialog Orchestrator: slot filling, dependency-aware task scheduling and
//! response merging for conversational service requests.

pub mod agents;
pub mod config;
pub mod dialog;
pub mod error;
pub mod intent;
pub mod nlu;
pub mod orchestrator;
pub mod store;

pub use config::OrchestratorConfig;
pub use error::{Error, Result};
pub use orchestrator::{Orchestrator, OrchestratorDeps, TurnReply};
