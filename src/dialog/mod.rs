//! Dialog state, its manager, and the slot-filling state machine.

pub mod machine;
pub mod manager;
pub mod state;

pub use machine::{SlotDecision, SlotFillingMachine};
pub use manager::DialogStateManager;
pub use state::{DialogState, DialogStatus};
