//! Task execution: planning, scheduling, handlers and response merging.

pub mod builtin;
pub mod handler;
pub mod merger;
pub mod planner;
pub mod scheduler;
pub mod task;

pub use builtin::{BookingLedger, register_builtin_handlers};
pub use handler::{HandlerRegistry, TaskContext, TaskHandler, TaskInput};
pub use merger::{MergedResponse, Provenance, ResponseMerger, ResponsePart, ResponseSource};
pub use planner::{DependencyResolver, ExecutionPlan};
pub use scheduler::{ExecutionReport, ExecutionStatus, Scheduler};
pub use task::{AgentTask, TaskOutput, TaskStatus};
