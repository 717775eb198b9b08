//! Digital Task Service (spec §4.7): runs device-initiated goals
//! through a pluggable executor with timeout, cancellation, and
//! interrupt-previous semantics, and pushes status updates back to the
//! device with retry and a durable fallback queue.

pub mod executor;
pub mod service;

pub use executor::{ClosureExecutor, StageOutcome, StagedExecutor, TaskExecutor, TwoStageExecutor};
pub use service::{DigitalTaskService, ExecuteTaskRequest, StatusSink, TaskStatusUpdate};
