//! Dual-mode invocation workflows.
//!
//! Optional mode lets the model choose zero or more tool calls per turn
//! and loops until it returns plain text. Forced mode runs a fixed
//! search -> extract -> summarize pipeline regardless of model choice,
//! only handing the model the final summarization step.

mod forced;
mod optional;

pub use forced::{ForcedWorkflow, PipelineOutcome, WorkflowState};
pub use optional::{OptionalWorkflow, TurnOutcome};
