// src/task/mod.rs

//! Per-job state machine.
//!
//! - [`state`] defines the status tag, the payload-carrying [`TaskState`] and
//!   the failure / termination vocabulary.
//! - [`hang`] tracks escalation thresholds within a stall episode.
//! - [`machine`] holds [`Task`] and its transition table.

pub mod hang;
pub mod machine;
pub mod state;

pub use hang::{HangPolicy, HangTracker};
pub use machine::{Task, TaskContext, TaskInput};
pub use state::{
    EXIT_CODE_UNAVAILABLE, FailureReason, PendingTermination, TaskState, TaskStatus,
    TerminationCause,
};
