// src/protocol/mod.rs

//! Command/notification protocol between the orchestrator and the execution
//! backend.
//!
//! - [`message`] holds [`CommandMessage`], the directives sent toward the
//!   backend.
//! - [`notification`] holds [`CommandNotification`], the events the backend
//!   reports back for a task.
//! - [`clock`] defines the run-relative timestamps carried by both.

pub mod clock;
pub mod message;
pub mod notification;

use std::fmt;

pub use clock::{RunClock, Timestamp, format_duration};
pub use message::CommandMessage;
pub use notification::{CommandNotification, NotificationKind};

/// Identifier of one configured job: the command set it belongs to plus the
/// command name inside that set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId {
    pub command_set: String,
    pub command: String,
}

impl TaskId {
    pub fn new(command_set: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            command_set: command_set.into(),
            command: command.into(),
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.command_set, self.command)
    }
}
