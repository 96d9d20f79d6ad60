// src/engine/mod.rs

//! Orchestration engine for taskwarden.
//!
//! This module ties together:
//! - the task table (every configured job, in configuration order)
//! - the dispatch policy (FIFO under a concurrency ceiling)
//! - the liveness sweep (hang escalation, termination grace, run timeout)
//! - the main runtime event loop that reacts to:
//!   - backend notifications
//!   - sweep ticks
//!   - cancellation requests
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::{CommandNotification, TaskId};
use crate::task::HangPolicy;

/// One job to run, as submitted by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub command_set: String,
    pub command: String,
    pub command_line: String,
    pub working_dir: Option<PathBuf>,
    pub progress_pattern: Option<String>,
}

impl TaskSpec {
    pub fn new(
        command_set: impl Into<String>,
        command: impl Into<String>,
        command_line: impl Into<String>,
    ) -> Self {
        Self {
            command_set: command_set.into(),
            command: command.into(),
            command_line: command_line.into(),
            working_dir: None,
            progress_pattern: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_progress_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.progress_pattern = Some(pattern.into());
        self
    }

    pub fn id(&self) -> TaskId {
        TaskId::new(&self.command_set, &self.command)
    }
}

/// Run-wide policy used by the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Maximum number of jobs holding a slot at the same time (>= 1).
    pub concurrency: usize,
    /// Stall escalation ladder.
    pub hang: HangPolicy,
    /// How long a termination request may stay unconfirmed.
    pub termination_grace: Duration,
    /// Deadline for the whole run, measured from its start.
    pub overall_timeout: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            hang: HangPolicy::default(),
            termination_grace: Duration::from_secs(10),
            overall_timeout: None,
        }
    }
}

/// Events flowing into the orchestrator.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// The backend reported something about a task.
    Notification(CommandNotification),
    /// Cancel the whole run (operator request or Ctrl-C).
    CancelRequested,
}

pub mod core;
pub mod event_handlers;
pub mod result;
pub mod runtime;
pub mod table;

pub use core::OrchestratorCore;
pub use event_handlers::{CoreCommand, CoreStep};
pub use result::{RunOutcome, RunResult, TaskReport};
pub use runtime::{Orchestrator, OrchestratorHandle};
pub use table::TaskTable;
