// src/protocol/message.rs

use std::path::PathBuf;

use super::TaskId;

/// Directive flowing toward the execution backend.
///
/// Each message is consumed exactly once; a backend that no longer knows the
/// target process discards it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandMessage {
    /// Start the job's process.
    Run {
        task: TaskId,
        command_line: String,
        working_dir: Option<PathBuf>,
        /// Regex selecting which output lines count as activity. `None`
        /// means any output line does.
        progress_pattern: Option<String>,
    },
    /// Withdraw a job that was dispatched but has not reported `Started`.
    Cancel { task: TaskId },
    /// Kill a running process.
    Terminate { task: TaskId, pid: u32 },
    /// Produce a diagnostic dump of a running process.
    CollectDiagnostic { task: TaskId, pid: u32 },
}

impl CommandMessage {
    pub fn task(&self) -> &TaskId {
        match self {
            CommandMessage::Run { task, .. }
            | CommandMessage::Cancel { task }
            | CommandMessage::Terminate { task, .. }
            | CommandMessage::CollectDiagnostic { task, .. } => task,
        }
    }

    /// Short lowercase name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CommandMessage::Run { .. } => "run",
            CommandMessage::Cancel { .. } => "cancel",
            CommandMessage::Terminate { .. } => "terminate",
            CommandMessage::CollectDiagnostic { .. } => "collect_diagnostic",
        }
    }
}
