// src/protocol/notification.rs

use std::path::PathBuf;
use std::time::Duration;

use super::{TaskId, Timestamp};

/// Event reported by the execution backend for one task.
///
/// `seq` starts at 1 and increases by one for every notification the backend
/// emits for the same task. The orchestrator drops anything whose `seq` is not
/// newer than the last one it applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandNotification {
    pub task: TaskId,
    pub seq: u64,
    pub kind: NotificationKind,
}

impl CommandNotification {
    pub fn new(task: TaskId, seq: u64, kind: NotificationKind) -> Self {
        Self { task, seq, kind }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    /// The process was created.
    Started { pid: u32, started_at: Timestamp },
    /// The process showed activity at `active_at`.
    Progress { active_at: Timestamp },
    /// The process exited.
    Terminated { exit_code: i32 },
    /// The process has been inactive for `elapsed`.
    Hung { elapsed: Duration },
    /// A requested diagnostic dump completed.
    DiagnosticCollected { artifact: Option<PathBuf> },
    /// A requested diagnostic dump could not be produced.
    DiagnosticFailed { reason: String },
    /// The backend could not create or keep track of the process.
    BackendFailure { reason: String },
}

impl NotificationKind {
    pub fn name(&self) -> &'static str {
        match self {
            NotificationKind::Started { .. } => "started",
            NotificationKind::Progress { .. } => "progress",
            NotificationKind::Terminated { .. } => "terminated",
            NotificationKind::Hung { .. } => "hung",
            NotificationKind::DiagnosticCollected { .. } => "diagnostic_collected",
            NotificationKind::DiagnosticFailed { .. } => "diagnostic_failed",
            NotificationKind::BackendFailure { .. } => "backend_failure",
        }
    }
}
