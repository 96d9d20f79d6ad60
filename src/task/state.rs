// src/task/state.rs

use std::fmt;

use crate::protocol::Timestamp;

/// Exit code recorded for failures that never produced one from a process.
pub const EXIT_CODE_UNAVAILABLE: i32 = -1;

/// Status tag of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Init,
    Running,
    Cancelled,
    Stalled,
    Failed,
    Dumped,
    Done,
}

impl TaskStatus {
    /// `Cancelled`, `Failed` and `Done` are final; nothing moves a task out of
    /// them.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Cancelled | TaskStatus::Failed | TaskStatus::Done
        )
    }

    /// States in which a process is known to exist.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            TaskStatus::Running | TaskStatus::Stalled | TaskStatus::Dumped
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Init => "init",
            TaskStatus::Running => "running",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Stalled => "stalled",
            TaskStatus::Failed => "failed",
            TaskStatus::Dumped => "dumped",
            TaskStatus::Done => "done",
        };
        f.write_str(s)
    }
}

/// Why a task ended up `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The process exited with a non-zero code.
    NonZeroExit,
    /// The backend could not create the process.
    SpawnFailed(String),
    /// The backend lost track of a running process.
    Backend(String),
    /// The process was killed after it stalled past the final threshold.
    KilledAfterHang,
    /// The run's overall timeout expired before the job finished.
    TimedOut,
    /// Termination was requested but never confirmed within the grace period.
    TerminationUnconfirmed,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NonZeroExit => f.write_str("non-zero exit"),
            FailureReason::SpawnFailed(reason) => write!(f, "spawn failed: {reason}"),
            FailureReason::Backend(reason) => write!(f, "backend failure: {reason}"),
            FailureReason::KilledAfterHang => f.write_str("killed after hang"),
            FailureReason::TimedOut => f.write_str("timed out"),
            FailureReason::TerminationUnconfirmed => {
                f.write_str("did not confirm termination")
            }
        }
    }
}

/// Full task state: the status tag plus whatever data only exists in that
/// status. An exit code exists exactly in `Failed` and `Done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Init,
    Running,
    Stalled,
    Dumped,
    /// `process_exit` is filled in if the backend later reports the exit code
    /// of the cancelled process.
    Cancelled { process_exit: Option<i32> },
    Failed { exit_code: i32, reason: FailureReason },
    Done { exit_code: i32 },
}

impl TaskState {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskState::Init => TaskStatus::Init,
            TaskState::Running => TaskStatus::Running,
            TaskState::Stalled => TaskStatus::Stalled,
            TaskState::Dumped => TaskStatus::Dumped,
            TaskState::Cancelled { .. } => TaskStatus::Cancelled,
            TaskState::Failed { .. } => TaskStatus::Failed,
            TaskState::Done { .. } => TaskStatus::Done,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            TaskState::Failed { exit_code, .. } | TaskState::Done { exit_code } => {
                Some(*exit_code)
            }
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            TaskState::Failed { reason, .. } => Some(reason),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

/// Who asked for a process to go away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationCause {
    Cancel,
    Hang,
    Timeout,
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminationCause::Cancel => "cancel",
            TerminationCause::Hang => "hang",
            TerminationCause::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// A termination request still waiting for backend confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTermination {
    pub cause: TerminationCause,
    pub requested_at: Timestamp,
}
