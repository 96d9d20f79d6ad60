// src/engine/result.rs

use std::fmt;
use std::time::Duration;

use crate::protocol::{TaskId, format_duration};
use crate::task::{FailureReason, Task, TaskStatus};

/// Final outcome of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub id: TaskId,
    pub status: TaskStatus,
    pub exit_code: Option<i32>,
    pub failure: Option<FailureReason>,
    pub pid: Option<u32>,
    pub most_severe_hang: Option<Duration>,
}

impl From<&Task> for TaskReport {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id().clone(),
            status: task.status(),
            exit_code: task.exit_code(),
            failure: task.failure().cloned(),
            pid: task.pid(),
            most_severe_hang: task.most_severe_hang(),
        }
    }
}

/// Aggregate verdict of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every task is `Done`.
    Success,
    /// Some tasks did not finish successfully; listed in creation order.
    PartialFailure { failed: Vec<TaskId> },
    /// The run was cancelled; every task that is not `Done` is listed.
    Cancelled { affected: Vec<TaskId> },
}

/// Per-task outcome of a run, in creation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub success: bool,
    pub outcome: RunOutcome,
    pub per_task: Vec<TaskReport>,
}

impl RunResult {
    pub fn from_tasks<'a>(tasks: impl Iterator<Item = &'a Task>, cancelled: bool) -> Self {
        let per_task: Vec<TaskReport> = tasks.map(TaskReport::from).collect();
        let not_done: Vec<TaskId> = per_task
            .iter()
            .filter(|r| r.status != TaskStatus::Done)
            .map(|r| r.id.clone())
            .collect();

        let outcome = if not_done.is_empty() {
            RunOutcome::Success
        } else if cancelled {
            RunOutcome::Cancelled { affected: not_done }
        } else {
            RunOutcome::PartialFailure { failed: not_done }
        };

        Self {
            success: outcome == RunOutcome::Success,
            outcome,
            per_task,
        }
    }

    pub fn task(&self, id: &TaskId) -> Option<&TaskReport> {
        self.per_task.iter().find(|r| &r.id == id)
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = match &self.outcome {
            RunOutcome::Success => "success".to_string(),
            RunOutcome::PartialFailure { failed } => {
                format!("partial failure ({} of {} tasks)", failed.len(), self.per_task.len())
            }
            RunOutcome::Cancelled { affected } => {
                format!("cancelled ({} tasks affected)", affected.len())
            }
        };
        writeln!(f, "run result: {verdict}")?;

        for report in &self.per_task {
            write!(f, "  {:<40} {:<9}", report.id.to_string(), report.status.to_string())?;
            if let Some(code) = report.exit_code {
                write!(f, " exit={code}")?;
            }
            if let Some(reason) = &report.failure {
                write!(f, " ({reason})")?;
            }
            if let Some(hang) = report.most_severe_hang {
                write!(f, " longest-stall={}", format_duration(hang))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
