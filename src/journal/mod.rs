// src/journal/mod.rs

//! Append-only status journal.
//!
//! Tasks and the orchestrator report human-readable status lines through the
//! [`Journal`] capability. Writing is fire-and-forget: implementations must be
//! safe to call from any thread and must not block the caller for longer than
//! a bounded buffering delay.
//!
//! - [`TracingJournal`] forwards entries to `tracing`.
//! - [`file::FileJournal`] buffers entries into a file through a bounded
//!   channel.
//! - [`memory::MemoryJournal`] keeps entries in memory (tests, dry runs).
//! - [`TeeJournal`] fans entries out to several sinks.

pub mod file;
pub mod memory;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::protocol::{TaskId, Timestamp};

pub use file::FileJournal;
pub use memory::MemoryJournal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARN",
            Severity::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// One journal line. `task` is `None` for run-level entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub task: Option<TaskId>,
    pub severity: Severity,
    pub message: String,
    pub at: Timestamp,
}

impl JournalEntry {
    pub fn for_task(
        task: &TaskId,
        severity: Severity,
        message: impl Into<String>,
        at: Timestamp,
    ) -> Self {
        Self {
            task: Some(task.clone()),
            severity,
            message: message.into(),
            at,
        }
    }

    pub fn for_run(severity: Severity, message: impl Into<String>, at: Timestamp) -> Self {
        Self {
            task: None,
            severity,
            message: message.into(),
            at,
        }
    }
}

impl fmt::Display for JournalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:>10.3}s] {:<5} ",
            self.at.as_secs_f64(),
            self.severity
        )?;
        match &self.task {
            Some(task) => write!(f, "{task}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Append-only sink for status lines.
pub trait Journal: Send + Sync {
    fn write(&self, entry: JournalEntry);
}

impl<J: Journal + ?Sized> Journal for Arc<J> {
    fn write(&self, entry: JournalEntry) {
        (**self).write(entry)
    }
}

/// Journal that re-emits every entry as a `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingJournal;

impl Journal for TracingJournal {
    fn write(&self, entry: JournalEntry) {
        let task = entry
            .task
            .as_ref()
            .map(|t| t.to_string())
            .unwrap_or_default();
        let at = entry.at.as_secs_f64();
        match entry.severity {
            Severity::Debug => debug!(target: "journal", %task, at, "{}", entry.message),
            Severity::Info => info!(target: "journal", %task, at, "{}", entry.message),
            Severity::Warning => warn!(target: "journal", %task, at, "{}", entry.message),
            Severity::Error => error!(target: "journal", %task, at, "{}", entry.message),
        }
    }
}

/// Writes every entry to each of the wrapped journals, in order.
#[derive(Clone, Default)]
pub struct TeeJournal {
    sinks: Vec<Arc<dyn Journal>>,
}

impl TeeJournal {
    pub fn new(sinks: Vec<Arc<dyn Journal>>) -> Self {
        Self { sinks }
    }
}

impl Journal for TeeJournal {
    fn write(&self, entry: JournalEntry) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.write(entry.clone());
            }
            last.write(entry);
        }
    }
}
