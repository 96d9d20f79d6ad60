// src/journal/memory.rs

use std::sync::{Mutex, MutexGuard};

use super::{Journal, JournalEntry, Severity};
use crate::protocol::TaskId;

/// Journal that keeps every entry in memory.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    entries: Mutex<Vec<JournalEntry>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.lock().clone()
    }

    /// Entries written for `task`, in write order.
    pub fn entries_for(&self, task: &TaskId) -> Vec<JournalEntry> {
        self.lock()
            .iter()
            .filter(|e| e.task.as_ref() == Some(task))
            .cloned()
            .collect()
    }

    /// Entries for `task` with exactly the given severity.
    pub fn with_severity(&self, task: &TaskId, severity: Severity) -> Vec<JournalEntry> {
        self.entries_for(task)
            .into_iter()
            .filter(|e| e.severity == severity)
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<JournalEntry>> {
        // A panic while holding the lock cannot leave a Vec half-pushed.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Journal for MemoryJournal {
    fn write(&self, entry: JournalEntry) {
        self.lock().push(entry);
    }
}
