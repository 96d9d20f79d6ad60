// src/engine/table.rs

//! Ownership of every task in a run.

use std::collections::HashMap;

use crate::errors::{Result, WardenError};
use crate::protocol::TaskId;
use crate::task::Task;

/// Tasks in creation order, indexed by id, with the last applied notification
/// sequence number of each.
#[derive(Debug, Default)]
pub struct TaskTable {
    tasks: Vec<Task>,
    index: HashMap<TaskId, usize>,
    last_seq: Vec<u64>,
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, task: Task) -> Result<()> {
        if self.index.contains_key(task.id()) {
            return Err(WardenError::DuplicateTask(task.id().to_string()));
        }
        self.index.insert(task.id().clone(), self.tasks.len());
        self.tasks.push(task);
        self.last_seq.push(0);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn position(&self, id: &TaskId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.position(id).map(|i| &self.tasks[i])
    }

    pub fn at_mut(&mut self, index: usize) -> &mut Task {
        &mut self.tasks[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Task> {
        self.tasks.iter_mut()
    }

    /// Number of tasks holding a concurrency slot.
    pub fn active_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_active()).count()
    }

    pub fn all_terminal(&self) -> bool {
        self.tasks.iter().all(|t| t.is_terminal())
    }

    /// First task, in configuration order, that still waits for a slot.
    pub fn next_waiting(&self) -> Option<usize> {
        self.tasks
            .iter()
            .position(|t| t.dispatched_at().is_none() && !t.is_terminal())
    }

    /// Record `seq` for the task at `index` if it is newer than the last one.
    ///
    /// Returns the previous sequence number when `seq` is stale.
    pub fn accept_seq(&mut self, index: usize, seq: u64) -> std::result::Result<(), u64> {
        let last = self.last_seq[index];
        if seq <= last {
            return Err(last);
        }
        self.last_seq[index] = seq;
        Ok(())
    }
}
