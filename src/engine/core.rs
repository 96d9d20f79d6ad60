// src/engine/core.rs

//! Pure orchestrator state machine.
//!
//! This module contains a synchronous, deterministic core that consumes
//! [`RuntimeEvent`]s and sweep ticks and produces:
//! - updated task state
//! - a list of commands describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Orchestrator`) is responsible
//! for:
//! - reading notifications from the inbound channel
//! - driving the sweep timer
//! - forwarding messages to the execution backend
//!
//! Time is passed in explicitly, so the core can be unit tested with literal
//! timestamps and without any Tokio, channels or processes.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::engine::event_handlers::{
    CoreStep, fill_slots, handle_cancel, handle_notification, handle_run_timeout, run_sweep,
};
use crate::engine::result::RunResult;
use crate::engine::table::TaskTable;
use crate::engine::{RunOptions, RuntimeEvent, TaskSpec};
use crate::errors::{Result, WardenError};
use crate::journal::{Journal, JournalEntry, Severity};
use crate::protocol::{CommandMessage, TaskId, Timestamp, format_duration};
use crate::task::{Task, TaskStatus};

/// Pure orchestrator state.
///
/// This owns:
/// - every task of the run (exclusively; nothing else mutates them)
/// - the run options
/// - the injected journal
/// - the run-level flags (started, cancelled, timed out, finished)
pub struct OrchestratorCore {
    table: TaskTable,
    options: RunOptions,
    journal: Arc<dyn Journal>,
    started: bool,
    cancel_requested: bool,
    timed_out: bool,
    finished: bool,
}

impl std::fmt::Debug for OrchestratorCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorCore")
            .field("tasks", &self.table.len())
            .field("options", &self.options)
            .field("started", &self.started)
            .field("cancel_requested", &self.cancel_requested)
            .field("timed_out", &self.timed_out)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl OrchestratorCore {
    pub fn new(options: RunOptions, journal: Arc<dyn Journal>) -> Self {
        Self {
            table: TaskTable::new(),
            options,
            journal,
            started: false,
            cancel_requested: false,
            timed_out: false,
            finished: false,
        }
    }

    /// Add jobs to the run, keeping their order.
    ///
    /// The whole batch is rejected if any id is duplicated (within the batch
    /// or against tasks already submitted).
    pub fn submit_task_set(&mut self, specs: Vec<TaskSpec>) -> Result<()> {
        if self.started {
            return Err(WardenError::AlreadyStarted);
        }

        let mut seen = HashSet::new();
        for spec in &specs {
            let id = spec.id();
            if self.table.get(&id).is_some() || !seen.insert(id.clone()) {
                return Err(WardenError::DuplicateTask(id.to_string()));
            }
        }

        for spec in specs {
            let task = Task::new(
                spec.id(),
                spec.command_line,
                spec.working_dir,
                spec.progress_pattern,
            );
            self.table.insert(task)?;
        }
        Ok(())
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.table.get(id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.table.iter()
    }

    pub fn active_count(&self) -> usize {
        self.table.active_count()
    }

    pub fn is_complete(&self) -> bool {
        self.table.all_terminal()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    /// Begin the run: dispatch the first tasks up to the concurrency ceiling.
    pub fn start(&mut self, now: Timestamp) -> CoreStep {
        if self.started {
            debug!("start called twice; ignoring");
            return CoreStep::new(Vec::new(), !self.finished);
        }
        self.started = true;
        if self.table.is_empty() {
            warn!("run started without any tasks");
        }
        self.run_journal(
            Severity::Info,
            format!(
                "run started: {} tasks, concurrency {}",
                self.table.len(),
                self.options.concurrency
            ),
            now,
        );
        info!(
            tasks = self.table.len(),
            concurrency = self.options.concurrency,
            "run started"
        );
        self.finish_step(Vec::new(), now)
    }

    /// Handle a single runtime event.
    pub fn step(&mut self, event: RuntimeEvent, now: Timestamp) -> CoreStep {
        let messages = match event {
            RuntimeEvent::Notification(notification) => handle_notification(
                &mut self.table,
                &self.options,
                self.journal.as_ref(),
                notification,
                now,
            ),
            RuntimeEvent::CancelRequested => self.cancel(now),
        };
        self.finish_step(messages, now)
    }

    /// Periodic liveness sweep.
    pub fn sweep(&mut self, now: Timestamp) -> CoreStep {
        let mut messages = Vec::new();

        if let Some(limit) = self.options.overall_timeout {
            if !self.timed_out && !self.finished && now >= limit {
                self.timed_out = true;
                self.run_journal(
                    Severity::Warning,
                    format!("overall timeout of {} reached", format_duration(limit)),
                    now,
                );
                info!(?limit, "overall run timeout reached");
                messages.extend(handle_run_timeout(
                    &mut self.table,
                    &self.options,
                    self.journal.as_ref(),
                    now,
                ));
            }
        }

        messages.extend(run_sweep(
            &mut self.table,
            &self.options,
            self.journal.as_ref(),
            now,
        ));
        self.finish_step(messages, now)
    }

    /// Build the final result from the current task states.
    pub fn result(&self) -> RunResult {
        RunResult::from_tasks(self.table.iter(), self.cancel_requested)
    }

    fn cancel(&mut self, now: Timestamp) -> Vec<CommandMessage> {
        if self.cancel_requested {
            debug!("cancel already requested; ignoring");
            return Vec::new();
        }
        self.cancel_requested = true;
        self.run_journal(Severity::Warning, "cancellation requested", now);
        info!("run cancellation requested");
        handle_cancel(&mut self.table, &self.options, self.journal.as_ref(), now)
    }

    /// Refill free slots (unless the run is winding down) and detect
    /// completion.
    fn finish_step(
        &mut self,
        mut messages: Vec<CommandMessage>,
        now: Timestamp,
    ) -> CoreStep {
        if self.started && !self.cancel_requested && !self.timed_out {
            messages.extend(fill_slots(
                &mut self.table,
                &self.options,
                self.journal.as_ref(),
                now,
            ));
        }

        if self.started && !self.finished && self.table.all_terminal() {
            self.finished = true;
            let result = self.result();
            self.run_journal(
                if result.success {
                    Severity::Info
                } else {
                    Severity::Warning
                },
                format!(
                    "run complete: {} of {} tasks succeeded",
                    result
                        .per_task
                        .iter()
                        .filter(|r| r.status == TaskStatus::Done)
                        .count(),
                    result.per_task.len()
                ),
                now,
            );
            info!(success = result.success, "all tasks terminal; run complete");
        }

        CoreStep::new(messages, !self.finished)
    }

    fn run_journal(&self, severity: Severity, message: impl Into<String>, now: Timestamp) {
        self.journal
            .write(JournalEntry::for_run(severity, message, now));
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::journal::MemoryJournal;
    use crate::protocol::{CommandNotification, NotificationKind};

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn core_with(concurrency: usize, jobs: &[&str]) -> OrchestratorCore {
        let options = RunOptions {
            concurrency,
            ..RunOptions::default()
        };
        let mut core = OrchestratorCore::new(options, Arc::new(MemoryJournal::new()));
        core.submit_task_set(
            jobs.iter()
                .map(|j| TaskSpec::new("Set", *j, format!("run {j}")))
                .collect(),
        )
        .unwrap();
        core
    }

    fn notify(
        core: &mut OrchestratorCore,
        cmd: &str,
        seq: u64,
        kind: NotificationKind,
        now: u64,
    ) -> CoreStep {
        let id = TaskId::new("Set", cmd);
        core.step(
            RuntimeEvent::Notification(CommandNotification::new(id, seq, kind)),
            secs(now),
        )
    }

    #[test]
    fn rejects_duplicates_and_late_submissions() {
        let mut core = core_with(1, &["a"]);
        let err = core
            .submit_task_set(vec![TaskSpec::new("Set", "a", "again")])
            .unwrap_err();
        assert!(matches!(err, WardenError::DuplicateTask(_)));

        let err = core
            .submit_task_set(vec![
                TaskSpec::new("Set", "b", "x"),
                TaskSpec::new("Set", "b", "y"),
            ])
            .unwrap_err();
        assert!(matches!(err, WardenError::DuplicateTask(_)));
        assert!(core.task(&TaskId::new("Set", "b")).is_none());

        core.start(secs(0));
        let err = core
            .submit_task_set(vec![TaskSpec::new("Set", "c", "z")])
            .unwrap_err();
        assert!(matches!(err, WardenError::AlreadyStarted));
    }

    #[test]
    fn empty_run_completes_immediately() {
        let mut core = core_with(2, &[]);
        let step = core.start(secs(0));
        assert!(!step.keep_running);
        assert!(core.result().success);
    }

    #[test]
    fn unknown_task_and_stale_seq_are_dropped() {
        let mut core = core_with(1, &["a"]);
        core.start(secs(0));

        let step = core.step(
            RuntimeEvent::Notification(CommandNotification::new(
                TaskId::new("Nope", "x"),
                1,
                NotificationKind::Terminated { exit_code: 0 },
            )),
            secs(1),
        );
        assert!(step.keep_running);

        notify(&mut core, "a", 2, NotificationKind::Started { pid: 1, started_at: secs(1) }, 1);
        // seq 1 arrives late: dropped.
        notify(&mut core, "a", 1, NotificationKind::Terminated { exit_code: 0 }, 2);
        assert_eq!(core.task(&TaskId::new("Set", "a")).unwrap().status(), TaskStatus::Running);
    }

    #[test]
    fn concurrency_ceiling_counts_dispatched_tasks() {
        let mut core = core_with(2, &["a", "b", "c"]);
        let step = core.start(secs(0));
        let runs: Vec<_> = step
            .messages()
            .into_iter()
            .filter(|m| matches!(m, CommandMessage::Run { .. }))
            .map(|m| m.task().command.clone())
            .collect();
        assert_eq!(runs, vec!["a", "b"]);

        // A start notification does not free a slot.
        let step = notify(&mut core, "a", 1, NotificationKind::Started { pid: 1, started_at: secs(1) }, 1);
        assert!(step.messages().is_empty());
        assert_eq!(core.active_count(), 2);
    }

    #[test]
    fn overall_timeout_terminates_live_tasks_and_fails_waiting_ones() {
        let options = RunOptions {
            concurrency: 1,
            overall_timeout: Some(secs(100)),
            termination_grace: secs(5),
            ..RunOptions::default()
        };
        let mut core = OrchestratorCore::new(options, Arc::new(MemoryJournal::new()));
        core.submit_task_set(vec![
            TaskSpec::new("Set", "a", "sleep 1000"),
            TaskSpec::new("Set", "b", "true"),
        ])
        .unwrap();
        core.start(secs(0));
        notify(&mut core, "a", 1, NotificationKind::Started { pid: 10, started_at: secs(0) }, 0);
        notify(&mut core, "a", 2, NotificationKind::Progress { active_at: secs(99) }, 99);

        let step = core.sweep(secs(100));
        assert_eq!(
            step.messages(),
            vec![&CommandMessage::Terminate {
                task: TaskId::new("Set", "a"),
                pid: 10
            }]
        );
        let b = core.task(&TaskId::new("Set", "b")).unwrap();
        assert_eq!(b.status(), TaskStatus::Failed);

        let step = notify(&mut core, "a", 3, NotificationKind::Terminated { exit_code: -1 }, 101);
        assert!(!step.keep_running);
        let result = core.result();
        assert!(!result.success);
        assert_eq!(
            result.task(&TaskId::new("Set", "a")).unwrap().failure,
            Some(crate::task::FailureReason::TimedOut)
        );
    }
}
