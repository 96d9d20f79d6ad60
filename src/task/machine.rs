// src/task/machine.rs

//! The [`Task`] state machine.
//!
//! A task is mutated only through [`Task::apply`]. Every call is a pure
//! function of the current state, the input and the [`TaskContext`]; the only
//! side effect is appending journal entries. The returned messages are for the
//! caller to forward to the execution backend, so dispatch can be batched or
//! delayed without touching task internals.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::journal::{Journal, JournalEntry, Severity};
use crate::protocol::{CommandMessage, NotificationKind, TaskId, Timestamp, format_duration};
use crate::task::hang::{HangPolicy, HangTracker};
use crate::task::state::{
    EXIT_CODE_UNAVAILABLE, FailureReason, PendingTermination, TaskState, TaskStatus,
    TerminationCause,
};
use crate::types::HangAction;

/// Everything a transition may read besides the task itself.
pub struct TaskContext<'a> {
    pub policy: &'a HangPolicy,
    pub journal: &'a dyn Journal,
    pub now: Timestamp,
}

/// Inputs of the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskInput {
    /// The orchestrator granted the task a concurrency slot.
    Dispatch,
    /// The backend reported something about the process.
    Notification(NotificationKind),
    /// Operator or run-level cancellation.
    Cancel,
    /// The run's overall timeout expired.
    RunTimeout,
    /// A termination request outlived the grace period.
    TerminationExpired,
}

#[derive(Debug, Clone)]
pub struct Task {
    id: TaskId,
    command_line: String,
    working_dir: Option<PathBuf>,
    progress_pattern: Option<String>,

    state: TaskState,
    pid: Option<u32>,
    start_time: Option<Timestamp>,
    last_active_time: Option<Timestamp>,
    dispatched_at: Option<Timestamp>,

    hang: HangTracker,
    dump_requested: bool,
    termination: Option<PendingTermination>,
}

impl Task {
    pub fn new(
        id: TaskId,
        command_line: impl Into<String>,
        working_dir: Option<PathBuf>,
        progress_pattern: Option<String>,
    ) -> Self {
        Self {
            id,
            command_line: command_line.into(),
            working_dir,
            progress_pattern,
            state: TaskState::Init,
            pid: None,
            start_time: None,
            last_active_time: None,
            dispatched_at: None,
            hang: HangTracker::default(),
            dump_requested: false,
            termination: None,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    pub fn status(&self) -> TaskStatus {
        self.state.status()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.state.exit_code()
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        self.state.failure()
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn start_time(&self) -> Option<Timestamp> {
        self.start_time
    }

    pub fn last_active_time(&self) -> Option<Timestamp> {
        self.last_active_time
    }

    pub fn dispatched_at(&self) -> Option<Timestamp> {
        self.dispatched_at
    }

    /// Thresholds already reported in the current stall episode.
    pub fn last_reported_hang(&self) -> usize {
        self.hang.reported()
    }

    pub fn most_severe_hang(&self) -> Option<Duration> {
        self.hang.most_severe()
    }

    pub fn termination(&self) -> Option<&PendingTermination> {
        self.termination.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Holds a concurrency slot: dispatched and not finished yet.
    pub fn is_active(&self) -> bool {
        self.dispatched_at.is_some() && !self.is_terminal()
    }

    /// Inactivity to report if the next hang threshold is due at `now`.
    ///
    /// Tasks that are already being terminated are not escalated further.
    pub fn hang_due(&self, now: Timestamp, policy: &HangPolicy) -> Option<Duration> {
        if !self.status().is_live() || self.termination.is_some() {
            return None;
        }
        let elapsed = now.saturating_sub(self.last_active_time?);
        let next = self.hang.next_threshold(policy)?;
        (elapsed >= next).then_some(elapsed)
    }

    /// Whether a pending termination has outlived `grace` at `now`.
    pub fn termination_expired(&self, now: Timestamp, grace: Duration) -> bool {
        match self.termination {
            Some(pending) if !self.is_terminal() => {
                now.saturating_sub(pending.requested_at) >= grace
            }
            _ => false,
        }
    }

    /// Backend-facing entry point.
    pub fn apply_notification(
        &mut self,
        notification: NotificationKind,
        ctx: &TaskContext<'_>,
    ) -> Vec<CommandMessage> {
        self.apply(TaskInput::Notification(notification), ctx)
    }

    /// Apply one input and return the messages to forward to the backend.
    pub fn apply(&mut self, input: TaskInput, ctx: &TaskContext<'_>) -> Vec<CommandMessage> {
        use NotificationKind as N;
        use TaskInput as I;
        use TaskStatus::*;

        let before = self.status();

        let messages = match (before, input) {
            // Terminal states absorb everything, except that a cancelled
            // task may still learn its process exit code.
            (Cancelled, I::Notification(N::Terminated { exit_code })) => {
                self.refine_cancelled_exit(exit_code)
            }
            (Cancelled | Failed | Done, input) => {
                debug!(task = %self.id, status = %before, ?input, "task finished; input ignored");
                Vec::new()
            }

            (Init, I::Dispatch) => self.dispatch(ctx),
            (Running | Stalled | Dumped, I::Dispatch) => {
                self.violation("dispatch of a running task", before)
            }

            (Init, I::Notification(N::Started { pid, started_at })) => {
                self.start(pid, started_at, ctx)
            }
            (Running | Stalled | Dumped, I::Notification(N::Started { .. })) => {
                self.violation("second start notification", before)
            }

            (
                Init,
                I::Notification(
                    N::Progress { .. }
                    | N::Hung { .. }
                    | N::DiagnosticCollected { .. }
                    | N::DiagnosticFailed { .. },
                ),
            ) => self.violation("notification before start", before),

            (Running | Stalled | Dumped, I::Notification(N::Progress { active_at })) => {
                self.progress(active_at, ctx)
            }
            (Running | Stalled | Dumped, I::Notification(N::Hung { elapsed })) => {
                self.escalate(elapsed, ctx)
            }
            (Stalled, I::Notification(N::DiagnosticCollected { artifact })) => {
                self.dump_collected(artifact, ctx)
            }
            (Running, I::Notification(N::DiagnosticCollected { artifact })) => {
                self.journal(ctx, Severity::Info, match artifact {
                    Some(path) => format!(
                        "diagnostic dump collected at {} after activity resumed",
                        path.display()
                    ),
                    None => "diagnostic dump collected after activity resumed".to_string(),
                });
                Vec::new()
            }
            (Dumped, I::Notification(N::DiagnosticCollected { .. })) => {
                self.violation("duplicate diagnostic acknowledgment", before)
            }
            (Running | Stalled | Dumped, I::Notification(N::DiagnosticFailed { reason })) => {
                self.dump_failed(reason, ctx)
            }

            (Init, I::Notification(N::Terminated { exit_code })) => {
                if self.termination.is_some() {
                    self.exited(exit_code, ctx)
                } else {
                    self.violation("exit before start", before)
                }
            }
            (Running | Stalled | Dumped, I::Notification(N::Terminated { exit_code })) => {
                self.exited(exit_code, ctx)
            }

            (Init | Running | Stalled | Dumped, I::Notification(N::BackendFailure { reason })) => {
                self.backend_failed(reason, ctx)
            }

            (Init | Running | Stalled | Dumped, I::Cancel) => {
                self.request_termination(TerminationCause::Cancel, ctx)
            }
            (Init | Running | Stalled | Dumped, I::RunTimeout) => {
                self.request_termination(TerminationCause::Timeout, ctx)
            }
            (Init | Running | Stalled | Dumped, I::TerminationExpired) => {
                self.termination_unconfirmed(ctx)
            }
        };

        let after = self.status();
        if before != after {
            debug!(task = %self.id, from = %before, to = %after, "task status changed");
        }

        messages
    }

    fn dispatch(&mut self, ctx: &TaskContext<'_>) -> Vec<CommandMessage> {
        if self.dispatched_at.is_some() {
            return self.violation("second dispatch", TaskStatus::Init);
        }
        self.dispatched_at = Some(ctx.now);
        self.journal(
            ctx,
            Severity::Info,
            format!("dispatching: {}", self.command_line),
        );
        vec![CommandMessage::Run {
            task: self.id.clone(),
            command_line: self.command_line.clone(),
            working_dir: self.working_dir.clone(),
            progress_pattern: self.progress_pattern.clone(),
        }]
    }

    fn start(&mut self, pid: u32, started_at: Timestamp, ctx: &TaskContext<'_>) -> Vec<CommandMessage> {
        self.state = TaskState::Running;
        self.pid = Some(pid);
        self.start_time = Some(started_at);
        self.last_active_time = Some(started_at);
        self.journal(ctx, Severity::Info, format!("started (pid {pid})"));

        // Cancelled or timed out while the backend was still spawning.
        match self.termination {
            Some(pending) => {
                self.journal(
                    ctx,
                    Severity::Info,
                    format!("terminating process started after {} request", pending.cause),
                );
                vec![CommandMessage::Terminate {
                    task: self.id.clone(),
                    pid,
                }]
            }
            None => Vec::new(),
        }
    }

    fn progress(&mut self, active_at: Timestamp, ctx: &TaskContext<'_>) -> Vec<CommandMessage> {
        if let Some(last) = self.last_active_time {
            if active_at <= last {
                debug!(
                    task = %self.id,
                    active_at = ?active_at,
                    last_active = ?last,
                    "stale progress notification ignored"
                );
                return Vec::new();
            }
        }
        self.last_active_time = Some(active_at);

        if self.hang.reset() {
            self.journal(ctx, Severity::Info, "activity resumed");
        }
        if self.state == TaskState::Stalled {
            self.state = TaskState::Running;
        }
        Vec::new()
    }

    fn escalate(&mut self, elapsed: Duration, ctx: &TaskContext<'_>) -> Vec<CommandMessage> {
        let crossed = self.hang.record(ctx.policy, elapsed);
        if crossed.is_empty() {
            return Vec::new();
        }

        for threshold in &crossed {
            self.journal(
                ctx,
                Severity::Warning,
                format!(
                    "hang threshold {} reached (inactive for {})",
                    format_duration(*threshold),
                    format_duration(elapsed)
                ),
            );
        }

        if self.state == TaskState::Running {
            self.state = TaskState::Stalled;
        }

        if !self.hang.exhausted(ctx.policy) {
            return Vec::new();
        }

        match ctx.policy.action() {
            HangAction::Warn => {
                self.journal(
                    ctx,
                    Severity::Warning,
                    "final hang threshold reached; leaving process running",
                );
                Vec::new()
            }
            HangAction::Dump | HangAction::DumpThenTerminate if !self.dump_requested => {
                self.request_dump(ctx)
            }
            HangAction::Dump => Vec::new(),
            HangAction::DumpThenTerminate | HangAction::Terminate => {
                self.request_termination(TerminationCause::Hang, ctx)
            }
        }
    }

    fn request_dump(&mut self, ctx: &TaskContext<'_>) -> Vec<CommandMessage> {
        let Some(pid) = self.pid else {
            return self.violation("dump requested without a pid", self.status());
        };
        self.dump_requested = true;
        self.journal(ctx, Severity::Warning, "requesting diagnostic dump");
        vec![CommandMessage::CollectDiagnostic {
            task: self.id.clone(),
            pid,
        }]
    }

    fn dump_collected(
        &mut self,
        artifact: Option<PathBuf>,
        ctx: &TaskContext<'_>,
    ) -> Vec<CommandMessage> {
        self.state = TaskState::Dumped;
        let message = match artifact {
            Some(path) => format!("diagnostic dump collected at {}", path.display()),
            None => "diagnostic dump collected".to_string(),
        };
        self.journal(ctx, Severity::Info, message);

        if ctx.policy.action().terminates() {
            self.request_termination(TerminationCause::Hang, ctx)
        } else {
            Vec::new()
        }
    }

    fn dump_failed(&mut self, reason: String, ctx: &TaskContext<'_>) -> Vec<CommandMessage> {
        self.journal(
            ctx,
            Severity::Error,
            format!("diagnostic dump failed: {reason}"),
        );
        if ctx.policy.action().terminates() && self.state == TaskState::Stalled {
            self.request_termination(TerminationCause::Hang, ctx)
        } else {
            Vec::new()
        }
    }

    fn exited(&mut self, exit_code: i32, ctx: &TaskContext<'_>) -> Vec<CommandMessage> {
        let cause = self.termination.take().map(|p| p.cause);
        let (state, severity, message) = match cause {
            Some(TerminationCause::Cancel) => (
                TaskState::Cancelled {
                    process_exit: Some(exit_code),
                },
                Severity::Info,
                format!("cancelled (exit code {exit_code})"),
            ),
            Some(TerminationCause::Hang) => (
                TaskState::Failed {
                    exit_code,
                    reason: FailureReason::KilledAfterHang,
                },
                Severity::Error,
                format!("killed after hang (exit code {exit_code})"),
            ),
            Some(TerminationCause::Timeout) => (
                TaskState::Failed {
                    exit_code,
                    reason: FailureReason::TimedOut,
                },
                Severity::Error,
                format!("terminated on run timeout (exit code {exit_code})"),
            ),
            None if exit_code == 0 => (
                TaskState::Done { exit_code },
                Severity::Info,
                "completed successfully".to_string(),
            ),
            None => (
                TaskState::Failed {
                    exit_code,
                    reason: FailureReason::NonZeroExit,
                },
                Severity::Error,
                format!("exited with code {exit_code}"),
            ),
        };
        self.state = state;
        self.journal(ctx, severity, message);
        Vec::new()
    }

    fn backend_failed(&mut self, reason: String, ctx: &TaskContext<'_>) -> Vec<CommandMessage> {
        let cause = self.termination.take().map(|p| p.cause);
        let started = self.status() != TaskStatus::Init;
        let (state, message) = match cause {
            Some(TerminationCause::Cancel) => (
                TaskState::Cancelled { process_exit: None },
                format!("cancelled ({reason})"),
            ),
            Some(TerminationCause::Timeout) => (
                TaskState::Failed {
                    exit_code: EXIT_CODE_UNAVAILABLE,
                    reason: FailureReason::TimedOut,
                },
                format!("timed out ({reason})"),
            ),
            Some(TerminationCause::Hang) | None if started => (
                TaskState::Failed {
                    exit_code: EXIT_CODE_UNAVAILABLE,
                    reason: FailureReason::Backend(reason.clone()),
                },
                format!("backend failure: {reason}"),
            ),
            Some(TerminationCause::Hang) | None => (
                TaskState::Failed {
                    exit_code: EXIT_CODE_UNAVAILABLE,
                    reason: FailureReason::SpawnFailed(reason.clone()),
                },
                format!("failed to start: {reason}"),
            ),
        };
        let severity = if matches!(state, TaskState::Cancelled { .. }) {
            Severity::Info
        } else {
            Severity::Error
        };
        self.state = state;
        self.journal(ctx, severity, message);
        Vec::new()
    }

    fn request_termination(
        &mut self,
        cause: TerminationCause,
        ctx: &TaskContext<'_>,
    ) -> Vec<CommandMessage> {
        if let Some(pending) = self.termination {
            debug!(
                task = %self.id,
                pending = %pending.cause,
                requested = %cause,
                "termination already requested"
            );
            return Vec::new();
        }

        if self.status() == TaskStatus::Init && self.dispatched_at.is_none() {
            // Never handed to the backend: nothing to wait for.
            let (state, message) = match cause {
                TerminationCause::Cancel => (
                    TaskState::Cancelled { process_exit: None },
                    "cancelled before dispatch",
                ),
                TerminationCause::Timeout | TerminationCause::Hang => (
                    TaskState::Failed {
                        exit_code: EXIT_CODE_UNAVAILABLE,
                        reason: FailureReason::TimedOut,
                    },
                    "run timed out before dispatch",
                ),
            };
            self.state = state;
            self.journal(ctx, Severity::Info, message);
            return Vec::new();
        }

        self.termination = Some(PendingTermination {
            cause,
            requested_at: ctx.now,
        });
        self.journal(
            ctx,
            Severity::Info,
            format!("termination requested ({cause})"),
        );

        match self.pid {
            Some(pid) if self.status().is_live() => vec![CommandMessage::Terminate {
                task: self.id.clone(),
                pid,
            }],
            _ => vec![CommandMessage::Cancel {
                task: self.id.clone(),
            }],
        }
    }

    fn termination_unconfirmed(&mut self, ctx: &TaskContext<'_>) -> Vec<CommandMessage> {
        let Some(pending) = self.termination.take() else {
            debug!(task = %self.id, "termination expiry without a pending request");
            return Vec::new();
        };
        self.state = TaskState::Failed {
            exit_code: EXIT_CODE_UNAVAILABLE,
            reason: FailureReason::TerminationUnconfirmed,
        };
        self.journal(
            ctx,
            Severity::Error,
            format!(
                "process did not confirm termination ({} requested at {})",
                pending.cause,
                format_duration(pending.requested_at)
            ),
        );
        Vec::new()
    }

    fn refine_cancelled_exit(&mut self, exit_code: i32) -> Vec<CommandMessage> {
        if let TaskState::Cancelled { process_exit } = &mut self.state {
            if process_exit.is_none() {
                *process_exit = Some(exit_code);
                debug!(task = %self.id, exit_code, "recorded exit code of cancelled process");
            }
        }
        Vec::new()
    }

    fn violation(&self, what: &str, status: TaskStatus) -> Vec<CommandMessage> {
        warn!(task = %self.id, %status, "protocol violation: {what}; dropped");
        Vec::new()
    }

    fn journal(&self, ctx: &TaskContext<'_>, severity: Severity, message: impl Into<String>) {
        ctx.journal
            .write(JournalEntry::for_task(&self.id, severity, message, ctx.now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::MemoryJournal;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn policy(action: HangAction) -> HangPolicy {
        HangPolicy::new(vec![secs(30), secs(60), secs(120)], action).unwrap()
    }

    fn task() -> Task {
        Task::new(TaskId::new("Set", "Job"), "collect --all", None, None)
    }

    fn apply(
        task: &mut Task,
        input: TaskInput,
        policy: &HangPolicy,
        journal: &MemoryJournal,
        now: u64,
    ) -> Vec<CommandMessage> {
        let ctx = TaskContext {
            policy,
            journal,
            now: secs(now),
        };
        task.apply(input, &ctx)
    }

    fn started(pid: u32, at: u64) -> TaskInput {
        TaskInput::Notification(NotificationKind::Started {
            pid,
            started_at: secs(at),
        })
    }

    fn terminated(exit_code: i32) -> TaskInput {
        TaskInput::Notification(NotificationKind::Terminated { exit_code })
    }

    #[test]
    fn dispatch_emits_run_once() {
        let policy = policy(HangAction::Dump);
        let journal = MemoryJournal::new();
        let mut t = task();

        let msgs = apply(&mut t, TaskInput::Dispatch, &policy, &journal, 0);
        assert!(matches!(msgs.as_slice(), [CommandMessage::Run { command_line, .. }] if command_line == "collect --all"));
        assert!(t.is_active());

        let msgs = apply(&mut t, TaskInput::Dispatch, &policy, &journal, 1);
        assert!(msgs.is_empty());
    }

    #[test]
    fn started_then_zero_exit_is_done() {
        let policy = policy(HangAction::Dump);
        let journal = MemoryJournal::new();
        let mut t = task();

        apply(&mut t, TaskInput::Dispatch, &policy, &journal, 0);
        apply(&mut t, started(42, 1), &policy, &journal, 1);
        assert_eq!(t.status(), TaskStatus::Running);
        assert_eq!(t.pid(), Some(42));
        assert_eq!(t.start_time(), Some(secs(1)));
        assert_eq!(t.last_active_time(), Some(secs(1)));

        apply(&mut t, terminated(0), &policy, &journal, 5);
        assert_eq!(t.status(), TaskStatus::Done);
        assert_eq!(t.exit_code(), Some(0));
    }

    #[test]
    fn non_zero_exit_is_failed_with_code() {
        let policy = policy(HangAction::Dump);
        let journal = MemoryJournal::new();
        let mut t = task();

        apply(&mut t, TaskInput::Dispatch, &policy, &journal, 0);
        apply(&mut t, started(7, 0), &policy, &journal, 0);
        apply(&mut t, terminated(3), &policy, &journal, 2);

        assert_eq!(t.status(), TaskStatus::Failed);
        assert_eq!(t.exit_code(), Some(3));
        assert_eq!(t.failure(), Some(&FailureReason::NonZeroExit));
    }

    #[test]
    fn spawn_failure_goes_straight_to_failed() {
        let policy = policy(HangAction::Dump);
        let journal = MemoryJournal::new();
        let mut t = task();

        apply(&mut t, TaskInput::Dispatch, &policy, &journal, 0);
        apply(
            &mut t,
            TaskInput::Notification(NotificationKind::BackendFailure {
                reason: "no such file".into(),
            }),
            &policy,
            &journal,
            0,
        );

        assert_eq!(t.status(), TaskStatus::Failed);
        assert_eq!(t.pid(), None);
        assert_eq!(
            t.failure(),
            Some(&FailureReason::SpawnFailed("no such file".into()))
        );
    }

    #[test]
    fn stale_progress_is_ignored() {
        let policy = policy(HangAction::Dump);
        let journal = MemoryJournal::new();
        let mut t = task();

        apply(&mut t, TaskInput::Dispatch, &policy, &journal, 0);
        apply(&mut t, started(1, 10), &policy, &journal, 10);
        apply(
            &mut t,
            TaskInput::Notification(NotificationKind::Progress { active_at: secs(20) }),
            &policy,
            &journal,
            20,
        );
        apply(
            &mut t,
            TaskInput::Notification(NotificationKind::Progress { active_at: secs(15) }),
            &policy,
            &journal,
            21,
        );
        apply(
            &mut t,
            TaskInput::Notification(NotificationKind::Progress { active_at: secs(20) }),
            &policy,
            &journal,
            22,
        );

        assert_eq!(t.last_active_time(), Some(secs(20)));
    }

    #[test]
    fn hang_escalation_reports_each_threshold_once_then_dumps() {
        let policy = policy(HangAction::Dump);
        let journal = MemoryJournal::new();
        let mut t = task();

        apply(&mut t, TaskInput::Dispatch, &policy, &journal, 0);
        apply(&mut t, started(9, 0), &policy, &journal, 0);
        journal.clear();

        let msgs = apply(
            &mut t,
            TaskInput::Notification(NotificationKind::Hung { elapsed: secs(125) }),
            &policy,
            &journal,
            125,
        );
        assert_eq!(
            msgs,
            vec![CommandMessage::CollectDiagnostic {
                task: t.id().clone(),
                pid: 9
            }]
        );
        assert_eq!(t.status(), TaskStatus::Stalled);

        let warnings: Vec<_> = journal
            .with_severity(t.id(), Severity::Warning)
            .into_iter()
            .filter(|e| e.message.starts_with("hang threshold"))
            .map(|e| e.message)
            .collect();
        assert_eq!(
            warnings,
            vec![
                "hang threshold 30s reached (inactive for 125s)",
                "hang threshold 60s reached (inactive for 125s)",
                "hang threshold 120s reached (inactive for 125s)",
            ]
        );

        // Repeating the same report does nothing.
        let msgs = apply(
            &mut t,
            TaskInput::Notification(NotificationKind::Hung { elapsed: secs(130) }),
            &policy,
            &journal,
            130,
        );
        assert!(msgs.is_empty());

        apply(
            &mut t,
            TaskInput::Notification(NotificationKind::DiagnosticCollected { artifact: None }),
            &policy,
            &journal,
            131,
        );
        assert_eq!(t.status(), TaskStatus::Dumped);

        // Dumped is informational under `Dump`: the process may still finish.
        apply(&mut t, terminated(0), &policy, &journal, 200);
        assert_eq!(t.status(), TaskStatus::Done);
    }

    #[test]
    fn dump_then_terminate_kills_after_dump() {
        let policy = policy(HangAction::DumpThenTerminate);
        let journal = MemoryJournal::new();
        let mut t = task();

        apply(&mut t, TaskInput::Dispatch, &policy, &journal, 0);
        apply(&mut t, started(5, 0), &policy, &journal, 0);
        apply(
            &mut t,
            TaskInput::Notification(NotificationKind::Hung { elapsed: secs(121) }),
            &policy,
            &journal,
            121,
        );
        let msgs = apply(
            &mut t,
            TaskInput::Notification(NotificationKind::DiagnosticCollected { artifact: None }),
            &policy,
            &journal,
            122,
        );
        assert_eq!(
            msgs,
            vec![CommandMessage::Terminate {
                task: t.id().clone(),
                pid: 5
            }]
        );

        apply(&mut t, terminated(137), &policy, &journal, 123);
        assert_eq!(t.status(), TaskStatus::Failed);
        assert_eq!(t.exit_code(), Some(137));
        assert_eq!(t.failure(), Some(&FailureReason::KilledAfterHang));
    }

    #[test]
    fn progress_ends_stall_episode() {
        let policy = policy(HangAction::Warn);
        let journal = MemoryJournal::new();
        let mut t = task();

        apply(&mut t, TaskInput::Dispatch, &policy, &journal, 0);
        apply(&mut t, started(5, 0), &policy, &journal, 0);
        apply(
            &mut t,
            TaskInput::Notification(NotificationKind::Hung { elapsed: secs(31) }),
            &policy,
            &journal,
            31,
        );
        assert_eq!(t.status(), TaskStatus::Stalled);
        assert_eq!(t.last_reported_hang(), 1);

        apply(
            &mut t,
            TaskInput::Notification(NotificationKind::Progress { active_at: secs(32) }),
            &policy,
            &journal,
            32,
        );
        assert_eq!(t.status(), TaskStatus::Running);
        assert_eq!(t.last_reported_hang(), 0);
        assert_eq!(t.most_severe_hang(), Some(secs(31)));
    }

    #[test]
    fn cancel_before_dispatch_is_immediate() {
        let policy = policy(HangAction::Dump);
        let journal = MemoryJournal::new();
        let mut t = task();

        let msgs = apply(&mut t, TaskInput::Cancel, &policy, &journal, 0);
        assert!(msgs.is_empty());
        assert_eq!(t.status(), TaskStatus::Cancelled);
        assert_eq!(t.exit_code(), None);
    }

    #[test]
    fn cancel_of_running_task_waits_for_confirmation() {
        let policy = policy(HangAction::Dump);
        let journal = MemoryJournal::new();
        let mut t = task();

        apply(&mut t, TaskInput::Dispatch, &policy, &journal, 0);
        apply(&mut t, started(11, 0), &policy, &journal, 0);
        let msgs = apply(&mut t, TaskInput::Cancel, &policy, &journal, 3);
        assert_eq!(
            msgs,
            vec![CommandMessage::Terminate {
                task: t.id().clone(),
                pid: 11
            }]
        );
        assert_eq!(t.status(), TaskStatus::Running);

        // A second cancel is a no-op.
        assert!(apply(&mut t, TaskInput::Cancel, &policy, &journal, 4).is_empty());

        apply(&mut t, terminated(143), &policy, &journal, 5);
        assert_eq!(t.status(), TaskStatus::Cancelled);
        assert_eq!(t.exit_code(), None);
        assert_eq!(
            t.state(),
            &TaskState::Cancelled {
                process_exit: Some(143)
            }
        );
    }

    #[test]
    fn cancel_of_dispatched_task_sends_cancel_then_terminates_late_start() {
        let policy = policy(HangAction::Dump);
        let journal = MemoryJournal::new();
        let mut t = task();

        apply(&mut t, TaskInput::Dispatch, &policy, &journal, 0);
        let msgs = apply(&mut t, TaskInput::Cancel, &policy, &journal, 1);
        assert_eq!(msgs, vec![CommandMessage::Cancel { task: t.id().clone() }]);

        let msgs = apply(&mut t, started(77, 2), &policy, &journal, 2);
        assert_eq!(
            msgs,
            vec![CommandMessage::Terminate {
                task: t.id().clone(),
                pid: 77
            }]
        );
        apply(&mut t, terminated(1), &policy, &journal, 3);
        assert_eq!(t.status(), TaskStatus::Cancelled);
    }

    #[test]
    fn unconfirmed_termination_fails_with_marker() {
        let policy = policy(HangAction::Dump);
        let journal = MemoryJournal::new();
        let mut t = task();

        apply(&mut t, TaskInput::Dispatch, &policy, &journal, 0);
        apply(&mut t, started(11, 0), &policy, &journal, 0);
        apply(&mut t, TaskInput::Cancel, &policy, &journal, 10);
        assert!(!t.termination_expired(secs(14), secs(5)));
        assert!(t.termination_expired(secs(15), secs(5)));

        apply(&mut t, TaskInput::TerminationExpired, &policy, &journal, 15);
        assert_eq!(t.status(), TaskStatus::Failed);
        assert_eq!(t.exit_code(), Some(EXIT_CODE_UNAVAILABLE));
        assert_eq!(t.failure(), Some(&FailureReason::TerminationUnconfirmed));
    }

    #[test]
    fn terminal_state_ignores_further_notifications() {
        let policy = policy(HangAction::Dump);
        let journal = MemoryJournal::new();
        let mut t = task();

        apply(&mut t, TaskInput::Dispatch, &policy, &journal, 0);
        apply(&mut t, started(3, 0), &policy, &journal, 0);
        apply(&mut t, terminated(0), &policy, &journal, 1);

        for input in [
            terminated(9),
            started(4, 2),
            TaskInput::Notification(NotificationKind::BackendFailure { reason: "x".into() }),
            TaskInput::Cancel,
            TaskInput::TerminationExpired,
        ] {
            assert!(apply(&mut t, input, &policy, &journal, 3).is_empty());
            assert_eq!(t.status(), TaskStatus::Done);
            assert_eq!(t.exit_code(), Some(0));
        }
    }

    #[test]
    fn hang_due_follows_next_threshold() {
        let policy = policy(HangAction::Dump);
        let journal = MemoryJournal::new();
        let mut t = task();

        assert_eq!(t.hang_due(secs(100), &policy), None);
        apply(&mut t, TaskInput::Dispatch, &policy, &journal, 0);
        apply(&mut t, started(3, 0), &policy, &journal, 0);

        assert_eq!(t.hang_due(secs(29), &policy), None);
        assert_eq!(t.hang_due(secs(30), &policy), Some(secs(30)));
        apply(
            &mut t,
            TaskInput::Notification(NotificationKind::Hung { elapsed: secs(30) }),
            &policy,
            &journal,
            30,
        );
        assert_eq!(t.hang_due(secs(59), &policy), None);
        assert_eq!(t.hang_due(secs(61), &policy), Some(secs(61)));
    }
}
