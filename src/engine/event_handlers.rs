// src/engine/event_handlers.rs

//! Event handling logic for the orchestrator core.
//!
//! Every handler mutates tasks only through `Task::apply` and returns the
//! messages the tasks produced, in the order they were produced.

use tracing::{debug, warn};

use crate::engine::RunOptions;
use crate::engine::table::TaskTable;
use crate::journal::Journal;
use crate::protocol::{CommandMessage, CommandNotification, NotificationKind, Timestamp};
use crate::task::{TaskContext, TaskInput};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreCommand {
    /// Forward these messages to the execution backend.
    Dispatch(Vec<CommandMessage>),
    /// Every task is terminal; the run is over.
    RequestExit,
}

/// Decision returned by the core after handling a single event or tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    pub fn new(messages: Vec<CommandMessage>, keep_running: bool) -> Self {
        let mut commands = Vec::new();
        if !messages.is_empty() {
            commands.push(CoreCommand::Dispatch(messages));
        }
        if !keep_running {
            commands.push(CoreCommand::RequestExit);
        }
        Self {
            commands,
            keep_running,
        }
    }

    /// All messages of the step, flattened.
    pub fn messages(&self) -> Vec<&CommandMessage> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                CoreCommand::Dispatch(msgs) => Some(msgs.iter()),
                CoreCommand::RequestExit => None,
            })
            .flatten()
            .collect()
    }
}

fn context<'a>(options: &'a RunOptions, journal: &'a dyn Journal, now: Timestamp) -> TaskContext<'a> {
    TaskContext {
        policy: &options.hang,
        journal,
        now,
    }
}

/// Route a backend notification to its task.
///
/// Notifications for unknown tasks and stale or out-of-order sequence numbers
/// are logged and dropped.
pub fn handle_notification(
    table: &mut TaskTable,
    options: &RunOptions,
    journal: &dyn Journal,
    notification: CommandNotification,
    now: Timestamp,
) -> Vec<CommandMessage> {
    let CommandNotification { task, seq, kind } = notification;

    let Some(index) = table.position(&task) else {
        warn!(task = %task, seq, kind = kind.name(), "notification for unknown task; dropped");
        return Vec::new();
    };

    if let Err(last) = table.accept_seq(index, seq) {
        warn!(
            task = %task,
            seq,
            last_seq = last,
            kind = kind.name(),
            "stale or out-of-order notification; dropped"
        );
        return Vec::new();
    }

    debug!(task = %task, seq, kind = kind.name(), "applying notification");
    let ctx = context(options, journal, now);
    table.at_mut(index).apply_notification(kind, &ctx)
}

/// Request cancellation of every task that is not terminal yet.
pub fn handle_cancel(
    table: &mut TaskTable,
    options: &RunOptions,
    journal: &dyn Journal,
    now: Timestamp,
) -> Vec<CommandMessage> {
    broadcast(table, options, journal, now, TaskInput::Cancel)
}

/// Apply the run timeout to every task that is not terminal yet.
pub fn handle_run_timeout(
    table: &mut TaskTable,
    options: &RunOptions,
    journal: &dyn Journal,
    now: Timestamp,
) -> Vec<CommandMessage> {
    broadcast(table, options, journal, now, TaskInput::RunTimeout)
}

fn broadcast(
    table: &mut TaskTable,
    options: &RunOptions,
    journal: &dyn Journal,
    now: Timestamp,
    input: TaskInput,
) -> Vec<CommandMessage> {
    let ctx = context(options, journal, now);
    let mut messages = Vec::new();
    for task in table.iter_mut().filter(|t| !t.is_terminal()) {
        messages.extend(task.apply(input.clone(), &ctx));
    }
    messages
}

/// Liveness sweep.
///
/// - Tasks whose next hang threshold is due receive a synthesised
///   `Hung(elapsed)` notification.
/// - Tasks whose termination request outlived the grace period are
///   force-finalised.
pub fn run_sweep(
    table: &mut TaskTable,
    options: &RunOptions,
    journal: &dyn Journal,
    now: Timestamp,
) -> Vec<CommandMessage> {
    let ctx = context(options, journal, now);
    let mut messages = Vec::new();

    for task in table.iter_mut() {
        if task.termination_expired(now, options.termination_grace) {
            messages.extend(task.apply(TaskInput::TerminationExpired, &ctx));
            continue;
        }
        if let Some(elapsed) = task.hang_due(now, &options.hang) {
            debug!(task = %task.id(), ?elapsed, "hang threshold due");
            messages.extend(task.apply_notification(NotificationKind::Hung { elapsed }, &ctx));
        }
    }

    messages
}

/// Dispatch waiting tasks, in configuration order, while slots are free.
pub fn fill_slots(
    table: &mut TaskTable,
    options: &RunOptions,
    journal: &dyn Journal,
    now: Timestamp,
) -> Vec<CommandMessage> {
    let ctx = context(options, journal, now);
    let mut messages = Vec::new();

    while table.active_count() < options.concurrency {
        let Some(index) = table.next_waiting() else {
            break;
        };
        let task = table.at_mut(index);
        debug!(task = %task.id(), "slot free; dispatching");
        messages.extend(task.apply(TaskInput::Dispatch, &ctx));
    }

    messages
}
