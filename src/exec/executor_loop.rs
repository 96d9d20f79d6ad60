// src/exec/executor_loop.rs

//! Main executor loop that manages job processes.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::engine::RuntimeEvent;
use crate::protocol::{CommandMessage, RunClock, TaskId};

use super::BackendSettings;
use super::diagnostic;
use super::notifier::Notifier;
use super::task_runner::{RunRequest, run_task};

/// Internal handle for a job whose process was requested.
///
/// - `cancel` stops the process; it is consumed by the first `Cancel` or
///   `Terminate` for the job.
/// - `handle` is the Tokio task that is actually running the command.
/// - `notifier` is shared with dump jobs so they continue the job's sequence.
struct ActiveProcess {
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
    notifier: Arc<Notifier>,
}

/// Spawn the background executor loop.
///
/// The returned `mpsc::Sender<CommandMessage>` is what `ProcessBackend`
/// forwards into. Each job runs in its own Tokio task, and **per task id there
/// is never more than one process**: a second `Run` for the same job is
/// ignored.
pub fn spawn_executor(
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    clock: RunClock,
    settings: Arc<BackendSettings>,
) -> mpsc::Sender<CommandMessage> {
    let (tx, mut rx) = mpsc::channel::<CommandMessage>(64);

    tokio::spawn(async move {
        info!("executor loop started");

        let mut active: HashMap<TaskId, ActiveProcess> = HashMap::new();

        while let Some(message) = rx.recv().await {
            handle_message(message, &mut active, &runtime_tx, clock, &settings);
        }

        info!("executor loop finished (channel closed)");
    });

    tx
}

fn handle_message(
    message: CommandMessage,
    active: &mut HashMap<TaskId, ActiveProcess>,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
    clock: RunClock,
    settings: &Arc<BackendSettings>,
) {
    match message {
        CommandMessage::Run {
            task,
            command_line,
            working_dir,
            progress_pattern,
        } => {
            if active.contains_key(&task) {
                warn!(task = %task, "job already has a process; ignoring second run request");
                return;
            }
            let request = RunRequest {
                task,
                command_line,
                working_dir,
                progress_pattern,
            };
            start_process(request, active, runtime_tx, clock, settings);
        }
        CommandMessage::Cancel { task } => stop_process(&task, None, active),
        CommandMessage::Terminate { task, pid } => stop_process(&task, Some(pid), active),
        CommandMessage::CollectDiagnostic { task, pid } => {
            let Some(process) = active.get(&task) else {
                warn!(task = %task, pid, "dump requested for unknown job; ignoring");
                return;
            };
            if process.handle.is_finished() {
                debug!(task = %task, pid, "dump requested after process exit; ignoring");
                return;
            }
            tokio::spawn(diagnostic::collect(
                pid,
                settings.clone(),
                process.notifier.clone(),
            ));
        }
    }
}

fn start_process(
    request: RunRequest,
    active: &mut HashMap<TaskId, ActiveProcess>,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
    clock: RunClock,
    settings: &Arc<BackendSettings>,
) {
    let task = request.task.clone();
    let notifier = Arc::new(Notifier::new(
        task.clone(),
        runtime_tx.clone(),
        clock,
        settings.progress_interval,
    ));

    // Create a fresh cancel channel and spawn the process runner.
    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let runner_notifier = notifier.clone();
    let runner_settings = settings.clone();
    let spawn_task = task.clone();

    let handle = tokio::spawn(async move {
        run_task(request, runner_notifier, runner_settings, cancel_rx).await;
        debug!(task = %spawn_task, "job runner future finished");
    });

    active.insert(
        task,
        ActiveProcess {
            cancel: Some(cancel_tx),
            handle,
            notifier,
        },
    );
}

/// Ask the runner of `task` to stop its process.
fn stop_process(task: &TaskId, pid: Option<u32>, active: &mut HashMap<TaskId, ActiveProcess>) {
    let Some(process) = active.get_mut(task) else {
        debug!(task = %task, ?pid, "stop requested for a job without process; ignoring");
        return;
    };

    info!(task = %task, ?pid, "stopping job process");
    match process.cancel.take() {
        Some(cancel) => {
            if cancel.send(()).is_err() {
                debug!(task = %task, ?pid, "process already finished while stopping");
            }
        }
        None => {
            debug!(task = %task, ?pid, "stop already requested for this job");
        }
    }
}
