// src/exec/task_runner.rs

//! Individual job process runner.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::protocol::{NotificationKind, TaskId};
use crate::task::EXIT_CODE_UNAVAILABLE;

use super::BackendSettings;
use super::notifier::Notifier;
use super::telemetry::{compile_progress_pattern, spawn_cpu_sampler, spawn_output_monitor};

/// Everything needed to start one job, taken from `CommandMessage::Run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub task: TaskId,
    pub command_line: String,
    pub working_dir: Option<PathBuf>,
    pub progress_pattern: Option<String>,
}

/// Build a shell command appropriate for the platform.
pub fn shell_command(command_line: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command_line);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command_line);
        c
    }
}

/// Run a single job process and report its lifecycle on `notifier`.
///
/// - `Started` once the process exists, `Terminated` once it is gone, also
///   after a kill requested through `cancel_rx`.
/// - Any error before `Started` (bad working directory, missing shell) is
///   reported as `BackendFailure`, as is a failure to wait on the process.
pub async fn run_task(
    request: RunRequest,
    notifier: Arc<Notifier>,
    settings: Arc<BackendSettings>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let task = request.task.clone();

    if cancel_rx.try_recv().is_ok() {
        info!(task = %task, "job withdrawn before its process was spawned");
        report_failure(&notifier, "withdrawn before start".to_string()).await;
        return;
    }

    if let Err(err) = run_task_inner(request, &notifier, &settings, cancel_rx).await {
        error!(task = %task, error = %err, "job execution error");
        report_failure(&notifier, format!("{err:#}")).await;
    }
}

async fn report_failure(notifier: &Notifier, reason: String) {
    if let Err(err) = notifier
        .send(NotificationKind::BackendFailure { reason })
        .await
    {
        debug!(task = %notifier.task(), error = %err, "backend failure not delivered");
    }
}

async fn run_task_inner(
    request: RunRequest,
    notifier: &Arc<Notifier>,
    settings: &BackendSettings,
    mut cancel_rx: oneshot::Receiver<()>,
) -> Result<()> {
    let task = &request.task;
    info!(
        task = %task,
        cmd = %request.command_line,
        "starting job process"
    );

    let mut cmd = shell_command(&request.command_line);
    if let Some(dir) = &request.working_dir {
        cmd.current_dir(dir);
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for job '{task}'"))?;
    let pid = child
        .id()
        .with_context(|| format!("process of job '{task}' exited before reporting a pid"))?;

    notifier
        .send(NotificationKind::Started {
            pid,
            started_at: notifier.now(),
        })
        .await
        .with_context(|| format!("sending Started for job '{task}'"))?;

    let pattern = compile_progress_pattern(notifier, request.progress_pattern.as_deref());
    let mut monitors: Vec<JoinHandle<()>> = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        monitors.push(spawn_output_monitor("stdout", stdout, pattern.clone(), notifier.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        monitors.push(spawn_output_monitor("stderr", stderr, pattern, notifier.clone()));
    }
    let sampler = settings
        .cpu_poll_interval
        .and_then(|interval| spawn_cpu_sampler(pid, interval, notifier.clone()));

    // Either the process exits on its own, or we are asked to stop it.
    let status = tokio::select! {
        status = child.wait() => {
            status.with_context(|| format!("waiting for process of job '{task}'"))?
        }

        cancel = &mut cancel_rx => {
            match cancel {
                Ok(()) => info!(task = %task, pid, "termination requested; killing process"),
                Err(_) => debug!(task = %task, pid, "executor loop gone; killing process"),
            }
            if let Err(e) = child.kill().await {
                warn!(task = %task, pid, error = %e, "failed to kill child process");
            }
            // Descendants may keep the pipes open after the shell died.
            for monitor in &monitors {
                monitor.abort();
            }
            child
                .wait()
                .await
                .with_context(|| format!("waiting for killed process of job '{task}'"))?
        }
    };

    if let Some(sampler) = sampler {
        sampler.abort();
    }

    let exit_code = status.code().unwrap_or(EXIT_CODE_UNAVAILABLE);
    info!(
        task = %task,
        pid,
        exit_code,
        success = status.success(),
        "job process exited"
    );

    notifier
        .send(NotificationKind::Terminated { exit_code })
        .await
        .with_context(|| format!("sending Terminated for job '{task}'"))?;

    Ok(())
}
