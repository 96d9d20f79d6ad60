// src/exec/diagnostic.rs

//! Diagnostic dumps of stalled processes.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::protocol::{NotificationKind, TaskId};

use super::BackendSettings;
use super::notifier::Notifier;
use super::task_runner::shell_command;

/// File-name friendly form of a task id: `set/command` becomes `set_command`
/// with anything outside `[A-Za-z0-9._-]` replaced by `_`.
pub fn task_slug(task: &TaskId) -> String {
    format!("{}_{}", task.command_set, task.command)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Substitute `{pid}`, `{task}` and `{dir}` in a dump command template.
pub fn render_template(template: &str, pid: u32, task: &TaskId, dir: &Path) -> String {
    template
        .replace("{pid}", &pid.to_string())
        .replace("{task}", &task_slug(task))
        .replace("{dir}", &dir.display().to_string())
}

/// Run the dump command for `pid` and report the result on `notifier`.
///
/// The command's standard output is stored as the artifact
/// `<diagnostic_dir>/<task>-<pid>.dump`.
pub async fn collect(pid: u32, settings: Arc<BackendSettings>, notifier: Arc<Notifier>) {
    let kind = match collect_inner(pid, &settings, notifier.task()).await {
        Ok(artifact) => {
            info!(task = %notifier.task(), pid, artifact = %artifact.display(), "diagnostic dump written");
            NotificationKind::DiagnosticCollected {
                artifact: Some(artifact),
            }
        }
        Err(err) => {
            warn!(task = %notifier.task(), pid, error = %err, "diagnostic dump failed");
            NotificationKind::DiagnosticFailed {
                reason: format!("{err:#}"),
            }
        }
    };

    if let Err(err) = notifier.send(kind).await {
        warn!(task = %notifier.task(), error = %err, "diagnostic result not delivered");
    }
}

async fn collect_inner(pid: u32, settings: &BackendSettings, task: &TaskId) -> Result<PathBuf> {
    let Some(template) = settings.diagnostic_cmd.as_deref() else {
        bail!("no diagnostic command configured");
    };

    let dir = &settings.diagnostic_dir;
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating diagnostic directory {}", dir.display()))?;

    let command_line = render_template(template, pid, task, dir);
    info!(task = %task, pid, cmd = %command_line, "collecting diagnostic dump");

    let mut cmd = shell_command(&command_line);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd
        .spawn()
        .with_context(|| format!("spawning diagnostic command '{command_line}'"))?;

    let output = tokio::time::timeout(settings.diagnostic_timeout, child.wait_with_output())
        .await
        .with_context(|| {
            format!(
                "diagnostic command did not finish within {:?}",
                settings.diagnostic_timeout
            )
        })?
        .context("waiting for diagnostic command")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "diagnostic command exited with code {}: {}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        );
    }

    let artifact = dir.join(format!("{}-{pid}.dump", task_slug(task)));
    let mut file = tokio::fs::File::create(&artifact)
        .await
        .with_context(|| format!("creating {}", artifact.display()))?;
    file.write_all(&output.stdout)
        .await
        .with_context(|| format!("writing {}", artifact.display()))?;
    file.flush().await?;

    Ok(artifact)
}
