// src/exec/mod.rs

//! Process execution layer.
//!
//! This module is responsible for actually running the collection jobs, using
//! `tokio::process::Command`, and reporting back to the orchestrator via
//! `RuntimeEvent::Notification`s.
//!
//! - [`backend`] provides the `ExecutionBackend` trait and the production
//!   `ProcessBackend`; tests replace it with a fake implementation.
//! - [`executor_loop`] owns the loop that receives `CommandMessage`s and
//!   manages one process per task.
//! - [`task_runner`] spawns and supervises a single process.
//! - [`notifier`] stamps per-task sequence numbers and throttles progress.
//! - [`telemetry`] watches output lines and CPU time for signs of activity.
//! - [`diagnostic`] runs the configured dump command for a stalled process.

use std::path::PathBuf;
use std::time::Duration;

pub mod backend;
pub mod diagnostic;
pub mod executor_loop;
pub mod notifier;
pub mod task_runner;
pub mod telemetry;

pub use backend::{ExecutionBackend, ProcessBackend};
pub use executor_loop::spawn_executor;
pub use notifier::Notifier;

/// Knobs of the process backend, from the `[backend]` config table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSettings {
    /// Minimum spacing between two `Progress` notifications of one task.
    pub progress_interval: Duration,
    /// Sample CPU time this often (Linux only). `None` disables sampling.
    pub cpu_poll_interval: Option<Duration>,
    /// Dump command template; `{pid}`, `{task}` and `{dir}` are substituted.
    pub diagnostic_cmd: Option<String>,
    /// Where dump artifacts are written.
    pub diagnostic_dir: PathBuf,
    /// Upper bound for a single dump command.
    pub diagnostic_timeout: Duration,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            progress_interval: Duration::from_secs(1),
            cpu_poll_interval: None,
            diagnostic_cmd: None,
            diagnostic_dir: PathBuf::from("diagnostics"),
            diagnostic_timeout: Duration::from_secs(60),
        }
    }
}
