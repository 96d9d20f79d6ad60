// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::{RunOptions, TaskSpec};
use crate::exec::BackendSettings;
use crate::task::HangPolicy;
use crate::types::HangAction;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [config]
/// concurrency = 2
/// overall_timeout = "30m"
///
/// [hang]
/// thresholds = ["30s", "60s", "120s"]
/// action = "dump"
///
/// [[command_set]]
/// id = "Memory"
///
/// [[command_set.command]]
/// id = "ProcessList"
/// cmd = "ps aux"
/// ```
///
/// All sections except the command sets are optional and have reasonable
/// defaults. Command sets and their commands keep their file order, which is
/// the dispatch order.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    /// Run-wide behaviour from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// Stall escalation ladder from `[hang]`.
    #[serde(default)]
    pub hang: HangSection,

    /// Process backend knobs from `[backend]`.
    #[serde(default)]
    pub backend: BackendSection,

    /// All `[[command_set]]` tables, in file order.
    #[serde(default, rename = "command_set")]
    pub command_sets: Vec<CommandSetConfig>,
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Maximum number of jobs running at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// How often the liveness sweep runs.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: String,

    /// How long a kill may stay unconfirmed before the job is failed.
    #[serde(default = "default_termination_grace")]
    pub termination_grace: String,

    /// Deadline for the whole run. No deadline when absent.
    #[serde(default)]
    pub overall_timeout: Option<String>,

    /// Append the run journal to this file, in addition to the log output.
    #[serde(default)]
    pub journal: Option<PathBuf>,
}

fn default_concurrency() -> usize {
    1
}

fn default_sweep_interval() -> String {
    "1s".to_string()
}

fn default_termination_grace() -> String {
    "10s".to_string()
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            sweep_interval: default_sweep_interval(),
            termination_grace: default_termination_grace(),
            overall_timeout: None,
            journal: None,
        }
    }
}

/// `[hang]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct HangSection {
    /// Inactivity durations at which a warning is journaled, ascending.
    #[serde(default = "default_thresholds")]
    pub thresholds: Vec<String>,

    /// What to do at the last threshold.
    #[serde(default)]
    pub action: HangAction,
}

fn default_thresholds() -> Vec<String> {
    vec!["30s".to_string(), "60s".to_string(), "120s".to_string()]
}

impl Default for HangSection {
    fn default() -> Self {
        Self {
            thresholds: default_thresholds(),
            action: HangAction::default(),
        }
    }
}

/// `[backend]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendSection {
    /// Minimum spacing between two progress reports of one job.
    #[serde(default = "default_progress_interval")]
    pub progress_interval: String,

    /// CPU-time sampling period (Linux only). Disabled when absent.
    #[serde(default)]
    pub cpu_poll_interval: Option<String>,

    /// Dump command template with `{pid}`, `{task}` and `{dir}` placeholders.
    #[serde(default)]
    pub diagnostic_cmd: Option<String>,

    /// Where dump artifacts are written.
    #[serde(default = "default_diagnostic_dir")]
    pub diagnostic_dir: PathBuf,

    /// Upper bound for a single dump command.
    #[serde(default = "default_diagnostic_timeout")]
    pub diagnostic_timeout: String,
}

fn default_progress_interval() -> String {
    "1s".to_string()
}

fn default_diagnostic_dir() -> PathBuf {
    PathBuf::from("diagnostics")
}

fn default_diagnostic_timeout() -> String {
    "60s".to_string()
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            progress_interval: default_progress_interval(),
            cpu_poll_interval: None,
            diagnostic_cmd: None,
            diagnostic_dir: default_diagnostic_dir(),
            diagnostic_timeout: default_diagnostic_timeout(),
        }
    }
}

/// `[[command_set]]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandSetConfig {
    pub id: String,

    /// Default working directory of the set's commands.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// `[[command_set.command]]` entries, in file order.
    #[serde(default, rename = "command")]
    pub commands: Vec<CommandConfig>,
}

/// `[[command_set.command]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandConfig {
    pub id: String,

    /// Shell command line.
    pub cmd: String,

    /// Overrides the set's working directory.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Regex selecting which output lines count as activity. Every line
    /// counts when absent.
    #[serde(default)]
    pub progress_on_output: Option<String>,
}

/// Validated `[config]` values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    pub concurrency: usize,
    pub sweep_interval: Duration,
    pub termination_grace: Duration,
    pub overall_timeout: Option<Duration>,
    pub journal: Option<PathBuf>,
}

/// Validated configuration.
///
/// Only produced through `TryFrom<RawConfigFile>` (see `validate.rs`).
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: RunSettings,
    pub hang: HangPolicy,
    pub backend: BackendSettings,
    pub command_sets: Vec<CommandSetConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        config: RunSettings,
        hang: HangPolicy,
        backend: BackendSettings,
        command_sets: Vec<CommandSetConfig>,
    ) -> Self {
        Self {
            config,
            hang,
            backend,
            command_sets,
        }
    }

    /// Every configured job, in file order.
    ///
    /// A command without its own `working_dir` inherits the set's one.
    pub fn task_specs(&self) -> Vec<TaskSpec> {
        self.command_sets
            .iter()
            .flat_map(|set| {
                set.commands.iter().map(move |command| {
                    let mut spec = TaskSpec::new(&set.id, &command.id, &command.cmd);
                    if let Some(dir) = command.working_dir.as_ref().or(set.working_dir.as_ref()) {
                        spec = spec.with_working_dir(dir);
                    }
                    if let Some(pattern) = &command.progress_on_output {
                        spec = spec.with_progress_pattern(pattern);
                    }
                    spec
                })
            })
            .collect()
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            concurrency: self.config.concurrency,
            hang: self.hang.clone(),
            termination_grace: self.config.termination_grace,
            overall_timeout: self.config.overall_timeout,
        }
    }

    pub fn backend_settings(&self) -> BackendSettings {
        self.backend.clone()
    }

    pub fn command_count(&self) -> usize {
        self.command_sets.iter().map(|s| s.commands.len()).sum()
    }
}
