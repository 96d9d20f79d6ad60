// src/config/validate.rs

use std::collections::HashSet;
use std::time::Duration;

use regex::Regex;

use crate::config::duration::parse_duration;
use crate::config::model::{
    BackendSection, CommandSetConfig, ConfigFile, ConfigSection, HangSection, RawConfigFile,
    RunSettings,
};
use crate::errors::{Result, WardenError};
use crate::exec::BackendSettings;
use crate::protocol::format_duration;
use crate::task::HangPolicy;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = WardenError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_commands(&raw.command_sets)?;
        validate_ids(&raw.command_sets)?;
        validate_patterns(&raw.command_sets)?;
        let config = validate_run_settings(&raw.config)?;
        let hang = validate_hang(&raw.hang)?;
        let backend = validate_backend(raw.backend)?;
        check_progress_throttle(&hang, &backend)?;
        Ok(ConfigFile::new_unchecked(config, hang, backend, raw.command_sets))
    }
}

impl ConfigFile {
    /// Keep only the listed command sets, in their file order.
    pub fn retain_sets(&mut self, only: &[String]) -> Result<()> {
        if only.is_empty() {
            return Ok(());
        }
        for wanted in only {
            if !self.command_sets.iter().any(|s| &s.id == wanted) {
                return Err(WardenError::ConfigError(format!(
                    "unknown command set '{wanted}'"
                )));
            }
        }
        self.command_sets.retain(|s| only.contains(&s.id));
        ensure_has_commands(&self.command_sets)
    }

    pub fn set_concurrency(&mut self, concurrency: usize) -> Result<()> {
        self.config.concurrency = check_concurrency(concurrency)?;
        Ok(())
    }
}

fn ensure_has_commands(sets: &[CommandSetConfig]) -> Result<()> {
    if sets.iter().all(|s| s.commands.is_empty()) {
        return Err(WardenError::ConfigError(
            "config must contain at least one [[command_set.command]] entry".to_string(),
        ));
    }
    Ok(())
}

fn validate_ids(sets: &[CommandSetConfig]) -> Result<()> {
    let mut set_ids = HashSet::new();
    for set in sets {
        if set.id.trim().is_empty() {
            return Err(WardenError::ConfigError(
                "command set id must not be empty".to_string(),
            ));
        }
        if !set_ids.insert(set.id.as_str()) {
            return Err(WardenError::ConfigError(format!(
                "duplicate command set id '{}'",
                set.id
            )));
        }

        let mut command_ids = HashSet::new();
        for command in &set.commands {
            if command.id.trim().is_empty() {
                return Err(WardenError::ConfigError(format!(
                    "command in set '{}' has an empty id",
                    set.id
                )));
            }
            if !command_ids.insert(command.id.as_str()) {
                return Err(WardenError::ConfigError(format!(
                    "duplicate command id '{}' in set '{}'",
                    command.id, set.id
                )));
            }
            if command.cmd.trim().is_empty() {
                return Err(WardenError::ConfigError(format!(
                    "command '{}/{}' has an empty cmd",
                    set.id, command.id
                )));
            }
        }
    }
    Ok(())
}

fn validate_patterns(sets: &[CommandSetConfig]) -> Result<()> {
    for set in sets {
        for command in &set.commands {
            if let Some(pattern) = &command.progress_on_output {
                Regex::new(pattern).map_err(|e| {
                    WardenError::ConfigError(format!(
                        "command '{}/{}' has an invalid progress_on_output regex: {e}",
                        set.id, command.id
                    ))
                })?;
            }
        }
    }
    Ok(())
}

fn check_concurrency(concurrency: usize) -> Result<usize> {
    if concurrency == 0 {
        return Err(WardenError::ConfigError(
            "[config].concurrency must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(concurrency)
}

fn duration_field(field: &str, value: &str) -> Result<Duration> {
    parse_duration(value)
        .map_err(|e| WardenError::ConfigError(format!("{field}: {e}")))
}

fn positive_duration_field(field: &str, value: &str) -> Result<Duration> {
    let duration = duration_field(field, value)?;
    if duration.is_zero() {
        return Err(WardenError::ConfigError(format!(
            "{field} must be greater than zero"
        )));
    }
    Ok(duration)
}

fn validate_run_settings(section: &ConfigSection) -> Result<RunSettings> {
    Ok(RunSettings {
        concurrency: check_concurrency(section.concurrency)?,
        sweep_interval: positive_duration_field("[config].sweep_interval", &section.sweep_interval)?,
        termination_grace: positive_duration_field(
            "[config].termination_grace",
            &section.termination_grace,
        )?,
        overall_timeout: section
            .overall_timeout
            .as_deref()
            .map(|v| positive_duration_field("[config].overall_timeout", v))
            .transpose()?,
        journal: section.journal.clone(),
    })
}

fn validate_hang(section: &HangSection) -> Result<HangPolicy> {
    let thresholds = section
        .thresholds
        .iter()
        .map(|v| duration_field("[hang].thresholds", v))
        .collect::<Result<Vec<_>>>()?;
    HangPolicy::new(thresholds, section.action)
}

/// Progress is reported at most once per `progress_interval`, so a throttle
/// that reaches the first threshold would stall jobs that are producing output.
fn check_progress_throttle(hang: &HangPolicy, backend: &BackendSettings) -> Result<()> {
    let first = hang.thresholds()[0];
    if backend.progress_interval >= first {
        return Err(WardenError::ConfigError(format!(
            "[backend].progress_interval ({}) must be shorter than the first hang threshold ({})",
            format_duration(backend.progress_interval),
            format_duration(first)
        )));
    }
    Ok(())
}

fn validate_backend(section: BackendSection) -> Result<BackendSettings> {
    Ok(BackendSettings {
        progress_interval: duration_field("[backend].progress_interval", &section.progress_interval)?,
        cpu_poll_interval: section
            .cpu_poll_interval
            .as_deref()
            .map(|v| positive_duration_field("[backend].cpu_poll_interval", v))
            .transpose()?,
        diagnostic_cmd: section.diagnostic_cmd,
        diagnostic_dir: section.diagnostic_dir,
        diagnostic_timeout: positive_duration_field(
            "[backend].diagnostic_timeout",
            &section.diagnostic_timeout,
        )?,
    })
}
