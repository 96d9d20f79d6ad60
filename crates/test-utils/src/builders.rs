#![allow(dead_code)]

use std::time::Duration;

use taskwarden::config::{
    BackendSection, CommandConfig, CommandSetConfig, ConfigFile, ConfigSection, HangSection,
    RawConfigFile,
};
use taskwarden::engine::RunOptions;
use taskwarden::task::HangPolicy;
use taskwarden::types::HangAction;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                hang: HangSection::default(),
                backend: BackendSection::default(),
                command_sets: Vec::new(),
            },
        }
    }

    pub fn with_set(mut self, set: CommandSetConfig) -> Self {
        self.config.command_sets.push(set);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.config.concurrency = n;
        self
    }

    pub fn thresholds(mut self, thresholds: &[&str]) -> Self {
        self.config.hang.thresholds = thresholds.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn hang_action(mut self, action: HangAction) -> Self {
        self.config.hang.action = action;
        self
    }

    pub fn overall_timeout(mut self, timeout: &str) -> Self {
        self.config.config.overall_timeout = Some(timeout.to_string());
        self
    }

    pub fn build_raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `CommandSetConfig`.
pub struct CommandSetBuilder {
    set: CommandSetConfig,
}

impl CommandSetBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            set: CommandSetConfig {
                id: id.to_string(),
                working_dir: None,
                commands: Vec::new(),
            },
        }
    }

    pub fn working_dir(mut self, dir: &str) -> Self {
        self.set.working_dir = Some(dir.into());
        self
    }

    pub fn command(mut self, id: &str, cmd: &str) -> Self {
        self.set.commands.push(CommandConfig {
            id: id.to_string(),
            cmd: cmd.to_string(),
            working_dir: None,
            progress_on_output: None,
        });
        self
    }

    /// Set `progress_on_output` on the most recently added command.
    pub fn progress_on_output(mut self, pattern: &str) -> Self {
        if let Some(last) = self.set.commands.last_mut() {
            last.progress_on_output = Some(pattern.to_string());
        }
        self
    }

    pub fn build(self) -> CommandSetConfig {
        self.set
    }
}

/// Builder for `RunOptions`.
pub struct RunOptionsBuilder {
    options: RunOptions,
    thresholds: Vec<Duration>,
    action: HangAction,
}

impl RunOptionsBuilder {
    pub fn new() -> Self {
        let options = RunOptions::default();
        Self {
            thresholds: options.hang.thresholds().to_vec(),
            action: options.hang.action(),
            options,
        }
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.options.concurrency = n;
        self
    }

    /// Hang thresholds in whole seconds.
    pub fn thresholds(mut self, secs: &[u64]) -> Self {
        self.thresholds = secs.iter().map(|s| Duration::from_secs(*s)).collect();
        self
    }

    pub fn action(mut self, action: HangAction) -> Self {
        self.action = action;
        self
    }

    pub fn grace(mut self, grace: Duration) -> Self {
        self.options.termination_grace = grace;
        self
    }

    pub fn overall_timeout(mut self, timeout: Duration) -> Self {
        self.options.overall_timeout = Some(timeout);
        self
    }

    pub fn build(mut self) -> RunOptions {
        self.options.hang =
            HangPolicy::new(self.thresholds, self.action).expect("invalid hang policy in builder");
        self.options
    }
}

impl Default for RunOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
