// src/task/hang.rs

use std::time::Duration;

use crate::errors::{Result, WardenError};
use crate::types::HangAction;

/// Escalation policy for stalled tasks.
///
/// `thresholds` is strictly ascending and never empty. Each threshold is
/// reported at most once per stall episode; crossing the last one applies
/// `action`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HangPolicy {
    thresholds: Vec<Duration>,
    action: HangAction,
}

impl HangPolicy {
    pub fn new(thresholds: Vec<Duration>, action: HangAction) -> Result<Self> {
        if thresholds.is_empty() {
            return Err(WardenError::ConfigError(
                "[hang].thresholds must not be empty".to_string(),
            ));
        }
        if let Some(pair) = thresholds.windows(2).find(|w| w[0] >= w[1]) {
            return Err(WardenError::ConfigError(format!(
                "[hang].thresholds must be strictly ascending ({:?} is followed by {:?})",
                pair[0], pair[1]
            )));
        }
        if thresholds[0].is_zero() {
            return Err(WardenError::ConfigError(
                "[hang].thresholds must be greater than zero".to_string(),
            ));
        }
        Ok(Self { thresholds, action })
    }

    pub fn thresholds(&self) -> &[Duration] {
        &self.thresholds
    }

    pub fn action(&self) -> HangAction {
        self.action
    }
}

impl Default for HangPolicy {
    fn default() -> Self {
        Self {
            thresholds: vec![
                Duration::from_secs(30),
                Duration::from_secs(60),
                Duration::from_secs(120),
            ],
            action: HangAction::default(),
        }
    }
}

/// Per-task hang bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HangTracker {
    /// Number of thresholds already reported in the current episode.
    reported: usize,
    /// Longest inactivity ever reported for this task.
    most_severe: Option<Duration>,
}

impl HangTracker {
    pub fn reported(&self) -> usize {
        self.reported
    }

    pub fn most_severe(&self) -> Option<Duration> {
        self.most_severe
    }

    /// The next threshold that would be reported, if any is left.
    pub fn next_threshold(&self, policy: &HangPolicy) -> Option<Duration> {
        policy.thresholds.get(self.reported).copied()
    }

    /// Whether every threshold of the current episode has been reported.
    pub fn exhausted(&self, policy: &HangPolicy) -> bool {
        self.reported >= policy.thresholds.len()
    }

    /// Record an inactivity of `elapsed` and return the thresholds it newly
    /// crosses, ascending.
    pub fn record(&mut self, policy: &HangPolicy, elapsed: Duration) -> Vec<Duration> {
        let crossed: Vec<Duration> = policy.thresholds[self.reported.min(policy.thresholds.len())..]
            .iter()
            .copied()
            .take_while(|t| *t <= elapsed)
            .collect();

        if !crossed.is_empty() {
            self.reported += crossed.len();
            self.most_severe = Some(self.most_severe.map_or(elapsed, |m| m.max(elapsed)));
        }
        crossed
    }

    /// End the current stall episode. Returns `true` if one was in progress.
    pub fn reset(&mut self) -> bool {
        let active = self.reported > 0;
        self.reported = 0;
        active
    }
}
