// src/protocol/clock.rs

use std::time::Duration;

use tokio::time::Instant;

/// Point in time relative to the start of the run.
///
/// The core never reads a clock itself; every operation receives `now` as a
/// `Timestamp`, which keeps the state machines deterministic under test.
pub type Timestamp = Duration;

/// Shared epoch for the orchestrator and the backend.
///
/// Uses Tokio's `Instant` so that tests running with a paused clock observe
/// the same virtual time as the runtime.
#[derive(Debug, Clone, Copy)]
pub struct RunClock {
    epoch: Instant,
}

impl RunClock {
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    pub fn now(&self) -> Timestamp {
        self.epoch.elapsed()
    }
}

impl Default for RunClock {
    fn default() -> Self {
        Self::start()
    }
}

/// Render a duration for journal lines: whole seconds as `"30s"`, anything
/// finer with millisecond precision (`"1.250s"`).
pub fn format_duration(d: std::time::Duration) -> String {
    if d.subsec_nanos() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{:.3}s", d.as_secs_f64())
    }
}
