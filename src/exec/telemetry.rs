// src/exec/telemetry.rs

//! Activity detection for a running process.
//!
//! Output lines and (on Linux) growth of the process' CPU time count as
//! activity. Each detector runs as a background Tokio task that calls
//! [`Notifier::activity`]; throttling happens there.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::notifier::Notifier;

/// Compile the optional progress pattern of a job.
///
/// An invalid pattern is logged and ignored, so every line counts as activity.
pub fn compile_progress_pattern(notifier: &Notifier, pattern: Option<&str>) -> Option<Arc<Regex>> {
    let pattern = pattern?;
    match Regex::new(pattern) {
        Ok(re) => Some(Arc::new(re)),
        Err(e) => {
            warn!(
                task = %notifier.task(),
                pattern = %pattern,
                error = %e,
                "invalid progress_on_output regex; every line counts as activity"
            );
            None
        }
    }
}

/// Watch one output stream of the process.
///
/// Lines are always consumed so the pipe never fills up; they are logged at
/// debug level.
pub fn spawn_output_monitor<R>(
    stream: &'static str,
    reader: R,
    pattern: Option<Arc<Regex>>,
    notifier: Arc<Notifier>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            debug!(task = %notifier.task(), stream, "{}", line);

            let counts = pattern.as_ref().is_none_or(|re| re.is_match(&line));
            if counts {
                notifier.activity().await;
            }
        }

        debug!(task = %notifier.task(), stream, "output monitor ended");
    })
}

/// Total user + system CPU ticks from the contents of `/proc/<pid>/stat`.
///
/// The command name (field 2) may contain spaces and parentheses, so fields
/// are counted from the last `)`.
pub fn parse_cpu_ticks(stat: &str) -> Option<u64> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    // After the command name: state is field 3, utime 14, stime 15.
    let utime: u64 = fields.nth(11)?.parse().ok()?;
    let stime: u64 = fields.next()?.parse().ok()?;
    Some(utime + stime)
}

/// Sample the CPU time of `pid` every `interval` and report growth as
/// activity. Stops when the process can no longer be read.
#[cfg(target_os = "linux")]
pub fn spawn_cpu_sampler(pid: u32, interval: Duration, notifier: Arc<Notifier>) -> Option<JoinHandle<()>> {
    let path = format!("/proc/{pid}/stat");
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last: Option<u64> = None;

        loop {
            ticker.tick().await;
            let ticks = match tokio::fs::read_to_string(&path).await {
                Ok(stat) => parse_cpu_ticks(&stat),
                Err(e) => {
                    debug!(task = %notifier.task(), pid, error = %e, "cpu sampler stopped");
                    break;
                }
            };
            let Some(ticks) = ticks else {
                warn!(task = %notifier.task(), pid, "unparseable /proc stat line; cpu sampler stopped");
                break;
            };
            if last.is_some_and(|prev| ticks > prev) {
                notifier.activity().await;
            }
            last = Some(ticks);
        }
    }))
}

#[cfg(not(target_os = "linux"))]
pub fn spawn_cpu_sampler(pid: u32, _interval: Duration, notifier: Arc<Notifier>) -> Option<JoinHandle<()>> {
    debug!(task = %notifier.task(), pid, "cpu sampling is only available on Linux");
    None
}
