// src/exec/notifier.rs

//! Per-task notification sender.

use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, trace};

use crate::engine::RuntimeEvent;
use crate::errors::{Result, WardenError};
use crate::protocol::{CommandNotification, NotificationKind, RunClock, TaskId, Timestamp};

#[derive(Debug, Default)]
struct NotifierState {
    seq: u64,
    last_progress: Option<Timestamp>,
}

/// Sends notifications for one task.
///
/// Every component that reports on the same process (runner, output
/// monitors, CPU sampler, dump job) shares one `Notifier`. The sequence
/// number is stamped and the message sent while holding the lock, so stamp
/// order and channel order agree.
#[derive(Debug)]
pub struct Notifier {
    task: TaskId,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    clock: RunClock,
    progress_interval: Duration,
    state: Mutex<NotifierState>,
}

impl Notifier {
    pub fn new(
        task: TaskId,
        runtime_tx: mpsc::Sender<RuntimeEvent>,
        clock: RunClock,
        progress_interval: Duration,
    ) -> Self {
        Self {
            task,
            runtime_tx,
            clock,
            progress_interval,
            state: Mutex::new(NotifierState::default()),
        }
    }

    pub fn task(&self) -> &TaskId {
        &self.task
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Stamp and send one notification.
    pub async fn send(&self, kind: NotificationKind) -> Result<()> {
        let mut state = self.state.lock().await;
        self.send_locked(&mut state, kind).await
    }

    /// Report activity observed now, unless a `Progress` went out less than
    /// `progress_interval` ago.
    pub async fn activity(&self) {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        if let Some(last) = state.last_progress {
            if now.saturating_sub(last) < self.progress_interval {
                trace!(task = %self.task, "progress throttled");
                return;
            }
        }
        state.last_progress = Some(now);

        if let Err(err) = self
            .send_locked(&mut state, NotificationKind::Progress { active_at: now })
            .await
        {
            debug!(task = %self.task, error = %err, "progress not delivered");
        }
    }

    async fn send_locked(&self, state: &mut NotifierState, kind: NotificationKind) -> Result<()> {
        state.seq += 1;
        let notification = CommandNotification::new(self.task.clone(), state.seq, kind);
        self.runtime_tx
            .send(RuntimeEvent::Notification(notification))
            .await
            .map_err(|_| {
                WardenError::Backend(format!(
                    "orchestrator stopped; notification for {} dropped",
                    self.task
                ))
            })
    }
}
