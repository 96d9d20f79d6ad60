// src/engine/runtime.rs

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::errors::{Result, WardenError};
use crate::exec::ExecutionBackend;
use crate::protocol::{CommandMessage, RunClock};

use super::core::OrchestratorCore;
use super::result::RunResult;
use super::{CoreCommand, CoreStep, RuntimeEvent};

/// Drives the orchestrator core in response to `RuntimeEvent`s and sweep
/// ticks, and delegates message delivery to an `ExecutionBackend`.
///
/// This is a pure IO shell around `OrchestratorCore`, which contains all the
/// run semantics. Every event goes through the single `event_rx` channel, so
/// task state is only ever touched from this loop.
pub struct Orchestrator<B: ExecutionBackend> {
    core: OrchestratorCore,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    backend: B,
    clock: RunClock,
    sweep_interval: Duration,
}

impl<B: ExecutionBackend> fmt::Debug for Orchestrator<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("core", &self.core)
            .field("sweep_interval", &self.sweep_interval)
            .finish_non_exhaustive()
    }
}

impl<B: ExecutionBackend> Orchestrator<B> {
    pub fn new(
        core: OrchestratorCore,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        backend: B,
        clock: RunClock,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            core,
            event_rx,
            backend,
            clock,
            sweep_interval,
        }
    }

    /// Main event loop.
    ///
    /// - Starts the run (initial dispatch).
    /// - Waits for either the next event or the next sweep tick, never for a
    ///   specific task.
    /// - Forwards the resulting messages to the backend.
    ///
    /// Returns once every task is terminal. A failure to hand messages to the
    /// backend, or the inbound channel closing while tasks are still pending,
    /// is fatal.
    pub async fn run(mut self) -> Result<RunResult> {
        info!("taskwarden orchestrator started");

        let step = self.core.start(self.clock.now());
        if !self.execute(step).await? {
            return Ok(self.core.result());
        }

        let mut sweep = interval_at(Instant::now() + self.sweep_interval, self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let step = tokio::select! {
                event = self.event_rx.recv() => match event {
                    Some(event) => {
                        debug!(?event, "orchestrator received event");
                        self.core.step(event, self.clock.now())
                    }
                    None => {
                        warn!("notification channel closed with tasks still pending");
                        return Err(WardenError::Backend(
                            "notification channel closed before the run completed".to_string(),
                        ));
                    }
                },
                _ = sweep.tick() => self.core.sweep(self.clock.now()),
            };

            if !self.execute(step).await? {
                info!("core reported run complete; stopping orchestrator");
                break;
            }
        }

        info!("orchestrator exiting");
        Ok(self.core.result())
    }

    /// Execute the commands of one step; returns whether to keep running.
    async fn execute(&mut self, step: CoreStep) -> Result<bool> {
        for command in step.commands {
            match command {
                CoreCommand::Dispatch(messages) => self.dispatch(messages).await?,
                CoreCommand::RequestExit => {
                    debug!("core issued RequestExit command");
                }
            }
        }
        Ok(step.keep_running)
    }

    async fn dispatch(&mut self, messages: Vec<CommandMessage>) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let summary: Vec<String> = messages
            .iter()
            .map(|m| format!("{}:{}", m.kind(), m.task()))
            .collect();
        debug!(?summary, "dispatching messages to backend");

        self.backend.dispatch(messages).await
    }
}

/// Caller-side handle to a running orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::Sender<RuntimeEvent>,
}

impl OrchestratorHandle {
    pub fn new(tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self { tx }
    }

    /// Request cancellation of the run.
    ///
    /// Idempotent and safe to call at any time, including after the run has
    /// finished (the request is then simply dropped).
    pub async fn cancel(&self) {
        if self.tx.send(RuntimeEvent::CancelRequested).await.is_err() {
            debug!("cancel requested after the orchestrator stopped");
        }
    }
}
