// src/exec/backend.rs

//! Pluggable execution backend abstraction.
//!
//! The orchestrator talks to an `ExecutionBackend` instead of a raw mpsc
//! sender. This makes it easy to swap in a fake backend in tests while keeping
//! the production process handling in [`executor_loop`](super::executor_loop).
//!
//! - `ProcessBackend` is the implementation used by the `taskwarden` binary.
//!   It wraps the executor loop and just forwards messages over an mpsc
//!   channel.
//! - Tests can provide their own `ExecutionBackend` that, for example, records
//!   which messages were dispatched and emits scripted notifications.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::engine::RuntimeEvent;
use crate::errors::{Result, WardenError};
use crate::protocol::{CommandMessage, RunClock};

use super::BackendSettings;
use super::executor_loop::spawn_executor;

/// Trait abstracting how command messages reach the processes.
///
/// Production code uses [`ProcessBackend`]; tests can provide their own
/// implementation that doesn't spawn real processes.
pub trait ExecutionBackend: Send {
    /// Deliver the given messages, in order.
    ///
    /// An error means the backend can no longer accept work, which aborts the
    /// run. Problems with a single process are reported as notifications
    /// instead.
    fn dispatch(
        &mut self,
        messages: Vec<CommandMessage>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Process backend used in production.
///
/// The orchestrator calls `dispatch`, which forwards the messages to the
/// background executor via an mpsc channel.
pub struct ProcessBackend {
    tx: mpsc::Sender<CommandMessage>,
}

impl ProcessBackend {
    /// Create a new process backend, wiring it to the given runtime event
    /// sender.
    ///
    /// This spawns the background executor loop immediately.
    pub fn new(
        runtime_tx: mpsc::Sender<RuntimeEvent>,
        clock: RunClock,
        settings: BackendSettings,
    ) -> Self {
        let tx = spawn_executor(runtime_tx, clock, Arc::new(settings));
        Self { tx }
    }
}

impl ExecutionBackend for ProcessBackend {
    fn dispatch(
        &mut self,
        messages: Vec<CommandMessage>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();

        Box::pin(async move {
            for message in messages {
                tx.send(message).await.map_err(|err| {
                    WardenError::Backend(format!(
                        "executor loop stopped; {} for {} not delivered",
                        err.0.kind(),
                        err.0.task()
                    ))
                })?;
            }
            Ok(())
        })
    }
}
