use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};

use taskwarden::engine::RuntimeEvent;
use taskwarden::errors::Result;
use taskwarden::exec::{ExecutionBackend, Notifier};
use taskwarden::protocol::{CommandMessage, NotificationKind, RunClock, TaskId, Timestamp};

/// Exit code the fake reports for a process it was asked to kill.
pub const KILLED_EXIT_CODE: i32 = 137;

/// Scripted behaviour of one fake process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Behaviour {
    /// Start, stay silent, exit with `code` after `after`.
    Exit { after: Duration, code: i32 },
    /// Start, report activity every `every`, exit with `code` after `after`.
    Chatty {
        every: Duration,
        after: Duration,
        code: i32,
    },
    /// Start and go silent until killed.
    Hang,
    /// Start, go silent and ignore kill requests.
    Unkillable,
    /// Fail to spawn.
    SpawnError(String),
}

enum Control {
    Kill,
    Dump,
}

/// A fake execution backend that:
/// - records every dispatched message together with the run time it arrived
/// - plays one scripted actor per task, reporting through a real `Notifier`
pub struct FakeBackend {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    clock: RunClock,
    behaviours: HashMap<TaskId, Behaviour>,
    default_behaviour: Behaviour,
    dump_fails: bool,
    log: Arc<Mutex<Vec<(Timestamp, CommandMessage)>>>,
    actors: HashMap<TaskId, mpsc::UnboundedSender<Control>>,
    next_pid: u32,
}

impl FakeBackend {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>, clock: RunClock) -> Self {
        Self {
            runtime_tx,
            clock,
            behaviours: HashMap::new(),
            default_behaviour: Behaviour::Exit {
                after: Duration::from_secs(1),
                code: 0,
            },
            dump_fails: false,
            log: Arc::new(Mutex::new(Vec::new())),
            actors: HashMap::new(),
            next_pid: 1000,
        }
    }

    pub fn with_behaviour(mut self, task: TaskId, behaviour: Behaviour) -> Self {
        self.behaviours.insert(task, behaviour);
        self
    }

    pub fn with_default(mut self, behaviour: Behaviour) -> Self {
        self.default_behaviour = behaviour;
        self
    }

    /// Make every diagnostic dump fail.
    pub fn failing_dumps(mut self) -> Self {
        self.dump_fails = true;
        self
    }

    /// Shared handle to the dispatch log; stays readable after the backend
    /// moved into the orchestrator.
    pub fn log(&self) -> Arc<Mutex<Vec<(Timestamp, CommandMessage)>>> {
        Arc::clone(&self.log)
    }

    fn handle(&mut self, message: CommandMessage) {
        match message {
            CommandMessage::Run { task, .. } => {
                let behaviour = self
                    .behaviours
                    .get(&task)
                    .cloned()
                    .unwrap_or_else(|| self.default_behaviour.clone());
                let notifier = Arc::new(Notifier::new(
                    task.clone(),
                    self.runtime_tx.clone(),
                    self.clock,
                    Duration::ZERO,
                ));
                let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();
                let pid = self.next_pid;
                self.next_pid += 1;
                tokio::spawn(actor(pid, behaviour, self.dump_fails, notifier, ctrl_rx));
                self.actors.insert(task, ctrl_tx);
            }
            CommandMessage::Cancel { task } | CommandMessage::Terminate { task, .. } => {
                self.control(&task, Control::Kill);
            }
            CommandMessage::CollectDiagnostic { task, .. } => {
                self.control(&task, Control::Dump);
            }
        }
    }

    fn control(&self, task: &TaskId, control: Control) {
        if let Some(tx) = self.actors.get(task) {
            // The actor may already be gone; that is what a real process does too.
            let _ = tx.send(control);
        }
    }
}

impl ExecutionBackend for FakeBackend {
    fn dispatch(
        &mut self,
        messages: Vec<CommandMessage>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let now = self.clock.now();
        {
            let mut log = self.log.lock().unwrap();
            log.extend(messages.iter().cloned().map(|m| (now, m)));
        }
        for message in messages {
            self.handle(message);
        }
        Box::pin(async { Ok(()) })
    }
}

async fn actor(
    pid: u32,
    behaviour: Behaviour,
    dump_fails: bool,
    notifier: Arc<Notifier>,
    mut ctrl_rx: mpsc::UnboundedReceiver<Control>,
) {
    if let Behaviour::SpawnError(reason) = &behaviour {
        let _ = notifier
            .send(NotificationKind::BackendFailure {
                reason: reason.clone(),
            })
            .await;
        return;
    }

    let started = Instant::now();
    if notifier
        .send(NotificationKind::Started {
            pid,
            started_at: notifier.now(),
        })
        .await
        .is_err()
    {
        return;
    }

    // Far enough away to never fire within a test.
    let never = started + Duration::from_secs(365 * 24 * 3600);
    let (exit_at, exit_code, every) = match behaviour {
        Behaviour::Exit { after, code } => (started + after, code, None),
        Behaviour::Chatty { every, after, code } => (started + after, code, Some(every)),
        Behaviour::Hang | Behaviour::Unkillable | Behaviour::SpawnError(_) => (never, 0, None),
    };
    let killable = behaviour != Behaviour::Unkillable;
    let mut next_activity = every.map(|e| started + e);

    loop {
        let activity_at = next_activity.unwrap_or(never);
        tokio::select! {
            _ = sleep_until(exit_at) => {
                let _ = notifier.send(NotificationKind::Terminated { exit_code }).await;
                return;
            }
            _ = sleep_until(activity_at), if next_activity.is_some() => {
                notifier.activity().await;
                next_activity = every.map(|e| activity_at + e);
            }
            control = ctrl_rx.recv() => match control {
                Some(Control::Kill) if killable => {
                    let _ = notifier
                        .send(NotificationKind::Terminated { exit_code: KILLED_EXIT_CODE })
                        .await;
                    return;
                }
                Some(Control::Kill) => {}
                Some(Control::Dump) => {
                    let kind = if dump_fails {
                        NotificationKind::DiagnosticFailed {
                            reason: "fake dump failure".to_string(),
                        }
                    } else {
                        NotificationKind::DiagnosticCollected {
                            artifact: Some(PathBuf::from(format!("/tmp/fake-{pid}.dump"))),
                        }
                    };
                    let _ = notifier.send(kind).await;
                }
                None => return,
            },
        }
    }
}
