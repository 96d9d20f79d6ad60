use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use taskwarden::engine::{
    Orchestrator, OrchestratorCore, OrchestratorHandle, RunOptions, RunOutcome, RuntimeEvent,
    TaskSpec,
};
use taskwarden::journal::MemoryJournal;
use taskwarden::protocol::{CommandMessage, CommandNotification, NotificationKind, RunClock, TaskId};
use taskwarden::task::{TaskState, TaskStatus};
use taskwarden_test_utils::builders::RunOptionsBuilder;
use taskwarden_test_utils::fake_backend::{Behaviour, FakeBackend, KILLED_EXIT_CODE};
use taskwarden_test_utils::{init_tracing, secs, within};

fn id(cmd: &str) -> TaskId {
    TaskId::new("Triage", cmd)
}

fn specs(cmds: &[&str]) -> Vec<TaskSpec> {
    cmds.iter()
        .map(|c| TaskSpec::new("Triage", *c, format!("collect-{c}")))
        .collect()
}

fn runs(messages: &[&CommandMessage]) -> Vec<String> {
    messages
        .iter()
        .filter(|m| matches!(m, CommandMessage::Run { .. }))
        .map(|m| m.task().command.clone())
        .collect()
}

fn notification(cmd: &str, seq: u64, kind: NotificationKind) -> RuntimeEvent {
    RuntimeEvent::Notification(CommandNotification::new(id(cmd), seq, kind))
}

#[test]
fn three_jobs_with_limit_two_dispatch_in_order() {
    init_tracing();
    let options = RunOptionsBuilder::new().concurrency(2).build();
    let mut core = OrchestratorCore::new(options, Arc::new(MemoryJournal::new()));
    core.submit_task_set(specs(&["A", "B", "C"])).unwrap();

    let step = core.start(secs(0));
    assert_eq!(runs(&step.messages()), vec!["A", "B"]);

    for (cmd, pid) in [("A", 1), ("B", 2)] {
        let step = core.step(
            notification(cmd, 1, NotificationKind::Started { pid, started_at: secs(0) }),
            secs(0),
        );
        assert!(step.messages().is_empty());
    }

    let step = core.step(
        notification("B", 2, NotificationKind::Terminated { exit_code: 0 }),
        secs(5),
    );
    assert_eq!(runs(&step.messages()), vec!["C"]);
    assert!(core.active_count() <= 2);

    core.step(
        notification("C", 1, NotificationKind::Started { pid: 3, started_at: secs(5) }),
        secs(5),
    );
    core.step(
        notification("C", 2, NotificationKind::Terminated { exit_code: 0 }),
        secs(6),
    );
    let step = core.step(
        notification("A", 2, NotificationKind::Terminated { exit_code: 0 }),
        secs(10),
    );
    assert!(!step.keep_running);

    let dispatched: Vec<Option<Duration>> = ["A", "B", "C"]
        .iter()
        .map(|c| core.task(&id(c)).unwrap().dispatched_at())
        .collect();
    assert_eq!(dispatched, vec![Some(secs(0)), Some(secs(0)), Some(secs(5))]);
    assert!(core.result().success);
}

#[test]
fn cancel_mid_run_terminates_running_and_withdraws_waiting() {
    init_tracing();
    let options = RunOptionsBuilder::new().concurrency(2).build();
    let mut core = OrchestratorCore::new(options, Arc::new(MemoryJournal::new()));
    core.submit_task_set(specs(&["A", "B", "C", "D"])).unwrap();
    core.start(secs(0));

    core.step(
        notification("A", 1, NotificationKind::Started { pid: 11, started_at: secs(0) }),
        secs(0),
    );
    core.step(
        notification("A", 2, NotificationKind::Terminated { exit_code: 0 }),
        secs(1),
    );
    // C took A's slot but has not started yet.
    core.step(
        notification("B", 1, NotificationKind::Started { pid: 12, started_at: secs(0) }),
        secs(1),
    );

    let step = core.step(RuntimeEvent::CancelRequested, secs(3));
    assert_eq!(
        step.messages(),
        vec![
            &CommandMessage::Terminate { task: id("B"), pid: 12 },
            &CommandMessage::Cancel { task: id("C") },
        ]
    );
    assert_eq!(core.task(&id("D")).unwrap().status(), TaskStatus::Cancelled);
    assert!(core.is_cancel_requested());

    // A second request is a no-op.
    assert!(core.step(RuntimeEvent::CancelRequested, secs(3)).messages().is_empty());

    core.step(
        notification("B", 2, NotificationKind::Terminated { exit_code: KILLED_EXIT_CODE }),
        secs(4),
    );
    let step = core.step(
        notification("C", 1, NotificationKind::BackendFailure { reason: "withdrawn before start".into() }),
        secs(4),
    );
    assert!(!step.keep_running);

    let result = core.result();
    assert_eq!(
        result.outcome,
        RunOutcome::Cancelled {
            affected: vec![id("B"), id("C"), id("D")]
        }
    );
    let b = core.task(&id("B")).unwrap();
    assert_eq!(
        b.state(),
        &TaskState::Cancelled {
            process_exit: Some(KILLED_EXIT_CODE)
        }
    );
    assert_eq!(result.task(&id("C")).unwrap().pid, None);
    assert_eq!(result.task(&id("A")).unwrap().status, TaskStatus::Done);
}

struct Run {
    core: OrchestratorCore,
    backend: FakeBackend,
    rx: mpsc::Receiver<RuntimeEvent>,
    tx: mpsc::Sender<RuntimeEvent>,
    clock: RunClock,
    journal: Arc<MemoryJournal>,
}

fn fake_run(options: RunOptions, cmds: &[&str]) -> Run {
    init_tracing();
    let (tx, rx) = mpsc::channel(256);
    let clock = RunClock::start();
    let journal = Arc::new(MemoryJournal::new());
    let mut core = OrchestratorCore::new(options, journal.clone());
    core.submit_task_set(specs(cmds)).unwrap();
    Run {
        core,
        backend: FakeBackend::new(tx.clone(), clock),
        rx,
        tx,
        clock,
        journal,
    }
}

#[tokio::test(start_paused = true)]
async fn runtime_fills_slots_as_jobs_finish() {
    let mut run = fake_run(RunOptionsBuilder::new().concurrency(2).build(), &["A", "B", "C"]);
    run.backend = run
        .backend
        .with_behaviour(id("A"), Behaviour::Exit { after: secs(10), code: 0 })
        .with_behaviour(id("B"), Behaviour::Exit { after: secs(5), code: 0 })
        .with_behaviour(id("C"), Behaviour::Exit { after: secs(1), code: 0 });
    let log = run.backend.log();

    let orchestrator = Orchestrator::new(run.core, run.rx, run.backend, run.clock, secs(1));
    let result = within(secs(60), orchestrator.run()).await.unwrap();

    assert!(result.success);
    let dispatched: Vec<(Duration, String)> = log
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, m)| matches!(m, CommandMessage::Run { .. }))
        .map(|(at, m)| (*at, m.task().command.clone()))
        .collect();
    assert_eq!(
        dispatched,
        vec![
            (secs(0), "A".to_string()),
            (secs(0), "B".to_string()),
            (secs(5), "C".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn runtime_handle_cancels_a_running_battery() {
    let mut run = fake_run(RunOptionsBuilder::new().concurrency(2).build(), &["A", "B", "C"]);
    run.backend = run.backend.with_default(Behaviour::Hang);
    let handle = OrchestratorHandle::new(run.tx.clone());

    tokio::spawn(async move {
        tokio::time::sleep(secs(3)).await;
        handle.cancel().await;
        handle.cancel().await;
    });

    let orchestrator = Orchestrator::new(run.core, run.rx, run.backend, run.clock, secs(1));
    let result = within(secs(60), orchestrator.run()).await.unwrap();

    assert_eq!(
        result.outcome,
        RunOutcome::Cancelled {
            affected: vec![id("A"), id("B"), id("C")]
        }
    );
    for cmd in ["A", "B"] {
        let report = result.task(&id(cmd)).unwrap();
        assert_eq!(report.status, TaskStatus::Cancelled);
        assert!(report.pid.is_some());
    }
    assert_eq!(result.task(&id("C")).unwrap().pid, None);
    assert!(
        run.journal
            .entries()
            .iter()
            .any(|e| e.task.is_none() && e.message == "cancellation requested")
    );
}

#[tokio::test(start_paused = true)]
async fn runtime_task_failures_do_not_abort_the_run() {
    let mut run = fake_run(RunOptions::default(), &["Broken", "Fails", "Works"]);
    run.backend = run
        .backend
        .with_behaviour(id("Broken"), Behaviour::SpawnError("no such file".into()))
        .with_behaviour(id("Fails"), Behaviour::Exit { after: secs(2), code: 3 })
        .with_behaviour(id("Works"), Behaviour::Exit { after: secs(2), code: 0 });

    let orchestrator = Orchestrator::new(run.core, run.rx, run.backend, run.clock, secs(1));
    let result = within(secs(60), orchestrator.run()).await.unwrap();

    assert_eq!(
        result.outcome,
        RunOutcome::PartialFailure {
            failed: vec![id("Broken"), id("Fails")]
        }
    );
    let broken = result.task(&id("Broken")).unwrap();
    assert_eq!(broken.pid, None);
    assert_eq!(broken.exit_code, Some(taskwarden::task::EXIT_CODE_UNAVAILABLE));
    assert_eq!(result.task(&id("Fails")).unwrap().exit_code, Some(3));
    assert_eq!(result.task(&id("Works")).unwrap().status, TaskStatus::Done);
}
