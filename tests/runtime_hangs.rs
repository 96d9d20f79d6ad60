use std::sync::Arc;

use tokio::sync::mpsc;

use taskwarden::engine::{Orchestrator, OrchestratorCore, RunOptions, RunResult, TaskSpec};
use taskwarden::journal::{MemoryJournal, Severity};
use taskwarden::protocol::{RunClock, TaskId};
use taskwarden::task::{FailureReason, TaskStatus};
use taskwarden::types::HangAction;
use taskwarden_test_utils::builders::RunOptionsBuilder;
use taskwarden_test_utils::fake_backend::{Behaviour, FakeBackend, KILLED_EXIT_CODE};
use taskwarden_test_utils::{init_tracing, secs, within};

fn job() -> TaskId {
    TaskId::new("Memory", "Capture")
}

/// Run a single job against the fake backend and return the result, the
/// message kinds the backend saw and the job's journal lines.
async fn run_single(
    options: RunOptions,
    configure: impl FnOnce(FakeBackend) -> FakeBackend,
) -> (RunResult, Vec<&'static str>, Vec<(Severity, String)>) {
    init_tracing();
    let (tx, rx) = mpsc::channel(256);
    let clock = RunClock::start();
    let journal = Arc::new(MemoryJournal::new());

    let mut core = OrchestratorCore::new(options, journal.clone());
    core.submit_task_set(vec![TaskSpec::new("Memory", "Capture", "capture-ram")])
        .unwrap();

    let backend = configure(FakeBackend::new(tx, clock));
    let log = backend.log();

    let orchestrator = Orchestrator::new(core, rx, backend, clock, secs(1));
    let result = within(secs(3600), orchestrator.run()).await.unwrap();

    let kinds = log
        .lock()
        .unwrap()
        .iter()
        .map(|(_, m)| m.kind())
        .collect();
    let lines = journal
        .entries_for(&job())
        .into_iter()
        .map(|e| (e.severity, e.message))
        .collect();
    (result, kinds, lines)
}

fn threshold_warnings(lines: &[(Severity, String)]) -> usize {
    lines
        .iter()
        .filter(|(s, m)| *s == Severity::Warning && m.starts_with("hang threshold"))
        .count()
}

#[tokio::test(start_paused = true)]
async fn silent_job_is_dumped_then_killed() {
    let options = RunOptionsBuilder::new()
        .thresholds(&[30, 60, 120])
        .action(HangAction::DumpThenTerminate)
        .build();
    let (result, kinds, lines) =
        run_single(options, |b| b.with_behaviour(job(), Behaviour::Hang)).await;

    assert_eq!(kinds, vec!["run", "collect_diagnostic", "terminate"]);
    assert_eq!(threshold_warnings(&lines), 3);
    assert!(lines.iter().any(|(_, m)| m.starts_with("diagnostic dump collected at")));

    let report = result.task(&job()).unwrap();
    assert_eq!(report.status, TaskStatus::Failed);
    assert_eq!(report.failure, Some(FailureReason::KilledAfterHang));
    assert_eq!(report.exit_code, Some(KILLED_EXIT_CODE));
    assert!(report.most_severe_hang.unwrap() >= secs(120));
}

#[tokio::test(start_paused = true)]
async fn failed_dump_still_terminates() {
    let options = RunOptionsBuilder::new()
        .thresholds(&[30])
        .action(HangAction::DumpThenTerminate)
        .build();
    let (result, kinds, lines) = run_single(options, |b| {
        b.with_behaviour(job(), Behaviour::Hang).failing_dumps()
    })
    .await;

    assert_eq!(kinds, vec!["run", "collect_diagnostic", "terminate"]);
    assert!(
        lines
            .iter()
            .any(|(s, m)| *s == Severity::Error && m.contains("fake dump failure"))
    );
    assert_eq!(
        result.task(&job()).unwrap().failure,
        Some(FailureReason::KilledAfterHang)
    );
}

#[tokio::test(start_paused = true)]
async fn unkillable_job_fails_after_grace() {
    let options = RunOptionsBuilder::new()
        .thresholds(&[30])
        .action(HangAction::Terminate)
        .grace(secs(10))
        .build();
    let (result, kinds, _) =
        run_single(options, |b| b.with_behaviour(job(), Behaviour::Unkillable)).await;

    assert_eq!(kinds, vec!["run", "terminate"]);
    let report = result.task(&job()).unwrap();
    assert_eq!(report.failure, Some(FailureReason::TerminationUnconfirmed));
    assert_eq!(report.exit_code, Some(taskwarden::task::EXIT_CODE_UNAVAILABLE));
}

#[tokio::test(start_paused = true)]
async fn chatty_job_never_escalates() {
    let options = RunOptionsBuilder::new()
        .thresholds(&[30, 60, 120])
        .action(HangAction::Terminate)
        .build();
    let (result, kinds, lines) = run_single(options, |b| {
        b.with_behaviour(
            job(),
            Behaviour::Chatty {
                every: secs(10),
                after: secs(300),
                code: 0,
            },
        )
    })
    .await;

    assert!(result.success);
    assert_eq!(kinds, vec!["run"]);
    assert_eq!(threshold_warnings(&lines), 0);
}

#[tokio::test(start_paused = true)]
async fn warn_only_policy_leaves_the_job_alone() {
    let options = RunOptionsBuilder::new()
        .thresholds(&[30, 60])
        .action(HangAction::Warn)
        .build();
    let (result, kinds, lines) = run_single(options, |b| {
        b.with_behaviour(job(), Behaviour::Exit { after: secs(90), code: 0 })
    })
    .await;

    assert_eq!(kinds, vec!["run"]);
    assert_eq!(threshold_warnings(&lines), 2);
    let report = result.task(&job()).unwrap();
    assert_eq!(report.status, TaskStatus::Done);
    assert_eq!(report.most_severe_hang, Some(secs(60)));
}
