//! End-to-end Worker Executor scenarios — the literal fixtures of
//! SPEC_FULL.md §8 ("Concrete end-to-end scenarios", seeding the suite).
//!
//! Each test drives [`WorkerExecutor::execute_task`] against a real
//! `/bin/sh`-backed generic worker session (same spawn pattern as
//! `ringmaster-session`'s `pty_pool_test.rs`), so the full stream ->
//! classify -> persist -> backoff lifecycle runs for real rather than
//! through a mock.

use std::collections::BTreeMap;

use chrono::Utc;
use ringmaster_core::event::EventBus;
use ringmaster_core::output_buffer::OutputBuffer;
use ringmaster_core::reasoning_bank::ReasoningBank;
use ringmaster_core::store::{BeadRepository, InMemoryStore, ProjectRepository, WorkerRepository};
use ringmaster_core::types::{
    Bead, BeadKind, BeadStatus, LaunchTemplate, PLevel, Project, ProjectSettings, TaskFields,
    Worker, WorkerStatus, WorkerType,
};
use ringmaster_daemon::executor::{backoff_seconds, WorkerExecutor};
use ringmaster_session::pty_pool::PtyPool;
use std::sync::Arc;
use uuid::Uuid;

/// Builds a project with no `repo_path`, so the executor's worktree
/// resolution step falls straight through to the fallback working
/// directory without touching git (SPEC_FULL.md §4.8 step 3).
fn make_project() -> Project {
    let now = Utc::now();
    Project {
        id: Uuid::new_v4(),
        name: "S1".into(),
        description: "scenario project".into(),
        tech_stack: vec![],
        repo_path: None,
        settings: ProjectSettings::default(),
        created_at: now,
        updated_at: now,
    }
}

/// A `generic` worker whose session is a real `/bin/sh -c <script>`. The
/// `GenericVariant` appends the assembled prompt as a trailing positional
/// argument to `sh -c`, which `sh` treats as `$0`/extra positional params
/// and ignores — so the script text alone determines the session output.
fn make_worker(script: &str, capabilities: &[&str]) -> Worker {
    Worker {
        id: Uuid::new_v4(),
        name: "W1".into(),
        worker_type: WorkerType::Generic,
        status: WorkerStatus::Busy,
        current_task_id: None,
        launch_template: LaunchTemplate {
            command: "/bin/sh".into(),
            args: vec!["-c".into(), script.into()],
            prompt_flag: None,
            working_dir: Some(".".into()),
            timeout_seconds: 10,
            env: BTreeMap::new(),
        },
        capabilities: capabilities.iter().map(|c| (*c).into()).collect(),
        tasks_completed: 0,
        tasks_failed: 0,
        mean_completion_seconds: 0.0,
        last_active_at: None,
        created_at: Utc::now(),
    }
}

fn make_task(project_id: Uuid, worker_id: Uuid, title: &str) -> Bead {
    let now = Utc::now();
    Bead {
        id: Bead::new_id(),
        kind: BeadKind::Task,
        project_id,
        title: title.into(),
        description: "scenario task".into(),
        priority: PLevel::P2,
        status: BeadStatus::Assigned,
        created_at: now,
        updated_at: now,
        started_at: None,
        completed_at: None,
        prompt_path: None,
        output_path: None,
        context_hash: None,
        task: Some(TaskFields {
            worker_id: Some(worker_id),
            max_attempts: 5,
            ..Default::default()
        }),
        epic: None,
    }
}

/// Wires an executor over a fresh in-memory store with `repo_path: None`
/// and the task already transactionally assigned — the state the
/// scheduler would have left before handing off to the executor
/// (SPEC_FULL.md §4.8 preamble).
async fn setup(
    script: &str,
    capabilities: &[&str],
) -> (WorkerExecutor<InMemoryStore>, InMemoryStore, Project, Worker, Bead) {
    let store = InMemoryStore::new();
    let project = store.create_project(make_project()).await.unwrap();
    let mut worker = make_worker(script, capabilities);
    worker = store.create_worker(worker.clone()).await.unwrap();
    let mut task = make_task(project.id, worker.id, "Add helper");
    task = store.create_bead(task.clone()).await.unwrap();
    worker.current_task_id = Some(task.id.clone());
    worker = store.update_worker(worker).await.unwrap();

    let event_bus = EventBus::new();
    let output_buffer = Arc::new(OutputBuffer::new());
    let pty_pool = Arc::new(PtyPool::new(8));
    let reasoning_bank = Arc::new(ReasoningBank::new());
    let executor = WorkerExecutor::new(store.clone(), event_bus, output_buffer, pty_pool, reasoning_bank)
        .with_worktrees(false);
    (executor, store, project, worker, task)
}

/// Scenario 1: single successful task. The session emits the literal
/// completion token and exits 0; the task should land in REVIEW (not yet
/// DONE — that promotion belongs to the external validator) and the
/// worker should return to IDLE with `tasks_completed = 1`.
#[tokio::test]
async fn scenario_single_successful_task() {
    let (executor, store, _project, worker, task) =
        setup("echo '<promise>COMPLETE</promise>'; exit 0", &[]).await;

    executor.execute_task(&task.id, worker.id).await.unwrap();

    let updated_task = store.get_bead(&task.id).await.unwrap();
    assert_eq!(updated_task.status, BeadStatus::Review);
    assert!(updated_task.completed_at.is_some());

    let updated_worker = store.get_worker(worker.id).await.unwrap();
    assert_eq!(updated_worker.status, WorkerStatus::Idle);
    assert_eq!(updated_worker.current_task_id, None);
    assert_eq!(updated_worker.tasks_completed, 1);
    assert_eq!(updated_worker.tasks_failed, 0);
}

/// The default always-pass validator promotes a REVIEW bead to DONE when
/// explicitly asked to (§4.8 closing paragraph); a bead not in REVIEW is
/// left untouched and reported as a failed validation.
#[tokio::test]
async fn promote_reviewed_task_moves_review_to_done() {
    let (executor, store, _project, worker, task) =
        setup("echo '<promise>COMPLETE</promise>'; exit 0", &[]).await;

    executor.execute_task(&task.id, worker.id).await.unwrap();
    let reviewed = store.get_bead(&task.id).await.unwrap();
    assert_eq!(reviewed.status, BeadStatus::Review);

    let result = executor.promote_reviewed_task(&task.id).await.unwrap();
    assert!(result.passed);

    let done = store.get_bead(&task.id).await.unwrap();
    assert_eq!(done.status, BeadStatus::Done);
}

#[tokio::test]
async fn promote_reviewed_task_rejects_non_review_bead() {
    let (executor, store, _project, _worker, task) =
        setup("echo '<promise>COMPLETE</promise>'; exit 0", &[]).await;

    // task is still ASSIGNED from `setup`, never run through the executor.
    let result = executor.promote_reviewed_task(&task.id).await.unwrap();
    assert!(!result.passed);

    let unchanged = store.get_bead(&task.id).await.unwrap();
    assert_eq!(unchanged.status, BeadStatus::Assigned);
}

/// Scenario 2: retry with backoff. The session exits 1 with a recognized
/// failure pattern in its output; the task should return to READY with
/// `retry_after` roughly 30 seconds out on the first attempt (attempt 1 of
/// `backoff_seconds`), and to FAILED once `max_attempts` is exhausted.
#[tokio::test]
async fn scenario_retry_backoff_then_exhausts_attempts() {
    let (executor, store, _project, worker, mut task) =
        setup("echo 'Traceback (most recent call last):'; exit 1", &[]).await;

    executor.execute_task(&task.id, worker.id).await.unwrap();

    let after_first = store.get_bead(&task.id).await.unwrap();
    assert_eq!(after_first.status, BeadStatus::Ready);
    let fields = after_first.task.as_ref().unwrap();
    assert_eq!(fields.attempts, 1);
    let retry_after = fields.retry_after.expect("retry_after must be set on failure");
    let delta = (retry_after - after_first.updated_at).num_seconds();
    assert_eq!(delta, backoff_seconds(1));
    assert_eq!(backoff_seconds(1), 30);

    // Drive three more failures through the same executor/task id,
    // re-assigning the worker each time the way the scheduler would.
    task = after_first;
    for expected_attempt in 2..=5u32 {
        task.status = BeadStatus::Assigned;
        if let Some(f) = task.task.as_mut() {
            f.worker_id = Some(worker.id);
        }
        task = store.update_bead(task).await.unwrap();
        let mut w = store.get_worker(worker.id).await.unwrap();
        w.status = WorkerStatus::Busy;
        w.current_task_id = Some(task.id.clone());
        store.update_worker(w).await.unwrap();

        executor.execute_task(&task.id, worker.id).await.unwrap();
        task = store.get_bead(&task.id).await.unwrap();

        if expected_attempt < 5 {
            assert_eq!(task.status, BeadStatus::Ready, "attempt {expected_attempt}");
            let fields = task.task.as_ref().unwrap();
            assert_eq!(fields.attempts, expected_attempt);
            let expected_backoff = backoff_seconds(expected_attempt);
            let retry_after = fields.retry_after.unwrap();
            let delta = (retry_after - task.updated_at).num_seconds();
            assert_eq!(delta, expected_backoff);
        }
    }
    assert_eq!(task.status, BeadStatus::Failed, "max_attempts exhausted -> FAILED");

    let final_worker = store.get_worker(worker.id).await.unwrap();
    assert_eq!(final_worker.tasks_failed, 5);
}

/// Scenario 6: NEEDS_DECISION. The session emits a configured decision
/// marker; the task should land BLOCKED with the captured question, and
/// the worker should return to IDLE without incrementing either completion
/// counter.
#[tokio::test]
async fn scenario_needs_decision_blocks_task() {
    let (executor, store, _project, worker, task) = setup(
        "echo 'I need clarification on which database to use'; exit 0",
        &[],
    )
    .await;

    executor.execute_task(&task.id, worker.id).await.unwrap();

    let updated_task = store.get_bead(&task.id).await.unwrap();
    assert_eq!(updated_task.status, BeadStatus::Blocked);
    let fields = updated_task.task.as_ref().unwrap();
    assert!(fields
        .blocked_reason
        .as_ref()
        .unwrap()
        .contains("database"));

    let updated_worker = store.get_worker(worker.id).await.unwrap();
    assert_eq!(updated_worker.status, WorkerStatus::Idle);
    assert_eq!(updated_worker.tasks_completed, 0);
    assert_eq!(updated_worker.tasks_failed, 0);
}

/// Scenario: worker unavailability. A generic worker pointed at a binary
/// that does not exist on `PATH` should fail the task immediately, with no
/// retry scheduling attempted on this first failure's classification path
/// differing from a session failure only in its reason text.
#[tokio::test]
async fn scenario_worker_binary_not_on_path_fails_without_spawning() {
    let (executor, store, _project, mut worker, task) =
        setup("unused", &[]).await;
    worker.launch_template.command = "ringmaster-nonexistent-binary-xyz".into();
    let worker = store.update_worker(worker).await.unwrap();

    executor.execute_task(&task.id, worker.id).await.unwrap();

    let updated_task = store.get_bead(&task.id).await.unwrap();
    // attempts=1 < max_attempts=5, so it is rescheduled rather than failed.
    assert_eq!(updated_task.status, BeadStatus::Ready);
    let fields = updated_task.task.as_ref().unwrap();
    assert_eq!(
        fields.last_failure_reason.as_deref(),
        Some("worker binary not found on PATH")
    );
}
