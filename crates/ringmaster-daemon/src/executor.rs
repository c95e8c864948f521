//! Worker Executor (C8) — runs a single assigned bead end-to-end.
//!
//! Grounded on the teacher's `orchestrator.rs::TaskOrchestrator` (event
//! publishing style, worktree-then-session shape), restructured from a
//! multi-phase Discovery/Spec/Qa pipeline into SPEC_FULL.md §4.8's linear
//! twelve-step lifecycle: load project, mark in-progress, resolve a
//! worktree, assemble a prompt, spawn the worker variant, stream output
//! through the monitor, classify the outcome, persist it with backoff on
//! failure, and record metrics.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ringmaster_core::enrichment::{self, EnrichmentConfig, EnrichmentInputs};
use ringmaster_core::event::{Event, EventBus, EventKind};
use ringmaster_core::outcome_detector;
use ringmaster_core::output_buffer::OutputBuffer;
use ringmaster_core::reasoning_bank::{extract_keywords, ReasoningBank};
use ringmaster_core::store::{Store, StoreError};
use ringmaster_core::types::{
    Bead, BeadStatus, Outcome, Project, SessionConfig, SessionMetric, SessionStatus, TaskOutcome,
    Worker, WorkerStatus,
};
use ringmaster_core::worker_monitor::{RecoveryActionKind, WorkerMonitor};
use ringmaster_core::worktree_manager::WorktreeManager;
use ringmaster_session::pty_pool::PtyPool;
use ringmaster_session::worker_variant::{self, WorkerVariant};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::validator::{AlwaysPassValidator, ValidationResult, Validator};

pub const COMPLETION_SIGNAL: &str = outcome_detector::COMPLETION_SIGNAL;

/// Base/cap of the exponential retry backoff (SPEC_FULL.md §4.8 step 9):
/// 30s, 60s, 120s, 240s, 480s, … capped at 3600s.
const BACKOFF_BASE_SECONDS: i64 = 30;
const BACKOFF_CAP_SECONDS: i64 = 3600;

pub fn backoff_seconds(attempts: u32) -> i64 {
    let exponent = attempts.saturating_sub(1).min(20);
    let delay = BACKOFF_BASE_SECONDS.saturating_mul(1i64 << exponent);
    delay.min(BACKOFF_CAP_SECONDS)
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExecutorError>;

pub struct WorkerExecutor<S: Store + Clone + Send + Sync + 'static> {
    store: S,
    event_bus: EventBus,
    output_buffer: Arc<OutputBuffer>,
    pty_pool: Arc<PtyPool>,
    reasoning_bank: Arc<ReasoningBank>,
    output_dir: PathBuf,
    use_worktrees: bool,
    monitor_check_interval: std::time::Duration,
    enrichment_config: EnrichmentConfig,
    validator: Arc<dyn Validator>,
}

impl<S: Store + Clone + Send + Sync + 'static> WorkerExecutor<S> {
    pub fn new(
        store: S,
        event_bus: EventBus,
        output_buffer: Arc<OutputBuffer>,
        pty_pool: Arc<PtyPool>,
        reasoning_bank: Arc<ReasoningBank>,
    ) -> Self {
        let output_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ringmaster")
            .join("tasks");
        Self {
            store,
            event_bus,
            output_buffer,
            pty_pool,
            reasoning_bank,
            output_dir,
            use_worktrees: true,
            monitor_check_interval: std::time::Duration::from_secs(30),
            enrichment_config: EnrichmentConfig::default(),
            validator: Arc::new(AlwaysPassValidator),
        }
    }

    pub fn with_worktrees(mut self, enabled: bool) -> Self {
        self.use_worktrees = enabled;
        self
    }

    pub fn with_enrichment_config(mut self, config: EnrichmentConfig) -> Self {
        self.enrichment_config = config;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    fn publish(&self, kind: EventKind, project_id: Option<Uuid>, data: serde_json::Value) {
        self.event_bus.publish(Event {
            kind,
            data,
            project_id,
            timestamp: Utc::now(),
        });
    }

    /// Runs the full lifecycle of SPEC_FULL.md §4.8 for `task_id` assigned to
    /// `worker_id`. Assumes the scheduler has already performed the
    /// transactional READY->ASSIGNED / IDLE->BUSY pair update; this call
    /// owns the remainder: IN_PROGRESS through a terminal status.
    pub async fn execute_task(&self, task_id: &str, worker_id: Uuid) -> Result<()> {
        let mut task = self.store.get_bead(task_id).await?;
        let mut worker = self.store.get_worker(worker_id).await?;
        let project = self.store.get_project(task.project_id).await?;

        // Step 1: mark IN_PROGRESS, bump attempts.
        let now = Utc::now();
        task.status = BeadStatus::InProgress;
        task.started_at = Some(now);
        if let Some(fields) = task.task.as_mut() {
            fields.attempts += 1;
        }
        task.updated_at = now;
        task = self.store.update_bead(task).await?;

        // Step 2: mark worker BUSY (already ASSIGNED by the scheduler; this
        // just keeps `last_active_at` fresh for the first streamed line).
        worker.last_active_at = Some(now);
        worker = self.store.update_worker(worker).await?;

        self.publish(
            EventKind::TaskStarted,
            Some(project.id),
            serde_json::json!({"task_id": task.id, "worker_id": worker.id}),
        );

        let attempts = task.task.as_ref().map(|t| t.attempts).unwrap_or(1);

        // Step 3: resolve working directory.
        let (working_dir, worktree) = self.resolve_working_directory(&project, &worker, &task).await;

        // Step 4: assemble prompt, with a minimal fallback on failure.
        let (prompt, context_hash) = self.assemble_prompt_or_fallback(&project, &task, attempts).await;
        task.context_hash = Some(context_hash);
        let prompt_path = self
            .persist_iteration_artifact(&task.id, attempts, "prompt", &prompt)
            .await
            .unwrap_or(None);
        task.prompt_path = prompt_path;
        task = self.store.update_bead(task).await?;

        // Step 5: availability check.
        let variant = worker_variant::variant_for(worker.worker_type, &worker.launch_template);
        if !variant.is_available().await {
            return self
                .finish_failure(
                    task,
                    worker,
                    "worker binary not found on PATH".to_string(),
                    zero_duration_metric(worker_id, task_id, attempts),
                )
                .await;
        }

        // Step 6: start the session.
        let mut env_vars = worker.launch_template.env.clone();
        env_vars.extend(project.settings.extra.iter().filter_map(|(k, v)| {
            v.as_str().map(|s| (k.clone(), s.to_string()))
        }));
        let timeout_seconds = if worker.launch_template.timeout_seconds > 0 {
            worker.launch_template.timeout_seconds
        } else {
            worker.worker_type.default_timeout_seconds()
        };
        let session_config = SessionConfig {
            working_dir: working_dir.clone(),
            prompt: prompt.clone(),
            timeout_seconds,
            env_vars,
            completion_signal: COMPLETION_SIGNAL.to_string(),
        };

        let session_started = Utc::now();
        let mut handle = match variant.start_session(&self.pty_pool, &session_config).await {
            Ok(h) => h,
            Err(e) => {
                return self
                    .finish_failure(
                        task,
                        worker,
                        format!("failed to spawn worker session: {e}"),
                        self.metric(worker_id, task_id, attempts, session_started, Utc::now(), false, None),
                    )
                    .await;
            }
        };

        // Step 7: clear output buffer and stream.
        self.output_buffer.clear(worker_id).await;
        let mut monitor = WorkerMonitor::new();
        let mut interrupted_reason: Option<String> = None;
        let mut last_monitor_check = std::time::Instant::now();

        loop {
            let Some(line) = handle.stream_output().await else {
                break;
            };
            self.output_buffer.write(worker_id, line.clone()).await;
            monitor.record_output(&line);
            self.publish(
                EventKind::WorkerOutput,
                Some(project.id),
                serde_json::json!({"worker_id": worker_id, "line": line}),
            );

            if last_monitor_check.elapsed() >= self.monitor_check_interval {
                last_monitor_check = std::time::Instant::now();
                let action = monitor.recommend_recovery();
                match action.action {
                    RecoveryActionKind::None => {}
                    RecoveryActionKind::LogWarning => {
                        warn!(worker_id = %worker_id, reason = %action.reason, "worker monitor warning");
                    }
                    RecoveryActionKind::Interrupt => {
                        interrupted_reason = Some(action.reason);
                        break;
                    }
                    RecoveryActionKind::CheckpointRestart => {
                        interrupted_reason = Some(action.reason.clone());
                        self.publish(
                            EventKind::WorkerStatus,
                            Some(project.id),
                            serde_json::json!({"worker_id": worker_id, "degraded": true, "reason": action.reason}),
                        );
                        break;
                    }
                    RecoveryActionKind::Escalate => {
                        self.publish(
                            EventKind::WorkerStatus,
                            Some(project.id),
                            serde_json::json!({"worker_id": worker_id, "escalate": true, "reason": action.reason}),
                        );
                    }
                }
            }
        }

        // Step 8: await terminal result (or apply the interrupt).
        let session_result = if let Some(reason) = interrupted_reason {
            handle.interrupt(reason)
        } else {
            handle.wait().await
        };
        let session_ended = Utc::now();

        self.persist_iteration_artifact(&task.id, attempts, "iteration", &session_result.output)
            .await
            .ok();

        let outcome = if session_result.status == SessionStatus::Interrupted {
            outcome_detector::OutcomeResult {
                outcome: Outcome::Failure,
                confidence: 0.0,
                reason: "interrupted by monitor".to_string(),
                decision_question: None,
            }
        } else {
            outcome_detector::classify(&session_result.output, session_result.exit_code)
        };

        let metric = self.metric(
            worker_id,
            task_id,
            attempts,
            session_started,
            session_ended,
            outcome.is_success(),
            Some(outcome.clone()),
        );

        let _ = working_dir;
        // Step 9-10: persist outcome, return worker to IDLE.
        self.finish_outcome(task, worker, outcome, metric, worktree).await
    }

    async fn resolve_working_directory(
        &self,
        project: &Project,
        worker: &Worker,
        task: &Bead,
    ) -> (String, Option<ringmaster_core::worktree_manager::WorkerWorktree>) {
        let fallback = worker
            .launch_template
            .working_dir
            .clone()
            .or_else(|| project.repo_path.clone())
            .unwrap_or_else(|| ".".to_string());

        if !self.use_worktrees || !project.settings.worktrees_enabled {
            return (fallback, None);
        }
        let Some(repo_path) = &project.repo_path else {
            return (fallback, None);
        };

        let manager = WorktreeManager::new(repo_path.clone());
        match manager
            .get_or_create_worktree(&worker.id.to_string(), Some(task.id.as_str()), &project.settings.base_branch)
            .await
        {
            Ok(wt) => {
                let path = wt.path.clone();
                (path, Some(wt))
            }
            Err(e) => {
                warn!(error = %e, "worktree creation failed, running without isolation");
                (fallback, None)
            }
        }
    }

    async fn assemble_prompt_or_fallback(
        &self,
        project: &Project,
        task: &Bead,
        attempts: u32,
    ) -> (String, String) {
        let inputs = self.gather_enrichment_inputs(project, task).await;
        let (assembled, sections) =
            enrichment::assemble_prompt(project, task, attempts, &inputs, &self.enrichment_config);

        if self.enrichment_config.log_assembly {
            let log = enrichment::build_assembly_log(
                project.id,
                task,
                &assembled,
                &sections,
                self.enrichment_config.max_context_tokens as u32,
            );
            if let Err(e) = self.store.record_assembly_log(log).await {
                warn!(error = %e, "failed to record context assembly log");
            }
        }

        let prompt = format!("{}\n---\n{}", assembled.system_prompt, assembled.user_prompt);
        (prompt, assembled.context_hash)
    }

    async fn gather_enrichment_inputs(&self, project: &Project, task: &Bead) -> EnrichmentInputs {
        let chat_messages = self
            .store
            .list_messages(project.id, None)
            .await
            .unwrap_or_default();
        let existing_summaries = self
            .store
            .list_summaries(project.id, None)
            .await
            .unwrap_or_default();
        let completed_tasks = self
            .store
            .list_beads(Some(project.id))
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|b| b.status == BeadStatus::Done && b.id != task.id)
            .collect();
        EnrichmentInputs {
            chat_messages,
            existing_summaries,
            completed_tasks,
            task_scoped_logs: Vec::new(),
            project_error_logs_24h: Vec::new(),
            gh_ci_status: None,
        }
    }

    async fn persist_iteration_artifact(
        &self,
        task_id: &str,
        attempt: u32,
        kind: &str,
        content: &str,
    ) -> Result<Option<String>> {
        let dir = self.output_dir.join(task_id);
        tokio::fs::create_dir_all(&dir).await?;
        let ext = if kind == "prompt" { "md" } else { "log" };
        let filename = format!("{kind}_{attempt:03}.{ext}");
        let path = dir.join(&filename);
        tokio::fs::write(&path, content).await?;
        Ok(path.to_str().map(ToString::to_string))
    }

    fn metric(
        &self,
        worker_id: Uuid,
        task_id: &str,
        iteration: u32,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        success: bool,
        outcome: Option<outcome_detector::OutcomeResult>,
    ) -> SessionMetric {
        let (outcome_tag, confidence, error) = match outcome {
            Some(o) => (o.outcome, o.confidence, (!o.is_success()).then_some(o.reason)),
            None => (Outcome::Failure, 0.0, Some("worker unavailable".to_string())),
        };
        SessionMetric {
            task_id: task_id.to_string(),
            worker_id,
            iteration,
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: 0.0,
            started_at,
            ended_at,
            success,
            error,
            outcome: outcome_tag,
            confidence,
        }
    }

    async fn finish_failure(
        &self,
        task: Bead,
        worker: Worker,
        reason: String,
        metric: SessionMetric,
    ) -> Result<()> {
        let outcome = outcome_detector::OutcomeResult {
            outcome: Outcome::Failure,
            confidence: 0.0,
            reason,
            decision_question: None,
        };
        self.finish_outcome(task, worker, outcome, metric, None).await
    }

    async fn finish_outcome(
        &self,
        mut task: Bead,
        mut worker: Worker,
        outcome: outcome_detector::OutcomeResult,
        metric: SessionMetric,
        worktree: Option<ringmaster_core::worktree_manager::WorkerWorktree>,
    ) -> Result<()> {
        let project_id = task.project_id;
        let now = Utc::now();
        let attempts = task.task.as_ref().map(|t| t.attempts).unwrap_or(1);
        let max_attempts = task.task.as_ref().map(|t| t.max_attempts).unwrap_or(5);

        match outcome.outcome {
            Outcome::Success => {
                task.status = BeadStatus::Review;
                task.completed_at = Some(now);
                if let Some(fields) = task.task.as_mut() {
                    fields.retry_after = None;
                    fields.last_failure_reason = None;
                }
                worker.tasks_completed += 1;
                self.publish(
                    EventKind::TaskCompleted,
                    Some(project_id),
                    serde_json::json!({"task_id": task.id, "outcome": "SUCCESS"}),
                );

                if let Some(wt) = &worktree {
                    let manager = WorktreeManager::new(
                        self.store
                            .get_project(project_id)
                            .await
                            .ok()
                            .and_then(|p| p.repo_path)
                            .unwrap_or_default(),
                    );
                    match manager.commit_worktree_changes(wt, &format!("ringmaster: {}", task.title)).await {
                        Ok(_) => {
                            if let Ok(status) = manager.get_worktree_status(wt).await {
                                info!(task_id = %task.id, branch = %status.branch, ahead = status.commits_ahead_of_main, "worktree status after completion");
                            }
                        }
                        Err(e) => warn!(error = %e, "failed to commit worktree changes"),
                    }
                }
            }
            Outcome::NeedsDecision => {
                task.status = BeadStatus::Blocked;
                if let Some(fields) = task.task.as_mut() {
                    fields.blocked_reason = outcome.decision_question.clone();
                }
                self.publish(
                    EventKind::TaskStatus,
                    Some(project_id),
                    serde_json::json!({
                        "task_id": task.id,
                        "status": "BLOCKED",
                        "needs_human_input": true,
                        "question": outcome.decision_question,
                    }),
                );
            }
            Outcome::Failure => {
                if let Some(fields) = task.task.as_mut() {
                    fields.last_failure_reason = Some(outcome.reason.clone());
                }
                if attempts >= max_attempts {
                    task.status = BeadStatus::Failed;
                } else {
                    task.status = BeadStatus::Ready;
                    let retry_after = now + chrono::Duration::seconds(backoff_seconds(attempts));
                    if let Some(fields) = task.task.as_mut() {
                        fields.retry_after = Some(retry_after);
                    }
                    self.publish(
                        EventKind::TaskRetry,
                        Some(project_id),
                        serde_json::json!({"task_id": task.id, "retry_after": retry_after, "attempts": attempts}),
                    );
                }
                worker.tasks_failed += 1;
            }
        }

        task.updated_at = now;
        if let Some(fields) = task.task.as_mut() {
            fields.worker_id = None;
        }
        worker.status = WorkerStatus::Idle;
        worker.current_task_id = None;
        worker.last_active_at = Some(now);
        if metric.started_at < metric.ended_at {
            let duration = (metric.ended_at - metric.started_at).num_milliseconds() as f64 / 1000.0;
            let n = (worker.tasks_completed + worker.tasks_failed).max(1) as f64;
            worker.mean_completion_seconds =
                ((worker.mean_completion_seconds * (n - 1.0)) + duration) / n;
        }

        self.store.update_bead(task.clone()).await?;
        self.store.update_worker(worker.clone()).await?;
        self.store.record_metric(metric.clone()).await.ok_or_log();

        let file_count = 0u32;
        let keywords = extract_keywords(&format!("{} {}", task.title, task.description));
        let has_dependencies = !self
            .store
            .list_dependencies(&task.id)
            .await
            .unwrap_or_default()
            .is_empty();
        let task_outcome = TaskOutcome {
            task_id: task.id.clone(),
            project_id,
            file_count,
            keywords,
            bead_kind: task.kind,
            has_dependencies,
            model_used: "unspecified".to_string(),
            worker_type: worker.worker_type,
            iterations: attempts,
            duration_seconds: (metric.ended_at - metric.started_at).num_milliseconds() as f64 / 1000.0,
            success: outcome.is_success(),
            outcome: outcome.outcome,
            confidence: outcome.confidence,
            failure_reason: if outcome.is_failure() { Some(outcome.reason.clone()) } else { None },
            reflection: reflection_for(&outcome),
            recorded_at: now,
        };
        self.reasoning_bank.record(task_outcome.clone()).await;
        if let Err(e) = self.store.record_outcome(task_outcome).await {
            warn!(error = %e, "reasoning-bank/store outcome write failed, not failing the task");
        }

        Ok(())
    }

    /// REVIEW -> DONE promotion (§4.8 closing paragraph). Runs the
    /// configured `Validator` against a bead currently in `REVIEW` and, on a
    /// pass, transitions it to `DONE`. Left as an explicit call rather than
    /// chained onto `execute_task` so the single-successful-task scenario
    /// (§8 scenario 1) still observes `REVIEW` as execution's terminal
    /// state; the external CLI/HTTP layer decides when to invoke this
    /// (automatically on a test-runner webhook, or manually), per §9's
    /// open-question resolution.
    pub async fn promote_reviewed_task(&self, task_id: &str) -> Result<ValidationResult> {
        let mut task = self.store.get_bead(task_id).await?;
        if task.status != BeadStatus::Review {
            return Ok(ValidationResult::fail(format!(
                "bead {} is not in REVIEW (status={:?})",
                task_id, task.status
            )));
        }

        let validation = self.validator.validate(&task).await;
        if validation.passed {
            task.status = BeadStatus::Done;
            task.completed_at = Some(Utc::now());
            self.store.update_bead(task.clone()).await?;
            self.publish(
                EventKind::TaskUpdated,
                Some(task.project_id),
                serde_json::json!({"task_id": task.id, "status": "DONE", "validation": validation.details}),
            );
        } else {
            warn!(task_id = %task.id, details = %validation.details, "validation failed, task stays in REVIEW");
        }
        Ok(validation)
    }
}

fn reflection_for(outcome: &outcome_detector::OutcomeResult) -> String {
    match outcome.outcome {
        Outcome::Success => "completed cleanly".to_string(),
        Outcome::NeedsDecision => format!("blocked pending decision: {}", outcome.reason),
        Outcome::Failure => format!("failed: {}", outcome.reason),
    }
}

trait ResultExt {
    fn ok_or_log(self);
}

impl ResultExt for std::result::Result<(), StoreError> {
    fn ok_or_log(self) {
        if let Err(e) = self {
            warn!(error = %e, "metrics write failed, not failing the task");
        }
    }
}

fn zero_duration_metric(worker_id: Uuid, task_id: &str, iteration: u32) -> SessionMetric {
    let now = Utc::now();
    SessionMetric {
        task_id: task_id.to_string(),
        worker_id,
        iteration,
        input_tokens: 0,
        output_tokens: 0,
        cost_usd: 0.0,
        started_at: now,
        ended_at: now,
        success: false,
        error: Some("worker unavailable".to_string()),
        outcome: Outcome::Failure,
        confidence: 0.0,
    }
}
