//! Scheduler (C10) — the cooperative poll loop that matches ready beads to
//! idle workers under a concurrency cap, spawns executors, and health-checks
//! in-flight work.
//!
//! Grounded on the teacher's `scheduler.rs::TaskScheduler` (the shape of
//! "pick the next backlog item, assign it, persist") generalized from a
//! single-shot picker into the full poll-loop/concurrency-cap/health-check
//! machine of SPEC_FULL.md §4.10, built on the new `Store`/`WorkerExecutor`
//! rather than the teacher's `CacheDb`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ringmaster_core::event::{Event, EventBus, EventKind};
use ringmaster_core::reasoning_bank::ReasoningBank;
use ringmaster_core::routing::prefer_worker;
use ringmaster_core::store::Store;
use ringmaster_core::types::{capabilities_satisfy, BeadStatus, Worker, WorkerStatus};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::executor::WorkerExecutor;

/// How long an IN_PROGRESS task may run with no tracked executor coroutine
/// before the scheduler considers it stuck (SPEC_FULL.md §4.10 step 3).
const DEFAULT_HEALTH_CHECK_GRACE: Duration = Duration::from_secs(120);

/// Minimum recorded outcomes before the reasoning bank's worker-type success
/// rate is trusted over the per-worker `tasks_completed`/`tasks_failed`
/// fallback (SPEC_FULL.md §4.11 default `min_samples`).
const MIN_WORKER_TYPE_SAMPLES: u32 = 3;

pub struct SchedulerConfig {
    pub max_concurrent_tasks: usize,
    pub poll_interval: Duration,
    pub health_check_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
            poll_interval: Duration::from_secs(2),
            health_check_grace: DEFAULT_HEALTH_CHECK_GRACE,
        }
    }
}

struct ActiveTask {
    worker_id: Uuid,
    handle: JoinHandle<()>,
    _permit: OwnedSemaphorePermit,
}

/// Owns the `active_tasks` map and the concurrency semaphore (SPEC_FULL.md
/// §9 design notes: executors never reach back into the scheduler).
pub struct Scheduler<S: Store + Clone + Send + Sync + 'static> {
    store: S,
    executor: Arc<WorkerExecutor<S>>,
    event_bus: EventBus,
    reasoning_bank: Arc<ReasoningBank>,
    config: SchedulerConfig,
    semaphore: Arc<Semaphore>,
    active_tasks: Arc<Mutex<HashMap<String, ActiveTask>>>,
    running: Arc<AtomicBool>,
}

impl<S: Store + Clone + Send + Sync + 'static> Scheduler<S> {
    pub fn new(
        store: S,
        executor: Arc<WorkerExecutor<S>>,
        event_bus: EventBus,
        reasoning_bank: Arc<ReasoningBank>,
        config: SchedulerConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_tasks));
        Self {
            store,
            executor,
            event_bus,
            reasoning_bank,
            config,
            semaphore,
            active_tasks: Arc::new(Mutex::new(HashMap::new())),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    fn publish(&self, kind: EventKind, project_id: Option<Uuid>, data: serde_json::Value) {
        self.event_bus.publish(Event::new(kind, data, project_id));
    }

    /// Runs the poll loop until [`Scheduler::stop`] is called. Intended to
    /// be spawned as its own task alongside the HTTP/WS surface.
    pub async fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        while self.running.load(Ordering::SeqCst) {
            ticker.tick().await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.health_check().await;
            if let Err(e) = self.poll_once().await {
                warn!(error = %e, "scheduler poll cycle failed");
            }
        }
    }

    /// One poll cycle: match ready beads to idle, capability-matched workers
    /// under the concurrency cap (SPEC_FULL.md §4.10 step 2).
    async fn poll_once(&self) -> Result<(), ringmaster_core::store::StoreError> {
        let ready = self.store.get_ready_tasks(None).await?;
        if ready.is_empty() {
            return Ok(());
        }
        let mut idle: Vec<Worker> = self
            .store
            .list_workers()
            .await?
            .into_iter()
            .filter(|w| w.status == WorkerStatus::Idle)
            .collect();

        for task in ready {
            if idle.is_empty() {
                break;
            }
            if self.semaphore.available_permits() == 0 {
                break;
            }
            let required = task
                .task
                .as_ref()
                .map(|t| t.required_capabilities.clone())
                .unwrap_or_default();
            let eligible: Vec<Worker> = idle
                .iter()
                .filter(|w| capabilities_satisfy(&w.capabilities, &required))
                .cloned()
                .collect();
            if eligible.is_empty() {
                continue;
            }
            let worker_type_rates = self
                .reasoning_bank
                .get_worker_type_success_rates(MIN_WORKER_TYPE_SAMPLES)
                .await;
            let success_rates: std::collections::BTreeMap<Uuid, f64> = eligible
                .iter()
                .map(|w| {
                    // Reasoning bank's historical rate wins when it has
                    // enough samples for this worker type; otherwise fall
                    // back to this worker's own completed/failed counters
                    // (SPEC_FULL.md §4.9).
                    let rate = worker_type_rates.get(&w.worker_type).copied().unwrap_or_else(|| {
                        let total = w.tasks_completed + w.tasks_failed;
                        if total > 0 {
                            w.tasks_completed as f64 / total as f64
                        } else {
                            0.0
                        }
                    });
                    (w.id, rate)
                })
                .collect();
            let Some(chosen) = prefer_worker(&eligible, &success_rates).cloned() else {
                continue;
            };

            let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
                break;
            };

            idle.retain(|w| w.id != chosen.id);

            match self.store.assign(chosen.id, &task.id).await {
                Ok((worker, bead)) => {
                    self.publish(
                        EventKind::WorkerUpdated,
                        Some(bead.project_id),
                        serde_json::json!({"worker_id": worker.id, "status": "BUSY"}),
                    );
                    self.spawn_executor(bead.id.clone(), worker.id, bead.project_id, permit)
                        .await;
                }
                Err(e) => {
                    warn!(task_id = %task.id, worker_id = %chosen.id, error = %e, "assignment failed, skipping this cycle");
                }
            }
        }
        Ok(())
    }

    async fn spawn_executor(
        &self,
        task_id: String,
        worker_id: Uuid,
        project_id: Uuid,
        permit: OwnedSemaphorePermit,
    ) {
        let executor = Arc::clone(&self.executor);
        let active_tasks = Arc::clone(&self.active_tasks);
        let task_id_for_task = task_id.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = executor.execute_task(&task_id_for_task, worker_id).await {
                warn!(task_id = %task_id_for_task, error = %e, "executor failed");
            }
            active_tasks.lock().await.remove(&task_id_for_task);
        });

        self.publish(
            EventKind::TaskStarted,
            Some(project_id),
            serde_json::json!({"task_id": task_id, "worker_id": worker_id}),
        );
        self.active_tasks.lock().await.insert(
            task_id,
            ActiveTask {
                worker_id,
                handle,
                _permit: permit,
            },
        );
    }

    /// Any task IN_PROGRESS whose executor coroutine is absent (finished
    /// without updating the store, or never tracked after a restart) for
    /// longer than `health_check_grace` is stuck: the worker is marked
    /// OFFLINE and the task FAILED (SPEC_FULL.md §4.10 step 3).
    async fn health_check(&self) {
        let in_progress = match self.store.list_beads(None).await {
            Ok(beads) => beads
                .into_iter()
                .filter(|b| b.status == BeadStatus::InProgress)
                .collect::<Vec<_>>(),
            Err(_) => return,
        };
        let active = self.active_tasks.lock().await;
        let now = Utc::now();
        for mut task in in_progress {
            let tracked = active.get(&task.id);
            let stuck = match tracked {
                Some(entry) => entry.handle.is_finished(),
                None => task
                    .started_at
                    .map(|s| {
                        now.signed_duration_since(s).num_seconds()
                            > self.config.health_check_grace.as_secs() as i64
                    })
                    .unwrap_or(false),
            };
            if !stuck {
                continue;
            }
            let Some(worker_id) = task.task.as_ref().and_then(|t| t.worker_id) else {
                continue;
            };
            warn!(task_id = %task.id, worker_id = %worker_id, "health check: task stuck, marking FAILED");
            task.status = BeadStatus::Failed;
            task.updated_at = now;
            if let Some(fields) = task.task.as_mut() {
                fields.worker_id = None;
                fields.last_failure_reason = Some("executor coroutine absent (health check)".into());
            }
            if self.store.update_bead(task.clone()).await.is_ok() {
                if let Ok(mut worker) = self.store.get_worker(worker_id).await {
                    worker.status = WorkerStatus::Offline;
                    worker.current_task_id = None;
                    let _ = self.store.update_worker(worker).await;
                }
                self.publish(
                    EventKind::TaskStatus,
                    Some(task.project_id),
                    serde_json::json!({"task_id": task.id, "status": "FAILED", "reason": "stuck"}),
                );
            }
        }
    }

    /// Cancels every live executor coroutine, awaits them, and marks any
    /// still-running tasks FAILED and their workers OFFLINE. Idempotent.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut active = self.active_tasks.lock().await;
        let entries: Vec<(String, ActiveTask)> = active.drain().collect();
        drop(active);

        for (task_id, entry) in entries {
            entry.handle.abort();
            let _ = entry.handle.await;
            if let Ok(mut task) = self.store.get_bead(&task_id).await {
                if task.status == BeadStatus::InProgress || task.status == BeadStatus::Assigned {
                    task.status = BeadStatus::Failed;
                    task.updated_at = Utc::now();
                    if let Some(fields) = task.task.as_mut() {
                        fields.worker_id = None;
                        fields.last_failure_reason = Some("scheduler stopped".into());
                    }
                    let project_id = task.project_id;
                    if self.store.update_bead(task).await.is_ok() {
                        if let Ok(mut worker) = self.store.get_worker(entry.worker_id).await {
                            worker.status = WorkerStatus::Offline;
                            worker.current_task_id = None;
                            let _ = self.store.update_worker(worker).await;
                        }
                        self.publish(
                            EventKind::TaskCancelled,
                            Some(project_id),
                            serde_json::json!({"task_id": task_id}),
                        );
                    }
                }
            }
        }
        info!("scheduler stopped");
    }

    pub fn active_task_count(&self) -> usize {
        self.config.max_concurrent_tasks - self.semaphore.available_permits()
    }
}
