//! Transactional repository layer (C1).
//!
//! Every other component reaches persistent state only through the
//! repository traits defined here — never through ad-hoc SQL or shared
//! mutable structs. `InMemoryStore` is the one backing implementation
//! shipped in this workspace; it satisfies every invariant a durable
//! sqlite-backed store would also have to satisfy, guarded by a single
//! `tokio::sync::RwLock` so each mutation commits before the call returns.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{
    Action, Bead, BeadStatus, ChatMessage, ContextAssemblyLog, Dependency, EntityType, Project,
    SessionMetric, Summary, TaskOutcome, Worker, WorkerStatus,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("conflicting write on {entity} {id}")]
    ConflictingWrite { entity: &'static str, id: String },
    #[error("integrity violation: {reason}")]
    IntegrityViolation { reason: String },
    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Repository traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn create_project(&self, project: Project) -> StoreResult<Project>;
    async fn get_project(&self, id: Uuid) -> StoreResult<Project>;
    async fn update_project(&self, project: Project) -> StoreResult<Project>;
    async fn delete_project(&self, id: Uuid) -> StoreResult<()>;
    async fn list_projects(&self) -> StoreResult<Vec<Project>>;
}

#[async_trait]
pub trait BeadRepository: Send + Sync {
    async fn create_bead(&self, bead: Bead) -> StoreResult<Bead>;
    async fn get_bead(&self, id: &str) -> StoreResult<Bead>;
    async fn update_bead(&self, bead: Bead) -> StoreResult<Bead>;
    async fn delete_bead(&self, id: &str) -> StoreResult<()>;
    async fn list_beads(&self, project_id: Option<Uuid>) -> StoreResult<Vec<Bead>>;

    /// `get_ready_tasks(project?)` — §4.1. Tasks/subtasks with
    /// `status = READY`, no unmet parent dependency, `retry_after` null or
    /// past, ordered by `combined_priority DESC, created_at ASC`.
    async fn get_ready_tasks(&self, project_id: Option<Uuid>) -> StoreResult<Vec<Bead>>;
}

#[async_trait]
pub trait DependencyRepository: Send + Sync {
    /// Fails with `IntegrityViolation` on self-loop or cycle.
    async fn add_dependency(&self, dependency: Dependency) -> StoreResult<Dependency>;
    async fn remove_dependency(&self, child_id: &str, parent_id: &str) -> StoreResult<()>;
    async fn list_dependencies(&self, bead_id: &str) -> StoreResult<Vec<Dependency>>;
    async fn all_dependencies(&self) -> StoreResult<Vec<Dependency>>;
}

#[async_trait]
pub trait WorkerRepository: Send + Sync {
    async fn create_worker(&self, worker: Worker) -> StoreResult<Worker>;
    async fn get_worker(&self, id: Uuid) -> StoreResult<Worker>;
    async fn update_worker(&self, worker: Worker) -> StoreResult<Worker>;
    async fn delete_worker(&self, id: Uuid) -> StoreResult<()>;
    async fn list_workers(&self) -> StoreResult<Vec<Worker>>;

    /// `get_capable_workers(required)` — §4.1. Workers whose capability set
    /// is a superset of `required`, in IDLE status.
    async fn get_capable_workers(
        &self,
        required: &crate::types::CapabilitySet,
    ) -> StoreResult<Vec<Worker>>;

    /// Assignment is a mutual binding committed in one transaction:
    /// `worker.current_task_id = bead.id ∧ bead.worker_id = worker.id`.
    async fn assign(&self, worker_id: Uuid, bead_id: &str) -> StoreResult<(Worker, Bead)>;
}

#[async_trait]
pub trait ChatRepository: Send + Sync {
    async fn append_message(&self, message: ChatMessage) -> StoreResult<ChatMessage>;
    async fn list_messages(
        &self,
        project_id: Uuid,
        task_id: Option<&str>,
    ) -> StoreResult<Vec<ChatMessage>>;
    async fn add_summary(&self, summary: Summary) -> StoreResult<Summary>;
    async fn list_summaries(
        &self,
        project_id: Uuid,
        task_id: Option<&str>,
    ) -> StoreResult<Vec<Summary>>;
}

#[async_trait]
pub trait ActionRepository: Send + Sync {
    async fn record_action(&self, action: Action) -> StoreResult<Action>;
    async fn get_last_undoable(&self, project_id: Option<Uuid>) -> StoreResult<Option<Action>>;
    async fn get_last_redoable(&self, project_id: Option<Uuid>) -> StoreResult<Option<Action>>;
    async fn mark_undone(&self, id: Uuid, undone: bool) -> StoreResult<Action>;
}

#[async_trait]
pub trait OutcomeRepository: Send + Sync {
    async fn record_outcome(&self, outcome: TaskOutcome) -> StoreResult<()>;
    async fn list_outcomes(&self) -> StoreResult<Vec<TaskOutcome>>;
    async fn record_metric(&self, metric: SessionMetric) -> StoreResult<()>;
    async fn record_assembly_log(&self, log: ContextAssemblyLog) -> StoreResult<()>;
}

/// Umbrella trait combining every repository; components depend on this,
/// never on a concrete struct.
pub trait Store:
    ProjectRepository
    + BeadRepository
    + DependencyRepository
    + WorkerRepository
    + ChatRepository
    + ActionRepository
    + OutcomeRepository
{
}

impl<T> Store for T where
    T: ProjectRepository
        + BeadRepository
        + DependencyRepository
        + WorkerRepository
        + ChatRepository
        + ActionRepository
        + OutcomeRepository
{
}

// ---------------------------------------------------------------------------
// In-memory backing store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreState {
    projects: HashMap<Uuid, Project>,
    beads: HashMap<String, Bead>,
    dependencies: Vec<Dependency>,
    workers: HashMap<Uuid, Worker>,
    chat: BTreeMap<Uuid, Vec<ChatMessage>>,
    next_chat_id: HashMap<Uuid, u64>,
    summaries: BTreeMap<Uuid, Vec<Summary>>,
    actions: Vec<Action>,
    outcomes: Vec<TaskOutcome>,
    metrics: Vec<SessionMetric>,
    assembly_logs: Vec<ContextAssemblyLog>,
}

pub struct InMemoryStore {
    state: Arc<tokio::sync::RwLock<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(tokio::sync::RwLock::new(StoreState::default())),
        }
    }

    /// Would `(child, parent)` introduce a cycle in the dependency graph?
    fn introduces_cycle(deps: &[Dependency], child: &str, parent: &str) -> bool {
        if child == parent {
            return true;
        }
        // BFS from `parent` following parent-of edges; if we reach `child`
        // a cycle would be created by child -> parent.
        let mut frontier = vec![parent.to_string()];
        let mut seen = std::collections::HashSet::new();
        while let Some(node) = frontier.pop() {
            if node == child {
                return true;
            }
            if !seen.insert(node.clone()) {
                continue;
            }
            for dep in deps {
                if dep.child_id == node {
                    frontier.push(dep.parent_id.clone());
                }
            }
        }
        false
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for InMemoryStore {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

#[async_trait]
impl ProjectRepository for InMemoryStore {
    async fn create_project(&self, project: Project) -> StoreResult<Project> {
        let mut state = self.state.write().await;
        state.projects.insert(project.id, project.clone());
        Ok(project)
    }

    async fn get_project(&self, id: Uuid) -> StoreResult<Project> {
        let state = self.state.read().await;
        state
            .projects
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                entity: "project",
                id: id.to_string(),
            })
    }

    async fn update_project(&self, project: Project) -> StoreResult<Project> {
        let mut state = self.state.write().await;
        if !state.projects.contains_key(&project.id) {
            return Err(StoreError::NotFound {
                entity: "project",
                id: project.id.to_string(),
            });
        }
        state.projects.insert(project.id, project.clone());
        Ok(project)
    }

    async fn delete_project(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state
            .projects
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound {
                entity: "project",
                id: id.to_string(),
            })
    }

    async fn list_projects(&self) -> StoreResult<Vec<Project>> {
        let state = self.state.read().await;
        Ok(state.projects.values().cloned().collect())
    }
}

#[async_trait]
impl BeadRepository for InMemoryStore {
    async fn create_bead(&self, bead: Bead) -> StoreResult<Bead> {
        bead.check_invariants()
            .map_err(|reason| StoreError::IntegrityViolation { reason })?;
        let mut state = self.state.write().await;
        if state.beads.contains_key(&bead.id) {
            return Err(StoreError::ConflictingWrite {
                entity: "bead",
                id: bead.id.clone(),
            });
        }
        state.beads.insert(bead.id.clone(), bead.clone());
        Ok(bead)
    }

    async fn get_bead(&self, id: &str) -> StoreResult<Bead> {
        let state = self.state.read().await;
        state.beads.get(id).cloned().ok_or(StoreError::NotFound {
            entity: "bead",
            id: id.to_string(),
        })
    }

    async fn update_bead(&self, bead: Bead) -> StoreResult<Bead> {
        bead.check_invariants()
            .map_err(|reason| StoreError::IntegrityViolation { reason })?;
        let mut state = self.state.write().await;
        if !state.beads.contains_key(&bead.id) {
            return Err(StoreError::NotFound {
                entity: "bead",
                id: bead.id.clone(),
            });
        }
        state.beads.insert(bead.id.clone(), bead.clone());
        Ok(bead)
    }

    async fn delete_bead(&self, id: &str) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state
            .beads
            .remove(id)
            .map(|_| ())
            .ok_or(StoreError::NotFound {
                entity: "bead",
                id: id.to_string(),
            })
    }

    async fn list_beads(&self, project_id: Option<Uuid>) -> StoreResult<Vec<Bead>> {
        let state = self.state.read().await;
        Ok(state
            .beads
            .values()
            .filter(|b| project_id.map(|p| p == b.project_id).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn get_ready_tasks(&self, project_id: Option<Uuid>) -> StoreResult<Vec<Bead>> {
        let state = self.state.read().await;
        let now = Utc::now();

        let done_ids: std::collections::HashSet<&str> = state
            .beads
            .values()
            .filter(|b| b.status == BeadStatus::Done)
            .map(|b| b.id.as_str())
            .collect();

        let mut ready: Vec<Bead> = state
            .beads
            .values()
            .filter(|b| b.status == BeadStatus::Ready && b.is_task_like())
            .filter(|b| project_id.map(|p| p == b.project_id).unwrap_or(true))
            .filter(|b| {
                let unmet = state
                    .dependencies
                    .iter()
                    .filter(|d| d.child_id == b.id)
                    .any(|d| !done_ids.contains(d.parent_id.as_str()));
                !unmet
            })
            .filter(|b| {
                b.task
                    .as_ref()
                    .and_then(|t| t.retry_after)
                    .map(|at| at <= now)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        ready.sort_by(|a, b| {
            let pa = a.task.as_ref().map(|t| t.combined_priority).unwrap_or(0.0);
            let pb = b.task.as_ref().map(|t| t.combined_priority).unwrap_or(0.0);
            pb.partial_cmp(&pa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(ready)
    }
}

#[async_trait]
impl DependencyRepository for InMemoryStore {
    async fn add_dependency(&self, dependency: Dependency) -> StoreResult<Dependency> {
        let mut state = self.state.write().await;
        if Self::introduces_cycle(&state.dependencies, &dependency.child_id, &dependency.parent_id)
        {
            return Err(StoreError::IntegrityViolation {
                reason: format!(
                    "dependency {} -> {} introduces a cycle",
                    dependency.child_id, dependency.parent_id
                ),
            });
        }
        if state
            .dependencies
            .iter()
            .any(|d| d.child_id == dependency.child_id && d.parent_id == dependency.parent_id)
        {
            return Err(StoreError::ConflictingWrite {
                entity: "dependency",
                id: format!("{}->{}", dependency.child_id, dependency.parent_id),
            });
        }
        state.dependencies.push(dependency.clone());
        Ok(dependency)
    }

    async fn remove_dependency(&self, child_id: &str, parent_id: &str) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let before = state.dependencies.len();
        state
            .dependencies
            .retain(|d| !(d.child_id == child_id && d.parent_id == parent_id));
        if state.dependencies.len() == before {
            return Err(StoreError::NotFound {
                entity: "dependency",
                id: format!("{}->{}", child_id, parent_id),
            });
        }
        Ok(())
    }

    async fn list_dependencies(&self, bead_id: &str) -> StoreResult<Vec<Dependency>> {
        let state = self.state.read().await;
        Ok(state
            .dependencies
            .iter()
            .filter(|d| d.child_id == bead_id || d.parent_id == bead_id)
            .cloned()
            .collect())
    }

    async fn all_dependencies(&self) -> StoreResult<Vec<Dependency>> {
        let state = self.state.read().await;
        Ok(state.dependencies.clone())
    }
}

#[async_trait]
impl WorkerRepository for InMemoryStore {
    async fn create_worker(&self, worker: Worker) -> StoreResult<Worker> {
        let mut state = self.state.write().await;
        state.workers.insert(worker.id, worker.clone());
        Ok(worker)
    }

    async fn get_worker(&self, id: Uuid) -> StoreResult<Worker> {
        let state = self.state.read().await;
        state.workers.get(&id).cloned().ok_or(StoreError::NotFound {
            entity: "worker",
            id: id.to_string(),
        })
    }

    async fn update_worker(&self, worker: Worker) -> StoreResult<Worker> {
        let mut state = self.state.write().await;
        if !state.workers.contains_key(&worker.id) {
            return Err(StoreError::NotFound {
                entity: "worker",
                id: worker.id.to_string(),
            });
        }
        state.workers.insert(worker.id, worker.clone());
        Ok(worker)
    }

    async fn delete_worker(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state
            .workers
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound {
                entity: "worker",
                id: id.to_string(),
            })
    }

    async fn list_workers(&self) -> StoreResult<Vec<Worker>> {
        let state = self.state.read().await;
        Ok(state.workers.values().cloned().collect())
    }

    async fn get_capable_workers(
        &self,
        required: &crate::types::CapabilitySet,
    ) -> StoreResult<Vec<Worker>> {
        let state = self.state.read().await;
        Ok(state
            .workers
            .values()
            .filter(|w| w.status == WorkerStatus::Idle)
            .filter(|w| crate::types::capabilities_satisfy(&w.capabilities, required))
            .cloned()
            .collect())
    }

    async fn assign(&self, worker_id: Uuid, bead_id: &str) -> StoreResult<(Worker, Bead)> {
        let mut state = self.state.write().await;
        let mut worker = state
            .workers
            .get(&worker_id)
            .cloned()
            .ok_or(StoreError::NotFound {
                entity: "worker",
                id: worker_id.to_string(),
            })?;
        let mut bead = state.beads.get(bead_id).cloned().ok_or(StoreError::NotFound {
            entity: "bead",
            id: bead_id.to_string(),
        })?;
        if worker.status != WorkerStatus::Idle {
            return Err(StoreError::ConflictingWrite {
                entity: "worker",
                id: worker_id.to_string(),
            });
        }
        worker.status = WorkerStatus::Busy;
        worker.current_task_id = Some(bead_id.to_string());
        worker.last_active_at = Some(Utc::now());

        bead.status = BeadStatus::Assigned;
        if let Some(task) = bead.task.as_mut() {
            task.worker_id = Some(worker_id);
        }
        bead.updated_at = Utc::now();

        state.workers.insert(worker_id, worker.clone());
        state.beads.insert(bead_id.to_string(), bead.clone());
        Ok((worker, bead))
    }
}

#[async_trait]
impl ChatRepository for InMemoryStore {
    async fn append_message(&self, mut message: ChatMessage) -> StoreResult<ChatMessage> {
        let mut state = self.state.write().await;
        let next_id = state.next_chat_id.entry(message.project_id).or_insert(1);
        message.id = *next_id;
        *next_id += 1;
        state
            .chat
            .entry(message.project_id)
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn list_messages(
        &self,
        project_id: Uuid,
        task_id: Option<&str>,
    ) -> StoreResult<Vec<ChatMessage>> {
        let state = self.state.read().await;
        Ok(state
            .chat
            .get(&project_id)
            .map(|msgs| {
                msgs.iter()
                    .filter(|m| task_id.map(|t| m.task_id.as_deref() == Some(t)).unwrap_or(true))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn add_summary(&self, summary: Summary) -> StoreResult<Summary> {
        let mut state = self.state.write().await;
        let existing = state.summaries.entry(summary.project_id).or_default();
        let overlaps = existing.iter().any(|s| {
            s.task_id == summary.task_id
                && s.start_message_id <= summary.end_message_id
                && summary.start_message_id <= s.end_message_id
        });
        if overlaps {
            return Err(StoreError::IntegrityViolation {
                reason: "summary range overlaps an existing summary in this scope".into(),
            });
        }
        existing.push(summary.clone());
        Ok(summary)
    }

    async fn list_summaries(
        &self,
        project_id: Uuid,
        task_id: Option<&str>,
    ) -> StoreResult<Vec<Summary>> {
        let state = self.state.read().await;
        Ok(state
            .summaries
            .get(&project_id)
            .map(|s| {
                s.iter()
                    .filter(|s| task_id.map(|t| s.task_id.as_deref() == Some(t)).unwrap_or(true))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl ActionRepository for InMemoryStore {
    async fn record_action(&self, action: Action) -> StoreResult<Action> {
        let mut state = self.state.write().await;
        state.actions.push(action.clone());
        Ok(action)
    }

    async fn get_last_undoable(&self, project_id: Option<Uuid>) -> StoreResult<Option<Action>> {
        let state = self.state.read().await;
        Ok(state
            .actions
            .iter()
            .rev()
            .find(|a| !a.undone && project_id.map(|p| a.project_id == Some(p)).unwrap_or(true))
            .cloned())
    }

    async fn get_last_redoable(&self, project_id: Option<Uuid>) -> StoreResult<Option<Action>> {
        let state = self.state.read().await;
        // Most recent undone action with no newer non-undone action on the
        // same entity.
        for (idx, action) in state.actions.iter().enumerate().rev() {
            if !action.undone {
                continue;
            }
            if project_id.map(|p| action.project_id != Some(p)).unwrap_or(false) {
                continue;
            }
            let newer_conflict = state.actions[idx + 1..]
                .iter()
                .any(|a| a.entity_id == action.entity_id && !a.undone);
            if !newer_conflict {
                return Ok(Some(action.clone()));
            }
        }
        Ok(None)
    }

    async fn mark_undone(&self, id: Uuid, undone: bool) -> StoreResult<Action> {
        let mut state = self.state.write().await;
        let action = state
            .actions
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(StoreError::NotFound {
                entity: "action",
                id: id.to_string(),
            })?;
        action.undone = undone;
        Ok(action.clone())
    }
}

#[async_trait]
impl OutcomeRepository for InMemoryStore {
    async fn record_outcome(&self, outcome: TaskOutcome) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.outcomes.push(outcome);
        Ok(())
    }

    async fn list_outcomes(&self) -> StoreResult<Vec<TaskOutcome>> {
        let state = self.state.read().await;
        Ok(state.outcomes.clone())
    }

    async fn record_metric(&self, metric: SessionMetric) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.metrics.push(metric);
        Ok(())
    }

    async fn record_assembly_log(&self, log: ContextAssemblyLog) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.assembly_logs.push(log);
        Ok(())
    }
}

pub fn unknown_entity(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Task => "task",
        EntityType::Worker => "worker",
        EntityType::Dependency => "dependency",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BeadKind, BeadStatus, PLevel, TaskFields};

    fn project() -> Project {
        Project {
            id: Uuid::new_v4(),
            name: "P1".into(),
            description: "".into(),
            tech_stack: vec![],
            repo_path: Some("/tmp/r".into()),
            settings: Default::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn task_bead(project_id: Uuid, status: BeadStatus) -> Bead {
        Bead {
            id: Bead::new_id(),
            kind: BeadKind::Task,
            project_id,
            title: "Add helper".into(),
            description: "".into(),
            priority: PLevel::P2,
            status,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            started_at: None,
            completed_at: None,
            prompt_path: None,
            output_path: None,
            context_hash: None,
            task: Some(TaskFields::default()),
            epic: None,
        }
    }

    #[tokio::test]
    async fn ready_tasks_respects_dependencies() {
        let store = InMemoryStore::new();
        let p = project();
        store.create_project(p.clone()).await.unwrap();

        let t1 = task_bead(p.id, BeadStatus::Ready);
        let mut t2 = task_bead(p.id, BeadStatus::Ready);
        t2.task.as_mut().unwrap().parent_id = Some(t1.id.clone());

        store.create_bead(t1.clone()).await.unwrap();
        store.create_bead(t2.clone()).await.unwrap();
        store
            .add_dependency(Dependency {
                child_id: t2.id.clone(),
                parent_id: t1.id.clone(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let ready = store.get_ready_tasks(Some(p.id)).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, t1.id);

        let mut t1_done = store.get_bead(&t1.id).await.unwrap();
        t1_done.status = BeadStatus::Done;
        t1_done.completed_at = Some(Utc::now());
        store.update_bead(t1_done).await.unwrap();

        let ready = store.get_ready_tasks(Some(p.id)).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, t2.id);
    }

    #[tokio::test]
    async fn cyclic_dependency_rejected() {
        let store = InMemoryStore::new();
        let p = project();
        store.create_project(p.clone()).await.unwrap();
        let a = task_bead(p.id, BeadStatus::Draft);
        let b = task_bead(p.id, BeadStatus::Draft);
        store.create_bead(a.clone()).await.unwrap();
        store.create_bead(b.clone()).await.unwrap();

        store
            .add_dependency(Dependency {
                child_id: b.id.clone(),
                parent_id: a.id.clone(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let cyclic = store
            .add_dependency(Dependency {
                child_id: a.id.clone(),
                parent_id: b.id.clone(),
                created_at: Utc::now(),
            })
            .await;
        assert!(matches!(cyclic, Err(StoreError::IntegrityViolation { .. })));
    }

    #[tokio::test]
    async fn assignment_sets_mutual_binding() {
        let store = InMemoryStore::new();
        let p = project();
        store.create_project(p.clone()).await.unwrap();
        let bead = task_bead(p.id, BeadStatus::Ready);
        store.create_bead(bead.clone()).await.unwrap();

        let worker = Worker {
            id: Uuid::new_v4(),
            name: "w1".into(),
            worker_type: crate::types::WorkerType::ClaudeCode,
            status: WorkerStatus::Idle,
            current_task_id: None,
            launch_template: crate::types::LaunchTemplate {
                command: "claude".into(),
                args: vec![],
                prompt_flag: Some("-p".into()),
                working_dir: None,
                timeout_seconds: 1800,
                env: Default::default(),
            },
            capabilities: Default::default(),
            tasks_completed: 0,
            tasks_failed: 0,
            mean_completion_seconds: 0.0,
            last_active_at: None,
            created_at: Utc::now(),
        };
        store.create_worker(worker.clone()).await.unwrap();

        let (w, b) = store.assign(worker.id, &bead.id).await.unwrap();
        assert_eq!(w.current_task_id.as_deref(), Some(bead.id.as_str()));
        assert_eq!(b.task.unwrap().worker_id, Some(worker.id));
        assert_eq!(b.status, BeadStatus::Assigned);
    }
}
