//! Append-only action log with inverse operations per entity type (C12).
//!
//! Driven entirely by the `ActionRepository` half of the Store; this module
//! adds the inverse-operation table and the `undo`/`redo` entry points on
//! top of it.

use thiserror::Error;
use uuid::Uuid;

use crate::store::{ActionRepository, BeadRepository, DependencyRepository, StoreError, WorkerRepository};
use crate::types::{Action, ActionType, Dependency, EntityType};

#[derive(Debug, Error)]
pub enum UndoError {
    #[error("no undoable action")]
    NothingToUndo,
    #[error("no redoable action")]
    NothingToRedo,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("integrity error applying inverse operation: {0}")]
    Integrity(String),
}

/// Every mutating API operation should call this to append an `Action`
/// record before or after the mutation (callers choose ordering; the log
/// itself makes no atomicity claim across the pair).
pub async fn record<S>(
    store: &S,
    action_type: ActionType,
    entity_type: EntityType,
    entity_id: impl Into<String>,
    previous_state: Option<serde_json::Value>,
    new_state: Option<serde_json::Value>,
    project_id: Option<Uuid>,
    actor: impl Into<String>,
) -> Result<Action, UndoError>
where
    S: ActionRepository,
{
    let action = Action {
        id: Uuid::new_v4(),
        action_type,
        entity_type,
        entity_id: entity_id.into(),
        previous_state,
        new_state,
        project_id,
        actor: actor.into(),
        timestamp: chrono::Utc::now(),
        undone: false,
    };
    Ok(store.record_action(action).await?)
}

/// Apply the inverse of the most recent undoable action, atomically, and
/// mark it `undone = true`.
pub async fn undo<S>(store: &S, project_id: Option<Uuid>) -> Result<Action, UndoError>
where
    S: ActionRepository + BeadRepository + WorkerRepository + DependencyRepository,
{
    let action = store
        .get_last_undoable(project_id)
        .await?
        .ok_or(UndoError::NothingToUndo)?;

    apply_inverse(store, &action).await?;
    Ok(store.mark_undone(action.id, true).await?)
}

/// Re-apply the new state of the most recent redoable action and clear its
/// `undone` flag.
pub async fn redo<S>(store: &S, project_id: Option<Uuid>) -> Result<Action, UndoError>
where
    S: ActionRepository + BeadRepository + WorkerRepository + DependencyRepository,
{
    let action = store
        .get_last_redoable(project_id)
        .await?
        .ok_or(UndoError::NothingToRedo)?;

    apply_forward(store, &action).await?;
    Ok(store.mark_undone(action.id, false).await?)
}

/// Inverse-operation table per `(entity_type, action_type)`:
/// - task create ↔ delete
/// - update ↔ restore previous_state
/// - dependency create ↔ remove
/// - worker assignment ↔ restore previous worker+status
async fn apply_inverse<S>(store: &S, action: &Action) -> Result<(), UndoError>
where
    S: BeadRepository + WorkerRepository + DependencyRepository,
{
    match (action.entity_type, action.action_type) {
        (EntityType::Task, ActionType::Create) => {
            store.delete_bead(&action.entity_id).await?;
        }
        (EntityType::Task, ActionType::Update) | (EntityType::Task, ActionType::Assign) => {
            let previous = action
                .previous_state
                .as_ref()
                .ok_or_else(|| UndoError::Integrity("missing previous_state for task update".into()))?;
            let bead: crate::types::Bead = serde_json::from_value(previous.clone())
                .map_err(|e| UndoError::Integrity(e.to_string()))?;
            store.update_bead(bead).await?;
        }
        (EntityType::Task, ActionType::Delete) => {
            let previous = action
                .previous_state
                .as_ref()
                .ok_or_else(|| UndoError::Integrity("missing previous_state for task delete".into()))?;
            let bead: crate::types::Bead = serde_json::from_value(previous.clone())
                .map_err(|e| UndoError::Integrity(e.to_string()))?;
            store.create_bead(bead).await?;
        }
        (EntityType::Dependency, ActionType::Create) => {
            let dep: Dependency = action
                .new_state
                .as_ref()
                .ok_or_else(|| UndoError::Integrity("missing new_state for dependency create".into()))
                .and_then(|v| serde_json::from_value(v.clone()).map_err(|e| UndoError::Integrity(e.to_string())))?;
            store.remove_dependency(&dep.child_id, &dep.parent_id).await?;
        }
        (EntityType::Dependency, ActionType::Delete) => {
            let dep: Dependency = action
                .previous_state
                .as_ref()
                .ok_or_else(|| UndoError::Integrity("missing previous_state for dependency delete".into()))
                .and_then(|v| serde_json::from_value(v.clone()).map_err(|e| UndoError::Integrity(e.to_string())))?;
            store.add_dependency(dep).await?;
        }
        (EntityType::Worker, ActionType::Update) | (EntityType::Worker, ActionType::Assign) => {
            let previous = action
                .previous_state
                .as_ref()
                .ok_or_else(|| UndoError::Integrity("missing previous_state for worker update".into()))?;
            let worker: crate::types::Worker = serde_json::from_value(previous.clone())
                .map_err(|e| UndoError::Integrity(e.to_string()))?;
            store.update_worker(worker).await?;
        }
        (EntityType::Worker, ActionType::Create) => {
            let worker: crate::types::Worker = action
                .new_state
                .as_ref()
                .ok_or_else(|| UndoError::Integrity("missing new_state for worker create".into()))
                .and_then(|v| serde_json::from_value(v.clone()).map_err(|e| UndoError::Integrity(e.to_string())))?;
            store.delete_worker(worker.id).await?;
        }
        (EntityType::Worker, ActionType::Delete) => {
            let worker: crate::types::Worker = action
                .previous_state
                .as_ref()
                .ok_or_else(|| UndoError::Integrity("missing previous_state for worker delete".into()))
                .and_then(|v| serde_json::from_value(v.clone()).map_err(|e| UndoError::Integrity(e.to_string())))?;
            store.create_worker(worker).await?;
        }
        (EntityType::Dependency, ActionType::Assign) => {
            return Err(UndoError::Integrity("dependencies are never 'assigned'".into()));
        }
    }
    Ok(())
}

async fn apply_forward<S>(store: &S, action: &Action) -> Result<(), UndoError>
where
    S: BeadRepository + WorkerRepository + DependencyRepository,
{
    match (action.entity_type, action.action_type) {
        (EntityType::Task, ActionType::Create) => {
            let bead: crate::types::Bead = action
                .new_state
                .as_ref()
                .ok_or_else(|| UndoError::Integrity("missing new_state for task create".into()))
                .and_then(|v| serde_json::from_value(v.clone()).map_err(|e| UndoError::Integrity(e.to_string())))?;
            store.create_bead(bead).await?;
        }
        (EntityType::Task, ActionType::Update) | (EntityType::Task, ActionType::Assign) => {
            let bead: crate::types::Bead = action
                .new_state
                .as_ref()
                .ok_or_else(|| UndoError::Integrity("missing new_state for task update".into()))
                .and_then(|v| serde_json::from_value(v.clone()).map_err(|e| UndoError::Integrity(e.to_string())))?;
            store.update_bead(bead).await?;
        }
        (EntityType::Task, ActionType::Delete) => {
            store.delete_bead(&action.entity_id).await?;
        }
        (EntityType::Dependency, ActionType::Create) => {
            let dep: Dependency = action
                .new_state
                .as_ref()
                .ok_or_else(|| UndoError::Integrity("missing new_state for dependency create".into()))
                .and_then(|v| serde_json::from_value(v.clone()).map_err(|e| UndoError::Integrity(e.to_string())))?;
            store.add_dependency(dep).await?;
        }
        (EntityType::Dependency, ActionType::Delete) => {
            let dep: Dependency = action
                .previous_state
                .as_ref()
                .ok_or_else(|| UndoError::Integrity("missing previous_state for dependency delete".into()))
                .and_then(|v| serde_json::from_value(v.clone()).map_err(|e| UndoError::Integrity(e.to_string())))?;
            store.remove_dependency(&dep.child_id, &dep.parent_id).await?;
        }
        (EntityType::Worker, ActionType::Create) => {
            let worker: crate::types::Worker = action
                .new_state
                .as_ref()
                .ok_or_else(|| UndoError::Integrity("missing new_state for worker create".into()))
                .and_then(|v| serde_json::from_value(v.clone()).map_err(|e| UndoError::Integrity(e.to_string())))?;
            store.create_worker(worker).await?;
        }
        (EntityType::Worker, ActionType::Update) | (EntityType::Worker, ActionType::Assign) => {
            let worker: crate::types::Worker = action
                .new_state
                .as_ref()
                .ok_or_else(|| UndoError::Integrity("missing new_state for worker update".into()))
                .and_then(|v| serde_json::from_value(v.clone()).map_err(|e| UndoError::Integrity(e.to_string())))?;
            store.update_worker(worker).await?;
        }
        (EntityType::Worker, ActionType::Delete) => {
            store.delete_worker(Uuid::parse_str(&action.entity_id).map_err(|e| UndoError::Integrity(e.to_string()))?).await?;
        }
        (EntityType::Dependency, ActionType::Assign) => {
            return Err(UndoError::Integrity("dependencies are never 'assigned'".into()));
        }
    }
    Ok(())
}
