use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use ringmaster_core::event::{Event, EventKind};
use ringmaster_core::priority_graph;
use ringmaster_core::routing;
use ringmaster_core::store::{BeadRepository, DependencyRepository, WorkerRepository};
use ringmaster_core::types::{Bead, BeadKind, BeadStatus, Capability, Dependency, EpicFields, PLevel, TaskFields};
use ringmaster_core::undo_log;

use super::state::ApiState;
use crate::api_error::ApiError;

#[derive(Debug, Deserialize)]
pub(crate) struct ListQuery {
    project_id: Option<Uuid>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateTaskRequest {
    project_id: Uuid,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_kind")]
    kind: BeadKind,
    #[serde(default = "default_priority")]
    priority: PLevel,
    #[serde(default)]
    required_capabilities: Vec<String>,
    parent_id: Option<String>,
}

fn default_kind() -> BeadKind {
    BeadKind::Task
}

fn default_priority() -> PLevel {
    PLevel::P2
}

#[derive(Debug, Deserialize)]
pub(crate) struct UpdateTaskRequest {
    title: Option<String>,
    description: Option<String>,
    priority: Option<PLevel>,
    status: Option<BeadStatus>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AssignRequest {
    worker_id: Option<Uuid>,
}

/// GET /api/tasks
pub(crate) async fn list_tasks(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Bead>>, ApiError> {
    let mut beads = state.store.list_beads(query.project_id).await?;
    if let Some(status) = query.status {
        beads.retain(|b| format!("{:?}", b.status).eq_ignore_ascii_case(&status));
    }
    Ok(Json(beads))
}

/// POST /api/tasks
pub(crate) async fn create_task(
    State(state): State<ApiState>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title must not be empty".into()));
    }

    let now = chrono::Utc::now();
    let required_capabilities = req
        .required_capabilities
        .iter()
        .map(|c| Capability::new(c.clone()))
        .collect();

    let bead = Bead {
        id: Bead::new_id(),
        kind: req.kind,
        project_id: req.project_id,
        title: req.title,
        description: req.description,
        priority: req.priority,
        status: BeadStatus::Draft,
        created_at: now,
        updated_at: now,
        started_at: None,
        completed_at: None,
        prompt_path: None,
        output_path: None,
        context_hash: None,
        task: matches!(req.kind, BeadKind::Task | BeadKind::Subtask).then(|| TaskFields {
            required_capabilities,
            parent_id: req.parent_id.clone(),
            ..Default::default()
        }),
        epic: matches!(req.kind, BeadKind::Epic).then(EpicFields::default),
    };
    bead.check_invariants()
        .map_err(ApiError::BadRequest)?;

    let created = state.store.create_bead(bead).await?;

    if let Some(parent_id) = &req.parent_id {
        state
            .store
            .add_dependency(Dependency {
                child_id: created.id.clone(),
                parent_id: parent_id.clone(),
                created_at: now,
            })
            .await?;
    }

    state.event_bus.publish(Event::new(
        EventKind::TaskCreated,
        json!(created),
        Some(created.project_id),
    ));
    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

/// GET /api/tasks/{id}
pub(crate) async fn get_task(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Bead>, ApiError> {
    Ok(Json(state.store.get_bead(&id).await?))
}

/// PATCH /api/tasks/{id}
pub(crate) async fn update_task(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateTaskRequest>,
) -> Result<Json<Bead>, ApiError> {
    let mut bead = state.store.get_bead(&id).await?;
    let previous = json!(bead);

    if let Some(title) = req.title {
        if title.trim().is_empty() {
            return Err(ApiError::BadRequest("title must not be empty".into()));
        }
        bead.title = title;
    }
    if let Some(description) = req.description {
        bead.description = description;
    }
    if let Some(priority) = req.priority {
        bead.priority = priority;
    }
    if let Some(status) = req.status {
        if !bead.status.can_transition_to(status) {
            return Err(ApiError::BadRequest(format!(
                "cannot transition {:?} -> {:?}",
                bead.status, status
            )));
        }
        bead.status = status;
        if status == BeadStatus::Done {
            bead.completed_at = Some(chrono::Utc::now());
        }
    }
    bead.updated_at = chrono::Utc::now();

    let updated = state.store.update_bead(bead).await?;
    undo_log::record(
        &state.store,
        ringmaster_core::types::ActionType::Update,
        ringmaster_core::types::EntityType::Task,
        updated.id.clone(),
        Some(previous),
        Some(json!(updated)),
        Some(updated.project_id),
        "api",
    )
    .await
    .map_err(|e| ApiError::InternalError(e.to_string()))?;

    state.event_bus.publish(Event::new(
        EventKind::TaskUpdated,
        json!(updated),
        Some(updated.project_id),
    ));
    Ok(Json(updated))
}

/// DELETE /api/tasks/{id}
pub(crate) async fn delete_task(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let bead = state.store.get_bead(&id).await?;
    state.store.delete_bead(&id).await?;
    state.event_bus.publish(Event::new(
        EventKind::TaskDeleted,
        json!({"id": id}),
        Some(bead.project_id),
    ));
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// POST /api/tasks/{id}/assign -- `{worker_id: Uuid | null}`.
///
/// `worker_id: null` reverts the task to READY and clears any existing
/// binding (does not currently un-assign a different worker).
pub(crate) async fn assign_task(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<AssignRequest>,
) -> Result<Json<Bead>, ApiError> {
    let Some(worker_id) = req.worker_id else {
        let mut bead = state.store.get_bead(&id).await?;
        if !bead.status.can_transition_to(BeadStatus::Ready) {
            return Err(ApiError::BadRequest(format!(
                "cannot revert {:?} to READY",
                bead.status
            )));
        }
        bead.status = BeadStatus::Ready;
        bead.updated_at = chrono::Utc::now();
        if let Some(fields) = bead.task.as_mut() {
            fields.worker_id = None;
        }
        let updated = state.store.update_bead(bead).await?;
        return Ok(Json(updated));
    };

    let (_worker, bead) = state.store.assign(worker_id, &id).await?;
    state.event_bus.publish(Event::new(
        EventKind::TaskStarted,
        json!(bead),
        Some(bead.project_id),
    ));
    Ok(Json(bead))
}

/// POST /api/tasks/{id}/resubmit -- requeue a failed/blocked task.
pub(crate) async fn resubmit_task(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Bead>, ApiError> {
    let mut bead = state.store.get_bead(&id).await?;
    if !bead.status.can_transition_to(BeadStatus::Ready) {
        return Err(ApiError::BadRequest(format!(
            "cannot resubmit from {:?}",
            bead.status
        )));
    }
    bead.status = BeadStatus::Ready;
    bead.updated_at = chrono::Utc::now();
    if let Some(fields) = bead.task.as_mut() {
        fields.retry_after = None;
        fields.last_failure_reason = None;
    }
    let updated = state.store.update_bead(bead).await?;
    state.event_bus.publish(Event::new(
        EventKind::TaskResubmitted,
        json!(updated),
        Some(updated.project_id),
    ));
    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
pub(crate) struct BulkUpdateRequest {
    ids: Vec<String>,
    status: Option<BeadStatus>,
    priority: Option<PLevel>,
}

/// POST /api/tasks/bulk-update
pub(crate) async fn bulk_update(
    State(state): State<ApiState>,
    Json(req): Json<BulkUpdateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut updated_ids = Vec::new();
    for id in &req.ids {
        let Ok(mut bead) = state.store.get_bead(id).await else {
            continue;
        };
        if let Some(status) = req.status {
            if bead.status.can_transition_to(status) {
                bead.status = status;
            } else {
                continue;
            }
        }
        if let Some(priority) = req.priority {
            bead.priority = priority;
        }
        bead.updated_at = chrono::Utc::now();
        if state.store.update_bead(bead).await.is_ok() {
            updated_ids.push(id.clone());
        }
    }
    Ok(Json(json!({"updated": updated_ids})))
}

#[derive(Debug, Deserialize)]
pub(crate) struct BulkDeleteRequest {
    ids: Vec<String>,
}

/// POST /api/tasks/bulk-delete
pub(crate) async fn bulk_delete(
    State(state): State<ApiState>,
    Json(req): Json<BulkDeleteRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut deleted_ids = Vec::new();
    for id in &req.ids {
        if state.store.delete_bead(id).await.is_ok() {
            deleted_ids.push(id.clone());
        }
    }
    Ok(Json(json!({"deleted": deleted_ids})))
}

/// GET /api/tasks/{id}/dependencies
pub(crate) async fn list_dependencies(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Dependency>>, ApiError> {
    Ok(Json(state.store.list_dependencies(&id).await?))
}

/// POST /api/tasks/{id}/dependencies -- `{parent_id: String}`.
#[derive(Debug, Deserialize)]
pub(crate) struct AddDependencyRequest {
    parent_id: String,
}

pub(crate) async fn add_dependency(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<AddDependencyRequest>,
) -> Result<Json<Dependency>, ApiError> {
    let dep = state
        .store
        .add_dependency(Dependency {
            child_id: id.clone(),
            parent_id: req.parent_id,
            created_at: chrono::Utc::now(),
        })
        .await?;
    // Material graph change (§4.9): recompute and persist priority scores
    // for the affected project so `get_ready_tasks`'s ordering stays fresh.
    if let Ok(bead) = state.store.get_bead(&id).await {
        let _ = priority_graph::recompute_and_persist(&state.store, Some(bead.project_id)).await;
    }
    Ok(Json(dep))
}

/// DELETE /api/tasks/{id}/dependencies/{parent_id}
pub(crate) async fn remove_dependency(
    State(state): State<ApiState>,
    Path((id, parent_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let project_id = state.store.get_bead(&id).await.ok().map(|b| b.project_id);
    state.store.remove_dependency(&id, &parent_id).await?;
    if let Some(project_id) = project_id {
        let _ = priority_graph::recompute_and_persist(&state.store, Some(project_id)).await;
    }
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// POST /api/tasks/recompute-priority?project_id=... -- on-demand trigger
/// for the priority-graph recompute (§4.9), independent of any single
/// dependency mutation.
pub(crate) async fn recompute_priority(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let updated = priority_graph::recompute_and_persist(&state.store, query.project_id).await?;
    Ok(Json(json!({"updated": updated})))
}

#[derive(Debug, Deserialize)]
pub(crate) struct RoutingQuery {
    worker_type: Option<String>,
}

/// GET /api/tasks/{id}/routing?worker_type=...
///
/// Illustrative read-only view of the model-tier routing decision for this
/// task (§4.9), without committing an assignment.
pub(crate) async fn routing_for_task(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<RoutingQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let bead = state.store.get_bead(&id).await?;
    let deps = state.store.list_dependencies(&id).await?;
    let mut decision = routing::route(&bead, 0, deps.len() as u32);
    routing::request_model_for_worker_type(&mut decision, query.worker_type.as_deref());
    Ok(Json(json!(decision)))
}
