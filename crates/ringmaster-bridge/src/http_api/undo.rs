use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::json;

use ringmaster_core::event::{Event, EventKind};
use ringmaster_core::store::ActionRepository;
use ringmaster_core::undo_log;
use uuid::Uuid;

use super::state::ApiState;
use crate::api_error::ApiError;

#[derive(Debug, Deserialize)]
pub(crate) struct ProjectScopedQuery {
    project_id: Option<Uuid>,
}

/// GET /api/undo/history
pub(crate) async fn undo_history(
    State(state): State<ApiState>,
    axum::extract::Query(query): axum::extract::Query<ProjectScopedQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let last_undoable = state.store.get_last_undoable(query.project_id).await?;
    let last_redoable = state.store.get_last_redoable(query.project_id).await?;
    Ok(Json(json!({
        "last_undoable": last_undoable,
        "last_redoable": last_redoable,
    })))
}

/// POST /api/undo
pub(crate) async fn perform_undo(
    State(state): State<ApiState>,
    axum::extract::Query(query): axum::extract::Query<ProjectScopedQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let action = undo_log::undo(&state.store, query.project_id)
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    state.event_bus.publish(Event::new(
        EventKind::UndoPerformed,
        json!(action),
        action.project_id,
    ));
    Ok(Json(json!(action)))
}

/// POST /api/undo/redo
pub(crate) async fn perform_redo(
    State(state): State<ApiState>,
    axum::extract::Query(query): axum::extract::Query<ProjectScopedQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let action = undo_log::redo(&state.store, query.project_id)
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    state.event_bus.publish(Event::new(
        EventKind::RedoPerformed,
        json!(action),
        action.project_id,
    ));
    Ok(Json(json!(action)))
}
