use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use ringmaster_core::event::{Event, EventKind};
use ringmaster_core::store::ChatRepository;
use ringmaster_core::types::{ChatMessage, ChatRole};

use super::state::ApiState;
use crate::api_error::ApiError;

#[derive(Debug, Deserialize)]
pub(crate) struct ListMessagesQuery {
    task_id: Option<String>,
}

/// GET /api/chat/projects/{id}/messages
pub(crate) async fn list_messages(
    State(state): State<ApiState>,
    Path(project_id): Path<Uuid>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    Ok(Json(
        state
            .store
            .list_messages(project_id, query.task_id.as_deref())
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub(crate) struct PostMessageRequest {
    task_id: Option<String>,
    role: ChatRole,
    content: String,
    media_ref: Option<String>,
}

/// POST /api/chat/projects/{id}/messages
pub(crate) async fn post_message(
    State(state): State<ApiState>,
    Path(project_id): Path<Uuid>,
    Json(req): Json<PostMessageRequest>,
) -> Result<Json<ChatMessage>, ApiError> {
    if req.content.trim().is_empty() {
        return Err(ApiError::BadRequest("content must not be empty".into()));
    }
    let message = ChatMessage {
        id: 0,
        project_id,
        task_id: req.task_id,
        role: req.role,
        content: req.content,
        media_ref: req.media_ref,
        token_count: None,
        created_at: chrono::Utc::now(),
    };
    let appended = state.store.append_message(message).await?;
    state.event_bus.publish(Event::new(
        EventKind::MessageCreated,
        json!(appended),
        Some(project_id),
    ));
    Ok(Json(appended))
}

/// POST /api/chat/projects/{id}/context -- summaries covering the
/// project/task's chat history, assembled by the enrichment pipeline's RLM
/// summarizer rather than returning the raw transcript.
pub(crate) async fn list_context(
    State(state): State<ApiState>,
    Path(project_id): Path<Uuid>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let summaries = state
        .store
        .list_summaries(project_id, query.task_id.as_deref())
        .await?;
    Ok(Json(json!({"summaries": summaries})))
}
