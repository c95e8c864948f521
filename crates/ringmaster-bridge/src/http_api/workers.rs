use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use ringmaster_core::event::{Event, EventKind};
use ringmaster_core::store::WorkerRepository;
use ringmaster_core::types::{Capability, LaunchTemplate, Worker, WorkerStatus, WorkerType};

use super::state::ApiState;
use crate::api_error::ApiError;

#[derive(Debug, Deserialize)]
pub(crate) struct CreateWorkerRequest {
    name: String,
    worker_type: WorkerType,
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    capabilities: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UpdateWorkerRequest {
    name: Option<String>,
    capabilities: Option<Vec<String>>,
}

/// GET /api/workers
pub(crate) async fn list_workers(
    State(state): State<ApiState>,
) -> Result<Json<Vec<Worker>>, ApiError> {
    Ok(Json(state.store.list_workers().await?))
}

/// POST /api/workers
pub(crate) async fn create_worker(
    State(state): State<ApiState>,
    Json(req): Json<CreateWorkerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let timeout_seconds = req.worker_type.default_timeout_seconds();
    let worker = Worker {
        id: Uuid::new_v4(),
        name: req.name,
        worker_type: req.worker_type,
        status: WorkerStatus::Idle,
        current_task_id: None,
        launch_template: LaunchTemplate {
            command: req.command,
            args: req.args,
            prompt_flag: None,
            working_dir: None,
            timeout_seconds,
            env: Default::default(),
        },
        capabilities: req
            .capabilities
            .into_iter()
            .map(Capability::new)
            .collect(),
        tasks_completed: 0,
        tasks_failed: 0,
        mean_completion_seconds: 0.0,
        last_active_at: None,
        created_at: chrono::Utc::now(),
    };
    let created = state.store.create_worker(worker).await?;
    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

/// GET /api/workers/{id}
pub(crate) async fn get_worker(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Worker>, ApiError> {
    Ok(Json(state.store.get_worker(id).await?))
}

/// PATCH /api/workers/{id}
pub(crate) async fn update_worker(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateWorkerRequest>,
) -> Result<Json<Worker>, ApiError> {
    let mut worker = state.store.get_worker(id).await?;
    if let Some(name) = req.name {
        worker.name = name;
    }
    if let Some(caps) = req.capabilities {
        worker.capabilities = caps.into_iter().map(Capability::new).collect();
    }
    Ok(Json(state.store.update_worker(worker).await?))
}

/// DELETE /api/workers/{id}
pub(crate) async fn delete_worker(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.delete_worker(id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// POST /api/workers/{id}/activate
pub(crate) async fn activate_worker(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Worker>, ApiError> {
    let mut worker = state.store.get_worker(id).await?;
    worker.status = WorkerStatus::Idle;
    let updated = state.store.update_worker(worker).await?;
    state.event_bus.publish(Event::new(
        EventKind::WorkerStatus,
        json!(updated),
        None,
    ));
    Ok(Json(updated))
}

/// POST /api/workers/{id}/deactivate
pub(crate) async fn deactivate_worker(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Worker>, ApiError> {
    let mut worker = state.store.get_worker(id).await?;
    worker.status = WorkerStatus::Offline;
    worker.current_task_id = None;
    let updated = state.store.update_worker(worker).await?;
    state.event_bus.publish(Event::new(
        EventKind::WorkerStatus,
        json!(updated),
        None,
    ));
    Ok(Json(updated))
}

/// POST /api/workers/{id}/pause -- soft-stop: worker stays assigned but is
/// flagged paused in its event stream. Does not alter `current_task_id`,
/// which keeps the scheduler's mutual-binding invariant intact.
pub(crate) async fn pause_worker(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Worker>, ApiError> {
    let worker = state.store.get_worker(id).await?;
    state.event_bus.publish(Event::new(
        EventKind::WorkerPaused,
        json!({"worker_id": id}),
        None,
    ));
    Ok(Json(worker))
}

/// POST /api/workers/{id}/cancel -- abandon the worker's current task and
/// return it to IDLE. Does not itself mark the bead; callers resubmit it.
pub(crate) async fn cancel_worker(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Worker>, ApiError> {
    let mut worker = state.store.get_worker(id).await?;
    let task_id = worker.current_task_id.take();
    worker.status = WorkerStatus::Idle;
    let updated = state.store.update_worker(worker).await?;
    state.event_bus.publish(Event::new(
        EventKind::TaskCancelled,
        json!({"worker_id": id, "task_id": task_id}),
        None,
    ));
    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
pub(crate) struct OutputQuery {
    limit: Option<usize>,
    since_line: Option<u64>,
}

/// GET /api/workers/{id}/output?limit&since_line
pub(crate) async fn worker_output(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Query(query): Query<OutputQuery>,
) -> Json<serde_json::Value> {
    let lines = state
        .output_buffer
        .get_recent(id, query.limit.unwrap_or(200), query.since_line)
        .await;
    Json(json!({"lines": lines}))
}

/// Unsubscribes its `(worker_id, subscriber_id)` pair from the output buffer
/// when the SSE stream it's captured into is dropped (client disconnect).
struct UnsubscribeOnDrop {
    output_buffer: std::sync::Arc<ringmaster_core::output_buffer::OutputBuffer>,
    worker_id: Uuid,
    subscriber_id: Uuid,
}

impl Drop for UnsubscribeOnDrop {
    fn drop(&mut self) {
        let output_buffer = self.output_buffer.clone();
        let worker_id = self.worker_id;
        let subscriber_id = self.subscriber_id;
        tokio::spawn(async move {
            output_buffer.unsubscribe(worker_id, subscriber_id).await;
        });
    }
}

/// GET /api/workers/{id}/output/stream -- Server-Sent Events, one event per
/// output line, with a 30s keepalive comment and buffering disabled on
/// intermediary proxies.
pub(crate) async fn worker_output_stream(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
    use futures_util::StreamExt;

    let subscriber_id = Uuid::new_v4();
    let rx = state.output_buffer.subscribe(id, subscriber_id).await;
    let guard = UnsubscribeOnDrop {
        output_buffer: state.output_buffer.clone(),
        worker_id: id,
        subscriber_id,
    };

    let stream = rx.into_stream().map(move |line| {
        let _keep_alive = &guard;
        Ok::<_, std::convert::Infallible>(
            SseEvent::default()
                .json_data(&line)
                .unwrap_or_else(|_| SseEvent::default().data("")),
        )
    });

    let sse = Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(30))
            .text("keep-alive"),
    );
    let mut response = sse.into_response();
    response
        .headers_mut()
        .insert("X-Accel-Buffering", axum::http::HeaderValue::from_static("no"));
    response
}

/// GET /api/workers/{id}/capabilities
pub(crate) async fn list_capabilities(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<String>>, ApiError> {
    let worker = state.store.get_worker(id).await?;
    Ok(Json(
        worker.capabilities.iter().map(|c| c.as_str().to_string()).collect(),
    ))
}

#[derive(Debug, Deserialize)]
pub(crate) struct AddCapabilityRequest {
    capability: String,
}

/// POST /api/workers/{id}/capabilities
pub(crate) async fn add_capability(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AddCapabilityRequest>,
) -> Result<Json<Worker>, ApiError> {
    let mut worker = state.store.get_worker(id).await?;
    worker.capabilities.insert(Capability::new(req.capability));
    Ok(Json(state.store.update_worker(worker).await?))
}

/// DELETE /api/workers/{id}/capabilities/{cap}
pub(crate) async fn remove_capability(
    State(state): State<ApiState>,
    Path((id, cap)): Path<(Uuid, String)>,
) -> Result<Json<Worker>, ApiError> {
    let mut worker = state.store.get_worker(id).await?;
    worker.capabilities.remove(&Capability::new(cap));
    Ok(Json(state.store.update_worker(worker).await?))
}
