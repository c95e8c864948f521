use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use ringmaster_core::store::ProjectRepository;
use ringmaster_core::types::{Project, ProjectSettings};
use serde::Deserialize;
use uuid::Uuid;

use super::state::ApiState;
use crate::api_error::ApiError;

#[derive(Debug, Deserialize)]
pub(crate) struct CreateProjectRequest {
    name: String,
    description: Option<String>,
    repo_path: Option<String>,
    #[serde(default)]
    tech_stack: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UpdateProjectRequest {
    name: Option<String>,
    description: Option<String>,
    repo_path: Option<String>,
    tech_stack: Option<Vec<String>>,
    settings: Option<ProjectSettings>,
}

/// GET /api/projects
pub(crate) async fn list_projects(
    State(state): State<ApiState>,
) -> Result<Json<Vec<Project>>, ApiError> {
    Ok(Json(state.store.list_projects().await?))
}

/// POST /api/projects
pub(crate) async fn create_project(
    State(state): State<ApiState>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let now = chrono::Utc::now();
    let project = Project {
        id: Uuid::new_v4(),
        name: req.name,
        description: req.description.unwrap_or_default(),
        tech_stack: req.tech_stack,
        repo_path: req.repo_path,
        settings: ProjectSettings::default(),
        created_at: now,
        updated_at: now,
    };
    let created = state.store.create_project(project).await?;
    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

/// GET /api/projects/{id}
pub(crate) async fn get_project(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Project>, ApiError> {
    Ok(Json(state.store.get_project(id).await?))
}

/// PATCH /api/projects/{id}
pub(crate) async fn update_project(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateProjectRequest>,
) -> Result<Json<Project>, ApiError> {
    let mut project = state.store.get_project(id).await?;
    if let Some(name) = req.name {
        project.name = name;
    }
    if let Some(description) = req.description {
        project.description = description;
    }
    if let Some(repo_path) = req.repo_path {
        project.repo_path = Some(repo_path);
    }
    if let Some(tech_stack) = req.tech_stack {
        project.tech_stack = tech_stack;
    }
    if let Some(settings) = req.settings {
        project.settings = settings;
    }
    project.updated_at = chrono::Utc::now();
    Ok(Json(state.store.update_project(project).await?))
}

/// DELETE /api/projects/{id}
pub(crate) async fn delete_project(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.delete_project(id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// GET /api/projects/{id}/summary -- bead counts by status, for dashboards.
pub(crate) async fn project_summary(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    use ringmaster_core::store::BeadRepository;
    use ringmaster_core::types::BeadStatus;

    let project = state.store.get_project(id).await?;
    let beads = state.store.list_beads(Some(id)).await?;

    let mut by_status = std::collections::BTreeMap::new();
    for status in [
        BeadStatus::Draft,
        BeadStatus::Ready,
        BeadStatus::Assigned,
        BeadStatus::InProgress,
        BeadStatus::Blocked,
        BeadStatus::NeedsDecomposition,
        BeadStatus::Review,
        BeadStatus::Done,
        BeadStatus::Failed,
    ] {
        let count = beads.iter().filter(|b| b.status == status).count();
        by_status.insert(format!("{status:?}"), count);
    }

    Ok(Json(serde_json::json!({
        "project": project,
        "total_beads": beads.len(),
        "by_status": by_status,
    })))
}
