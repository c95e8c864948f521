// ---------------------------------------------------------------------------
// HTTP API module directory
// ---------------------------------------------------------------------------
//
// Thin handler modules over the core engine's Store/EventBus/OutputBuffer.
// This file wires them into the Axum router and layers on the same
// auth/CORS/isolation/telemetry middleware stack used throughout.

mod chat;
mod metrics;
mod projects;
pub mod state;
mod tasks;
mod undo;
mod websocket;
mod workers;

pub use state::ApiState;
pub use self::router::{api_router, api_router_with_auth};

/// Deep-merge `patch` into `target`. Objects are merged recursively; other
/// values are replaced.
pub(crate) fn merge_json(target: &mut serde_json::Value, patch: &serde_json::Value) {
    match (target.is_object(), patch.is_object()) {
        (true, true) => {
            let t = target.as_object_mut().expect("target.is_object() already verified");
            let p = patch.as_object().expect("patch.is_object() already verified");
            for (key, value) in p {
                let entry = t.entry(key.clone()).or_insert(serde_json::Value::Null);
                merge_json(entry, value);
            }
        }
        _ => {
            *target = patch.clone();
        }
    }
}

// ---------------------------------------------------------------------------
// Router + middleware
// ---------------------------------------------------------------------------

mod router {
    use super::*;
    use axum::{
        body::Body,
        extract::Request,
        middleware::{self as axum_middleware, Next},
        response::Response,
        routing::{get, patch, post},
        Router,
    };
    use tower_http::cors::CorsLayer;

    use crate::auth::AuthLayer;
    use ringmaster_telemetry::middleware::metrics_middleware;
    use ringmaster_telemetry::tracing_setup::request_id_middleware;

    /// Build the full API router with all REST and WebSocket routes.
    ///
    /// When `api_key` is `Some`, the [`AuthLayer`] middleware will require
    /// every request to carry a valid key. When `None`, all requests pass
    /// through (development mode).
    pub fn api_router(state: ApiState) -> Router {
        api_router_with_auth(state, None, vec![])
    }

    /// Add browser cross-origin isolation headers needed for threaded WASM paths.
    async fn isolation_headers_middleware(request: Request<Body>, next: Next) -> Response {
        let mut response = next.run(request).await;
        let headers = response.headers_mut();
        headers.insert(
            "Cross-Origin-Opener-Policy",
            axum::http::HeaderValue::from_static("same-origin"),
        );
        headers.insert(
            "Cross-Origin-Embedder-Policy",
            axum::http::HeaderValue::from_static("credentialless"),
        );
        headers.insert(
            "Cross-Origin-Resource-Policy",
            axum::http::HeaderValue::from_static("same-origin"),
        );
        headers.insert(
            "X-Content-Type-Options",
            axum::http::HeaderValue::from_static("nosniff"),
        );
        headers.insert(
            "X-Frame-Options",
            axum::http::HeaderValue::from_static("DENY"),
        );
        headers.insert(
            "Strict-Transport-Security",
            axum::http::HeaderValue::from_static("max-age=63072000; includeSubDomains"),
        );
        headers.insert(
            "X-XSS-Protection",
            axum::http::HeaderValue::from_static("1; mode=block"),
        );
        headers.insert(
            "Referrer-Policy",
            axum::http::HeaderValue::from_static("strict-origin-when-cross-origin"),
        );
        response
    }

    /// Build the API router with optional authentication.
    pub fn api_router_with_auth(
        state: ApiState,
        api_key: Option<String>,
        allowed_origins: Vec<String>,
    ) -> Router {
        Router::new()
            // Projects
            .route("/api/projects", get(projects::list_projects))
            .route("/api/projects", post(projects::create_project))
            .route("/api/projects/{id}", get(projects::get_project))
            .route("/api/projects/{id}", patch(projects::update_project))
            .route(
                "/api/projects/{id}",
                axum::routing::delete(projects::delete_project),
            )
            .route(
                "/api/projects/{id}/summary",
                get(projects::project_summary),
            )
            // Tasks (beads)
            .route("/api/tasks", get(tasks::list_tasks))
            .route("/api/tasks", post(tasks::create_task))
            .route("/api/tasks/bulk-update", post(tasks::bulk_update))
            .route("/api/tasks/bulk-delete", post(tasks::bulk_delete))
            .route(
                "/api/tasks/recompute-priority",
                post(tasks::recompute_priority),
            )
            .route("/api/tasks/{id}", get(tasks::get_task))
            .route("/api/tasks/{id}", patch(tasks::update_task))
            .route("/api/tasks/{id}", axum::routing::delete(tasks::delete_task))
            .route("/api/tasks/{id}/assign", post(tasks::assign_task))
            .route("/api/tasks/{id}/resubmit", post(tasks::resubmit_task))
            .route("/api/tasks/{id}/routing", get(tasks::routing_for_task))
            .route(
                "/api/tasks/{id}/dependencies",
                get(tasks::list_dependencies),
            )
            .route(
                "/api/tasks/{id}/dependencies",
                post(tasks::add_dependency),
            )
            .route(
                "/api/tasks/{id}/dependencies/{parent_id}",
                axum::routing::delete(tasks::remove_dependency),
            )
            // Workers
            .route("/api/workers", get(workers::list_workers))
            .route("/api/workers", post(workers::create_worker))
            .route("/api/workers/{id}", get(workers::get_worker))
            .route("/api/workers/{id}", patch(workers::update_worker))
            .route(
                "/api/workers/{id}",
                axum::routing::delete(workers::delete_worker),
            )
            .route(
                "/api/workers/{id}/activate",
                post(workers::activate_worker),
            )
            .route(
                "/api/workers/{id}/deactivate",
                post(workers::deactivate_worker),
            )
            .route("/api/workers/{id}/pause", post(workers::pause_worker))
            .route("/api/workers/{id}/cancel", post(workers::cancel_worker))
            .route("/api/workers/{id}/output", get(workers::worker_output))
            .route(
                "/api/workers/{id}/output/stream",
                get(workers::worker_output_stream),
            )
            .route(
                "/api/workers/{id}/capabilities",
                get(workers::list_capabilities),
            )
            .route(
                "/api/workers/{id}/capabilities",
                post(workers::add_capability),
            )
            .route(
                "/api/workers/{id}/capabilities/{cap}",
                axum::routing::delete(workers::remove_capability),
            )
            // Undo/redo
            .route("/api/undo/history", get(undo::undo_history))
            .route("/api/undo", post(undo::perform_undo))
            .route("/api/undo/redo", post(undo::perform_redo))
            // Chat
            .route(
                "/api/chat/projects/{id}/messages",
                get(chat::list_messages),
            )
            .route(
                "/api/chat/projects/{id}/messages",
                post(chat::post_message),
            )
            .route(
                "/api/chat/projects/{id}/context",
                post(chat::list_context),
            )
            // WebSocket
            .route("/api/events/ws", get(websocket::events_ws_handler))
            // Metrics
            .route("/api/metrics", get(metrics::get_metrics_prometheus))
            .route("/api/metrics/json", get(metrics::get_metrics_json))
            .layer(axum_middleware::from_fn(metrics_middleware))
            .layer(axum_middleware::from_fn(request_id_middleware))
            .layer(axum_middleware::from_fn(isolation_headers_middleware))
            .layer(AuthLayer::new(api_key))
            .layer(
                CorsLayer::new()
                    .allow_origin(tower_http::cors::AllowOrigin::predicate(
                        move |origin: &axum::http::HeaderValue,
                              _request_parts: &axum::http::request::Parts| {
                            if let Ok(origin_str) = origin.to_str() {
                                if origin_str.starts_with("http://localhost")
                                    || origin_str.starts_with("http://127.0.0.1")
                                    || origin_str.starts_with("https://localhost")
                                    || origin_str.starts_with("https://127.0.0.1")
                                {
                                    return true;
                                }
                                allowed_origins.iter().any(|allowed| origin_str == allowed)
                            } else {
                                false
                            }
                        },
                    ))
                    .allow_methods([
                        axum::http::Method::GET,
                        axum::http::Method::POST,
                        axum::http::Method::PUT,
                        axum::http::Method::DELETE,
                        axum::http::Method::PATCH,
                        axum::http::Method::OPTIONS,
                    ])
                    .allow_headers([
                        axum::http::header::CONTENT_TYPE,
                        axum::http::header::AUTHORIZATION,
                    ])
                    .allow_credentials(true),
            )
            .with_state(state)
    }
}
