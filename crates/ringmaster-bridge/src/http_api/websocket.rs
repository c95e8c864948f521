use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::Query;
use axum::http::HeaderMap;
use axum::{extract::State, response::IntoResponse};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use crate::origin_validation::{get_default_allowed_origins, validate_websocket_origin};

use super::state::ApiState;

#[derive(Debug, Deserialize)]
pub(crate) struct WsQuery {
    project_id: Option<Uuid>,
}

/// WebSocket GET /api/events/ws?project_id=... -- real-time event streaming
/// with a 30s heartbeat, filtered to one project when `project_id` is given.
pub(crate) async fn events_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(status) = validate_websocket_origin(&headers, &get_default_allowed_origins()) {
        return status.into_response();
    }

    ws.on_upgrade(move |socket| handle_events_ws(socket, state, query.project_id))
}

async fn handle_events_ws(socket: WebSocket, state: ApiState, project_filter: Option<Uuid>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let rx = state.event_bus.subscribe(project_filter);

    let mut heartbeat = tokio::time::interval(std::time::Duration::from_secs(30));

    loop {
        tokio::select! {
            result = rx.recv_async() => {
                match result {
                    Ok(event) => {
                        let json = serde_json::to_string(&event).unwrap_or_default();
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }

            _ = heartbeat.tick() => {
                let ping = serde_json::json!({"type": "ping", "timestamp": chrono::Utc::now().to_rfc3339()});
                if ws_tx.send(Message::Text(ping.to_string().into())).await.is_err() {
                    break;
                }
            }

            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}
