// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pre-JSON-RPC compatibility shims.
//!
//! Thin JSON-only endpoints kept for old clients. Each mirrors a subset of
//! the JSON-RPC surface; nothing here has state of its own.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::error::ApiError;
use crate::events::HubEvent;
use crate::protocol::{ResourceInfo, PROTOCOL_VERSION, SERVER_NAME};
use crate::server::ServerState;

#[derive(Debug, Deserialize, Default)]
pub struct ConnectRequest {
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
}

/// `POST /mcp/connect` — establish a session the pre-RPC way.
pub async fn connect(
    State(state): State<Arc<ServerState>>,
    body: Option<Json<ConnectRequest>>,
) -> impl IntoResponse {
    let session = body
        .and_then(|Json(req)| req.session_id)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    if state.sessions.touch(&session).await {
        state.bus.publish(HubEvent::SessionConnected { session: session.clone() });
    }
    Json(json!({
        "sessionId": session,
        "protocolVersion": PROTOCOL_VERSION,
        "serverInfo": { "name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION") },
    }))
}

/// `GET /mcp/events` — raw hub event feed as SSE.
pub async fn events(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let stream = BroadcastStream::new(state.bus.subscribe()).filter_map(|event| {
        // Lagged receivers skip missed events; the feed is best-effort.
        let event = event.ok()?;
        let data = serde_json::to_string(&event).ok()?;
        Some(Ok::<Event, Infallible>(Event::default().event("message").data(data)))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// `GET /mcp/logs` — resources under the `logs://` scheme.
pub async fn logs(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(json!({ "logs": resources_with_scheme(&state, "logs://").await }))
}

/// `GET /mcp/processes` — resources under the `processes://` scheme.
pub async fn processes(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(json!({ "processes": resources_with_scheme(&state, "processes://").await }))
}

/// `GET /mcp/scripts` — resources under the `scripts://` scheme.
pub async fn scripts(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(json!({ "scripts": resources_with_scheme(&state, "scripts://").await }))
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// `POST /mcp/execute` — invoke a registered tool by name.
pub async fn execute(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<ExecuteRequest>,
) -> axum::response::Response {
    let Some(entry) = state.registry.get_tool(&req.name).await else {
        return ApiError::NotFound
            .to_http_response(format!("unknown tool: {}", req.name))
            .into_response();
    };
    match (entry.handler)(req.arguments.unwrap_or(json!({}))).await {
        Ok(result) => Json(json!({ "result": result })).into_response(),
        Err((code, message)) => ApiError::UpstreamError
            .to_http_response(format!("tool failed ({code}): {message}"))
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct StopRequest {
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

/// `POST /mcp/stop` — drop a session and its routing.
pub async fn stop(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<StopRequest>,
) -> impl IntoResponse {
    let existed = state.sessions.remove(&req.session_id).await;
    if existed {
        state.subscriptions.remove_session(&req.session_id).await;
        let _ = state.manager.disconnect_session(&req.session_id).await;
        state.bus.publish(HubEvent::SessionDisconnected { session: req.session_id.clone() });
    }
    Json(json!({ "stopped": existed }))
}

async fn resources_with_scheme(state: &ServerState, scheme: &str) -> Vec<ResourceInfo> {
    state
        .registry
        .list_resources()
        .await
        .into_iter()
        .filter(|r| r.uri.contains(scheme))
        .collect()
}
