// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `/mcp` endpoint: JSON-RPC 2.0 over POST (JSON or SSE framing) and
//! the persistent GET notification stream.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::events::HubEvent;
use crate::protocol::{
    self, IncomingBody, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION, SERVER_NAME,
    SESSION_HEADER,
};
use crate::server::{sse, ServerState};

// -- Accept negotiation --------------------------------------------------------

fn accept_header(headers: &HeaderMap) -> &str {
    headers.get(axum::http::header::ACCEPT).and_then(|v| v.to_str().ok()).unwrap_or("")
}

fn wants_sse(headers: &HeaderMap) -> bool {
    accept_header(headers).contains("text/event-stream")
}

fn wants_json(headers: &HeaderMap) -> bool {
    let accept = accept_header(headers);
    accept.is_empty() || accept.contains("application/json") || accept.contains("*/*")
}

/// Session ID from the `Mcp-Session-Id` header, or a fresh UUID.
fn session_id(headers: &HeaderMap) -> String {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn with_session_header(mut response: Response, session: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(session) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

// -- Handlers ------------------------------------------------------------------

/// `GET /health`
pub async fn health(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "sessions": state.sessions.count().await,
        "mode": "streamable",
    }))
}

/// `POST /mcp` — single message or batch, answered as JSON or SSE frames
/// depending on `Accept`.
pub async fn mcp_post(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let sse_mode = wants_sse(&headers);
    if !sse_mode && !wants_json(&headers) {
        return StatusCode::NOT_ACCEPTABLE.into_response();
    }

    let session = session_id(&headers);
    if state.sessions.touch(&session).await {
        state.bus.publish(HubEvent::SessionConnected { session: session.clone() });
    }

    let (responses, was_batch) = match protocol::parse_body(&body) {
        Err(_) => {
            (vec![JsonRpcResponse::error(None, protocol::PARSE_ERROR, "Parse error")], false)
        }
        Ok(IncomingBody::Single(raw)) => {
            (process_message(&state, &session, &raw).await.into_iter().collect(), false)
        }
        Ok(IncomingBody::Batch(items)) => {
            if items.is_empty() {
                (
                    vec![JsonRpcResponse::error(
                        None,
                        protocol::INVALID_REQUEST,
                        "Invalid Request",
                    )],
                    false,
                )
            } else {
                let mut out = Vec::with_capacity(items.len());
                for raw in &items {
                    if let Some(resp) = process_message(&state, &session, raw).await {
                        out.push(resp);
                    }
                }
                (out, true)
            }
        }
    };

    let response = if sse_mode {
        let frames = responses
            .into_iter()
            .filter_map(|r| serde_json::to_value(r).ok())
            .collect::<Vec<Value>>();
        sse::response_stream(&session, frames).into_response()
    } else if responses.is_empty() {
        // Nothing but notifications: acknowledge with no body.
        StatusCode::ACCEPTED.into_response()
    } else if was_batch {
        Json(responses).into_response()
    } else {
        match responses.into_iter().next() {
            Some(single) => Json(single).into_response(),
            None => StatusCode::ACCEPTED.into_response(),
        }
    };
    with_session_header(response, &session)
}

/// `GET /mcp` — persistent SSE notification stream.
pub async fn mcp_get(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    if !wants_sse(&headers) {
        return StatusCode::NOT_ACCEPTABLE.into_response();
    }

    let session = session_id(&headers);
    if state.sessions.touch(&session).await {
        state.bus.publish(HubEvent::SessionConnected { session: session.clone() });
    }

    let stream = sse::notification_stream(Arc::clone(&state), session.clone()).await;
    with_session_header(stream.into_response(), &session)
}

// -- Message processing --------------------------------------------------------

/// Validate and dispatch one raw message. Notifications return `None`.
async fn process_message(
    state: &Arc<ServerState>,
    session: &str,
    raw: &Value,
) -> Option<JsonRpcResponse> {
    let request = match protocol::validate_message(raw) {
        Ok(req) => req,
        Err(error_response) => return Some(error_response),
    };
    if request.is_notification() {
        // Client-originated notifications carry no reply.
        tracing::debug!(session, method = %request.method, "notification received");
        return None;
    }
    Some(dispatch(state, session, request).await)
}

async fn dispatch(
    state: &Arc<ServerState>,
    session: &str,
    request: JsonRpcRequest,
) -> JsonRpcResponse {
    let id = request.id.clone();
    let params = request.params.unwrap_or(Value::Null);

    match request.method.as_str() {
        "initialize" => JsonRpcResponse::result(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": { "listChanged": true },
                    "resources": { "subscribe": true, "listChanged": true },
                    "prompts": { "listChanged": true },
                    "logging": {},
                },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        ),
        "ping" => JsonRpcResponse::result(id, json!({})),
        "tools/list" => {
            JsonRpcResponse::result(id, json!({ "tools": state.registry.list_tools().await }))
        }
        "tools/call" => {
            let Some(name) = params.get("name").and_then(|v| v.as_str()) else {
                return JsonRpcResponse::error(
                    id,
                    protocol::INVALID_PARAMS,
                    "Invalid params: missing tool name",
                );
            };
            let Some(entry) = state.registry.get_tool(name).await else {
                return JsonRpcResponse::error(
                    id,
                    protocol::INVALID_PARAMS,
                    format!("Unknown tool: {name}"),
                );
            };
            let arguments = params.get("arguments").cloned().unwrap_or(json!({}));
            match (entry.handler)(arguments).await {
                Ok(result) => JsonRpcResponse::result(id, result),
                Err((code, message)) => JsonRpcResponse::error(id, code, message),
            }
        }
        "resources/list" => JsonRpcResponse::result(
            id,
            json!({ "resources": state.registry.list_resources().await }),
        ),
        "resources/read" => {
            let Some(uri) = params.get("uri").and_then(|v| v.as_str()) else {
                return JsonRpcResponse::error(
                    id,
                    protocol::INVALID_PARAMS,
                    "Invalid params: missing uri",
                );
            };
            let Some(entry) = state.registry.get_resource(uri).await else {
                return JsonRpcResponse::error(
                    id,
                    protocol::INVALID_PARAMS,
                    format!("Unknown resource: {uri}"),
                );
            };
            match (entry.reader)().await {
                Ok(result) => JsonRpcResponse::result(id, result),
                Err((code, message)) => JsonRpcResponse::error(id, code, message),
            }
        }
        "resources/subscribe" => {
            let Some(uri) = params.get("uri").and_then(|v| v.as_str()) else {
                return JsonRpcResponse::error(
                    id,
                    protocol::INVALID_PARAMS,
                    "Invalid params: missing uri",
                );
            };
            if !state.registry.has_resource(uri).await {
                return JsonRpcResponse::error(
                    id,
                    protocol::INVALID_PARAMS,
                    format!("Unknown resource: {uri}"),
                );
            }
            state.subscriptions.subscribe(session, uri).await;
            JsonRpcResponse::result(id, json!({}))
        }
        "resources/unsubscribe" => {
            let Some(uri) = params.get("uri").and_then(|v| v.as_str()) else {
                return JsonRpcResponse::error(
                    id,
                    protocol::INVALID_PARAMS,
                    "Invalid params: missing uri",
                );
            };
            state.subscriptions.unsubscribe(session, uri).await;
            JsonRpcResponse::result(id, json!({}))
        }
        "prompts/list" => {
            JsonRpcResponse::result(id, json!({ "prompts": state.registry.list_prompts().await }))
        }
        "prompts/get" => {
            let Some(name) = params.get("name").and_then(|v| v.as_str()) else {
                return JsonRpcResponse::error(
                    id,
                    protocol::INVALID_PARAMS,
                    "Invalid params: missing prompt name",
                );
            };
            let Some(entry) = state.registry.get_prompt(name).await else {
                return JsonRpcResponse::error(
                    id,
                    protocol::INVALID_PARAMS,
                    format!("Unknown prompt: {name}"),
                );
            };
            let arguments = params.get("arguments").cloned();
            match (entry.handler)(arguments).await {
                Ok(result) => JsonRpcResponse::result(id, result),
                Err((code, message)) => JsonRpcResponse::error(id, code, message),
            }
        }
        other => JsonRpcResponse::error(
            id,
            protocol::METHOD_NOT_FOUND,
            format!("Method not found: {other}"),
        ),
    }
}
