// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP frontend: router, shared state, and the event fan-out task.

pub mod legacy;
pub mod mcp;
pub mod proxy;
pub mod registry;
pub mod session;
pub mod sse;
pub mod subscriptions;

use std::sync::Arc;

use axum::http::{header, HeaderName, Method};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tokio_util::sync::CancellationToken;

use crate::config::HubConfig;
use crate::events::{EventBus, HubEvent};
use crate::manager::ManagerHandle;
use crate::protocol::JsonRpcNotification;

use registry::Registry;
use session::SessionTable;
use subscriptions::SubscriptionTable;

/// Shared state behind every handler.
pub struct ServerState {
    pub config: HubConfig,
    pub manager: ManagerHandle,
    pub registry: Registry,
    pub sessions: SessionTable,
    pub subscriptions: SubscriptionTable,
    pub bus: EventBus,
    pub shutdown: CancellationToken,
}

impl ServerState {
    pub fn new(
        config: HubConfig,
        manager: ManagerHandle,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let sessions = SessionTable::new(config.session_channel_capacity);
        Arc::new(Self {
            config,
            manager,
            registry: Registry::new(),
            sessions,
            subscriptions: SubscriptionTable::new(),
            bus: EventBus::new(),
            shutdown,
        })
    }
}

/// Build the axum `Router` with the MCP endpoint, health, and legacy shims.
pub fn build_router(state: Arc<ServerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            HeaderName::from_static("mcp-session-id"),
        ]);

    Router::new()
        // Primary MCP endpoint
        .route("/mcp", post(mcp::mcp_post).get(mcp::mcp_get))
        // Liveness
        .route("/health", get(mcp::health))
        // Legacy pre-JSON-RPC shims
        .route("/mcp/connect", post(legacy::connect))
        .route("/mcp/events", get(legacy::events))
        .route("/mcp/logs", get(legacy::logs))
        .route("/mcp/processes", get(legacy::processes))
        .route("/mcp/scripts", get(legacy::scripts))
        .route("/mcp/execute", post(legacy::execute))
        .route("/mcp/stop", post(legacy::stop))
        // Middleware
        .layer(cors)
        .with_state(state)
}

/// Bind the configured port, scanning upward when it is taken. Returns the
/// listener and the resolved port.
pub async fn bind_with_fallback(host: &str, port: u16) -> anyhow::Result<(TcpListener, u16)> {
    let upper = port.checked_add(100).unwrap_or(u16::MAX);
    for candidate in port..=upper {
        match TcpListener::bind((host, candidate)).await {
            Ok(listener) => {
                // Port 0 is OS-assigned; report what was actually bound.
                let bound = listener.local_addr().map(|a| a.port()).unwrap_or(candidate);
                if bound != port {
                    tracing::info!(requested = port, resolved = bound, "port fallback");
                }
                return Ok((listener, bound));
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => continue,
            Err(e) => return Err(e.into()),
        }
    }
    anyhow::bail!("no free port in {port}..={upper} on {host}")
}

/// Spawn the fan-out task: bus events become JSON-RPC notifications on
/// session streams. Resource updates go to subscribers only; list changes
/// go to every streaming session.
pub fn spawn_event_fanout(state: Arc<ServerState>) {
    tokio::spawn(async move {
        let mut rx = state.bus.subscribe();
        loop {
            let event = tokio::select! {
                _ = state.shutdown.cancelled() => break,
                event = rx.recv() => event,
            };
            match event {
                Ok(HubEvent::ResourceUpdated { uri, contents }) => {
                    let frame = notification_frame(
                        "notifications/resources/updated",
                        serde_json::json!({ "uri": uri, "contents": contents }),
                    );
                    for session in state.subscriptions.sessions_for(&uri).await {
                        let outcome = state.sessions.push(&session, frame.clone()).await;
                        if outcome == session::PushOutcome::Dropped {
                            tracing::debug!(session = %session, uri = %uri, "resource update dropped (slow consumer)");
                        }
                    }
                }
                Ok(HubEvent::ToolsChanged) => {
                    let frame = notification_frame("notifications/tools/list_changed", serde_json::json!({}));
                    state.sessions.broadcast(&frame).await;
                }
                Ok(HubEvent::ResourcesChanged) => {
                    let frame =
                        notification_frame("notifications/resources/list_changed", serde_json::json!({}));
                    state.sessions.broadcast(&frame).await;
                }
                Ok(HubEvent::PromptsChanged) => {
                    let frame =
                        notification_frame("notifications/prompts/list_changed", serde_json::json!({}));
                    state.sessions.broadcast(&frame).await;
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event fan-out lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn notification_frame(method: &str, params: serde_json::Value) -> serde_json::Value {
    serde_json::to_value(JsonRpcNotification::new(method, Some(params)))
        .unwrap_or(serde_json::Value::Null)
}
