// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide hub event bus.
//!
//! Domain events (session lifecycle, instance lifecycle, resource updates)
//! are published here and fanned out by the frontend server: resource
//! updates go to subscribed sessions, list changes to every streaming
//! session, and the full feed backs the legacy `/mcp/events` stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Events flowing through the hub bus, tagged for wire use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    /// A frontend session was seen for the first time.
    SessionConnected { session: String },
    /// A frontend session's SSE stream closed and the session was dropped.
    SessionDisconnected { session: String },
    /// An instance entered Active and its catalogs were proxied.
    InstanceActive { instance: String },
    /// An instance left Active; its proxied entries were removed.
    InstanceInactive { instance: String, reason: String },
    /// A resource's contents changed.
    ResourceUpdated { uri: String, contents: Value },
    /// The set of proxied tools changed.
    ToolsChanged,
    /// The set of proxied resources changed.
    ResourcesChanged,
    /// The set of proxied prompts changed.
    PromptsChanged,
}

/// Event bus — fans hub events out to server tasks via broadcast.
pub struct EventBus {
    tx: broadcast::Sender<HubEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    /// Subscribe to hub events.
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Lagging subscribers observe `Lagged` on their end;
    /// a send with no subscribers is not an error.
    pub fn publish(&self, event: HubEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
