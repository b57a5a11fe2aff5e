// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SSE streaming: subscription fan-out, heartbeats, list-change
//! notifications, and disconnect cleanup.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use brummer_hub::events::HubEvent;
use brummer_hub::protocol::ResourceInfo;
use brummer_hub::server::registry::ResourceEntry;
use brummer_specs::{eventually, open_sse, rpc, spawn_instance, start_hub};

async fn register_local_resource(state: &brummer_hub::server::ServerState, uri: &str) {
    let canned = json!({"contents": [{"uri": uri, "mimeType": "text/plain", "text": "seed"}]});
    state
        .registry
        .register_resource(ResourceEntry {
            info: ResourceInfo {
                uri: uri.to_owned(),
                name: uri.to_owned(),
                description: None,
                mime_type: Some("text/plain".to_owned()),
            },
            reader: Arc::new(move || {
                let canned = canned.clone();
                Box::pin(async move { Ok(canned) })
            }),
            instance: None,
        })
        .await;
}

#[tokio::test]
async fn resource_update_reaches_subscribed_session() -> anyhow::Result<()> {
    let spec = start_hub().await?;
    let state = spec.hub.state();
    register_local_resource(&state, "logs://recent").await;

    let client = reqwest::Client::new();
    let base = spec.base_url();

    let mut sse = open_sse(spec.hub.port(), "fan-1").await?;
    let body = rpc(
        &client,
        &base,
        "fan-1",
        &json!({
            "jsonrpc": "2.0", "id": 1, "method": "resources/subscribe",
            "params": {"uri": "logs://recent"}
        }),
    )
    .await?;
    assert!(body["result"].is_object());

    state.bus.publish(HubEvent::ResourceUpdated {
        uri: "logs://recent".to_owned(),
        contents: json!({"text": "a new log line"}),
    });

    let frame = sse.wait_for("notifications/resources/updated", Duration::from_millis(1500)).await?;
    assert!(frame.contains(r#""uri":"logs://recent""#));

    spec.hub.stop().await;
    Ok(())
}

#[tokio::test]
async fn unsubscribed_session_gets_no_update() -> anyhow::Result<()> {
    let spec = start_hub().await?;
    let state = spec.hub.state();
    register_local_resource(&state, "logs://recent").await;

    let mut sse = open_sse(spec.hub.port(), "fan-2").await?;
    state.bus.publish(HubEvent::ResourceUpdated {
        uri: "logs://recent".to_owned(),
        contents: json!({"text": "nobody listening"}),
    });

    // Only heartbeats should arrive.
    let frame = sse.next_frame(Duration::from_millis(800)).await?;
    assert!(frame.contains("ping"), "unexpected frame: {frame}");

    spec.hub.stop().await;
    Ok(())
}

#[tokio::test]
async fn heartbeats_carry_timestamps() -> anyhow::Result<()> {
    let spec = start_hub().await?;
    let mut sse = open_sse(spec.hub.port(), "fan-3").await?;

    let frame = sse.wait_for("event: ping", Duration::from_secs(2)).await?;
    assert!(frame.contains("timestamp"));

    spec.hub.stop().await;
    Ok(())
}

#[tokio::test]
async fn tool_list_changes_notify_streaming_sessions() -> anyhow::Result<()> {
    let spec = start_hub().await?;
    let mock = spawn_instance(&["foo"]).await?;

    let mut sse = open_sse(spec.hub.port(), "fan-4").await?;
    spec.announce("n", mock.port)?;

    let frame = sse.wait_for("notifications/tools/list_changed", Duration::from_secs(5)).await?;
    assert!(frame.contains("event: message"));

    spec.hub.stop().await;
    Ok(())
}

#[tokio::test]
async fn sse_disconnect_deletes_session() -> anyhow::Result<()> {
    let spec = start_hub().await?;
    let state = spec.hub.state();

    {
        let _sse = open_sse(spec.hub.port(), "ephemeral").await?;
        eventually("session to appear", || {
            let state = state.clone();
            async move { state.sessions.contains("ephemeral").await.then_some(()) }
        })
        .await?;
    }
    // Dropping the socket tears the stream down; the pump reaps the session.
    eventually("session to be dropped", || {
        let state = state.clone();
        async move { (!state.sessions.contains("ephemeral").await).then_some(()) }
    })
    .await?;

    spec.hub.stop().await;
    Ok(())
}
