// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Real-HTTP surface checks: initialize, health, port fallback, stale
//! descriptor reaping.

use chrono::Duration as ChronoDuration;
use serde_json::json;

use brummer_hub::manager::ConnectionState;
use brummer_specs::{descriptor, eventually, rpc, start_hub, start_hub_with};

#[tokio::test]
async fn initialize_round_trip_over_tcp() -> anyhow::Result<()> {
    let spec = start_hub().await?;
    let client = reqwest::Client::new();

    let body = rpc(
        &client,
        &spec.base_url(),
        "surface-1",
        &json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
    )
    .await?;
    assert_eq!(body["result"]["protocolVersion"], "2024-11-05");
    assert_eq!(body["result"]["serverInfo"]["name"], "brummer-mcp");

    let health: serde_json::Value =
        client.get(format!("{}/health", spec.base_url())).send().await?.json().await?;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["mode"], "streamable");

    spec.hub.stop().await;
    Ok(())
}

#[tokio::test]
async fn requested_port_falls_forward_when_taken() -> anyhow::Result<()> {
    // Occupy a port, then ask the hub for it.
    let blocker = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let taken = blocker.local_addr()?.port();

    let spec = start_hub_with(|c| c.port = taken).await?;
    assert!(spec.hub.port() > taken, "expected fallback above {taken}, got {}", spec.hub.port());

    // The hub is actually serving on the resolved port.
    let health: serde_json::Value =
        reqwest::get(format!("{}/health", spec.base_url())).await?.json().await?;
    assert_eq!(health["status"], "healthy");

    drop(blocker);
    spec.hub.stop().await;
    Ok(())
}

#[tokio::test]
async fn stale_descriptor_is_reaped_not_connected() -> anyhow::Result<()> {
    let spec = start_hub_with(|c| c.stale_ttl_ms = 1000).await?;

    // A descriptor whose last ping is far in the past.
    let mut stale = descriptor("ancient", 1);
    stale.last_ping = chrono::Utc::now() - ChronoDuration::seconds(3600);
    spec.hub.discovery().register_instance(&stale)?;

    // The reaper runs on the scan tick; the file disappears and the
    // instance either never registers or is marked dead on removal.
    let discovery = spec.hub.discovery();
    eventually("descriptor to be reaped", || {
        let discovery = discovery.clone();
        async move { (!discovery.scan().contains_key("ancient")).then_some(()) }
    })
    .await?;

    let manager = spec.hub.manager();
    let list = manager.list_instances().await?;
    let connected = list
        .iter()
        .any(|s| s.id == "ancient" && s.state == ConnectionState::Active);
    assert!(!connected);

    spec.hub.stop().await;
    Ok(())
}
