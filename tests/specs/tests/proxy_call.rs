// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Namespaced proxying of backend catalogs through the hub's `/mcp`.

use serde_json::json;

use brummer_hub::manager::ConnectionState;
use brummer_specs::{eventually, rpc, spawn_instance, start_hub, wait_state};

#[tokio::test]
async fn proxied_tool_appears_and_forwards() -> anyhow::Result<()> {
    let spec = start_hub().await?;
    let mock = spawn_instance(&["foo"]).await?;
    spec.announce("z", mock.port)?;

    let client = reqwest::Client::new();
    let base = spec.base_url();

    // The namespaced tool shows up in the hub's own catalog.
    eventually("z/foo to be listed", || {
        let client = client.clone();
        let base = base.clone();
        async move {
            let body = rpc(
                &client,
                &base,
                "spec-session",
                &json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}),
            )
            .await
            .ok()?;
            let tools = body["result"]["tools"].as_array()?.clone();
            tools.iter().any(|t| t["name"] == "z/foo").then_some(())
        }
    })
    .await?;

    // Calling it forwards exactly one tools/call with the original name.
    let body = rpc(
        &client,
        &base,
        "spec-session",
        &json!({
            "jsonrpc": "2.0", "id": 2, "method": "tools/call",
            "params": {"name": "z/foo", "arguments": {"verbose": true}}
        }),
    )
    .await?;
    assert_eq!(body["result"]["content"][0]["text"], "ran foo");

    let forwarded = mock.recorded_calls("tools/call");
    assert_eq!(forwarded.len(), 1);
    assert_eq!(forwarded[0]["params"]["name"], "foo");
    assert_eq!(forwarded[0]["params"]["arguments"]["verbose"], true);

    spec.hub.stop().await;
    Ok(())
}

#[tokio::test]
async fn proxied_resources_are_namespaced() -> anyhow::Result<()> {
    let spec = start_hub().await?;
    let mock = spawn_instance(&["foo"]).await?;
    spec.announce("z", mock.port)?;

    let client = reqwest::Client::new();
    let base = spec.base_url();

    eventually("namespaced resource to be listed", || {
        let client = client.clone();
        let base = base.clone();
        async move {
            let body = rpc(
                &client,
                &base,
                "spec-session",
                &json!({"jsonrpc": "2.0", "id": 1, "method": "resources/list"}),
            )
            .await
            .ok()?;
            let resources = body["result"]["resources"].as_array()?.clone();
            resources.iter().any(|r| r["uri"] == "z_logs://recent").then_some(())
        }
    })
    .await?;

    let body = rpc(
        &client,
        &base,
        "spec-session",
        &json!({
            "jsonrpc": "2.0", "id": 2, "method": "resources/read",
            "params": {"uri": "z_logs://recent"}
        }),
    )
    .await?;
    assert_eq!(body["result"]["contents"][0]["text"], "log line");
    // The backend saw the original, un-namespaced URI.
    let reads = mock.recorded_calls("resources/read");
    assert_eq!(reads[0]["params"]["uri"], "logs://recent");

    spec.hub.stop().await;
    Ok(())
}

#[tokio::test]
async fn dead_instance_calls_fail_fast_and_catalog_empties() -> anyhow::Result<()> {
    let spec = start_hub().await?;
    let mock = spawn_instance(&["foo"]).await?;
    spec.announce("z", mock.port)?;

    let client = reqwest::Client::new();
    let base = spec.base_url();
    let manager = spec.hub.manager();

    wait_state(&manager, "z", ConnectionState::Active).await?;

    spec.withdraw("z")?;
    eventually("catalog removal", || {
        let client = client.clone();
        let base = base.clone();
        async move {
            let body = rpc(
                &client,
                &base,
                "spec-session",
                &json!({"jsonrpc": "2.0", "id": 3, "method": "tools/list"}),
            )
            .await
            .ok()?;
            let tools = body["result"]["tools"].as_array()?.clone();
            tools.is_empty().then_some(())
        }
    })
    .await?;

    spec.hub.stop().await;
    Ok(())
}
