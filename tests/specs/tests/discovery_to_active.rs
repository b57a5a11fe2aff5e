// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Discovery-driven instance lifecycle, end to end.

use brummer_hub::manager::ConnectionState;
use brummer_specs::{eventually, spawn_instance, start_hub, wait_state};

#[tokio::test]
async fn announced_instance_becomes_active() -> anyhow::Result<()> {
    let spec = start_hub().await?;
    let mock = spawn_instance(&["foo"]).await?;

    spec.announce("inst-x", mock.port)?;

    let manager = spec.hub.manager();
    let snapshot = wait_state(&manager, "inst-x", ConnectionState::Active).await?;

    assert!(snapshot.has_client);
    assert_eq!(snapshot.retry_count, 0);
    // The hub ran the JSON-RPC handshake against the backend.
    assert_eq!(mock.recorded_calls("initialize").len(), 1);

    spec.hub.stop().await;
    Ok(())
}

#[tokio::test]
async fn withdrawn_instance_goes_dead_and_resurrects() -> anyhow::Result<()> {
    let spec = start_hub().await?;
    let mock = spawn_instance(&["foo"]).await?;

    spec.announce("inst-y", mock.port)?;
    let manager = spec.hub.manager();
    wait_state(&manager, "inst-y", ConnectionState::Active).await?;

    spec.withdraw("inst-y")?;
    wait_state(&manager, "inst-y", ConnectionState::Dead).await?;
    assert!(manager.get_instance_client("inst-y").await.is_none());

    // Re-announcing brings it back through Discovered.
    spec.announce("inst-y", mock.port)?;
    let snapshot = wait_state(&manager, "inst-y", ConnectionState::Active).await?;
    assert!(snapshot.has_client);

    spec.hub.stop().await;
    Ok(())
}

#[tokio::test]
async fn unreachable_instance_retries_with_backoff() -> anyhow::Result<()> {
    let spec = start_hub().await?;
    // Nothing listens on port 1.
    spec.announce("inst-z", 1)?;

    let manager = spec.hub.manager();
    let snapshot = eventually("instance to accumulate retries", || {
        let manager = manager.clone();
        async move {
            let list = manager.list_instances().await.ok()?;
            list.into_iter().find(|s| {
                s.id == "inst-z" && s.state == ConnectionState::Retrying && s.retry_count >= 2
            })
        }
    })
    .await?;
    assert!(snapshot.last_error.is_some());
    assert!(!snapshot.has_client);

    spec.hub.stop().await;
    Ok(())
}
