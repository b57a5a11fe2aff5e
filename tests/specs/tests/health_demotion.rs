// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Health-driven demotion and recovery, end to end.

use std::sync::atomic::Ordering;

use brummer_hub::manager::ConnectionState;
use brummer_specs::{
    eventually, spawn_instance, start_hub, start_hub_with, wait_history, wait_state,
};

#[tokio::test]
async fn failing_pings_demote_an_active_instance() -> anyhow::Result<()> {
    let spec = start_hub().await?;
    let mock = spawn_instance(&["foo"]).await?;
    spec.announce("shaky", mock.port)?;

    let manager = spec.hub.manager();
    wait_state(&manager, "shaky", ConnectionState::Active).await?;

    // Break pings only; initialize keeps succeeding so the instance
    // oscillates Active→Retrying rather than dying immediately.
    mock.fail_pings.store(true, Ordering::Relaxed);

    let snapshot = eventually("health demotion", || {
        let manager = manager.clone();
        async move {
            let list = manager.list_instances().await.ok()?;
            list.into_iter().find(|s| {
                s.id == "shaky"
                    && (s.state == ConnectionState::Retrying || s.state == ConnectionState::Dead)
            })
        }
    })
    .await?;
    assert!(snapshot.last_error.is_some());
    assert!(snapshot
        .history
        .iter()
        .any(|t| t.to == ConnectionState::Retrying && t.reason.contains("ping")));

    spec.hub.stop().await;
    Ok(())
}

#[tokio::test]
async fn healed_backend_returns_to_active() -> anyhow::Result<()> {
    // Wider failure budget so the instance survives the outage window.
    let spec = start_hub_with(|c| c.max_ping_failures = 5).await?;
    let mock = spawn_instance(&["foo"]).await?;
    spec.announce("healer", mock.port)?;

    let manager = spec.hub.manager();
    wait_state(&manager, "healer", ConnectionState::Active).await?;

    mock.fail_pings.store(true, Ordering::Relaxed);
    wait_history(&manager, "healer", ConnectionState::Retrying).await?;

    mock.fail_pings.store(false, Ordering::Relaxed);
    let snapshot = wait_state(&manager, "healer", ConnectionState::Active).await?;
    assert!(snapshot.has_client);
    assert_eq!(snapshot.retry_count, 0);

    spec.hub.stop().await;
    Ok(())
}
