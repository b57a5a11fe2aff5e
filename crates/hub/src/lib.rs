// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Brummer hub: MCP aggregation server over locally discovered backend
//! instances.
//!
//! One process, four cooperating subsystems: filesystem discovery feeds
//! the serialized connection manager, the health monitor demotes and
//! promotes through the same channel, and the HTTP frontend re-exports
//! every Active instance's catalogs under namespaced keys.

pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod health;
pub mod manager;
pub mod protocol;
pub mod server;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::HubConfig;
use crate::discovery::{Discovery, Snapshot};
use crate::health::{HealthConfig, HealthHandle, HealthMonitor};
use crate::manager::{ConnectionState, ManagerConfig, ManagerHandle};
use crate::server::{bind_with_fallback, build_router, ServerState};

/// Grace period for the HTTP server after shutdown is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A running hub.
pub struct Hub {
    port: u16,
    state: Arc<ServerState>,
    discovery: Arc<Discovery>,
    health: HealthHandle,
    shutdown: CancellationToken,
    serve: tokio::task::JoinHandle<()>,
}

impl Hub {
    /// Wire every subsystem and start serving. The returned handle owns
    /// shutdown.
    pub async fn start(config: HubConfig) -> anyhow::Result<Self> {
        let shutdown = CancellationToken::new();

        let manager = manager::spawn(ManagerConfig::from(&config), shutdown.clone());
        let state = ServerState::new(config.clone(), manager.clone(), shutdown.clone());
        server::spawn_event_fanout(Arc::clone(&state));
        server::proxy::spawn_proxy_bridge(Arc::clone(&state));

        let health =
            HealthMonitor::new(HealthConfig::from(&config), manager.clone(), shutdown.clone())
                .start();

        let discovery = Arc::new(Discovery::new(
            config.resolved_instances_dir(),
            config.scan_interval(),
            config.stale_ttl(),
            shutdown.clone(),
        ));
        spawn_discovery_bridge(&discovery, manager.clone(), shutdown.clone()).await;
        discovery.start();

        let (listener, port) = bind_with_fallback(&config.host, config.port).await?;
        tracing::info!(host = %config.host, port, "brummer hub listening");

        let router = build_router(Arc::clone(&state));
        let serve_shutdown = shutdown.clone();
        let serve = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(serve_shutdown.cancelled_owned())
                .await
            {
                tracing::error!(err = %e, "http server exited with error");
            }
        });

        Ok(Self { port, state, discovery, health, shutdown, serve })
    }

    /// The bound port (after any fallback scan).
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    pub fn manager(&self) -> ManagerHandle {
        self.state.manager.clone()
    }

    pub fn discovery(&self) -> Arc<Discovery> {
        Arc::clone(&self.discovery)
    }

    pub fn health(&self) -> &HealthHandle {
        &self.health
    }

    /// Orderly teardown: health first (stop demoting), then the manager
    /// (drop clients), then the HTTP server within its grace period.
    pub async fn stop(self) {
        self.health.stop().await;
        let _ = self.state.manager.stop().await;
        self.shutdown.cancel();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.serve).await.is_err() {
            tracing::warn!("http server did not drain within grace period");
        }
    }
}

/// Run the hub until interrupted.
pub async fn run(config: HubConfig) -> anyhow::Result<()> {
    let hub = Hub::start(config).await?;
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    hub.stop().await;
    Ok(())
}

/// Feed discovery snapshots into the manager: every descriptor present is
/// upserted, and a known instance missing from the snapshot is marked
/// Dead ("removed from discovery"). Re-appearing IDs re-register through
/// Dead→Discovered.
async fn spawn_discovery_bridge(
    discovery: &Arc<Discovery>,
    manager: ManagerHandle,
    shutdown: CancellationToken,
) {
    let (tx, mut rx) = mpsc::channel::<Snapshot>(8);
    discovery
        .on_update(move |snapshot| {
            let _ = tx.try_send(snapshot.clone());
        })
        .await;

    tokio::spawn(async move {
        let mut known: HashSet<String> = HashSet::new();
        loop {
            let snapshot = tokio::select! {
                _ = shutdown.cancelled() => break,
                snapshot = rx.recv() => match snapshot {
                    None => break,
                    Some(s) => s,
                },
            };

            for descriptor in snapshot.values() {
                if manager.register(descriptor.clone()).await.is_err() {
                    return;
                }
            }
            for id in known.iter() {
                if !snapshot.contains_key(id) {
                    let _ = manager
                        .update_state(id, ConnectionState::Dead, "removed from discovery")
                        .await;
                }
            }
            known = snapshot.keys().cloned().collect();
        }
    });
}
