// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background health monitor for Active instances.
//!
//! One loop snapshots the connection set every ping interval and launches
//! a bounded ping per Active instance, gated so pings to one instance
//! never overlap. Health never mutates connection state directly: every
//! demotion flows through the manager's request channel like any other
//! transition.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::HubConfig;
use crate::manager::{ConnectionState, ManagerHandle};

/// Health tunables, lifted from the hub config.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub max_failures: u32,
}

impl From<&HubConfig> for HealthConfig {
    fn from(config: &HubConfig) -> Self {
        Self {
            ping_interval: config.ping_interval(),
            ping_timeout: config.ping_timeout(),
            max_failures: config.max_ping_failures.max(1),
        }
    }
}

/// Per-instance health record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthStatus {
    pub last_ping: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_response_time_ms: Option<u64>,
    pub healthy: bool,
    pub last_error: Option<String>,
}

type Callback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone, Default)]
struct Callbacks {
    on_unhealthy: Option<Callback>,
    on_recovered: Option<Callback>,
    on_dead: Option<Callback>,
}

/// Health monitor builder.
pub struct HealthMonitor {
    config: HealthConfig,
    manager: ManagerHandle,
    callbacks: Callbacks,
    shutdown: CancellationToken,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig, manager: ManagerHandle, shutdown: CancellationToken) -> Self {
        Self { config, manager, callbacks: Callbacks::default(), shutdown }
    }

    /// Invoked when an instance crosses the failure threshold.
    pub fn on_unhealthy(mut self, cb: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.callbacks.on_unhealthy = Some(Arc::new(cb));
        self
    }

    /// Invoked when a previously unhealthy instance answers again.
    pub fn on_recovered(mut self, cb: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.callbacks.on_recovered = Some(Arc::new(cb));
        self
    }

    /// Invoked when an instance is declared dead.
    pub fn on_dead(mut self, cb: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.callbacks.on_dead = Some(Arc::new(cb));
        self
    }

    /// Spawn the monitor loop and return a handle for status reads and
    /// shutdown.
    pub fn start(self) -> HealthHandle {
        let statuses: Arc<RwLock<HashMap<String, HealthStatus>>> = Arc::default();
        let inflight: Arc<Mutex<HashSet<String>>> = Arc::default();
        let cancel = self.shutdown.child_token();

        let handle = HealthHandle {
            statuses: Arc::clone(&statuses),
            inflight: Arc::clone(&inflight),
            cancel: cancel.clone(),
            ping_timeout: self.config.ping_timeout,
        };

        let HealthMonitor { config, manager, callbacks, .. } = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.ping_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let instances = match manager.list_instances().await {
                    Ok(list) => list,
                    // Manager gone means the hub is shutting down.
                    Err(_) => break,
                };

                for snapshot in instances {
                    if snapshot.state != ConnectionState::Active {
                        continue;
                    }
                    if !claim(&inflight, &snapshot.id) {
                        continue;
                    }
                    let ctx = PingContext {
                        id: snapshot.id,
                        config: config.clone(),
                        manager: manager.clone(),
                        callbacks: callbacks.clone(),
                        statuses: Arc::clone(&statuses),
                        inflight: Arc::clone(&inflight),
                        cancel: cancel.clone(),
                    };
                    tokio::spawn(ctx.ping());
                }
            }
        });

        handle
    }
}

/// Running monitor handle.
pub struct HealthHandle {
    statuses: Arc<RwLock<HashMap<String, HealthStatus>>>,
    inflight: Arc<Mutex<HashSet<String>>>,
    cancel: CancellationToken,
    ping_timeout: Duration,
}

impl HealthHandle {
    /// Copy of the current per-instance health map.
    pub async fn snapshot(&self) -> HashMap<String, HealthStatus> {
        self.statuses.read().await.clone()
    }

    /// Cancel the loop and wait for in-flight pings, bounded by the ping
    /// timeout.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let deadline = tokio::time::Instant::now() + self.ping_timeout;
        while tokio::time::Instant::now() < deadline {
            if lock(&self.inflight).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

struct PingContext {
    id: String,
    config: HealthConfig,
    manager: ManagerHandle,
    callbacks: Callbacks,
    statuses: Arc<RwLock<HashMap<String, HealthStatus>>>,
    inflight: Arc<Mutex<HashSet<String>>>,
    cancel: CancellationToken,
}

impl PingContext {
    async fn ping(self) {
        let started = std::time::Instant::now();
        let result = match self.manager.get_instance_client(&self.id).await {
            // Demoted between snapshot and ping: nothing to prove.
            None => {
                lock(&self.inflight).remove(&self.id);
                return;
            }
            Some(client) => client.ping(self.config.ping_timeout, &self.cancel).await,
        };
        let elapsed = started.elapsed();

        match result {
            Ok(()) => self.record_success(elapsed).await,
            Err(e) => self.record_failure(e.to_string()).await,
        }
        lock(&self.inflight).remove(&self.id);
    }

    async fn record_success(&self, elapsed: Duration) {
        let was_unhealthy = {
            let mut statuses = self.statuses.write().await;
            let status = statuses.entry(self.id.clone()).or_default();
            let was_unhealthy = !status.healthy && status.last_ping.is_some();
            let now = Utc::now();
            status.last_ping = Some(now);
            status.last_success = Some(now);
            status.consecutive_failures = 0;
            status.last_response_time_ms = Some(elapsed.as_millis() as u64);
            status.healthy = true;
            status.last_error = None;
            was_unhealthy
        };

        let _ = self.manager.update_activity(&self.id).await;
        if was_unhealthy {
            tracing::info!(instance_id = %self.id, "instance recovered");
            if let Some(ref cb) = self.callbacks.on_recovered {
                cb(&self.id);
            }
        }
    }

    async fn record_failure(&self, error: String) {
        let failures = {
            let mut statuses = self.statuses.write().await;
            let status = statuses.entry(self.id.clone()).or_default();
            status.last_ping = Some(Utc::now());
            status.consecutive_failures = status.consecutive_failures.saturating_add(1);
            status.last_error = Some(error.clone());
            if status.consecutive_failures >= self.config.max_failures {
                status.healthy = false;
            }
            status.consecutive_failures
        };
        tracing::warn!(instance_id = %self.id, failures, err = %error, "health ping failed");

        let max = self.config.max_failures;
        if failures >= max.saturating_mul(2) {
            let _ = self
                .manager
                .update_state(
                    &self.id,
                    ConnectionState::Dead,
                    &format!("{failures} consecutive ping failures"),
                )
                .await;
            if failures == max.saturating_mul(2) {
                if let Some(ref cb) = self.callbacks.on_dead {
                    cb(&self.id);
                }
            }
        } else if failures >= max {
            let _ = self
                .manager
                .update_state(
                    &self.id,
                    ConnectionState::Retrying,
                    &format!("{failures} consecutive ping failures"),
                )
                .await;
            if failures == max {
                if let Some(ref cb) = self.callbacks.on_unhealthy {
                    cb(&self.id);
                }
            }
        }
    }
}

fn claim(inflight: &Arc<Mutex<HashSet<String>>>, id: &str) -> bool {
    lock(inflight).insert(id.to_owned())
}

fn lock<'a>(
    inflight: &'a Arc<Mutex<HashSet<String>>>,
) -> std::sync::MutexGuard<'a, HashSet<String>> {
    inflight.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
