// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filesystem-based instance discovery.
//!
//! Watches one directory of descriptor files and publishes full snapshots
//! to registered listeners. The notify watcher only wakes the scan early;
//! the periodic rescan is authoritative, so a missed filesystem event
//! delays an update by at most one scan interval.

pub mod descriptor;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

pub use descriptor::{InstanceDescriptor, ProcessInfo};

/// A consistent view of the instances directory: `{instanceID → descriptor}`.
pub type Snapshot = HashMap<String, InstanceDescriptor>;

type Listener = Box<dyn Fn(&Snapshot) + Send + Sync>;

/// Filesystem discovery service.
pub struct Discovery {
    dir: PathBuf,
    scan_interval: Duration,
    stale_ttl: Duration,
    listeners: RwLock<Vec<Listener>>,
    current: RwLock<Option<Snapshot>>,
    shutdown: CancellationToken,
}

impl Discovery {
    pub fn new(
        dir: PathBuf,
        scan_interval: Duration,
        stale_ttl: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            dir,
            scan_interval,
            stale_ttl,
            listeners: RwLock::new(Vec::new()),
            current: RwLock::new(None),
            shutdown,
        }
    }

    /// Register a snapshot listener.
    ///
    /// Listeners receive the full map on every observed change and once at
    /// startup; the same snapshot may be delivered twice, so listeners must
    /// be idempotent. A listener added after the first scan is called
    /// immediately with the current snapshot.
    pub async fn on_update(&self, cb: impl Fn(&Snapshot) + Send + Sync + 'static) {
        if let Some(ref snapshot) = *self.current.read().await {
            cb(snapshot);
        }
        self.listeners.write().await.push(Box::new(cb));
    }

    /// Write a descriptor file atomically (0600, temp + rename).
    pub fn register_instance(&self, desc: &InstanceDescriptor) -> anyhow::Result<()> {
        descriptor::write_atomic(&self.dir, desc)
    }

    /// Remove an instance's descriptor file. Missing files are fine.
    pub fn unregister_instance(&self, id: &str) -> anyhow::Result<()> {
        match std::fs::remove_file(descriptor::descriptor_path(&self.dir, id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove descriptors whose `lastPing` exceeded the TTL or whose PID is
    /// dead. Returns the reaped instance IDs.
    pub fn cleanup_stale_instances(&self) -> Vec<String> {
        let mut reaped = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return reaped,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), err = %e, "stale cleanup scan failed");
                return reaped;
            }
        };

        let now = Utc::now();
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !is_descriptor_file(&path) {
                continue;
            }
            let desc = match descriptor::read_descriptor(&path) {
                Ok(d) => d,
                // Malformed files are the scanner's problem, not the reaper's.
                Err(_) => continue,
            };

            let age = now.signed_duration_since(desc.last_ping);
            let expired = age.to_std().map(|a| a > self.stale_ttl).unwrap_or(false);
            let dead = !descriptor::pid_alive(desc.process_info.pid);
            if expired || dead {
                let reason = if dead { "process gone" } else { "ping expired" };
                tracing::info!(instance_id = %desc.id, reason, "reaping stale descriptor");
                if let Err(e) = std::fs::remove_file(&path) {
                    tracing::warn!(instance_id = %desc.id, err = %e, "failed to remove stale descriptor");
                    continue;
                }
                reaped.push(desc.id);
            }
        }
        reaped
    }

    /// Read the directory into a snapshot. Malformed files are skipped with
    /// a warning; a missing directory is an empty snapshot.
    pub fn scan(&self) -> Snapshot {
        let mut snapshot = Snapshot::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return snapshot,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), err = %e, "instance scan failed");
                return snapshot;
            }
        };

        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !is_descriptor_file(&path) {
                continue;
            }
            match descriptor::read_descriptor(&path) {
                Ok(desc) => {
                    snapshot.insert(desc.id.clone(), desc);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), err = %e, "ignoring malformed descriptor");
                }
            }
        }
        snapshot
    }

    /// Run one scan cycle and notify listeners if the view changed (or if
    /// this is the first scan).
    pub async fn scan_and_notify(&self) {
        self.cleanup_stale_instances();
        let snapshot = self.scan();

        let changed = {
            let current = self.current.read().await;
            current.as_ref() != Some(&snapshot)
        };
        if changed {
            let listeners = self.listeners.read().await;
            for cb in listeners.iter() {
                cb(&snapshot);
            }
            drop(listeners);
            *self.current.write().await = Some(snapshot);
        }
    }

    /// Start the scan loop: one immediate scan, then periodic rescans with
    /// a notify watcher waking the loop early on directory changes.
    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let (wake_tx, mut wake_rx) = mpsc::channel::<()>(1);
            let _watcher = this.setup_notify_watcher(wake_tx);

            let mut interval = tokio::time::interval(this.scan_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = this.shutdown.cancelled() => break,
                    _ = wake_rx.recv() => {}
                    _ = interval.tick() => {}
                }
                this.scan_and_notify().await;
            }
        });
    }

    /// Set up a `notify` watcher on the instances directory. Returns the
    /// watcher handle (must be kept alive), or `None` if watching is
    /// unavailable; the poll loop covers that case.
    fn setup_notify_watcher(&self, wake_tx: mpsc::Sender<()>) -> Option<notify::RecommendedWatcher> {
        use notify::{RecursiveMode, Watcher};

        let _ = std::fs::create_dir_all(&self.dir);
        let mut watcher = notify::recommended_watcher(move |_: notify::Result<notify::Event>| {
            let _ = wake_tx.try_send(());
        })
        .ok()?;

        watcher.watch(&self.dir, RecursiveMode::NonRecursive).ok()?;
        Some(watcher)
    }
}

fn is_descriptor_file(path: &std::path::Path) -> bool {
    path.extension().map(|e| e == "json").unwrap_or(false)
        && !path.file_name().map(|n| n.to_string_lossy().starts_with('.')).unwrap_or(true)
}

#[cfg(test)]
#[path = "discovery_tests.rs"]
mod tests;
