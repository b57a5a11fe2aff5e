// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Serialized connection manager.
//!
//! All mutation of per-instance state funnels through one owning task
//! consuming a typed request channel — there is no lock around the
//! connection map, and callers only ever see immutable copies. Lifecycle
//! changes (Active entry/exit) are broadcast so the frontend can install
//! and remove proxied catalog entries without touching manager internals.

pub(crate) mod connect;
pub mod info;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::client::{Client, ClientConfig};
use crate::config::HubConfig;
use crate::discovery::InstanceDescriptor;

pub use info::{ConnectionState, InstanceSnapshot, StateTransition};

use connect::ConnectWorker;
use info::ConnectionInfo;

/// Capacity of the manager request channel.
const REQUEST_CHANNEL_CAPACITY: usize = 128;

/// Lifecycle notifications emitted by the manager.
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    /// The instance completed initialization and is routable.
    InstanceActive { id: String },
    /// The instance left Active (demoted or dead).
    InstanceInactive { id: String, reason: String },
}

/// Errors surfaced by manager requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerError {
    UnknownInstance(String),
    InvalidTransition { from: ConnectionState, to: ConnectionState },
    NotActive(String),
    Rejected(&'static str),
    Stopped,
}

impl std::fmt::Display for ManagerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownInstance(id) => write!(f, "unknown instance: {id}"),
            Self::InvalidTransition { from, to } => {
                write!(f, "invalid transition: {from} -> {to}")
            }
            Self::NotActive(id) => write!(f, "instance not active: {id}"),
            Self::Rejected(why) => write!(f, "rejected: {why}"),
            Self::Stopped => f.write_str("connection manager stopped"),
        }
    }
}

impl std::error::Error for ManagerError {}

/// Manager tunables, lifted from the hub config.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub client: ClientConfig,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl From<&HubConfig> for ManagerConfig {
    fn from(config: &HubConfig) -> Self {
        Self {
            client: ClientConfig::from(config),
            backoff_base: config.connect_backoff_base(),
            backoff_cap: config.connect_backoff_cap(),
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::from(&HubConfig::default())
    }
}

// -- Request channel -----------------------------------------------------------

enum Request {
    Register {
        descriptor: Box<InstanceDescriptor>,
        reply: oneshot::Sender<()>,
    },
    UpdateState {
        id: String,
        to: ConnectionState,
        reason: String,
        reply: oneshot::Sender<Result<(), ManagerError>>,
    },
    UpdateActivity {
        id: String,
        reply: oneshot::Sender<Result<(), ManagerError>>,
    },
    SetClient {
        id: String,
        client: Arc<Client>,
        reply: oneshot::Sender<Result<(), ManagerError>>,
    },
    ConnectSession {
        session: String,
        id: String,
        reply: oneshot::Sender<Result<(), ManagerError>>,
    },
    DisconnectSession {
        session: String,
        reply: oneshot::Sender<()>,
    },
    GetClient {
        session: String,
        reply: oneshot::Sender<Option<Arc<Client>>>,
    },
    GetInstanceClient {
        id: String,
        reply: oneshot::Sender<Option<Arc<Client>>>,
    },
    ListInstances {
        reply: oneshot::Sender<Vec<InstanceSnapshot>>,
    },
    WorkerDone {
        id: String,
        generation: u64,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to the manager task.
#[derive(Clone)]
pub struct ManagerHandle {
    tx: mpsc::Sender<Request>,
    events: broadcast::Sender<ManagerEvent>,
}

impl ManagerHandle {
    /// Idempotent upsert by instance ID. A Dead instance re-enters the
    /// lifecycle through Discovered.
    pub async fn register(&self, descriptor: InstanceDescriptor) -> Result<(), ManagerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Register { descriptor: Box::new(descriptor), reply }).await?;
        rx.await.map_err(|_| ManagerError::Stopped)
    }

    /// Request a validated state transition.
    pub async fn update_state(
        &self,
        id: &str,
        to: ConnectionState,
        reason: &str,
    ) -> Result<(), ManagerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::UpdateState {
            id: id.to_owned(),
            to,
            reason: reason.to_owned(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ManagerError::Stopped)?
    }

    /// Refresh `last_activity`; only valid while Active.
    pub async fn update_activity(&self, id: &str) -> Result<(), ManagerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::UpdateActivity { id: id.to_owned(), reply }).await?;
        rx.await.map_err(|_| ManagerError::Stopped)?
    }

    /// Install a freshly initialized client (connect worker only).
    pub async fn set_client(&self, id: &str, client: Arc<Client>) -> Result<(), ManagerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::SetClient { id: id.to_owned(), client, reply }).await?;
        rx.await.map_err(|_| ManagerError::Stopped)?
    }

    /// Route a session to an Active instance.
    pub async fn connect_session(&self, session: &str, id: &str) -> Result<(), ManagerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::ConnectSession {
            session: session.to_owned(),
            id: id.to_owned(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ManagerError::Stopped)?
    }

    /// Remove a session's routing. Idempotent.
    pub async fn disconnect_session(&self, session: &str) -> Result<(), ManagerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::DisconnectSession { session: session.to_owned(), reply }).await?;
        rx.await.map_err(|_| ManagerError::Stopped)
    }

    /// The client for a session's instance, present only while Active.
    pub async fn get_client(&self, session: &str) -> Option<Arc<Client>> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::GetClient { session: session.to_owned(), reply }).await.ok()?;
        rx.await.ok().flatten()
    }

    /// The client for an instance, present only while Active.
    pub async fn get_instance_client(&self, id: &str) -> Option<Arc<Client>> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::GetInstanceClient { id: id.to_owned(), reply }).await.ok()?;
        rx.await.ok().flatten()
    }

    /// Immutable snapshots of all known instances, ordered by ID.
    pub async fn list_instances(&self) -> Result<Vec<InstanceSnapshot>, ManagerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::ListInstances { reply }).await?;
        rx.await.map_err(|_| ManagerError::Stopped)
    }

    /// Stop the manager: cancel workers, drop clients, clear sessions.
    pub async fn stop(&self) -> Result<(), ManagerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Stop { reply }).await?;
        rx.await.map_err(|_| ManagerError::Stopped)
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    pub(crate) async fn worker_done(&self, id: &str, generation: u64) {
        let _ = self.tx.send(Request::WorkerDone { id: id.to_owned(), generation }).await;
    }

    async fn send(&self, request: Request) -> Result<(), ManagerError> {
        self.tx.send(request).await.map_err(|_| ManagerError::Stopped)
    }
}

/// Spawn the manager task and return its handle.
pub fn spawn(config: ManagerConfig, shutdown: CancellationToken) -> ManagerHandle {
    let (tx, rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
    let (events, _) = broadcast::channel(64);
    let handle = ManagerHandle { tx, events: events.clone() };

    let manager = ConnectionManager {
        config,
        connections: HashMap::new(),
        sessions: HashMap::new(),
        events,
        handle: handle.clone(),
        shutdown,
    };
    tokio::spawn(manager.run(rx));
    handle
}

// -- Actor ---------------------------------------------------------------------

struct Entry {
    info: ConnectionInfo,
    worker_cancel: Option<CancellationToken>,
    connect_inflight: bool,
    /// Bumped per spawned worker so a stale WorkerDone cannot clear the
    /// inflight flag of its successor.
    worker_generation: u64,
}

struct ConnectionManager {
    config: ManagerConfig,
    connections: HashMap<String, Entry>,
    sessions: HashMap<String, String>,
    events: broadcast::Sender<ManagerEvent>,
    handle: ManagerHandle,
    shutdown: CancellationToken,
}

enum Flow {
    Continue,
    Stop,
}

impl ConnectionManager {
    async fn run(mut self, mut rx: mpsc::Receiver<Request>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                request = rx.recv() => match request {
                    None => break,
                    Some(request) => {
                        if matches!(self.handle_request(request), Flow::Stop) {
                            break;
                        }
                    }
                }
            }
        }
        self.cleanup();
        // Dropping `rx` here fails any in-flight request with a closed
        // channel, which handles map to `ManagerError::Stopped`.
    }

    fn handle_request(&mut self, request: Request) -> Flow {
        match request {
            Request::Register { descriptor, reply } => {
                self.register(*descriptor);
                let _ = reply.send(());
            }
            Request::UpdateState { id, to, reason, reply } => {
                let _ = reply.send(self.update_state(&id, to, &reason));
            }
            Request::UpdateActivity { id, reply } => {
                let _ = reply.send(self.update_activity(&id));
            }
            Request::SetClient { id, client, reply } => {
                let _ = reply.send(self.set_client(&id, client));
            }
            Request::ConnectSession { session, id, reply } => {
                let _ = reply.send(self.connect_session(session, &id));
            }
            Request::DisconnectSession { session, reply } => {
                self.disconnect_session(&session);
                let _ = reply.send(());
            }
            Request::GetClient { session, reply } => {
                let client = self
                    .sessions
                    .get(&session)
                    .and_then(|id| self.active_client(id));
                let _ = reply.send(client);
            }
            Request::GetInstanceClient { id, reply } => {
                let _ = reply.send(self.active_client(&id));
            }
            Request::ListInstances { reply } => {
                let mut list: Vec<InstanceSnapshot> =
                    self.connections.values().map(|e| InstanceSnapshot::from(&e.info)).collect();
                list.sort_by(|a, b| a.id.cmp(&b.id));
                let _ = reply.send(list);
            }
            Request::WorkerDone { id, generation } => {
                if let Some(entry) = self.connections.get_mut(&id) {
                    if entry.worker_generation == generation {
                        entry.connect_inflight = false;
                        entry.worker_cancel = None;
                        // A demotion that raced the worker's exit would
                        // otherwise strand the instance in Retrying.
                        if entry.info.state == ConnectionState::Retrying {
                            self.spawn_worker(&id);
                        }
                    }
                }
            }
            Request::Stop { reply } => {
                self.cleanup();
                let _ = reply.send(());
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    fn register(&mut self, descriptor: InstanceDescriptor) {
        let id = descriptor.id.clone();
        match self.connections.get_mut(&id) {
            Some(entry) => {
                // Re-registration updates the endpoint identity in place.
                entry.info.descriptor = descriptor;
                if entry.info.state == ConnectionState::Dead {
                    if entry
                        .info
                        .apply_transition(ConnectionState::Discovered, "re-registered")
                        .is_ok()
                    {
                        tracing::info!(instance_id = %id, "dead instance re-registered");
                        self.spawn_worker(&id);
                    }
                } else {
                    tracing::debug!(instance_id = %id, "instance re-registered");
                }
            }
            None => {
                tracing::info!(instance_id = %id, "instance discovered");
                self.connections.insert(
                    id.clone(),
                    Entry {
                        info: ConnectionInfo::new(descriptor),
                        worker_cancel: None,
                        connect_inflight: false,
                        worker_generation: 0,
                    },
                );
                self.spawn_worker(&id);
            }
        }
    }

    fn update_state(
        &mut self,
        id: &str,
        to: ConnectionState,
        reason: &str,
    ) -> Result<(), ManagerError> {
        let entry = self
            .connections
            .get_mut(id)
            .ok_or_else(|| ManagerError::UnknownInstance(id.to_owned()))?;
        let from = entry.info.state;

        if let Err(denied) = entry.info.apply_transition(to, reason) {
            tracing::warn!(
                instance_id = %id,
                from = %denied.from,
                to = %denied.to,
                reason,
                "dropping disallowed state transition"
            );
            return Err(ManagerError::InvalidTransition { from: denied.from, to: denied.to });
        }
        tracing::info!(instance_id = %id, from = %from, to = %to, reason, "instance state changed");

        match to {
            ConnectionState::Active => {
                let _ = self.events.send(ManagerEvent::InstanceActive { id: id.to_owned() });
            }
            ConnectionState::Dead => {
                if let Some(cancel) = entry.worker_cancel.take() {
                    cancel.cancel();
                }
                entry.connect_inflight = false;
                self.sessions.retain(|_, instance| instance != id);
                if from == ConnectionState::Active {
                    let _ = self.events.send(ManagerEvent::InstanceInactive {
                        id: id.to_owned(),
                        reason: reason.to_owned(),
                    });
                }
            }
            ConnectionState::Retrying => {
                if from == ConnectionState::Active {
                    let _ = self.events.send(ManagerEvent::InstanceInactive {
                        id: id.to_owned(),
                        reason: reason.to_owned(),
                    });
                    // The original worker exited at Active; demotion needs
                    // a fresh one.
                    self.spawn_worker(id);
                }
            }
            ConnectionState::Connecting | ConnectionState::Discovered => {}
        }
        Ok(())
    }

    fn update_activity(&mut self, id: &str) -> Result<(), ManagerError> {
        let entry = self
            .connections
            .get_mut(id)
            .ok_or_else(|| ManagerError::UnknownInstance(id.to_owned()))?;
        if entry.info.state != ConnectionState::Active {
            return Err(ManagerError::NotActive(id.to_owned()));
        }
        entry.info.last_activity = Some(chrono::Utc::now());
        Ok(())
    }

    fn set_client(&mut self, id: &str, client: Arc<Client>) -> Result<(), ManagerError> {
        let entry = self
            .connections
            .get_mut(id)
            .ok_or_else(|| ManagerError::UnknownInstance(id.to_owned()))?;
        match entry.info.state {
            ConnectionState::Connecting | ConnectionState::Retrying => {
                entry.info.client = Some(client);
                Ok(())
            }
            _ => Err(ManagerError::Rejected("client install outside connect window")),
        }
    }

    fn connect_session(&mut self, session: String, id: &str) -> Result<(), ManagerError> {
        let state = self
            .connections
            .get(id)
            .map(|e| e.info.state)
            .ok_or_else(|| ManagerError::UnknownInstance(id.to_owned()))?;
        if state != ConnectionState::Active {
            return Err(ManagerError::NotActive(id.to_owned()));
        }

        // At most one instance per session: switching clears the old slot.
        if let Some(previous) = self.sessions.insert(session.clone(), id.to_owned()) {
            if previous != id {
                if let Some(old) = self.connections.get_mut(&previous) {
                    old.info.sessions.remove(&session);
                }
            }
        }
        if let Some(entry) = self.connections.get_mut(id) {
            entry.info.sessions.insert(session);
        }
        Ok(())
    }

    fn disconnect_session(&mut self, session: &str) {
        if let Some(instance) = self.sessions.remove(session) {
            if let Some(entry) = self.connections.get_mut(&instance) {
                entry.info.sessions.remove(session);
            }
        }
    }

    fn active_client(&self, id: &str) -> Option<Arc<Client>> {
        let entry = self.connections.get(id)?;
        if entry.info.state != ConnectionState::Active {
            return None;
        }
        entry.info.client.clone()
    }

    fn spawn_worker(&mut self, id: &str) {
        let Some(entry) = self.connections.get_mut(id) else {
            return;
        };
        if entry.connect_inflight {
            return;
        }
        let cancel = self.shutdown.child_token();
        entry.worker_cancel = Some(cancel.clone());
        entry.connect_inflight = true;
        entry.worker_generation = entry.worker_generation.wrapping_add(1);

        ConnectWorker {
            id: id.to_owned(),
            base_url: entry.info.descriptor.base_url(),
            client_config: self.config.client.clone(),
            backoff_base: self.config.backoff_base,
            backoff_cap: self.config.backoff_cap,
            initial_attempt: entry.info.retry_count,
            generation: entry.worker_generation,
        }
        .spawn(self.handle.clone(), cancel);
    }

    fn cleanup(&mut self) {
        for entry in self.connections.values_mut() {
            if let Some(cancel) = entry.worker_cancel.take() {
                cancel.cancel();
            }
            entry.connect_inflight = false;
            entry.info.client = None;
            entry.info.sessions.clear();
        }
        self.sessions.clear();
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
