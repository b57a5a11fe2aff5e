// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection state model: per-instance lifecycle states, the transition
//! table, and the bookkeeping record owned by the manager task.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::client::Client;
use crate::discovery::InstanceDescriptor;

/// Bound on per-instance state history.
pub const STATE_HISTORY_CAP: usize = 64;

/// Lifecycle state of one backend instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Discovered,
    Connecting,
    Active,
    Retrying,
    Dead,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Retrying => "retrying",
            Self::Dead => "dead",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The transition table. Everything not listed is dropped by the manager.
/// Dead instances resurrect only through re-registration (Dead→Discovered).
pub fn transition_allowed(from: ConnectionState, to: ConnectionState) -> bool {
    use ConnectionState::*;
    matches!(
        (from, to),
        (Discovered, Connecting)
            | (Discovered, Dead)
            | (Connecting, Active)
            | (Connecting, Retrying)
            | (Connecting, Dead)
            | (Active, Retrying)
            | (Active, Dead)
            | (Retrying, Connecting)
            | (Retrying, Dead)
            | (Dead, Discovered)
    )
}

/// One recorded state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub at: DateTime<Utc>,
    pub reason: String,
}

/// Attempted transition rejected by the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionDenied {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// The manager's view of one instance. Owned exclusively by the manager
/// task; everything handed out is a copy.
pub struct ConnectionInfo {
    pub descriptor: InstanceDescriptor,
    pub state: ConnectionState,
    pub discovered_at: DateTime<Utc>,
    pub state_changed_at: DateTime<Utc>,
    pub last_activity: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub client: Option<Arc<Client>>,
    pub sessions: HashSet<String>,
    pub history: VecDeque<StateTransition>,
}

impl ConnectionInfo {
    pub fn new(descriptor: InstanceDescriptor) -> Self {
        let now = Utc::now();
        Self {
            descriptor,
            state: ConnectionState::Discovered,
            discovered_at: now,
            state_changed_at: now,
            last_activity: None,
            connected_at: None,
            retry_count: 0,
            last_error: None,
            client: None,
            sessions: HashSet::new(),
            history: VecDeque::new(),
        }
    }

    /// Apply a validated transition with its side effects: history append,
    /// timestamp updates, retry counting, and client teardown on Dead.
    pub fn apply_transition(
        &mut self,
        to: ConnectionState,
        reason: &str,
    ) -> Result<(), TransitionDenied> {
        let from = self.state;
        if !transition_allowed(from, to) {
            return Err(TransitionDenied { from, to });
        }

        let now = Utc::now();
        if self.history.len() >= STATE_HISTORY_CAP {
            self.history.pop_front();
        }
        self.history.push_back(StateTransition { from, to, at: now, reason: reason.to_owned() });

        self.state = to;
        self.state_changed_at = now;
        match to {
            ConnectionState::Active => {
                self.retry_count = 0;
                self.connected_at = Some(now);
                self.last_activity = Some(now);
                self.last_error = None;
            }
            ConnectionState::Retrying => {
                self.retry_count = self.retry_count.saturating_add(1);
                self.last_error = Some(reason.to_owned());
            }
            ConnectionState::Dead => {
                self.client = None;
                self.sessions.clear();
                self.last_error = Some(reason.to_owned());
            }
            ConnectionState::Discovered => {
                self.retry_count = 0;
                self.last_error = None;
            }
            ConnectionState::Connecting => {}
        }
        Ok(())
    }
}

/// Immutable copy of an instance's state handed to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub id: String,
    pub name: String,
    pub port: u16,
    pub state: ConnectionState,
    pub discovered_at: DateTime<Utc>,
    pub state_changed_at: DateTime<Utc>,
    pub last_activity: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub has_client: bool,
    pub sessions: Vec<String>,
    pub history: Vec<StateTransition>,
}

impl From<&ConnectionInfo> for InstanceSnapshot {
    fn from(info: &ConnectionInfo) -> Self {
        let mut sessions: Vec<String> = info.sessions.iter().cloned().collect();
        sessions.sort();
        Self {
            id: info.descriptor.id.clone(),
            name: info.descriptor.name.clone(),
            port: info.descriptor.port,
            state: info.state,
            discovered_at: info.discovered_at,
            state_changed_at: info.state_changed_at,
            last_activity: info.last_activity,
            connected_at: info.connected_at,
            retry_count: info.retry_count,
            last_error: info.last_error.clone(),
            has_client: info.client.is_some(),
            sessions,
            history: info.history.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
#[path = "info_tests.rs"]
mod tests;
