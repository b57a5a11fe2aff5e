// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resource subscription table: session ID → subscribed URIs.
//!
//! Guarded by a reader/writer lock that is never held across I/O; the
//! fan-out task copies the subscriber set out before pushing frames.

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;

#[derive(Default)]
pub struct SubscriptionTable {
    inner: RwLock<HashMap<String, HashSet<String>>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `(session, uri)`. Subscribing twice is a no-op.
    pub async fn subscribe(&self, session: &str, uri: &str) {
        self.inner
            .write()
            .await
            .entry(session.to_owned())
            .or_default()
            .insert(uri.to_owned());
    }

    /// Remove one mapping. Idempotent.
    pub async fn unsubscribe(&self, session: &str, uri: &str) {
        let mut inner = self.inner.write().await;
        if let Some(uris) = inner.get_mut(session) {
            uris.remove(uri);
            if uris.is_empty() {
                inner.remove(session);
            }
        }
    }

    /// Drop every subscription a session holds.
    pub async fn remove_session(&self, session: &str) {
        self.inner.write().await.remove(session);
    }

    /// Sessions subscribed to `uri`, copied out for lock-free fan-out.
    pub async fn sessions_for(&self, uri: &str) -> Vec<String> {
        self.inner
            .read()
            .await
            .iter()
            .filter(|(_, uris)| uris.contains(uri))
            .map(|(session, _)| session.clone())
            .collect()
    }

    /// URIs a session is subscribed to.
    pub async fn uris_for(&self, session: &str) -> Vec<String> {
        self.inner
            .read()
            .await
            .get(session)
            .map(|uris| {
                let mut list: Vec<String> = uris.iter().cloned().collect();
                list.sort();
                list
            })
            .unwrap_or_default()
    }
}
