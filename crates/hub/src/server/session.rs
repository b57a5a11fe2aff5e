// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Frontend session table.
//!
//! A session exists from first use of its `Mcp-Session-Id` until SSE
//! disconnect or shutdown deletes it. Each session carries one bounded
//! outbound channel; pushes never block, and an overflow drops the frame
//! and bumps the session's counter — nothing is lost silently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};

/// One frontend client's state.
pub struct ClientSession {
    pub id: String,
    pub created_at: DateTime<Utc>,
    outbound: Option<mpsc::Sender<Value>>,
    /// Bumped on every stream attach, so a displaced stream's teardown
    /// cannot reap its successor's session.
    stream_generation: u64,
    pub dropped_events: u64,
}

impl ClientSession {
    fn new(id: String) -> Self {
        Self { id, created_at: Utc::now(), outbound: None, stream_generation: 0, dropped_events: 0 }
    }

    pub fn sse_attached(&self) -> bool {
        self.outbound.is_some()
    }
}

/// Outcome of an outbound push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    /// Channel full: frame dropped, counter bumped.
    Dropped,
    /// Session unknown or no SSE stream attached.
    NoStream,
}

/// Table of live sessions.
pub struct SessionTable {
    channel_capacity: usize,
    inner: RwLock<HashMap<String, ClientSession>>,
    dropped_total: AtomicU64,
}

impl SessionTable {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            channel_capacity: channel_capacity.max(1),
            inner: RwLock::new(HashMap::new()),
            dropped_total: AtomicU64::new(0),
        }
    }

    /// Ensure a session exists. Returns true when this is its first use.
    pub async fn touch(&self, id: &str) -> bool {
        let mut inner = self.inner.write().await;
        if inner.contains_key(id) {
            return false;
        }
        inner.insert(id.to_owned(), ClientSession::new(id.to_owned()));
        true
    }

    /// Attach an SSE stream: create the outbound channel and hand back the
    /// receiver plus its generation. An existing stream for the same
    /// session is displaced (its receiver sees a closed channel).
    pub async fn attach_stream(&self, id: &str) -> (mpsc::Receiver<Value>, u64) {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let mut inner = self.inner.write().await;
        let session =
            inner.entry(id.to_owned()).or_insert_with(|| ClientSession::new(id.to_owned()));
        session.outbound = Some(tx);
        session.stream_generation = session.stream_generation.wrapping_add(1);
        (rx, session.stream_generation)
    }

    /// Delete a session outright.
    pub async fn remove(&self, id: &str) -> bool {
        self.inner.write().await.remove(id).is_some()
    }

    /// Delete a session only if `generation` still identifies its live
    /// stream. A displaced stream's teardown is a no-op.
    pub async fn remove_if_stream(&self, id: &str, generation: u64) -> bool {
        let mut inner = self.inner.write().await;
        match inner.get(id) {
            Some(session) if session.stream_generation == generation => {
                inner.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Non-blocking push to one session's outbound channel.
    pub async fn push(&self, id: &str, frame: Value) -> PushOutcome {
        let mut inner = self.inner.write().await;
        let Some(session) = inner.get_mut(id) else {
            return PushOutcome::NoStream;
        };
        let Some(ref tx) = session.outbound else {
            return PushOutcome::NoStream;
        };
        match tx.try_send(frame) {
            Ok(()) => PushOutcome::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => {
                session.dropped_events = session.dropped_events.saturating_add(1);
                self.dropped_total.fetch_add(1, Ordering::Relaxed);
                PushOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Stream went away; the disconnect path will reap the session.
                session.outbound = None;
                PushOutcome::NoStream
            }
        }
    }

    /// Push a frame to every session with a live stream.
    pub async fn broadcast(&self, frame: &Value) -> usize {
        let ids: Vec<String> = {
            let inner = self.inner.read().await;
            inner
                .values()
                .filter(|s| s.sse_attached())
                .map(|s| s.id.clone())
                .collect()
        };
        let mut delivered = 0;
        for id in ids {
            if self.push(&id, frame.clone()).await == PushOutcome::Delivered {
                delivered += 1;
            }
        }
        delivered
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.inner.read().await.contains_key(id)
    }

    pub async fn dropped_events(&self, id: &str) -> u64 {
        self.inner.read().await.get(id).map(|s| s.dropped_events).unwrap_or(0)
    }

    /// Process-wide overflow counter.
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
