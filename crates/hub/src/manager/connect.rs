// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-instance connect worker.
//!
//! Drives one instance from Discovered/Retrying to Active: create a
//! client, run the `initialize` handshake, install the client, promote.
//! On failure, demote to Retrying and sleep a full-jitter backoff before
//! the next attempt. The worker exits once the instance is Active, when a
//! transition is denied (the instance moved under it, e.g. to Dead), or
//! when its cancellation token fires.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::{backoff_with_jitter, Client, ClientConfig};
use crate::manager::info::ConnectionState;
use crate::manager::ManagerHandle;

pub(crate) struct ConnectWorker {
    pub id: String,
    pub base_url: String,
    pub client_config: ClientConfig,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub initial_attempt: u32,
    pub generation: u64,
}

impl ConnectWorker {
    pub(crate) fn spawn(self, handle: ManagerHandle, cancel: CancellationToken) {
        tokio::spawn(async move {
            let id = self.id.clone();
            let generation = self.generation;
            self.run(&handle, &cancel).await;
            handle.worker_done(&id, generation).await;
        });
    }

    async fn run(self, handle: &ManagerHandle, cancel: &CancellationToken) {
        let mut attempt = self.initial_attempt;
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let reason = if attempt == 0 { "connect" } else { "reconnect" };
            if handle.update_state(&self.id, ConnectionState::Connecting, reason).await.is_err() {
                return;
            }

            let client = Arc::new(Client::new(self.base_url.clone(), self.client_config.clone()));
            match client.initialize(cancel).await {
                Ok(_) => {
                    tracing::info!(instance_id = %self.id, url = %self.base_url, "instance initialized");
                    if handle.set_client(&self.id, client).await.is_err() {
                        return;
                    }
                    let _ =
                        handle.update_state(&self.id, ConnectionState::Active, "initialized").await;
                    return;
                }
                Err(e) => {
                    if handle
                        .update_state(&self.id, ConnectionState::Retrying, &e.to_string())
                        .await
                        .is_err()
                    {
                        return;
                    }
                    attempt = attempt.saturating_add(1);
                    let delay = backoff_with_jitter(self.backoff_base, attempt, self.backoff_cap);
                    tracing::debug!(
                        instance_id = %self.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        err = %e,
                        "connect attempt failed"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}
