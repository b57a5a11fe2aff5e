// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SSE plumbing for the `/mcp` endpoint.
//!
//! Each GET stream runs a pump task that multiplexes the session's
//! outbound channel with a heartbeat timer onto one writer, so frames for
//! a session are totally ordered. The pump owns disconnect cleanup: when
//! the client goes away (or the stream is displaced by a reconnect) the
//! session's subscriptions and routing are torn down.

use std::convert::Infallible;
use std::sync::Arc;

use axum::response::sse::{Event, Sse};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::events::HubEvent;
use crate::server::ServerState;

/// Writer-side buffer between the pump and the HTTP connection.
const WRITER_BUFFER: usize = 32;

/// Open the persistent notification stream for a session.
pub async fn notification_stream(
    state: Arc<ServerState>,
    session_id: String,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let (inbound, generation) = state.sessions.attach_stream(&session_id).await;
    let (writer_tx, writer_rx) = mpsc::channel::<Event>(WRITER_BUFFER);

    let comment =
        Event::default().comment(format!("brummer-mcp streamable transport, session {session_id}"));

    spawn_pump(Arc::clone(&state), session_id, generation, inbound, writer_tx);

    let stream = tokio_stream::once(Ok(comment))
        .chain(ReceiverStream::new(writer_rx).map(Ok));
    Sse::new(stream)
}

/// Finite SSE stream carrying the responses of one POST exchange.
pub fn response_stream(
    session_id: &str,
    responses: Vec<Value>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let comment = Event::default().comment(format!("brummer-mcp batch, session {session_id}"));
    let frames: Vec<Result<Event, Infallible>> = std::iter::once(Ok(comment))
        .chain(responses.into_iter().map(|r| Ok(message_event(&r))))
        .collect();
    Sse::new(tokio_stream::iter(frames))
}

fn spawn_pump(
    state: Arc<ServerState>,
    session_id: String,
    generation: u64,
    mut inbound: mpsc::Receiver<Value>,
    writer_tx: mpsc::Sender<Event>,
) {
    tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(state.config.heartbeat_interval());
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; consume it so heartbeats
        // start one interval in.
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                frame = inbound.recv() => match frame {
                    // Channel replaced or session removed.
                    None => break,
                    Some(frame) => {
                        if writer_tx.send(message_event(&frame)).await.is_err() {
                            break;
                        }
                    }
                },
                _ = heartbeat.tick() => {
                    if writer_tx.send(ping_event()).await.is_err() {
                        break;
                    }
                }
            }
        }

        // Only the stream that still owns the session cleans it up; a
        // displaced pump exits quietly.
        if state.sessions.remove_if_stream(&session_id, generation).await {
            state.subscriptions.remove_session(&session_id).await;
            let _ = state.manager.disconnect_session(&session_id).await;
            tracing::debug!(session = %session_id, "sse stream closed, session dropped");
            state.bus.publish(HubEvent::SessionDisconnected { session: session_id });
        }
    });
}

fn message_event(frame: &Value) -> Event {
    Event::default().event("message").data(frame.to_string())
}

fn ping_event() -> Event {
    let payload = serde_json::json!({ "timestamp": chrono::Utc::now().to_rfc3339() });
    Event::default().event("ping").data(payload.to_string())
}
