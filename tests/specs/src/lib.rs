// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end hub scenarios.
//!
//! Starts a real hub (ephemeral port, temp instances directory, tight
//! intervals) and mock backend instances (tiny axum routers), then drives
//! the hub over plain HTTP and raw-socket SSE.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use brummer_hub::config::HubConfig;
use brummer_hub::discovery::{InstanceDescriptor, ProcessInfo};
use brummer_hub::manager::{ConnectionState, InstanceSnapshot, ManagerHandle};
use brummer_hub::Hub;

pub const TIMEOUT: Duration = Duration::from_secs(10);

/// A running hub bound to an ephemeral port, with its instances directory.
pub struct SpecHub {
    pub hub: Hub,
    pub dir: tempfile::TempDir,
}

impl SpecHub {
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.hub.port())
    }

    /// Write a descriptor for a mock instance into the instances dir.
    pub fn announce(&self, id: &str, port: u16) -> anyhow::Result<()> {
        self.hub.discovery().register_instance(&descriptor(id, port))
    }

    /// Remove an instance's descriptor.
    pub fn withdraw(&self, id: &str) -> anyhow::Result<()> {
        self.hub.discovery().unregister_instance(id)
    }
}

/// Installs the rustls crypto provider exactly once per process, as
/// required when depending on reqwest's `rustls-no-provider` feature.
fn ensure_crypto_provider() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

/// Start a hub with spec-test timings: 100 ms discovery scans, 50 ms pings.
pub async fn start_hub() -> anyhow::Result<SpecHub> {
    start_hub_with(|_| {}).await
}

/// Start a hub, letting the caller tweak the config first.
pub async fn start_hub_with(tweak: impl FnOnce(&mut HubConfig)) -> anyhow::Result<SpecHub> {
    ensure_crypto_provider();
    let dir = tempfile::tempdir()?;
    let mut config = HubConfig {
        port: 0,
        instances_dir: Some(dir.path().to_path_buf()),
        scan_interval_ms: 100,
        ping_interval_ms: 50,
        ping_timeout_ms: 25,
        max_ping_failures: 2,
        connect_backoff_base_ms: 20,
        connect_backoff_cap_ms: 100,
        request_timeout_ms: 2000,
        retry_attempts: 0,
        retry_base_ms: 10,
        heartbeat_ms: 200,
        ..HubConfig::default()
    };
    tweak(&mut config);
    let hub = Hub::start(config).await?;
    Ok(SpecHub { hub, dir })
}

/// A descriptor owned by this test process (live PID, fresh ping).
pub fn descriptor(id: &str, port: u16) -> InstanceDescriptor {
    InstanceDescriptor {
        id: id.to_owned(),
        name: format!("{id} dev server"),
        directory: "/tmp".into(),
        port,
        started_at: Utc::now(),
        last_ping: Utc::now(),
        process_info: ProcessInfo {
            pid: std::process::id() as i32,
            executable: "node".to_owned(),
        },
    }
}

// -- Mock backend instance -----------------------------------------------------

/// A mock MCP backend recording every request body it sees.
#[derive(Clone)]
pub struct MockInstance {
    pub port: u16,
    pub requests: Arc<Mutex<Vec<Value>>>,
    pub fail_pings: Arc<AtomicBool>,
    tools: Arc<Vec<String>>,
}

impl MockInstance {
    /// Bodies of all recorded `/mcp` POSTs.
    pub fn recorded(&self) -> Vec<Value> {
        self.requests.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    /// Recorded requests for one JSON-RPC method.
    pub fn recorded_calls(&self, method: &str) -> Vec<Value> {
        self.recorded().into_iter().filter(|r| r["method"] == method).collect()
    }
}

async fn mock_mcp(
    State(mock): State<MockInstance>,
    Json(body): Json<Value>,
) -> axum::response::Response {
    use axum::response::IntoResponse;

    mock.requests
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .push(body.clone());

    let id = body.get("id").cloned().unwrap_or(Value::Null);
    let method = body["method"].as_str().unwrap_or_default();
    let result = match method {
        "initialize" => json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "mock-instance", "version": "0.0.1"},
        }),
        "ping" => {
            if mock.fail_pings.load(Ordering::Relaxed) {
                return (axum::http::StatusCode::SERVICE_UNAVAILABLE, "down").into_response();
            }
            json!({})
        }
        "tools/list" => json!({
            "tools": mock.tools.iter().map(|name| json!({"name": name})).collect::<Vec<_>>(),
        }),
        "tools/call" => {
            let name = body["params"]["name"].as_str().unwrap_or_default();
            json!({
                "content": [{"type": "text", "text": format!("ran {name}")}],
            })
        }
        "resources/list" => json!({
            "resources": [{"uri": "logs://recent", "name": "Recent logs", "mimeType": "text/plain"}],
        }),
        "resources/read" => json!({
            "contents": [{"uri": body["params"]["uri"], "mimeType": "text/plain", "text": "log line"}],
        }),
        "prompts/list" => json!({"prompts": []}),
        _ => json!({}),
    };
    Json(json!({"jsonrpc": "2.0", "id": id, "result": result})).into_response()
}

/// Spawn a mock backend exporting the given tools.
pub async fn spawn_instance(tools: &[&str]) -> anyhow::Result<MockInstance> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let mock = MockInstance {
        port,
        requests: Arc::new(Mutex::new(Vec::new())),
        fail_pings: Arc::new(AtomicBool::new(false)),
        tools: Arc::new(tools.iter().map(|s| (*s).to_owned()).collect()),
    };
    let app = Router::new().route("/mcp", post(mock_mcp)).with_state(mock.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(mock)
}

// -- Polling helpers -----------------------------------------------------------

/// Poll until `check` yields `Some`, or fail at the deadline.
pub async fn eventually<T, F, Fut>(what: &str, mut check: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        if let Some(value) = check().await {
            return Ok(value);
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Poll the manager until an instance reaches `state`.
pub async fn wait_state(
    manager: &ManagerHandle,
    id: &str,
    state: ConnectionState,
) -> anyhow::Result<InstanceSnapshot> {
    let id = id.to_owned();
    eventually("instance state", || {
        let manager = manager.clone();
        let id = id.clone();
        async move {
            let list = manager.list_instances().await.ok()?;
            list.into_iter().find(|s| s.id == id && s.state == state)
        }
    })
    .await
}

/// Poll until an instance's recorded history contains a transition into
/// `state`. Robust against states whose live window is brief (Retrying is
/// usually re-entered by the connect worker within milliseconds).
pub async fn wait_history(
    manager: &ManagerHandle,
    id: &str,
    state: ConnectionState,
) -> anyhow::Result<InstanceSnapshot> {
    let id = id.to_owned();
    eventually("instance history", || {
        let manager = manager.clone();
        let id = id.clone();
        async move {
            let list = manager.list_instances().await.ok()?;
            list.into_iter()
                .find(|s| s.id == id && s.history.iter().any(|t| t.to == state))
        }
    })
    .await
}

/// Issue one JSON-RPC request to the hub's `/mcp` endpoint.
pub async fn rpc(
    client: &reqwest::Client,
    base_url: &str,
    session: &str,
    body: &Value,
) -> anyhow::Result<Value> {
    let resp = client
        .post(format!("{base_url}/mcp"))
        .header("Accept", "application/json")
        .header("Mcp-Session-Id", session)
        .json(body)
        .send()
        .await?;
    Ok(resp.json().await?)
}

// -- Raw-socket SSE ------------------------------------------------------------

/// An open SSE stream, read line-by-line off the raw socket.
pub struct SseStream {
    reader: BufReader<TcpStream>,
}

/// Open `GET /mcp` as an SSE stream for a session. Fails unless the hub
/// answers 200 with `text/event-stream`.
pub async fn open_sse(port: u16, session: &str) -> anyhow::Result<SseStream> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;
    let request = format!(
        "GET /mcp HTTP/1.1\r\nHost: localhost\r\nAccept: text/event-stream\r\nMcp-Session-Id: {session}\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    anyhow::ensure!(line.contains("200"), "unexpected SSE status line: {line}");

    // Drain response headers.
    loop {
        line.clear();
        reader.read_line(&mut line).await?;
        if line == "\r\n" || line == "\n" || line.is_empty() {
            break;
        }
    }
    Ok(SseStream { reader })
}

impl SseStream {
    /// Read the next complete SSE frame (terminated by a blank line).
    /// Comment-only frames (the transport banner) are skipped.
    pub async fn next_frame(&mut self, timeout: Duration) -> anyhow::Result<String> {
        tokio::time::timeout(timeout, async {
            let mut frame = String::new();
            loop {
                let mut line = String::new();
                let n = self.reader.read_line(&mut line).await?;
                anyhow::ensure!(n > 0, "sse stream closed");
                // Chunked transfer encoding: skip bare hex size lines.
                let trimmed = line.trim_end();
                if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
                    continue;
                }
                if trimmed.is_empty() {
                    if frame.lines().all(|l| l.starts_with(':') || l.is_empty()) {
                        frame.clear();
                        continue;
                    }
                    return Ok(frame);
                }
                frame.push_str(trimmed);
                frame.push('\n');
            }
        })
        .await
        .map_err(|_| anyhow::anyhow!("timed out waiting for sse frame"))?
    }

    /// Read frames until one contains `needle`.
    pub async fn wait_for(&mut self, needle: &str, timeout: Duration) -> anyhow::Result<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .ok_or_else(|| anyhow::anyhow!("timed out waiting for frame containing {needle}"))?;
            let frame = self.next_frame(remaining).await?;
            if frame.contains(needle) {
                return Ok(frame);
            }
        }
    }
}
