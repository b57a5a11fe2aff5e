// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON-RPC transport to a single backend instance.
//!
//! One [`Client`] per backend: pooled HTTP connections, monotonic request
//! IDs, deadline-bounded requests with retry + full-jitter backoff, and a
//! circuit breaker consulted before any I/O.

pub mod breaker;
pub mod metrics;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::HubConfig;
use crate::error::{classify_reqwest, classify_status, FailureKind, TransportError};
use crate::protocol::{JsonRpcError, PromptInfo, ResourceInfo, ToolInfo, PROTOCOL_VERSION};

use breaker::{BreakerState, CircuitBreaker};
use metrics::{ClientMetrics, MetricsSnapshot};

/// Server-requested backoff applied after an HTTP 429.
const RATE_LIMIT_DELAY: Duration = Duration::from_secs(30);

/// Transport tunables, lifted from the hub config.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub request_timeout: Duration,
    pub retry_attempts: u32,
    pub retry_base: Duration,
    pub breaker_failure_threshold: u32,
    pub breaker_recovery: Duration,
    pub pool_max_idle_per_host: usize,
}

impl From<&HubConfig> for ClientConfig {
    fn from(config: &HubConfig) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            retry_attempts: config.retry_attempts,
            retry_base: config.retry_base(),
            breaker_failure_threshold: config.breaker_failure_threshold,
            breaker_recovery: config.breaker_recovery(),
            pool_max_idle_per_host: config.pool_max_idle_per_host,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from(&HubConfig::default())
    }
}

/// Outcome of a JSON-RPC call that reached give-up.
#[derive(Debug, Clone)]
pub enum CallError {
    /// The request never completed a JSON-RPC exchange.
    Transport(TransportError),
    /// The backend answered with a JSON-RPC error object.
    Rpc(JsonRpcError),
}

impl CallError {
    pub fn transport(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Transport(TransportError::new(kind, message))
    }

    /// Whether the failure indicates the backend itself is unhealthy (as
    /// opposed to a bad request the backend rejected).
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Map to a JSON-RPC `(code, message)` pair for the frontend surface.
    pub fn to_rpc_error(&self) -> (i64, String) {
        match self {
            Self::Transport(t) => (crate::protocol::APPLICATION_ERROR, t.to_string()),
            Self::Rpc(e) => (e.code, e.message.clone()),
        }
    }
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(t) => write!(f, "{t}"),
            Self::Rpc(e) => write!(f, "rpc error {}: {}", e.code, e.message),
        }
    }
}

impl std::error::Error for CallError {}

/// JSON-RPC client for one backend instance.
pub struct Client {
    base_url: String,
    http: reqwest::Client,
    breaker: CircuitBreaker,
    metrics: ClientMetrics,
    next_id: AtomicI64,
    config: ClientConfig,
}

/// Installs the rustls crypto provider exactly once per process, as
/// required when depending on reqwest's `rustls-no-provider` feature.
fn ensure_crypto_provider() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

impl Client {
    pub fn new(base_url: impl Into<String>, config: ClientConfig) -> Self {
        ensure_crypto_provider();
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into(),
            http,
            breaker: CircuitBreaker::new(
                config.breaker_failure_threshold,
                config.breaker_recovery,
            ),
            metrics: ClientMetrics::default(),
            next_id: AtomicI64::new(1),
            config,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Current counters plus breaker state.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.breaker.state())
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    // -- Typed operations ------------------------------------------------------

    /// JSON-RPC `initialize` handshake.
    pub async fn initialize(&self, cancel: &CancellationToken) -> Result<Value, CallError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "brummer-hub",
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        self.request("initialize", Some(params), self.config.request_timeout, cancel).await
    }

    /// Health probe. No retries: the health monitor owns failure counting.
    pub async fn ping(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), CallError> {
        self.request_once("ping", None, timeout, cancel).await.map(|_| ())
    }

    pub async fn list_tools(&self, cancel: &CancellationToken) -> Result<Vec<ToolInfo>, CallError> {
        let result = self.request("tools/list", None, self.config.request_timeout, cancel).await?;
        Ok(decode_list(&result, "tools"))
    }

    pub async fn list_resources(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<ResourceInfo>, CallError> {
        let result =
            self.request("resources/list", None, self.config.request_timeout, cancel).await?;
        Ok(decode_list(&result, "resources"))
    }

    pub async fn list_prompts(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<PromptInfo>, CallError> {
        let result =
            self.request("prompts/list", None, self.config.request_timeout, cancel).await?;
        Ok(decode_list(&result, "prompts"))
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value, CallError> {
        let params = serde_json::json!({ "name": name, "arguments": arguments });
        self.request("tools/call", Some(params), timeout, cancel).await
    }

    pub async fn read_resource(
        &self,
        uri: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value, CallError> {
        let params = serde_json::json!({ "uri": uri });
        self.request("resources/read", Some(params), timeout, cancel).await
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<Value>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value, CallError> {
        let mut params = serde_json::json!({ "name": name });
        if let (Some(args), Some(obj)) = (arguments, params.as_object_mut()) {
            obj.insert("arguments".to_owned(), args);
        }
        self.request("prompts/get", Some(params), timeout, cancel).await
    }

    // -- Request machinery -----------------------------------------------------

    /// Issue a request with retries on retryable failures, bounded by the
    /// caller's deadline and the circuit breaker.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value, CallError> {
        let deadline_at = Instant::now() + deadline;
        let mut attempt: u32 = 0;

        loop {
            let remaining = deadline_at.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CallError::transport(
                    FailureKind::DeadlineExceeded,
                    format!("{method}: deadline exhausted after {attempt} attempt(s)"),
                ));
            }

            match self.attempt(method, params.clone(), remaining, cancel).await {
                Ok(value) => return Ok(value),
                Err(CallError::Rpc(err)) => return Err(CallError::Rpc(err)),
                Err(CallError::Transport(err)) => {
                    if !err.retryable() || attempt >= self.config.retry_attempts {
                        return Err(CallError::Transport(err));
                    }
                    let delay = if err.kind == FailureKind::RateLimited {
                        RATE_LIMIT_DELAY
                    } else {
                        backoff_with_jitter(self.config.retry_base, attempt, remaining)
                    };
                    let remaining = deadline_at.saturating_duration_since(Instant::now());
                    if delay >= remaining {
                        return Err(CallError::Transport(err));
                    }
                    tracing::debug!(
                        method,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        err = %err,
                        "backend request failed, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(CallError::transport(FailureKind::Cancelled, method));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Single-shot request (no retries). Used for health pings.
    pub async fn request_once(
        &self,
        method: &str,
        params: Option<Value>,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value, CallError> {
        self.attempt(method, params, deadline, cancel).await
    }

    async fn attempt(
        &self,
        method: &str,
        params: Option<Value>,
        remaining: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value, CallError> {
        if cancel.is_cancelled() {
            return Err(CallError::transport(FailureKind::Cancelled, method));
        }
        if !self.breaker.try_acquire() {
            self.metrics.record_breaker_rejection();
            return Err(CallError::transport(
                FailureKind::CircuitOpen,
                format!("circuit open for {}", self.base_url),
            ));
        }

        self.metrics.record_attempt();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params.unwrap_or(Value::Object(Default::default())),
        });

        let started = Instant::now();
        let send = self
            .http
            .post(format!("{}/mcp", self.base_url))
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .json(&body)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                self.breaker.abort_probe();
                return Err(CallError::transport(FailureKind::Cancelled, method));
            }
            result = tokio::time::timeout(remaining, send) => match result {
                Err(_) => {
                    self.record_transport_failure(FailureKind::Timeout);
                    return Err(CallError::transport(
                        FailureKind::Timeout,
                        format!("{method} timed out after {}ms", remaining.as_millis()),
                    ));
                }
                Ok(Err(e)) => {
                    let kind = classify_reqwest(&e);
                    self.record_transport_failure(kind);
                    return Err(CallError::transport(kind, e.to_string()));
                }
                Ok(Ok(resp)) => resp,
            },
        };

        if let Some(kind) = classify_status(response.status().as_u16()) {
            // 4xx is the caller's fault, not backend unhealthiness.
            if kind != FailureKind::ClientError {
                self.record_transport_failure(kind);
            } else {
                self.metrics.record_failure(false);
            }
            return Err(CallError::transport(
                kind,
                format!("{method}: backend returned HTTP {}", response.status()),
            ));
        }

        let bytes = match response.bytes().await {
            Ok(b) => b,
            Err(e) => {
                let kind = classify_reqwest(&e);
                self.record_transport_failure(kind);
                return Err(CallError::transport(kind, e.to_string()));
            }
        };
        let parsed: crate::protocol::JsonRpcResponse = match serde_json::from_slice(&bytes) {
            Ok(p) => p,
            Err(e) => {
                self.record_transport_failure(FailureKind::BadResponse);
                return Err(CallError::transport(
                    FailureKind::BadResponse,
                    format!("{method}: unparseable response: {e}"),
                ));
            }
        };

        if parsed.jsonrpc != "2.0" || parsed.id != Value::from(id) {
            self.record_transport_failure(FailureKind::BadResponse);
            return Err(CallError::transport(
                FailureKind::BadResponse,
                format!("{method}: response envelope mismatch"),
            ));
        }

        // A JSON-RPC error is a completed exchange: the backend is healthy.
        self.breaker.record_success();
        self.metrics.record_success(started.elapsed());
        match parsed.error {
            Some(err) => Err(CallError::Rpc(err)),
            None => Ok(parsed.result.unwrap_or(Value::Null)),
        }
    }

    fn record_transport_failure(&self, kind: FailureKind) {
        self.breaker.record_failure();
        self.metrics.record_failure(kind == FailureKind::Timeout);
    }
}

/// Full-jitter exponential backoff: uniform in `[0, base · 2^attempt]`,
/// capped by `remaining`.
pub(crate) fn backoff_with_jitter(base: Duration, attempt: u32, remaining: Duration) -> Duration {
    use rand::Rng;

    let ceiling = base.saturating_mul(1u32 << attempt.min(16)).min(remaining);
    let max_ms = ceiling.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}

fn decode_list<T: serde::de::DeserializeOwned>(result: &Value, key: &str) -> Vec<T> {
    result
        .get(key)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
