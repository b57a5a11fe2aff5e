// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the brummer hub.
#[derive(Debug, Clone, clap::Args)]
pub struct HubConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "BRUMMER_HUB_HOST")]
    pub host: String,

    /// Port to listen on. If taken, the next free port upward is used.
    #[arg(long, default_value_t = 7777, env = "BRUMMER_HUB_PORT")]
    pub port: u16,

    /// Directory of instance descriptor files.
    #[arg(long, env = "BRUMMER_HUB_INSTANCES_DIR")]
    pub instances_dir: Option<PathBuf>,

    /// Discovery rescan interval in milliseconds.
    #[arg(long, default_value_t = 2000, env = "BRUMMER_HUB_SCAN_MS")]
    pub scan_interval_ms: u64,

    /// Age in milliseconds after which a descriptor with no ping is reaped.
    #[arg(long, default_value_t = 90_000, env = "BRUMMER_HUB_STALE_TTL_MS")]
    pub stale_ttl_ms: u64,

    /// Health ping interval in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "BRUMMER_HUB_PING_INTERVAL_MS")]
    pub ping_interval_ms: u64,

    /// Health ping timeout in milliseconds.
    #[arg(long, default_value_t = 5000, env = "BRUMMER_HUB_PING_TIMEOUT_MS")]
    pub ping_timeout_ms: u64,

    /// Consecutive ping failures before an Active instance is demoted.
    #[arg(long, default_value_t = 3, env = "BRUMMER_HUB_MAX_PING_FAILURES")]
    pub max_ping_failures: u32,

    /// Base delay for connect retry backoff in milliseconds.
    #[arg(long, default_value_t = 500, env = "BRUMMER_HUB_CONNECT_BACKOFF_BASE_MS")]
    pub connect_backoff_base_ms: u64,

    /// Cap for connect retry backoff in milliseconds.
    #[arg(long, default_value_t = 60_000, env = "BRUMMER_HUB_CONNECT_BACKOFF_CAP_MS")]
    pub connect_backoff_cap_ms: u64,

    /// Default deadline for a backend request in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "BRUMMER_HUB_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: u64,

    /// Max retry attempts for a retryable backend failure.
    #[arg(long, default_value_t = 3, env = "BRUMMER_HUB_RETRY_ATTEMPTS")]
    pub retry_attempts: u32,

    /// Base delay for request retry backoff in milliseconds.
    #[arg(long, default_value_t = 250, env = "BRUMMER_HUB_RETRY_BASE_MS")]
    pub retry_base_ms: u64,

    /// Consecutive failures before the circuit breaker opens.
    #[arg(long, default_value_t = 5, env = "BRUMMER_HUB_BREAKER_THRESHOLD")]
    pub breaker_failure_threshold: u32,

    /// Time the breaker stays open before admitting a probe, in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "BRUMMER_HUB_BREAKER_RECOVERY_MS")]
    pub breaker_recovery_ms: u64,

    /// Max idle pooled connections per backend host.
    #[arg(long, default_value_t = 8, env = "BRUMMER_HUB_POOL_MAX_IDLE")]
    pub pool_max_idle_per_host: usize,

    /// Capacity of each session's outbound event channel.
    #[arg(long, default_value_t = 64, env = "BRUMMER_HUB_SESSION_CHANNEL_CAPACITY")]
    pub session_channel_capacity: usize,

    /// SSE heartbeat interval in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "BRUMMER_HUB_HEARTBEAT_MS")]
    pub heartbeat_ms: u64,
}

impl HubConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn stale_ttl(&self) -> Duration {
        Duration::from_millis(self.stale_ttl_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn connect_backoff_base(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_base_ms)
    }

    pub fn connect_backoff_cap(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_cap_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    pub fn breaker_recovery(&self) -> Duration {
        Duration::from_millis(self.breaker_recovery_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    /// Resolved instances directory: the configured path, or
    /// `$XDG_DATA_HOME/brummer/instances` (falling back to
    /// `~/.local/share/brummer/instances`).
    pub fn resolved_instances_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.instances_dir {
            return dir.clone();
        }
        let base = std::env::var_os("XDG_DATA_HOME").map(PathBuf::from).unwrap_or_else(|| {
            let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
            home.join(".local").join("share")
        });
        base.join("brummer").join("instances")
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 7777,
            instances_dir: None,
            scan_interval_ms: 2000,
            stale_ttl_ms: 90_000,
            ping_interval_ms: 10_000,
            ping_timeout_ms: 5000,
            max_ping_failures: 3,
            connect_backoff_base_ms: 500,
            connect_backoff_cap_ms: 60_000,
            request_timeout_ms: 30_000,
            retry_attempts: 3,
            retry_base_ms: 250,
            breaker_failure_threshold: 5,
            breaker_recovery_ms: 30_000,
            pool_max_idle_per_host: 8,
            session_channel_capacity: 64,
            heartbeat_ms: 30_000,
        }
    }
}
