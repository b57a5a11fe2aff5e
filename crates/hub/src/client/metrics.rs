// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request counters for one backend client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::breaker::BreakerState;

/// Live counters. All updates are relaxed; this is observability, not
/// coordination.
#[derive(Debug, Default)]
pub struct ClientMetrics {
    total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
    breaker_rejections: AtomicU64,
    latency_total_ms: AtomicU64,
    latency_samples: AtomicU64,
}

impl ClientMetrics {
    pub fn record_attempt(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, latency: Duration) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.latency_total_ms.fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, timed_out: bool) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_breaker_rejection(&self) {
        self.breaker_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, breaker: BreakerState) -> MetricsSnapshot {
        let samples = self.latency_samples.load(Ordering::Relaxed);
        let avg_latency_ms = if samples == 0 {
            0.0
        } else {
            self.latency_total_ms.load(Ordering::Relaxed) as f64 / samples as f64
        };
        MetricsSnapshot {
            total: self.total.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            breaker_rejections: self.breaker_rejections.load(Ordering::Relaxed),
            avg_latency_ms,
            breaker,
        }
    }
}

/// Point-in-time view of a client's counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub breaker_rejections: u64,
    pub avg_latency_ms: f64,
    pub breaker: BreakerState,
}
