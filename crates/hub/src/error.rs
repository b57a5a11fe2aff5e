// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Failure taxonomy for backend transport errors, plus the JSON error
//! surface of the non-RPC HTTP endpoints.
//!
//! Low-level errors are classified once, near the transport boundary; the
//! client consults [`FailureKind::retryable`] to decide retry vs. give-up,
//! and the connection manager turns give-up into a state transition.

use std::fmt;

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

// -- Transport failure taxonomy ------------------------------------------------

/// Classified cause of a failed backend request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Backend not listening on its port.
    ConnRefused,
    /// Request exceeded its own deadline.
    Timeout,
    /// The caller's deadline expired before the request could run.
    DeadlineExceeded,
    /// Session or shutdown cancellation.
    Cancelled,
    /// Route down / network unreachable.
    NetworkUnreachable,
    /// Peer reset the connection mid-request.
    ConnReset,
    /// Address resolution failure.
    Dns,
    /// Permission, TLS, or protocol-level misconfiguration.
    Protocol,
    /// Circuit breaker rejected the call without I/O.
    CircuitOpen,
    /// Server asked us to back off.
    RateLimited,
    /// HTTP 5xx from the backend.
    ServerError,
    /// HTTP 4xx (other than 429) from the backend.
    ClientError,
    /// Malformed or mismatched JSON-RPC response.
    BadResponse,
}

impl FailureKind {
    /// Whether the client should retry a request that failed this way.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnRefused
                | Self::Timeout
                | Self::NetworkUnreachable
                | Self::ConnReset
                | Self::Dns
                | Self::RateLimited
                | Self::ServerError
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnRefused => "CONN_REFUSED",
            Self::Timeout => "TIMEOUT",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::Cancelled => "CANCELLED",
            Self::NetworkUnreachable => "NETWORK_UNREACHABLE",
            Self::ConnReset => "CONN_RESET",
            Self::Dns => "DNS",
            Self::Protocol => "PROTOCOL",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::RateLimited => "RATE_LIMITED",
            Self::ServerError => "SERVER_ERROR",
            Self::ClientError => "CLIENT_ERROR",
            Self::BadResponse => "BAD_RESPONSE",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified transport error carried up from the per-instance client.
#[derive(Debug, Clone)]
pub struct TransportError {
    pub kind: FailureKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn retryable(&self) -> bool {
        self.kind.retryable()
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TransportError {}

/// Classify a `reqwest` error by walking its source chain to the
/// underlying I/O error where possible.
pub fn classify_reqwest(err: &reqwest::Error) -> FailureKind {
    if err.is_timeout() {
        return FailureKind::Timeout;
    }
    if let Some(kind) = io_error_kind(err) {
        return match kind {
            std::io::ErrorKind::ConnectionRefused => FailureKind::ConnRefused,
            std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe => {
                FailureKind::ConnReset
            }
            std::io::ErrorKind::TimedOut => FailureKind::Timeout,
            std::io::ErrorKind::NetworkUnreachable | std::io::ErrorKind::HostUnreachable => {
                FailureKind::NetworkUnreachable
            }
            std::io::ErrorKind::PermissionDenied => FailureKind::Protocol,
            _ => FailureKind::ConnRefused,
        };
    }
    if err.is_connect() {
        // Connect failures without an I/O cause are usually resolution.
        return FailureKind::Dns;
    }
    FailureKind::Protocol
}

/// Classify an HTTP status from a backend response.
pub fn classify_status(status: u16) -> Option<FailureKind> {
    match status {
        429 => Some(FailureKind::RateLimited),
        s if s >= 500 => Some(FailureKind::ServerError),
        s if (400..500).contains(&s) => Some(FailureKind::ClientError),
        _ => None,
    }
}

fn io_error_kind(err: &(dyn std::error::Error + 'static)) -> Option<std::io::ErrorKind> {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return Some(io.kind());
        }
        source = cause.source();
    }
    None
}

// -- HTTP API errors (non-RPC endpoints) ---------------------------------------

/// Error codes for the plain-JSON endpoints (health, legacy shims).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiError {
    BadRequest,
    NotFound,
    UpstreamError,
    Internal,
}

impl ApiError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::UpstreamError => 502,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::NotFound => "NOT_FOUND",
            Self::UpstreamError => "UPSTREAM_ERROR",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse {
            error: ErrorBody { code: self.as_str().to_owned(), message: message.into() },
        };
        (status, Json(body))
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
