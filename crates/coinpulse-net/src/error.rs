//! Failure types for the resilience layer.
//!
//! Every transport or protocol error is normalized into a [`Failure`] before
//! any retry or circuit decision is made — no raw error type crosses the
//! retry boundary. Failures are immutable value types compared by structural
//! equality (message + details + code).

use std::time::Duration;
use thiserror::Error;

/// The closed set of failure categories the resilience layer reasons about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Generic network-level failure (DNS, unreachable link, offline).
    Network,
    /// HTTP-level failure carrying a status code.
    Api,
    /// Malformed payload or parse error.
    Data,
    /// Local cache failure.
    Cache,
    /// Socket-level failure (refused, reset, no route).
    Connection,
    /// A connect, send, or receive phase timed out.
    Timeout,
    /// Anything the classifier does not recognize.
    Unknown,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureKind::Network => "network",
            FailureKind::Api => "api",
            FailureKind::Data => "data",
            FailureKind::Cache => "cache",
            FailureKind::Connection => "connection",
            FailureKind::Timeout => "timeout",
            FailureKind::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// A normalized failure produced by the classifier.
///
/// Carries a human-readable `message` suitable for direct display, an
/// optional `details` string for diagnostics, and an optional numeric
/// `code` (e.g. an HTTP status).
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize)]
#[error("{message}")]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    pub details: Option<String>,
    pub code: Option<u16>,
}

impl Failure {
    /// Create a failure of an arbitrary kind.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            code: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Network, message)
    }

    pub fn api(message: impl Into<String>, code: u16) -> Self {
        Self {
            code: Some(code),
            ..Self::new(FailureKind::Api, message)
        }
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Data, message)
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Cache, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Connection, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unknown, message)
    }

    /// Attach a diagnostics string.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Whether a retry can plausibly recover from this failure.
    ///
    /// Network, timeout, and connection failures are transient by nature.
    /// API failures are recoverable only for rate limiting and server-side
    /// errors; client errors (400/401/403/404) are never retried.
    pub fn is_recoverable(&self) -> bool {
        match self.kind {
            FailureKind::Network | FailureKind::Timeout | FailureKind::Connection => true,
            FailureKind::Api => matches!(self.code, Some(429 | 500 | 502 | 503 | 504)),
            FailureKind::Data | FailureKind::Cache | FailureKind::Unknown => false,
        }
    }
}

/// Result alias for operations that surface a normalized [`Failure`].
pub type NetResult<T> = std::result::Result<T, Failure>;

/// Terminal error returned by the recovery façade.
///
/// Circuit-open rejections are a distinct signal so callers can tell
/// "target is known-bad, not retried" apart from "retries exhausted".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecoveryError {
    #[error(transparent)]
    Failure(#[from] Failure),

    #[error("circuit breaker open for '{key}' after {failure_count} consecutive failures")]
    CircuitOpen { key: String, failure_count: u32 },
}

impl RecoveryError {
    /// The underlying failure, if this is not a circuit-open rejection.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            RecoveryError::Failure(f) => Some(f),
            RecoveryError::CircuitOpen { .. } => None,
        }
    }

    /// Flatten into a [`Failure`], mapping circuit-open to a connection
    /// failure for callers that only speak the closed kind set.
    pub fn into_failure(self) -> Failure {
        match self {
            RecoveryError::Failure(f) => f,
            RecoveryError::CircuitOpen { key, failure_count } => {
                Failure::connection(format!("Service '{}' is temporarily unavailable", key))
                    .with_details(format!(
                        "circuit breaker open after {} consecutive failures",
                        failure_count
                    ))
            }
        }
    }
}

/// Internal helper: a timeout failure that names the elapsed bound.
pub(crate) fn timeout_after(phase: &str, limit: Duration) -> Failure {
    Failure::timeout(format!("{} timed out after {:?}", phase, limit))
}
