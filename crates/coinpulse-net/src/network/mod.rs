//! Network resilience: probing, offline tracking, breakers, and retries.
//!
//! This module provides:
//! - Failure classification from raw transport/serde errors
//! - Active connectivity probing with quality grading
//! - Offline state tracking with hysteresis and debounced indicators
//! - Circuit breaker pattern for repeatedly failing endpoints
//! - Retry orchestration with exponential backoff and jitter
//! - A recovery façade that coordinates the layers and emits events

pub mod circuit_breaker;
pub mod classify;
pub mod offline;
pub mod probe;
pub mod recovery;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState,
};
pub use classify::{classify, host_key};
pub use offline::{OfflineState, OfflineTracker, OfflineTrackerConfig};
pub use probe::{
    ConnectionQuality, ConnectionSnapshot, ConnectionStatus, ConnectivityProber, ProbeConfig,
};
pub use recovery::{RecoveryEvent, RecoveryEventKind, RecoveryManager, RecoveryOptions};
pub use retry::{BackoffStrategy, RetryEvent, RetryOutcome, RetryPolicy, RetryRunner};
