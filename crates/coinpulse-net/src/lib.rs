//! CoinPulse Net - network resilience layer for exchange API clients.
//!
//! This crate keeps a market-data application usable on flaky mobile and
//! desktop networks. It classifies transport failures, probes connectivity,
//! tracks offline state with hysteresis, guards hot endpoints with circuit
//! breakers, and retries transient failures with jittered exponential
//! backoff. The [`network::RecoveryManager`] façade ties the layers together
//! and publishes a uniform event stream.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use coinpulse_net::network::{ConnectivityProber, OfflineTracker, RecoveryManager};
//!
//! #[tokio::main]
//! async fn main() {
//!     let prober = Arc::new(ConnectivityProber::new());
//!     let tracker = OfflineTracker::new(prober);
//!     let recovery = RecoveryManager::new(tracker);
//!
//!     let body = recovery
//!         .execute_with_recovery("spot-ticker", || async {
//!             reqwest::get("https://api.exchange.example/v1/ticker")
//!                 .await?
//!                 .error_for_status()?
//!                 .text()
//!                 .await
//!         })
//!         .await;
//!
//!     match body {
//!         Ok(text) => println!("ticker: {text}"),
//!         Err(err) => eprintln!("gave up: {err}"),
//!     }
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod network;

pub use cancel::{CancellationToken, CancelledError};
pub use error::{Failure, FailureKind, NetResult, RecoveryError};
pub use network::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, ConnectionQuality, ConnectionSnapshot,
    ConnectionStatus, ConnectivityProber, OfflineState, OfflineTracker, RecoveryEvent,
    RecoveryEventKind, RecoveryManager, RecoveryOptions, RetryPolicy, RetryRunner,
};
