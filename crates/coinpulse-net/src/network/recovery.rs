//! Recovery façade coordinating the resilience layers.
//!
//! This is the surface the network client talks to: it checks the offline
//! gate, routes calls through a per-key circuit breaker or the retry
//! orchestrator, and emits a uniform event stream for observability. Event
//! delivery is best-effort; a slow or absent subscriber never blocks an
//! operation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::error::{Failure, RecoveryError};
use crate::network::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState,
};
use crate::network::offline::OfflineTracker;
use crate::network::retry::{RetryEvent, RetryPolicy, RetryRunner};

/// What happened during a guarded operation.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecoveryEventKind {
    Attempting { attempt: u32 },
    Succeeded { attempt: u32 },
    Failed { attempt: u32, failure: Failure },
    Retrying { attempt: u32, delay: Duration },
    SkippedOffline { attempt: u32 },
    CircuitTripped { state: CircuitState, failure_count: u32 },
}

/// One entry on the recovery event stream.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RecoveryEvent {
    pub key: String,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: RecoveryEventKind,
}

/// Per-call options for [`RecoveryManager::execute`].
#[derive(Clone)]
pub struct RecoveryOptions {
    /// Retry policy for the orchestrated path. Defaults to
    /// [`RetryPolicy::default`] when unset.
    pub retry_policy: Option<RetryPolicy>,
    /// When set, the call is delegated to a circuit breaker for this key
    /// instead of the retry orchestrator.
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    /// Fail fast with a network failure when the tracker reports offline.
    pub requires_network: bool,
    /// Custom retryability predicate; takes precedence over policy toggles.
    pub should_retry: Option<Arc<dyn Fn(&Failure) -> bool + Send + Sync>>,
    /// Cooperative cancellation handle for the retry loop.
    pub cancel: Option<CancellationToken>,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self {
            retry_policy: None,
            circuit_breaker: None,
            requires_network: true,
            should_retry: None,
            cancel: None,
        }
    }
}

impl RecoveryOptions {
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    pub fn with_requires_network(mut self, requires: bool) -> Self {
        self.requires_network = requires;
        self
    }

    pub fn with_should_retry(
        mut self,
        predicate: Arc<dyn Fn(&Failure) -> bool + Send + Sync>,
    ) -> Self {
        self.should_retry = Some(predicate);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Coordinating façade over the offline tracker, circuit breakers, and the
/// retry orchestrator.
///
/// Owns the per-key circuit breaker map (created lazily on first use) and
/// the broadcast event stream. Concurrent callers under the same key share
/// the breaker but run independent retry loops.
pub struct RecoveryManager {
    offline: Arc<OfflineTracker>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    events: broadcast::Sender<RecoveryEvent>,
    closed: AtomicBool,
}

impl RecoveryManager {
    pub fn new(offline: Arc<OfflineTracker>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            offline,
            breakers: RwLock::new(HashMap::new()),
            events,
            closed: AtomicBool::new(false),
        }
    }

    /// Subscribe to the recovery event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<RecoveryEvent> {
        self.events.subscribe()
    }

    /// The offline tracker backing this manager's network gate.
    pub fn offline_tracker(&self) -> &Arc<OfflineTracker> {
        &self.offline
    }

    /// Run an operation with default options (retry path, network required).
    pub async fn execute_with_recovery<F, Fut, T, E>(
        &self,
        key: &str,
        operation: F,
    ) -> Result<T, RecoveryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<Failure>,
    {
        self.execute(key, operation, RecoveryOptions::default()).await
    }

    /// Run an operation under the configured recovery layers.
    pub async fn execute<F, Fut, T, E>(
        &self,
        key: &str,
        mut operation: F,
        options: RecoveryOptions,
    ) -> Result<T, RecoveryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<Failure>,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Failure::unknown("Recovery manager is shut down").into());
        }

        // Offline gate: fail fast, no attempt made.
        if options.requires_network && self.offline.is_offline() {
            let failure = Failure::network("Network unavailable")
                .with_details("offline state reported by connectivity tracker");
            self.emit(key, RecoveryEventKind::Failed {
                attempt: 1,
                failure: failure.clone(),
            });
            return Err(failure.into());
        }

        // Breaker path: a single guarded attempt; the breaker's own call
        // timeout applies.
        if let Some(config) = options.circuit_breaker.clone() {
            let breaker = self.breaker_for(key, config).await;
            self.emit(key, RecoveryEventKind::Attempting { attempt: 1 });
            return match breaker.execute(&mut operation).await {
                Ok(value) => {
                    self.emit(key, RecoveryEventKind::Succeeded { attempt: 1 });
                    Ok(value)
                }
                Err(err) => {
                    if let RecoveryError::Failure(failure) = &err {
                        self.emit(key, RecoveryEventKind::Failed {
                            attempt: 1,
                            failure: failure.clone(),
                        });
                    }
                    let snapshot = breaker.snapshot();
                    self.emit(key, RecoveryEventKind::CircuitTripped {
                        state: snapshot.state,
                        failure_count: snapshot.failure_count,
                    });
                    Err(err)
                }
            };
        }

        // Retry path.
        let policy = options.retry_policy.unwrap_or_default();
        let cancel = options.cancel.unwrap_or_default();
        let predicate = options.should_retry.clone();
        let predicate_ref = predicate
            .as_deref()
            .map(|p| p as &(dyn Fn(&Failure) -> bool + Send + Sync));
        let runner = RetryRunner::with_offline_tracker(Arc::clone(&self.offline));

        runner
            .run(&policy, operation, predicate_ref, &cancel, |event| {
                self.emit(key, event.into());
            })
            .await
            .map(|outcome| outcome.value)
            .map_err(RecoveryError::from)
    }

    /// Current breaker state for a key, if one has been created.
    pub async fn circuit_breaker_state(&self, key: &str) -> Option<CircuitBreakerSnapshot> {
        self.breakers
            .read()
            .await
            .get(key)
            .map(|breaker| breaker.snapshot())
    }

    /// Reset a key's breaker to CLOSED. Returns false if none exists.
    pub async fn reset_circuit_breaker(&self, key: &str) -> bool {
        match self.breakers.read().await.get(key) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Snapshots of every breaker, for status surfaces.
    pub async fn circuit_breaker_snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        self.breakers
            .read()
            .await
            .values()
            .map(|breaker| breaker.snapshot())
            .collect()
    }

    /// Tear down: stop accepting operations and clear breaker state.
    /// Repeated calls are no-ops. The event stream closes when the manager
    /// is dropped.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Recovery manager already shut down");
            return;
        }
        self.breakers.write().await.clear();
        info!("Recovery manager shut down");
    }

    /// Get or lazily create the breaker for a key. The first caller's
    /// configuration wins; later configs for the same key are ignored.
    async fn breaker_for(&self, key: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read().await;
            if let Some(breaker) = breakers.get(key) {
                return Arc::clone(breaker);
            }
        }

        let mut breakers = self.breakers.write().await;
        Arc::clone(
            breakers
                .entry(key.to_string())
                .or_insert_with(|| {
                    debug!("Creating circuit breaker for '{}'", key);
                    Arc::new(CircuitBreaker::with_config(key, config))
                }),
        )
    }

    fn emit(&self, key: &str, kind: RecoveryEventKind) {
        // Fire-and-forget: no subscribers is not an error.
        let _ = self.events.send(RecoveryEvent {
            key: key.to_string(),
            at: Utc::now(),
            kind,
        });
    }
}

impl From<RetryEvent> for RecoveryEventKind {
    fn from(event: RetryEvent) -> Self {
        match event {
            RetryEvent::Attempting { attempt } => RecoveryEventKind::Attempting { attempt },
            RetryEvent::Succeeded { attempt } => RecoveryEventKind::Succeeded { attempt },
            RetryEvent::Failed { attempt, failure } => {
                RecoveryEventKind::Failed { attempt, failure }
            }
            RetryEvent::Retrying { attempt, delay } => {
                RecoveryEventKind::Retrying { attempt, delay }
            }
            RetryEvent::SkippedOffline { attempt } => {
                RecoveryEventKind::SkippedOffline { attempt }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::offline::OfflineTrackerConfig;
    use crate::network::probe::{
        ConnectionQuality, ConnectionSnapshot, ConnectionStatus, ConnectivityProber,
    };
    use std::sync::atomic::AtomicU32;

    fn online_manager() -> RecoveryManager {
        let prober = Arc::new(ConnectivityProber::new());
        let tracker = Arc::new(OfflineTracker::manual(
            prober,
            OfflineTrackerConfig::default(),
        ));
        RecoveryManager::new(tracker)
    }

    fn offline_manager() -> RecoveryManager {
        let prober = Arc::new(ConnectivityProber::new());
        let tracker = Arc::new(OfflineTracker::manual(
            prober,
            OfflineTrackerConfig {
                consecutive_failures: 1,
                indicator_debounce: Duration::from_secs(5),
            },
        ));
        tracker.apply_snapshot(&ConnectionSnapshot {
            status: ConnectionStatus::Disconnected,
            quality: ConnectionQuality::Offline,
            latency: None,
            observed_at: Utc::now(),
        });
        RecoveryManager::new(tracker)
    }

    #[tokio::test]
    async fn test_offline_fail_fast_emits_one_failed_event() {
        let manager = offline_manager();
        let mut events = manager.subscribe();
        let calls = AtomicU32::new(0);

        let result: Result<(), RecoveryError> = manager
            .execute_with_recovery("ticker", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, Failure>(()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let event = events.try_recv().unwrap();
        assert_eq!(event.key, "ticker");
        assert!(matches!(event.kind, RecoveryEventKind::Failed { attempt: 1, .. }));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_requires_network_false_bypasses_gate() {
        let manager = offline_manager();

        let result = manager
            .execute(
                "ticker",
                || async { Ok::<_, Failure>(7) },
                RecoveryOptions::default()
                    .with_requires_network(false)
                    .with_retry_policy(RetryPolicy::new().with_jitter(false)),
            )
            .await;

        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_breaker_path_trips_and_reports() {
        let manager = online_manager();
        let config = CircuitBreakerConfig {
            failure_threshold: 2,
            call_timeout: Duration::from_secs(5),
            reset_timeout: Duration::from_secs(60),
        };
        let mut events = manager.subscribe();

        for _ in 0..2 {
            let _ = manager
                .execute(
                    "orders",
                    || async { Err::<(), _>(Failure::api("Internal server error", 500)) },
                    RecoveryOptions::default().with_circuit_breaker(config.clone()),
                )
                .await;
        }

        let snapshot = manager.circuit_breaker_state("orders").await.unwrap();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.failure_count, 2);

        // Third call rejected without running the operation.
        let calls = AtomicU32::new(0);
        let result = manager
            .execute(
                "orders",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, Failure>(()) }
                },
                RecoveryOptions::default().with_circuit_breaker(config),
            )
            .await;
        assert!(matches!(result, Err(RecoveryError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // Every failed/rejected breaker call carries a CircuitTripped event.
        let mut tripped = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event.kind, RecoveryEventKind::CircuitTripped { .. }) {
                tripped += 1;
            }
        }
        assert_eq!(tripped, 3);
    }

    #[tokio::test]
    async fn test_reset_circuit_breaker() {
        let manager = online_manager();
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            call_timeout: Duration::from_secs(5),
            reset_timeout: Duration::from_secs(60),
        };

        let _ = manager
            .execute(
                "orders",
                || async { Err::<(), _>(Failure::api("Bad gateway", 502)) },
                RecoveryOptions::default().with_circuit_breaker(config),
            )
            .await;
        assert_eq!(
            manager.circuit_breaker_state("orders").await.unwrap().state,
            CircuitState::Open
        );

        assert!(manager.reset_circuit_breaker("orders").await);
        assert_eq!(
            manager.circuit_breaker_state("orders").await.unwrap().state,
            CircuitState::Closed
        );
        assert!(!manager.reset_circuit_breaker("nonexistent").await);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let manager = online_manager();
        manager.shutdown().await;
        manager.shutdown().await;

        let result: Result<(), RecoveryError> = manager
            .execute_with_recovery("ticker", || async { Ok::<_, Failure>(()) })
            .await;
        assert!(result.is_err());
        assert!(manager.circuit_breaker_snapshots().await.is_empty());
    }

    #[tokio::test]
    async fn test_event_serialization() {
        let event = RecoveryEvent {
            key: "ticker".into(),
            at: Utc::now(),
            kind: RecoveryEventKind::Retrying {
                attempt: 2,
                delay: Duration::from_secs(1),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "retrying");
        assert_eq!(json["key"], "ticker");
        assert_eq!(json["attempt"], 2);
    }
}
