//! Offline state tracking with hysteresis.
//!
//! Consumes the prober's snapshot stream and maintains a sticky
//! offline/online state machine: declaring offline requires several
//! consecutive failed probes, while recovery is reported on the very first
//! successful probe. The asymmetry avoids flapping on transient blips
//! without delaying recovery.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::OfflineTuning;
use crate::network::probe::{ConnectionSnapshot, ConnectivityProber};

/// Current offline state, with the previous state retained so transition
/// direction can be derived.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct OfflineState {
    pub is_offline: bool,
    pub was_offline: bool,
    pub offline_since: Option<DateTime<Utc>>,
    pub last_online_time: Option<DateTime<Utc>>,
    pub transitioned_at: DateTime<Utc>,
}

impl OfflineState {
    fn initial() -> Self {
        Self {
            is_offline: false,
            was_offline: false,
            offline_since: None,
            last_online_time: None,
            transitioned_at: Utc::now(),
        }
    }

    /// True when this state records an online-to-offline transition.
    pub fn went_offline(&self) -> bool {
        self.is_offline && !self.was_offline
    }

    /// True when this state records an offline-to-online transition.
    pub fn went_online(&self) -> bool {
        !self.is_offline && self.was_offline
    }
}

/// Configuration for the offline tracker.
#[derive(Debug, Clone)]
pub struct OfflineTrackerConfig {
    /// Consecutive failed probes required before declaring offline.
    pub consecutive_failures: u32,
    /// Minimum offline duration before a UI indicator should show.
    pub indicator_debounce: Duration,
}

impl Default for OfflineTrackerConfig {
    fn default() -> Self {
        Self {
            consecutive_failures: OfflineTuning::CONSECUTIVE_FAILURES,
            indicator_debounce: OfflineTuning::INDICATOR_DEBOUNCE,
        }
    }
}

struct TrackerInner {
    state: OfflineState,
    consecutive_failures: u32,
    /// Monotonic companion to `offline_since` for duration queries.
    offline_since_instant: Option<Instant>,
}

/// Tracks offline/online transitions from prober snapshots.
///
/// The tracker is the sole owner of its [`OfflineState`]; external code only
/// reads it via [`current`](Self::current) or the transition stream.
pub struct OfflineTracker {
    prober: Arc<ConnectivityProber>,
    config: OfflineTrackerConfig,
    inner: Mutex<TrackerInner>,
    tx: broadcast::Sender<OfflineState>,
    feed_task: Mutex<Option<JoinHandle<()>>>,
}

impl OfflineTracker {
    /// Create a tracker with default configuration and start consuming the
    /// prober's stream.
    pub fn new(prober: Arc<ConnectivityProber>) -> Arc<Self> {
        Self::with_config(prober, OfflineTrackerConfig::default())
    }

    /// Create a tracker and subscribe to the prober at construction.
    pub fn with_config(prober: Arc<ConnectivityProber>, config: OfflineTrackerConfig) -> Arc<Self> {
        let tracker = Arc::new(Self::manual(prober, config));
        tracker.spawn_feed();
        tracker
    }

    /// Construct without starting the feed task. Hosts that receive
    /// connectivity signals from the platform (mobile reachability callbacks,
    /// a captive-portal detector) feed them in via
    /// [`apply_snapshot`](Self::apply_snapshot) instead of the prober stream.
    pub fn manual(prober: Arc<ConnectivityProber>, config: OfflineTrackerConfig) -> Self {
        let (tx, _) = broadcast::channel(32);
        Self {
            prober,
            config,
            inner: Mutex::new(TrackerInner {
                state: OfflineState::initial(),
                consecutive_failures: 0,
                offline_since_instant: None,
            }),
            tx,
            feed_task: Mutex::new(None),
        }
    }

    /// Current offline state.
    pub fn current(&self) -> OfflineState {
        self.inner.lock().unwrap().state.clone()
    }

    pub fn is_offline(&self) -> bool {
        self.inner.lock().unwrap().state.is_offline
    }

    /// Subscribe to state transition events. Duplicate states are
    /// suppressed; only transitions are delivered.
    pub fn transitions(&self) -> broadcast::Receiver<OfflineState> {
        self.tx.subscribe()
    }

    /// Trigger one probe cycle immediately and fold the result into the
    /// state machine.
    pub async fn force_check(&self) -> OfflineState {
        let snapshot = self.prober.probe_once().await;
        self.apply_snapshot(&snapshot)
    }

    /// How long the connection has been down, if offline.
    pub fn offline_duration(&self) -> Option<Duration> {
        self.inner
            .lock()
            .unwrap()
            .offline_since_instant
            .map(|since| since.elapsed())
    }

    /// Whether the UI should surface an offline indicator. Momentary drops
    /// shorter than the debounce threshold stay hidden to avoid flicker.
    pub fn should_show_offline_indicator(&self) -> bool {
        match self.offline_duration() {
            Some(elapsed) => elapsed > self.config.indicator_debounce,
            None => false,
        }
    }

    /// Humanized offline-duration message, `None` while online.
    pub fn offline_message(&self) -> Option<String> {
        let elapsed = self.offline_duration()?;
        let minutes = elapsed.as_secs() / 60;
        let message = if minutes < 1 {
            "No internet connection".to_string()
        } else if minutes <= 60 {
            format!("Offline for {}m", minutes)
        } else {
            format!("Offline for {}h", minutes / 60)
        };
        Some(message)
    }

    /// Stop consuming the prober's stream. Safe to call repeatedly.
    pub fn shutdown(&self) {
        if let Some(handle) = self.feed_task.lock().unwrap().take() {
            handle.abort();
            debug!("Offline tracker feed stopped");
        }
    }

    /// Fold one probe result into the state machine, emitting on transition.
    pub fn apply_snapshot(&self, snapshot: &ConnectionSnapshot) -> OfflineState {
        let mut inner = self.inner.lock().unwrap();

        if snapshot.is_connected() {
            inner.consecutive_failures = 0;
            if inner.state.is_offline {
                let now = Utc::now();
                inner.state = OfflineState {
                    is_offline: false,
                    was_offline: true,
                    offline_since: inner.state.offline_since,
                    last_online_time: Some(now),
                    transitioned_at: now,
                };
                inner.offline_since_instant = None;
                info!("Network connectivity restored");
                let _ = self.tx.send(inner.state.clone());
            }
        } else {
            inner.consecutive_failures += 1;
            if !inner.state.is_offline
                && inner.consecutive_failures >= self.config.consecutive_failures
            {
                let now = Utc::now();
                inner.state = OfflineState {
                    is_offline: true,
                    was_offline: false,
                    offline_since: Some(now),
                    last_online_time: inner.state.last_online_time,
                    transitioned_at: now,
                };
                inner.offline_since_instant = Some(Instant::now());
                warn!(
                    "Network offline after {} consecutive failed probes",
                    inner.consecutive_failures
                );
                let _ = self.tx.send(inner.state.clone());
            }
        }

        inner.state.clone()
    }

    fn spawn_feed(self: &Arc<Self>) {
        let tracker = Arc::clone(self);
        let mut rx = self.prober.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(snapshot) => {
                        tracker.apply_snapshot(&snapshot);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Probes are idempotent; the next snapshot supersedes
                        // whatever was missed.
                        debug!("Offline tracker lagged {} snapshots", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        *self.feed_task.lock().unwrap() = Some(handle);
    }
}

impl Drop for OfflineTracker {
    fn drop(&mut self) {
        if let Ok(mut task) = self.feed_task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::probe::ProbeConfig;

    fn test_tracker(consecutive_failures: u32) -> OfflineTracker {
        OfflineTracker::manual(
            Arc::new(ConnectivityProber::with_config(ProbeConfig::default())),
            OfflineTrackerConfig {
                consecutive_failures,
                indicator_debounce: Duration::from_secs(5),
            },
        )
    }

    fn offline_snapshot() -> ConnectionSnapshot {
        ConnectionSnapshot {
            status: crate::network::probe::ConnectionStatus::Disconnected,
            quality: crate::network::probe::ConnectionQuality::Offline,
            latency: None,
            observed_at: Utc::now(),
        }
    }

    fn online_snapshot() -> ConnectionSnapshot {
        ConnectionSnapshot {
            status: crate::network::probe::ConnectionStatus::Connected,
            quality: crate::network::probe::ConnectionQuality::Good,
            latency: Some(Duration::from_millis(120)),
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn test_hysteresis_requires_consecutive_failures() {
        let tracker = test_tracker(3);

        tracker.apply_snapshot(&offline_snapshot());
        tracker.apply_snapshot(&offline_snapshot());
        assert!(!tracker.is_offline(), "two failures must not flip state");

        let state = tracker.apply_snapshot(&offline_snapshot());
        assert!(state.is_offline, "third failure declares offline");
        assert!(state.went_offline());
        assert!(state.offline_since.is_some());
    }

    #[test]
    fn test_recovery_is_immediate() {
        let tracker = test_tracker(3);
        for _ in 0..3 {
            tracker.apply_snapshot(&offline_snapshot());
        }
        assert!(tracker.is_offline());

        let state = tracker.apply_snapshot(&online_snapshot());
        assert!(!state.is_offline);
        assert!(state.went_online());
        assert!(state.last_online_time.is_some());
    }

    #[test]
    fn test_successful_probe_resets_failure_streak() {
        let tracker = test_tracker(3);

        tracker.apply_snapshot(&offline_snapshot());
        tracker.apply_snapshot(&offline_snapshot());
        tracker.apply_snapshot(&online_snapshot());
        tracker.apply_snapshot(&offline_snapshot());
        tracker.apply_snapshot(&offline_snapshot());

        assert!(!tracker.is_offline(), "streak must restart after a success");
    }

    #[test]
    fn test_duplicate_states_not_reemitted() {
        let tracker = test_tracker(2);
        let mut rx = tracker.transitions();

        for _ in 0..5 {
            tracker.apply_snapshot(&offline_snapshot());
        }

        // Exactly one transition despite five failed probes.
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_check_folds_probe_result() {
        // .invalid is reserved and never resolves, so the probe cycle ends
        // in a disconnected snapshot regardless of the host environment.
        let prober = Arc::new(ConnectivityProber::with_config(ProbeConfig {
            primary_host: "primary.invalid".to_string(),
            fallback_host: "fallback.invalid".to_string(),
            latency_endpoint: "127.0.0.1:9".to_string(),
            probe_timeout: Duration::from_millis(250),
            ..ProbeConfig::default()
        }));
        let tracker = OfflineTracker::manual(
            prober,
            OfflineTrackerConfig {
                consecutive_failures: 1,
                indicator_debounce: Duration::from_secs(5),
            },
        );

        let state = tracker.force_check().await;
        assert!(state.is_offline);
        assert!(tracker.is_offline());
    }

    #[tokio::test(start_paused = true)]
    async fn test_indicator_debounce() {
        let tracker = test_tracker(1);
        tracker.apply_snapshot(&offline_snapshot());
        assert!(tracker.is_offline());
        assert!(!tracker.should_show_offline_indicator());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(tracker.should_show_offline_indicator());
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_message_thresholds() {
        let tracker = test_tracker(1);
        assert_eq!(tracker.offline_message(), None);

        tracker.apply_snapshot(&offline_snapshot());
        assert_eq!(tracker.offline_message().unwrap(), "No internet connection");

        tokio::time::advance(Duration::from_secs(10 * 60)).await;
        assert_eq!(tracker.offline_message().unwrap(), "Offline for 10m");

        tokio::time::advance(Duration::from_secs(110 * 60)).await;
        assert_eq!(tracker.offline_message().unwrap(), "Offline for 2h");
    }
}
