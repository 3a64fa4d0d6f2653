//! Active connectivity probing.
//!
//! Determines current network reachability and a coarse quality grade by
//! issuing lightweight DNS and socket probes. Probe failures never surface
//! as errors; they resolve to a disconnected snapshot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::debug;

use crate::config::ProbeTuning;

/// Coarse reachability status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Connecting,
    Unknown,
}

/// Quality grade derived from probe latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionQuality {
    Excellent,
    Good,
    Poor,
    Offline,
}

/// Result of one probe cycle. Only the latest snapshot is retained; it is
/// used solely to decide whether a change is significant enough to emit.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ConnectionSnapshot {
    pub status: ConnectionStatus,
    pub quality: ConnectionQuality,
    pub latency: Option<Duration>,
    pub observed_at: DateTime<Utc>,
}

impl ConnectionSnapshot {
    fn connected(latency: Option<Duration>) -> Self {
        Self {
            status: ConnectionStatus::Connected,
            quality: quality_for_latency(latency),
            latency,
            observed_at: Utc::now(),
        }
    }

    fn offline() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            quality: ConnectionQuality::Offline,
            latency: None,
            observed_at: Utc::now(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// Grade quality from measured latency. A connected link with no latency
/// sample is graded `Poor`, never better.
pub fn quality_for_latency(latency: Option<Duration>) -> ConnectionQuality {
    match latency {
        Some(l) if l < ProbeTuning::EXCELLENT_BELOW => ConnectionQuality::Excellent,
        Some(l) if l < ProbeTuning::GOOD_BELOW => ConnectionQuality::Good,
        Some(_) | None => ConnectionQuality::Poor,
    }
}

/// Configuration for connectivity probing.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Primary DNS probe target.
    pub primary_host: String,
    /// Fallback target used when the primary fails.
    pub fallback_host: String,
    /// `host:port` endpoint for the latency connect/teardown.
    pub latency_endpoint: String,
    pub probe_timeout: Duration,
    pub probe_interval: Duration,
    /// Latency deltas below this threshold are not re-emitted.
    pub latency_noise: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            primary_host: ProbeTuning::PRIMARY_HOST.to_string(),
            fallback_host: ProbeTuning::FALLBACK_HOST.to_string(),
            latency_endpoint: ProbeTuning::LATENCY_ENDPOINT.to_string(),
            probe_timeout: ProbeTuning::PROBE_TIMEOUT,
            probe_interval: ProbeTuning::PROBE_INTERVAL,
            latency_noise: ProbeTuning::LATENCY_NOISE,
        }
    }
}

/// Active connectivity prober.
///
/// `probe_once` runs a single bounded probe cycle; `subscribe` lazily starts
/// a background poll loop that emits snapshots onto a broadcast channel when
/// the status, quality, or latency changes beyond the noise threshold.
pub struct ConnectivityProber {
    config: ProbeConfig,
    /// Latest completed snapshot. Overlapping probes simply overwrite it.
    last: Mutex<Option<ConnectionSnapshot>>,
    tx: broadcast::Sender<ConnectionSnapshot>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    /// Set by `shutdown`; a closed prober never respawns the poll loop.
    closed: AtomicBool,
}

impl ConnectivityProber {
    pub fn new() -> Self {
        Self::with_config(ProbeConfig::default())
    }

    pub fn with_config(config: ProbeConfig) -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            config,
            last: Mutex::new(None),
            tx,
            poll_task: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Run one probe cycle: DNS against the primary host, the fallback on
    /// failure, then a latency measurement when either resolves.
    ///
    /// Never fails; an unreachable network resolves to a disconnected,
    /// offline-quality snapshot.
    pub async fn probe_once(&self) -> ConnectionSnapshot {
        let reachable = self.resolves(&self.config.primary_host).await
            || self.resolves(&self.config.fallback_host).await;

        let snapshot = if reachable {
            let latency = self.measure_latency().await;
            ConnectionSnapshot::connected(latency)
        } else {
            debug!("All connectivity probes failed");
            ConnectionSnapshot::offline()
        };

        *self.last.lock().unwrap() = Some(snapshot.clone());
        snapshot
    }

    /// Latest completed probe result, if any probe has run.
    pub fn last_snapshot(&self) -> Option<ConnectionSnapshot> {
        self.last.lock().unwrap().clone()
    }

    /// Subscribe to the snapshot stream.
    ///
    /// The poll loop is started lazily on the first subscription. After
    /// `shutdown` the receiver is still handed out but the loop is never
    /// restarted.
    pub fn subscribe(self: &Arc<Self>) -> broadcast::Receiver<ConnectionSnapshot> {
        let rx = self.tx.subscribe();
        if self.closed.load(Ordering::SeqCst) {
            return rx;
        }
        let mut task = self.poll_task.lock().unwrap();
        if task.is_none() {
            *task = Some(self.spawn_poll_loop());
        }
        rx
    }

    /// Stop the background poll loop for good. Safe to call repeatedly;
    /// later subscriptions do not restart polling.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(handle) = self.poll_task.lock().unwrap().take() {
            handle.abort();
            debug!("Connectivity poll loop stopped");
        }
    }

    fn spawn_poll_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let prober = Arc::clone(self);
        tokio::spawn(async move {
            debug!("Connectivity poll loop started");
            let mut last_emitted: Option<ConnectionSnapshot> = None;

            loop {
                let snapshot = prober.probe_once().await;

                let significant = match &last_emitted {
                    None => true,
                    Some(prev) => is_significant_change(prev, &snapshot, prober.config.latency_noise),
                };
                if significant {
                    last_emitted = Some(snapshot.clone());
                    // Best-effort: no subscribers is not an error.
                    let _ = prober.tx.send(snapshot);
                }

                tokio::time::sleep(prober.config.probe_interval).await;
            }
        })
    }

    async fn resolves(&self, host: &str) -> bool {
        match timeout(self.config.probe_timeout, lookup_host((host, 443u16))).await {
            Ok(Ok(mut addrs)) => addrs.next().is_some(),
            Ok(Err(e)) => {
                debug!("DNS probe failed for {}: {}", host, e);
                false
            }
            Err(_) => {
                debug!("DNS probe timed out for {}", host);
                false
            }
        }
    }

    /// Raw socket connect/teardown to measure round-trip latency.
    async fn measure_latency(&self) -> Option<Duration> {
        let start = tokio::time::Instant::now();
        match timeout(
            self.config.probe_timeout,
            TcpStream::connect(&self.config.latency_endpoint),
        )
        .await
        {
            Ok(Ok(stream)) => {
                drop(stream);
                Some(start.elapsed())
            }
            _ => None,
        }
    }
}

impl Default for ConnectivityProber {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectivityProber {
    fn drop(&mut self) {
        if let Ok(mut task) = self.poll_task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}

/// Whether a new snapshot differs enough from the previous one to be worth
/// emitting: any status or quality change, or a latency delta beyond the
/// noise threshold.
pub fn is_significant_change(
    prev: &ConnectionSnapshot,
    next: &ConnectionSnapshot,
    noise: Duration,
) -> bool {
    if prev.status != next.status || prev.quality != next.quality {
        return true;
    }
    match (prev.latency, next.latency) {
        (Some(a), Some(b)) => a.abs_diff(b) > noise,
        (None, None) => false,
        _ => true,
    }
}
