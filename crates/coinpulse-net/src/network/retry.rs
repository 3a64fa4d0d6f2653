//! Retry orchestration with configurable backoff and jitter.
//!
//! Executes an operation with bounded attempts, computing inter-attempt
//! delay from the configured backoff strategy, consulting the failure
//! classification to decide retryability, and short-circuiting when the
//! offline tracker reports no connectivity.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::config::RetryTuning;
use crate::error::{Failure, FailureKind};
use crate::network::offline::OfflineTracker;

/// How the inter-attempt delay grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `base * multiplier^(attempt-1)`.
    Exponential,
    /// `base * attempt`.
    Linear,
    /// `base` for every retry.
    Fixed,
}

/// Immutable retry configuration, built once per call-site class.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one. Always >= 1.
    pub max_attempts: u32,
    /// Generic base delay between retries.
    pub base_delay: Duration,
    /// Cap applied to every computed delay.
    pub max_delay: Duration,
    /// Growth factor for the exponential strategy.
    pub backoff_multiplier: f64,
    pub backoff_strategy: BackoffStrategy,
    /// Whether to add random jitter to delays.
    pub use_jitter: bool,
    /// Jitter magnitude as a fraction of the computed delay, in `0..=1`.
    pub jitter_factor: f64,
    // Per-kind retry toggles.
    pub retry_on_timeout: bool,
    pub retry_on_connection_error: bool,
    pub retry_on_network_error: bool,
    pub retry_on_server_error: bool,
    pub retry_on_rate_limit: bool,
    /// Short-circuit without attempting when the tracker reports offline.
    pub skip_when_offline: bool,
    // Kind-specific base delays; fall back to `base_delay` when unset.
    pub timeout_base_delay: Option<Duration>,
    pub rate_limit_base_delay: Option<Duration>,
    pub connection_base_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: RetryTuning::MAX_ATTEMPTS,
            base_delay: RetryTuning::BASE_DELAY,
            max_delay: RetryTuning::MAX_DELAY,
            backoff_multiplier: RetryTuning::BACKOFF_MULTIPLIER,
            backoff_strategy: BackoffStrategy::Exponential,
            use_jitter: true,
            jitter_factor: RetryTuning::JITTER_FACTOR,
            retry_on_timeout: true,
            retry_on_connection_error: true,
            retry_on_network_error: true,
            retry_on_server_error: true,
            retry_on_rate_limit: true,
            skip_when_offline: false,
            timeout_base_delay: None,
            rate_limit_base_delay: None,
            connection_base_delay: None,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard exchange API calls: exponential backoff, rate limits get a
    /// longer base delay, skipped entirely while offline.
    pub fn api() -> Self {
        Self {
            skip_when_offline: true,
            rate_limit_base_delay: Some(Duration::from_secs(2)),
            ..Self::default()
        }
    }

    /// Ticker/real-time polls: fail fast, the next poll supersedes this one.
    pub fn real_time() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(1),
            backoff_strategy: BackoffStrategy::Fixed,
            use_jitter: false,
            skip_when_offline: true,
            ..Self::default()
        }
    }

    /// Must-complete operations: more attempts, wider delay ceiling, and the
    /// operation is attempted even when the tracker claims offline.
    pub fn critical() -> Self {
        Self {
            max_attempts: 5,
            max_delay: Duration::from_secs(60),
            skip_when_offline: false,
            ..Self::default()
        }
    }

    /// Background refreshes expected to ride out connectivity gaps.
    pub fn offline_tolerant() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(2),
            backoff_strategy: BackoffStrategy::Linear,
            connection_base_delay: Some(Duration::from_secs(5)),
            skip_when_offline: false,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.use_jitter = jitter;
        self
    }

    pub fn with_skip_when_offline(mut self, skip: bool) -> Self {
        self.skip_when_offline = skip;
        self
    }

    /// Whether this policy permits retrying the given failure.
    ///
    /// `Api` failures are cross-checked against the status code: 429 goes
    /// through the rate-limit toggle, 5xx through the server-error toggle
    /// (and only for codes classification considers recoverable).
    pub fn allows_retry(&self, failure: &Failure) -> bool {
        match failure.kind {
            FailureKind::Timeout => self.retry_on_timeout,
            FailureKind::Connection => self.retry_on_connection_error,
            FailureKind::Network => self.retry_on_network_error,
            FailureKind::Api => match failure.code {
                Some(429) => self.retry_on_rate_limit,
                Some(code) if code >= 500 => {
                    self.retry_on_server_error && failure.is_recoverable()
                }
                _ => false,
            },
            FailureKind::Data | FailureKind::Cache | FailureKind::Unknown => false,
        }
    }

    /// Base delay for a failure kind, falling back to the generic base.
    fn base_delay_for(&self, failure: &Failure) -> Duration {
        let specific = match failure.kind {
            FailureKind::Timeout => self.timeout_base_delay,
            FailureKind::Connection => self.connection_base_delay,
            FailureKind::Api if failure.code == Some(429) => self.rate_limit_base_delay,
            _ => None,
        };
        specific.unwrap_or(self.base_delay)
    }

    /// Compute the delay before the retry that follows `attempt` (1-indexed).
    ///
    /// The strategy formula yields exactly the base delay for the first
    /// retry; the result is clamped to `[base, max_delay]` before jitter and
    /// to `[base/2, max_delay]` after.
    pub fn delay_for_attempt(&self, attempt: u32, failure: &Failure) -> Duration {
        let base = self.base_delay_for(failure).as_secs_f64();
        let max = self.max_delay.as_secs_f64();

        let raw = match self.backoff_strategy {
            BackoffStrategy::Exponential => {
                base * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32)
            }
            BackoffStrategy::Linear => base * f64::from(attempt),
            BackoffStrategy::Fixed => base,
        };
        let clamped = raw.max(base).min(max);

        let final_secs = if self.use_jitter {
            let factor = self.jitter_factor.clamp(0.0, 1.0);
            let offset = rand::rng().random_range(-factor..=factor) * clamped;
            (clamped + offset).max(base / 2.0).min(max)
        } else {
            clamped
        };

        Duration::from_secs_f64(final_secs)
    }
}

/// Attempt-level events surfaced to the recovery façade.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryEvent {
    Attempting { attempt: u32 },
    Succeeded { attempt: u32 },
    Failed { attempt: u32, failure: Failure },
    Retrying { attempt: u32, delay: Duration },
    SkippedOffline { attempt: u32 },
}

/// Successful outcome of a retried operation.
#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub value: T,
    /// Attempts consumed, including the successful one.
    pub attempts: u32,
    /// Total backoff delay slept across all retries.
    pub total_delay: Duration,
}

/// Executes operations under a [`RetryPolicy`].
#[derive(Default)]
pub struct RetryRunner {
    offline: Option<Arc<OfflineTracker>>,
}

impl RetryRunner {
    pub fn new() -> Self {
        Self { offline: None }
    }

    /// A runner that consults the offline tracker for `skip_when_offline`.
    pub fn with_offline_tracker(tracker: Arc<OfflineTracker>) -> Self {
        Self {
            offline: Some(tracker),
        }
    }

    fn is_offline(&self) -> bool {
        self.offline.as_ref().is_some_and(|t| t.is_offline())
    }

    /// Run `operation` with bounded attempts.
    ///
    /// A supplied `should_retry` predicate takes precedence over the
    /// policy's per-kind toggles. The raw operation error converts into a
    /// [`Failure`] at this boundary; nothing unclassified escapes.
    /// Cancellation is honored before each attempt and before each backoff
    /// sleep.
    pub async fn run<F, Fut, T, E>(
        &self,
        policy: &RetryPolicy,
        mut operation: F,
        should_retry: Option<&(dyn Fn(&Failure) -> bool + Send + Sync)>,
        cancel: &CancellationToken,
        mut on_event: impl FnMut(RetryEvent),
    ) -> Result<RetryOutcome<T>, Failure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<Failure>,
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt: u32 = 1;
        let mut total_delay = Duration::ZERO;

        loop {
            if policy.skip_when_offline && self.is_offline() {
                debug!("Skipping attempt {}: offline", attempt);
                on_event(RetryEvent::SkippedOffline { attempt });
                return Err(Failure::network("Network unavailable, request skipped")
                    .with_details("offline state reported by connectivity tracker"));
            }
            cancel.check()?;

            on_event(RetryEvent::Attempting { attempt });
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("Operation succeeded after {} attempts", attempt);
                    }
                    on_event(RetryEvent::Succeeded { attempt });
                    return Ok(RetryOutcome {
                        value,
                        attempts: attempt,
                        total_delay,
                    });
                }
                Err(e) => {
                    let failure: Failure = e.into();
                    on_event(RetryEvent::Failed {
                        attempt,
                        failure: failure.clone(),
                    });

                    let eligible = match should_retry {
                        Some(predicate) => predicate(&failure),
                        None => policy.allows_retry(&failure),
                    };
                    if !eligible {
                        debug!("Failure is not retryable: {}", failure);
                        return Err(failure);
                    }
                    if attempt >= max_attempts {
                        warn!(
                            "All {} attempts exhausted. Last failure: {}",
                            max_attempts, failure
                        );
                        return Err(failure);
                    }

                    let delay = policy.delay_for_attempt(attempt, &failure);
                    total_delay += delay;
                    warn!(
                        "Attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt, max_attempts, failure, delay
                    );
                    on_event(RetryEvent::Retrying { attempt, delay });

                    cancel.check()?;
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
