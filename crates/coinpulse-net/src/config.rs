//! Centralized tuning constants for the resilience layer.
//!
//! These feed the `Default` impls of the per-component configuration
//! structs; call sites that need different behavior construct their own
//! configs explicitly — there is no process-wide implicit state.

use std::time::Duration;

/// Connectivity probing.
pub struct ProbeTuning;

impl ProbeTuning {
    /// Primary DNS probe target.
    pub const PRIMARY_HOST: &'static str = "one.one.one.one";
    /// Fallback DNS probe target if the primary fails.
    pub const FALLBACK_HOST: &'static str = "dns.google";
    /// Endpoint for latency measurement (raw TCP connect/teardown).
    pub const LATENCY_ENDPOINT: &'static str = "1.1.1.1:443";
    pub const PROBE_TIMEOUT: Duration = Duration::from_secs(4);
    pub const PROBE_INTERVAL: Duration = Duration::from_secs(3);
    /// Latency deltas below this are not worth re-emitting.
    pub const LATENCY_NOISE: Duration = Duration::from_millis(100);
    /// Quality grading thresholds.
    pub const EXCELLENT_BELOW: Duration = Duration::from_millis(100);
    pub const GOOD_BELOW: Duration = Duration::from_millis(300);
}

/// Offline state tracking.
pub struct OfflineTuning;

impl OfflineTuning {
    /// Consecutive failed probes before declaring offline.
    pub const CONSECUTIVE_FAILURES: u32 = 3;
    /// Minimum offline duration before the UI indicator should show.
    pub const INDICATOR_DEBOUNCE: Duration = Duration::from_secs(5);
}

/// Circuit breaker behavior.
pub struct BreakerTuning;

impl BreakerTuning {
    pub const FAILURE_THRESHOLD: u32 = 5;
    pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);
    pub const RESET_TIMEOUT: Duration = Duration::from_secs(60);
}

/// Retry behavior.
pub struct RetryTuning;

impl RetryTuning {
    pub const MAX_ATTEMPTS: u32 = 3;
    pub const BASE_DELAY: Duration = Duration::from_secs(1);
    pub const MAX_DELAY: Duration = Duration::from_secs(30);
    pub const BACKOFF_MULTIPLIER: f64 = 2.0;
    pub const JITTER_FACTOR: f64 = 0.1;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tunings_are_reasonable() {
        assert!(ProbeTuning::PROBE_TIMEOUT > Duration::ZERO);
        assert!(ProbeTuning::EXCELLENT_BELOW < ProbeTuning::GOOD_BELOW);
        assert!(OfflineTuning::CONSECUTIVE_FAILURES >= 1);
        assert!(RetryTuning::BASE_DELAY <= RetryTuning::MAX_DELAY);
        assert!((0.0..=1.0).contains(&RetryTuning::JITTER_FACTOR));
    }
}
