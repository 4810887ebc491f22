//! Per-provider circuit breaker and health cache.
//!
//! One [`BreakerState`] per registered provider, keyed by provider handle
//! and owned by the router so behavior is uniform across drivers. The state
//! combines the consecutive-failure breaker with the cached health probe
//! result; both gate candidate selection.

use std::time::{Duration, Instant};

/// Breaker + health-cache state for one provider.
#[derive(Debug, Clone)]
pub struct BreakerState {
    /// Consecutive failures since the last success.
    pub failure_count: u32,
    pub last_failure: Option<Instant>,
    /// Open = suppress calls until the cool-off elapses.
    pub open: bool,
    pub last_health_check: Option<Instant>,
    /// Cached result of the last health probe.
    pub healthy: bool,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self {
            failure_count: 0,
            last_failure: None,
            open: false,
            last_health_check: None,
            healthy: true,
        }
    }
}

impl BreakerState {
    /// Records a failed attempt. Returns true when this failure opened the
    /// breaker (crossing `threshold`).
    pub fn record_failure(&mut self, threshold: u32) -> bool {
        self.failure_count += 1;
        self.last_failure = Some(Instant::now());
        if !self.open && self.failure_count >= threshold {
            self.open = true;
            return true;
        }
        false
    }

    /// Records a successful completion: resets the count and closes the
    /// breaker.
    pub fn record_success(&mut self) {
        self.failure_count = 0;
        self.open = false;
    }

    /// Whether a call may be attempted. An open breaker half-closes (resets
    /// count, clears the open flag) once `cooloff` has elapsed since the
    /// last failure, permitting one probe attempt.
    pub fn permit(&mut self, cooloff: Duration) -> bool {
        if !self.open {
            return true;
        }
        let elapsed = self.last_failure.map(|at| at.elapsed()).unwrap_or(cooloff);
        if elapsed >= cooloff {
            self.open = false;
            self.failure_count = 0;
            return true;
        }
        false
    }

    /// Cached health if the last probe is younger than `interval`.
    pub fn cached_health(&self, interval: Duration) -> Option<bool> {
        let at = self.last_health_check?;
        (at.elapsed() < interval).then_some(self.healthy)
    }

    /// Stores a fresh probe result.
    pub fn record_probe(&mut self, healthy: bool) {
        self.healthy = healthy;
        self.last_health_check = Some(Instant::now());
    }
}
