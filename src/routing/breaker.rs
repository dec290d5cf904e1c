//! Circuit breaker for the Cloud tier
//!
//! Three-state fault isolator: CLOSED counts failures, OPEN blocks requests
//! until a timeout elapses, HALF_OPEN admits a bounded number of probes. A
//! single probe success closes the circuit; a probe failure reopens it.
//! Local model failures never reach this breaker.

use parking_lot::Mutex;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    /// Encoding used by the breaker state gauge (0=closed, 1=open, 2=half_open)
    pub fn as_gauge_value(&self) -> f64 {
        match self {
            BreakerState::Closed => 0.0,
            BreakerState::Open => 1.0,
            BreakerState::HalfOpen => 2.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// Breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in CLOSED before opening
    pub failure_threshold: u32,
    /// How long OPEN blocks before allowing a probe
    pub timeout: Duration,
    /// Probes admitted while HALF_OPEN
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        }
    }
}

/// Why the breaker refused a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerDenial {
    /// Circuit is OPEN; retry once the remaining time elapses
    Open { retry_in: Duration },
    /// HALF_OPEN probe quota is already in flight
    HalfOpenSaturated,
}

/// Snapshot of breaker internals
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub state: BreakerState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    opened_at: Option<Instant>,
    half_open_inflight: u32,
}

/// Process-wide circuit breaker guarding cloud caption calls
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                opened_at: None,
                half_open_inflight: 0,
            }),
        }
    }

    /// Check whether a cloud request may proceed.
    ///
    /// In OPEN, transitions to HALF_OPEN once the timeout has elapsed and
    /// admits the caller as the first probe.
    pub fn can_proceed(&self) -> Result<(), BreakerDenial> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let opened_at = inner.opened_at.unwrap_or(now);
                let elapsed = now.duration_since(opened_at);
                if elapsed >= self.config.timeout {
                    tracing::info!(target: "prism::breaker", "circuit half-open, probing recovery");
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_inflight = 1;
                    Ok(())
                } else {
                    Err(BreakerDenial::Open {
                        retry_in: self.config.timeout - elapsed,
                    })
                }
            }
            BreakerState::HalfOpen => {
                if inner.half_open_inflight < self.config.half_open_max_calls {
                    inner.half_open_inflight += 1;
                    Ok(())
                } else {
                    Err(BreakerDenial::HalfOpenSaturated)
                }
            }
        }
    }

    /// Record a successful cloud call. A success during HALF_OPEN closes the
    /// circuit and clears all counters.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count = 0;
            }
            BreakerState::HalfOpen => {
                tracing::info!(target: "prism::breaker", "probe succeeded, closing circuit");
                inner.state = BreakerState::Closed;
                inner.failure_count = 0;
                inner.half_open_inflight = 0;
                inner.opened_at = None;
            }
            BreakerState::Open => {}
        }
    }

    /// Record a failed cloud call. Returns `true` when this failure opened
    /// the circuit, so callers can count open transitions.
    pub fn record_failure(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        target: "prism::breaker",
                        failures = inner.failure_count,
                        "circuit opened"
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    return true;
                }
                false
            }
            BreakerState::HalfOpen => {
                tracing::warn!(target: "prism::breaker", "probe failed, reopening circuit");
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.half_open_inflight = 0;
                true
            }
            BreakerState::Open => false,
        }
    }

    /// Manually close the circuit and clear counters
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.half_open_inflight = 0;
        inner.opened_at = None;
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock();
        BreakerStats {
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.config.failure_threshold,
            timeout_seconds: self.config.timeout.as_secs(),
        }
    }

    #[cfg(test)]
    fn force_open_at(&self, opened_at: Instant) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Open;
        inner.opened_at = Some(opened_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            timeout,
            half_open_max_calls: 1,
        })
    }

    #[test]
    fn test_closed_allows() {
        let b = breaker(5, Duration::from_secs(60));
        assert!(b.can_proceed().is_ok());
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn test_opens_after_threshold() {
        let b = breaker(3, Duration::from_secs(60));
        assert!(!b.record_failure());
        assert!(!b.record_failure());
        assert!(b.record_failure());
        assert_eq!(b.state(), BreakerState::Open);
        assert!(matches!(
            b.can_proceed(),
            Err(BreakerDenial::Open { .. })
        ));
    }

    #[test]
    fn test_success_resets_closed_count() {
        let b = breaker(3, Duration::from_secs(60));
        b.record_failure();
        b.record_failure();
        b.record_success();
        // Counter cleared; two more failures do not open
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_after_timeout() {
        let b = breaker(1, Duration::from_secs(60));
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);

        // Simulate the timeout having elapsed
        b.force_open_at(Instant::now() - Duration::from_secs(61));
        assert!(b.can_proceed().is_ok());
        assert_eq!(b.state(), BreakerState::HalfOpen);

        // Only one probe admitted
        assert_eq!(b.can_proceed(), Err(BreakerDenial::HalfOpenSaturated));
    }

    #[test]
    fn test_half_open_success_closes() {
        let b = breaker(1, Duration::from_secs(60));
        b.record_failure();
        b.force_open_at(Instant::now() - Duration::from_secs(61));
        assert!(b.can_proceed().is_ok());

        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.stats().failure_count, 0);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let b = breaker(1, Duration::from_secs(60));
        b.record_failure();
        b.force_open_at(Instant::now() - Duration::from_secs(61));
        assert!(b.can_proceed().is_ok());

        assert!(b.record_failure());
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[test]
    fn test_reset() {
        let b = breaker(1, Duration::from_secs(60));
        b.record_failure();
        b.reset();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.can_proceed().is_ok());
    }

    #[test]
    fn test_gauge_encoding() {
        assert_eq!(BreakerState::Closed.as_gauge_value(), 0.0);
        assert_eq!(BreakerState::Open.as_gauge_value(), 1.0);
        assert_eq!(BreakerState::HalfOpen.as_gauge_value(), 2.0);
    }
}
