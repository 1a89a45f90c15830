//! Per-operation circuit breaker with a timer-gated half-open.
//!
//! Phases:
//! - `Closed`:   calls pass; exhausted retry sequences are counted
//! - `Open`:     calls rejected until `cooldown` has elapsed since opening
//! - `HalfOpen`: cooldown elapsed; the next sequence is let through and its
//!               outcome resets or reopens the circuit
//!
//! Half-open is derived from the clock on read, not stored. Every update is a
//! single synchronous read-modify-write under the lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Derived circuit phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitPhase {
    /// Normal operation.
    Closed,
    /// All calls rejected.
    Open,
    /// Cooldown elapsed; the next call gets a single attempt.
    HalfOpen,
}

impl std::fmt::Display for CircuitPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for the circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive exhausted sequences before opening.
    pub failure_threshold: u32,
    /// How long to stay open before letting a call through.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_millis(30_000),
        }
    }
}

/// Snapshot of one operation's circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitState {
    pub consecutive_failures: u32,
    pub open: bool,
    pub opened_at: Option<Instant>,
    pub cooldown: Option<Duration>,
}

impl CircuitState {
    fn closed() -> Self {
        Self {
            consecutive_failures: 0,
            open: false,
            opened_at: None,
            cooldown: None,
        }
    }

    fn phase_at(&self, now: Instant) -> CircuitPhase {
        match (self.open, self.opened_at, self.cooldown) {
            (true, Some(at), Some(cooldown)) if now.duration_since(at) >= cooldown => {
                CircuitPhase::HalfOpen
            }
            (true, _, _) => CircuitPhase::Open,
            (false, _, _) => CircuitPhase::Closed,
        }
    }
}

/// Thread-safe circuit breaker owned by one operation.
#[derive(Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<CircuitState>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker in `Closed` phase.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(CircuitState::closed())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self) -> CircuitPhase {
        self.lock().phase_at(Instant::now())
    }

    /// Returns `true` if the circuit lets a call through.
    pub fn is_allowed(&self) -> bool {
        self.phase() != CircuitPhase::Open
    }

    pub fn snapshot(&self) -> CircuitState {
        *self.lock()
    }

    /// A sequence succeeded: back to `{0, closed}`.
    pub fn record_success(&self) {
        let mut state = self.lock();
        if state.open {
            tracing::info!("circuit breaker → closed");
        }
        *state = CircuitState::closed();
    }

    /// A retry sequence was exhausted.
    pub fn record_failure(&self) {
        let mut state = self.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        if state.consecutive_failures >= self.config.failure_threshold {
            let reopening = state.open;
            state.open = true;
            state.opened_at = Some(Instant::now());
            state.cooldown = Some(self.config.cooldown);
            if reopening {
                tracing::warn!(failures = state.consecutive_failures, "circuit breaker half-open call failed → open");
            } else {
                tracing::warn!(failures = state.consecutive_failures, "circuit breaker → open");
            }
        }
    }

    /// Explicit reset, e.g. after the user signs in again.
    pub fn reset(&self) {
        *self.lock() = CircuitState::closed();
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("phase", &self.phase())
            .field("state", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cb(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            cooldown: Duration::from_secs(60),
        })
    }

    #[test]
    fn starts_closed() {
        let c = cb(5);
        assert_eq!(c.phase(), CircuitPhase::Closed);
        assert!(c.is_allowed());
        assert_eq!(c.snapshot().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_failures() {
        let c = cb(3);
        c.record_failure();
        assert_eq!(c.phase(), CircuitPhase::Closed);
        c.record_failure();
        assert_eq!(c.phase(), CircuitPhase::Closed);
        c.record_failure();
        assert_eq!(c.phase(), CircuitPhase::Open);
        assert!(!c.is_allowed());

        let snap = c.snapshot();
        assert!(snap.open);
        assert_eq!(snap.cooldown, Some(Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_failure_count() {
        let c = cb(3);
        c.record_failure();
        c.record_failure();
        c.record_success();
        c.record_failure();
        c.record_failure();
        assert_eq!(c.phase(), CircuitPhase::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_elapses_into_half_open() {
        let c = cb(1);
        c.record_failure();
        assert_eq!(c.phase(), CircuitPhase::Open);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!c.is_allowed());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(c.phase(), CircuitPhase::HalfOpen);
        assert!(c.is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_success_closes() {
        let c = cb(1);
        c.record_failure();
        tokio::time::advance(Duration::from_secs(60)).await;

        c.record_success();
        assert_eq!(c.phase(), CircuitPhase::Closed);
        assert_eq!(c.snapshot().opened_at, None);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens() {
        let c = cb(2);
        c.record_failure();
        c.record_failure();
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(c.phase(), CircuitPhase::HalfOpen);

        c.record_failure();
        assert_eq!(c.phase(), CircuitPhase::Open);
        assert_eq!(c.snapshot().consecutive_failures, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_closes() {
        let c = cb(1);
        c.record_failure();
        c.reset();
        assert!(c.is_allowed());
        assert_eq!(c.snapshot(), CircuitState::closed());
    }
}
