//! Per-backend circuit breaker.
//!
//! Pure in-memory state; no timers. Every transition is computed when the
//! breaker is read or written.
//!
//! ```text
//!   ┌────────┐  5th consecutive failure  ┌──────┐
//!   │ Closed │ ────────────────────────► │ Open │
//!   └────────┘                           └──┬───┘
//!       ▲                                   │ queried ≥ 60s after last failure
//!       └───────────────────────────────────┘ (failures reset to 0)
//! ```
//!
//! There is no separate half-open state: once the timeout has elapsed the
//! circuit reads as closed, and the outcome of the next attempt decides what
//! happens next.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::BackendId;

/// Consecutive failures that open a circuit.
pub const FAILURE_THRESHOLD: u32 = 5;

/// How long an open circuit rejects attempts.
pub const OPEN_TIMEOUT: Duration = Duration::from_secs(60);

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Failure state of one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitState {
    pub failures: u32,
    pub last_failure: Option<Instant>,
    pub is_open: bool,
}

impl CircuitState {
    const CLOSED: Self = Self {
        failures: 0,
        last_failure: None,
        is_open: false,
    };
}

/// Per-backend failure counting state machine.
pub struct CircuitBreaker {
    threshold: u32,
    timeout: Duration,
    clock: Arc<dyn Clock>,
    states: HashMap<BackendId, CircuitState>,
}

impl CircuitBreaker {
    /// Breaker with the default threshold and timeout on the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Breaker reading time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            threshold: FAILURE_THRESHOLD,
            timeout: OPEN_TIMEOUT,
            clock,
            states: HashMap::new(),
        }
    }

    /// Override the threshold and open duration.
    #[must_use]
    pub fn with_limits(mut self, threshold: u32, timeout: Duration) -> Self {
        self.threshold = threshold.max(1);
        self.timeout = timeout;
        self
    }

    /// Whether the circuit is open.
    ///
    /// An open circuit whose timeout has elapsed is closed on this read and
    /// its failure count reset.
    pub fn is_open(&mut self, backend: BackendId) -> bool {
        let now = self.clock.now();
        let Some(state) = self.states.get_mut(&backend) else {
            return false;
        };
        if !state.is_open {
            return false;
        }
        let expired = state
            .last_failure
            .is_none_or(|at| now.saturating_duration_since(at) >= self.timeout);
        if expired {
            *state = CircuitState::CLOSED;
            info!(provider = %backend, "circuit timeout elapsed, closing");
            return false;
        }
        true
    }

    /// Count a failure. Returns `true` if this failure opened the circuit.
    pub fn record_failure(&mut self, backend: BackendId) -> bool {
        let now = self.clock.now();
        let threshold = self.threshold;
        let state = self.states.entry(backend).or_insert(CircuitState::CLOSED);
        state.failures = state.failures.saturating_add(1);
        state.last_failure = Some(now);

        let opened = !state.is_open && state.failures >= threshold;
        if state.failures >= threshold {
            state.is_open = true;
        }
        if opened {
            info!(provider = %backend, failures = state.failures, "circuit opened");
        } else {
            debug!(provider = %backend, failures = state.failures, "recorded failure");
        }
        opened
    }

    /// Close the circuit after a successful attempt.
    pub fn record_success(&mut self, backend: BackendId) {
        if self.states.remove(&backend).is_some() {
            debug!(provider = %backend, "circuit reset after success");
        }
    }

    /// Explicitly clear a backend's state, e.g. after new credentials.
    pub fn reset(&mut self, backend: BackendId) {
        self.states.remove(&backend);
    }

    /// Current state without evaluating the timeout.
    pub fn state(&self, backend: BackendId) -> CircuitState {
        self.states
            .get(&backend)
            .copied()
            .unwrap_or(CircuitState::CLOSED)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("threshold", &self.threshold)
            .field("timeout", &self.timeout)
            .field("tracked_backends", &self.states.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const B: BackendId = BackendId::OpenAi;

    fn breaker() -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::new();
        (CircuitBreaker::with_clock(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn unknown_backend_is_closed() {
        let (mut cb, _) = breaker();
        assert!(!cb.is_open(B));
        assert_eq!(cb.state(B), CircuitState::CLOSED);
    }

    #[test]
    fn opens_after_exactly_threshold_failures() {
        let (mut cb, _) = breaker();
        for _ in 0..4 {
            assert!(!cb.record_failure(B));
            assert!(!cb.is_open(B));
        }
        assert!(cb.record_failure(B));
        assert!(cb.is_open(B));
    }

    #[test]
    fn sixth_failure_keeps_it_open() {
        let (mut cb, _) = breaker();
        for _ in 0..5 {
            cb.record_failure(B);
        }
        assert!(!cb.record_failure(B), "already open, not newly opened");
        assert!(cb.is_open(B));
        assert_eq!(cb.state(B).failures, 6);
    }

    #[test]
    fn closes_lazily_after_timeout() {
        let (mut cb, clock) = breaker();
        for _ in 0..5 {
            cb.record_failure(B);
        }
        clock.advance(Duration::from_secs(59));
        assert!(cb.is_open(B));

        clock.advance(Duration::from_secs(1));
        // State is only re-evaluated on read.
        assert!(cb.state(B).is_open);
        assert!(!cb.is_open(B));
        assert_eq!(cb.state(B).failures, 0);
        assert!(!cb.state(B).is_open);
    }

    #[test]
    fn failure_after_reopen_window_counts_from_zero() {
        let (mut cb, clock) = breaker();
        for _ in 0..5 {
            cb.record_failure(B);
        }
        clock.advance(OPEN_TIMEOUT);
        assert!(!cb.is_open(B));
        cb.record_failure(B);
        assert!(!cb.is_open(B));
        assert_eq!(cb.state(B).failures, 1);
    }

    #[test]
    fn success_resets() {
        let (mut cb, _) = breaker();
        for _ in 0..5 {
            cb.record_failure(B);
        }
        cb.record_success(B);
        assert!(!cb.is_open(B));
        assert_eq!(cb.state(B), CircuitState::CLOSED);
    }

    #[test]
    fn backends_are_independent() {
        let (mut cb, _) = breaker();
        for _ in 0..5 {
            cb.record_failure(B);
        }
        assert!(cb.is_open(B));
        assert!(!cb.is_open(BackendId::Anthropic));
    }

    #[test]
    fn reset_clears_open_circuit() {
        let (mut cb, _) = breaker();
        for _ in 0..5 {
            cb.record_failure(B);
        }
        cb.reset(B);
        assert!(!cb.is_open(B));
    }

    #[test]
    fn custom_limits() {
        let (cb, _) = breaker();
        let mut cb = cb.with_limits(2, Duration::from_secs(5));
        cb.record_failure(B);
        assert!(cb.record_failure(B));
        assert!(cb.is_open(B));
    }
}
