//! Circuit breaker guarding calls to a networked backend.
//!
//! While the breaker is open, calls are rejected immediately instead of
//! waiting on a connect or command timeout, so an outage of the backend
//! degrades callers without adding latency to every request.

use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls are rejected until the cool-down elapses
    Open,
    /// A limited number of trial calls are let through
    HalfOpen,
}

impl CircuitState {
    /// Lowercase label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again
    pub success_threshold: u32,
    /// Cool-down before an open circuit lets trials through
    pub timeout: Duration,
    /// Maximum concurrent trials while half-open
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
            half_open_max_requests: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Set the failure threshold.
    #[must_use]
    pub const fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the success threshold.
    #[must_use]
    pub const fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Set the open-state cool-down.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    successes: u32,
    trials: u32,
    opened_at: Option<Instant>,
}

/// Three-state circuit breaker (closed, open, half-open).
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                trials: 0,
                opened_at: None,
            }),
        }
    }

    /// Whether a call may proceed right now.
    pub async fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.config.timeout);
                if cooled {
                    inner.state = CircuitState::HalfOpen;
                    inner.successes = 0;
                    inner.trials = 1;
                }
                cooled
            }
            CircuitState::HalfOpen => {
                if inner.trials < self.config.half_open_max_requests {
                    inner.trials += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call.
    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => inner.failures = 0,
            CircuitState::HalfOpen => {
                inner.successes += 1;
                inner.trials = inner.trials.saturating_sub(1);
                if inner.successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    inner.successes = 0;
                    inner.trials = 0;
                    inner.opened_at = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a call that reached the backend but gave no verdict on its
    /// health. Frees the half-open slot the call held.
    pub async fn record_inconclusive(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == CircuitState::HalfOpen {
            inner.trials = inner.trials.saturating_sub(1);
        }
    }

    /// Record a failed call. A failed half-open trial reopens immediately.
    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.failures = inner.failures.saturating_add(1);
        let trip = match inner.state {
            CircuitState::Closed => inner.failures >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if trip {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.successes = 0;
            inner.trials = 0;
        }
    }

    /// Current state.
    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }
}
