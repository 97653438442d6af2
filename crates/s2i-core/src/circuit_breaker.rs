//! Circuit breaker for outbound HTTP services.
//!
//! After repeated failures the breaker opens and rejects calls until a cool
//! down has passed, then lets trial calls through (half-open) and closes once
//! enough of them succeed. Used by the catalog and CRM clients; the write
//! orchestrator itself never retries.

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls are rejected
    Open,
    /// Probe calls are allowed
    HalfOpen,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,

    /// Time an open circuit waits before probing
    pub reset_timeout: Duration,

    /// Probe successes needed to close again
    pub success_threshold: u32,

    /// Name for logging
    pub name: String,
}

impl CircuitBreakerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            success_threshold: 2,
            name: name.into(),
        }
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }
}

struct BreakerState {
    state: CircuitState,
    failures: u32,
    successes: u32,
    opened_at: Option<Instant>,
}

/// Circuit breaker for external service calls.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        debug!(name = %config.name, "Circuit breaker created");
        Self {
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                opened_at: None,
            }),
        }
    }

    /// Whether a call may proceed. Moves an expired open circuit to half-open.
    pub fn is_allowed(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let expired = inner
                    .opened_at
                    .map_or(true, |at| at.elapsed() >= self.config.reset_timeout);
                if expired {
                    inner.state = CircuitState::HalfOpen;
                    inner.successes = 0;
                    info!(name = %self.config.name, "Circuit breaker half-open");
                }
                expired
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    inner.successes = 0;
                    inner.opened_at = None;
                    info!(name = %self.config.name, "Circuit breaker closed");
                }
            }
            CircuitState::Closed | CircuitState::Open => inner.failures = 0,
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failures += 1;
        match inner.state {
            CircuitState::Closed if inner.failures < self.config.failure_threshold => {
                debug!(
                    name = %self.config.name,
                    failures = inner.failures,
                    threshold = self.config.failure_threshold,
                    "Circuit breaker recorded failure"
                );
            }
            CircuitState::Closed | CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.successes = 0;
                inner.opened_at = Some(Instant::now());
                warn!(
                    name = %self.config.name,
                    failures = inner.failures,
                    "Circuit breaker opened"
                );
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Run `f` under the breaker.
    pub async fn execute<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        if !self.is_allowed() {
            return Err(CircuitBreakerError::CircuitOpen);
        }

        match f().await {
            Ok(result) => {
                self.record_success();
                Ok(result)
            }
            Err(e) => {
                self.record_failure();
                Err(CircuitBreakerError::ServiceError(e))
            }
        }
    }
}

/// Circuit breaker error.
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, call was not attempted
    CircuitOpen,
    /// Service returned an error
    ServiceError(E),
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::CircuitOpen => write!(f, "Circuit breaker is open"),
            CircuitBreakerError::ServiceError(e) => write!(f, "Service error: {}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CircuitBreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CircuitBreakerError::CircuitOpen => None,
            CircuitBreakerError::ServiceError(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, reset: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerConfig::new("test")
                .with_failure_threshold(threshold)
                .with_reset_timeout(reset)
                .with_success_threshold(2),
        )
    }

    #[test]
    fn test_opens_after_threshold() {
        let cb = breaker(3, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.is_allowed());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let cb = breaker(2, Duration::from_secs(60));
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_recovery() {
        let cb = breaker(1, Duration::ZERO);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        assert!(cb.is_allowed());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = breaker(1, Duration::ZERO);
        cb.record_failure();
        assert!(cb.is_allowed());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_execute_rejects_when_open() {
        let cb = breaker(1, Duration::from_secs(60));
        let result: Result<(), _> = cb.execute(|| async { Err::<(), _>("boom") }).await;
        assert!(matches!(result, Err(CircuitBreakerError::ServiceError("boom"))));

        let result = cb.execute(|| async { Ok::<_, &str>(1) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen)));
    }
}
