//! Circuit breaker implementation

use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;
use crate::{Error, Result};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Circuit is closed (operations pass through)
    Closed,
    /// Circuit is open (operations rejected immediately)
    Open,
    /// Circuit is half-open (one trial operation allowed to test recovery)
    HalfOpen,
}

/// Snapshot of breaker state for observability
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerMetrics {
    /// Current state
    pub state: CircuitState,
    /// Consecutive failure count
    pub failures: u32,
    /// When the last failure was recorded
    pub last_failure_time: Option<DateTime<Utc>>,
    /// When the next trial operation will be allowed
    pub next_attempt: Option<DateTime<Utc>>,
}

/// Mutable breaker state, guarded by one mutex so the gate check and
/// the transition it may trigger are a single atomic step.
struct Inner {
    state: CircuitState,
    failures: u32,
    last_failure_time: Option<DateTime<Utc>>,
    next_attempt_at: Option<Instant>,
}

/// Circuit breaker for provider protection
///
/// Gates a single fallible async operation: while the circuit is open
/// and the recovery timeout has not elapsed, operations are rejected
/// without being invoked. Once the timeout elapses one trial operation
/// is let through; its outcome decides between closing and reopening.
///
/// All failures count equally toward the threshold, and a successful
/// trial fully resets the failure count — recovery is binary, not
/// gradual.
pub struct CircuitBreaker {
    /// Provider name (for logging and error payloads)
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    #[must_use]
    pub fn new(name: &str, config: &CircuitBreakerConfig) -> Self {
        Self {
            name: name.to_string(),
            failure_threshold: config.failure_threshold,
            recovery_timeout: config.recovery_timeout,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                last_failure_time: None,
                next_attempt_at: None,
            }),
        }
    }

    /// Execute `operation` through the breaker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CircuitBreakerOpen`] without invoking `operation`
    /// when the circuit is open and the recovery timeout has not yet
    /// elapsed. Otherwise returns the operation's own outcome; a failed
    /// outcome is counted toward the failure threshold and propagated
    /// unchanged.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(retry_in) = self.try_acquire() {
            warn!(provider = %self.name, retry_in_ms = retry_in.as_millis(), "Circuit open, rejecting operation");
            return Err(Error::CircuitBreakerOpen {
                provider: self.name.clone(),
                retry_in,
            });
        }

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }

    /// Check whether an operation may proceed.
    ///
    /// Returns `None` to allow, or `Some(remaining)` when the circuit is
    /// open with `remaining` time until the next trial. Transitions
    /// open → half-open when the recovery timeout has elapsed.
    fn try_acquire(&self) -> Option<Duration> {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => None,
            CircuitState::Open => {
                let next_attempt = inner.next_attempt_at?;
                let now = Instant::now();
                if now >= next_attempt {
                    debug!(provider = %self.name, "Recovery timeout elapsed, transitioning to half-open");
                    inner.state = CircuitState::HalfOpen;
                    None
                } else {
                    Some(next_attempt - now)
                }
            }
        }
    }

    /// Record a successful operation: full reset to closed.
    fn record_success(&self) {
        let mut inner = self.inner.lock();

        if inner.state != CircuitState::Closed {
            info!(provider = %self.name, "Circuit breaker closed");
        }
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.last_failure_time = None;
        inner.next_attempt_at = None;
    }

    /// Record a failed operation, opening the circuit at the threshold
    /// or on any failure while not closed.
    fn record_failure(&self) {
        let mut inner = self.inner.lock();

        let now = Instant::now();
        inner.failures += 1;
        inner.last_failure_time = Some(Utc::now());

        let should_open = inner.state != CircuitState::Closed
            || inner.failures >= self.failure_threshold;

        if should_open {
            inner.state = CircuitState::Open;
            inner.next_attempt_at = Some(now + self.recovery_timeout);
            warn!(
                provider = %self.name,
                failures = inner.failures,
                retry_in_ms = self.recovery_timeout.as_millis(),
                "Circuit breaker opened"
            );
        } else {
            debug!(
                provider = %self.name,
                failures = inner.failures,
                threshold = self.failure_threshold,
                "Failure recorded"
            );
        }
    }

    /// Get current state
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Get a metrics snapshot
    #[must_use]
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        let next_attempt = inner.next_attempt_at.map(|at| {
            let remaining = at.saturating_duration_since(Instant::now());
            Utc::now()
                + chrono::Duration::from_std(remaining).unwrap_or_else(|_| chrono::Duration::zero())
        });

        CircuitBreakerMetrics {
            state: inner.state,
            failures: inner.failures,
            last_failure_time: inner.last_failure_time,
            next_attempt,
        }
    }

    /// Force the breaker back to closed, clearing all failure state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.last_failure_time = None;
        inner.next_attempt_at = None;

        debug!(provider = %self.name, "Circuit breaker reset");
    }

    /// Human-readable state summary for status surfaces.
    #[must_use]
    pub fn status_message(&self) -> String {
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                format!("Provider '{}' circuit breaker is closed", self.name)
            }
            CircuitState::Open => {
                let retry_in = inner
                    .next_attempt_at
                    .map(|at| at.saturating_duration_since(Instant::now()).as_secs())
                    .unwrap_or_default();
                format!(
                    "Provider '{}' circuit breaker is open after {} failures, retry in {} seconds",
                    self.name, inner.failures, retry_in
                )
            }
            CircuitState::HalfOpen => {
                format!(
                    "Provider '{}' circuit breaker is half-open (testing recovery)",
                    self.name
                )
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn breaker(threshold: u32, recovery: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test-provider",
            &CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: recovery,
                ..Default::default()
            },
        )
    }

    async fn fail(cb: &CircuitBreaker) -> Result<()> {
        cb.execute(|| async { Err(Error::OperationFailed("boom".into())) })
            .await
    }

    #[test]
    fn starts_closed_with_empty_metrics() {
        let cb = breaker(3, Duration::from_secs(30));
        assert_eq!(cb.state(), CircuitState::Closed);

        let metrics = cb.metrics();
        assert_eq!(metrics.failures, 0);
        assert!(metrics.last_failure_time.is_none());
        assert!(metrics.next_attempt.is_none());
    }

    #[tokio::test]
    async fn success_passes_through() {
        let cb = breaker(3, Duration::from_secs(30));
        let result = cb.execute(|| async { Ok(42) }).await.unwrap();
        assert_eq!(result, 42);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn opens_after_exactly_threshold_failures() {
        let cb = breaker(3, Duration::from_secs(30));

        for _ in 0..2 {
            let _ = fail(&cb).await;
            assert_eq!(cb.state(), CircuitState::Closed);
        }

        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.metrics().failures, 3);
        assert!(cb.metrics().next_attempt.is_some());
    }

    #[tokio::test]
    async fn open_circuit_short_circuits_without_invoking() {
        let cb = breaker(2, Duration::from_secs(30));
        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        // GIVEN: an open circuit inside its recovery window
        // WHEN: executing another operation
        // THEN: it is rejected without the operation running
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);
        let result = cb
            .execute(|| async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(Error::CircuitBreakerOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn trial_allowed_after_recovery_timeout() {
        let cb = breaker(1, Duration::from_millis(20));
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;

        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);
        let result = cb
            .execute(|| async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok("recovered")
            })
            .await;

        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().failures, 0);
    }

    #[tokio::test]
    async fn failed_trial_reopens_with_fresh_next_attempt() {
        let cb = breaker(1, Duration::from_millis(20));
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;

        // The trial is invoked (half-open) but fails
        let result = fail(&cb).await;
        assert!(matches!(result, Err(Error::OperationFailed(_))));
        assert_eq!(cb.state(), CircuitState::Open);

        // Fresh recovery window: immediately rejected again
        let result = cb.execute(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(Error::CircuitBreakerOpen { .. })));
    }

    #[tokio::test]
    async fn operation_error_propagates_unchanged() {
        let cb = breaker(5, Duration::from_secs(30));
        let result: Result<()> = cb
            .execute(|| async { Err(Error::HealthCheckFailed("no signal".into())) })
            .await;

        match result {
            Err(Error::HealthCheckFailed(msg)) => assert_eq!(msg, "no signal"),
            other => panic!("expected HealthCheckFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reset_returns_to_closed_and_clears_state() {
        let cb = breaker(1, Duration::from_secs(600));
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();

        assert_eq!(cb.state(), CircuitState::Closed);
        let metrics = cb.metrics();
        assert_eq!(metrics.failures, 0);
        assert!(metrics.last_failure_time.is_none());
        assert!(metrics.next_attempt.is_none());

        // Operations pass through again
        let result = cb.execute(|| async { Ok(1) }).await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn success_resets_accumulated_failures() {
        let cb = breaker(3, Duration::from_secs(30));
        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        assert_eq!(cb.metrics().failures, 2);

        let _ = cb.execute(|| async { Ok(()) }).await;
        assert_eq!(cb.metrics().failures, 0);

        // Two more failures do not reach the threshold again
        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn status_message_reflects_state() {
        let cb = breaker(2, Duration::from_secs(30));
        assert!(cb.status_message().contains("closed"));

        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        let message = cb.status_message();
        assert!(message.contains("Provider 'test-provider'"));
        assert!(message.contains("circuit breaker is open"));
        assert!(message.contains("2 failures"));
        assert!(message.contains("retry in"));
    }
}
