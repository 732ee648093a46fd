//! Per-provider health monitoring
//!
//! Tracks one provider's health through scheduled probes:
//! - Success/failure counts, running-mean latency, uptime %
//! - Bounded rolling history of probe results
//! - A circuit breaker gating the probe itself
//!
//! A probe first asks the provider to validate a session; if that fails
//! it falls back to the capability listing. Only when both signals fail
//! is the probe counted as unhealthy.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerMetrics};
use crate::config::ProviderHealthConfig;
use crate::provider::Authenticator;
use crate::{Error, Result};

/// Maximum retained probe results per provider (oldest evicted first)
pub const MAX_HISTORY: usize = 100;

/// Health status of a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Provider is operating normally
    Healthy,
    /// Provider state is uncertain (no confirmed result yet, but failures seen)
    Degraded,
    /// Provider is confirmed failing
    Unhealthy,
}

/// Immutable record of one health probe
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    /// Provider this probe ran against
    pub provider_name: String,
    /// Probe outcome
    pub status: HealthStatus,
    /// Probe duration in milliseconds
    pub response_time_ms: u64,
    /// When the probe completed
    pub timestamp: DateTime<Utc>,
    /// Failure message, when not healthy
    pub error: Option<String>,
    /// Opaque probe details (which signal confirmed health, etc.)
    pub details: Option<serde_json::Value>,
}

impl HealthCheckResult {
    /// A healthy probe result.
    #[must_use]
    pub fn healthy(provider_name: &str, response_time_ms: u64) -> Self {
        Self {
            provider_name: provider_name.to_string(),
            status: HealthStatus::Healthy,
            response_time_ms,
            timestamp: Utc::now(),
            error: None,
            details: None,
        }
    }

    /// A degraded probe result (operational, but impaired).
    #[must_use]
    pub fn degraded(provider_name: &str, reason: &str, response_time_ms: u64) -> Self {
        Self {
            provider_name: provider_name.to_string(),
            status: HealthStatus::Degraded,
            response_time_ms,
            timestamp: Utc::now(),
            error: None,
            details: Some(json!({ "message": reason })),
        }
    }

    /// An unhealthy probe result.
    #[must_use]
    pub fn unhealthy(provider_name: &str, error: String, response_time_ms: u64) -> Self {
        Self {
            provider_name: provider_name.to_string(),
            status: HealthStatus::Unhealthy,
            response_time_ms,
            timestamp: Utc::now(),
            error: Some(error),
            details: None,
        }
    }

    /// Attach opaque details to this result.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Aggregate health metrics for one provider
#[derive(Debug, Clone, Serialize)]
pub struct HealthMetrics {
    /// Total probes performed
    pub total_checks: u64,
    /// Probes that confirmed health
    pub successful_checks: u64,
    /// Probes that did not
    pub failed_checks: u64,
    /// Running mean probe duration in milliseconds
    pub average_response_time_ms: f64,
    /// When the last probe completed
    pub last_check_time: Option<DateTime<Utc>>,
    /// Percentage of probes that were healthy (100 when no probes yet)
    pub uptime: f64,
    /// When the last failing probe completed
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Failing probes since the last healthy one
    pub consecutive_failures: u32,
}

impl Default for HealthMetrics {
    fn default() -> Self {
        Self {
            total_checks: 0,
            successful_checks: 0,
            failed_checks: 0,
            average_response_time_ms: 0.0,
            last_check_time: None,
            uptime: 100.0,
            last_failure_time: None,
            consecutive_failures: 0,
        }
    }
}

/// Point-in-time health view of one provider
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    /// Derived status (see [`ProviderHealthMonitor::health_status`])
    pub status: HealthStatus,
    /// Aggregate metrics
    pub metrics: HealthMetrics,
    /// Circuit breaker state snapshot
    pub circuit_breaker: CircuitBreakerMetrics,
    /// Most recent probe result, if any
    pub last_check: Option<HealthCheckResult>,
}

/// Observer invoked with each completed probe result.
pub(crate) type ResultHook = Box<dyn Fn(&HealthCheckResult) + Send + Sync>;

/// Health monitor for a single provider
///
/// Owns the probing lifecycle: a repeating background task performs one
/// probe per tick, gated through this monitor's own circuit breaker,
/// and folds each result into metrics plus a bounded rolling history.
pub struct ProviderHealthMonitor {
    provider_name: String,
    config: ProviderHealthConfig,
    circuit_breaker: CircuitBreaker,
    metrics: RwLock<HealthMetrics>,
    history: Mutex<VecDeque<HealthCheckResult>>,
    task: Mutex<Option<JoinHandle<()>>>,
    result_hook: RwLock<Option<ResultHook>>,
}

impl ProviderHealthMonitor {
    /// Create a monitor for `provider_name` with the given policy.
    #[must_use]
    pub fn new(provider_name: &str, config: ProviderHealthConfig) -> Self {
        Self {
            provider_name: provider_name.to_string(),
            circuit_breaker: CircuitBreaker::new(provider_name, &config.circuit_breaker),
            config,
            metrics: RwLock::new(HealthMetrics::default()),
            history: Mutex::new(VecDeque::with_capacity(MAX_HISTORY)),
            task: Mutex::new(None),
            result_hook: RwLock::new(None),
        }
    }

    /// Provider this monitor watches.
    #[must_use]
    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    /// Monitoring policy for this provider.
    #[must_use]
    pub fn config(&self) -> &ProviderHealthConfig {
        &self.config
    }

    /// Install the observer invoked after every completed probe.
    pub(crate) fn set_result_hook(&self, hook: ResultHook) {
        *self.result_hook.write() = Some(hook);
    }

    /// Begin periodic probing of `provider`.
    ///
    /// Idempotent: any previously running probe task is stopped first.
    /// Probe failures never terminate the scheduling loop.
    pub fn start_monitoring(self: Arc<Self>, provider: Arc<dyn Authenticator>) {
        self.stop_monitoring();

        let monitor = Arc::clone(&self);
        let interval = self.config.check_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                // perform_health_check is infallible; a failing probe is
                // just an unhealthy result.
                let _ = monitor.perform_health_check(Arc::clone(&provider)).await;
            }
        });

        *self.task.lock() = Some(handle);
        debug!(
            provider = %self.provider_name,
            interval_ms = self.config.check_interval.as_millis(),
            "Health monitoring started"
        );
    }

    /// Cancel the probe task. Safe and idempotent when not running.
    pub fn stop_monitoring(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
            debug!(provider = %self.provider_name, "Health monitoring stopped");
        }
    }

    /// Returns `true` while a probe task is scheduled.
    #[must_use]
    pub fn is_monitoring(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Run one health probe against `provider`.
    ///
    /// Never fails: every outcome, including a rejected call while the
    /// circuit is open, is folded into a `HealthCheckResult`.
    pub async fn perform_health_check(
        &self,
        provider: Arc<dyn Authenticator>,
    ) -> HealthCheckResult {
        // Deterministic-timing hook for tests.
        if !self.config.min_response_time.is_zero() {
            tokio::time::sleep(self.config.min_response_time).await;
        }

        let started = Instant::now();
        let outcome = self
            .circuit_breaker
            .execute(|| {
                let provider = Arc::clone(&provider);
                async move { Self::probe(provider.as_ref()).await }
            })
            .await;
        let response_time_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(message) => HealthCheckResult::healthy(&self.provider_name, response_time_ms)
                .with_details(json!({ "message": message })),
            Err(e) => {
                HealthCheckResult::unhealthy(&self.provider_name, e.to_string(), response_time_ms)
            }
        };

        self.record_result(result.clone());
        result
    }

    /// Fold an externally produced result into this monitor's state.
    ///
    /// Probes use this internally; callers with out-of-band health
    /// signals (e.g. a load balancer marking a provider degraded) can
    /// inject results through the same path.
    pub fn record_result(&self, result: HealthCheckResult) {
        self.update_metrics(&result);

        if let Some(hook) = self.result_hook.read().as_ref() {
            hook(&result);
        }

        self.push_history(result);
    }

    /// Probe body: session validation first, capability listing as the
    /// fallback signal.
    async fn probe(provider: &dyn Authenticator) -> Result<&'static str> {
        if provider.validate_session().await.is_ok() {
            return Ok("Session validation successful");
        }

        let capabilities = provider.capabilities().await;
        if capabilities.is_empty() {
            Err(Error::HealthCheckFailed(format!(
                "Provider '{}' failed session validation and advertises no capabilities",
                provider.name()
            )))
        } else {
            Ok("Provider responsive")
        }
    }

    /// Fold one probe result into the aggregate metrics.
    fn update_metrics(&self, result: &HealthCheckResult) {
        let mut metrics = self.metrics.write();

        metrics.total_checks += 1;
        metrics.last_check_time = Some(result.timestamp);

        if result.status == HealthStatus::Healthy {
            metrics.successful_checks += 1;
            metrics.consecutive_failures = 0;
        } else {
            metrics.failed_checks += 1;
            metrics.consecutive_failures += 1;
            metrics.last_failure_time = Some(result.timestamp);
        }

        // Incremental running mean over all probes.
        let n = metrics.total_checks as f64;
        metrics.average_response_time_ms =
            (metrics.average_response_time_ms * (n - 1.0) + result.response_time_ms as f64) / n;

        metrics.uptime = metrics.successful_checks as f64 / n * 100.0;
    }

    /// Append to the rolling history, evicting the oldest past the cap.
    fn push_history(&self, result: HealthCheckResult) {
        let mut history = self.history.lock();
        if history.len() >= MAX_HISTORY {
            history.pop_front();
        }
        history.push_back(result);
    }

    /// Current health view.
    ///
    /// Status derivation: the most recent probe's status verbatim when
    /// history exists; `Degraded` when there is no history but failures
    /// have been counted; `Healthy` otherwise (optimistic default before
    /// any probe has run).
    #[must_use]
    pub fn health_status(&self) -> HealthSnapshot {
        let last_check = self.history.lock().back().cloned();
        let metrics = self.metrics.read().clone();

        let status = match &last_check {
            Some(result) => result.status,
            None if metrics.consecutive_failures > 0 => HealthStatus::Degraded,
            None => HealthStatus::Healthy,
        };

        HealthSnapshot {
            status,
            metrics,
            circuit_breaker: self.circuit_breaker.metrics(),
            last_check,
        }
    }

    /// The retained probe results, oldest first.
    ///
    /// With `limit`, only the most recent `limit` results are returned
    /// (still oldest first). The returned vector is a copy.
    #[must_use]
    pub fn health_history(&self, limit: Option<usize>) -> Vec<HealthCheckResult> {
        let history = self.history.lock();
        let skip = limit.map_or(0, |n| history.len().saturating_sub(n));
        history.iter().skip(skip).cloned().collect()
    }

    /// Zero all metrics, clear the history, and reset the breaker.
    pub fn reset_metrics(&self) {
        *self.metrics.write() = HealthMetrics::default();
        self.history.lock().clear();
        self.circuit_breaker.reset();
        info!(provider = %self.provider_name, "Health metrics reset");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
