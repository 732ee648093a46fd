//! Provider registry, health aggregation, and fallback orchestration
//!
//! The [`HealthCheckManager`] owns one [`ProviderHealthMonitor`] per
//! registered provider and walks ordered fallback chains when a caller
//! executes an operation against an unhealthy or failing provider.
//!
//! The manager is an explicit instance: construct it at startup, pass
//! it where it is needed, and call [`HealthCheckManager::stop_all_monitoring`]
//! on shutdown. There is no global registry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::monitor::{HealthCheckResult, HealthSnapshot, HealthStatus, ProviderHealthMonitor};
use crate::config::ProviderHealthConfig;
use crate::provider::Authenticator;
use crate::{Error, Result};

/// Token returned by [`HealthCheckManager::add_health_check_callback`],
/// used to deregister the observer later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackId(u64);

/// Observer invoked with every completed probe result.
type HealthCheckCallback = Box<dyn Fn(&HealthCheckResult) + Send + Sync>;

/// One registered provider: its handle, monitor, and fallback chain.
struct ProviderEntry {
    provider: Arc<dyn Authenticator>,
    monitor: Arc<ProviderHealthMonitor>,
    fallbacks: Vec<String>,
}

/// Counts of providers per status in a [`HealthReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthSummary {
    /// Registered providers
    pub total: usize,
    /// Providers currently healthy
    pub healthy: usize,
    /// Providers currently unhealthy
    pub unhealthy: usize,
    /// Providers currently degraded
    pub degraded: usize,
}

/// Point-in-time rollup of every registered provider's health.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// When the report was assembled
    pub timestamp: DateTime<Utc>,
    /// Per-provider snapshots, keyed by provider name
    pub providers: HashMap<String, HealthSnapshot>,
    /// Aggregate counts
    pub summary: HealthSummary,
}

/// Registry of monitored authentication providers with automatic
/// fallback execution.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use authguard::config::ProviderHealthConfig;
/// use authguard::failsafe::HealthCheckManager;
/// # use authguard::provider::Authenticator;
/// # async fn example(ldap: Arc<dyn Authenticator>) -> authguard::Result<()> {
/// let manager = HealthCheckManager::new();
/// manager.register_provider(ldap, ProviderHealthConfig::default());
///
/// manager
///     .execute_with_fallback("ldap", |provider| async move {
///         provider.validate_session().await
///     })
///     .await?;
/// # manager.stop_all_monitoring();
/// # Ok(())
/// # }
/// ```
pub struct HealthCheckManager {
    entries: DashMap<String, ProviderEntry>,
    callbacks: Arc<RwLock<Vec<(u64, HealthCheckCallback)>>>,
    next_callback_id: AtomicU64,
}

impl HealthCheckManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            callbacks: Arc::new(RwLock::new(Vec::new())),
            next_callback_id: AtomicU64::new(0),
        }
    }

    /// Register `provider` under its own name and start monitoring it
    /// immediately.
    ///
    /// The fallback chain is taken from `config.fallback_providers`;
    /// each named fallback must be registered separately to be usable.
    /// Registering a name that already exists replaces the prior entry,
    /// stopping its monitor first so no probe task is leaked.
    pub fn register_provider(&self, provider: Arc<dyn Authenticator>, config: ProviderHealthConfig) {
        let name = provider.name().to_string();

        self.unregister_provider(&name);

        let monitor = Arc::new(ProviderHealthMonitor::new(&name, config));

        let callbacks = Arc::clone(&self.callbacks);
        monitor.set_result_hook(Box::new(move |result| {
            for (_, callback) in callbacks.read().iter() {
                callback(result);
            }
        }));

        Arc::clone(&monitor).start_monitoring(Arc::clone(&provider));

        let fallbacks = monitor.config().fallback_providers.clone();
        info!(
            provider = %name,
            fallbacks = ?fallbacks,
            "Registered provider for health monitoring"
        );

        self.entries.insert(
            name,
            ProviderEntry {
                provider,
                monitor,
                fallbacks,
            },
        );
    }

    /// Stop monitoring `name` and drop it from the registry.
    ///
    /// Returns `true` if the provider was registered. No-op otherwise.
    pub fn unregister_provider(&self, name: &str) -> bool {
        if let Some((_, entry)) = self.entries.remove(name) {
            entry.monitor.stop_monitoring();
            info!(provider = %name, "Unregistered provider");
            true
        } else {
            false
        }
    }

    /// Look up a registered provider handle.
    #[must_use]
    pub fn provider(&self, name: &str) -> Option<Arc<dyn Authenticator>> {
        self.entries.get(name).map(|e| Arc::clone(&e.provider))
    }

    /// Look up a provider's monitor (e.g. to reset its metrics or run
    /// an on-demand probe).
    #[must_use]
    pub fn monitor(&self, name: &str) -> Option<Arc<ProviderHealthMonitor>> {
        self.entries.get(name).map(|e| Arc::clone(&e.monitor))
    }

    /// Number of registered providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no providers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Health snapshots for every registered provider.
    #[must_use]
    pub fn all_health_status(&self) -> HashMap<String, HealthSnapshot> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().monitor.health_status()))
            .collect()
    }

    /// Health snapshot for one provider, or `None` if unknown.
    #[must_use]
    pub fn provider_health_status(&self, name: &str) -> Option<HealthSnapshot> {
        self.entries.get(name).map(|e| e.monitor.health_status())
    }

    /// Execute `operation` against `primary`, falling back along its
    /// configured chain until a candidate succeeds.
    ///
    /// Candidates are evaluated strictly in order: the primary first,
    /// then each fallback. A candidate is skipped when it is not
    /// registered or its monitor reports it confirmed-unhealthy;
    /// degraded or not-yet-probed providers get the benefit of the
    /// doubt. The operation runs against the provider handle directly —
    /// breaker protection applies to probes, not to caller operations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllProvidersFailed`] when every candidate was
    /// skipped or failed. Individual candidate failures are logged at
    /// warning level, never propagated.
    pub async fn execute_with_fallback<T, F, Fut>(&self, primary: &str, operation: F) -> Result<T>
    where
        F: Fn(Arc<dyn Authenticator>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut candidates = vec![primary.to_string()];
        if let Some(entry) = self.entries.get(primary) {
            candidates.extend(entry.fallbacks.iter().cloned());
        }

        let mut attempted = 0usize;
        for name in &candidates {
            // Clone the handles out so no registry guard is held across
            // the await below.
            let Some((provider, monitor)) = self
                .entries
                .get(name)
                .map(|e| (Arc::clone(&e.provider), Arc::clone(&e.monitor)))
            else {
                debug!(provider = %name, "Skipping unregistered candidate");
                continue;
            };

            if monitor.health_status().status == HealthStatus::Unhealthy {
                debug!(provider = %name, "Skipping unhealthy candidate");
                continue;
            }

            attempted += 1;
            match operation(provider).await {
                Ok(value) => {
                    if name != primary {
                        info!(primary = %primary, fallback = %name, "Operation succeeded on fallback provider");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    warn!(provider = %name, error = %e, "Provider operation failed, trying next candidate");
                }
            }
        }

        warn!(
            primary = %primary,
            candidates = candidates.len(),
            attempted,
            "All providers failed"
        );
        Err(Error::AllProvidersFailed {
            primary: primary.to_string(),
            attempted,
        })
    }

    /// Register an observer invoked with every completed probe result
    /// from every monitored provider.
    pub fn add_health_check_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&HealthCheckResult) + Send + Sync + 'static,
    {
        let id = self.next_callback_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks.write().push((id, Box::new(callback)));
        CallbackId(id)
    }

    /// Remove a previously registered observer.
    ///
    /// Returns `true` if the observer was present.
    pub fn remove_health_check_callback(&self, id: CallbackId) -> bool {
        let mut callbacks = self.callbacks.write();
        let before = callbacks.len();
        callbacks.retain(|(callback_id, _)| *callback_id != id.0);
        callbacks.len() != before
    }

    /// Stop every registered monitor's probe task (process shutdown).
    pub fn stop_all_monitoring(&self) {
        for entry in &self.entries {
            entry.value().monitor.stop_monitoring();
        }
        info!(providers = self.entries.len(), "Stopped all health monitoring");
    }

    /// Assemble a point-in-time health report across all providers.
    #[must_use]
    pub fn health_report(&self) -> HealthReport {
        let providers = self.all_health_status();

        let mut summary = HealthSummary {
            total: providers.len(),
            healthy: 0,
            unhealthy: 0,
            degraded: 0,
        };
        for snapshot in providers.values() {
            match snapshot.status {
                HealthStatus::Healthy => summary.healthy += 1,
                HealthStatus::Degraded => summary.degraded += 1,
                HealthStatus::Unhealthy => summary.unhealthy += 1,
            }
        }

        HealthReport {
            timestamp: Utc::now(),
            providers,
            summary,
        }
    }
}

impl Default for HealthCheckManager {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
