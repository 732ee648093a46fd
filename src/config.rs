//! Configuration management

use std::{collections::HashMap, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
///
/// Maps provider names to their health-monitoring policy. Integrators
/// typically load this once at startup and feed each entry to
/// [`HealthCheckManager::register_provider`](crate::failsafe::HealthCheckManager::register_provider).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Per-provider health check configurations, keyed by provider name
    pub providers: HashMap<String, ProviderHealthConfig>,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be
    /// parsed, or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (AUTHGUARD_ prefix)
        figment = figment.merge(Env::prefixed("AUTHGUARD_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate all provider entries
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid provider entry.
    pub fn validate(&self) -> Result<()> {
        for (name, provider) in &self.providers {
            provider
                .validate()
                .map_err(|e| Error::Config(format!("provider '{name}': {e}")))?;
        }
        Ok(())
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Time to wait before allowing a trial operation
    #[serde(with = "humantime_serde")]
    pub recovery_timeout: Duration,
    /// Window over which failures are considered (informational)
    #[serde(with = "humantime_serde")]
    pub monitoring_period: Duration,
    /// Expected time for the provider to recover (reporting only)
    #[serde(with = "humantime_serde")]
    pub expected_recovery_time: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            monitoring_period: Duration::from_secs(60),
            expected_recovery_time: Duration::from_secs(60),
        }
    }
}

/// Health check configuration for one provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderHealthConfig {
    /// Probe cadence
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,
    /// Per-probe time budget (advisory — a hung probe delays that tick,
    /// it is not forcibly cancelled)
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Intra-probe retry budget (informational — a probe is one attempt)
    pub retries: u32,
    /// Circuit breaker configuration for this provider
    pub circuit_breaker: CircuitBreakerConfig,
    /// Ordered provider names to try after this one fails
    pub fallback_providers: Vec<String>,
    /// Artificial floor on probe duration; zero disables it.
    /// Used to make probe timing deterministic in tests.
    #[serde(with = "humantime_serde")]
    pub min_response_time: Duration,
}

impl Default for ProviderHealthConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            retries: 0,
            circuit_breaker: CircuitBreakerConfig::default(),
            fallback_providers: Vec::new(),
            min_response_time: Duration::ZERO,
        }
    }
}

impl ProviderHealthConfig {
    /// Validate this entry
    ///
    /// # Errors
    ///
    /// Returns an error if the probe cadence is zero or the breaker
    /// threshold is zero.
    pub fn validate(&self) -> Result<()> {
        if self.check_interval.is_zero() {
            return Err(Error::Config("check_interval must be non-zero".into()));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(Error::Config(
                "circuit_breaker.failure_threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ProviderHealthConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.check_interval, Duration::from_secs(30));
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert!(config.fallback_providers.is_empty());
        assert!(config.min_response_time.is_zero());
    }

    #[test]
    fn zero_check_interval_is_rejected() {
        let config = ProviderHealthConfig {
            check_interval: Duration::ZERO,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("check_interval"));
    }

    #[test]
    fn zero_failure_threshold_is_rejected() {
        let config = ProviderHealthConfig {
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("failure_threshold"));
    }

    #[test]
    fn config_roundtrips_through_yaml() {
        let mut providers = HashMap::new();
        providers.insert(
            "ldap".to_string(),
            ProviderHealthConfig {
                check_interval: Duration::from_secs(10),
                fallback_providers: vec!["session".to_string()],
                ..Default::default()
            },
        );
        let config = Config { providers };

        let yaml = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&yaml).unwrap();

        let ldap = &parsed.providers["ldap"];
        assert_eq!(ldap.check_interval, Duration::from_secs(10));
        assert_eq!(ldap.fallback_providers, vec!["session".to_string()]);
    }

    #[test]
    fn validate_names_offending_provider() {
        let mut providers = HashMap::new();
        providers.insert(
            "saml".to_string(),
            ProviderHealthConfig {
                check_interval: Duration::ZERO,
                ..Default::default()
            },
        );
        let config = Config { providers };

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("saml"));
    }
}
