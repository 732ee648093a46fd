//! Provider abstraction — pluggable authentication sources.
//!
//! This module defines the `Authenticator` trait that all concrete
//! authentication backends (JWT, OAuth, SAML, LDAP, session stores, …)
//! implement, so the health/failover core can treat them uniformly.
//!
//! The health core only ever calls `validate_session` and `capabilities`
//! (the two probe signals) plus `name` (the registry key); `authenticate`
//! completes the interface for callers that route real logins through
//! [`HealthCheckManager::execute_with_fallback`](crate::failsafe::HealthCheckManager::execute_with_fallback).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Credentials presented to a provider.
///
/// One variant per credential shape the supported provider families
/// accept; providers reject variants they do not understand.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Credentials {
    /// Username/password pair (LDAP bind, form login)
    Password {
        /// Account identifier
        username: String,
        /// Account secret
        password: String,
    },
    /// Bearer token (JWT, OAuth access token)
    Token {
        /// Opaque or self-describing token string
        token: String,
    },
    /// Signed assertion document (SAML response)
    Assertion {
        /// Base64-encoded assertion payload
        assertion: String,
    },
}

/// An established session returned by a successful `authenticate` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    /// Authenticated subject (user id, DN, or token subject claim)
    pub subject: String,
    /// Provider that established the session
    pub provider: String,
    /// Session expiry, if the provider bounds session lifetime
    pub expires_at: Option<DateTime<Utc>>,
}

/// An authentication source.
///
/// Implementations wrap concrete protocol clients. The trait is
/// intentionally minimal; health gating and failover are composed
/// around it by [`crate::failsafe`].
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync + 'static` so they can be
/// stored in `Arc<dyn Authenticator>` and shared between the monitor's
/// probe task and caller-driven fallback execution. `validate_session`
/// and `capabilities` may be invoked concurrently.
#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    /// Unique, stable name for this provider instance.
    fn name(&self) -> &str;

    /// Authenticate the supplied credentials and establish a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the credentials are rejected or the backing
    /// service is unavailable.
    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthSession>;

    /// Check that the provider can currently validate sessions.
    ///
    /// Used as the primary health probe signal.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing service is unreachable or refuses
    /// the validation call.
    async fn validate_session(&self) -> Result<()>;

    /// Capabilities this provider advertises (e.g. `"mfa"`, `"sso"`).
    ///
    /// Used as the secondary health probe signal: a provider that
    /// answers with a non-empty list is considered responsive.
    async fn capabilities(&self) -> Vec<String>;
}
