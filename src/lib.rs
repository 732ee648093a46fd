//! Authguard Library
//!
//! Health monitoring and automatic failover for authentication providers.
//!
//! # Features
//!
//! - **Circuit Breakers**: per-provider failure gates with half-open
//!   recovery probing
//! - **Health Monitoring**: scheduled probes with rolling history,
//!   running-mean latency, and uptime tracking
//! - **Automatic Fallback**: ordered provider chains walked until the
//!   first success
//! - **Observability**: serializable health snapshots and reports,
//!   structured tracing throughout
//!
//! Concrete authentication backends (LDAP, SAML, OAuth, JWT, sessions)
//! live outside this crate; they plug in through the
//! [`provider::Authenticator`] trait.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod failsafe;
pub mod provider;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
