//! Configuration loading tests: YAML parsing, defaults, validation.

use std::io::Write;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;

use authguard::config::Config;

fn write_config(yaml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp config");
    file.write_all(yaml.as_bytes()).expect("write temp config");
    file
}

#[test]
fn load_parses_yaml_with_humantime_durations() {
    let file = write_config(
        r"
providers:
  ldap:
    check_interval: 10s
    timeout: 2s
    retries: 1
    fallback_providers:
      - session
      - jwt
    circuit_breaker:
      failure_threshold: 3
      recovery_timeout: 5s
  session:
    check_interval: 1m
",
    );

    let config = Config::load(Some(file.path())).expect("config should load");

    let ldap = &config.providers["ldap"];
    assert_eq!(ldap.check_interval, Duration::from_secs(10));
    assert_eq!(ldap.timeout, Duration::from_secs(2));
    assert_eq!(ldap.retries, 1);
    assert_eq!(
        ldap.fallback_providers,
        vec!["session".to_string(), "jwt".to_string()]
    );
    assert_eq!(ldap.circuit_breaker.failure_threshold, 3);
    assert_eq!(ldap.circuit_breaker.recovery_timeout, Duration::from_secs(5));

    // Unspecified fields fall back to defaults.
    let session = &config.providers["session"];
    assert_eq!(session.check_interval, Duration::from_secs(60));
    assert_eq!(session.circuit_breaker.failure_threshold, 5);
    assert!(session.fallback_providers.is_empty());
}

#[test]
fn load_rejects_missing_file() {
    let err = Config::load(Some(std::path::Path::new("/does/not/exist.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
}

#[test]
fn load_rejects_invalid_provider_entry() {
    let file = write_config(
        r"
providers:
  broken:
    check_interval: 0s
",
    );

    let err = Config::load(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("broken"));
    assert!(err.to_string().contains("check_interval"));
}

#[test]
fn load_without_file_yields_empty_config() {
    let config = Config::load(None).expect("empty config should load");
    assert!(config.providers.is_empty());
}
