//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading, validation, and error handling.

use pairlink::config::{ConfigError, ConnectionConfig, DEFAULT_AUTH_DIR};
use pairlink::transport::{ProtocolVersion, Scenario};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
phone_number = "+55 21 98997-4782"
auth_dir = "state/pairing"
protocol_version = [2, 3000, 1015901307]

[reconnect]
pairing_retry_ms = 3000
transient_retry_ms = 6000
max_retries = 10
"#
    )
    .unwrap();

    let config = ConnectionConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.phone_number, "5521989974782");
    assert_eq!(config.auth_dir, PathBuf::from("state/pairing"));
    assert_eq!(
        config.protocol_version,
        Some(ProtocolVersion([2, 3000, 1015901307]))
    );
    assert_eq!(config.reconnect.pairing_retry(), Duration::from_secs(3));
    assert_eq!(config.reconnect.transient_retry(), Duration::from_secs(6));
    assert_eq!(config.reconnect.max_retries, Some(10));
}

#[test]
fn test_config_defaults_when_sections_are_omitted() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, r#"phone_number = "15551234567""#).unwrap();

    let config = ConnectionConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.auth_dir, PathBuf::from(DEFAULT_AUTH_DIR));
    assert_eq!(config.reconnect.pairing_retry_ms, 3000);
    assert_eq!(config.reconnect.transient_retry_ms, 4000);
    assert_eq!(config.reconnect.max_retries, None);
    assert!(config.protocol_version.is_none());
}

#[test]
fn test_missing_file_is_a_read_error() {
    let result = ConnectionConfig::load_from_file(&PathBuf::from("/nonexistent/pairlink.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_a_parse_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "phone_number = ").unwrap();

    let result = ConnectionConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_missing_phone_number_is_a_parse_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, r#"auth_dir = "auth""#).unwrap();

    let result = ConnectionConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_invalid_phone_number_in_file_is_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, r#"phone_number = "12345""#).unwrap();

    let result = ConnectionConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidPhoneNumber(_))));
}

#[test]
fn test_zero_delay_is_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
phone_number = "15551234567"

[reconnect]
pairing_retry_ms = 0
"#
    )
    .unwrap();

    let result = ConnectionConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_empty_auth_dir_is_rejected() {
    let result = ConnectionConfig::new("15551234567")
        .with_auth_dir("")
        .validated();
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_scenario_loads_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
pairing_code = "LMNO-4321"
reject_pairing = "number not on service"

[[attempts]]
steps = [{{ event = "connecting" }}, {{ event = "open", after_ms = 5 }}]
"#
    )
    .unwrap();

    let scenario = Scenario::load_from_file(temp_file.path()).unwrap();

    assert_eq!(scenario.pairing_code, "LMNO-4321");
    assert_eq!(
        scenario.reject_pairing.as_deref(),
        Some("number not on service")
    );
    assert_eq!(scenario.attempts.len(), 1);
    assert_eq!(scenario.attempts[0].steps[1].after_ms, 5);
}
