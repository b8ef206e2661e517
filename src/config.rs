//! Connection configuration for the pairing supervisor
//!
//! A [`ConnectionConfig`] is built once by the caller (directly or from a TOML
//! file) and cloned unchanged into every session attempt. Hooks are attached in
//! code; they never come from the file.

use crate::hooks::Hooks;
use crate::transport::ProtocolVersion;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Auth directory used when none is configured
pub const DEFAULT_AUTH_DIR: &str = "pairing_auth_info";

static PHONE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9]{7,15}$").expect("phone number pattern is valid"));

/// Everything one `connect` call needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Phone number in international format, digits only after normalisation
    pub phone_number: String,
    /// Directory handed to the credential store
    #[serde(default = "default_auth_dir")]
    pub auth_dir: PathBuf,
    /// Pin a protocol version instead of asking the transport for the latest
    #[serde(default)]
    pub protocol_version: Option<ProtocolVersion>,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(skip)]
    pub hooks: Hooks,
}

fn default_auth_dir() -> PathBuf {
    PathBuf::from(DEFAULT_AUTH_DIR)
}

/// Delays and ceiling applied by the reconnection supervisor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the next attempt while waiting for the code to be entered
    #[serde(default = "default_pairing_retry_ms")]
    pub pairing_retry_ms: u64,
    /// Delay before the next attempt after any other closure
    #[serde(default = "default_transient_retry_ms")]
    pub transient_retry_ms: u64,
    /// Consecutive retries allowed before giving up (None = unlimited)
    #[serde(default)]
    pub max_retries: Option<u32>,
}

fn default_pairing_retry_ms() -> u64 {
    3000
}

fn default_transient_retry_ms() -> u64 {
    4000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            pairing_retry_ms: default_pairing_retry_ms(),
            transient_retry_ms: default_transient_retry_ms(),
            max_retries: None,
        }
    }
}

impl ReconnectConfig {
    pub fn pairing_retry(&self) -> Duration {
        Duration::from_millis(self.pairing_retry_ms)
    }

    pub fn transient_retry(&self) -> Duration {
        Duration::from_millis(self.transient_retry_ms)
    }

    /// Reject settings that would hot-loop or never connect
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "max_retries must be greater than 0 or unset for unlimited".to_string(),
            ));
        }
        if self.pairing_retry_ms == 0 || self.transient_retry_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "reconnect delays must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid phone number: {0}")]
    InvalidPhoneNumber(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ConnectionConfig {
    pub fn new<S: Into<String>>(phone_number: S) -> Self {
        Self {
            phone_number: phone_number.into(),
            auth_dir: default_auth_dir(),
            protocol_version: None,
            reconnect: ReconnectConfig::default(),
            hooks: Hooks::default(),
        }
    }

    pub fn with_auth_dir<P: Into<PathBuf>>(mut self, auth_dir: P) -> Self {
        self.auth_dir = auth_dir.into();
        self
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = Some(version);
        self
    }

    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ConnectionConfig = toml::from_str(&content)?;
        config.validated()
    }

    /// Validate every field and normalise the phone number to bare digits
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        self.phone_number = normalize_phone_number(&self.phone_number)?;

        if self.auth_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "auth_dir must not be empty".to_string(),
            ));
        }

        self.reconnect.validate()?;
        Ok(self)
    }
}

/// Strip separators and a leading `+`, then check the E.164 digit count
pub fn normalize_phone_number(raw: &str) -> Result<String, ConfigError> {
    let compact: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();

    if compact.is_empty() {
        return Err(ConfigError::InvalidPhoneNumber(
            "phone number is required".to_string(),
        ));
    }

    if !PHONE_NUMBER.is_match(&compact) {
        return Err(ConfigError::InvalidPhoneNumber(format!(
            "'{raw}' must be 7-15 digits including the country code"
        )));
    }

    Ok(compact.trim_start_matches('+').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_full_config_from_toml() {
        let toml_content = r#"
phone_number = "15551234567"
auth_dir = "state/auth"
protocol_version = [2, 3000, 1015901307]

[reconnect]
pairing_retry_ms = 2500
transient_retry_ms = 5000
max_retries = 20
"#;

        let config: ConnectionConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.phone_number, "15551234567");
        assert_eq!(config.auth_dir, PathBuf::from("state/auth"));
        assert_eq!(
            config.protocol_version,
            Some(ProtocolVersion([2, 3000, 1015901307]))
        );
        assert_eq!(config.reconnect.pairing_retry(), Duration::from_millis(2500));
        assert_eq!(config.reconnect.max_retries, Some(20));
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: ConnectionConfig = toml::from_str(r#"phone_number = "15551234567""#).unwrap();
        assert_eq!(config.auth_dir, PathBuf::from(DEFAULT_AUTH_DIR));
        assert_eq!(config.protocol_version, None);
        assert_eq!(config.reconnect, ReconnectConfig::default());
    }

    #[test]
    fn test_transient_delay_is_longer_than_pairing_delay() {
        let reconnect = ReconnectConfig::default();
        assert!(reconnect.transient_retry() > reconnect.pairing_retry());
        assert_eq!(reconnect.max_retries, None);
    }

    #[test]
    fn test_validated_normalizes_phone_number() {
        let config = ConnectionConfig::new("+1 (555) 123-4567").validated().unwrap();
        assert_eq!(config.phone_number, "15551234567");
    }

    #[test]
    fn test_empty_phone_number_rejected() {
        let result = ConnectionConfig::new("   ").validated();
        assert!(matches!(result, Err(ConfigError::InvalidPhoneNumber(_))));
    }

    #[test]
    fn test_phone_number_with_letters_rejected() {
        let result = normalize_phone_number("1555CALLNOW");
        assert!(matches!(result, Err(ConfigError::InvalidPhoneNumber(_))));
    }

    #[test]
    fn test_zero_max_retries_rejected() {
        let reconnect = ReconnectConfig {
            max_retries: Some(0),
            ..Default::default()
        };
        assert!(reconnect.validate().is_err());
    }

    #[test]
    fn test_zero_delay_rejected() {
        let reconnect = ReconnectConfig {
            transient_retry_ms: 0,
            ..Default::default()
        };
        assert!(reconnect.validate().is_err());
    }

    #[test]
    fn test_empty_auth_dir_rejected() {
        let result = ConnectionConfig::new("15551234567")
            .with_auth_dir("")
            .validated();
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    proptest! {
        #[test]
        fn prop_valid_numbers_normalize_to_digits(digits in "[0-9]{7,15}", plus in any::<bool>()) {
            let raw = if plus { format!("+{digits}") } else { digits.clone() };
            let normalized = normalize_phone_number(&raw).unwrap();
            prop_assert_eq!(normalized, digits);
        }

        #[test]
        fn prop_short_numbers_rejected(digits in "[0-9]{1,6}") {
            prop_assert!(normalize_phone_number(&digits).is_err());
        }
    }
}
