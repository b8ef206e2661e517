//! Error taxonomy for the pairing session supervisor
//!
//! Storage, connection and pairing failures each get their own enum so callers
//! can tell them apart; [`SessionError`] wraps all of them for the `connect`
//! surface. Closure causes are deliberately absent: they are signals handled by
//! the reconnection policy, not errors.

use crate::config::ConfigError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use thiserror::Error;

/// Credential read/write failures. Always fatal to the current attempt.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Auth directory {path} is not accessible")]
    Inaccessible {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Stored credentials at {path} are corrupt")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write credentials to {path}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Credential backend error: {message}")]
    Backend { message: String },
}

/// Transport construction failures
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Invalid protocol version: {0}")]
    InvalidVersion(String),

    #[error("Failed to look up latest protocol version: {0}")]
    VersionLookup(String),

    #[error("Failed to open transport session: {0}")]
    OpenFailed(String),

    #[error("Supervisor task aborted: {0}")]
    Aborted(String),
}

/// Pairing code request failures
#[derive(Debug, Error)]
pub enum PairingError {
    #[error("Malformed phone number: {0}")]
    MalformedPhoneNumber(String),

    #[error("Pairing request rejected: {0}")]
    Rejected(String),

    #[error("Pairing request interrupted: {0}")]
    Interrupted(String),
}

/// Top-level error returned by `Supervisor::connect` and `SupervisorHandle::wait`
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Pairing error: {0}")]
    Pairing(#[from] PairingError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl SessionError {
    /// Whether this failure ends the supervisor once the first attempt is past.
    ///
    /// Pairing failures only end the current pairing request; the next
    /// attempt is allowed to ask again.
    pub fn stops_supervisor(&self) -> bool {
        !matches!(self, SessionError::Pairing(_))
    }

    /// Short label used in structured log fields
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Storage(_) => "storage",
            SessionError::Connection(_) => "connection",
            SessionError::Pairing(_) => "pairing",
            SessionError::Config(_) => "config",
        }
    }

    /// Create a storage backend error
    pub fn storage_backend<S: Into<String>>(message: S) -> Self {
        Self::Storage(StorageError::Backend {
            message: message.into(),
        })
    }

    /// Create a pairing rejection error
    pub fn pairing_rejected<S: Into<String>>(message: S) -> Self {
        Self::Pairing(PairingError::Rejected(message.into()))
    }

    /// Create a transport open failure
    pub fn open_failed<S: Into<String>>(message: S) -> Self {
        Self::Connection(ConnectionError::OpenFailed(message.into()))
    }
}

static PHONE_NUMBER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\+?\b[0-9]{7,15}\b").expect("phone pattern is valid"));

static PAIRING_CODE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Z0-9]{4}-?[A-Z0-9]{4}\b").expect("pairing code pattern is valid")
});

const MAX_MESSAGE_LEN: usize = 500;

/// Redact phone numbers and pairing codes from text headed for logs
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = PHONE_NUMBER_PATTERN
        .replace_all(message, "***PHONE***")
        .to_string();
    sanitized = PAIRING_CODE_PATTERN
        .replace_all(&sanitized, "***CODE***")
        .to_string();

    if sanitized.len() > MAX_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_MESSAGE_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;
