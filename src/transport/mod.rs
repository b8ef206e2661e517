//! Transport layer seam
//!
//! The wire protocol and the cryptographic session live behind these traits.
//! A [`SessionFactory`] builds one [`Session`] per attempt together with the
//! event stream for that attempt; dropping the stream tears down every
//! subscription the attempt had.

use crate::credentials::Credentials;
use crate::error::{ConnectionError, PairingError};
use crate::supervisor::AttemptId;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod events;
pub mod scripted;

pub use events::{
    CloseCause, ConnectionPhase, ConnectionUpdate, DisconnectReason, EventStream, MessageBatch,
    MessageEnvelope, SessionEvent, UpsertKind,
};
pub use scripted::{Scenario, ScriptedSessionFactory};

/// Client version advertised to the remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolVersion(pub [u32; 3]);

impl ProtocolVersion {
    pub fn validate(&self) -> Result<(), ConnectionError> {
        if self.0 == [0, 0, 0] {
            return Err(ConnectionError::InvalidVersion(
                "version metadata is all zeros".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [major, minor, patch] = self.0;
        write!(f, "{major}.{minor}.{patch}")
    }
}

/// Inputs for opening one session attempt
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub attempt: AttemptId,
    pub version: ProtocolVersion,
    /// Credentials loaded from the store at the start of this attempt
    pub credentials: Credentials,
    /// Span the session should log under
    pub span: tracing::Span,
}

/// A live connection for one attempt
#[async_trait::async_trait]
pub trait Session: Send + Sync + 'static {
    /// Ask the remote service to issue a pairing code for this phone number
    async fn request_pairing_code(&self, phone_number: &str) -> Result<String, PairingError>;

    /// Close the connection; called when the attempt is discarded
    async fn close(&self);
}

/// Builds sessions; one call per attempt
#[async_trait::async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    type Session: Session;

    /// Latest client version, used when the config does not pin one
    async fn latest_version(&self) -> Result<ProtocolVersion, ConnectionError>;

    /// Open a brand-new session and its event stream
    async fn open_session(
        &self,
        options: SessionOptions,
    ) -> Result<(Self::Session, EventStream), ConnectionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_display() {
        assert_eq!(
            ProtocolVersion([2, 3000, 1015901307]).to_string(),
            "2.3000.1015901307"
        );
    }

    #[test]
    fn test_zero_version_rejected() {
        assert!(ProtocolVersion([0, 0, 0]).validate().is_err());
        assert!(ProtocolVersion([2, 3000, 1]).validate().is_ok());
    }

    #[test]
    fn test_version_serializes_as_array() {
        let json = serde_json::to_string(&ProtocolVersion([2, 3000, 7])).unwrap();
        assert_eq!(json, "[2,3000,7]");
    }
}
