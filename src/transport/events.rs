//! Events emitted by a transport session
//!
//! Each session attempt produces a single ordered stream of these values. The
//! three variants correspond to the `connection.update`, `creds.update` and
//! `messages.upsert` subscriptions of the underlying protocol client.

use crate::credentials::Credentials;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Receiving half handed out by `SessionFactory::open_session`
pub type EventStream = mpsc::Receiver<SessionEvent>;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ConnectionUpdate(ConnectionUpdate),
    CredentialsUpdate(Credentials),
    MessagesUpsert(MessageBatch),
}

impl SessionEvent {
    /// Protocol-level name of the subscription this event belongs to
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::ConnectionUpdate(_) => "connection.update",
            SessionEvent::CredentialsUpdate(_) => "creds.update",
            SessionEvent::MessagesUpsert(_) => "messages.upsert",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPhase {
    Connecting,
    Open,
    Close,
}

/// One connection lifecycle notification
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionUpdate {
    /// Absent when the update only carries other fields
    pub phase: Option<ConnectionPhase>,
    /// QR payload; unused by phone-number pairing
    pub qr: Option<String>,
    /// Present on close
    pub close_cause: Option<CloseCause>,
}

impl ConnectionUpdate {
    pub fn connecting() -> Self {
        Self {
            phase: Some(ConnectionPhase::Connecting),
            ..Default::default()
        }
    }

    pub fn open() -> Self {
        Self {
            phase: Some(ConnectionPhase::Open),
            ..Default::default()
        }
    }

    pub fn closed(cause: CloseCause) -> Self {
        Self {
            phase: Some(ConnectionPhase::Close),
            close_cause: Some(cause),
            ..Default::default()
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        self.close_cause.as_ref().and_then(|cause| cause.status_code)
    }
}

/// Why a session closed, as reported by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseCause {
    pub status_code: Option<u16>,
    pub message: String,
}

impl CloseCause {
    pub fn new<S: Into<String>>(status_code: Option<u16>, message: S) -> Self {
        Self {
            status_code,
            message: message.into(),
        }
    }

    pub fn from_reason(reason: DisconnectReason) -> Self {
        Self::new(Some(reason.status_code()), reason.description())
    }

    /// Cause used when a session stream ends without a close update
    pub fn stream_ended() -> Self {
        Self::new(None, "session event stream ended")
    }

    pub fn reason(&self) -> Option<DisconnectReason> {
        self.status_code.and_then(DisconnectReason::from_status_code)
    }

    pub fn is_logged_out(&self) -> bool {
        matches!(self.reason(), Some(DisconnectReason::LoggedOut))
    }
}

/// Closure status codes the remote service is known to send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ConnectionClosed,
    ConnectionLost,
    ConnectionReplaced,
    LoggedOut,
    BadSession,
    RestartRequired,
    MultideviceMismatch,
    Forbidden,
    UnavailableService,
}

impl DisconnectReason {
    pub fn from_status_code(code: u16) -> Option<Self> {
        match code {
            428 => Some(Self::ConnectionClosed),
            408 => Some(Self::ConnectionLost),
            440 => Some(Self::ConnectionReplaced),
            401 => Some(Self::LoggedOut),
            500 => Some(Self::BadSession),
            515 => Some(Self::RestartRequired),
            411 => Some(Self::MultideviceMismatch),
            403 => Some(Self::Forbidden),
            503 => Some(Self::UnavailableService),
            _ => None,
        }
    }

    pub fn status_code(self) -> u16 {
        match self {
            Self::ConnectionClosed => 428,
            Self::ConnectionLost => 408,
            Self::ConnectionReplaced => 440,
            Self::LoggedOut => 401,
            Self::BadSession => 500,
            Self::RestartRequired => 515,
            Self::MultideviceMismatch => 411,
            Self::Forbidden => 403,
            Self::UnavailableService => 503,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::ConnectionClosed => "connection closed",
            Self::ConnectionLost => "connection lost",
            Self::ConnectionReplaced => "connection replaced by another session",
            Self::LoggedOut => "logged out",
            Self::BadSession => "bad session",
            Self::RestartRequired => "restart required",
            Self::MultideviceMismatch => "multi-device mismatch",
            Self::Forbidden => "forbidden",
            Self::UnavailableService => "service unavailable",
        }
    }
}

/// Delivery class of a `messages.upsert` batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertKind {
    /// New live messages
    Notify,
    /// History backfill or replay
    Append,
}

/// Message forwarded to the caller without decoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub remote_jid: Option<String>,
    /// Raw message as the session layer produced it
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageBatch {
    pub kind: UpsertKind,
    pub messages: Vec<MessageEnvelope>,
}

impl MessageBatch {
    pub fn notify(messages: Vec<MessageEnvelope>) -> Self {
        Self {
            kind: UpsertKind::Notify,
            messages,
        }
    }

    pub fn append(messages: Vec<MessageEnvelope>) -> Self {
        Self {
            kind: UpsertKind::Append,
            messages,
        }
    }
}
