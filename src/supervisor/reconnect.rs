//! Pure closure classification and reconnection decisions
//!
//! Nothing here performs I/O: the supervisor loop feeds in the close cause,
//! the registered flag and the retry count, and acts on the returned
//! [`RetryDecision`].

use super::attempt::AttemptId;
use crate::config::ReconnectConfig;
use crate::transport::CloseCause;
use std::time::Duration;
use tracing::{error, info, warn};

/// Classified meaning of a closure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosureKind {
    /// Logged-out status while unregistered: the code has not been entered yet
    AwaitingPairing,
    /// Logged-out status on a registered session: authorisation was revoked
    LoggedOut,
    /// Anything else (network error, server reset, replaced connection)
    Transient,
}

/// What to do after a closure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    TerminalLoggedOut,
    TerminalOther,
}

/// Classify a closure from its cause and the registered flag
pub fn classify_closure(cause: &CloseCause, registered: bool) -> ClosureKind {
    match (cause.is_logged_out(), registered) {
        (true, false) => ClosureKind::AwaitingPairing,
        (true, true) => ClosureKind::LoggedOut,
        (false, _) => ClosureKind::Transient,
    }
}

/// Reconnection policy over [`ReconnectConfig`]
pub struct ReconnectPolicy;

impl ReconnectPolicy {
    /// Decide the follow-up for a classified closure.
    ///
    /// `retries_so_far` counts consecutive retries since the last open.
    pub fn decide(
        kind: ClosureKind,
        retries_so_far: u32,
        config: &ReconnectConfig,
    ) -> RetryDecision {
        if kind == ClosureKind::LoggedOut {
            return RetryDecision::TerminalLoggedOut;
        }

        if let Some(max_retries) = config.max_retries {
            if retries_so_far >= max_retries {
                return RetryDecision::TerminalOther;
            }
        }

        match kind {
            ClosureKind::AwaitingPairing => RetryDecision::RetryAfter(config.pairing_retry()),
            _ => RetryDecision::RetryAfter(config.transient_retry()),
        }
    }

    /// Classify and decide in one step
    pub fn on_close(
        cause: &CloseCause,
        registered: bool,
        retries_so_far: u32,
        config: &ReconnectConfig,
    ) -> (ClosureKind, RetryDecision) {
        let kind = classify_closure(cause, registered);
        (kind, Self::decide(kind, retries_so_far, config))
    }
}

/// Supervisor-level connection state published to the caller
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Idle,
    Connecting(AttemptId),
    Open(AttemptId),
    Closed(AttemptId),
    WaitingToReconnect {
        next_attempt: u64,
        delay: Duration,
    },
    LoggedOut,
    Failed(String),
    Stopped,
}

impl ConnectionState {
    /// No further attempts will be made from this state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::LoggedOut | ConnectionState::Failed(_) | ConnectionState::Stopped
        )
    }

    /// Log a state transition at a level that matches its severity
    pub fn log_transition(from: &ConnectionState, to: &ConnectionState) {
        match (from, to) {
            (ConnectionState::Connecting(_), ConnectionState::Open(attempt)) => {
                info!(attempt = %attempt, "Session open");
            }
            (ConnectionState::Open(_), ConnectionState::Closed(attempt)) => {
                warn!(attempt = %attempt, "Open session closed");
            }
            (_, ConnectionState::WaitingToReconnect { next_attempt, delay }) => {
                info!(
                    next_attempt = next_attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnection scheduled"
                );
            }
            (_, ConnectionState::LoggedOut) => {
                warn!("Session logged out, no further reconnection attempts");
            }
            (_, ConnectionState::Failed(reason)) => {
                error!("Supervisor stopped after failure: {}", reason);
            }
            _ => {
                info!("Connection state: {:?} -> {:?}", from, to);
            }
        }
    }
}
