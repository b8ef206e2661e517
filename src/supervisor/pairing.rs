//! Pairing controller
//!
//! Decides, for one attempt, whether a pairing code must be requested or an
//! already issued one re-announced. The outstanding request is tracked as a
//! task handle so repeated connection updates cannot trigger a second request
//! while the first is still in flight, even if the stored credentials have not
//! caught up with the new code yet.

use super::attempt::AttemptId;
use crate::credentials::{Credentials, PairingStatus};
use crate::error::PairingError;
use crate::hooks::Hooks;
use crate::observability::SessionMetrics;
use crate::transport::Session;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, Instrument};

/// What one evaluation did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingAction {
    /// Registered; nothing to do
    Inert,
    /// A new pairing code request was issued
    Requested,
    /// A stored code was handed to `on_pairing_code` without a network call
    Redelivered(String),
    /// The stored code was already delivered during this attempt
    AlreadyDelivered,
    /// A request from this attempt is still in flight
    AwaitingOutstanding,
    /// This attempt already used its one request
    AlreadyRequested,
}

pub struct PairingController {
    attempt: AttemptId,
    phone_number: String,
    metrics: Arc<SessionMetrics>,
    issued: bool,
    outstanding: Option<JoinHandle<Result<String, PairingError>>>,
    delivered: Option<String>,
}

impl PairingController {
    /// Controller for a fresh attempt; nothing issued or delivered yet
    pub fn new<S: Into<String>>(
        attempt: AttemptId,
        phone_number: S,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        Self {
            attempt,
            phone_number: phone_number.into(),
            metrics,
            issued: false,
            outstanding: None,
            delivered: None,
        }
    }

    /// Inspect the current credentials and act on them
    pub fn evaluate<S: Session>(
        &mut self,
        credentials: &Credentials,
        session: &Arc<S>,
        hooks: &Hooks,
    ) -> PairingAction {
        match credentials.pairing_status() {
            PairingStatus::Registered => PairingAction::Inert,
            PairingStatus::CodeIssued(code) => {
                if self.delivered.as_deref() == Some(code) {
                    return PairingAction::AlreadyDelivered;
                }
                // The request in flight will deliver whatever code it returns
                if self.outstanding.is_some() {
                    debug!("Pairing code stored while the request is still outstanding");
                    return PairingAction::AwaitingOutstanding;
                }
                info!("Pairing code already generated, waiting for it to be entered on the phone");
                self.deliver(code, hooks);
                PairingAction::Redelivered(code.to_string())
            }
            PairingStatus::Unpaired => {
                if self.outstanding.is_some() {
                    debug!("Pairing code request still outstanding");
                    return PairingAction::AwaitingOutstanding;
                }
                if self.issued {
                    return PairingAction::AlreadyRequested;
                }
                self.issue(session);
                PairingAction::Requested
            }
        }
    }

    fn issue<S: Session>(&mut self, session: &Arc<S>) {
        info!("Requesting pairing code");
        self.issued = true;
        self.metrics.record_pairing_request();

        let session = Arc::clone(session);
        let phone_number = self.phone_number.clone();
        let span = crate::pairing_span!(attempt = %self.attempt);
        self.outstanding = Some(tokio::spawn(
            async move { session.request_pairing_code(&phone_number).await }.instrument(span),
        ));
    }

    fn deliver(&mut self, code: &str, hooks: &Hooks) {
        hooks.emit_pairing_code(code);
        self.metrics.record_pairing_code_delivered();
        self.delivered = Some(code.to_string());
    }

    pub fn is_outstanding(&self) -> bool {
        self.outstanding.is_some()
    }

    /// Wait for the outstanding request. Never resolves when none is in flight.
    ///
    /// Cancel safe: dropping the future leaves the request outstanding.
    pub async fn wait_outstanding(&mut self) -> Result<String, PairingError> {
        let Some(handle) = self.outstanding.as_mut() else {
            return std::future::pending().await;
        };
        let joined = handle.await;
        self.outstanding = None;
        match joined {
            Ok(result) => result,
            Err(e) => Err(PairingError::Interrupted(e.to_string())),
        }
    }

    /// Apply the result of a finished request
    pub fn complete(
        &mut self,
        result: Result<String, PairingError>,
        hooks: &Hooks,
    ) -> Result<String, PairingError> {
        match result {
            Ok(code) => {
                if self.delivered.as_deref() == Some(code.as_str()) {
                    debug!("Issued pairing code was already delivered");
                    return Ok(code);
                }
                info!("Pairing code issued, enter it on the phone under Linked Devices");
                self.deliver(&code, hooks);
                Ok(code)
            }
            Err(e) => {
                self.metrics.record_pairing_failure();
                error!(
                    "Error requesting pairing code: {}",
                    crate::error::sanitize_error_message(&e.to_string())
                );
                Err(e)
            }
        }
    }

    /// Drop any in-flight request; used when the attempt is discarded
    pub fn abort(&mut self) {
        if let Some(handle) = self.outstanding.take() {
            handle.abort();
        }
    }
}

impl Drop for PairingController {
    fn drop(&mut self) {
        self.abort();
    }
}
