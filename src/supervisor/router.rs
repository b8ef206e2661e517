//! Event router for one live attempt
//!
//! Credential updates are persisted before anything else sees them, connection
//! updates go to the pairing controller before the reconnection decision, and
//! only live (`notify`) message batches reach `on_message`.

use super::attempt::ConnectedSession;
use super::runner::AttemptContext;
use crate::credentials::{CredentialStore, Credentials};
use crate::error::SessionResult;
use crate::hooks::Hooks;
use crate::observability::SessionMetrics;
use crate::transport::{
    CloseCause, ConnectionPhase, ConnectionUpdate, MessageBatch, Session, SessionEvent, UpsertKind,
};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// What the supervisor loop must do after an event was routed
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    Continue,
    Opened,
    Closed(CloseCause),
}

pub struct EventRouter<C> {
    store: Arc<C>,
    auth_dir: PathBuf,
    hooks: Hooks,
    metrics: Arc<SessionMetrics>,
}

impl<C: CredentialStore> EventRouter<C> {
    pub fn new(store: Arc<C>, auth_dir: PathBuf, hooks: Hooks, metrics: Arc<SessionMetrics>) -> Self {
        Self {
            store,
            auth_dir,
            hooks,
            metrics,
        }
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Handle one event from the live attempt
    pub async fn route<S: Session>(
        &self,
        attempt: &mut AttemptContext<S>,
        event: SessionEvent,
    ) -> SessionResult<Routed> {
        match event {
            SessionEvent::CredentialsUpdate(update) => {
                self.persist(attempt, update).await?;
                Ok(Routed::Continue)
            }
            SessionEvent::ConnectionUpdate(update) => Ok(self.connection_update(attempt, update)),
            SessionEvent::MessagesUpsert(batch) => {
                self.deliver_messages(batch);
                Ok(Routed::Continue)
            }
        }
    }

    async fn persist<S: Session>(
        &self,
        attempt: &mut AttemptContext<S>,
        update: Credentials,
    ) -> SessionResult<()> {
        let merged = attempt.credentials.absorb(update);
        self.store.save(&self.auth_dir, &merged).await?;
        self.metrics.record_credential_save();

        if merged.registered && !attempt.credentials.registered {
            info!("Credentials now registered");
        }
        attempt.credentials = merged;
        Ok(())
    }

    fn connection_update<S: Session>(
        &self,
        attempt: &mut AttemptContext<S>,
        update: ConnectionUpdate,
    ) -> Routed {
        info!(
            phase = ?update.phase,
            status_code = ?update.status_code(),
            registered = attempt.credentials.registered,
            "Connection update"
        );

        let action = attempt
            .pairing
            .evaluate(&attempt.credentials, &attempt.session, &self.hooks);
        debug!(?action, "Pairing evaluation");

        match update.phase {
            Some(ConnectionPhase::Open) => {
                let connected = ConnectedSession {
                    attempt: attempt.id,
                    user: attempt.credentials.me.clone(),
                    connected_at: Utc::now(),
                };
                info!(user = ?connected.user, "Connected");
                self.hooks.emit_connected(&connected);
                Routed::Opened
            }
            Some(ConnectionPhase::Close) => Routed::Closed(
                update
                    .close_cause
                    .unwrap_or_else(|| CloseCause::new(None, "closed without a cause")),
            ),
            Some(ConnectionPhase::Connecting) | None => Routed::Continue,
        }
    }

    fn deliver_messages(&self, batch: MessageBatch) {
        if batch.kind != UpsertKind::Notify {
            debug!(
                kind = ?batch.kind,
                count = batch.messages.len(),
                "Skipping non-live message batch"
            );
            self.metrics.record_messages_skipped(batch.messages.len());
            return;
        }

        for message in &batch.messages {
            self.hooks.emit_message(message);
            self.metrics.record_message_delivered();
        }
    }
}
