//! Supervisor loop
//!
//! One task owns the attempt slot, the shared event channel and the live
//! [`AttemptContext`]. Each attempt's event stream is forwarded into the shared
//! channel tagged with its [`AttemptId`]; the loop drops anything not tagged
//! with the live id, so a retired session can never save credentials, request
//! a pairing code or schedule a reconnect.

use super::attempt::{AttemptId, AttemptSlot};
use super::pairing::PairingController;
use super::reconnect::{ClosureKind, ConnectionState, ReconnectPolicy, RetryDecision};
use super::router::{EventRouter, Routed};
use super::SupervisorExit;
use crate::config::ConnectionConfig;
use crate::credentials::{CredentialStore, Credentials};
use crate::error::{sanitize_error_message, SessionError, SessionResult};
use crate::hooks::{DisconnectKind, Hooks};
use crate::observability::SessionMetrics;
use crate::transport::{
    CloseCause, ConnectionUpdate, EventStream, Session, SessionEvent, SessionFactory,
    SessionOptions,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Everything owned by one attempt. Dropped (and its tasks aborted) on discard.
pub struct AttemptContext<S: Session> {
    pub id: AttemptId,
    pub session: Arc<S>,
    /// Supervisor's view of the credentials, updated after every save
    pub credentials: Credentials,
    pub pairing: PairingController,
    forwarder: JoinHandle<()>,
    span: tracing::Span,
}

struct TaggedEvent {
    attempt: AttemptId,
    event: SessionEvent,
}

enum AttemptOutcome {
    Closed(CloseCause),
    Failed(SessionError),
    Shutdown,
}

pub struct Runner<F: SessionFactory, C: CredentialStore> {
    factory: Arc<F>,
    store: Arc<C>,
    config: ConnectionConfig,
    router: EventRouter<C>,
    slot: AttemptSlot,
    events_tx: mpsc::Sender<TaggedEvent>,
    events_rx: mpsc::Receiver<TaggedEvent>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_rx: watch::Receiver<bool>,
    metrics: Arc<SessionMetrics>,
    consecutive_retries: u32,
}

impl<F: SessionFactory, C: CredentialStore> Runner<F, C> {
    pub fn new(
        factory: Arc<F>,
        store: Arc<C>,
        config: ConnectionConfig,
        state_tx: watch::Sender<ConnectionState>,
        shutdown_rx: watch::Receiver<bool>,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let router = EventRouter::new(
            store.clone(),
            config.auth_dir.clone(),
            config.hooks.clone(),
            metrics.clone(),
        );

        Self {
            factory,
            store,
            config,
            router,
            slot: AttemptSlot::new(),
            events_tx,
            events_rx,
            state_tx,
            shutdown_rx,
            metrics,
            consecutive_retries: 0,
        }
    }

    pub fn hooks(&self) -> &Hooks {
        self.router.hooks()
    }

    /// Begin a new attempt: load credentials, open a session, check pairing.
    ///
    /// On error the attempt id is retired and nothing from it stays running.
    pub async fn start_attempt(&mut self) -> SessionResult<AttemptContext<F::Session>> {
        let id = self.slot.begin();
        self.metrics.record_attempt_started();
        self.transition(ConnectionState::Connecting(id));

        let span = crate::attempt_span!(attempt = %id);
        let opened = self.open_attempt(id, span.clone()).instrument(span).await;
        if opened.is_err() {
            self.slot.retire(id);
        }
        opened
    }

    async fn open_attempt(
        &self,
        id: AttemptId,
        span: tracing::Span,
    ) -> SessionResult<AttemptContext<F::Session>> {
        let credentials = self.store.load(&self.config.auth_dir).await?;
        info!(
            registered = credentials.registered,
            has_pairing_code = credentials.pairing_code.is_some(),
            store = self.store.name(),
            "Loaded credentials"
        );

        let version = match self.config.protocol_version {
            Some(version) => version,
            None => self.factory.latest_version().await?,
        };
        version.validate()?;
        info!(version = %version, "Opening session");

        let (session, stream) = self
            .factory
            .open_session(SessionOptions {
                attempt: id,
                version,
                credentials: credentials.clone(),
                span: span.clone(),
            })
            .await?;
        let session = Arc::new(session);
        let forwarder = spawn_forwarder(id, stream, self.events_tx.clone());

        let mut pairing = PairingController::new(
            id,
            self.config.phone_number.clone(),
            self.metrics.clone(),
        );
        let action = pairing.evaluate(&credentials, &session, self.hooks());
        debug!(?action, "Startup pairing check");

        Ok(AttemptContext {
            id,
            session,
            credentials,
            pairing,
            forwarder,
            span,
        })
    }

    /// Retire an attempt and release everything it owns
    pub async fn discard(&mut self, mut attempt: AttemptContext<F::Session>) {
        self.slot.retire(attempt.id);
        attempt.forwarder.abort();
        attempt.pairing.abort();
        attempt
            .session
            .close()
            .instrument(attempt.span.clone())
            .await;
        debug!(attempt = %attempt.id, "Attempt discarded");
    }

    pub fn fail(&self, error: &SessionError) {
        self.transition(ConnectionState::Failed(sanitize_error_message(
            &error.to_string(),
        )));
    }

    fn transition(&self, next: ConnectionState) {
        let previous = self.state_tx.borrow().clone();
        ConnectionState::log_transition(&previous, &next);
        self.state_tx.send_replace(next);
    }

    /// Supervise attempts until logout, a fatal error or shutdown
    pub async fn run(
        mut self,
        first: AttemptContext<F::Session>,
    ) -> SessionResult<SupervisorExit> {
        let mut attempt = first;

        loop {
            let outcome = self.drive(&mut attempt).await;
            let registered = attempt.credentials.registered;
            let closed = attempt.id;
            let outcome = match outcome {
                AttemptOutcome::Closed(cause) => match self.drain_closing(&mut attempt).await {
                    Ok(()) => AttemptOutcome::Closed(cause),
                    Err(e) => AttemptOutcome::Failed(e),
                },
                other => other,
            };
            self.discard(attempt).await;

            let cause = match outcome {
                AttemptOutcome::Shutdown => {
                    self.transition(ConnectionState::Stopped);
                    return Ok(SupervisorExit::Stopped);
                }
                AttemptOutcome::Failed(e) => {
                    self.fail(&e);
                    return Err(e);
                }
                AttemptOutcome::Closed(cause) => cause,
            };

            self.transition(ConnectionState::Closed(closed));
            let (kind, decision) = ReconnectPolicy::on_close(
                &cause,
                registered,
                self.consecutive_retries,
                &self.config.reconnect,
            );
            match kind {
                ClosureKind::AwaitingPairing => {
                    info!(attempt = %closed, "Waiting for the pairing code to be entered")
                }
                ClosureKind::LoggedOut => warn!(attempt = %closed, "Logged out by the server"),
                ClosureKind::Transient => warn!(
                    attempt = %closed,
                    status_code = ?cause.status_code,
                    "Connection closed: {}",
                    sanitize_error_message(&cause.message)
                ),
            }

            match decision {
                RetryDecision::RetryAfter(delay) => {
                    self.consecutive_retries += 1;
                    self.metrics.record_reconnect_scheduled();
                    self.transition(ConnectionState::WaitingToReconnect {
                        next_attempt: self.slot.attempts_started() + 1,
                        delay,
                    });

                    if !interruptible_sleep(self.shutdown_rx.clone(), delay).await {
                        self.transition(ConnectionState::Stopped);
                        return Ok(SupervisorExit::Stopped);
                    }

                    attempt = match self.start_attempt().await {
                        Ok(next) => next,
                        Err(e) => {
                            self.fail(&e);
                            return Err(e);
                        }
                    };
                }
                RetryDecision::TerminalLoggedOut => {
                    self.hooks().emit_disconnected(DisconnectKind::LoggedOut);
                    self.transition(ConnectionState::LoggedOut);
                    return Ok(SupervisorExit::LoggedOut);
                }
                RetryDecision::TerminalOther => {
                    self.hooks().emit_disconnected(DisconnectKind::RetriesExhausted);
                    self.transition(ConnectionState::Failed(
                        "reconnection attempts exhausted".to_string(),
                    ));
                    return Ok(SupervisorExit::RetriesExhausted);
                }
            }
        }
    }

    /// Persist credential updates the closed session queued behind its close.
    /// Only events already buffered are handled.
    async fn drain_closing(
        &mut self,
        attempt: &mut AttemptContext<F::Session>,
    ) -> SessionResult<()> {
        while let Ok(TaggedEvent { attempt: source, event }) = self.events_rx.try_recv() {
            if source != attempt.id {
                self.metrics.record_stale_event();
                continue;
            }
            match event {
                SessionEvent::CredentialsUpdate(update) => {
                    let span = attempt.span.clone();
                    self.router
                        .route(attempt, SessionEvent::CredentialsUpdate(update))
                        .instrument(span)
                        .await?;
                }
                other => debug!(event = other.name(), "Ignoring event after close"),
            }
        }
        Ok(())
    }

    /// Handle events for the live attempt until it closes or fails
    async fn drive(&mut self, attempt: &mut AttemptContext<F::Session>) -> AttemptOutcome {
        if *self.shutdown_rx.borrow() {
            return AttemptOutcome::Shutdown;
        }

        loop {
            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!(attempt = %attempt.id, "Shutdown requested");
                        return AttemptOutcome::Shutdown;
                    }
                }
                result = attempt.pairing.wait_outstanding() => {
                    let hooks = self.router.hooks();
                    let pairing = &mut attempt.pairing;
                    attempt.span.in_scope(|| {
                        if let Err(e) = pairing.complete(result, hooks) {
                            hooks.emit_error(&SessionError::from(e));
                        }
                    });
                }
                received = self.events_rx.recv() => {
                    let Some(TaggedEvent { attempt: source, event }) = received else {
                        return AttemptOutcome::Shutdown;
                    };

                    if !self.slot.accepts(source) {
                        self.metrics.record_stale_event();
                        debug!(
                            source = %source,
                            live = %attempt.id,
                            event = event.name(),
                            "Ignoring event from retired attempt"
                        );
                        continue;
                    }

                    let span = attempt.span.clone();
                    match self.router.route(attempt, event).instrument(span).await {
                        Ok(Routed::Continue) => {}
                        Ok(Routed::Opened) => {
                            self.consecutive_retries = 0;
                            self.transition(ConnectionState::Open(attempt.id));
                        }
                        Ok(Routed::Closed(cause)) => return AttemptOutcome::Closed(cause),
                        Err(e) => return AttemptOutcome::Failed(e),
                    }
                }
            }
        }
    }
}

fn spawn_forwarder(
    attempt: AttemptId,
    mut stream: EventStream,
    events_tx: mpsc::Sender<TaggedEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = stream.recv().await {
            if events_tx.send(TaggedEvent { attempt, event }).await.is_err() {
                return;
            }
        }

        debug!(attempt = %attempt, "Session event stream ended");
        let _ = events_tx
            .send(TaggedEvent {
                attempt,
                event: SessionEvent::ConnectionUpdate(ConnectionUpdate::closed(
                    CloseCause::stream_ended(),
                )),
            })
            .await;
    })
}

/// Sleep for `delay` unless shutdown is requested first.
///
/// Returns true if the sleep completed, false on shutdown.
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay: Duration) -> bool {
    if *shutdown_rx.borrow() {
        return false;
    }

    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Shutdown requested during reconnect delay");
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryCredentialStore, MockSessionFactory};

    const AUTH_DIR: &str = "runner_auth";

    type TestRunner = Runner<MockSessionFactory, MemoryCredentialStore>;

    fn runner(
        factory: &MockSessionFactory,
        store: &MemoryCredentialStore,
    ) -> (TestRunner, watch::Sender<bool>, Arc<SessionMetrics>) {
        let config = ConnectionConfig::new("15551234567")
            .with_auth_dir(AUTH_DIR)
            .validated()
            .unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let metrics = Arc::new(SessionMetrics::new());
        let runner = Runner::new(
            Arc::new(factory.clone()),
            Arc::new(store.clone()),
            config,
            state_tx,
            shutdown_rx,
            metrics.clone(),
        );
        (runner, shutdown_tx, metrics)
    }

    fn closed(status_code: u16, message: &str) -> SessionEvent {
        SessionEvent::ConnectionUpdate(ConnectionUpdate::closed(CloseCause::new(
            Some(status_code),
            message,
        )))
    }

    #[tokio::test]
    async fn test_events_from_retired_attempt_are_dropped() {
        let factory = MockSessionFactory::new();
        let store = MemoryCredentialStore::new().with_credentials(
            AUTH_DIR,
            Credentials {
                registered: true,
                ..Default::default()
            },
        );
        let (mut runner, _shutdown_tx, metrics) = runner(&factory, &store);

        let first = runner.start_attempt().await.unwrap();
        let retired = first.id;
        runner.discard(first).await;
        let mut live = runner.start_attempt().await.unwrap();
        assert!(live.id > retired);

        // Queue stale events ahead of the live closure
        let events_tx = runner.events_tx.clone();
        for event in [
            SessionEvent::CredentialsUpdate(Credentials::fresh()),
            closed(401, "stale"),
        ] {
            events_tx
                .send(TaggedEvent {
                    attempt: retired,
                    event,
                })
                .await
                .unwrap();
        }
        events_tx
            .send(TaggedEvent {
                attempt: live.id,
                event: closed(500, "live"),
            })
            .await
            .unwrap();

        match runner.drive(&mut live).await {
            AttemptOutcome::Closed(cause) => assert_eq!(cause.status_code, Some(500)),
            _ => panic!("expected the live attempt to close"),
        }
        assert_eq!(metrics.snapshot().stale_events_ignored, 2);
        assert!(store.saved().is_empty());
        runner.discard(live).await;
        assert!(factory.session(2).unwrap().is_closed());
    }

    #[tokio::test]
    async fn test_credentials_queued_behind_close_are_saved() {
        let factory = MockSessionFactory::new();
        let store = MemoryCredentialStore::new().with_credentials(
            AUTH_DIR,
            Credentials {
                registered: true,
                ..Default::default()
            },
        );
        let (mut runner, _shutdown_tx, _) = runner(&factory, &store);
        let mut live = runner.start_attempt().await.unwrap();

        let late = Credentials {
            me: Some("15551234567@s.whatsapp.net".to_string()),
            ..Default::default()
        };
        let events_tx = runner.events_tx.clone();
        for event in [
            closed(500, "live"),
            SessionEvent::CredentialsUpdate(late),
            SessionEvent::ConnectionUpdate(ConnectionUpdate::connecting()),
        ] {
            events_tx
                .send(TaggedEvent {
                    attempt: live.id,
                    event,
                })
                .await
                .unwrap();
        }

        assert!(matches!(
            runner.drive(&mut live).await,
            AttemptOutcome::Closed(_)
        ));
        assert!(store.saved().is_empty());

        runner.drain_closing(&mut live).await.unwrap();
        let saved = store.saved();
        assert_eq!(saved.len(), 1);
        assert!(saved[0].registered);
        assert_eq!(saved[0].me.as_deref(), Some("15551234567@s.whatsapp.net"));
        assert!(runner.events_rx.try_recv().is_err());
        runner.discard(live).await;
    }

    #[tokio::test]
    async fn test_failed_start_retires_the_attempt() {
        let factory = MockSessionFactory::new();
        factory.fail_next_open("refused");
        let store = MemoryCredentialStore::new();
        let (mut runner, _shutdown_tx, _) = runner(&factory, &store);

        assert!(runner.start_attempt().await.is_err());
        assert_eq!(runner.slot.live(), None);
        assert_eq!(runner.slot.attempts_started(), 1);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        let (_tx, rx) = watch::channel(false);
        assert!(interruptible_sleep(rx, Duration::from_millis(5)).await);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_stops_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let sleeper = tokio::spawn(interruptible_sleep(rx, Duration::from_secs(30)));
        tx.send(true).unwrap();
        let completed = tokio::time::timeout(Duration::from_secs(1), sleeper)
            .await
            .unwrap()
            .unwrap();
        assert!(!completed);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_stops_when_sender_dropped() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        assert!(!interruptible_sleep(rx, Duration::from_secs(30)).await);
    }

    #[tokio::test]
    async fn test_forwarder_tags_events_and_reports_stream_end() {
        let (session_tx, stream) = mpsc::channel(4);
        let (events_tx, mut events_rx) = mpsc::channel(4);
        let id = AttemptId::new(7);

        let forwarder = spawn_forwarder(id, stream, events_tx);
        session_tx
            .send(SessionEvent::ConnectionUpdate(ConnectionUpdate::connecting()))
            .await
            .unwrap();
        drop(session_tx);

        let first = events_rx.recv().await.unwrap();
        assert_eq!(first.attempt, id);
        assert_eq!(first.event.name(), "connection.update");

        let last = events_rx.recv().await.unwrap();
        assert_eq!(last.attempt, id);
        match last.event {
            SessionEvent::ConnectionUpdate(update) => {
                assert_eq!(update.close_cause, Some(CloseCause::stream_ended()));
            }
            other => panic!("unexpected event {other:?}"),
        }
        forwarder.await.unwrap();
    }
}
