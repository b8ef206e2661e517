//! Reconnection supervisor
//!
//! [`Supervisor::connect`] runs the first attempt inline so storage, version
//! and first pairing-request failures reach the caller directly. Everything
//! after that happens on a background task driven through the returned
//! [`SupervisorHandle`].
//!
//! ```no_run
//! use pairlink::config::ConnectionConfig;
//! use pairlink::credentials::JsonFileStore;
//! use pairlink::hooks::Hooks;
//! use pairlink::supervisor::Supervisor;
//! use pairlink::transport::{Scenario, ScriptedSessionFactory};
//!
//! # async fn demo() -> pairlink::error::SessionResult<()> {
//! let hooks = Hooks::new().on_pairing_code(|code| println!("Pairing code: {code}"));
//! let config = ConnectionConfig::new("15551234567").with_hooks(hooks);
//!
//! let supervisor = Supervisor::new(
//!     ScriptedSessionFactory::new(Scenario::demo()),
//!     JsonFileStore::new(),
//! );
//! let mut handle = supervisor.connect(config).await?;
//! let exit = handle.wait().await?;
//! println!("Supervisor finished: {exit:?}");
//! # Ok(())
//! # }
//! ```

pub mod attempt;
pub mod pairing;
pub mod reconnect;
mod router;
mod runner;

pub use attempt::{AttemptId, AttemptSlot, ConnectedSession};
pub use pairing::{PairingAction, PairingController};
pub use reconnect::{classify_closure, ClosureKind, ConnectionState, ReconnectPolicy, RetryDecision};

use crate::config::ConnectionConfig;
use crate::credentials::CredentialStore;
use crate::error::{ConnectionError, SessionError, SessionResult};
use crate::observability::{MetricsSnapshot, SessionMetrics};
use crate::transport::SessionFactory;
use runner::Runner;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Why a supervisor stopped without error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorExit {
    /// The server revoked a registered session
    LoggedOut,
    /// The configured reconnect ceiling was reached
    RetriesExhausted,
    /// Shutdown was requested through the handle
    Stopped,
}

/// Connects sessions from `F` using credentials kept in `C`
pub struct Supervisor<F, C> {
    factory: Arc<F>,
    store: Arc<C>,
}

impl<F: SessionFactory, C: CredentialStore> Supervisor<F, C> {
    pub fn new(factory: F, store: C) -> Self {
        Self::from_shared(Arc::new(factory), Arc::new(store))
    }

    /// Build from collaborators that are shared with other owners
    pub fn from_shared(factory: Arc<F>, store: Arc<C>) -> Self {
        Self { factory, store }
    }

    /// Start supervising a session for `config.phone_number`.
    ///
    /// Returns once the first attempt is open for events and, if a pairing
    /// code had to be requested, that request has completed. Errors from the
    /// first attempt are returned here; later ones end the background task.
    pub async fn connect(&self, config: ConnectionConfig) -> SessionResult<SupervisorHandle> {
        let config = config.validated()?;
        info!(
            auth_dir = %config.auth_dir.display(),
            pairing_retry_ms = config.reconnect.pairing_retry_ms,
            transient_retry_ms = config.reconnect.transient_retry_ms,
            max_retries = ?config.reconnect.max_retries,
            "Starting session supervisor"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let metrics = Arc::new(SessionMetrics::new());

        let mut runner = Runner::new(
            self.factory.clone(),
            self.store.clone(),
            config,
            state_tx,
            shutdown_rx,
            metrics.clone(),
        );

        let mut first = match runner.start_attempt().await {
            Ok(first) => first,
            Err(e) => {
                runner.fail(&e);
                return Err(e);
            }
        };

        if first.pairing.is_outstanding() {
            let result = first.pairing.wait_outstanding().await;
            if let Err(e) = first.pairing.complete(result, runner.hooks()) {
                runner.discard(first).await;
                let error = SessionError::from(e);
                runner.fail(&error);
                return Err(error);
            }
        }

        let first_attempt = first.id;
        let task = tokio::spawn(runner.run(first));

        Ok(SupervisorHandle {
            shutdown_tx,
            state_rx,
            metrics,
            task: Some(task),
            first_attempt,
        })
    }
}

/// Control surface for a running supervisor.
///
/// Dropping the handle stops the supervisor the same way [`shutdown`] does.
///
/// [`shutdown`]: SupervisorHandle::shutdown
pub struct SupervisorHandle {
    shutdown_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<ConnectionState>,
    metrics: Arc<SessionMetrics>,
    task: Option<JoinHandle<SessionResult<SupervisorExit>>>,
    first_attempt: AttemptId,
}

impl SupervisorHandle {
    pub fn first_attempt(&self) -> AttemptId {
        self.first_attempt
    }

    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Receiver that observes every published state
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Wait until the published state satisfies `predicate`.
    ///
    /// Returns `None` if the supervisor finished without reaching it.
    pub async fn wait_for_state<P>(&self, mut predicate: P) -> Option<ConnectionState>
    where
        P: FnMut(&ConnectionState) -> bool,
    {
        let mut rx = self.state_rx.clone();
        let state = rx.wait_for(|state| predicate(state)).await.ok()?;
        Some(state.clone())
    }

    pub fn stats(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }

    /// Ask the supervisor to stop. Pending reconnect delays are cut short.
    pub fn shutdown(&self) {
        if self.shutdown_tx.send(true).is_ok() {
            info!("Shutdown signal sent to session supervisor");
        }
    }

    /// Wait for the supervisor to finish.
    ///
    /// Cancel safe; the outcome is handed out once.
    pub async fn wait(&mut self) -> SessionResult<SupervisorExit> {
        let Some(task) = self.task.as_mut() else {
            return Err(ConnectionError::Aborted("outcome already taken".to_string()).into());
        };

        let joined = task.await;
        self.task = None;
        match joined {
            Ok(result) => result,
            Err(e) => Err(ConnectionError::Aborted(e.to_string()).into()),
        }
    }

    /// Request shutdown and wait for the supervisor to finish
    pub async fn shutdown_and_wait(&mut self) -> SessionResult<SupervisorExit> {
        self.shutdown();
        self.wait().await
    }
}
