//! Mock implementations for testing
//!
//! Provides a mock session factory whose sessions are driven by the test, an
//! in-memory credential store and a hook recorder.

use crate::credentials::{CredentialStore, Credentials};
use crate::error::{ConnectionError, PairingError, StorageError};
use crate::hooks::{DisconnectKind, Hooks};
use crate::supervisor::AttemptId;
use crate::transport::{
    CloseCause, ConnectionUpdate, EventStream, MessageBatch, MessageEnvelope, ProtocolVersion,
    Session, SessionEvent, SessionFactory, SessionOptions,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

const POLL_INTERVAL: Duration = Duration::from_millis(5);
const WAIT_TIMEOUT: Duration = Duration::from_secs(2);

pub const MOCK_PAIRING_CODE: &str = "MOCK-CODE";

async fn poll_until<T, F>(mut probe: F) -> Option<T>
where
    F: FnMut() -> Option<T>,
{
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    loop {
        if let Some(found) = probe() {
            return Some(found);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[derive(Debug)]
struct FactoryState {
    latest_version: Mutex<Result<ProtocolVersion, String>>,
    pairing_responses: Mutex<VecDeque<Result<String, PairingError>>>,
    pairing_gate: Mutex<Option<Arc<Notify>>>,
    fail_next_open: Mutex<Option<String>>,
    pairing_requests: AtomicUsize,
    sessions: Mutex<Vec<MockSessionHandle>>,
}

impl Default for FactoryState {
    fn default() -> Self {
        Self {
            latest_version: Mutex::new(Ok(ProtocolVersion([2, 3000, 1015901307]))),
            pairing_responses: Mutex::new(VecDeque::new()),
            pairing_gate: Mutex::new(None),
            fail_next_open: Mutex::new(None),
            pairing_requests: AtomicUsize::new(0),
            sessions: Mutex::new(Vec::new()),
        }
    }
}

impl FactoryState {
    fn next_pairing_response(&self) -> Result<String, PairingError> {
        self.pairing_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(MOCK_PAIRING_CODE.to_string()))
    }
}

/// Session factory whose sessions emit only what the test pushes
#[derive(Debug, Clone, Default)]
pub struct MockSessionFactory {
    state: Arc<FactoryState>,
}

impl MockSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latest_version(self, version: ProtocolVersion) -> Self {
        *self.state.latest_version.lock().unwrap() = Ok(version);
        self
    }

    pub fn with_version_lookup_failure(self, message: impl Into<String>) -> Self {
        *self.state.latest_version.lock().unwrap() = Err(message.into());
        self
    }

    /// Responses handed out to pairing requests in order; `MOCK-CODE` after that
    pub fn queue_pairing_response(&self, response: Result<String, PairingError>) {
        self.state.pairing_responses.lock().unwrap().push_back(response);
    }

    /// Make pairing requests block until the returned notify is signalled once per request
    pub fn hold_pairing(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.state.pairing_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn fail_next_open(&self, message: impl Into<String>) {
        *self.state.fail_next_open.lock().unwrap() = Some(message.into());
    }

    /// Pairing requests across every session this factory opened
    pub fn pairing_requests(&self) -> usize {
        self.state.pairing_requests.load(Ordering::SeqCst)
    }

    pub fn sessions_opened(&self) -> usize {
        self.state.sessions.lock().unwrap().len()
    }

    /// Handle for the `n`th opened session, counting from 1
    pub fn session(&self, n: usize) -> Option<MockSessionHandle> {
        let index = n.checked_sub(1)?;
        self.state.sessions.lock().unwrap().get(index).cloned()
    }

    /// Wait until the `n`th session has been opened
    pub async fn wait_for_session(&self, n: usize) -> Option<MockSessionHandle> {
        poll_until(|| self.session(n)).await
    }
}

#[async_trait]
impl SessionFactory for MockSessionFactory {
    type Session = MockSession;

    async fn latest_version(&self) -> Result<ProtocolVersion, ConnectionError> {
        self.state
            .latest_version
            .lock()
            .unwrap()
            .clone()
            .map_err(ConnectionError::VersionLookup)
    }

    async fn open_session(
        &self,
        options: SessionOptions,
    ) -> Result<(MockSession, EventStream), ConnectionError> {
        if let Some(message) = self.state.fail_next_open.lock().unwrap().take() {
            return Err(ConnectionError::OpenFailed(message));
        }

        let (tx, rx) = mpsc::channel(64);
        let shared = Arc::new(SessionShared {
            sender: Mutex::new(Some(tx)),
            ..Default::default()
        });
        let handle = MockSessionHandle {
            attempt: options.attempt,
            version: options.version,
            credentials: options.credentials,
            shared: shared.clone(),
        };
        self.state.sessions.lock().unwrap().push(handle);

        Ok((
            MockSession {
                factory: self.state.clone(),
                shared,
            },
            rx,
        ))
    }
}

#[derive(Debug, Default)]
struct SessionShared {
    sender: Mutex<Option<mpsc::Sender<SessionEvent>>>,
    phone_numbers: Mutex<Vec<String>>,
    pairing_requests: AtomicUsize,
    closed: AtomicBool,
}

#[derive(Debug)]
pub struct MockSession {
    factory: Arc<FactoryState>,
    shared: Arc<SessionShared>,
}

impl MockSession {
    /// Session outside any factory that answers its pairing request with `response`
    pub fn standalone(response: Result<String, PairingError>) -> Self {
        let factory = FactoryState::default();
        factory.pairing_responses.lock().unwrap().push_back(response);
        Self {
            factory: Arc::new(factory),
            shared: Arc::new(SessionShared::default()),
        }
    }

    pub fn pairing_requests(&self) -> usize {
        self.shared.pairing_requests.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Session for MockSession {
    async fn request_pairing_code(&self, phone_number: &str) -> Result<String, PairingError> {
        self.shared.pairing_requests.fetch_add(1, Ordering::SeqCst);
        self.factory.pairing_requests.fetch_add(1, Ordering::SeqCst);
        self.shared
            .phone_numbers
            .lock()
            .unwrap()
            .push(phone_number.to_string());

        let gate = self.factory.pairing_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.factory.next_pairing_response()
    }

    async fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.sender.lock().unwrap().take();
    }
}

/// Test-side view of one opened session
#[derive(Debug, Clone)]
pub struct MockSessionHandle {
    attempt: AttemptId,
    version: ProtocolVersion,
    credentials: Credentials,
    shared: Arc<SessionShared>,
}

impl MockSessionHandle {
    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Credentials the session was opened with
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Push an event; false once the session was closed by the supervisor
    pub async fn emit(&self, event: SessionEvent) -> bool {
        let sender = self.shared.sender.lock().unwrap().clone();
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    pub async fn connecting(&self) -> bool {
        self.emit(SessionEvent::ConnectionUpdate(ConnectionUpdate::connecting()))
            .await
    }

    pub async fn open(&self) -> bool {
        self.emit(SessionEvent::ConnectionUpdate(ConnectionUpdate::open()))
            .await
    }

    pub async fn close(&self, status_code: u16) -> bool {
        self.close_with(CloseCause::new(
            Some(status_code),
            format!("closed with status {status_code}"),
        ))
        .await
    }

    pub async fn close_with(&self, cause: CloseCause) -> bool {
        self.emit(SessionEvent::ConnectionUpdate(ConnectionUpdate::closed(
            cause,
        )))
        .await
    }

    pub async fn creds(&self, credentials: Credentials) -> bool {
        self.emit(SessionEvent::CredentialsUpdate(credentials)).await
    }

    pub async fn messages(&self, batch: MessageBatch) -> bool {
        self.emit(SessionEvent::MessagesUpsert(batch)).await
    }

    /// Drop the event stream without a close update
    pub fn end_stream(&self) {
        self.shared.sender.lock().unwrap().take();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn pairing_requests(&self) -> usize {
        self.shared.pairing_requests.load(Ordering::SeqCst)
    }

    pub fn phone_numbers(&self) -> Vec<String> {
        self.shared.phone_numbers.lock().unwrap().clone()
    }
}

#[derive(Debug, Default)]
struct StoreState {
    entries: Mutex<HashMap<PathBuf, Credentials>>,
    saved: Mutex<Vec<Credentials>>,
    loads: AtomicUsize,
    fail_next_load: Mutex<Option<String>>,
    fail_next_save: Mutex<Option<String>>,
}

/// Credential store backed by a map, keyed by auth directory
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    state: Arc<StoreState>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(self, auth_dir: impl Into<PathBuf>, credentials: Credentials) -> Self {
        self.state
            .entries
            .lock()
            .unwrap()
            .insert(auth_dir.into(), credentials);
        self
    }

    pub fn stored(&self, auth_dir: &Path) -> Option<Credentials> {
        self.state.entries.lock().unwrap().get(auth_dir).cloned()
    }

    /// Every successful save in order
    pub fn saved(&self) -> Vec<Credentials> {
        self.state.saved.lock().unwrap().clone()
    }

    pub fn load_count(&self) -> usize {
        self.state.loads.load(Ordering::SeqCst)
    }

    pub fn fail_next_load(&self, message: impl Into<String>) {
        *self.state.fail_next_load.lock().unwrap() = Some(message.into());
    }

    pub fn fail_next_save(&self, message: impl Into<String>) {
        *self.state.fail_next_save.lock().unwrap() = Some(message.into());
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self, auth_dir: &Path) -> Result<Credentials, StorageError> {
        self.state.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.state.fail_next_load.lock().unwrap().take() {
            return Err(StorageError::Backend { message });
        }
        Ok(self.stored(auth_dir).unwrap_or_default())
    }

    async fn save(&self, auth_dir: &Path, credentials: &Credentials) -> Result<(), StorageError> {
        if let Some(message) = self.state.fail_next_save.lock().unwrap().take() {
            return Err(StorageError::Backend { message });
        }
        self.state
            .entries
            .lock()
            .unwrap()
            .insert(auth_dir.to_path_buf(), credentials.clone());
        self.state.saved.lock().unwrap().push(credentials.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// One hook invocation
#[derive(Debug, Clone, PartialEq)]
pub enum HookCall {
    PairingCode(String),
    Connected(AttemptId),
    Disconnected(DisconnectKind),
    Message(MessageEnvelope),
    Error(String),
}

/// Records every hook invocation in order
#[derive(Debug, Clone, Default)]
pub struct RecordingHooks {
    calls: Arc<Mutex<Vec<HookCall>>>,
}

impl RecordingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hooks that append to this recorder
    pub fn hooks(&self) -> Hooks {
        let pairing = self.calls.clone();
        let connected = self.calls.clone();
        let disconnected = self.calls.clone();
        let message = self.calls.clone();
        let error = self.calls.clone();

        Hooks::new()
            .on_pairing_code(move |code| {
                pairing
                    .lock()
                    .unwrap()
                    .push(HookCall::PairingCode(code.to_string()));
            })
            .on_connected(move |session| {
                connected
                    .lock()
                    .unwrap()
                    .push(HookCall::Connected(session.attempt));
            })
            .on_disconnected(move |kind| {
                disconnected
                    .lock()
                    .unwrap()
                    .push(HookCall::Disconnected(kind));
            })
            .on_message(move |envelope| {
                message
                    .lock()
                    .unwrap()
                    .push(HookCall::Message(envelope.clone()));
            })
            .on_error(move |e| {
                error.lock().unwrap().push(HookCall::Error(e.to_string()));
            })
    }

    pub fn calls(&self) -> Vec<HookCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn pairing_codes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                HookCall::PairingCode(code) => Some(code),
                _ => None,
            })
            .collect()
    }

    pub fn connected(&self) -> Vec<AttemptId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                HookCall::Connected(attempt) => Some(attempt),
                _ => None,
            })
            .collect()
    }

    pub fn disconnects(&self) -> Vec<DisconnectKind> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                HookCall::Disconnected(kind) => Some(kind),
                _ => None,
            })
            .collect()
    }

    pub fn messages(&self) -> Vec<MessageEnvelope> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                HookCall::Message(envelope) => Some(envelope),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                HookCall::Error(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    /// Wait until the recorded calls satisfy `predicate`; false on timeout
    pub async fn wait_for<P>(&self, predicate: P) -> bool
    where
        P: Fn(&[HookCall]) -> bool,
    {
        poll_until(|| predicate(&self.calls.lock().unwrap()).then_some(()))
            .await
            .is_some()
    }
}
