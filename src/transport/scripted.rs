//! Scripted transport
//!
//! Plays connection, credential and message events from a TOML scenario so the
//! supervisor and its CLIs can run without the real wire protocol. Each
//! opened session takes the next script in `attempts`; once the list runs out
//! the last script repeats.
//!
//! ```toml
//! pairing_code = "ABCD-1234"
//! pairing_delay_ms = 200
//!
//! [[attempts]]
//! steps = [
//!     { event = "connecting" },
//!     { event = "code_stored", after_ms = 100 },
//!     { event = "close", after_ms = 1500, status_code = 401 },
//! ]
//!
//! [[attempts]]
//! steps = [
//!     { event = "connecting" },
//!     { event = "registered", after_ms = 500, me = "15551234567@s.whatsapp.net" },
//!     { event = "open" },
//! ]
//! ```

use super::{
    CloseCause, ConnectionUpdate, EventStream, MessageBatch, MessageEnvelope, ProtocolVersion,
    Session, SessionEvent, SessionFactory, SessionOptions, UpsertKind,
};
use crate::config::ConfigError;
use crate::credentials::Credentials;
use crate::error::{ConnectionError, PairingError};
use crate::supervisor::AttemptId;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, Instrument};

const DEFAULT_VERSION: ProtocolVersion = ProtocolVersion([2, 3000, 1015901307]);

fn default_version() -> ProtocolVersion {
    DEFAULT_VERSION
}

fn default_pairing_code() -> String {
    "ABCD-1234".to_string()
}

fn default_pairing_delay_ms() -> u64 {
    200
}

/// A full scripted run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default = "default_version")]
    pub latest_version: ProtocolVersion,
    /// Code returned by every pairing request
    #[serde(default = "default_pairing_code")]
    pub pairing_code: String,
    /// When set, pairing requests fail with this message
    #[serde(default)]
    pub reject_pairing: Option<String>,
    #[serde(default = "default_pairing_delay_ms")]
    pub pairing_delay_ms: u64,
    pub attempts: Vec<ScriptedAttempt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedAttempt {
    pub steps: Vec<ScriptedStep>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Connecting,
    Open,
    Close,
    /// Credentials update marking the session registered
    Registered,
    /// Credentials update carrying the issued pairing code
    CodeStored,
    Message,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedStep {
    pub event: StepKind,
    /// Delay before the step is played
    #[serde(default)]
    pub after_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub me: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<UpsertKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Skip this step when the session was opened with registered credentials
    #[serde(default)]
    pub only_unregistered: bool,
}

impl ScriptedStep {
    pub fn new(event: StepKind) -> Self {
        Self {
            event,
            after_ms: 0,
            status_code: None,
            message: None,
            me: None,
            kind: None,
            text: None,
            only_unregistered: false,
        }
    }

    pub fn after(mut self, after_ms: u64) -> Self {
        self.after_ms = after_ms;
        self
    }

    pub fn status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn me<S: Into<String>>(mut self, me: S) -> Self {
        self.me = Some(me.into());
        self
    }

    pub fn text<S: Into<String>>(mut self, text: S) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn kind(mut self, kind: UpsertKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn unless_registered(mut self) -> Self {
        self.only_unregistered = true;
        self
    }
}

impl Scenario {
    pub fn new(attempts: Vec<ScriptedAttempt>) -> Self {
        Self {
            latest_version: DEFAULT_VERSION,
            pairing_code: default_pairing_code(),
            reject_pairing: None,
            pairing_delay_ms: default_pairing_delay_ms(),
            attempts,
        }
    }

    /// Fresh install: the first session waits for the code, the second one pairs
    pub fn demo() -> Self {
        Self::new(vec![
            ScriptedAttempt {
                steps: vec![
                    ScriptedStep::new(StepKind::Connecting),
                    ScriptedStep::new(StepKind::CodeStored)
                        .after(100)
                        .unless_registered(),
                    ScriptedStep::new(StepKind::Close)
                        .after(1500)
                        .status(401)
                        .unless_registered(),
                    ScriptedStep::new(StepKind::Open).after(200),
                    ScriptedStep::new(StepKind::Message)
                        .after(300)
                        .text("welcome back"),
                ],
            },
            ScriptedAttempt {
                steps: vec![
                    ScriptedStep::new(StepKind::Connecting),
                    ScriptedStep::new(StepKind::Registered)
                        .after(800)
                        .me("15551234567@s.whatsapp.net"),
                    ScriptedStep::new(StepKind::Open).after(100),
                    ScriptedStep::new(StepKind::Message)
                        .after(300)
                        .text("hello from the scripted peer"),
                ],
            },
        ])
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let scenario: Scenario = toml::from_str(content)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.attempts.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "scenario must script at least one attempt".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_pairing_rejected<S: Into<String>>(mut self, message: S) -> Self {
        self.reject_pairing = Some(message.into());
        self
    }

    pub fn with_pairing_delay_ms(mut self, delay_ms: u64) -> Self {
        self.pairing_delay_ms = delay_ms;
        self
    }

    fn script_for(&self, index: usize) -> Option<&ScriptedAttempt> {
        self.attempts.get(index).or_else(|| self.attempts.last())
    }
}

/// Opens sessions that replay a [`Scenario`]
#[derive(Debug)]
pub struct ScriptedSessionFactory {
    scenario: Arc<Scenario>,
    opened: AtomicUsize,
}

impl ScriptedSessionFactory {
    pub fn new(scenario: Scenario) -> Self {
        Self {
            scenario: Arc::new(scenario),
            opened: AtomicUsize::new(0),
        }
    }

    pub fn sessions_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SessionFactory for ScriptedSessionFactory {
    type Session = ScriptedSession;

    async fn latest_version(&self) -> Result<ProtocolVersion, ConnectionError> {
        Ok(self.scenario.latest_version)
    }

    async fn open_session(
        &self,
        options: SessionOptions,
    ) -> Result<(ScriptedSession, EventStream), ConnectionError> {
        let index = self.opened.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scenario
            .script_for(index)
            .cloned()
            .ok_or_else(|| ConnectionError::OpenFailed("scenario has no attempts".to_string()))?;

        debug!(
            attempt = %options.attempt,
            script = index,
            steps = script.steps.len(),
            "Playing scripted session"
        );

        let issued = Arc::new(Mutex::new(None));
        let (tx, rx) = mpsc::channel(32);
        let player = ScriptPlayer {
            attempt: options.attempt,
            credentials: options.credentials,
            fallback_code: self.scenario.pairing_code.clone(),
            issued: issued.clone(),
            tx,
        };
        let task = tokio::spawn(player.play(script).instrument(options.span));

        Ok((
            ScriptedSession {
                scenario: self.scenario.clone(),
                issued,
                player: Mutex::new(Some(task)),
            },
            rx,
        ))
    }
}

/// Session whose events come from a script
#[derive(Debug)]
pub struct ScriptedSession {
    scenario: Arc<Scenario>,
    issued: Arc<Mutex<Option<String>>>,
    player: Mutex<Option<JoinHandle<()>>>,
}

impl ScriptedSession {
    fn stop_player(&self) {
        if let Ok(mut player) = self.player.lock() {
            if let Some(task) = player.take() {
                task.abort();
            }
        }
    }
}

#[async_trait::async_trait]
impl Session for ScriptedSession {
    async fn request_pairing_code(&self, phone_number: &str) -> Result<String, PairingError> {
        tokio::time::sleep(Duration::from_millis(self.scenario.pairing_delay_ms)).await;

        if phone_number.is_empty() || !phone_number.chars().all(|c| c.is_ascii_digit()) {
            return Err(PairingError::MalformedPhoneNumber(
                "phone number must be digits only".to_string(),
            ));
        }
        if let Some(reason) = &self.scenario.reject_pairing {
            return Err(PairingError::Rejected(reason.clone()));
        }

        let code = self.scenario.pairing_code.clone();
        if let Ok(mut issued) = self.issued.lock() {
            *issued = Some(code.clone());
        }
        Ok(code)
    }

    async fn close(&self) {
        self.stop_player();
    }
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        self.stop_player();
    }
}

struct ScriptPlayer {
    attempt: AttemptId,
    credentials: Credentials,
    fallback_code: String,
    issued: Arc<Mutex<Option<String>>>,
    tx: mpsc::Sender<SessionEvent>,
}

impl ScriptPlayer {
    async fn play(mut self, script: ScriptedAttempt) {
        let opened_registered = self.credentials.registered;

        for (index, step) in script.steps.into_iter().enumerate() {
            if step.only_unregistered && opened_registered {
                continue;
            }
            if step.after_ms > 0 {
                tokio::time::sleep(Duration::from_millis(step.after_ms)).await;
            }

            let event = self.event_for(index, step);
            debug!(event = event.name(), "Scripted event");
            if self.tx.send(event).await.is_err() {
                return;
            }
        }

        info!("Script finished, holding session open");
        // The stream stays open until the session is closed.
        std::future::pending::<()>().await;
    }

    fn event_for(&mut self, index: usize, step: ScriptedStep) -> SessionEvent {
        match step.event {
            StepKind::Connecting => SessionEvent::ConnectionUpdate(ConnectionUpdate::connecting()),
            StepKind::Open => SessionEvent::ConnectionUpdate(ConnectionUpdate::open()),
            StepKind::Close => {
                let message = step.message.unwrap_or_else(|| {
                    step.status_code
                        .map(|code| format!("closed with status {code}"))
                        .unwrap_or_else(|| "connection closed".to_string())
                });
                SessionEvent::ConnectionUpdate(ConnectionUpdate::closed(CloseCause::new(
                    step.status_code,
                    message,
                )))
            }
            StepKind::Registered => {
                self.credentials.registered = true;
                if step.me.is_some() {
                    self.credentials.me = step.me;
                }
                SessionEvent::CredentialsUpdate(self.credentials.clone())
            }
            StepKind::CodeStored => {
                let issued = self.issued.lock().ok().and_then(|issued| issued.clone());
                self.credentials.pairing_code =
                    Some(issued.unwrap_or_else(|| self.fallback_code.clone()));
                SessionEvent::CredentialsUpdate(self.credentials.clone())
            }
            StepKind::Message => {
                let envelope = MessageEnvelope {
                    id: Some(format!("scripted-{}-{}", self.attempt.get(), index)),
                    remote_jid: Some("peer@s.whatsapp.net".to_string()),
                    payload: json!({ "conversation": step.text.unwrap_or_default() }),
                };
                SessionEvent::MessagesUpsert(MessageBatch {
                    kind: step.kind.unwrap_or(UpsertKind::Notify),
                    messages: vec![envelope],
                })
            }
        }
    }
}
