//! Caller-supplied callbacks
//!
//! Every hook is optional. Hooks run inline on the supervisor task, so they
//! should hand work off rather than block.

use crate::error::SessionError;
use crate::supervisor::ConnectedSession;
use crate::transport::MessageEnvelope;
use std::fmt;
use std::sync::Arc;

pub type PairingCodeHook = Arc<dyn Fn(&str) + Send + Sync>;
pub type ConnectedHook = Arc<dyn Fn(&ConnectedSession) + Send + Sync>;
pub type DisconnectedHook = Arc<dyn Fn(DisconnectKind) + Send + Sync>;
pub type MessageHook = Arc<dyn Fn(&MessageEnvelope) + Send + Sync>;
pub type ErrorHook = Arc<dyn Fn(&SessionError) + Send + Sync>;

/// Why the supervisor gave up on the session for good
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectKind {
    /// A registered session was revoked by the remote service
    LoggedOut,
    /// The configured reconnection ceiling was reached
    RetriesExhausted,
}

impl DisconnectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectKind::LoggedOut => "logged_out",
            DisconnectKind::RetriesExhausted => "retries_exhausted",
        }
    }
}

impl fmt::Display for DisconnectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional callbacks invoked by the supervisor
#[derive(Clone, Default)]
pub struct Hooks {
    on_pairing_code: Option<PairingCodeHook>,
    on_connected: Option<ConnectedHook>,
    on_disconnected: Option<DisconnectedHook>,
    on_message: Option<MessageHook>,
    on_error: Option<ErrorHook>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receives the pairing code. May fire again with the same code on later attempts.
    pub fn on_pairing_code<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_pairing_code = Some(Arc::new(hook));
        self
    }

    pub fn on_connected<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ConnectedSession) + Send + Sync + 'static,
    {
        self.on_connected = Some(Arc::new(hook));
        self
    }

    pub fn on_disconnected<F>(mut self, hook: F) -> Self
    where
        F: Fn(DisconnectKind) + Send + Sync + 'static,
    {
        self.on_disconnected = Some(Arc::new(hook));
        self
    }

    pub fn on_message<F>(mut self, hook: F) -> Self
    where
        F: Fn(&MessageEnvelope) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(hook));
        self
    }

    /// Receives failures that do not stop the supervisor (pairing rejections on retries)
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&SessionError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    pub(crate) fn emit_pairing_code(&self, code: &str) {
        if let Some(hook) = &self.on_pairing_code {
            hook(code);
        }
    }

    pub(crate) fn emit_connected(&self, session: &ConnectedSession) {
        if let Some(hook) = &self.on_connected {
            hook(session);
        }
    }

    pub(crate) fn emit_disconnected(&self, kind: DisconnectKind) {
        if let Some(hook) = &self.on_disconnected {
            hook(kind);
        }
    }

    pub(crate) fn emit_message(&self, message: &MessageEnvelope) {
        if let Some(hook) = &self.on_message {
            hook(message);
        }
    }

    pub(crate) fn emit_error(&self, error: &SessionError) {
        if let Some(hook) = &self.on_error {
            hook(error);
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_pairing_code", &self.on_pairing_code.is_some())
            .field("on_connected", &self.on_connected.is_some())
            .field("on_disconnected", &self.on_disconnected.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_disconnect_kind_labels() {
        assert_eq!(DisconnectKind::LoggedOut.to_string(), "logged_out");
        assert_eq!(DisconnectKind::RetriesExhausted.as_str(), "retries_exhausted");
    }

    #[test]
    fn test_unset_hooks_are_noops() {
        let hooks = Hooks::new();
        hooks.emit_pairing_code("ABCD-1234");
        hooks.emit_disconnected(DisconnectKind::LoggedOut);
    }

    #[test]
    fn test_pairing_code_hook_receives_code() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let hooks = Hooks::new().on_pairing_code(move |code| {
            sink.lock().unwrap().push(code.to_string());
        });

        hooks.emit_pairing_code("ABCD-1234");
        hooks.clone().emit_pairing_code("ABCD-1234");

        assert_eq!(*seen.lock().unwrap(), vec!["ABCD-1234", "ABCD-1234"]);
    }

    #[test]
    fn test_debug_shows_which_hooks_are_set() {
        let hooks = Hooks::new().on_disconnected(|_| {});
        let rendered = format!("{hooks:?}");
        assert!(rendered.contains("on_disconnected: true"));
        assert!(rendered.contains("on_message: false"));
    }
}
