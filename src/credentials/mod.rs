//! Credential bundle and the storage seam
//!
//! The supervisor only looks at `registered`, `pairing_code` and `me`; every
//! other field the session layer stores is carried through untouched in
//! [`Credentials::extra`].

use crate::error::StorageError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

pub mod file_store;

pub use file_store::JsonFileStore;

/// Opaque authentication material with the fields pairing decisions need
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// Session fully authorised by the remote service
    #[serde(default)]
    pub registered: bool,
    /// Code already issued and waiting to be entered on the trusted device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairing_code: Option<String>,
    /// Account id, known once registered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub me: Option<String>,
    /// Everything else the session layer keeps here
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// What the pairing controller should do for a set of credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingStatus<'a> {
    /// No code yet, a request is needed
    Unpaired,
    /// A code was issued earlier and is still pending
    CodeIssued(&'a str),
    Registered,
}

impl Credentials {
    /// Unregistered credentials with nothing issued yet
    pub fn fresh() -> Self {
        Self::default()
    }

    pub fn pairing_status(&self) -> PairingStatus<'_> {
        if self.registered {
            return PairingStatus::Registered;
        }
        match self.pairing_code.as_deref() {
            Some(code) if !code.is_empty() => PairingStatus::CodeIssued(code),
            _ => PairingStatus::Unpaired,
        }
    }

    /// Merge a newer snapshot from the session into this view.
    ///
    /// `registered` never goes back to false within a session lifetime.
    pub fn absorb(&self, update: Credentials) -> Credentials {
        let mut merged = update;
        if self.registered && !merged.registered {
            warn!("Ignoring credentials update that would clear the registered flag");
            merged.registered = true;
        }
        if merged.me.is_none() {
            merged.me = self.me.clone();
        }
        merged
    }
}

/// Persistence for [`Credentials`], keyed by auth directory
#[async_trait]
pub trait CredentialStore: Send + Sync + 'static {
    /// Load stored credentials, or fresh ones when nothing was stored yet
    async fn load(&self, auth_dir: &Path) -> Result<Credentials, StorageError>;

    /// Persist credentials. Must be durable when this returns `Ok`.
    async fn save(&self, auth_dir: &Path, credentials: &Credentials) -> Result<(), StorageError>;

    /// Human-readable backend name for log messages
    fn name(&self) -> &str;
}
