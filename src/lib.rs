//! pairlink - phone-number pairing and connection supervision
//!
//! Keeps a linked-device messaging session alive: pairs a new device by
//! requesting a pairing code for a phone number, persists the credentials the
//! session produces, and reconnects with a fresh session whenever the
//! connection drops, until the server logs the device out.
//!
//! # Overview
//!
//! - [`supervisor`] - attempt lifecycle, pairing controller, reconnection policy
//! - [`credentials`] - credential bundle and the storage seam
//! - [`transport`] - session seam, event types and a scripted transport
//! - [`hooks`] - caller callbacks
//! - [`config`] - connection and reconnect settings
//! - [`observability`] - logging setup and per-supervisor counters
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use pairlink::{ConnectionConfig, Hooks, JsonFileStore, Scenario, ScriptedSessionFactory, Supervisor};
//!
//! # async fn run() -> pairlink::SessionResult<()> {
//! let hooks = Hooks::new()
//!     .on_pairing_code(|code| println!("Enter {code} on your phone"))
//!     .on_disconnected(|reason| println!("Disconnected: {reason}"));
//!
//! let config = ConnectionConfig::new("+1 555 123 4567")
//!     .with_auth_dir("pairing_auth_info")
//!     .with_hooks(hooks);
//!
//! let supervisor = Supervisor::new(ScriptedSessionFactory::new(Scenario::demo()), JsonFileStore::new());
//! let mut handle = supervisor.connect(config).await?;
//! handle.wait().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod credentials;
pub mod error;
pub mod hooks;
pub mod observability;
pub mod supervisor;
pub mod testing;
pub mod transport;

pub use config::{ConnectionConfig, ReconnectConfig};
pub use credentials::{CredentialStore, Credentials, JsonFileStore};
pub use error::{SessionError, SessionResult};
pub use hooks::{DisconnectKind, Hooks};
pub use supervisor::{ConnectionState, Supervisor, SupervisorExit, SupervisorHandle};
pub use transport::{Scenario, ScriptedSessionFactory, Session, SessionFactory};
