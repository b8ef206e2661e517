//! Test helpers and utilities for integration tests

#![allow(dead_code)]

use pairlink::config::{ConnectionConfig, ReconnectConfig};
use pairlink::credentials::Credentials;
use pairlink::hooks::Hooks;
use pairlink::supervisor::Supervisor;
use pairlink::testing::{MemoryCredentialStore, MockSessionFactory};
use pairlink::transport::MessageEnvelope;
use serde_json::json;
use std::path::Path;
use std::time::Duration;

pub const PHONE: &str = "15551234567";
pub const AUTH_DIR: &str = "test_auth";

/// Reconnect delays short enough for tests, pairing delay still the shorter one
pub fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        pairing_retry_ms: 10,
        transient_retry_ms: 20,
        max_retries: None,
    }
}

pub fn test_config(hooks: Hooks) -> ConnectionConfig {
    ConnectionConfig::new(PHONE)
        .with_auth_dir(AUTH_DIR)
        .with_reconnect(fast_reconnect())
        .with_hooks(hooks)
}

pub fn auth_dir() -> &'static Path {
    Path::new(AUTH_DIR)
}

pub fn registered_credentials() -> Credentials {
    Credentials {
        registered: true,
        me: Some(format!("{PHONE}@s.whatsapp.net")),
        ..Default::default()
    }
}

pub fn credentials_with_code(code: &str) -> Credentials {
    Credentials {
        pairing_code: Some(code.to_string()),
        ..Default::default()
    }
}

pub fn supervisor(
    factory: &MockSessionFactory,
    store: &MemoryCredentialStore,
) -> Supervisor<MockSessionFactory, MemoryCredentialStore> {
    Supervisor::new(factory.clone(), store.clone())
}

pub fn text_message(id: &str, text: &str) -> MessageEnvelope {
    MessageEnvelope {
        id: Some(id.to_string()),
        remote_jid: Some("peer@s.whatsapp.net".to_string()),
        payload: json!({ "conversation": text }),
    }
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..400 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
