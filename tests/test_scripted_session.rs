//! Scripted transport driven end to end
//!
//! Runs the supervisor against a scripted scenario with the JSON file store,
//! the same pairing the CLIs perform, and checks what lands on disk.

mod test_helpers;

use pairlink::error::{PairingError, SessionError};
use pairlink::supervisor::{ConnectionState, SupervisorExit};
use pairlink::testing::{HookCall, RecordingHooks};
use pairlink::transport::scripted::{ScriptedAttempt, ScriptedStep, StepKind};
use pairlink::transport::{Scenario, ScriptedSessionFactory};
use pairlink::{ConnectionConfig, JsonFileStore, Supervisor};
use tempfile::TempDir;
use test_helpers::*;

fn pairing_scenario() -> Scenario {
    Scenario::new(vec![
        ScriptedAttempt {
            steps: vec![
                ScriptedStep::new(StepKind::Connecting),
                ScriptedStep::new(StepKind::CodeStored).after(5),
                ScriptedStep::new(StepKind::Close).after(5).status(401),
            ],
        },
        ScriptedAttempt {
            steps: vec![
                ScriptedStep::new(StepKind::Connecting),
                ScriptedStep::new(StepKind::Registered)
                    .after(5)
                    .me(format!("{PHONE}@s.whatsapp.net")),
                ScriptedStep::new(StepKind::Open).after(5),
                ScriptedStep::new(StepKind::Message).after(5).text("hello"),
            ],
        },
    ])
    .with_pairing_delay_ms(1)
}

fn file_config(dir: &TempDir, recorder: &RecordingHooks) -> ConnectionConfig {
    ConnectionConfig::new(PHONE)
        .with_auth_dir(dir.path())
        .with_reconnect(fast_reconnect())
        .with_hooks(recorder.hooks())
}

#[tokio::test]
async fn test_scripted_pairing_persists_registration_to_disk() {
    let dir = TempDir::new().unwrap();
    let recorder = RecordingHooks::new();
    let supervisor = Supervisor::new(
        ScriptedSessionFactory::new(pairing_scenario()),
        JsonFileStore::new(),
    );

    let mut handle = supervisor.connect(file_config(&dir, &recorder)).await.unwrap();
    assert_eq!(recorder.pairing_codes(), vec!["ABCD-1234"]);

    let state = handle
        .wait_for_state(|state| matches!(state, ConnectionState::Open(_)))
        .await;
    assert!(matches!(state, Some(ConnectionState::Open(_))));
    assert!(
        recorder
            .wait_for(|calls| calls.iter().any(|c| matches!(c, HookCall::Message(_))))
            .await
    );

    // Second attempt re-announced the stored code instead of requesting again
    assert_eq!(recorder.pairing_codes(), vec!["ABCD-1234", "ABCD-1234"]);
    assert_eq!(recorder.connected().len(), 1);

    let path = JsonFileStore::new().creds_path(dir.path());
    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
    assert_eq!(raw["registered"], true);
    assert_eq!(raw["pairingCode"], "ABCD-1234");
    assert_eq!(raw["me"], format!("{PHONE}@s.whatsapp.net"));

    assert_eq!(
        handle.shutdown_and_wait().await.unwrap(),
        SupervisorExit::Stopped
    );
}

#[tokio::test]
async fn test_scripted_rejection_fails_connect() {
    let dir = TempDir::new().unwrap();
    let recorder = RecordingHooks::new();
    let scenario = pairing_scenario().with_pairing_rejected("number not on service");
    let supervisor = Supervisor::new(ScriptedSessionFactory::new(scenario), JsonFileStore::new());

    let result = supervisor.connect(file_config(&dir, &recorder)).await;

    assert!(matches!(
        result,
        Err(SessionError::Pairing(PairingError::Rejected(_)))
    ));
    assert!(recorder.pairing_codes().is_empty());
}

#[tokio::test]
async fn test_registered_credentials_on_disk_skip_pairing() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        JsonFileStore::new().creds_path(dir.path()),
        format!(r#"{{"registered": true, "me": "{PHONE}@s.whatsapp.net"}}"#),
    )
    .unwrap();
    let recorder = RecordingHooks::new();
    let supervisor = Supervisor::new(
        ScriptedSessionFactory::new(pairing_scenario()),
        JsonFileStore::new(),
    );

    let mut handle = supervisor.connect(file_config(&dir, &recorder)).await.unwrap();

    // The first script closes with 401 while registered: that is a logout
    let exit = handle.wait().await.unwrap();
    assert_eq!(exit, SupervisorExit::LoggedOut);
    assert!(recorder.pairing_codes().is_empty());
    assert_eq!(handle.state(), ConnectionState::LoggedOut);
}
