//! Pair Probe - one-shot pairing check
//!
//! Requests (or re-announces) a pairing code for the given phone number,
//! prints the linking steps, and exits once the session opens. Exit code 0
//! means the session opened or was logged out; 1 means a pairing, storage or
//! connection failure.

use clap::Parser;
use pairlink::config::ConnectionConfig;
use pairlink::credentials::Credentials;
use pairlink::observability::{init_logging, LogFormat};
use pairlink::transport::{Scenario, ScriptedSessionFactory};
use pairlink::{
    ConnectionState, CredentialStore, Hooks, JsonFileStore, Supervisor, SupervisorExit,
};
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::Level;

/// One-shot pairing check
#[derive(Parser)]
#[command(name = "pair-probe")]
#[command(about = "Request a pairing code and wait until the linked session opens")]
#[command(version)]
struct Args {
    /// Phone number in international format, e.g. 5521989974782
    #[arg(value_name = "PHONE")]
    phone: String,

    /// Directory holding the stored credentials
    #[arg(long, env = "PAIRLINK_AUTH_DIR", default_value = "pairing_auth_info")]
    auth_dir: PathBuf,

    /// Scripted transport scenario (TOML); the built-in demo is used otherwise
    #[arg(long, env = "PAIRLINK_SCENARIO", value_name = "FILE")]
    scenario: Option<PathBuf>,

    /// Show supervisor logs
    #[arg(short, long)]
    verbose: bool,
}

fn print_linking_steps(code: &str) {
    println!("\nPAIRING CODE: {code}");
    println!("\nSteps:");
    println!("1. Open the messaging app on your phone");
    println!("2. Go to Settings > Linked Devices");
    println!("3. Tap \"Link a Device\"");
    println!("4. Choose \"Link with phone number instead\"");
    println!("5. Enter the pairing code above");
    println!("\nWaiting for connection...\n");
}

/// Notice shown before connecting, based on what is already stored
fn startup_notice(stored: &Credentials) -> Option<&'static str> {
    if stored.registered {
        Some("Already registered, attempting to connect...")
    } else {
        None
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let level = if args.verbose { Level::INFO } else { Level::ERROR };
    init_logging(level, LogFormat::Compact, false);

    println!("Testing pairing code authentication for {}", args.phone);

    let scenario = match &args.scenario {
        Some(path) => match Scenario::load_from_file(path) {
            Ok(scenario) => scenario,
            Err(e) => {
                eprintln!("Failed to load scenario: {e}");
                process::exit(1);
            }
        },
        None => Scenario::demo(),
    };

    let (error_tx, mut error_rx) = mpsc::unbounded_channel();
    let hooks = Hooks::new()
        .on_pairing_code(print_linking_steps)
        .on_connected(|session| {
            println!("Successfully connected!");
            println!("Account: {}", session.user.as_deref().unwrap_or("unknown"));
        })
        .on_disconnected(|reason| println!("Disconnected: {reason}"))
        .on_error(move |e| {
            let _ = error_tx.send(e.to_string());
        });

    let config = ConnectionConfig::new(args.phone.clone())
        .with_auth_dir(args.auth_dir.clone())
        .with_hooks(hooks);

    let store = JsonFileStore::new();
    // A load error here is reported again by connect
    if let Ok(stored) = store.load(&args.auth_dir).await {
        if let Some(notice) = startup_notice(&stored) {
            println!("{notice}");
        }
    }

    let supervisor = Supervisor::new(ScriptedSessionFactory::new(scenario), store);
    let mut handle = match supervisor.connect(config).await {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Error requesting pairing code: {e}");
            process::exit(1);
        }
    };

    let mut states = handle.subscribe();
    let code = tokio::select! {
        opened = states.wait_for(|state| matches!(state, ConnectionState::Open(_))) => {
            if opened.is_ok() { 0 } else { 1 }
        }
        result = handle.wait() => match result {
            Ok(SupervisorExit::LoggedOut) => {
                println!("Logged out, exiting");
                0
            }
            Ok(exit) => {
                eprintln!("Supervisor stopped: {exit:?}");
                1
            }
            Err(e) => {
                eprintln!("Session failed: {e}");
                1
            }
        },
        Some(message) = error_rx.recv() => {
            eprintln!("Error requesting pairing code: {message}");
            1
        }
        _ = signal::ctrl_c() => 1,
    };

    if !handle.is_finished() {
        let _ = handle.shutdown_and_wait().await;
    }
    process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_registered_credentials_get_a_notice() {
        let stored = Credentials {
            registered: true,
            ..Default::default()
        };
        assert_eq!(
            startup_notice(&stored),
            Some("Already registered, attempting to connect...")
        );
        assert_eq!(startup_notice(&Credentials::fresh()), None);
    }

    #[tokio::test]
    async fn test_notice_follows_stored_file() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new();
        assert_eq!(startup_notice(&store.load(dir.path()).await.unwrap()), None);

        let registered = Credentials {
            registered: true,
            ..Default::default()
        };
        store.save(dir.path(), &registered).await.unwrap();
        assert!(startup_notice(&store.load(dir.path()).await.unwrap()).is_some());
    }
}
