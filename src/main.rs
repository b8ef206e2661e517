//! pairlink - keep a linked-device session paired and connected
//!
//! Pairs this device with the phone number given on the command line, then
//! supervises the session until the server logs it out, a fatal error occurs,
//! or Ctrl-C is pressed.

use clap::Parser;
use pairlink::config::{ConfigError, ConnectionConfig};
use pairlink::observability::init_default_logging;
use pairlink::transport::{Scenario, ScriptedSessionFactory};
use pairlink::{Hooks, JsonFileStore, Supervisor, SupervisorExit};
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tracing::{error, info, warn};

/// Phone-number pairing and connection supervisor
#[derive(Parser)]
#[command(name = "pairlink")]
#[command(about = "Pair a linked device by phone number and keep its session connected")]
#[command(version)]
struct Cli {
    /// Phone number in international format, e.g. +15551234567
    #[arg(value_name = "PHONE")]
    phone: String,

    /// Directory holding the stored credentials
    #[arg(long, env = "PAIRLINK_AUTH_DIR", value_name = "DIR")]
    auth_dir: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Scripted transport scenario (TOML); the built-in demo is used otherwise
    #[arg(long, env = "PAIRLINK_SCENARIO", value_name = "FILE")]
    scenario: Option<PathBuf>,

    /// Give up after this many reconnects in a row without reaching open
    #[arg(long, value_name = "N")]
    max_retries: Option<u32>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting pairlink v{}", env!("CARGO_PKG_VERSION"));

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let scenario = match &cli.scenario {
        Some(path) => {
            info!("Loading scenario from: {}", path.display());
            match Scenario::load_from_file(path) {
                Ok(scenario) => scenario,
                Err(e) => {
                    error!("Failed to load scenario: {}", e);
                    process::exit(1);
                }
            }
        }
        None => Scenario::demo(),
    };

    match run(config, scenario).await {
        Ok(exit) => info!("Supervisor finished: {:?}", exit),
        Err(e) => {
            error!("Session failed: {}", e);
            process::exit(1);
        }
    }
}

fn build_config(cli: &Cli) -> Result<ConnectionConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            ConnectionConfig::load_from_file(path)?
        }
        None => ConnectionConfig::new(cli.phone.clone()),
    };

    config.phone_number = cli.phone.clone();
    if let Some(auth_dir) = &cli.auth_dir {
        config.auth_dir = auth_dir.clone();
    }
    if cli.max_retries.is_some() {
        config.reconnect.max_retries = cli.max_retries;
    }

    config.validated()
}

fn console_hooks() -> Hooks {
    Hooks::new()
        .on_pairing_code(|code| {
            println!("Pairing code: {code}");
            println!("Enter it on your phone under Settings > Linked Devices > Link with phone number");
        })
        .on_connected(|session| match &session.user {
            Some(user) => println!("Connected as {user}"),
            None => println!("Connected"),
        })
        .on_disconnected(|reason| println!("Disconnected: {reason}"))
        .on_message(|message| {
            let from = message.remote_jid.as_deref().unwrap_or("unknown");
            println!("Message from {from}: {}", message.payload);
        })
        .on_error(|e| warn!("Session error: {}", e))
}

async fn run(
    config: ConnectionConfig,
    scenario: Scenario,
) -> Result<SupervisorExit, Box<dyn std::error::Error>> {
    let supervisor = Supervisor::new(ScriptedSessionFactory::new(scenario), JsonFileStore::new());
    let mut handle = supervisor.connect(config.with_hooks(console_hooks())).await?;

    let exit = tokio::select! {
        result = handle.wait() => result?,
        _ = signal::ctrl_c() => {
            info!("Received Ctrl-C, shutting down");
            handle.shutdown_and_wait().await?
        }
    };

    let stats = handle.stats();
    info!(
        attempts = stats.attempts_started,
        pairing_requests = stats.pairing_requests,
        messages = stats.messages_delivered,
        "Session statistics"
    );
    Ok(exit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_retries_flag_sets_retry_ceiling() {
        let cli = Cli::try_parse_from(["pairlink", "15551234567", "--max-retries", "3"]).unwrap();
        let config = build_config(&cli).unwrap();
        assert_eq!(config.reconnect.max_retries, Some(3));
        assert_eq!(config.phone_number, "15551234567");
    }

    #[test]
    fn test_retry_ceiling_defaults_to_unlimited() {
        let cli = Cli::try_parse_from(["pairlink", "15551234567"]).unwrap();
        assert_eq!(build_config(&cli).unwrap().reconnect.max_retries, None);
    }
}
