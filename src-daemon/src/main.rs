mod logging;
mod response;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use mailcode_core::{
    DomainGate, DomainStore, EngineConfig, EnvCredentials, ImapEngine, JsonDomainStore,
    RetrievalOutcome,
};
use serde::Serialize;
use tracing::{error, info};

use crate::response::{ConnectionResponse, DomainResponse, LookupResponse, Status};

#[derive(Parser)]
#[command(name = "mailcode-daemon", version)]
#[command(about = "Finds the latest verification code or link sent to an address")]
struct Cli {
    /// Engine configuration file (JSON)
    #[arg(short, long, env = "MAILCODE_CONFIG")]
    config: Option<PathBuf>,

    /// Also write daily-rotated logs to this directory
    #[arg(long, env = "MAILCODE_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Look up the newest valid artifact for an address
    Lookup {
        /// Recipient address, e.g. user@example.com
        address: String,
    },
    /// Manage authorized domains
    Domains {
        #[command(subcommand)]
        domains_cmd: DomainCommand,
    },
    /// Check that the central mailbox accepts the configured credential
    TestAuth,
}

#[derive(Subcommand)]
enum DomainCommand {
    /// List authorized domains
    List,
    /// Authorize a domain
    Add { domain: String },
    /// Revoke a domain
    Remove { domain: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    let _guard = logging::setup_logging(cli.log_dir.as_deref(), level);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = load_config(cli.config.as_deref())?;
    let store: Arc<dyn DomainStore> = Arc::new(open_domain_store(&config)?);

    match cli.command {
        Command::Lookup { address } => lookup(config, store, &address).await,
        Command::Domains { domains_cmd } => {
            let gate = DomainGate::load(store).await?;
            domains(&gate, domains_cmd).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::TestAuth => test_auth(config, store).await,
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    let mut config = match path {
        Some(path) => {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            EngineConfig::from_json(&data)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => {
            info!("No config file given, using defaults");
            EngineConfig::default()
        }
    };
    if let Ok(email) = std::env::var("MAILCODE_IMAP_EMAIL") {
        if !email.trim().is_empty() {
            config.mailbox.email = email.trim().to_string();
        }
    }
    config.validate()?;
    Ok(config)
}

fn open_domain_store(config: &EngineConfig) -> anyhow::Result<JsonDomainStore> {
    let path = match &config.domains_file {
        Some(path) => path.clone(),
        None => dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mailcode")
            .join("domains.json"),
    };
    JsonDomainStore::open(&path)
        .with_context(|| format!("failed to open domains file {}", path.display()))
}

async fn engine(config: EngineConfig, store: Arc<dyn DomainStore>) -> anyhow::Result<ImapEngine> {
    if config.mailbox.email.is_empty() {
        bail!(
            "mailbox.email is not configured (set it in the config file or MAILCODE_IMAP_EMAIL)"
        );
    }
    Ok(ImapEngine::with_imap(config, Arc::new(EnvCredentials::default()), store).await?)
}

async fn lookup(
    config: EngineConfig,
    store: Arc<dyn DomainStore>,
    address: &str,
) -> anyhow::Result<ExitCode> {
    let engine = engine(config, store).await?;
    let result = engine.retrieve_artifact(address).await;
    engine.shutdown().await;

    let email = address.trim().to_lowercase();
    let (response, code) = match result {
        Ok(outcome) => {
            let code = match outcome {
                RetrievalOutcome::Found { .. } => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            };
            (LookupResponse::from_outcome(&email, &outcome, Utc::now()), code)
        }
        Err(failure) => (
            LookupResponse::from_failure(&email, &failure, Utc::now()),
            ExitCode::from(2),
        ),
    };
    print_json(&response)?;
    Ok(code)
}

async fn domains(gate: &DomainGate, cmd: DomainCommand) -> anyhow::Result<()> {
    match cmd {
        DomainCommand::List => {
            let records = gate.records().await?;
            print_json(&records)?;
        }
        DomainCommand::Add { domain } => {
            let result = gate.add_domain(&domain).await?;
            info!("{}", result.message());
            print_json(&DomainResponse::new(&result))?;
        }
        DomainCommand::Remove { domain } => {
            let result = gate.remove_domain(&domain).await?;
            info!("{}", result.message());
            print_json(&DomainResponse::new(&result))?;
        }
    }
    Ok(())
}

async fn test_auth(config: EngineConfig, store: Arc<dyn DomainStore>) -> anyhow::Result<ExitCode> {
    let email = config.mailbox.email.clone();
    let imap_server = config.mailbox.host.clone();
    let imap_port = config.mailbox.port;
    let engine = engine(config, store).await?;

    let (status, message, error, code) = match engine.test_connection().await {
        Ok(()) => (Status::Success, "Connected to the central mailbox", None, ExitCode::SUCCESS),
        Err(e) => (
            Status::Error,
            "Could not connect to the central mailbox",
            Some(e.to_string()),
            ExitCode::from(2),
        ),
    };
    print_json(&ConnectionResponse {
        status,
        message: message.to_string(),
        email,
        imap_server,
        imap_port,
        inbox_access: error.is_none(),
        error,
        timestamp: Utc::now(),
    })?;
    Ok(code)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
