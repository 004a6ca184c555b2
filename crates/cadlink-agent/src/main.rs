use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use cadlink_agent::config::AgentConfig;
use cadlink_agent::logging;
use cadlink_agent::services::{user_facing, Services};
use cadlink_core::{ConnectionEvent, StaticDocument, StopMode};

#[derive(Parser)]
#[command(name = "cadlink-agent")]
#[command(about = "CadLink Agent - license, file ledger and remote session host")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// License registration and validation
    License {
        #[command(subcommand)]
        action: LicenseAction,
    },
    /// Print this machine's fingerprint
    Fingerprint,
    /// Inspect and maintain the linked file ledger
    Files {
        #[command(subcommand)]
        action: FilesAction,
    },
    /// Connect a document and serve commands until Ctrl-C
    Connect {
        /// Document to bind the session to
        #[arg(long)]
        file: PathBuf,
        /// Document GUID embedded in the file
        #[arg(long)]
        guid: Option<String>,
        /// Ignore any resumable session for this file
        #[arg(long)]
        new_session: bool,
        /// Forget the session on exit instead of keeping it resumable
        #[arg(long)]
        discard: bool,
    },
}

#[derive(Subcommand)]
enum LicenseAction {
    /// Register a license key for a user on this machine
    Register {
        license_key: String,
        user_id: String,
    },
    /// Validate the stored license with the server
    Validate,
    /// Show the stored license without contacting the server
    Status,
    /// Delete the stored license
    Clear,
}

#[derive(Subcommand)]
enum FilesAction {
    /// List linked files
    List,
    /// Re-check every linked file on disk
    Check,
    /// Classify a file against the ledger
    Validate {
        path: PathBuf,
        #[arg(long)]
        guid: Option<String>,
    },
    /// Remove one session's entry
    Unlink { session_id: String },
    /// Remove every entry
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AgentConfig::load_from_file(path)?,
        None => AgentConfig::load_from_env()?,
    };
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    let _log_guard = logging::init(&config.log_level, config.log_file.as_deref());
    info!(mode = %config.mode, server = %config.server_url, "starting cadlink-agent");

    let services = Services::open(&config).map_err(user_facing)?;

    match args.command {
        Command::License { action } => run_license(&config, &services, action).await,
        Command::Fingerprint => {
            let id = services.fingerprint.current();
            println!("{}", id.display());
            println!("{}", id.as_str());
            Ok(())
        }
        Command::Files { action } => run_files(&services, action),
        Command::Connect {
            file,
            guid,
            new_session,
            discard,
        } => run_connect(&config, &services, file, guid, new_session, discard).await,
    }
}

async fn run_license(
    config: &AgentConfig,
    services: &Services,
    action: LicenseAction,
) -> anyhow::Result<()> {
    match action {
        LicenseAction::Register {
            license_key,
            user_id,
        } => {
            let result = services
                .license
                .register(&license_key, &user_id, &config.server_url)
                .await;
            println!("{}", result.message);
            if !result.success {
                anyhow::bail!("registration failed");
            }
            if let (Some(id), Some(tier)) = (result.license_id, result.tier) {
                println!("license {id} ({tier})");
            }
        }
        LicenseAction::Validate | LicenseAction::Status => {
            let result = match action {
                LicenseAction::Validate => services.license.validate().await,
                _ => services.license.status(),
            };
            println!("{}", result.message);
            if result.purged {
                warn!("stored license was removed");
            }
            if !result.is_valid {
                anyhow::bail!("license is not valid");
            }
            if let (Some(id), Some(user)) = (result.license_id, result.user_id) {
                println!(
                    "license {id} for {user}, tier {}, up to {} files",
                    result.tier.unwrap_or_default(),
                    result.max_concurrent_files.unwrap_or_default()
                );
            }
        }
        LicenseAction::Clear => {
            services.license.clear().map_err(user_facing)?;
            println!("License removed.");
        }
    }
    Ok(())
}

fn run_files(services: &Services, action: FilesAction) -> anyhow::Result<()> {
    let ledger = &services.ledger;
    match action {
        FilesAction::List => {
            for record in ledger.list() {
                println!(
                    "{}\t{}\t{}\t{}",
                    record.session_id,
                    record.status,
                    record.document_guid.as_deref().unwrap_or("-"),
                    record.file_path.display()
                );
            }
        }
        FilesAction::Check => {
            let changes = ledger.check_all();
            if changes.is_empty() {
                println!("No changes.");
            }
            for change in changes {
                println!(
                    "{}: {} -> {} ({})",
                    change.session_id, change.old_status, change.new_status, change.message
                );
            }
        }
        FilesAction::Validate { path, guid } => {
            let outcome = ledger.validate_for_connection(&path, guid.as_deref());
            println!("{:?}: {}", outcome.scenario, outcome.message);
            if let Some(session_id) = outcome.session_id {
                println!("session {session_id}");
            }
        }
        FilesAction::Unlink { session_id } => {
            if !ledger.unregister(&session_id) {
                anyhow::bail!("no linked file for session {session_id}");
            }
        }
        FilesAction::Clear => ledger.clear_all(),
    }
    Ok(())
}

async fn run_connect(
    config: &AgentConfig,
    services: &Services,
    file: PathBuf,
    guid: Option<String>,
    new_session: bool,
    discard: bool,
) -> anyhow::Result<()> {
    let document = Arc::new(StaticDocument::new(&file, guid.as_deref()));
    let manager = services.connection_manager(config, document);
    let mut events = manager.subscribe();

    let settings = config.connection_settings().with_force_new_session(new_session);
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ConnectionEvent::StatusChanged { status, message } => {
                    println!("[{status}] {message}");
                }
                ConnectionEvent::CommandReceived {
                    tool,
                    correlation_id,
                } => {
                    println!("command {tool} ({correlation_id})");
                }
            }
        }
    });

    if !manager.start_connection(&settings).await {
        manager.stop_connection().await;
        drop(manager);
        let _ = printer.await;
        anyhow::bail!("connection failed");
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    let mode = if discard {
        StopMode::DiscardSession
    } else {
        StopMode::Resumable
    };
    manager.stop_connection_with(mode).await;
    drop(manager);
    let _ = printer.await;
    Ok(())
}
