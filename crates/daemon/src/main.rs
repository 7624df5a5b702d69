use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docbackup_core::{BackupFilter, BackupStatus, BackupType, Compression, RestoreOptions, TriggeredBy};
use docbackup_daemon::config::{self, Config};
use docbackup_daemon::{build_engine, build_router, AppState};
use docbackup_engine::{BackupConfig, BackupEngine};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the JSON API (default)
    Serve,
    /// Create a backup now
    Backup {
        #[arg(long = "type", default_value = "full")]
        backup_type: BackupType,
        /// Collections to export; repeat for several
        #[arg(long = "collection")]
        collections: Vec<String>,
        #[arg(long)]
        compression: Option<Compression>,
        #[arg(long)]
        encrypt: bool,
        /// Upload targets; repeat for several
        #[arg(long = "provider")]
        providers: Vec<String>,
    },
    /// Restore a backup into the source database
    Restore {
        id: Uuid,
        #[arg(long)]
        provider: String,
        #[arg(long = "collection")]
        collections: Vec<String>,
        #[arg(long)]
        overwrite: bool,
        #[arg(long)]
        dry_run: bool,
    },
    /// Check a stored copy against its recorded checksum
    Verify {
        id: Uuid,
        #[arg(long)]
        provider: String,
    },
    /// List backups, newest first
    List {
        #[arg(long = "type")]
        backup_type: Option<BackupType>,
        #[arg(long)]
        status: Option<BackupStatus>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Delete a backup and its stored copies
    Delete { id: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut cfg = match &args.config {
        Some(path) => {
            info!(?path, "loading config file");
            config::load_config(path)?
        }
        None => Config::default(),
    };
    cfg.apply_overrides(|key| env::var(key).ok());

    let engine = build_engine(&cfg).await?;
    let key = cfg.backup.encryption_key.clone();

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => run_service(engine, &cfg).await,
        Command::Backup {
            backup_type,
            collections,
            compression,
            encrypt,
            providers,
        } => {
            let storage_providers = if !providers.is_empty() {
                providers
            } else if !cfg.backup.providers.is_empty() {
                cfg.backup.providers.clone()
            } else {
                engine.providers().names().map(str::to_owned).collect()
            };
            let config = BackupConfig {
                backup_type,
                collections: (!collections.is_empty()).then_some(collections),
                compression: compression.unwrap_or(cfg.backup.compression),
                encryption: encrypt || cfg.backup.encrypt,
                encryption_key: key,
                storage_providers,
            };
            let result = engine
                .create_backup(&config, TriggeredBy::Manual, None)
                .await?;
            print_json(&result)
        }
        Command::Restore {
            id,
            provider,
            collections,
            overwrite,
            dry_run,
        } => {
            let options = RestoreOptions {
                collections: (!collections.is_empty()).then_some(collections),
                overwrite,
                dry_run,
            };
            let outcome = engine
                .restore_backup(id, &options, &provider, key.as_deref())
                .await?;
            print_json(&outcome)
        }
        Command::Verify { id, provider } => {
            let result = engine.verify_backup(id, &provider, key.as_deref()).await?;
            print_json(&result)
        }
        Command::List {
            backup_type,
            status,
            limit,
        } => {
            let filter = BackupFilter {
                backup_type,
                status,
                limit,
            };
            print_json(&engine.list_backups(&filter).await?)
        }
        Command::Delete { id } => {
            engine.delete_backup(id).await?;
            info!(backup_id = %id, "deleted");
            Ok(())
        }
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_service(engine: BackupEngine, cfg: &Config) -> Result<()> {
    let state = AppState {
        engine,
        api_token: cfg.security.api_token.clone(),
        encryption_key: cfg.backup.encryption_key.clone(),
    };

    let listen = cfg.listen();
    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("invalid listen address: {listen}"))?;
    let app = build_router(state);

    info!(%addr, "starting docbackup API server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}
