use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use docbackup_engine::{BackupEngine, EngineSettings, RESTORE_BATCH_SIZE};
use docbackup_source::SqliteDatabase;
use docbackup_storage::{
    open_metadata_store, DriveConfig, DriveProvider, LocalProvider, ProviderRegistry,
    StorageProvider, DEFAULT_DRIVE_API,
};
use tracing::info;

use crate::config::{Config, ProviderConfig};

/// Builds every configured provider once.
pub async fn build_registry(cfg: &Config) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    if cfg.providers.is_empty() {
        registry.register("local", Arc::new(LocalProvider::new(cfg.root().join("backups"), "")))?;
        return Ok(registry);
    }

    for (name, provider) in &cfg.providers {
        let built = build_provider(name, provider, &cfg.root()).await?;
        info!(provider = %name, kind = built.kind(), "storage provider registered");
        registry.register(name.clone(), built)?;
    }
    Ok(registry)
}

async fn build_provider(
    name: &str,
    provider: &ProviderConfig,
    root: &Path,
) -> Result<Arc<dyn StorageProvider>> {
    match provider {
        ProviderConfig::Local { path, prefix } => {
            let base = match path {
                Some(path) => PathBuf::from(path),
                None => root.join("backups"),
            };
            Ok(Arc::new(LocalProvider::new(base, prefix)))
        }
        ProviderConfig::Drive {
            folder_id,
            access_token,
            prefix,
            api_base,
        } => {
            let Some(access_token) = access_token.clone() else {
                bail!("provider {name:?}: drive access token is not configured");
            };
            Ok(Arc::new(DriveProvider::new(DriveConfig {
                access_token,
                folder_id: folder_id.clone(),
                prefix: prefix.clone(),
                api_base: api_base
                    .clone()
                    .unwrap_or_else(|| DEFAULT_DRIVE_API.to_owned()),
            })))
        }
        #[cfg(feature = "s3")]
        ProviderConfig::S3 {
            bucket,
            region,
            prefix,
            endpoint_url,
            force_path_style,
        } => {
            let config = docbackup_storage::S3Config {
                bucket: bucket.clone(),
                region: region.clone(),
                prefix: prefix.clone(),
                endpoint_url: endpoint_url.clone(),
                force_path_style: *force_path_style,
            };
            Ok(Arc::new(docbackup_storage::S3Provider::new(config).await))
        }
        #[cfg(not(feature = "s3"))]
        ProviderConfig::S3 { .. } => {
            bail!("provider {name:?}: built without the `s3` feature")
        }
    }
}

/// Opens the source database and metadata store and wires up the engine.
pub async fn build_engine(cfg: &Config) -> Result<BackupEngine> {
    let root = cfg.root();
    tokio::fs::create_dir_all(&root)
        .await
        .with_context(|| format!("create data root {}", root.display()))?;

    let metadata = open_metadata_store(&root, cfg.storage.database_url.as_deref()).await?;
    let database = Arc::new(SqliteDatabase::open(cfg.source_path())?);
    let providers = Arc::new(build_registry(cfg).await?);

    let settings = EngineSettings {
        default_collections: cfg.backup.collections.clone(),
        restore_batch_size: cfg.backup.restore_batch_size.unwrap_or(RESTORE_BATCH_SIZE),
    };
    Ok(BackupEngine::new(database, metadata, providers).with_settings(settings))
}
