use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use docbackup_core::{
    checksum, BackupEnvelope, BackupRecord, BackupResult, BackupStatus, BackupType, Compression,
    Pipeline, StorageLocation, TriggeredBy,
};
use docbackup_storage::StorageProvider;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::exporter::{export_collections, CollectionExport};
use crate::BackupEngine;

const NO_PROVIDERS: &str = "no storage providers available";

#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupConfig {
    #[serde(default, rename = "type")]
    pub backup_type: BackupType,
    /// Falls back to the engine's default collections.
    #[serde(default)]
    pub collections: Option<Vec<String>>,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default)]
    pub encryption: bool,
    #[serde(default, skip_serializing)]
    pub encryption_key: Option<String>,
    #[serde(default)]
    pub storage_providers: Vec<String>,
}

impl std::fmt::Debug for BackupConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupConfig")
            .field("backup_type", &self.backup_type)
            .field("collections", &self.collections)
            .field("compression", &self.compression)
            .field("encryption", &self.encryption)
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "[REDACTED]"))
            .field("storage_providers", &self.storage_providers)
            .finish()
    }
}

/// Result of uploading to one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Stored(StorageLocation),
    Failed { provider: String, error: String },
}

struct Payload {
    bytes: Vec<u8>,
    size: u64,
    exports: Vec<CollectionExport>,
    envelope: BackupEnvelope,
}

impl BackupEngine {
    /// Exports, transforms and uploads a new backup.
    ///
    /// Configuration problems fail before anything is recorded. Once the
    /// pending record exists, every failure is folded into the returned
    /// result and the persisted record.
    pub async fn create_backup(
        &self,
        config: &BackupConfig,
        triggered_by: TriggeredBy,
        schedule_id: Option<String>,
    ) -> Result<BackupResult> {
        let providers = config
            .storage_providers
            .iter()
            .map(|name| Ok((name.clone(), self.provider(name)?)))
            .collect::<Result<Vec<_>>>()?;
        let pipeline = Pipeline::new(
            config.compression,
            config.encryption,
            config.encryption_key.as_deref(),
        )
        .map_err(|err| EngineError::Configuration(err.to_string()))?;
        let collections = self.resolve_collections(config).await?;

        let mut record = BackupRecord::pending(
            Uuid::new_v4(),
            Utc::now(),
            config.backup_type,
            collections,
            config.compression,
            pipeline.is_encrypted(),
            triggered_by,
            schedule_id,
        );
        self.lifecycle.begin(&record).await?;
        self.lifecycle.start(&mut record).await?;
        info!(
            backup_id = %record.id,
            backup_type = %record.backup_type,
            collections = record.collections.len(),
            "backup started"
        );

        let payload = match self.build_payload(&record, &pipeline).await {
            Ok(payload) => payload,
            Err(err) => {
                let message = format!("{err:#}");
                error!(backup_id = %record.id, error = %message, "backup failed");
                self.lifecycle
                    .finalize(&mut record, BackupStatus::Failed, Some(message))
                    .await?;
                return Ok(BackupResult::from(&record));
            }
        };

        record.size = payload.size;
        record.compressed_size = payload.bytes.len() as u64;
        record.checksum = checksum(&payload.bytes);
        record.document_counts = payload.envelope.document_counts.clone();
        for export in payload.exports.iter().filter(|e| e.is_failed()) {
            warn!(backup_id = %record.id, collection = export.name(), "collection missing from backup");
        }

        let object_path = record.object_path();
        let mut failures = Vec::new();
        for outcome in upload_all(&providers, &payload.bytes, &object_path).await {
            match outcome {
                UploadOutcome::Stored(location) => record.storage_locations.push(location),
                UploadOutcome::Failed { provider, error } => {
                    failures.push(format!("{provider}: {error}"));
                }
            }
        }

        let (status, error) = if !record.storage_locations.is_empty() {
            (BackupStatus::Success, None)
        } else if failures.is_empty() {
            (BackupStatus::Failed, Some(NO_PROVIDERS.to_owned()))
        } else {
            (BackupStatus::Failed, Some(failures.join("; ")))
        };
        self.lifecycle.finalize(&mut record, status, error).await?;

        Ok(BackupResult::from(&record))
    }

    async fn resolve_collections(&self, config: &BackupConfig) -> Result<Vec<String>> {
        if let Some(collections) = &config.collections {
            return Ok(collections.clone());
        }
        if config.backup_type == BackupType::Collections {
            return Err(EngineError::Configuration(
                "backup type `collections` requires a collection list".to_owned(),
            )
            .into());
        }
        if !self.settings.default_collections.is_empty() {
            return Ok(self.settings.default_collections.clone());
        }
        self.database
            .list_collections()
            .await
            .context("list source collections")
    }

    async fn build_payload(&self, record: &BackupRecord, pipeline: &Pipeline) -> Result<Payload> {
        let mut envelope = BackupEnvelope::new(record.id, record.created_at, record.backup_type);
        let exports =
            export_collections(self.database.as_ref(), &record.collections, &mut envelope).await;

        let json = envelope.to_json_bytes().context("serialize backup envelope")?;
        let bytes = pipeline.forward(&json).context("transform backup payload")?;
        Ok(Payload {
            size: json.len() as u64,
            bytes,
            exports,
            envelope,
        })
    }
}

async fn upload_all(
    providers: &[(String, Arc<dyn StorageProvider>)],
    bytes: &[u8],
    object_path: &str,
) -> Vec<UploadOutcome> {
    let mut outcomes = Vec::with_capacity(providers.len());
    for (name, provider) in providers {
        match provider.upload(bytes, object_path).await {
            Ok(stored) => {
                info!(provider = %name, path = %stored.path, "backup uploaded");
                outcomes.push(UploadOutcome::Stored(StorageLocation {
                    provider: name.clone(),
                    path: stored.path,
                    url: stored.url,
                }));
            }
            Err(err) => {
                let error = format!("{err:#}");
                warn!(provider = %name, error = %error, "backup upload failed");
                outcomes.push(UploadOutcome::Failed {
                    provider: name.clone(),
                    error,
                });
            }
        }
    }
    outcomes
}
