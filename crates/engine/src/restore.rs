use std::collections::BTreeMap;
use std::time::Instant;

use anyhow::{Context, Result};
use docbackup_core::{
    BackupEnvelope, BackupRecord, CollectionError, Document, Pipeline, RestoreOptions,
    RestoreOutcome,
};
use docbackup_source::{WriteBatch, WriteMode};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::BackupEngine;

impl BackupEngine {
    /// Replays a stored backup into the document database.
    ///
    /// Collections are restored independently; one failing does not stop
    /// the others, and its error is reported in the outcome.
    pub async fn restore_backup(
        &self,
        id: Uuid,
        options: &RestoreOptions,
        provider_name: &str,
        key: Option<&str>,
    ) -> Result<RestoreOutcome> {
        let started = Instant::now();
        let record = self.get_backup(id).await?;
        let envelope = self.fetch_envelope(&record, provider_name, key).await?;

        let mut errors = Vec::new();
        let targets = match &options.collections {
            Some(requested) => {
                let mut targets = Vec::new();
                for name in requested {
                    if envelope.collections.contains(name) {
                        targets.push(name.clone());
                    } else {
                        errors.push(CollectionError {
                            collection: name.clone(),
                            message: "collection not present in backup".to_owned(),
                        });
                    }
                }
                targets
            }
            None => envelope.collections.clone(),
        };

        let mut restored = Vec::new();
        let mut document_counts = BTreeMap::new();
        if options.dry_run {
            for name in &targets {
                document_counts.insert(name.clone(), envelope.documents(name).len() as u64);
                restored.push(name.clone());
            }
        } else {
            let mode = if options.overwrite {
                WriteMode::Replace
            } else {
                WriteMode::Merge
            };
            for name in &targets {
                match self
                    .restore_collection(name, envelope.documents(name), mode)
                    .await
                {
                    Ok(count) => {
                        document_counts.insert(name.clone(), count);
                        restored.push(name.clone());
                    }
                    Err(err) => {
                        let message = format!("{err:#}");
                        warn!(backup_id = %id, collection = %name, error = %message, "collection restore failed");
                        errors.push(CollectionError {
                            collection: name.clone(),
                            message,
                        });
                    }
                }
            }
        }

        let outcome = RestoreOutcome {
            success: errors.is_empty(),
            dry_run: options.dry_run,
            restored_collections: restored,
            document_counts,
            duration: started.elapsed().as_millis() as u64,
            errors,
        };
        info!(
            backup_id = %id,
            provider = provider_name,
            dry_run = outcome.dry_run,
            success = outcome.success,
            "restore finished"
        );
        Ok(outcome)
    }

    /// Downloads, decodes and validates the envelope stored at `provider_name`.
    pub(crate) async fn fetch_envelope(
        &self,
        record: &BackupRecord,
        provider_name: &str,
        key: Option<&str>,
    ) -> Result<BackupEnvelope> {
        let location = record
            .location_for(provider_name)
            .ok_or_else(|| EngineError::LocationNotFound {
                id: record.id,
                provider: provider_name.to_owned(),
            })?;
        let provider = self.provider(provider_name)?;
        let pipeline = Pipeline::new(record.compression, record.encryption_enabled, key)
            .map_err(|err| EngineError::Configuration(err.to_string()))?;

        let stored = provider
            .download(&location.path)
            .await
            .with_context(|| format!("download {} from {provider_name}", location.path))?;
        let json = pipeline
            .inverse(&stored)
            .with_context(|| format!("decode backup {}", record.id))?;
        BackupEnvelope::from_json_bytes(&json)
            .with_context(|| format!("parse backup {}", record.id))
    }

    async fn restore_collection(
        &self,
        collection: &str,
        documents: &[Document],
        mode: WriteMode,
    ) -> Result<u64> {
        let batch_size = self.restore_batch_size();
        let mut written = 0u64;
        let mut batch = WriteBatch::new();
        for document in documents {
            batch.set(collection, document.clone(), mode)?;
            if batch.len() >= batch_size {
                let full = std::mem::take(&mut batch);
                let count = full.len() as u64;
                self.database
                    .commit(full)
                    .await
                    .with_context(|| format!("commit after {written} documents"))?;
                written += count;
            }
        }
        if !batch.is_empty() {
            let count = batch.len() as u64;
            self.database
                .commit(batch)
                .await
                .with_context(|| format!("commit after {written} documents"))?;
            written += count;
        }
        Ok(written)
    }
}
