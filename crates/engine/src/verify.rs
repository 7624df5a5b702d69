use anyhow::{Context, Result};
use docbackup_core::{checksum, BackupEnvelope, Compression, Pipeline, VerificationResult};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::BackupEngine;

impl BackupEngine {
    /// Compares the stored bytes against the recorded checksum and size.
    ///
    /// Mismatches are reported, not raised. With a key, an encrypted backup
    /// is also decoded to catch a wrong key or a damaged payload.
    pub async fn verify_backup(
        &self,
        id: Uuid,
        provider_name: &str,
        key: Option<&str>,
    ) -> Result<VerificationResult> {
        let record = self.get_backup(id).await?;
        let location = record
            .location_for(provider_name)
            .ok_or_else(|| EngineError::LocationNotFound {
                id,
                provider: provider_name.to_owned(),
            })?;
        let provider = self.provider(provider_name)?;
        let stored = provider
            .download(&location.path)
            .await
            .with_context(|| format!("download {} from {provider_name}", location.path))?;

        let actual = checksum(&stored);
        let size = stored.len() as u64;
        let mut errors = Vec::new();
        if actual != record.checksum {
            errors.push(format!(
                "checksum mismatch: expected {}, got {actual}",
                record.checksum
            ));
        }
        if size != record.compressed_size {
            errors.push(format!(
                "size mismatch: expected {}, got {size}",
                record.compressed_size
            ));
        }

        if record.encryption_enabled {
            if let Some(key) = key.filter(|k| !k.is_empty()) {
                if let Err(err) = decode(record.compression, key, &stored) {
                    errors.push(format!("{err:#}"));
                }
            }
        }

        let result = VerificationResult {
            valid: errors.is_empty(),
            checksum: actual,
            expected_checksum: record.checksum.clone(),
            size,
            expected_size: record.compressed_size,
            errors,
        };
        if result.valid {
            info!(backup_id = %id, provider = provider_name, "backup verified");
        } else {
            warn!(backup_id = %id, provider = provider_name, errors = ?result.errors, "backup failed verification");
        }
        Ok(result)
    }
}

fn decode(compression: Compression, key: &str, stored: &[u8]) -> Result<BackupEnvelope> {
    let pipeline = Pipeline::new(compression, true, Some(key))?;
    let json = pipeline.inverse(stored).context("decode payload")?;
    BackupEnvelope::from_json_bytes(&json).context("parse payload")
}
