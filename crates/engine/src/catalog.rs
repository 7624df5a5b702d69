use anyhow::Result;
use docbackup_core::{BackupFilter, BackupRecord};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::BackupEngine;

impl BackupEngine {
    /// Records newest first, filtered and truncated by `filter`.
    pub async fn list_backups(&self, filter: &BackupFilter) -> Result<Vec<BackupRecord>> {
        let records = self.lifecycle.store().list_records().await?;
        Ok(filter.apply(records))
    }

    pub async fn get_backup(&self, id: Uuid) -> Result<BackupRecord> {
        self.lifecycle
            .store()
            .get_record(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id).into())
    }

    /// Removes every stored copy, best effort, then the record itself.
    pub async fn delete_backup(&self, id: Uuid) -> Result<()> {
        let record = self.get_backup(id).await?;
        for location in &record.storage_locations {
            let Some(provider) = self.providers.get(&location.provider) else {
                warn!(backup_id = %id, provider = %location.provider, "provider not registered, leaving object behind");
                continue;
            };
            if let Err(err) = provider.delete(&location.path).await {
                warn!(
                    backup_id = %id,
                    provider = %location.provider,
                    path = %location.path,
                    error = %format!("{err:#}"),
                    "failed to delete backup object"
                );
            }
        }
        if !self.lifecycle.store().delete_record(id).await? {
            return Err(EngineError::NotFound(id).into());
        }
        info!(backup_id = %id, "backup deleted");
        Ok(())
    }
}
