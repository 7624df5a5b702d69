use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use docbackup_core::{BackupRecord, BackupStatus};
use docbackup_storage::MetadataStore;
use tracing::info;

/// Drives a record through pending → in_progress → terminal.
#[derive(Clone)]
pub struct MetadataLifecycle {
    store: Arc<dyn MetadataStore>,
}

impl MetadataLifecycle {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub async fn begin(&self, record: &BackupRecord) -> Result<()> {
        self.store
            .insert_record(record)
            .await
            .with_context(|| format!("persist pending backup {}", record.id))
    }

    pub async fn start(&self, record: &mut BackupRecord) -> Result<()> {
        record.transition(BackupStatus::InProgress)?;
        self.store.update_record(record).await
    }

    /// Moves to a terminal status and stamps completion time and duration.
    pub async fn finalize(
        &self,
        record: &mut BackupRecord,
        status: BackupStatus,
        error: Option<String>,
    ) -> Result<()> {
        record.transition(status)?;
        let completed_at = Utc::now();
        record.completed_at = Some(completed_at);
        record.duration = (completed_at - record.created_at)
            .num_milliseconds()
            .max(0) as u64;
        record.error = error;
        self.store
            .update_record(record)
            .await
            .with_context(|| format!("finalize backup {}", record.id))?;
        info!(
            backup_id = %record.id,
            status = %record.status,
            duration_ms = record.duration,
            "backup finalized"
        );
        Ok(())
    }
}
