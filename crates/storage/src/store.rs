use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use docbackup_core::BackupRecord;
use uuid::Uuid;

use crate::postgres_store::PostgresStore;
use crate::sqlite_store::SqliteStore;

/// Backup metadata persistence, implemented by both SQLite and Postgres backends.
#[async_trait::async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a new record (normally `pending`).
    async fn insert_record(&self, record: &BackupRecord) -> Result<()>;

    /// Overwrite a record that has not yet reached a terminal status.
    async fn update_record(&self, record: &BackupRecord) -> Result<()>;

    async fn get_record(&self, id: Uuid) -> Result<Option<BackupRecord>>;

    /// All records ordered by created_at DESC.
    async fn list_records(&self) -> Result<Vec<BackupRecord>>;

    /// Returns whether a record was removed.
    async fn delete_record(&self, id: Uuid) -> Result<bool>;
}

/// Postgres when a database URL is configured, SQLite under `<root>/state` otherwise.
pub async fn open_metadata_store(
    root: &Path,
    database_url: Option<&str>,
) -> Result<Arc<dyn MetadataStore>> {
    match database_url {
        Some(url) => Ok(Arc::new(PostgresStore::new(url).await?)),
        None => {
            let state_dir = root.join("state");
            tokio::fs::create_dir_all(&state_dir)
                .await
                .with_context(|| format!("create state directory {}", state_dir.display()))?;
            Ok(Arc::new(SqliteStore::new(state_dir.join("metadata.db"))?))
        }
    }
}
