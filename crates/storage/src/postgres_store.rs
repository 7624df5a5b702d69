use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use docbackup_core::{BackupRecord, StorageLocation};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::store::MetadataStore;

const SELECT_COLUMNS: &str = "id, created_at, completed_at, backup_type, status, size_bytes,
     compressed_size_bytes, duration_ms, collections_json, document_counts_json, locations_json,
     checksum, encryption_enabled, compression, triggered_by, schedule_id, error";

/// Postgres-backed metadata store.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("connect to postgres")?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS backups (
                id UUID PRIMARY KEY,
                created_at TIMESTAMPTZ NOT NULL,
                completed_at TIMESTAMPTZ,
                backup_type TEXT NOT NULL,
                status TEXT NOT NULL,
                size_bytes BIGINT NOT NULL DEFAULT 0,
                compressed_size_bytes BIGINT NOT NULL DEFAULT 0,
                duration_ms BIGINT NOT NULL DEFAULT 0,
                collections_json JSONB NOT NULL,
                document_counts_json JSONB NOT NULL,
                locations_json JSONB NOT NULL,
                checksum TEXT NOT NULL DEFAULT '',
                encryption_enabled BOOLEAN NOT NULL,
                compression TEXT NOT NULL,
                triggered_by TEXT NOT NULL,
                schedule_id TEXT,
                error TEXT
            )",
        )
        .execute(&self.pool)
        .await
        .context("create backups table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS backups_created_at ON backups (created_at DESC)")
            .execute(&self.pool)
            .await
            .context("create backups index")?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl MetadataStore for PostgresStore {
    async fn insert_record(&self, record: &BackupRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO backups (id, created_at, completed_at, backup_type, status, size_bytes,
             compressed_size_bytes, duration_ms, collections_json, document_counts_json,
             locations_json, checksum, encryption_enabled, compression, triggered_by,
             schedule_id, error)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
        )
        .bind(record.id)
        .bind(record.created_at)
        .bind(record.completed_at)
        .bind(record.backup_type.as_str())
        .bind(record.status.as_str())
        .bind(record.size as i64)
        .bind(record.compressed_size as i64)
        .bind(record.duration as i64)
        .bind(Json(&record.collections))
        .bind(Json(&record.document_counts))
        .bind(Json(&record.storage_locations))
        .bind(&record.checksum)
        .bind(record.encryption_enabled)
        .bind(record.compression.as_str())
        .bind(record.triggered_by.as_str())
        .bind(&record.schedule_id)
        .bind(&record.error)
        .execute(&self.pool)
        .await
        .with_context(|| format!("insert backup {}", record.id))?;
        Ok(())
    }

    async fn update_record(&self, record: &BackupRecord) -> Result<()> {
        let result = sqlx::query(
            "UPDATE backups SET completed_at = $2, backup_type = $3, status = $4,
             size_bytes = $5, compressed_size_bytes = $6, duration_ms = $7,
             collections_json = $8, document_counts_json = $9, locations_json = $10,
             checksum = $11, encryption_enabled = $12, compression = $13, error = $14
             WHERE id = $1 AND status IN ('pending', 'in_progress')",
        )
        .bind(record.id)
        .bind(record.completed_at)
        .bind(record.backup_type.as_str())
        .bind(record.status.as_str())
        .bind(record.size as i64)
        .bind(record.compressed_size as i64)
        .bind(record.duration as i64)
        .bind(Json(&record.collections))
        .bind(Json(&record.document_counts))
        .bind(Json(&record.storage_locations))
        .bind(&record.checksum)
        .bind(record.encryption_enabled)
        .bind(record.compression.as_str())
        .bind(&record.error)
        .execute(&self.pool)
        .await
        .with_context(|| format!("update backup {}", record.id))?;

        if result.rows_affected() == 0 {
            bail!("backup {} is missing or already finalized", record.id);
        }
        Ok(())
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<BackupRecord>> {
        let row = sqlx::query(&format!("SELECT {SELECT_COLUMNS} FROM backups WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(pg_row_to_record).transpose()
    }

    async fn list_records(&self) -> Result<Vec<BackupRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM backups ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(pg_row_to_record).collect()
    }

    async fn delete_record(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM backups WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn pg_row_to_record(row: &PgRow) -> Result<BackupRecord> {
    let backup_type: String = row.try_get("backup_type")?;
    let status: String = row.try_get("status")?;
    let compression: String = row.try_get("compression")?;
    let triggered_by: String = row.try_get("triggered_by")?;
    let Json(collections): Json<Vec<String>> = row.try_get("collections_json")?;
    let Json(document_counts): Json<BTreeMap<String, u64>> = row.try_get("document_counts_json")?;
    let Json(storage_locations): Json<Vec<StorageLocation>> = row.try_get("locations_json")?;

    Ok(BackupRecord {
        id: row.try_get("id")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
        backup_type: backup_type.parse()?,
        status: status.parse()?,
        size: row.try_get::<i64, _>("size_bytes")?.max(0) as u64,
        compressed_size: row.try_get::<i64, _>("compressed_size_bytes")?.max(0) as u64,
        duration: row.try_get::<i64, _>("duration_ms")?.max(0) as u64,
        collections,
        document_counts,
        storage_locations,
        checksum: row.try_get("checksum")?,
        encryption_enabled: row.try_get("encryption_enabled")?,
        compression: compression.parse()?,
        triggered_by: triggered_by.parse()?,
        schedule_id: row.try_get("schedule_id")?,
        error: row.try_get("error")?,
    })
}
