use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use docbackup_core::BackupRecord;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::store::MetadataStore;

const SELECT_COLUMNS: &str = "id, created_at, completed_at, backup_type, status, size_bytes,
     compressed_size_bytes, duration_ms, collections_json, document_counts_json, locations_json,
     checksum, encryption_enabled, compression, triggered_by, schedule_id, error";

/// SQLite-backed metadata store. Each method opens a fresh connection on the blocking pool.
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let store = Self { db_path };
        store.init_db()?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection> {
        Connection::open(&self.db_path).context("open metadata db")
    }

    fn init_db(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS backups (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                completed_at TEXT,
                backup_type TEXT NOT NULL,
                status TEXT NOT NULL,
                size_bytes INTEGER NOT NULL DEFAULT 0,
                compressed_size_bytes INTEGER NOT NULL DEFAULT 0,
                duration_ms INTEGER NOT NULL DEFAULT 0,
                collections_json TEXT NOT NULL,
                document_counts_json TEXT NOT NULL,
                locations_json TEXT NOT NULL,
                checksum TEXT NOT NULL DEFAULT '',
                encryption_enabled INTEGER NOT NULL,
                compression TEXT NOT NULL,
                triggered_by TEXT NOT NULL,
                schedule_id TEXT,
                error TEXT
            );
            CREATE INDEX IF NOT EXISTS backups_created_at ON backups (created_at);",
        )?;
        Ok(())
    }
}

/// Bound parameters in `SELECT_COLUMNS` order, JSON columns pre-encoded.
struct RecordRow {
    id: String,
    created_at: String,
    completed_at: Option<String>,
    backup_type: &'static str,
    status: &'static str,
    size: i64,
    compressed_size: i64,
    duration: i64,
    collections_json: String,
    document_counts_json: String,
    locations_json: String,
    checksum: String,
    encryption_enabled: bool,
    compression: &'static str,
    triggered_by: &'static str,
    schedule_id: Option<String>,
    error: Option<String>,
}

impl RecordRow {
    fn encode(record: &BackupRecord) -> Result<Self> {
        Ok(Self {
            id: record.id.to_string(),
            created_at: format_ts(record.created_at),
            completed_at: record.completed_at.map(format_ts),
            backup_type: record.backup_type.as_str(),
            status: record.status.as_str(),
            size: record.size as i64,
            compressed_size: record.compressed_size as i64,
            duration: record.duration as i64,
            collections_json: serde_json::to_string(&record.collections)?,
            document_counts_json: serde_json::to_string(&record.document_counts)?,
            locations_json: serde_json::to_string(&record.storage_locations)?,
            checksum: record.checksum.clone(),
            encryption_enabled: record.encryption_enabled,
            compression: record.compression.as_str(),
            triggered_by: record.triggered_by.as_str(),
            schedule_id: record.schedule_id.clone(),
            error: record.error.clone(),
        })
    }
}

#[async_trait::async_trait]
impl MetadataStore for SqliteStore {
    async fn insert_record(&self, record: &BackupRecord) -> Result<()> {
        let row = RecordRow::encode(record)?;
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).context("open metadata db")?;
            conn.execute(
                "INSERT INTO backups (id, created_at, completed_at, backup_type, status, size_bytes,
                 compressed_size_bytes, duration_ms, collections_json, document_counts_json,
                 locations_json, checksum, encryption_enabled, compression, triggered_by,
                 schedule_id, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    row.id,
                    row.created_at,
                    row.completed_at,
                    row.backup_type,
                    row.status,
                    row.size,
                    row.compressed_size,
                    row.duration,
                    row.collections_json,
                    row.document_counts_json,
                    row.locations_json,
                    row.checksum,
                    row.encryption_enabled,
                    row.compression,
                    row.triggered_by,
                    row.schedule_id,
                    row.error
                ],
            )
            .with_context(|| format!("insert backup {}", row.id))?;
            Ok(())
        })
        .await?
    }

    async fn update_record(&self, record: &BackupRecord) -> Result<()> {
        let row = RecordRow::encode(record)?;
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).context("open metadata db")?;
            let changed = conn.execute(
                "UPDATE backups SET completed_at = ?2, backup_type = ?3, status = ?4,
                 size_bytes = ?5, compressed_size_bytes = ?6, duration_ms = ?7,
                 collections_json = ?8, document_counts_json = ?9, locations_json = ?10,
                 checksum = ?11, encryption_enabled = ?12, compression = ?13, error = ?14
                 WHERE id = ?1 AND status IN ('pending', 'in_progress')",
                params![
                    row.id,
                    row.completed_at,
                    row.backup_type,
                    row.status,
                    row.size,
                    row.compressed_size,
                    row.duration,
                    row.collections_json,
                    row.document_counts_json,
                    row.locations_json,
                    row.checksum,
                    row.encryption_enabled,
                    row.compression,
                    row.error
                ],
            )?;
            if changed == 0 {
                bail!("backup {} is missing or already finalized", row.id);
            }
            Ok(())
        })
        .await?
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<BackupRecord>> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).context("open metadata db")?;
            let mut stmt =
                conn.prepare(&format!("SELECT {SELECT_COLUMNS} FROM backups WHERE id = ?1"))?;
            let found = stmt.query_row([id.to_string()], row_to_record).optional()?;
            Ok(found)
        })
        .await?
    }

    async fn list_records(&self) -> Result<Vec<BackupRecord>> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).context("open metadata db")?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM backups ORDER BY created_at DESC"
            ))?;
            let rows = stmt.query_map([], row_to_record)?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Into::into)
        })
        .await?
    }

    async fn delete_record(&self, id: Uuid) -> Result<bool> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).context("open metadata db")?;
            let removed = conn.execute("DELETE FROM backups WHERE id = ?1", [id.to_string()])?;
            Ok(removed > 0)
        })
        .await?
    }
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<BackupRecord> {
    let id: String = row.get(0)?;
    let created_at: String = row.get(1)?;
    let completed_at: Option<String> = row.get(2)?;
    let backup_type: String = row.get(3)?;
    let status: String = row.get(4)?;
    let collections_json: String = row.get(8)?;
    let counts_json: String = row.get(9)?;
    let locations_json: String = row.get(10)?;
    let compression: String = row.get(13)?;
    let triggered_by: String = row.get(14)?;

    Ok(BackupRecord {
        id: Uuid::parse_str(&id).map_err(|e| conversion_err(0, e))?,
        created_at: parse_ts(&created_at).map_err(|e| conversion_err(1, e))?,
        completed_at: completed_at
            .as_deref()
            .map(parse_ts)
            .transpose()
            .map_err(|e| conversion_err(2, e))?,
        backup_type: backup_type.parse().map_err(|e| conversion_err(3, e))?,
        status: status.parse().map_err(|e| conversion_err(4, e))?,
        size: row.get::<_, i64>(5)?.max(0) as u64,
        compressed_size: row.get::<_, i64>(6)?.max(0) as u64,
        duration: row.get::<_, i64>(7)?.max(0) as u64,
        collections: serde_json::from_str(&collections_json).map_err(|e| conversion_err(8, e))?,
        document_counts: serde_json::from_str(&counts_json).map_err(|e| conversion_err(9, e))?,
        storage_locations: serde_json::from_str(&locations_json)
            .map_err(|e| conversion_err(10, e))?,
        checksum: row.get(11)?,
        encryption_enabled: row.get(12)?,
        compression: compression.parse().map_err(|e| conversion_err(13, e))?,
        triggered_by: triggered_by.parse().map_err(|e| conversion_err(14, e))?,
        schedule_id: row.get(15)?,
        error: row.get(16)?,
    })
}

/// Fixed-width UTC timestamps so `ORDER BY created_at` sorts chronologically.
fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

fn conversion_err<E>(column: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
}
