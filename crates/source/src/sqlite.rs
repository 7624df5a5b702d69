use std::path::PathBuf;

use anyhow::{Context, Result};
use docbackup_core::Document;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use tracing::debug;

use crate::{apply_write, DocumentDatabase, WriteBatch};

/// Document database stored as JSON bodies in a single SQLite table.
pub struct SqliteDatabase {
    db_path: PathBuf,
}

impl SqliteDatabase {
    pub fn open(db_path: PathBuf) -> Result<Self> {
        let db = Self { db_path };
        db.init_db()?;
        Ok(db)
    }

    fn init_db(&self) -> Result<()> {
        let conn = Connection::open(&self.db_path).context("open document db")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            );",
        )?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl DocumentDatabase for SqliteDatabase {
    async fn list_collections(&self) -> Result<Vec<String>> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).context("open document db")?;
            let mut stmt =
                conn.prepare("SELECT DISTINCT collection FROM documents ORDER BY collection")?;
            let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Into::into)
        })
        .await?
    }

    async fn fetch_all(&self, collection: &str) -> Result<Vec<Document>> {
        let db_path = self.db_path.clone();
        let collection = collection.to_owned();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).context("open document db")?;
            let mut stmt =
                conn.prepare("SELECT id, body FROM documents WHERE collection = ?1 ORDER BY id")?;
            let rows = stmt
                .query_map([&collection], |r| {
                    Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(id, body)| {
                    let fields = parse_body(&body)
                        .with_context(|| format!("decode {collection}/{id}"))?;
                    Ok(Document::new(id, fields))
                })
                .collect()
        })
        .await?
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let db_path = self.db_path.clone();
        let collection = collection.to_owned();
        let id = id.to_owned();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).context("open document db")?;
            let body = load_body(&conn, &collection, &id)?;
            Ok(body.map(|fields| Document::new(id, fields)))
        })
        .await?
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&db_path).context("open document db")?;
            let tx = conn.transaction()?;
            let count = batch.len();
            for op in batch.into_ops() {
                let existing = load_body(&tx, &op.collection, &op.document.id)?;
                let next = apply_write(existing, &op.document.fields, op.mode);
                tx.execute(
                    "INSERT INTO documents (collection, id, body) VALUES (?1, ?2, ?3)
                     ON CONFLICT (collection, id) DO UPDATE SET body = excluded.body",
                    params![
                        op.collection,
                        op.document.id,
                        serde_json::to_string(&Value::Object(next))?
                    ],
                )?;
            }
            tx.commit().context("commit document batch")?;
            debug!(count, "document batch committed");
            Ok(())
        })
        .await?
    }
}

fn load_body(conn: &Connection, collection: &str, id: &str) -> Result<Option<Map<String, Value>>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
            [collection, id],
            |r| r.get(0),
        )
        .optional()?;
    raw.as_deref().map(parse_body).transpose()
}

fn parse_body(raw: &str) -> Result<Map<String, Value>> {
    Ok(serde_json::from_str(raw)?)
}
