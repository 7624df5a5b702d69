use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use docbackup_core::{
    BackupFilter, BackupStatus, BackupType, Compression, Document, RestoreOptions, TriggeredBy,
};
use docbackup_engine::{BackupConfig, BackupEngine, EngineError};
use docbackup_source::{DocumentDatabase, MemoryDatabase, SqliteDatabase, WriteBatch};
use docbackup_storage::{
    LocalProvider, MetadataStore, ObjectInfo, ProviderRegistry, SqliteStore, StorageProvider,
    StoredObject,
};
use serde_json::{json, Value};

struct Harness {
    _tmp: tempfile::TempDir,
    local: Arc<LocalProvider>,
    metadata: Arc<dyn MetadataStore>,
    providers: Arc<ProviderRegistry>,
}

impl Harness {
    fn new() -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let local = Arc::new(LocalProvider::new(tmp.path().join("objects"), "backups"));
        let metadata: Arc<dyn MetadataStore> =
            Arc::new(SqliteStore::new(tmp.path().join("metadata.db")).expect("metadata store"));
        let providers = ProviderRegistry::new()
            .with("local", local.clone())
            .expect("register local")
            .with("broken", Arc::new(FailingProvider))
            .expect("register broken");
        Self {
            _tmp: tmp,
            local,
            metadata,
            providers: Arc::new(providers),
        }
    }

    fn engine(&self, database: Arc<dyn DocumentDatabase>) -> BackupEngine {
        BackupEngine::new(database, self.metadata.clone(), self.providers.clone())
    }
}

fn doc(value: Value) -> Document {
    serde_json::from_value(value).expect("document")
}

fn config(providers: &[&str]) -> BackupConfig {
    BackupConfig {
        storage_providers: providers.iter().map(|p| p.to_string()).collect(),
        ..BackupConfig::default()
    }
}

async fn seeded() -> Arc<MemoryDatabase> {
    let db = Arc::new(MemoryDatabase::new());
    db.insert_all("users", vec![doc(json!({"id": "u1", "name": "Ann"}))])
        .await;
    db.insert_all("orders", Vec::new()).await;
    db
}

struct FailingProvider;

#[async_trait::async_trait]
impl StorageProvider for FailingProvider {
    fn kind(&self) -> &'static str {
        "failing"
    }

    async fn upload(&self, _bytes: &[u8], _rel_path: &str) -> Result<StoredObject> {
        Err(anyhow!("bucket unreachable"))
    }

    async fn download(&self, _rel_path: &str) -> Result<Vec<u8>> {
        Err(anyhow!("bucket unreachable"))
    }

    async fn delete(&self, _rel_path: &str) -> Result<()> {
        Err(anyhow!("bucket unreachable"))
    }

    async fn list(&self, _prefix: Option<&str>) -> Result<Vec<ObjectInfo>> {
        Err(anyhow!("bucket unreachable"))
    }

    async fn exists(&self, _rel_path: &str) -> Result<bool> {
        Err(anyhow!("bucket unreachable"))
    }
}

/// Records the size of every committed batch.
#[derive(Default)]
struct CountingDatabase {
    inner: MemoryDatabase,
    commits: Mutex<Vec<usize>>,
}

#[async_trait::async_trait]
impl DocumentDatabase for CountingDatabase {
    async fn list_collections(&self) -> Result<Vec<String>> {
        self.inner.list_collections().await
    }

    async fn fetch_all(&self, collection: &str) -> Result<Vec<Document>> {
        self.inner.fetch_all(collection).await
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.inner.get(collection, id).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        self.commits.lock().expect("lock").push(batch.len());
        self.inner.commit(batch).await
    }
}

/// Fails every read and write touching the `broken` collection.
#[derive(Default)]
struct FlakyDatabase {
    inner: MemoryDatabase,
}

#[async_trait::async_trait]
impl DocumentDatabase for FlakyDatabase {
    async fn list_collections(&self) -> Result<Vec<String>> {
        self.inner.list_collections().await
    }

    async fn fetch_all(&self, collection: &str) -> Result<Vec<Document>> {
        if collection == "broken" {
            return Err(anyhow!("permission denied"));
        }
        self.inner.fetch_all(collection).await
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.inner.get(collection, id).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.ops().iter().any(|op| op.collection == "broken") {
            return Err(anyhow!("quota exceeded"));
        }
        self.inner.commit(batch).await
    }
}

#[tokio::test]
async fn backup_then_restore_into_empty_database() {
    let harness = Harness::new();
    let engine = harness.engine(seeded().await);

    let result = engine
        .create_backup(&config(&["local"]), TriggeredBy::Manual, None)
        .await
        .expect("backup");
    assert_eq!(result.status, BackupStatus::Success);
    assert_eq!(result.document_counts.get("users"), Some(&1));
    assert_eq!(result.document_counts.get("orders"), Some(&0));
    assert_eq!(result.storage_locations.len(), 1);
    assert_eq!(result.checksum.len(), 64);
    assert!(result.storage_locations[0].path.ends_with(".json"));

    let record = engine.get_backup(result.id).await.expect("record");
    assert_eq!(record.status, BackupStatus::Success);
    assert!(record.completed_at.is_some());
    assert_eq!(record.size, record.compressed_size);

    let target = Arc::new(MemoryDatabase::new());
    let outcome = harness
        .engine(target.clone())
        .restore_backup(result.id, &RestoreOptions::default(), "local", None)
        .await
        .expect("restore");
    assert!(outcome.success);
    assert_eq!(outcome.document_counts.get("users"), Some(&1));
    assert_eq!(outcome.document_counts.get("orders"), Some(&0));

    let ann = target
        .get("users", "u1")
        .await
        .expect("get")
        .expect("restored");
    assert_eq!(ann.fields.get("name"), Some(&json!("Ann")));
}

#[tokio::test]
async fn stored_bodies_with_an_id_key_round_trip() {
    let harness = Harness::new();
    let dir = tempfile::tempdir().expect("tempdir");
    let source_path = dir.path().join("source.db");
    let source = Arc::new(SqliteDatabase::open(source_path.clone()).expect("source db"));
    rusqlite::Connection::open(&source_path)
        .expect("conn")
        .execute(
            "INSERT INTO documents (collection, id, body) VALUES ('users', 'u1', ?1)",
            [r#"{"id":"u1","name":"Ann"}"#],
        )
        .expect("insert raw row");

    let result = harness
        .engine(source)
        .create_backup(
            &BackupConfig {
                compression: Compression::Gzip,
                ..config(&["local"])
            },
            TriggeredBy::Manual,
            None,
        )
        .await
        .expect("backup");
    assert_eq!(result.status, BackupStatus::Success);

    let target = Arc::new(SqliteDatabase::open(dir.path().join("target.db")).expect("target db"));
    let outcome = harness
        .engine(target.clone())
        .restore_backup(result.id, &RestoreOptions::default(), "local", None)
        .await
        .expect("restore");
    assert!(outcome.success, "{:?}", outcome.errors);
    assert_eq!(outcome.document_counts.get("users"), Some(&1));

    let ann = target
        .get("users", "u1")
        .await
        .expect("get")
        .expect("restored");
    assert_eq!(
        serde_json::to_value(&ann).expect("json"),
        json!({"id": "u1", "name": "Ann"})
    );
}

#[tokio::test]
async fn one_failing_provider_does_not_fail_the_backup() {
    let harness = Harness::new();
    let engine = harness.engine(seeded().await);

    let result = engine
        .create_backup(&config(&["broken", "local"]), TriggeredBy::Scheduled, Some("nightly".into()))
        .await
        .expect("backup");
    assert_eq!(result.status, BackupStatus::Success);
    assert_eq!(result.storage_locations.len(), 1);
    assert_eq!(result.storage_locations[0].provider, "local");

    let record = engine.get_backup(result.id).await.expect("record");
    assert_eq!(record.triggered_by, TriggeredBy::Scheduled);
    assert_eq!(record.schedule_id.as_deref(), Some("nightly"));
}

#[tokio::test]
async fn every_provider_failing_marks_the_backup_failed() {
    let harness = Harness::new();
    let engine = harness.engine(seeded().await);

    let result = engine
        .create_backup(&config(&["broken"]), TriggeredBy::Manual, None)
        .await
        .expect("backup");
    assert_eq!(result.status, BackupStatus::Failed);
    assert!(result.storage_locations.is_empty());
    let error = result.error.expect("error message");
    assert!(error.contains("bucket unreachable"), "{error}");

    let none = engine
        .create_backup(&config(&[]), TriggeredBy::Manual, None)
        .await
        .expect("backup");
    assert_eq!(none.status, BackupStatus::Failed);
    assert_eq!(none.error.as_deref(), Some("no storage providers available"));
}

#[tokio::test]
async fn configuration_errors_leave_no_record() {
    let harness = Harness::new();
    let engine = harness.engine(seeded().await);

    let err = engine
        .create_backup(&config(&["gdrive"]), TriggeredBy::Manual, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::ProviderNotRegistered(name)) if name == "gdrive"
    ));

    let mut keyless = config(&["local"]);
    keyless.encryption = true;
    let err = engine
        .create_backup(&keyless, TriggeredBy::Manual, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::Configuration(_))
    ));

    let mut unnamed = config(&["local"]);
    unnamed.backup_type = BackupType::Collections;
    let err = engine
        .create_backup(&unnamed, TriggeredBy::Manual, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::Configuration(_))
    ));

    let records = engine
        .list_backups(&BackupFilter::default())
        .await
        .expect("list");
    assert!(records.is_empty());
}

#[tokio::test]
async fn large_collections_restore_in_capped_batches() {
    let harness = Harness::new();
    let source = Arc::new(MemoryDatabase::new());
    source
        .insert_all(
            "events",
            (0..900)
                .map(|i| doc(json!({"id": format!("e{i:04}"), "seq": i})))
                .collect(),
        )
        .await;
    let result = harness
        .engine(source)
        .create_backup(&config(&["local"]), TriggeredBy::Manual, None)
        .await
        .expect("backup");

    let target = Arc::new(CountingDatabase::default());
    let outcome = harness
        .engine(target.clone())
        .restore_backup(result.id, &RestoreOptions::default(), "local", None)
        .await
        .expect("restore");
    assert!(outcome.success);
    assert_eq!(outcome.document_counts.get("events"), Some(&900));
    assert_eq!(*target.commits.lock().expect("lock"), vec![450, 450]);
    assert_eq!(target.inner.count("events").await, 900);
}

#[tokio::test]
async fn merge_keeps_fields_and_overwrite_replaces() {
    let harness = Harness::new();
    let source = Arc::new(MemoryDatabase::new());
    source
        .insert_all("users", vec![doc(json!({"id": "u1", "name": "Ann"}))])
        .await;
    let result = harness
        .engine(source)
        .create_backup(&config(&["local"]), TriggeredBy::Manual, None)
        .await
        .expect("backup");

    for (overwrite, expected) in [
        (false, json!({"id": "u1", "name": "Ann", "email": "ann@example.com"})),
        (true, json!({"id": "u1", "name": "Ann"})),
    ] {
        let target = Arc::new(MemoryDatabase::new());
        target
            .insert_all(
                "users",
                vec![doc(json!({"id": "u1", "name": "Old", "email": "ann@example.com"}))],
            )
            .await;
        let options = RestoreOptions {
            overwrite,
            ..RestoreOptions::default()
        };
        harness
            .engine(target.clone())
            .restore_backup(result.id, &options, "local", None)
            .await
            .expect("restore");

        let stored = target.get("users", "u1").await.expect("get").expect("present");
        assert_eq!(serde_json::to_value(&stored).expect("json"), expected);
    }
}

#[tokio::test]
async fn dry_run_reports_counts_without_writing() {
    let harness = Harness::new();
    let result = harness
        .engine(seeded().await)
        .create_backup(&config(&["local"]), TriggeredBy::Manual, None)
        .await
        .expect("backup");

    let target = Arc::new(CountingDatabase::default());
    let engine = harness.engine(target.clone());
    let options = RestoreOptions {
        dry_run: true,
        ..RestoreOptions::default()
    };
    for _ in 0..2 {
        let outcome = engine
            .restore_backup(result.id, &options, "local", None)
            .await
            .expect("dry run");
        assert!(outcome.success);
        assert!(outcome.dry_run);
        assert_eq!(outcome.document_counts.get("users"), Some(&1));
    }
    assert!(target.commits.lock().expect("lock").is_empty());
    assert_eq!(target.inner.count("users").await, 0);
}

#[tokio::test]
async fn requested_collections_missing_from_backup_are_reported() {
    let harness = Harness::new();
    let result = harness
        .engine(seeded().await)
        .create_backup(&config(&["local"]), TriggeredBy::Manual, None)
        .await
        .expect("backup");

    let target = Arc::new(MemoryDatabase::new());
    let options = RestoreOptions {
        collections: Some(vec!["users".into(), "invoices".into()]),
        ..RestoreOptions::default()
    };
    let outcome = harness
        .engine(target.clone())
        .restore_backup(result.id, &options, "local", None)
        .await
        .expect("restore");
    assert!(!outcome.success);
    assert_eq!(outcome.restored_collections, vec!["users"]);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].collection, "invoices");
    assert_eq!(target.count("orders").await, 0);
}

#[tokio::test]
async fn failing_collection_does_not_stop_the_others() {
    let harness = Harness::new();
    let source = seeded().await;
    source
        .insert_all("broken", vec![doc(json!({"id": "b1"}))])
        .await;
    let result = harness
        .engine(source)
        .create_backup(&config(&["local"]), TriggeredBy::Manual, None)
        .await
        .expect("backup");

    let target = Arc::new(FlakyDatabase::default());
    let outcome = harness
        .engine(target.clone())
        .restore_backup(result.id, &RestoreOptions::default(), "local", None)
        .await
        .expect("restore");
    assert!(!outcome.success);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].collection, "broken");
    assert!(outcome.errors[0].message.contains("quota exceeded"));
    assert_eq!(outcome.document_counts.get("users"), Some(&1));
    assert!(!outcome.document_counts.contains_key("broken"));
    assert_eq!(target.inner.count("users").await, 1);
}

#[tokio::test]
async fn unreadable_collection_is_exported_empty() {
    let harness = Harness::new();
    let source = Arc::new(FlakyDatabase::default());
    source
        .inner
        .insert_all("users", vec![doc(json!({"id": "u1"}))])
        .await;
    source
        .inner
        .insert_all("broken", vec![doc(json!({"id": "b1"}))])
        .await;

    let result = harness
        .engine(source)
        .create_backup(&config(&["local"]), TriggeredBy::Manual, None)
        .await
        .expect("backup");
    assert_eq!(result.status, BackupStatus::Success);
    assert_eq!(result.document_counts.get("broken"), Some(&0));
    assert_eq!(result.document_counts.get("users"), Some(&1));
}

#[tokio::test]
async fn encrypted_backups_need_the_key_to_restore() {
    let harness = Harness::new();
    let engine = harness.engine(seeded().await);
    let encrypted = BackupConfig {
        compression: Compression::Gzip,
        encryption: true,
        encryption_key: Some("correct horse".into()),
        ..config(&["local"])
    };
    let result = engine
        .create_backup(&encrypted, TriggeredBy::Manual, None)
        .await
        .expect("backup");
    assert_eq!(result.status, BackupStatus::Success);
    assert!(result.storage_locations[0].path.ends_with(".json.gz"));
    assert!(engine
        .get_backup(result.id)
        .await
        .expect("record")
        .encryption_enabled);

    let err = engine
        .restore_backup(result.id, &RestoreOptions::default(), "local", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::Configuration(_))
    ));

    let target = Arc::new(MemoryDatabase::new());
    let outcome = harness
        .engine(target.clone())
        .restore_backup(
            result.id,
            &RestoreOptions::default(),
            "local",
            Some("correct horse"),
        )
        .await
        .expect("restore");
    assert!(outcome.success);
    assert_eq!(target.count("users").await, 1);

    let wrong = engine
        .verify_backup(result.id, "local", Some("battery staple"))
        .await
        .expect("verify");
    assert!(!wrong.valid);
    assert_eq!(wrong.checksum, wrong.expected_checksum);
}

#[tokio::test]
async fn verify_detects_tampering() {
    let harness = Harness::new();
    let engine = harness.engine(seeded().await);
    let result = engine
        .create_backup(
            &BackupConfig {
                compression: Compression::Zstd,
                ..config(&["local"])
            },
            TriggeredBy::Manual,
            None,
        )
        .await
        .expect("backup");

    let clean = engine
        .verify_backup(result.id, "local", None)
        .await
        .expect("verify");
    assert!(clean.valid, "{:?}", clean.errors);
    assert_eq!(clean.checksum, result.checksum);
    assert_eq!(clean.size, result.compressed_size);

    let path = harness
        .local
        .base()
        .join(&result.storage_locations[0].path);
    let mut bytes = std::fs::read(&path).expect("read object");
    bytes.push(0);
    std::fs::write(&path, bytes).expect("tamper");

    let tampered = engine
        .verify_backup(result.id, "local", None)
        .await
        .expect("verify");
    assert!(!tampered.valid);
    assert_eq!(tampered.errors.len(), 2);
    assert_eq!(tampered.size, result.compressed_size + 1);

    let err = engine
        .verify_backup(result.id, "broken", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::LocationNotFound { .. })
    ));
}

#[tokio::test]
async fn delete_tolerates_missing_objects() {
    let harness = Harness::new();
    let engine = harness.engine(seeded().await);
    let result = engine
        .create_backup(&config(&["local"]), TriggeredBy::Manual, None)
        .await
        .expect("backup");

    let path = &result.storage_locations[0].path;
    assert!(harness.local.exists(path).await.expect("exists"));
    harness.local.delete(path).await.expect("remove object");

    engine.delete_backup(result.id).await.expect("delete");
    assert!(engine
        .list_backups(&BackupFilter::default())
        .await
        .expect("list")
        .is_empty());

    let err = engine.delete_backup(result.id).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::NotFound(id)) if *id == result.id
    ));
}

#[tokio::test]
async fn listing_is_newest_first_and_filterable() {
    let harness = Harness::new();
    let engine = harness.engine(seeded().await);

    let mut ids = Vec::new();
    for providers in [&["local"][..], &["broken"][..], &["local"][..]] {
        let result = engine
            .create_backup(&config(providers), TriggeredBy::Manual, None)
            .await
            .expect("backup");
        ids.push(result.id);
    }

    let all = engine
        .list_backups(&BackupFilter::default())
        .await
        .expect("list");
    let listed: Vec<_> = all.iter().map(|r| r.id).collect();
    assert_eq!(listed, vec![ids[2], ids[1], ids[0]]);

    let succeeded = engine
        .list_backups(&BackupFilter {
            status: Some(BackupStatus::Success),
            limit: Some(1),
            ..BackupFilter::default()
        })
        .await
        .expect("list");
    assert_eq!(succeeded.len(), 1);
    assert_eq!(succeeded[0].id, ids[2]);
}
