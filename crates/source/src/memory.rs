use std::collections::BTreeMap;

use anyhow::Result;
use docbackup_core::Document;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::{apply_write, DocumentDatabase, WriteBatch};

type Collection = BTreeMap<String, Map<String, Value>>;

/// In-process document database.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    collections: RwLock<BTreeMap<String, Collection>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a collection, replacing records with the same id.
    pub async fn insert_all(&self, collection: &str, documents: Vec<Document>) {
        let mut guard = self.collections.write().await;
        let target = guard.entry(collection.to_owned()).or_default();
        for doc in documents {
            let doc = Document::new(doc.id, doc.fields);
            target.insert(doc.id, doc.fields);
        }
    }

    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl DocumentDatabase for MemoryDatabase {
    async fn list_collections(&self) -> Result<Vec<String>> {
        Ok(self.collections.read().await.keys().cloned().collect())
    }

    async fn fetch_all(&self, collection: &str) -> Result<Vec<Document>> {
        let guard = self.collections.read().await;
        Ok(guard
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let guard = self.collections.read().await;
        Ok(guard
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| Document::new(id, fields.clone())))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        let mut guard = self.collections.write().await;
        for op in batch.into_ops() {
            let target = guard.entry(op.collection).or_default();
            let existing = target.remove(&op.document.id);
            let next = apply_write(existing, &op.document.fields, op.mode);
            target.insert(op.document.id, next);
        }
        Ok(())
    }
}
