use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::backup::BackupType;

pub const ENVELOPE_VERSION: &str = "1.0";

/// Key reserved for [`Document::id`]; never kept inside `fields`.
pub const ID_FIELD: &str = "id";

/// A single record: its original id plus the remaining fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    /// Drops any `id` key from `fields`; the explicit id wins.
    pub fn new(id: impl Into<String>, mut fields: Map<String, Value>) -> Self {
        fields.remove(ID_FIELD);
        Self {
            id: id.into(),
            fields,
        }
    }
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed backup envelope")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported envelope version {0:?}")]
    UnsupportedVersion(String),
    #[error("collection {collection}: declared {declared} documents, found {actual}")]
    CountMismatch {
        collection: String,
        declared: u64,
        actual: u64,
    },
}

/// Versioned JSON wrapper for every exported collection of one backup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupEnvelope {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub backup_id: Uuid,
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    pub collections: Vec<String>,
    pub document_counts: BTreeMap<String, u64>,
    pub data: BTreeMap<String, Vec<Document>>,
}

impl BackupEnvelope {
    pub fn new(backup_id: Uuid, created_at: DateTime<Utc>, backup_type: BackupType) -> Self {
        Self {
            version: ENVELOPE_VERSION.to_owned(),
            created_at,
            backup_id,
            backup_type,
            collections: Vec::new(),
            document_counts: BTreeMap::new(),
            data: BTreeMap::new(),
        }
    }

    /// Appends a collection, keeping `document_counts` in step with `data`.
    pub fn push_collection(&mut self, name: impl Into<String>, documents: Vec<Document>) {
        let name = name.into();
        let documents: Vec<Document> = documents
            .into_iter()
            .map(|d| Document::new(d.id, d.fields))
            .collect();
        if !self.collections.contains(&name) {
            self.collections.push(name.clone());
        }
        self.document_counts
            .insert(name.clone(), documents.len() as u64);
        self.data.insert(name, documents);
    }

    pub fn documents(&self, collection: &str) -> &[Document] {
        self.data.get(collection).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses and validates.
    pub fn from_json_bytes(raw: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: Self = serde_json::from_slice(raw)?;
        envelope.validate()?;
        Ok(envelope)
    }

    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.version != ENVELOPE_VERSION {
            return Err(EnvelopeError::UnsupportedVersion(self.version.clone()));
        }
        for name in &self.collections {
            let declared = self.document_counts.get(name).copied().unwrap_or(0);
            let actual = self.documents(name).len() as u64;
            if declared != actual {
                return Err(EnvelopeError::CountMismatch {
                    collection: name.clone(),
                    declared,
                    actual,
                });
            }
        }
        Ok(())
    }
}
