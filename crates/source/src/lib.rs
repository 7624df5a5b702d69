//! Source document database contract.
//!
//! The backup engine reads whole collections through [`DocumentDatabase`]
//! and replays records through batched writes capped at
//! [`MAX_BATCH_WRITES`] operations per commit.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use docbackup_core::{Document, ID_FIELD};
use serde_json::{Map, Value};
use thiserror::Error;

pub use memory::MemoryDatabase;
pub use sqlite::SqliteDatabase;

/// Hard ceiling on operations in a single commit.
pub const MAX_BATCH_WRITES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace the stored record wholesale.
    Replace,
    /// Union top-level fields into the stored record, keeping absent ones.
    Merge,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteOp {
    pub collection: String,
    pub document: Document,
    pub mode: WriteMode,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("write batch is full ({MAX_BATCH_WRITES} operations)")]
    Full,
}

/// Ordered writes committed together.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(
        &mut self,
        collection: impl Into<String>,
        document: Document,
        mode: WriteMode,
    ) -> Result<(), BatchError> {
        if self.ops.len() >= MAX_BATCH_WRITES {
            return Err(BatchError::Full);
        }
        self.ops.push(WriteOp {
            collection: collection.into(),
            document,
            mode,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

#[async_trait::async_trait]
pub trait DocumentDatabase: Send + Sync {
    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Every record of a collection, ordered by id. Unknown collections are empty.
    async fn fetch_all(&self, collection: &str) -> Result<Vec<Document>>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Applies every operation of the batch, in order, as one unit.
    async fn commit(&self, batch: WriteBatch) -> Result<()>;
}

/// Field map that results from applying `incoming` on top of `existing`.
/// The reserved `id` key is never part of the result.
pub fn apply_write(
    existing: Option<Map<String, Value>>,
    incoming: &Map<String, Value>,
    mode: WriteMode,
) -> Map<String, Value> {
    let mut next = match (mode, existing) {
        (WriteMode::Merge, Some(mut current)) => {
            for (key, value) in incoming {
                current.insert(key.clone(), value.clone());
            }
            current
        }
        _ => incoming.clone(),
    };
    next.remove(ID_FIELD);
    next
}
