//! Backup and restore orchestration over a document database.
//!
//! [`BackupEngine`] ties together a [`DocumentDatabase`] to read from and
//! write into, a [`MetadataStore`] that tracks every run, and a
//! [`ProviderRegistry`] of byte stores. Each call runs as one sequential
//! unit: collections one at a time, providers one at a time in request
//! order.
//!
//! Fatal problems surface as [`EngineError`] inside `anyhow::Error`;
//! per-collection and per-provider failures are reported in the returned
//! outcome instead.

pub mod backup;
pub mod catalog;
pub mod error;
pub mod exporter;
pub mod lifecycle;
pub mod restore;
pub mod verify;

use std::sync::Arc;

use anyhow::Result;
use docbackup_source::{DocumentDatabase, MAX_BATCH_WRITES};
use docbackup_storage::{MetadataStore, ProviderRegistry, StorageProvider};

pub use backup::{BackupConfig, UploadOutcome};
pub use error::EngineError;
pub use exporter::{export_collections, CollectionExport};
pub use lifecycle::MetadataLifecycle;

/// Writes per restore commit, kept under [`MAX_BATCH_WRITES`].
pub const RESTORE_BATCH_SIZE: usize = 450;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Exported when a backup request names no collections.
    /// Empty means every collection the database reports.
    pub default_collections: Vec<String>,
    pub restore_batch_size: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_collections: Vec::new(),
            restore_batch_size: RESTORE_BATCH_SIZE,
        }
    }
}

#[derive(Clone)]
pub struct BackupEngine {
    database: Arc<dyn DocumentDatabase>,
    lifecycle: MetadataLifecycle,
    providers: Arc<ProviderRegistry>,
    settings: EngineSettings,
}

impl BackupEngine {
    pub fn new(
        database: Arc<dyn DocumentDatabase>,
        metadata: Arc<dyn MetadataStore>,
        providers: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            database,
            lifecycle: MetadataLifecycle::new(metadata),
            providers,
            settings: EngineSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    fn provider(&self, name: &str) -> Result<Arc<dyn StorageProvider>> {
        self.providers
            .get(name)
            .ok_or_else(|| EngineError::ProviderNotRegistered(name.to_owned()).into())
    }

    fn restore_batch_size(&self) -> usize {
        self.settings.restore_batch_size.clamp(1, MAX_BATCH_WRITES)
    }
}

impl std::fmt::Debug for BackupEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupEngine")
            .field("providers", &self.providers)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
