use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use docbackup_core::Compression;
use serde::Deserialize;

const DEFAULT_ROOT: &str = "./data";
const DEFAULT_LISTEN: &str = "127.0.0.1:8088";

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub source: SourceConfig,
    pub backup: BackupSettings,
    pub security: SecurityConfig,
    /// Storage providers by logical name. A single `local` provider under
    /// `<root>/backups` is used when none are configured.
    pub providers: BTreeMap<String, ProviderConfig>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub root: Option<String>,
    pub database_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct SourceConfig {
    /// SQLite document database, defaults to `<root>/documents.db`.
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct BackupSettings {
    /// Exported when a request names none; empty means every collection.
    pub collections: Vec<String>,
    pub compression: Compression,
    pub encrypt: bool,
    pub encryption_key: Option<String>,
    /// Upload targets for CLI backups; empty means every registered provider.
    pub providers: Vec<String>,
    pub restore_batch_size: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct SecurityConfig {
    pub api_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderConfig {
    Local {
        /// Defaults to `<root>/backups`.
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        prefix: String,
    },
    S3 {
        bucket: String,
        #[serde(default = "default_region")]
        region: String,
        #[serde(default)]
        prefix: String,
        #[serde(default)]
        endpoint_url: Option<String>,
        #[serde(default)]
        force_path_style: bool,
    },
    Drive {
        folder_id: String,
        #[serde(default)]
        access_token: Option<String>,
        #[serde(default)]
        prefix: String,
        #[serde(default)]
        api_base: Option<String>,
    },
}

fn default_region() -> String {
    "us-east-1".to_owned()
}

impl Config {
    /// Overlays `DOCBACKUP_*` (and `DATABASE_URL`) values from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(root) = lookup("DOCBACKUP_ROOT") {
            self.storage.root = Some(root);
        }
        if let Some(listen) = lookup("DOCBACKUP_LISTEN") {
            self.server.listen = Some(listen);
        }
        if let Some(url) = lookup("DATABASE_URL") {
            self.storage.database_url = Some(url);
        }
        if let Some(path) = lookup("DOCBACKUP_SOURCE_PATH") {
            self.source.path = Some(path);
        }
        if let Some(key) = lookup("DOCBACKUP_ENCRYPTION_KEY") {
            self.backup.encryption_key = Some(key);
        }
        if let Some(token) = lookup("DOCBACKUP_API_TOKEN") {
            self.security.api_token = Some(token);
        }
        if let Some(token) = lookup("DOCBACKUP_DRIVE_ACCESS_TOKEN") {
            for provider in self.providers.values_mut() {
                if let ProviderConfig::Drive { access_token, .. } = provider {
                    access_token.get_or_insert_with(|| token.clone());
                }
            }
        }
    }

    pub fn root(&self) -> PathBuf {
        PathBuf::from(self.storage.root.as_deref().unwrap_or(DEFAULT_ROOT))
    }

    pub fn listen(&self) -> &str {
        self.server.listen.as_deref().unwrap_or(DEFAULT_LISTEN)
    }

    pub fn source_path(&self) -> PathBuf {
        match &self.source.path {
            Some(path) => PathBuf::from(path),
            None => self.root().join("documents.db"),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading config file {path:?}"))?;
    toml::from_str(&contents).with_context(|| format!("parsing config file {path:?}"))
}
