use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Address of an uploaded object, relative to the provider's prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub path: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInfo {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Uniform contract over backup byte stores.
///
/// Every implementation namespaces its objects under a configured prefix so
/// several logical backup sets can share one physical store. Paths passed in
/// and returned are relative to that prefix.
#[async_trait::async_trait]
pub trait StorageProvider: Send + Sync {
    /// Short backend name for logs, e.g. `local` or `s3`.
    fn kind(&self) -> &'static str;

    async fn upload(&self, bytes: &[u8], rel_path: &str) -> Result<StoredObject>;

    async fn download(&self, rel_path: &str) -> Result<Vec<u8>>;

    /// Deleting an absent object succeeds.
    async fn delete(&self, rel_path: &str) -> Result<()>;

    /// Objects whose relative path starts with `prefix`, at any depth.
    async fn list(&self, prefix: Option<&str>) -> Result<Vec<ObjectInfo>>;

    async fn exists(&self, rel_path: &str) -> Result<bool>;
}

/// Normalizes a relative object path, rejecting traversal and empty segments.
pub fn clean_rel_path(rel_path: &str) -> Result<String> {
    let trimmed = rel_path.trim_start_matches('/');
    if trimmed.is_empty() {
        bail!("object path is empty");
    }
    for segment in trimmed.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\') {
            bail!("invalid object path: {rel_path:?}");
        }
    }
    Ok(trimmed.to_owned())
}

/// `prefix/rel`, or just `rel` when the prefix is blank.
pub fn join_prefix(prefix: &str, rel_path: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        rel_path.to_owned()
    } else {
        format!("{prefix}/{rel_path}")
    }
}

/// Inverse of [`join_prefix`]; `None` when `full` lies outside the prefix.
pub fn strip_prefix<'a>(prefix: &str, full: &'a str) -> Option<&'a str> {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        return Some(full);
    }
    full.strip_prefix(prefix)?.strip_prefix('/')
}

pub fn file_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_owned()
}
