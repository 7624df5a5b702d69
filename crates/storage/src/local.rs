use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use crate::provider::{clean_rel_path, file_name, ObjectInfo, StorageProvider, StoredObject};

/// Filesystem-backed provider rooted at `<root>/<prefix>`.
#[derive(Debug, Clone)]
pub struct LocalProvider {
    base: PathBuf,
}

impl LocalProvider {
    pub fn new(root: impl Into<PathBuf>, prefix: &str) -> Self {
        let root = root.into();
        let prefix = prefix.trim_matches('/');
        let base = if prefix.is_empty() {
            root
        } else {
            root.join(prefix)
        };
        Self { base }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn resolve(&self, rel_path: &str) -> Result<PathBuf> {
        let rel = clean_rel_path(rel_path)?;
        Ok(rel.split('/').fold(self.base.clone(), |acc, seg| acc.join(seg)))
    }
}

#[async_trait::async_trait]
impl StorageProvider for LocalProvider {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn upload(&self, bytes: &[u8], rel_path: &str) -> Result<StoredObject> {
        let target = self.resolve(rel_path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .with_context(|| format!("write backup object {}", target.display()))?;

        Ok(StoredObject {
            path: clean_rel_path(rel_path)?,
            url: Some(format!("file://{}", target.display())),
        })
    }

    async fn download(&self, rel_path: &str) -> Result<Vec<u8>> {
        let source = self.resolve(rel_path)?;
        tokio::fs::read(&source)
            .await
            .with_context(|| format!("read backup object {}", source.display()))
    }

    async fn delete(&self, rel_path: &str) -> Result<()> {
        let target = self.resolve(rel_path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("delete backup object {}", target.display())),
        }
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<ObjectInfo>> {
        let base = self.base.clone();
        let prefix = prefix.unwrap_or_default().trim_start_matches('/').to_owned();
        tokio::task::spawn_blocking(move || walk_objects(&base, &prefix)).await?
    }

    async fn exists(&self, rel_path: &str) -> Result<bool> {
        let target = self.resolve(rel_path)?;
        let found = tokio::fs::try_exists(&target)
            .await
            .with_context(|| format!("stat backup object {}", target.display()))?;
        Ok(found && target.is_file())
    }
}

fn walk_objects(base: &Path, prefix: &str) -> Result<Vec<ObjectInfo>> {
    if !base.exists() {
        return Ok(Vec::new());
    }

    let mut objects = Vec::new();
    for entry in WalkDir::new(base).follow_links(false) {
        let entry = entry.with_context(|| format!("walk {}", base.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(base)
            .with_context(|| format!("relativize {}", entry.path().display()))?;
        let path = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if !path.starts_with(prefix) {
            continue;
        }
        let meta = entry
            .metadata()
            .with_context(|| format!("stat {}", entry.path().display()))?;
        objects.push(ObjectInfo {
            name: file_name(&path),
            size: meta.len(),
            last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
            path,
        });
    }
    objects.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(objects)
}
