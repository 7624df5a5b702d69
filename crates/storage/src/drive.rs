use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use crate::provider::{
    clean_rel_path, file_name, join_prefix, strip_prefix, ObjectInfo, StorageProvider,
    StoredObject,
};

pub const DEFAULT_DRIVE_API: &str = "https://www.googleapis.com";

const FILE_FIELDS: &str = "id,name,size,modifiedTime,webViewLink";

#[derive(Debug, Clone)]
pub struct DriveConfig {
    /// Pre-issued OAuth bearer token.
    pub access_token: String,
    /// Folder that holds every object of this provider.
    pub folder_id: String,
    pub prefix: String,
    pub api_base: String,
}

/// Google Drive v3 provider. Drive has no directories in the object-store
/// sense, so the prefixed relative path is used verbatim as the file name
/// inside the configured folder.
pub struct DriveProvider {
    client: Client,
    config: DriveConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    modified_time: Option<DateTime<Utc>>,
    #[serde(default)]
    web_view_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

impl DriveProvider {
    pub fn new(config: DriveConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn object_name(&self, rel_path: &str) -> Result<String> {
        Ok(join_prefix(&self.config.prefix, &clean_rel_path(rel_path)?))
    }

    fn files_url(&self) -> String {
        format!("{}/drive/v3/files", self.config.api_base.trim_end_matches('/'))
    }

    async fn query(&self, q: &str) -> Result<Vec<DriveFile>> {
        let fields = format!("nextPageToken,files({FILE_FIELDS})");
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self
                .client
                .get(self.files_url())
                .bearer_auth(&self.config.access_token)
                .query(&[("q", q), ("fields", fields.as_str()), ("pageSize", "1000")]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let page: FileList = request
                .send()
                .await
                .context("query drive files")?
                .error_for_status()
                .context("drive file query rejected")?
                .json()
                .await
                .context("parse drive file list")?;
            files.extend(page.files);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => return Ok(files),
            }
        }
    }

    async fn find(&self, name: &str) -> Result<Option<DriveFile>> {
        let q = format!(
            "name = '{}' and '{}' in parents and trashed = false",
            escape_query(name),
            escape_query(&self.config.folder_id)
        );
        Ok(self.query(&q).await?.into_iter().next())
    }
}

#[async_trait::async_trait]
impl StorageProvider for DriveProvider {
    fn kind(&self) -> &'static str {
        "drive"
    }

    async fn upload(&self, bytes: &[u8], rel_path: &str) -> Result<StoredObject> {
        let name = self.object_name(rel_path)?;

        let file_id = match self.find(&name).await? {
            Some(existing) => existing.id,
            None => {
                let created: DriveFile = self
                    .client
                    .post(self.files_url())
                    .bearer_auth(&self.config.access_token)
                    .query(&[("fields", FILE_FIELDS)])
                    .json(&json!({ "name": name, "parents": [self.config.folder_id] }))
                    .send()
                    .await
                    .context("create drive file")?
                    .error_for_status()
                    .context("drive file creation rejected")?
                    .json()
                    .await
                    .context("parse created drive file")?;
                created.id
            }
        };

        let uploaded: DriveFile = self
            .client
            .patch(format!(
                "{}/upload/drive/v3/files/{}",
                self.config.api_base.trim_end_matches('/'),
                file_id
            ))
            .bearer_auth(&self.config.access_token)
            .query(&[("uploadType", "media"), ("fields", FILE_FIELDS)])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes.to_vec())
            .send()
            .await
            .with_context(|| format!("upload drive content for {name}"))?
            .error_for_status()
            .with_context(|| format!("drive upload rejected for {name}"))?
            .json()
            .await
            .context("parse drive upload response")?;

        Ok(StoredObject {
            path: clean_rel_path(rel_path)?,
            url: uploaded.web_view_link,
        })
    }

    async fn download(&self, rel_path: &str) -> Result<Vec<u8>> {
        let name = self.object_name(rel_path)?;
        let Some(file) = self.find(&name).await? else {
            bail!("drive object not found: {name}");
        };
        let bytes = self
            .client
            .get(format!("{}/{}", self.files_url(), file.id))
            .bearer_auth(&self.config.access_token)
            .query(&[("alt", "media")])
            .send()
            .await
            .with_context(|| format!("download drive object {name}"))?
            .error_for_status()
            .with_context(|| format!("drive download rejected for {name}"))?
            .bytes()
            .await
            .context("read drive download body")?;
        Ok(bytes.to_vec())
    }

    async fn delete(&self, rel_path: &str) -> Result<()> {
        let name = self.object_name(rel_path)?;
        let Some(file) = self.find(&name).await? else {
            return Ok(());
        };
        let resp = self
            .client
            .delete(format!("{}/{}", self.files_url(), file.id))
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .with_context(|| format!("delete drive object {name}"))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        resp.error_for_status()
            .with_context(|| format!("drive delete rejected for {name}"))?;
        Ok(())
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<ObjectInfo>> {
        let wanted = join_prefix(
            &self.config.prefix,
            prefix.unwrap_or_default().trim_start_matches('/'),
        );
        let mut q = format!(
            "'{}' in parents and trashed = false",
            escape_query(&self.config.folder_id)
        );
        if !wanted.is_empty() {
            q.push_str(&format!(" and name contains '{}'", escape_query(&wanted)));
        }

        let mut objects: Vec<ObjectInfo> = self
            .query(&q)
            .await?
            .into_iter()
            .filter(|f| f.name.starts_with(&wanted))
            .filter_map(|f| {
                let path = strip_prefix(&self.config.prefix, &f.name)?.to_owned();
                Some(ObjectInfo {
                    name: file_name(&path),
                    size: f.size.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0),
                    last_modified: f.modified_time,
                    path,
                })
            })
            .collect();
        objects.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(objects)
    }

    async fn exists(&self, rel_path: &str) -> Result<bool> {
        let name = self.object_name(rel_path)?;
        Ok(self.find(&name).await?.is_some())
    }
}

/// Escapes a literal for the Drive `q` search grammar.
fn escape_query(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('\'', "\\'")
}
