use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};

use crate::provider::{
    clean_rel_path, file_name, join_prefix, strip_prefix, ObjectInfo, StorageProvider,
    StoredObject,
};

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub prefix: String,
    /// For MinIO / LocalStack style endpoints.
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
}

/// Object-storage provider; credentials come from the standard AWS chain.
pub struct S3Provider {
    client: Client,
    config: S3Config,
}

impl S3Provider {
    pub async fn new(config: S3Config) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
            config,
        }
    }

    fn key(&self, rel_path: &str) -> Result<String> {
        Ok(join_prefix(&self.config.prefix, &clean_rel_path(rel_path)?))
    }
}

#[async_trait::async_trait]
impl StorageProvider for S3Provider {
    fn kind(&self) -> &'static str {
        "s3"
    }

    async fn upload(&self, bytes: &[u8], rel_path: &str) -> Result<StoredObject> {
        let key = self.key(rel_path)?;
        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .body(ByteStream::from(bytes.to_vec()))
            .send()
            .await
            .with_context(|| format!("put s3://{}/{key}", self.config.bucket))?;

        Ok(StoredObject {
            path: clean_rel_path(rel_path)?,
            url: Some(format!("s3://{}/{key}", self.config.bucket)),
        })
    }

    async fn download(&self, rel_path: &str) -> Result<Vec<u8>> {
        let key = self.key(rel_path)?;
        let response = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .send()
            .await
            .with_context(|| format!("get s3://{}/{key}", self.config.bucket))?;
        let body = response
            .body
            .collect()
            .await
            .context("read s3 object body")?
            .into_bytes();
        Ok(body.to_vec())
    }

    async fn delete(&self, rel_path: &str) -> Result<()> {
        // S3 DeleteObject already succeeds for absent keys.
        let key = self.key(rel_path)?;
        self.client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .send()
            .await
            .with_context(|| format!("delete s3://{}/{key}", self.config.bucket))?;
        Ok(())
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<ObjectInfo>> {
        let wanted = join_prefix(
            &self.config.prefix,
            prefix.unwrap_or_default().trim_start_matches('/'),
        );
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.config.bucket)
                .prefix(&wanted)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .with_context(|| format!("list s3://{}/{wanted}", self.config.bucket))?;

            for object in response.contents() {
                let Some(key) = object.key() else { continue };
                let Some(path) = strip_prefix(&self.config.prefix, key) else {
                    continue;
                };
                objects.push(ObjectInfo {
                    name: file_name(path),
                    path: path.to_owned(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                    last_modified: object
                        .last_modified()
                        .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos())),
                });
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_owned());
                }
                _ => break,
            }
        }
        Ok(objects)
    }

    async fn exists(&self, rel_path: &str) -> Result<bool> {
        let key = self.key(rel_path)?;
        match self
            .client
            .head_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(false)
                } else {
                    Err(service_error).with_context(|| format!("head s3://{}/{key}", self.config.bucket))
                }
            }
        }
    }
}
