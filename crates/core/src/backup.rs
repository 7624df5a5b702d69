use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BackupType {
    #[default]
    Full,
    /// Accepted for compatibility; exported exactly like `Full`.
    Incremental,
    Collections,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Pending,
    InProgress,
    Success,
    Failed,
    Partial,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    Gzip,
    /// Raw DEFLATE stream, no archive container.
    Zip,
    Zstd,
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    #[default]
    Manual,
    Scheduled,
}

#[derive(Debug, Error)]
#[error("unknown {kind}: {value:?}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("backup {id}: illegal status transition {from} -> {to}")]
pub struct StatusTransitionError {
    pub id: Uuid,
    pub from: BackupStatus,
    pub to: BackupStatus,
}

macro_rules! string_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ParseEnumError;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                match raw {
                    $($text => Ok($ty::$variant),)+
                    other => Err(ParseEnumError {
                        kind: $kind,
                        value: other.to_owned(),
                    }),
                }
            }
        }
    };
}

string_enum!(BackupType, "backup type", {
    Full => "full",
    Incremental => "incremental",
    Collections => "collections",
});

string_enum!(BackupStatus, "backup status", {
    Pending => "pending",
    InProgress => "in_progress",
    Success => "success",
    Failed => "failed",
    Partial => "partial",
});

string_enum!(Compression, "compression", {
    Gzip => "gzip",
    Zip => "zip",
    Zstd => "zstd",
    None => "none",
});

string_enum!(TriggeredBy, "trigger", {
    Manual => "manual",
    Scheduled => "scheduled",
});

impl BackupStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BackupStatus::Success | BackupStatus::Failed | BackupStatus::Partial
        )
    }

    /// Terminal states never move again; pending may skip straight to a terminal state.
    pub fn can_transition_to(&self, next: BackupStatus) -> bool {
        match self {
            BackupStatus::Pending => next != BackupStatus::Pending,
            BackupStatus::InProgress => next.is_terminal(),
            _ => false,
        }
    }
}

impl Compression {
    pub fn file_extension(&self) -> &'static str {
        match self {
            Compression::Gzip => "json.gz",
            Compression::Zip => "json.zz",
            Compression::Zstd => "json.zst",
            Compression::None => "json",
        }
    }
}

/// One stored copy of a backup's bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageLocation {
    pub provider: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Metadata describing one backup run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    pub status: BackupStatus,
    pub size: u64,
    pub compressed_size: u64,
    pub duration: u64,
    pub collections: Vec<String>,
    pub document_counts: BTreeMap<String, u64>,
    pub storage_locations: Vec<StorageLocation>,
    pub checksum: String,
    pub encryption_enabled: bool,
    pub compression: Compression,
    pub triggered_by: TriggeredBy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BackupRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn pending(
        id: Uuid,
        created_at: DateTime<Utc>,
        backup_type: BackupType,
        collections: Vec<String>,
        compression: Compression,
        encryption_enabled: bool,
        triggered_by: TriggeredBy,
        schedule_id: Option<String>,
    ) -> Self {
        Self {
            id,
            created_at,
            completed_at: None,
            backup_type,
            status: BackupStatus::Pending,
            size: 0,
            compressed_size: 0,
            duration: 0,
            collections,
            document_counts: BTreeMap::new(),
            storage_locations: Vec::new(),
            checksum: String::new(),
            encryption_enabled,
            compression,
            triggered_by,
            schedule_id,
            error: None,
        }
    }

    pub fn transition(&mut self, next: BackupStatus) -> Result<(), StatusTransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(StatusTransitionError {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn location_for(&self, provider: &str) -> Option<&StorageLocation> {
        self.storage_locations
            .iter()
            .find(|loc| loc.provider == provider)
    }

    /// Backend-relative object path for this backup's payload.
    pub fn object_path(&self) -> String {
        object_path(self.id, self.created_at, self.compression)
    }
}

/// `<year>/<MM>/<id>_<timestamp>.<ext>` with `:` and `.` in the timestamp replaced by `-`.
pub fn object_path(id: Uuid, created_at: DateTime<Utc>, compression: Compression) -> String {
    let stamp = created_at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!(
        "{}/{}/{}_{}.{}",
        created_at.format("%Y"),
        created_at.format("%m"),
        id,
        stamp,
        compression.file_extension()
    )
}

/// Returned from `create_backup`, mirroring the finalized record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupResult {
    pub id: Uuid,
    pub status: BackupStatus,
    pub size: u64,
    pub compressed_size: u64,
    pub duration: u64,
    pub collections: Vec<String>,
    pub document_counts: BTreeMap<String, u64>,
    pub storage_locations: Vec<StorageLocation>,
    pub checksum: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&BackupRecord> for BackupResult {
    fn from(record: &BackupRecord) -> Self {
        Self {
            id: record.id,
            status: record.status,
            size: record.size,
            compressed_size: record.compressed_size,
            duration: record.duration,
            collections: record.collections.clone(),
            document_counts: record.document_counts.clone(),
            storage_locations: record.storage_locations.clone(),
            checksum: record.checksum.clone(),
            error: record.error.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupFilter {
    #[serde(default, rename = "type")]
    pub backup_type: Option<BackupType>,
    #[serde(default)]
    pub status: Option<BackupStatus>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl BackupFilter {
    pub fn matches(&self, record: &BackupRecord) -> bool {
        self.backup_type.is_none_or(|t| t == record.backup_type)
            && self.status.is_none_or(|s| s == record.status)
    }

    /// Sorts newest-first, then filters and truncates.
    pub fn apply(&self, mut records: Vec<BackupRecord>) -> Vec<BackupRecord> {
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let filtered = records.into_iter().filter(|r| self.matches(r));
        match self.limit {
            Some(limit) => filtered.take(limit).collect(),
            None => filtered.collect(),
        }
    }
}
