use docbackup_core::BackupEnvelope;
use docbackup_source::DocumentDatabase;
use serde::Serialize;
use tracing::{debug, warn};

/// Result of reading one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CollectionExport {
    Exported { name: String, count: u64 },
    Failed { name: String, error: String },
}

impl CollectionExport {
    pub fn name(&self) -> &str {
        match self {
            CollectionExport::Exported { name, .. } | CollectionExport::Failed { name, .. } => name,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, CollectionExport::Failed { .. })
    }
}

/// Reads each collection into `envelope`, one at a time.
///
/// A collection that cannot be read is still added, with no documents.
pub async fn export_collections(
    database: &dyn DocumentDatabase,
    names: &[String],
    envelope: &mut BackupEnvelope,
) -> Vec<CollectionExport> {
    let mut outcomes = Vec::with_capacity(names.len());
    for name in names {
        match database.fetch_all(name).await {
            Ok(documents) => {
                let count = documents.len() as u64;
                debug!(collection = %name, count, "collection exported");
                envelope.push_collection(name.clone(), documents);
                outcomes.push(CollectionExport::Exported {
                    name: name.clone(),
                    count,
                });
            }
            Err(err) => {
                warn!(collection = %name, error = %format!("{err:#}"), "collection export failed");
                envelope.push_collection(name.clone(), Vec::new());
                outcomes.push(CollectionExport::Failed {
                    name: name.clone(),
                    error: format!("{err:#}"),
                });
            }
        }
    }
    outcomes
}
