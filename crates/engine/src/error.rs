use thiserror::Error;
use uuid::Uuid;

/// Failures that abort an engine call before or instead of producing an outcome.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("storage provider {0:?} is not registered")]
    ProviderNotRegistered(String),
    #[error("backup {0} not found")]
    NotFound(Uuid),
    #[error("backup {id} has no copy in storage provider {provider:?}")]
    LocationNotFound { id: Uuid, provider: String },
}
