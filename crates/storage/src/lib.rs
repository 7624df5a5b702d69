pub mod drive;
pub mod local;
pub mod postgres_store;
pub mod provider;
pub mod registry;
#[cfg(feature = "s3")]
pub mod s3;
pub mod sqlite_store;
pub mod store;

pub use drive::{DriveConfig, DriveProvider, DEFAULT_DRIVE_API};
pub use local::LocalProvider;
pub use postgres_store::PostgresStore;
pub use provider::{ObjectInfo, StorageProvider, StoredObject};
pub use registry::ProviderRegistry;
#[cfg(feature = "s3")]
pub use s3::{S3Config, S3Provider};
pub use sqlite_store::SqliteStore;
pub use store::{open_metadata_store, MetadataStore};
