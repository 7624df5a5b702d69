pub mod backup;
pub mod envelope;
pub mod hash;
pub mod report;
pub mod transform;

pub use backup::{
    object_path, BackupFilter, BackupRecord, BackupResult, BackupStatus, BackupType, Compression,
    ParseEnumError, StatusTransitionError, StorageLocation, TriggeredBy,
};
pub use envelope::{BackupEnvelope, Document, EnvelopeError, ENVELOPE_VERSION, ID_FIELD};
pub use hash::checksum;
pub use report::{CollectionError, RestoreOptions, RestoreOutcome, VerificationResult};
pub use transform::{EncryptionKey, Pipeline, TransformError};
