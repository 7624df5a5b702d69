use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of the bytes as stored, after compression and encryption.
pub fn checksum(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}
