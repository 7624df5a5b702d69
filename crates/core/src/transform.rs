//! Reversible compress→encrypt pipeline applied to serialized envelopes.
//!
//! Encryption is AES-256-CBC with PKCS#7 padding. The key is the SHA-256 of
//! the caller's passphrase and a fresh 16-byte IV is prepended to every
//! ciphertext. There is no authentication tag: tampering is only detected
//! by comparing the recorded checksum.

use std::io::{Cursor, Read, Write};

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use flate2::read::{DeflateDecoder, GzDecoder};
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression as Level;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::backup::Compression;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;

const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("encryption requested but no key was supplied")]
    MissingKey,
    #[error("{codec} compression failed: {source}")]
    Compress {
        codec: Compression,
        #[source]
        source: std::io::Error,
    },
    #[error("{codec} decompression failed: {source}")]
    Decompress {
        codec: Compression,
        #[source]
        source: std::io::Error,
    },
    #[error("decryption failed: {0}")]
    Decrypt(&'static str),
}

#[derive(Clone)]
pub struct EncryptionKey {
    bytes: [u8; KEY_LEN],
}

impl EncryptionKey {
    pub fn from_passphrase(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&digest);
        Self { bytes }
    }

    fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A configured transform: compression codec plus optional encryption key.
#[derive(Debug, Clone)]
pub struct Pipeline {
    compression: Compression,
    key: Option<EncryptionKey>,
}

impl Pipeline {
    pub fn new(
        compression: Compression,
        encryption: bool,
        passphrase: Option<&str>,
    ) -> Result<Self, TransformError> {
        let key = if encryption {
            let passphrase = passphrase
                .filter(|p| !p.is_empty())
                .ok_or(TransformError::MissingKey)?;
            Some(EncryptionKey::from_passphrase(passphrase))
        } else {
            None
        };
        Ok(Self { compression, key })
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn is_encrypted(&self) -> bool {
        self.key.is_some()
    }

    /// Compress, then encrypt.
    pub fn forward(&self, buf: &[u8]) -> Result<Vec<u8>, TransformError> {
        let compressed = compress(buf, self.compression)?;
        match &self.key {
            Some(key) => Ok(encrypt(&compressed, key)),
            None => Ok(compressed),
        }
    }

    /// Decrypt, then decompress.
    pub fn inverse(&self, buf: &[u8]) -> Result<Vec<u8>, TransformError> {
        let decrypted = match &self.key {
            Some(key) => decrypt(buf, key)?,
            None => buf.to_vec(),
        };
        decompress(&decrypted, self.compression)
    }
}

pub fn compress(buf: &[u8], codec: Compression) -> Result<Vec<u8>, TransformError> {
    let wrap = |source: std::io::Error| TransformError::Compress { codec, source };
    match codec {
        Compression::None => Ok(buf.to_vec()),
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Level::default());
            encoder.write_all(buf).map_err(wrap)?;
            encoder.finish().map_err(wrap)
        }
        Compression::Zip => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Level::default());
            encoder.write_all(buf).map_err(wrap)?;
            encoder.finish().map_err(wrap)
        }
        Compression::Zstd => zstd::encode_all(Cursor::new(buf), ZSTD_LEVEL).map_err(wrap),
    }
}

pub fn decompress(buf: &[u8], codec: Compression) -> Result<Vec<u8>, TransformError> {
    let wrap = |source: std::io::Error| TransformError::Decompress { codec, source };
    let mut out = Vec::new();
    match codec {
        Compression::None => return Ok(buf.to_vec()),
        Compression::Gzip => {
            GzDecoder::new(buf).read_to_end(&mut out).map_err(wrap)?;
        }
        Compression::Zip => {
            DeflateDecoder::new(buf).read_to_end(&mut out).map_err(wrap)?;
        }
        Compression::Zstd => {
            out = zstd::decode_all(buf).map_err(wrap)?;
        }
    }
    Ok(out)
}

/// Output layout: `iv (16 bytes) || ciphertext`.
pub fn encrypt(plaintext: &[u8], key: &EncryptionKey) -> Vec<u8> {
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    let ciphertext = Aes256CbcEnc::new(&(*key.as_bytes()).into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut out = Vec::with_capacity(IV_LEN + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    out
}

pub fn decrypt(buf: &[u8], key: &EncryptionKey) -> Result<Vec<u8>, TransformError> {
    if buf.len() < IV_LEN {
        return Err(TransformError::Decrypt("ciphertext shorter than IV"));
    }
    let (iv, body) = buf.split_at(IV_LEN);
    let mut iv_bytes = [0u8; IV_LEN];
    iv_bytes.copy_from_slice(iv);

    Aes256CbcDec::new(&(*key.as_bytes()).into(), &iv_bytes.into())
        .decrypt_padded_vec_mut::<Pkcs7>(body)
        .map_err(|_| TransformError::Decrypt("bad padding or wrong key"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CODECS: [Compression; 4] = [
        Compression::None,
        Compression::Gzip,
        Compression::Zip,
        Compression::Zstd,
    ];

    fn sample() -> Vec<u8> {
        let mut raw = br#"{"version":"1.0","data":{"users":[{"id":"u1","name":"Ann"}]}}"#.to_vec();
        raw.extend_from_slice(&[b'x'; 4096]);
        raw
    }

    #[test]
    fn inverse_undoes_forward_for_every_configuration() {
        let input = sample();
        for codec in CODECS {
            for passphrase in [None, Some("hunter2")] {
                let pipeline =
                    Pipeline::new(codec, passphrase.is_some(), passphrase).expect("pipeline");
                let stored = pipeline.forward(&input).expect("forward");
                let restored = pipeline.inverse(&stored).expect("inverse");
                assert_eq!(restored, input, "codec={codec} encrypted={}", passphrase.is_some());
            }
        }
    }

    #[test]
    fn compression_shrinks_repetitive_payloads() {
        let input = sample();
        for codec in [Compression::Gzip, Compression::Zip, Compression::Zstd] {
            let out = compress(&input, codec).expect("compress");
            assert!(out.len() < input.len(), "{codec} did not shrink payload");
        }
    }

    #[test]
    fn each_encryption_uses_a_fresh_iv() {
        let key = EncryptionKey::from_passphrase("secret");
        let one = encrypt(b"same plaintext", &key);
        let two = encrypt(b"same plaintext", &key);
        assert_ne!(one[..IV_LEN], two[..IV_LEN]);
        assert_ne!(one, two);
        assert_eq!(decrypt(&one, &key).expect("one"), b"same plaintext");
        assert_eq!(decrypt(&two, &key).expect("two"), b"same plaintext");
    }

    #[test]
    fn ciphertext_is_iv_plus_padded_blocks() {
        let key = EncryptionKey::from_passphrase("secret");
        let out = encrypt(&[0u8; 20], &key);
        assert_eq!(out.len(), IV_LEN + 32);
    }

    #[test]
    fn wrong_key_never_yields_the_plaintext() {
        let plaintext = sample();
        let stored = encrypt(&plaintext, &EncryptionKey::from_passphrase("right"));
        match decrypt(&stored, &EncryptionKey::from_passphrase("wrong")) {
            Ok(garbage) => assert_ne!(garbage, plaintext),
            Err(err) => assert!(matches!(err, TransformError::Decrypt(_))),
        }
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        let key = EncryptionKey::from_passphrase("secret");
        assert!(matches!(decrypt(&[1, 2, 3], &key), Err(TransformError::Decrypt(_))));
    }

    #[test]
    fn encryption_without_key_is_refused() {
        assert!(matches!(
            Pipeline::new(Compression::Gzip, true, None),
            Err(TransformError::MissingKey)
        ));
        assert!(matches!(
            Pipeline::new(Compression::Gzip, true, Some("")),
            Err(TransformError::MissingKey)
        ));
        let plain = Pipeline::new(Compression::Gzip, false, Some("ignored")).expect("pipeline");
        assert!(!plain.is_encrypted());
    }

    #[test]
    fn corrupt_gzip_is_a_decompress_error() {
        let err = decompress(b"definitely not gzip", Compression::Gzip).unwrap_err();
        assert!(matches!(err, TransformError::Decompress { codec: Compression::Gzip, .. }));
    }

    #[test]
    fn key_debug_output_is_redacted() {
        let key = EncryptionKey::from_passphrase("secret");
        assert!(format!("{key:?}").contains("REDACTED"));
    }
}
