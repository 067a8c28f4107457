//! Content keys and their RSA envelope.
//!
//! Bulk stream data is encrypted under a random 32-byte content key (see
//! [`aead`]).  A content key travels either in the clear (Plain Key block)
//! or wrapped for one recipient:
//!
//! ```text
//! public key  : PKCS#1 DER RSAPublicKey
//! wrapped key : RSA-OAEP(SHA-512) ciphertext of the 32 key bytes
//! ```
//!
//! Wrapping and unwrapping are exposed as standalone functions so the
//! re-keying transcoder can compose them without a reader or writer.

pub mod aead;

use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs1::{DecodeRsaPublicKey, EncodeRsaPublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha512;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::error::ErrorKind;

/// Byte length of every content key.
pub const CONTENT_KEY_LEN: usize = 32;

pub type ContentKey = Zeroizing<[u8; CONTENT_KEY_LEN]>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected}, found {found}")]
    InvalidKeyLength { expected: usize, found: usize },
    #[error("invalid nonce length: expected {expected}, found {found}")]
    InvalidNonceLength { expected: usize, found: usize },
    #[error("invalid RSA public key: {0}")]
    InvalidPublicKey(String),
    #[error("key wrap failed: {0}")]
    Wrap(String),
    #[error("key unwrap failed: {0}")]
    Unwrap(String),
    #[error("no private key available for wrapped content key")]
    NoPrivateKey,
    #[error("no content key is active for encrypted stream")]
    NoActiveKey,
    #[error("key block rejected")]
    Rejected,
    #[error("stream authentication failed")]
    AuthFailed,
    #[error("truncated ciphertext")]
    Truncated,
}

impl CryptoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CryptoError::AuthFailed | CryptoError::Truncated => ErrorKind::Integrity,
            CryptoError::InvalidPublicKey(_) => ErrorKind::Format,
            _ => ErrorKind::Key,
        }
    }
}

/// Draw a fresh content key from the OS RNG.
pub fn generate_content_key() -> ContentKey {
    let mut key = Zeroizing::new([0u8; CONTENT_KEY_LEN]);
    OsRng.fill_bytes(key.as_mut());
    key
}

pub fn content_key_from_slice(bytes: &[u8]) -> Result<ContentKey, CryptoError> {
    if bytes.len() != CONTENT_KEY_LEN {
        return Err(CryptoError::InvalidKeyLength {
            expected: CONTENT_KEY_LEN,
            found:    bytes.len(),
        });
    }
    let mut key = Zeroizing::new([0u8; CONTENT_KEY_LEN]);
    key.copy_from_slice(bytes);
    Ok(key)
}

pub fn encode_public_key(public: &RsaPublicKey) -> Result<Vec<u8>, CryptoError> {
    public
        .to_pkcs1_der()
        .map(|der| der.as_bytes().to_vec())
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}

pub fn parse_public_key(der: &[u8]) -> Result<RsaPublicKey, CryptoError> {
    RsaPublicKey::from_pkcs1_der(der).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}

/// RSA-OAEP/SHA-512 encrypt a content key for `public`.
pub fn wrap_key(public: &RsaPublicKey, key: &[u8; CONTENT_KEY_LEN]) -> Result<Vec<u8>, CryptoError> {
    public
        .encrypt(&mut OsRng, Oaep::new::<Sha512>(), key)
        .map_err(|e| CryptoError::Wrap(e.to_string()))
}

/// Inverse of [`wrap_key`]; rejects plaintexts that are not 32 bytes.
pub fn unwrap_key(private: &RsaPrivateKey, wrapped: &[u8]) -> Result<ContentKey, CryptoError> {
    let plain = Zeroizing::new(
        private
            .decrypt(Oaep::new::<Sha512>(), wrapped)
            .map_err(|e| CryptoError::Unwrap(e.to_string()))?,
    );
    content_key_from_slice(&plain)
}
