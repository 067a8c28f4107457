//! Key registry — the "currently active" content key of one reader or writer.
//!
//! Only the most recently observed key block applies to streams declared
//! after it.  Wrapped keys are opened with an explicit private key or with a
//! resolver that maps the block's public key to a private key.  When neither
//! yields one, the reader's undecryptable-stream policy decides whether that
//! is fatal.

use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::crypto::{self, ContentKey, CryptoError};
use crate::error::Result;

/// Maps the public key on an Encrypted Key block to a matching private key.
/// `None` means "cannot decrypt this one", which is not itself an error.
pub type PrivateKeyResolver = Box<dyn FnMut(&RsaPublicKey) -> Option<RsaPrivateKey>>;

#[derive(Default)]
pub enum PrivateKeySource {
    #[default]
    None,
    Key(RsaPrivateKey),
    Resolver(PrivateKeyResolver),
}

/// What to do with encrypted streams whose key cannot be recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UndecryptablePolicy {
    /// Silently advance past such streams.
    pub skip:    bool,
    /// Hand them to the caller flagged as undecryptable.
    pub deliver: bool,
}

impl UndecryptablePolicy {
    pub fn tolerates(&self) -> bool {
        self.skip || self.deliver
    }
}

#[derive(Default)]
pub struct KeyRegistry {
    active:     Option<ContentKey>,
    source:     PrivateKeySource,
    pub policy: UndecryptablePolicy,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_private_key(&mut self, key: RsaPrivateKey) {
        self.source = PrivateKeySource::Key(key);
    }

    pub fn set_resolver(&mut self, resolver: PrivateKeyResolver) {
        self.source = PrivateKeySource::Resolver(resolver);
    }

    pub fn active(&self) -> Option<&ContentKey> {
        self.active.as_ref()
    }

    pub fn set_active(&mut self, key: ContentKey) {
        self.active = Some(key);
    }

    /// Plain Key block: the carried bytes become the active key.
    pub fn observe_plain(&mut self, key: &[u8]) -> Result<()> {
        self.active = Some(crypto::content_key_from_slice(key)?);
        tracing::debug!("plain content key activated");
        Ok(())
    }

    /// Encrypted Key block: unwrap with whatever private key is available.
    ///
    /// With no usable private key, or one that fails to open the wrapped key,
    /// the active key is cleared; that is an error unless the undecryptable
    /// policy tolerates it.
    pub fn observe_encrypted(&mut self, public_der: &[u8], wrapped: &[u8]) -> Result<()> {
        let public = crypto::parse_public_key(public_der)?;
        let private = match &mut self.source {
            PrivateKeySource::None => None,
            PrivateKeySource::Key(k) => {
                if k.to_public_key() == public {
                    Some(k.clone())
                } else {
                    None
                }
            }
            PrivateKeySource::Resolver(resolve) => resolve(&public),
        };

        self.active = None;
        match private {
            Some(private) => match crypto::unwrap_key(&private, wrapped) {
                Ok(key) => {
                    self.active = Some(key);
                    tracing::debug!("wrapped content key activated");
                    Ok(())
                }
                Err(e) if self.policy.tolerates() => {
                    tracing::warn!(error = %e, "wrapped content key did not open; following streams are undecryptable");
                    Ok(())
                }
                Err(e) => Err(e.into()),
            },
            None if self.policy.tolerates() => {
                tracing::warn!("no private key for wrapped content key; following streams are undecryptable");
                Ok(())
            }
            None => Err(CryptoError::NoPrivateKey.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ErrorKind};

    #[test]
    fn latest_plain_key_wins() {
        let mut keys = KeyRegistry::new();
        keys.observe_plain(&[1u8; 32]).unwrap();
        keys.observe_plain(&[2u8; 32]).unwrap();
        assert_eq!(**keys.active().unwrap(), [2u8; 32]);
    }

    #[test]
    fn plain_key_must_be_32_bytes() {
        let mut keys = KeyRegistry::new();
        let err = keys.observe_plain(&[1u8; 16]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Key);
        assert!(keys.active().is_none());
    }

    #[test]
    fn bad_public_key_is_format_error() {
        let mut keys = KeyRegistry::new();
        let err = keys.observe_encrypted(b"junk", b"junk").unwrap_err();
        assert!(matches!(err, Error::Crypto(CryptoError::InvalidPublicKey(_))));
        assert_eq!(err.kind(), ErrorKind::Format);
    }
}
