//! Re-keying transcoder.
//!
//! Copies a container block by block and rewrites only key blocks, so that
//! changing who can decrypt a container costs one RSA operation per key
//! block regardless of payload size.  Stream starts, Data blocks, End Of
//! Stream blocks and skippable extensions are forwarded byte-for-byte; bulk
//! payload is never decrypted, re-encrypted or re-checksummed.

use rsa::{RsaPrivateKey, RsaPublicKey};
use std::io::{Read, Write};
use zeroize::Zeroizing;

use crate::block::{encode_block, Block, BlockHeader, BlockReader};
use crate::crypto::{self, CryptoError};
use crate::error::{Error, Result};
use crate::header::Version;
use crate::io_ext::copy_exact;

/// Decision returned by the rewrap function for one key block.
pub enum KeyAction {
    /// Forward the block unchanged.
    PassThrough,
    /// Abort the transcode with [`CryptoError::Rejected`].
    Reject,
    /// Open the wrapped key and emit it as a Plain Key block.
    Unwrap(RsaPrivateKey),
    /// Open the wrapped key with `private` and wrap it again for `public`.
    /// For Plain Key blocks (with `encrypt_all`) `private` is ignored.
    Rewrap {
        private: Option<RsaPrivateKey>,
        public:  RsaPublicKey,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReplaceKeysOptions {
    /// Offer Plain Key blocks to the rewrap function (with `None`) so they can
    /// be promoted to Encrypted Key blocks.
    pub encrypt_all:         bool,
    /// Forward Error blocks instead of failing on them.
    pub pass_through_errors: bool,
}

/// Transcode `src` into `dst`, consulting `rewrap` for every key block.
///
/// `rewrap` receives the public key of an Encrypted Key block, or `None`
/// for a Plain Key block when [`ReplaceKeysOptions::encrypt_all`] is set.
/// Returns after the EOF block has been copied and `dst` flushed.
pub fn replace_keys<W, R, F>(mut dst: W, src: R, mut rewrap: F, options: ReplaceKeysOptions) -> Result<()>
where
    W: Write,
    R: Read,
    F: FnMut(Option<&RsaPublicKey>) -> KeyAction,
{
    let mut blocks = BlockReader::new(src);
    let version = Version::read(&mut blocks)?;
    version.write(&mut dst)?;

    let mut rewritten = 0usize;
    loop {
        blocks.start_capture();
        let id = match blocks.read_header()? {
            BlockHeader::Skippable { len, .. } => {
                dst.write_all(&blocks.take_capture())?;
                copy_exact(&mut blocks, &mut dst, len as u64)?;
                continue;
            }
            BlockHeader::Mandatory(id) => id,
        };
        let block = blocks.read_payload(id)?;
        let raw = Zeroizing::new(blocks.take_capture());

        let replacement = match &block {
            Block::EncryptedKey { public_key, wrapped } => {
                let current = crypto::parse_public_key(public_key)?;
                replace_encrypted(rewrap(Some(&current)), &current, wrapped)?
            }
            Block::PlainKey(key) if options.encrypt_all => replace_plain(rewrap(None), key)?,
            Block::Error(message) if !options.pass_through_errors => {
                return Err(Error::Producer(message.clone()));
            }
            _ => None,
        };

        match replacement {
            Some(new_block) => {
                let mut out = Zeroizing::new(Vec::new());
                encode_block(&new_block, &mut out)?;
                dst.write_all(&out)?;
                rewritten += 1;
            }
            None => dst.write_all(&raw)?,
        }

        if let Block::Eof = block {
            dst.flush()?;
            tracing::debug!(rewritten, "re-keying finished");
            return Ok(());
        }
    }
}

fn replace_encrypted(action: KeyAction, current: &RsaPublicKey, wrapped: &[u8]) -> Result<Option<Block>> {
    match action {
        KeyAction::PassThrough => Ok(None),
        KeyAction::Reject => Err(CryptoError::Rejected.into()),
        KeyAction::Unwrap(private) => {
            let key = crypto::unwrap_key(&private, wrapped)?;
            tracing::debug!("wrapped key unwrapped to plain key block");
            Ok(Some(Block::PlainKey(key.to_vec())))
        }
        KeyAction::Rewrap { private: None, public } if public == *current => Ok(None),
        KeyAction::Rewrap { private, public } => {
            let private = private.ok_or(CryptoError::NoPrivateKey)?;
            let key = crypto::unwrap_key(&private, wrapped)?;
            tracing::debug!("wrapped key rewrapped for new recipient");
            Ok(Some(encrypted_key_block(&public, &key)?))
        }
    }
}

fn replace_plain(action: KeyAction, key: &[u8]) -> Result<Option<Block>> {
    match action {
        KeyAction::Rewrap { public, .. } => {
            let key = crypto::content_key_from_slice(key)?;
            tracing::debug!("plain key promoted to encrypted key block");
            Ok(Some(encrypted_key_block(&public, &key)?))
        }
        KeyAction::Reject => Err(CryptoError::Rejected.into()),
        KeyAction::PassThrough | KeyAction::Unwrap(_) => Ok(None),
    }
}

fn encrypted_key_block(public: &RsaPublicKey, key: &[u8; crypto::CONTENT_KEY_LEN]) -> Result<Block> {
    Ok(Block::EncryptedKey {
        public_key: crypto::encode_public_key(public)?,
        wrapped:    crypto::wrap_key(public, key)?,
    })
}
