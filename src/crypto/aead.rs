//! Segmented streaming AEAD (AES-256-GCM, STREAM-BE32 construction).
//!
//! Plaintext is cut into [`SEGMENT_SIZE`] segments.  Each segment is sealed
//! under a nonce made of the 7-byte stream nonce, a 32-bit big-endian
//! segment counter and a last-segment flag, so dropping trailing segments
//! (or reordering them) fails authentication instead of yielding a shorter
//! valid stream.
//!
//! ```text
//! ciphertext = seg_0 || seg_1 || ... || seg_last
//! seg_i      = AES-256-GCM(key, nonce || be32(i) || last_flag, plaintext_i) (len + 16)
//! ```
//!
//! Every segment except the last carries exactly `SEGMENT_SIZE` plaintext
//! bytes; the last carries `0..=SEGMENT_SIZE`.  An empty stream is one empty
//! last segment (16 bytes of tag).

use std::io::{self, Read, Write};

use aes_gcm::aead::stream::{DecryptorBE32, EncryptorBE32, Nonce, StreamBE32};
use aes_gcm::aead::KeyInit;
use aes_gcm::{Aes256Gcm, Key};
use zeroize::Zeroizing;

use crate::crypto::CryptoError;
use crate::error::Error;

pub const AEAD_KEY_LEN:   usize = 32;
/// 12-byte GCM nonce minus the 4-byte counter and 1-byte flag STREAM appends.
pub const AEAD_NONCE_LEN: usize = 7;
pub const AEAD_TAG_LEN:   usize = 16;
pub const SEGMENT_SIZE:   usize = 64 * 1024;

type StreamNonce = Nonce<Aes256Gcm, StreamBE32<Aes256Gcm>>;

/// Nonce length every encrypted stream must declare.
pub const fn nonce_size() -> usize {
    AEAD_NONCE_LEN
}

// ── Encryption ───────────────────────────────────────────────────────────────

/// Sealing adapter in front of a byte sink.
///
/// Each sealed segment reaches `inner` as a single `write_all`.  A full
/// segment is held back until more input arrives or [`finish`] is called,
/// because only then is it known whether it is the last one.
///
/// [`finish`]: EncryptWriter::finish
pub struct EncryptWriter<W: Write> {
    inner:     W,
    encryptor: Option<EncryptorBE32<Aes256Gcm>>,
    buffer:    Zeroizing<Vec<u8>>,
}

impl<W: Write> EncryptWriter<W> {
    pub fn new(inner: W, key: &[u8], nonce: &[u8]) -> Result<Self, CryptoError> {
        let cipher = new_cipher(key)?;
        let nonce = validate_nonce(nonce)?;
        Ok(Self::from_cipher(inner, cipher, &nonce))
    }

    /// Infallible constructor for callers that already hold exact-length
    /// key and nonce arrays.
    pub fn from_key(inner: W, key: &[u8; AEAD_KEY_LEN], nonce: &[u8; AEAD_NONCE_LEN]) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        Self::from_cipher(inner, cipher, StreamNonce::from_slice(nonce))
    }

    fn from_cipher(inner: W, cipher: Aes256Gcm, nonce: &StreamNonce) -> Self {
        Self {
            inner,
            encryptor: Some(EncryptorBE32::from_aead(cipher, nonce)),
            buffer:    Zeroizing::new(Vec::with_capacity(SEGMENT_SIZE)),
        }
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Seal the buffered tail as the last segment and hand back the sink.
    pub fn finish(mut self) -> io::Result<W> {
        let encryptor = self
            .encryptor
            .take()
            .ok_or_else(|| Error::Usage("stream encryptor already finished").into_io())?;
        let sealed = encryptor
            .encrypt_last(&self.buffer[..])
            .map_err(|_| Error::Crypto(CryptoError::AuthFailed).into_io())?;
        self.buffer.clear();
        self.inner.write_all(&sealed)?;
        Ok(self.inner)
    }

    fn seal_next(&mut self) -> io::Result<()> {
        let encryptor = self
            .encryptor
            .as_mut()
            .ok_or_else(|| Error::Usage("stream encryptor already finished").into_io())?;
        let sealed = encryptor
            .encrypt_next(&self.buffer[..])
            .map_err(|_| Error::Crypto(CryptoError::AuthFailed).into_io())?;
        self.buffer.clear();
        self.inner.write_all(&sealed)
    }
}

impl<W: Write> Write for EncryptWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut consumed = 0usize;
        while consumed < buf.len() {
            if self.buffer.len() == SEGMENT_SIZE {
                self.seal_next()?;
            }
            let take = (SEGMENT_SIZE - self.buffer.len()).min(buf.len() - consumed);
            self.buffer.extend_from_slice(&buf[consumed..consumed + take]);
            consumed += take;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// ── Decryption ───────────────────────────────────────────────────────────────

/// Opening adapter over a ciphertext source.
///
/// A segment is the last one when the source yields fewer than a full
/// sealed segment, or exactly a full one followed by end of input.
pub struct DecryptReader<R: Read> {
    reader:    R,
    decryptor: Option<DecryptorBE32<Aes256Gcm>>,
    buffer:    Zeroizing<Vec<u8>>,
    position:  usize,
    done:      bool,
    lookahead: Option<u8>,
}

impl<R: Read> DecryptReader<R> {
    pub fn new(reader: R, key: &[u8], nonce: &[u8]) -> Result<Self, CryptoError> {
        let cipher = new_cipher(key)?;
        let nonce = validate_nonce(nonce)?;
        Ok(Self::from_cipher(reader, cipher, &nonce))
    }

    pub fn from_key(reader: R, key: &[u8; AEAD_KEY_LEN], nonce: &[u8; AEAD_NONCE_LEN]) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        Self::from_cipher(reader, cipher, StreamNonce::from_slice(nonce))
    }

    fn from_cipher(reader: R, cipher: Aes256Gcm, nonce: &StreamNonce) -> Self {
        Self {
            reader,
            decryptor: Some(DecryptorBE32::from_aead(cipher, nonce)),
            buffer:    Zeroizing::new(Vec::new()),
            position:  0,
            done:      false,
            lookahead: None,
        }
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn read_plaintext(&mut self, out: &mut [u8]) -> Result<usize, Error> {
        if out.is_empty() {
            return Ok(0);
        }

        if self.position >= self.buffer.len() {
            self.fill_buffer()?;
        }

        if self.buffer.is_empty() {
            return Ok(0);
        }

        let remaining = self.buffer.len() - self.position;
        let to_copy = remaining.min(out.len());
        out[..to_copy].copy_from_slice(&self.buffer[self.position..self.position + to_copy]);
        self.position += to_copy;
        Ok(to_copy)
    }

    fn fill_buffer(&mut self) -> Result<(), Error> {
        self.buffer.clear();
        self.position = 0;
        if self.done {
            return Ok(());
        }

        let mut sealed = vec![0u8; SEGMENT_SIZE + AEAD_TAG_LEN];
        let mut read = 0usize;

        if let Some(byte) = self.lookahead.take() {
            sealed[0] = byte;
            read = 1;
        }

        while read < sealed.len() {
            let n = self.reader.read(&mut sealed[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        sealed.truncate(read);

        if sealed.len() < AEAD_TAG_LEN {
            return Err(CryptoError::Truncated.into());
        }

        let mut is_last = sealed.len() < SEGMENT_SIZE + AEAD_TAG_LEN;
        if !is_last {
            let mut probe = [0u8; 1];
            if self.reader.read(&mut probe)? == 0 {
                is_last = true;
            } else {
                self.lookahead = Some(probe[0]);
            }
        }

        let plaintext = if is_last {
            self.done = true;
            let decryptor = self.decryptor.take().ok_or(CryptoError::Truncated)?;
            decryptor
                .decrypt_last(&sealed[..])
                .map_err(|_| CryptoError::AuthFailed)?
        } else {
            let decryptor = self.decryptor.as_mut().ok_or(CryptoError::Truncated)?;
            decryptor
                .decrypt_next(&sealed[..])
                .map_err(|_| CryptoError::AuthFailed)?
        };

        self.buffer = Zeroizing::new(plaintext);
        Ok(())
    }
}

impl<R: Read> Read for DecryptReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        self.read_plaintext(out).map_err(Error::into_io)
    }
}

fn new_cipher(key: &[u8]) -> Result<Aes256Gcm, CryptoError> {
    if key.len() != AEAD_KEY_LEN {
        return Err(CryptoError::InvalidKeyLength {
            expected: AEAD_KEY_LEN,
            found:    key.len(),
        });
    }
    Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
        expected: AEAD_KEY_LEN,
        found:    key.len(),
    })
}

fn validate_nonce(nonce: &[u8]) -> Result<StreamNonce, CryptoError> {
    if nonce.len() != nonce_size() {
        return Err(CryptoError::InvalidNonceLength {
            expected: nonce_size(),
            found:    nonce.len(),
        });
    }
    Ok(StreamNonce::clone_from_slice(nonce))
}
