use rsa::RsaPublicKey;
use std::io::{self, Write};
use zeroize::Zeroize;

use crate::block::{encode_block, encode_data, encode_skippable_header, Block, EndOfStream, StreamStart};
use crate::checksum::{Checksum, ChecksumKind};
use crate::crypto::aead::{EncryptWriter, AEAD_NONCE_LEN};
use crate::crypto::{self, ContentKey};
use crate::error::{Error, Result};
use crate::header::Version;
use crate::keys::KeyRegistry;

/// Default upper bound on the payload of one plain Data block: 1 MiB.
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 1024 * 1024;

/// Counter values must fit the 7-byte stream nonce.
const NONCE_COUNTER_LIMIT: u64 = 1 << (8 * AEAD_NONCE_LEN);

#[derive(Debug, Clone, Copy)]
pub struct WriterOptions {
    /// Checksum kind for streams opened after construction.
    pub checksum:       ChecksumKind,
    /// Largest Data block a single `write` on a plain stream produces.
    pub max_block_size: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            checksum:       ChecksumKind::Xxh64,
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
        }
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct Writer<W: Write> {
    inner:         W,
    /// The single in-flight block; written with one `write_all`.
    block:         Vec<u8>,
    keys:          KeyRegistry,
    options:       WriterOptions,
    nonce_counter: u64,
    stream_open:   bool,
    closed:        bool,
    err:           Option<Error>,
}

impl<W: Write> Writer<W> {
    pub fn new(inner: W) -> Result<Self> {
        Self::with_options(inner, WriterOptions::default())
    }

    /// Writes the version header immediately.
    pub fn with_options(mut inner: W, options: WriterOptions) -> Result<Self> {
        Version::CURRENT.write(&mut inner)?;
        Ok(Self {
            inner,
            block:         Vec::new(),
            keys:          KeyRegistry::new(),
            options:       WriterOptions {
                max_block_size: options.max_block_size.max(1),
                ..options
            },
            nonce_counter: 0,
            stream_open:   false,
            closed:        false,
            err:           None,
        })
    }

    /// Checksum kind for streams opened from now on.
    pub fn set_checksum(&mut self, kind: ChecksumKind) {
        self.options.checksum = kind;
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    // ── Keys ─────────────────────────────────────────────────────────────────

    /// Generate a content key and emit it in the clear.
    pub fn add_key_plain(&mut self) -> Result<()> {
        self.ready()?;
        let key = crypto::generate_content_key();
        let result = self.emit(&Block::PlainKey(key.to_vec()));
        self.block.zeroize();
        result?;
        self.keys.set_active(key);
        tracing::debug!("plain key block written");
        Ok(())
    }

    /// Generate a content key and emit it wrapped for `public`.
    pub fn add_key_encrypted(&mut self, public: &RsaPublicKey) -> Result<()> {
        self.ready()?;
        let key = crypto::generate_content_key();
        let wrapped = crypto::wrap_key(public, &key)
            .and_then(|wrapped| Ok((crypto::encode_public_key(public)?, wrapped)));
        let (public_key, wrapped) = match wrapped {
            Ok(parts) => parts,
            Err(e) => return Err(self.fail(e.into())),
        };
        self.emit(&Block::EncryptedKey { public_key, wrapped })?;
        self.keys.set_active(key);
        tracing::debug!("encrypted key block written");
        Ok(())
    }

    // ── Streams ──────────────────────────────────────────────────────────────

    pub fn add_unencrypted_stream(&mut self, name: &str, extra: &[u8]) -> Result<StreamWriter<'_, W>> {
        self.ready()?;
        let checksum = self.options.checksum;
        self.emit(&Block::PlainStream(StreamStart {
            name:  name.to_string(),
            extra: extra.to_vec(),
            checksum,
            nonce: Vec::new(),
        }))?;
        self.stream_open = true;
        tracing::debug!(name, ?checksum, "plain stream opened");
        let limit = self.options.max_block_size;
        Ok(StreamWriter {
            body: Some(StreamBody::Plain(DataBlocks::new(self, checksum, limit))),
        })
    }

    /// Requires an active content key; the stream gets a nonce never used
    /// before by this writer.
    pub fn add_encrypted_stream(&mut self, name: &str, extra: &[u8]) -> Result<StreamWriter<'_, W>> {
        self.ready()?;
        let key: ContentKey = match self.keys.active() {
            Some(k) => k.clone(),
            None => return Err(self.fail(Error::Usage("no content key for encrypted stream"))),
        };
        let nonce = self.next_nonce()?;
        let checksum = self.options.checksum;
        self.emit(&Block::EncryptedStream(StreamStart {
            name:  name.to_string(),
            extra: extra.to_vec(),
            checksum,
            nonce: nonce.to_vec(),
        }))?;
        self.stream_open = true;
        tracing::debug!(name, ?checksum, "encrypted stream opened");
        // Sealed segments arrive whole and stay one Data block each.
        let blocks = DataBlocks::new(self, checksum, usize::MAX);
        Ok(StreamWriter {
            body: Some(StreamBody::Encrypted(EncryptWriter::from_key(blocks, &key, &nonce))),
        })
    }

    // ── Out-of-band blocks ───────────────────────────────────────────────────

    /// Tell the consumer to abort with `message`.
    pub fn add_error(&mut self, message: &str) -> Result<()> {
        self.ready()?;
        self.emit(&Block::Error(message.to_string()))?;
        tracing::debug!(msg = message, "error block written");
        Ok(())
    }

    /// Emit a skippable extension block (`id < 0`) that readers without
    /// knowledge of `id` step over.
    pub fn add_extension(&mut self, id: i8, payload: &[u8]) -> Result<()> {
        self.ready()?;
        let len = match u32::try_from(payload.len()) {
            Ok(len) => len,
            Err(_) => return Err(self.fail(Error::Usage("extension payload exceeds u32::MAX bytes"))),
        };
        self.block.clear();
        let staged = encode_skippable_header(id, len, &mut self.block);
        if let Err(e) = staged {
            return Err(self.fail(e));
        }
        self.block.extend_from_slice(payload);
        self.flush_block()
    }

    /// Emit the EOF block and flush.  Repeated calls after a successful close
    /// are no-ops.
    pub fn close(&mut self) -> Result<()> {
        if let Some(e) = &self.err {
            return Err(e.clone());
        }
        if self.closed {
            return Ok(());
        }
        if self.stream_open {
            return Err(self.fail(Error::Usage("close called while a stream is open")));
        }
        self.emit(&Block::Eof)?;
        if let Err(e) = self.inner.flush() {
            return Err(self.fail(e.into()));
        }
        self.closed = true;
        tracing::debug!("container closed");
        Ok(())
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn ready(&mut self) -> Result<()> {
        if let Some(e) = &self.err {
            return Err(e.clone());
        }
        if self.closed {
            return Err(self.fail(Error::Usage("writer is closed")));
        }
        if self.stream_open {
            return Err(self.fail(Error::Usage("a stream is still open")));
        }
        Ok(())
    }

    /// Record `err` if it is the first failure; return it for propagation.
    fn fail(&mut self, err: Error) -> Error {
        if self.err.is_none() {
            self.err = Some(err.clone());
        }
        err
    }

    fn check(&self) -> Result<()> {
        match &self.err {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn emit(&mut self, block: &Block) -> Result<()> {
        self.block.clear();
        if let Err(e) = encode_block(block, &mut self.block) {
            return Err(self.fail(e));
        }
        self.flush_block()
    }

    fn emit_data(&mut self, data: &[u8]) -> Result<()> {
        self.check()?;
        self.block.clear();
        if let Err(e) = encode_data(data, &mut self.block) {
            return Err(self.fail(e));
        }
        tracing::trace!(len = data.len(), "data block");
        self.flush_block()
    }

    fn flush_block(&mut self) -> Result<()> {
        if let Err(e) = self.inner.write_all(&self.block) {
            return Err(self.fail(e.into()));
        }
        Ok(())
    }

    fn next_nonce(&mut self) -> Result<[u8; AEAD_NONCE_LEN]> {
        if self.nonce_counter >= NONCE_COUNTER_LIMIT {
            return Err(self.fail(Error::Usage("stream nonce space exhausted")));
        }
        let counter = self.nonce_counter.to_be_bytes();
        self.nonce_counter += 1;
        let mut nonce = [0u8; AEAD_NONCE_LEN];
        nonce.copy_from_slice(&counter[8 - AEAD_NONCE_LEN..]);
        Ok(nonce)
    }
}

// ── Stream handle ────────────────────────────────────────────────────────────

/// Data-block sink for one open stream; checksums exactly what it emits.
struct DataBlocks<'a, W: Write> {
    writer:   &'a mut Writer<W>,
    checksum: Checksum,
    /// Largest Data block one `write` emits.
    limit:    usize,
}

impl<'a, W: Write> DataBlocks<'a, W> {
    fn new(writer: &'a mut Writer<W>, kind: ChecksumKind, limit: usize) -> Self {
        Self { writer, checksum: Checksum::new(kind), limit }
    }

    fn finish(self) -> Result<()> {
        self.writer.check()?;
        self.writer.emit(&Block::EndOfStream(EndOfStream {
            checksum: self.checksum.kind(),
            digest:   self.checksum.finalize(),
        }))?;
        self.writer.stream_open = false;
        tracing::debug!("stream closed");
        Ok(())
    }
}

impl<W: Write> Write for DataBlocks<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let n = buf.len().min(self.limit);
        self.writer.emit_data(&buf[..n]).map_err(Error::into_io)?;
        self.checksum.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.check().map_err(Error::into_io)?;
        self.writer.inner.flush()
    }
}

enum StreamBody<'a, W: Write> {
    Plain(DataBlocks<'a, W>),
    Encrypted(EncryptWriter<DataBlocks<'a, W>>),
}

/// Handle for the one open stream of a [`Writer`].
///
/// Every `write` on a plain stream emits one Data block.  Encrypted streams
/// emit one Data block per sealed segment.  [`close`](StreamWriter::close)
/// must be called before the writer accepts further blocks.
pub struct StreamWriter<'a, W: Write> {
    body: Option<StreamBody<'a, W>>,
}

impl<W: Write> StreamWriter<'_, W> {
    /// Emit the End Of Stream block.  Idempotent.
    pub fn close(&mut self) -> Result<()> {
        let blocks = match self.body.take() {
            None => return Ok(()),
            Some(StreamBody::Plain(blocks)) => blocks,
            Some(StreamBody::Encrypted(sealer)) => sealer.finish()?,
        };
        blocks.finish()
    }

    pub fn is_closed(&self) -> bool {
        self.body.is_none()
    }
}

impl<W: Write> Write for StreamWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.body.as_mut() {
            None => Err(Error::Usage("write on a closed stream").into_io()),
            Some(StreamBody::Plain(blocks)) => blocks.write(buf),
            Some(StreamBody::Encrypted(sealer)) => {
                sealer.get_mut().writer.check().map_err(Error::into_io)?;
                sealer.write(buf)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.body.as_mut() {
            None => Ok(()),
            Some(StreamBody::Plain(blocks)) => blocks.flush(),
            Some(StreamBody::Encrypted(sealer)) => sealer.flush(),
        }
    }
}
