use rsa::{RsaPrivateKey, RsaPublicKey};
use std::io::{self, Read, Write};

use crate::block::{Block, BlockReader, StreamStart};
use crate::checksum::{Checksum, ChecksumKind};
use crate::crypto::aead::{self, DecryptReader, AEAD_NONCE_LEN};
use crate::crypto::{ContentKey, CryptoError};
use crate::dump;
use crate::error::{Error, Result};
use crate::header::Version;
use crate::keys::{KeyRegistry, UndecryptablePolicy};

#[derive(Debug, Clone, Copy, Default)]
pub struct ReaderOptions {
    /// Advance silently past encrypted streams whose key is unavailable.
    pub skip_undecryptable:    bool,
    /// Return such streams flagged [`StreamKind::Undecryptable`].
    pub deliver_undecryptable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    InStream,
    Eof,
}

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct Reader<R: Read> {
    blocks:  BlockReader<R>,
    version: Version,
    keys:    KeyRegistry,
    state:   State,
    err:     Option<Error>,
}

impl<R: Read> Reader<R> {
    pub fn new(inner: R) -> Result<Self> {
        Self::with_options(inner, ReaderOptions::default())
    }

    /// Reads and checks the version header.
    pub fn with_options(inner: R, options: ReaderOptions) -> Result<Self> {
        let mut blocks = BlockReader::new(inner);
        let version = Version::read(&mut blocks)?;
        tracing::debug!(major = version.major, minor = version.minor, "container header read");

        let mut keys = KeyRegistry::new();
        keys.policy = UndecryptablePolicy {
            skip:    options.skip_undecryptable,
            deliver: options.deliver_undecryptable,
        };
        Ok(Self { blocks, version, keys, state: State::Idle, err: None })
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn set_private_key(&mut self, key: RsaPrivateKey) {
        self.keys.set_private_key(key);
    }

    /// Consulted for every Encrypted Key block; returning `None` means the
    /// key cannot be opened.
    pub fn set_private_key_resolver<F>(&mut self, resolver: F)
    where
        F: FnMut(&RsaPublicKey) -> Option<RsaPrivateKey> + 'static,
    {
        self.keys.set_resolver(Box::new(resolver));
    }

    pub fn set_skip_undecryptable(&mut self, skip: bool) {
        self.keys.policy.skip = skip;
    }

    pub fn set_deliver_undecryptable(&mut self, deliver: bool) {
        self.keys.policy.deliver = deliver;
    }

    pub fn get_ref(&self) -> &R {
        self.blocks.get_ref()
    }

    pub fn into_inner(self) -> R {
        self.blocks.into_inner()
    }

    /// Advance to the next stream.
    ///
    /// Returns `Ok(None)` once the EOF block has been read, and on every call
    /// after that.  The previous stream must have been read to its end or
    /// skipped.  Any failure is sticky: later calls return the same error.
    pub fn next_stream(&mut self) -> Result<Option<Stream<'_, R>>> {
        self.check()?;
        match self.state {
            State::Eof => return Ok(None),
            State::InStream => {
                return Err(self.fail(Error::Usage("next_stream called while a stream is open")))
            }
            State::Idle => {}
        }

        loop {
            let block = self.blocks.next_block().map_err(|e| self.fail(e))?;
            match block {
                Block::PlainKey(key) => {
                    self.keys.observe_plain(&key).map_err(|e| self.fail(e))?;
                }
                Block::EncryptedKey { public_key, wrapped } => {
                    self.keys
                        .observe_encrypted(&public_key, &wrapped)
                        .map_err(|e| self.fail(e))?;
                }
                Block::PlainStream(start) => {
                    tracing::debug!(name = %start.name, "plain stream");
                    self.state = State::InStream;
                    let source = BlockSource::new(self, &start.name, start.checksum);
                    return Ok(Some(Stream::new(start, false, StreamBody::Plain(source))));
                }
                Block::EncryptedStream(start) => {
                    let key: Option<ContentKey> = self.keys.active().cloned();
                    match key {
                        Some(key) => {
                            let nonce = <[u8; AEAD_NONCE_LEN]>::try_from(start.nonce.as_slice())
                                .map_err(|_| {
                                    self.fail(
                                        CryptoError::InvalidNonceLength {
                                            expected: aead::nonce_size(),
                                            found:    start.nonce.len(),
                                        }
                                        .into(),
                                    )
                                })?;
                            tracing::debug!(name = %start.name, "encrypted stream");
                            self.state = State::InStream;
                            let source = BlockSource::new(self, &start.name, start.checksum);
                            let opener = DecryptReader::from_key(source, &key, &nonce);
                            return Ok(Some(Stream::new(start, true, StreamBody::Encrypted(opener))));
                        }
                        None if self.keys.policy.skip => {
                            tracing::warn!(name = %start.name, "skipping undecryptable stream");
                            self.state = State::InStream;
                            BlockSource::new(self, &start.name, start.checksum).drain()?;
                        }
                        None if self.keys.policy.deliver => {
                            tracing::warn!(name = %start.name, "delivering undecryptable stream");
                            self.state = State::InStream;
                            let source = BlockSource::new(self, &start.name, start.checksum);
                            return Ok(Some(Stream::new(
                                start,
                                true,
                                StreamBody::Undecryptable(source),
                            )));
                        }
                        None => return Err(self.fail(CryptoError::NoActiveKey.into())),
                    }
                }
                Block::Eof => {
                    tracing::debug!("end of container");
                    self.state = State::Eof;
                    return Ok(None);
                }
                Block::Error(message) => return Err(self.fail(Error::Producer(message))),
                other => {
                    return Err(self.fail(Error::UnexpectedBlock {
                        found:   other.id().name(),
                        context: "outside a stream",
                    }))
                }
            }
        }
    }

    /// Write one JSON object per remaining block to `sink`, up to and
    /// including the EOF or Error block.  Key material is never printed.
    pub fn debug_dump<W: Write>(&mut self, sink: W) -> Result<()> {
        self.check()?;
        let result = dump::dump_blocks(&mut self.blocks, sink);
        self.state = State::Eof;
        result.map_err(|e| self.fail(e))
    }

    fn check(&self) -> Result<()> {
        match &self.err {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn fail(&mut self, err: Error) -> Error {
        if self.err.is_none() {
            self.err = Some(err.clone());
        }
        err
    }
}

// ── Stream handle ────────────────────────────────────────────────────────────

/// Data blocks of the current stream as one contiguous byte source.
///
/// The checksum covers the Data-block bytes exactly as carried.  It is
/// checked against the End Of Stream block, after which the reader is idle
/// again.
struct BlockSource<'a, R: Read> {
    reader:   &'a mut Reader<R>,
    name:     String,
    checksum: Checksum,
    block:    Vec<u8>,
    pos:      usize,
    done:     bool,
}

impl<'a, R: Read> BlockSource<'a, R> {
    fn new(reader: &'a mut Reader<R>, name: &str, kind: ChecksumKind) -> Self {
        Self {
            reader,
            name: name.to_string(),
            checksum: Checksum::new(kind),
            block: Vec::new(),
            pos: 0,
            done: false,
        }
    }

    /// Load the next Data block; `false` at End Of Stream.
    fn next_data(&mut self) -> Result<bool> {
        if self.done {
            return Ok(false);
        }
        self.reader.check()?;
        let block = self.reader.blocks.next_block().map_err(|e| self.reader.fail(e))?;
        match block {
            Block::Data(data) => {
                tracing::trace!(len = data.len(), "data block");
                self.checksum.update(&data);
                self.block = data;
                self.pos = 0;
                Ok(true)
            }
            Block::EndOfStream(end) => {
                self.checksum
                    .verify(&self.name, end.checksum, &end.digest)
                    .map_err(|e| self.reader.fail(e))?;
                self.done = true;
                self.block.clear();
                self.pos = 0;
                self.reader.state = State::Idle;
                tracing::debug!(name = %self.name, "stream finished");
                Ok(false)
            }
            Block::Error(message) => Err(self.reader.fail(Error::Producer(message))),
            other => Err(self.reader.fail(Error::UnexpectedBlock {
                found:   other.id().name(),
                context: "inside a stream",
            })),
        }
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos >= self.block.len() {
            if !self.next_data()? {
                return Ok(0);
            }
        }
        let n = (self.block.len() - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.block[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    /// Discard everything up to End Of Stream, still verifying the checksum.
    fn drain(&mut self) -> Result<()> {
        while self.next_data()? {}
        Ok(())
    }
}

impl<R: Read> Read for BlockSource<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_bytes(buf).map_err(Error::into_io)
    }
}

enum StreamBody<'a, R: Read> {
    Plain(BlockSource<'a, R>),
    Encrypted(DecryptReader<BlockSource<'a, R>>),
    Undecryptable(BlockSource<'a, R>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Plain,
    Encrypted,
    /// Encrypted, but no content key was available.  Only [`Stream::skip`]
    /// succeeds on such a stream.
    Undecryptable,
}

/// One stream of a container, borrowed from its [`Reader`].
pub struct Stream<'a, R: Read> {
    pub name:           String,
    pub extra:          Vec<u8>,
    pub sent_encrypted: bool,
    checksum:           ChecksumKind,
    body:               StreamBody<'a, R>,
}

impl<'a, R: Read> Stream<'a, R> {
    fn new(start: StreamStart, sent_encrypted: bool, body: StreamBody<'a, R>) -> Self {
        Self {
            name: start.name,
            extra: start.extra,
            sent_encrypted,
            checksum: start.checksum,
            body,
        }
    }

    pub fn kind(&self) -> StreamKind {
        match self.body {
            StreamBody::Plain(_) => StreamKind::Plain,
            StreamBody::Encrypted(_) => StreamKind::Encrypted,
            StreamBody::Undecryptable(_) => StreamKind::Undecryptable,
        }
    }

    pub fn checksum_kind(&self) -> ChecksumKind {
        self.checksum
    }

    /// Read plaintext; `Ok(0)` once the stream's end has been verified.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match &mut self.body {
            StreamBody::Plain(source) => source.read_bytes(buf),
            StreamBody::Encrypted(opener) => match opener.read_plaintext(buf) {
                Ok(n) => Ok(n),
                Err(e) => Err(opener.get_mut().reader.fail(e)),
            },
            StreamBody::Undecryptable(_) => Err(CryptoError::NoActiveKey.into()),
        }
    }

    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = self.read(&mut buf)?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    /// Discard the rest of the stream without decrypting it.
    pub fn skip(&mut self) -> Result<()> {
        let source = match &mut self.body {
            StreamBody::Plain(source) | StreamBody::Undecryptable(source) => source,
            StreamBody::Encrypted(opener) => opener.get_mut(),
        };
        source.drain()
    }
}

impl<R: Read> Read for Stream<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Stream::read(self, buf).map_err(Error::into_io)
    }
}
