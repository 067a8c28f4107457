//! Block codec — tagged framing for every unit in a container.
//!
//! # Framing
//! Each block starts with a signed 8-bit id.
//!
//! * `id > 0`: mandatory.  The id is followed by a MessagePack array whose
//!   elements are the block's fields in a fixed order.  A decoder reads the
//!   fields it knows and skips any further trailing elements, so a minor
//!   version may append optional fields without breaking old readers.
//!   An id this build does not know is a hard format error.
//! * `id < 0`: skippable extension.  The id is followed by a little-endian
//!   `u32` byte length and that many opaque bytes.  Every decoder can step
//!   over it without understanding it.
//!
//! # Field layouts
//! ```text
//! 1 PlainKey        [key: bin(32)]
//! 2 EncryptedKey    [public_key_der: bin, wrapped_key: bin]
//! 3 EncryptedStream [name: str, extra: bin, checksum: uint, nonce: bin]
//! 4 PlainStream     [name: str, extra: bin, checksum: uint]
//! 5 Data            [data: bin]
//! 6 EndOfStream     [checksum: uint, digest: bin]
//! 7 Eof             []
//! 8 Error           [message: str]
//! ```
//!
//! The codec knows nothing about what keys, nonces or digests mean; that
//! belongs to the key registry and the reader/writer state machines.

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use rmp::decode::{MarkerReadError, NumValueReadError, ValueReadError};
use rmp::encode::ValueWriteError;
use rmp::Marker;
use std::io::{self, Read};

use crate::checksum::ChecksumKind;
use crate::error::{Error, Result};
use crate::io_ext::{read_vec, skip_exact};

/// Deepest nesting of unknown trailing values a decoder will step over.
const MAX_SKIP_DEPTH: usize = 32;

// ── Block ids ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum BlockId {
    PlainKey        = 1,
    EncryptedKey    = 2,
    EncryptedStream = 3,
    PlainStream     = 4,
    Data            = 5,
    EndOfStream     = 6,
    Eof             = 7,
    Error           = 8,
}

impl BlockId {
    pub fn name(self) -> &'static str {
        match self {
            BlockId::PlainKey        => "plain key",
            BlockId::EncryptedKey    => "encrypted key",
            BlockId::EncryptedStream => "encrypted stream",
            BlockId::PlainStream     => "plain stream",
            BlockId::Data            => "data",
            BlockId::EndOfStream     => "end of stream",
            BlockId::Eof             => "eof",
            BlockId::Error           => "error",
        }
    }
}

impl TryFrom<i8> for BlockId {
    type Error = Error;

    fn try_from(value: i8) -> Result<Self> {
        match value {
            1 => Ok(BlockId::PlainKey),
            2 => Ok(BlockId::EncryptedKey),
            3 => Ok(BlockId::EncryptedStream),
            4 => Ok(BlockId::PlainStream),
            5 => Ok(BlockId::Data),
            6 => Ok(BlockId::EndOfStream),
            7 => Ok(BlockId::Eof),
            8 => Ok(BlockId::Error),
            other => Err(Error::UnknownBlock(other)),
        }
    }
}

/// What follows a block id on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockHeader {
    Mandatory(BlockId),
    Skippable { id: i8, len: u32 },
}

// ── Decoded blocks ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStart {
    pub name:     String,
    pub extra:    Vec<u8>,
    pub checksum: ChecksumKind,
    /// Empty for plain streams.
    pub nonce:    Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndOfStream {
    pub checksum: ChecksumKind,
    pub digest:   Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    PlainKey(Vec<u8>),
    EncryptedKey { public_key: Vec<u8>, wrapped: Vec<u8> },
    EncryptedStream(StreamStart),
    PlainStream(StreamStart),
    Data(Vec<u8>),
    EndOfStream(EndOfStream),
    Eof,
    Error(String),
}

impl Block {
    pub fn id(&self) -> BlockId {
        match self {
            Block::PlainKey(_)           => BlockId::PlainKey,
            Block::EncryptedKey { .. }   => BlockId::EncryptedKey,
            Block::EncryptedStream(_)    => BlockId::EncryptedStream,
            Block::PlainStream(_)        => BlockId::PlainStream,
            Block::Data(_)               => BlockId::Data,
            Block::EndOfStream(_)        => BlockId::EndOfStream,
            Block::Eof                   => BlockId::Eof,
            Block::Error(_)              => BlockId::Error,
        }
    }
}

// ── Encoding ─────────────────────────────────────────────────────────────────

/// Append the complete wire form of `block` (id and fields) to `out`.
pub fn encode_block(block: &Block, out: &mut Vec<u8>) -> Result<()> {
    out.push(block.id() as i8 as u8);
    match block {
        Block::PlainKey(key) => {
            rmp::encode::write_array_len(out, 1)?;
            rmp::encode::write_bin(out, key)?;
        }
        Block::EncryptedKey { public_key, wrapped } => {
            rmp::encode::write_array_len(out, 2)?;
            rmp::encode::write_bin(out, public_key)?;
            rmp::encode::write_bin(out, wrapped)?;
        }
        Block::EncryptedStream(start) => {
            rmp::encode::write_array_len(out, 4)?;
            rmp::encode::write_str(out, &start.name)?;
            rmp::encode::write_bin(out, &start.extra)?;
            rmp::encode::write_uint(out, start.checksum.as_u8() as u64)?;
            rmp::encode::write_bin(out, &start.nonce)?;
        }
        Block::PlainStream(start) => {
            rmp::encode::write_array_len(out, 3)?;
            rmp::encode::write_str(out, &start.name)?;
            rmp::encode::write_bin(out, &start.extra)?;
            rmp::encode::write_uint(out, start.checksum.as_u8() as u64)?;
        }
        Block::Data(data) => write_data_fields(data, out)?,
        Block::EndOfStream(eos) => {
            rmp::encode::write_array_len(out, 2)?;
            rmp::encode::write_uint(out, eos.checksum.as_u8() as u64)?;
            rmp::encode::write_bin(out, &eos.digest)?;
        }
        Block::Eof => {
            rmp::encode::write_array_len(out, 0)?;
        }
        Block::Error(message) => {
            rmp::encode::write_array_len(out, 1)?;
            rmp::encode::write_str(out, message)?;
        }
    }
    Ok(())
}

/// Data block straight from a borrowed slice.
pub fn encode_data(data: &[u8], out: &mut Vec<u8>) -> Result<()> {
    out.push(BlockId::Data as i8 as u8);
    write_data_fields(data, out)
}

fn write_data_fields(data: &[u8], out: &mut Vec<u8>) -> Result<()> {
    rmp::encode::write_array_len(out, 1)?;
    rmp::encode::write_bin(out, data)?;
    Ok(())
}

/// Append the id and length prefix of a skippable block.  The caller writes
/// exactly `len` payload bytes afterwards.
pub fn encode_skippable_header(id: i8, len: u32, out: &mut Vec<u8>) -> Result<()> {
    if id >= 0 {
        return Err(Error::Usage("skippable block ids must be negative"));
    }
    out.write_i8(id)?;
    out.write_u32::<LittleEndian>(len)?;
    Ok(())
}

// ── Decoding ─────────────────────────────────────────────────────────────────

/// Block-at-a-time decoder over any byte source.
///
/// Optionally records every byte it consumes (see [`start_capture`]) so a
/// block can be forwarded verbatim after inspecting it.
///
/// [`start_capture`]: BlockReader::start_capture
pub struct BlockReader<R> {
    inner:   R,
    capture: Option<Vec<u8>>,
}

impl<R: Read> Read for BlockReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if let Some(capture) = self.capture.as_mut() {
            capture.extend_from_slice(&buf[..n]);
        }
        Ok(n)
    }
}

impl<R: Read> BlockReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, capture: None }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Begin recording consumed bytes, discarding any earlier recording.
    pub fn start_capture(&mut self) {
        self.capture = Some(Vec::new());
    }

    /// Stop recording and return what was consumed since `start_capture`.
    pub fn take_capture(&mut self) -> Vec<u8> {
        self.capture.take().unwrap_or_default()
    }

    pub fn read_header(&mut self) -> Result<BlockHeader> {
        let id = self.read_i8()?;
        if id < 0 {
            let len = self.read_u32::<LittleEndian>()?;
            return Ok(BlockHeader::Skippable { id, len });
        }
        Ok(BlockHeader::Mandatory(BlockId::try_from(id)?))
    }

    pub fn skip_payload(&mut self, len: u32) -> Result<()> {
        skip_exact(self, len as u64)?;
        Ok(())
    }

    /// Decode the fields of a mandatory block whose id was just read.
    pub fn read_payload(&mut self, id: BlockId) -> Result<Block> {
        let block = match id {
            BlockId::PlainKey => {
                let extra = self.open_fields(1)?;
                let key = self.read_bin()?;
                self.skip_values(extra)?;
                Block::PlainKey(key)
            }
            BlockId::EncryptedKey => {
                let extra = self.open_fields(2)?;
                let public_key = self.read_bin()?;
                let wrapped = self.read_bin()?;
                self.skip_values(extra)?;
                Block::EncryptedKey { public_key, wrapped }
            }
            BlockId::EncryptedStream => {
                let extra = self.open_fields(4)?;
                let name = self.read_str()?;
                let extra_bytes = self.read_bin()?;
                let checksum = self.read_checksum_kind()?;
                let nonce = self.read_bin()?;
                self.skip_values(extra)?;
                Block::EncryptedStream(StreamStart { name, extra: extra_bytes, checksum, nonce })
            }
            BlockId::PlainStream => {
                let extra = self.open_fields(3)?;
                let name = self.read_str()?;
                let extra_bytes = self.read_bin()?;
                let checksum = self.read_checksum_kind()?;
                self.skip_values(extra)?;
                Block::PlainStream(StreamStart {
                    name,
                    extra: extra_bytes,
                    checksum,
                    nonce: Vec::new(),
                })
            }
            BlockId::Data => {
                let extra = self.open_fields(1)?;
                let data = self.read_bin()?;
                self.skip_values(extra)?;
                Block::Data(data)
            }
            BlockId::EndOfStream => {
                let extra = self.open_fields(2)?;
                let checksum = self.read_checksum_kind()?;
                let digest = self.read_bin()?;
                self.skip_values(extra)?;
                Block::EndOfStream(EndOfStream { checksum, digest })
            }
            BlockId::Eof => {
                let extra = self.open_fields(0)?;
                self.skip_values(extra)?;
                Block::Eof
            }
            BlockId::Error => {
                let extra = self.open_fields(1)?;
                let message = self.read_str()?;
                self.skip_values(extra)?;
                Block::Error(message)
            }
        };
        Ok(block)
    }

    /// Next mandatory block, stepping over any skippable ones.
    pub fn next_block(&mut self) -> Result<Block> {
        loop {
            match self.read_header()? {
                BlockHeader::Mandatory(id) => return self.read_payload(id),
                BlockHeader::Skippable { id, len } => {
                    tracing::trace!(id, len, "skipping extension block");
                    self.skip_payload(len)?;
                }
            }
        }
    }

    // ── Field helpers ────────────────────────────────────────────────────────

    /// Read the array header; returns how many unknown trailing fields follow
    /// the `required` ones.
    fn open_fields(&mut self, required: u32) -> Result<u32> {
        let n = rmp::decode::read_array_len(self)?;
        if n < required {
            return Err(Error::malformed(format!(
                "block has {n} fields, at least {required} required"
            )));
        }
        Ok(n - required)
    }

    fn read_bin(&mut self) -> Result<Vec<u8>> {
        let len = rmp::decode::read_bin_len(self)?;
        Ok(read_vec(self, len as u64)?)
    }

    fn read_str(&mut self) -> Result<String> {
        let len = rmp::decode::read_str_len(self)?;
        let bytes = read_vec(self, len as u64)?;
        String::from_utf8(bytes).map_err(|_| Error::malformed("string field is not UTF-8"))
    }

    fn read_checksum_kind(&mut self) -> Result<ChecksumKind> {
        let v: u8 = rmp::decode::read_int(self)?;
        ChecksumKind::from_u8(v)
    }

    fn skip_values(&mut self, count: u32) -> Result<()> {
        for _ in 0..count {
            self.skip_value(0)?;
        }
        Ok(())
    }

    fn skip_value(&mut self, depth: usize) -> Result<()> {
        if depth > MAX_SKIP_DEPTH {
            return Err(Error::malformed("trailing field nested too deeply"));
        }
        let marker = rmp::decode::read_marker(self)?;
        let bytes: u64 = match marker {
            Marker::FixPos(_) | Marker::FixNeg(_) | Marker::Null | Marker::True | Marker::False => 0,
            Marker::U8 | Marker::I8 => 1,
            Marker::U16 | Marker::I16 => 2,
            Marker::U32 | Marker::I32 | Marker::F32 => 4,
            Marker::U64 | Marker::I64 | Marker::F64 => 8,
            Marker::FixStr(n) => n as u64,
            Marker::Str8 | Marker::Bin8 => self.read_u8()? as u64,
            Marker::Str16 | Marker::Bin16 => self.read_u16::<BigEndian>()? as u64,
            Marker::Str32 | Marker::Bin32 => self.read_u32::<BigEndian>()? as u64,
            Marker::FixArray(n) => return self.skip_nested(n as u64, depth),
            Marker::Array16 => {
                let n = self.read_u16::<BigEndian>()? as u64;
                return self.skip_nested(n, depth);
            }
            Marker::Array32 => {
                let n = self.read_u32::<BigEndian>()? as u64;
                return self.skip_nested(n, depth);
            }
            Marker::FixMap(n) => return self.skip_nested(2 * n as u64, depth),
            Marker::Map16 => {
                let n = self.read_u16::<BigEndian>()? as u64;
                return self.skip_nested(2 * n, depth);
            }
            Marker::Map32 => {
                let n = self.read_u32::<BigEndian>()? as u64;
                return self.skip_nested(2 * n, depth);
            }
            // Extension payloads carry a one-byte type tag before the data.
            Marker::FixExt1 => 2,
            Marker::FixExt2 => 3,
            Marker::FixExt4 => 5,
            Marker::FixExt8 => 9,
            Marker::FixExt16 => 17,
            Marker::Ext8 => self.read_u8()? as u64 + 1,
            Marker::Ext16 => self.read_u16::<BigEndian>()? as u64 + 1,
            Marker::Ext32 => self.read_u32::<BigEndian>()? as u64 + 1,
            Marker::Reserved => return Err(Error::malformed("reserved MessagePack marker")),
        };
        skip_exact(self, bytes)?;
        Ok(())
    }

    fn skip_nested(&mut self, count: u64, depth: usize) -> Result<()> {
        for _ in 0..count {
            self.skip_value(depth + 1)?;
        }
        Ok(())
    }
}

// ── rmp error conversions ────────────────────────────────────────────────────

impl From<ValueReadError> for Error {
    fn from(err: ValueReadError) -> Self {
        match err {
            ValueReadError::InvalidMarkerRead(e) | ValueReadError::InvalidDataRead(e) => e.into(),
            ValueReadError::TypeMismatch(marker) => {
                Error::malformed(format!("unexpected field type {marker:?}"))
            }
        }
    }
}

impl From<NumValueReadError> for Error {
    fn from(err: NumValueReadError) -> Self {
        match err {
            NumValueReadError::InvalidMarkerRead(e) | NumValueReadError::InvalidDataRead(e) => {
                e.into()
            }
            NumValueReadError::TypeMismatch(marker) => {
                Error::malformed(format!("unexpected field type {marker:?}"))
            }
            NumValueReadError::OutOfRange => Error::malformed("integer field out of range"),
        }
    }
}

impl From<MarkerReadError> for Error {
    fn from(err: MarkerReadError) -> Self {
        err.0.into()
    }
}

impl From<ValueWriteError> for Error {
    fn from(err: ValueWriteError) -> Self {
        match err {
            ValueWriteError::InvalidMarkerWrite(e) | ValueWriteError::InvalidDataWrite(e) => {
                e.into()
            }
        }
    }
}
