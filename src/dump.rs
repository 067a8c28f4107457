//! Block-level dump of a container as JSON lines.
//!
//! Every block becomes one object.  Public key DER, nonces, digests and
//! stream extras are printed as hex.  Content keys, plain or wrapped, are
//! reported by length only.

use serde::Serialize;
use std::io::{self, Read, Write};

use crate::block::{Block, BlockHeader, BlockReader};
use crate::checksum::ChecksumKind;
use crate::error::Result;

#[derive(Debug, Default, Serialize)]
pub struct BlockSummary {
    pub index:      u64,
    pub id:         i8,
    pub kind:       &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name:       Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra:      Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum:   Option<ChecksumKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce:      Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest:     Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub len:        Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message:    Option<String>,
}

impl BlockSummary {
    pub fn of(index: u64, block: &Block) -> Self {
        let id = block.id();
        let mut summary = BlockSummary {
            index,
            id: id as i8,
            kind: id.name(),
            ..Default::default()
        };
        match block {
            Block::PlainKey(key) => summary.len = Some(key.len() as u64),
            Block::EncryptedKey { public_key, wrapped } => {
                summary.public_key = Some(hex::encode(public_key));
                summary.len = Some(wrapped.len() as u64);
            }
            Block::EncryptedStream(start) | Block::PlainStream(start) => {
                summary.name = Some(start.name.clone());
                summary.extra = Some(hex::encode(&start.extra));
                summary.checksum = Some(start.checksum);
                if !start.nonce.is_empty() {
                    summary.nonce = Some(hex::encode(&start.nonce));
                }
            }
            Block::Data(data) => summary.len = Some(data.len() as u64),
            Block::EndOfStream(end) => {
                summary.checksum = Some(end.checksum);
                summary.digest = Some(hex::encode(&end.digest));
            }
            Block::Eof => {}
            Block::Error(message) => summary.message = Some(message.clone()),
        }
        summary
    }

    fn extension(index: u64, id: i8, len: u32) -> Self {
        BlockSummary {
            index,
            id,
            kind: "extension",
            len: Some(len as u64),
            ..Default::default()
        }
    }
}

/// Dump blocks from `blocks` until an EOF or Error block has been written.
pub fn dump_blocks<R: Read, W: Write>(blocks: &mut BlockReader<R>, mut sink: W) -> Result<()> {
    let mut index = 0u64;
    loop {
        let (summary, last) = match blocks.read_header()? {
            BlockHeader::Skippable { id, len } => {
                blocks.skip_payload(len)?;
                (BlockSummary::extension(index, id, len), false)
            }
            BlockHeader::Mandatory(id) => {
                let block = blocks.read_payload(id)?;
                let last = matches!(block, Block::Eof | Block::Error(_));
                (BlockSummary::of(index, &block), last)
            }
        };
        serde_json::to_writer(&mut sink, &summary).map_err(io::Error::from)?;
        sink.write_all(b"\n")?;
        index += 1;
        if last {
            sink.flush()?;
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{encode_block, encode_skippable_header, EndOfStream};
    use crate::header::Version;

    #[test]
    fn one_line_per_block_without_key_bytes() {
        let key = vec![0xAB; 32];
        let mut bytes = Vec::new();
        Version::CURRENT.write(&mut bytes).unwrap();
        encode_block(&Block::PlainKey(key.clone()), &mut bytes).unwrap();
        encode_skippable_header(-3, 2, &mut bytes).unwrap();
        bytes.extend_from_slice(b"xy");
        encode_block(
            &Block::EndOfStream(EndOfStream { checksum: ChecksumKind::None, digest: Vec::new() }),
            &mut bytes,
        )
        .unwrap();
        encode_block(&Block::Eof, &mut bytes).unwrap();

        let mut blocks = BlockReader::new(&bytes[2..]);
        let mut out = Vec::new();
        dump_blocks(&mut blocks, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("\"kind\":\"plain key\""), "{}", lines[0]);
        assert!(lines[0].contains("\"len\":32"));
        assert!(lines[1].contains("\"kind\":\"extension\""));
        assert!(lines[1].contains("\"id\":-3"));
        assert!(!text.contains(&hex::encode(&key)));
    }

    #[test]
    fn stops_at_error_block() {
        let mut bytes = Vec::new();
        encode_block(&Block::Error("bad".into()), &mut bytes).unwrap();
        encode_block(&Block::Eof, &mut bytes).unwrap();
        let mut blocks = BlockReader::new(&bytes[..]);
        let mut out = Vec::new();
        dump_blocks(&mut blocks, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("\"message\":\"bad\""));
    }
}
