#![allow(dead_code)]

use envstream::{ChecksumKind, Reader, RsaPrivateKey, RsaPublicKey, Writer};
use rand::rngs::OsRng;
use std::io::{Read, Write};
use std::sync::OnceLock;

/// RSA-2048 keys are slow to generate; share two per test binary.
pub fn alice() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut OsRng, 2048).unwrap())
}

pub fn bob() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut OsRng, 2048).unwrap())
}

pub fn public(key: &RsaPrivateKey) -> RsaPublicKey {
    key.to_public_key()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub name:      String,
    pub extra:     Vec<u8>,
    pub payload:   Vec<u8>,
    pub encrypted: bool,
    pub checksum:  ChecksumKind,
}

impl Item {
    pub fn plain(name: &str, payload: &[u8]) -> Self {
        Self {
            name:      name.to_string(),
            extra:     format!("extra-{name}").into_bytes(),
            payload:   payload.to_vec(),
            encrypted: false,
            checksum:  ChecksumKind::Xxh64,
        }
    }

    pub fn encrypted(name: &str, payload: &[u8]) -> Self {
        Self { encrypted: true, ..Self::plain(name, payload) }
    }

    pub fn with_checksum(mut self, checksum: ChecksumKind) -> Self {
        self.checksum = checksum;
        self
    }
}

/// Deterministic non-repeating filler.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u32).wrapping_mul(31).wrapping_add(seed as u32) as u8).collect()
}

/// Write `items` after one key block; encrypted keys are wrapped for
/// `recipient` when given, otherwise written in the clear.
pub fn write_items(items: &[Item], recipient: Option<&RsaPublicKey>) -> Vec<u8> {
    let mut w = Writer::new(Vec::new()).unwrap();
    match recipient {
        Some(public) => w.add_key_encrypted(public).unwrap(),
        None => w.add_key_plain().unwrap(),
    }
    for item in items {
        w.set_checksum(item.checksum);
        let mut s = if item.encrypted {
            w.add_encrypted_stream(&item.name, &item.extra).unwrap()
        } else {
            w.add_unencrypted_stream(&item.name, &item.extra).unwrap()
        };
        // Uneven chunking so block and segment boundaries do not line up.
        for chunk in item.payload.chunks(40_000) {
            s.write_all(chunk).unwrap();
        }
        s.close().unwrap();
    }
    w.close().unwrap();
    w.into_inner()
}

/// Read every stream back, in order.
pub fn read_items<R: Read>(reader: &mut Reader<R>) -> envstream::Result<Vec<Item>> {
    let mut out = Vec::new();
    while let Some(mut stream) = reader.next_stream()? {
        let payload = stream.read_all()?;
        out.push(Item {
            name: stream.name.clone(),
            extra: stream.extra.clone(),
            payload,
            encrypted: stream.sent_encrypted,
            checksum: stream.checksum_kind(),
        });
    }
    Ok(out)
}
