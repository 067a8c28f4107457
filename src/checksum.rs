//! End-of-stream checksums.
//!
//! The digest covers the bytes carried by a stream's Data blocks: plaintext
//! for plain streams, ciphertext for encrypted ones.

use serde::Serialize;
use xxhash_rust::xxh64::Xxh64;

use crate::error::{Error, Result};

pub const XXH64_SEED: u64 = 0;
pub const XXH64_LEN:  usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumKind {
    None,
    #[default]
    Xxh64,
}

impl ChecksumKind {
    pub fn as_u8(self) -> u8 {
        match self {
            ChecksumKind::None  => 0,
            ChecksumKind::Xxh64 => 1,
        }
    }

    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(ChecksumKind::None),
            1 => Ok(ChecksumKind::Xxh64),
            other => Err(Error::malformed(format!("unknown checksum kind {other}"))),
        }
    }
}

/// Running digest for one stream.
#[derive(Clone)]
pub enum Checksum {
    None,
    Xxh64(Xxh64),
}

impl Checksum {
    pub fn new(kind: ChecksumKind) -> Self {
        match kind {
            ChecksumKind::None  => Checksum::None,
            ChecksumKind::Xxh64 => Checksum::Xxh64(Xxh64::new(XXH64_SEED)),
        }
    }

    pub fn kind(&self) -> ChecksumKind {
        match self {
            Checksum::None     => ChecksumKind::None,
            Checksum::Xxh64(_) => ChecksumKind::Xxh64,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        if let Checksum::Xxh64(h) = self {
            h.update(data);
        }
    }

    /// Digest bytes as carried on the wire; empty for `None`.
    pub fn finalize(&self) -> Vec<u8> {
        match self {
            Checksum::None     => Vec::new(),
            Checksum::Xxh64(h) => h.digest().to_be_bytes().to_vec(),
        }
    }

    /// Compare against the digest from an End Of Stream block.
    pub fn verify(&self, stream: &str, kind: ChecksumKind, expected: &[u8]) -> Result<()> {
        if kind != self.kind() {
            return Err(Error::malformed(format!(
                "end of stream {stream:?} declares checksum {kind:?}, stream started with {:?}",
                self.kind()
            )));
        }
        if kind == ChecksumKind::None {
            return Ok(());
        }
        let computed = self.finalize();
        if computed != expected {
            return Err(Error::ChecksumMismatch {
                stream:   stream.to_string(),
                expected: hex::encode(expected),
                computed: hex::encode(&computed),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incremental_matches_oneshot() {
        let mut c = Checksum::new(ChecksumKind::Xxh64);
        c.update(b"hello ");
        c.update(b"world");
        let oneshot = xxhash_rust::xxh64::xxh64(b"hello world", XXH64_SEED);
        assert_eq!(c.finalize(), oneshot.to_be_bytes().to_vec());
        assert_eq!(c.finalize().len(), XXH64_LEN);
    }

    #[test]
    fn none_always_verifies() {
        let mut c = Checksum::new(ChecksumKind::None);
        c.update(b"anything");
        assert!(c.finalize().is_empty());
        c.verify("s", ChecksumKind::None, b"garbage").unwrap();
    }

    #[test]
    fn mismatch_reports_both_digests() {
        let c = Checksum::new(ChecksumKind::Xxh64);
        let err = c.verify("s", ChecksumKind::Xxh64, &[0u8; 8]).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
    }

    #[test]
    fn kind_codes() {
        assert_eq!(ChecksumKind::from_u8(1).unwrap(), ChecksumKind::Xxh64);
        assert!(ChecksumKind::from_u8(9).is_err());
    }
}
