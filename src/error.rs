//! Crate-wide error type.
//!
//! Every failure maps onto one [`ErrorKind`].  Writers and readers are
//! sticky: the first error is stored and handed back on every later call,
//! which is why [`Error`] is `Clone` and keeps I/O errors behind an `Arc`.

use std::io;
use std::sync::Arc;
use thiserror::Error;

use crate::crypto::CryptoError;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown version, unknown mandatory block, malformed field.
    Format,
    /// Checksum mismatch, AEAD failure, input ended before the EOF block.
    Integrity,
    /// Missing, malformed or undecryptable key material.
    Key,
    /// The API was driven in an order the state machine forbids.
    Usage,
    /// The producer wrote an Error block.
    Producer,
    /// The underlying byte source or sink failed.
    Io,
}

#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    // ── Format ──────────────────────────────────────────────────────────────
    #[error("unsupported format version {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u8 },
    #[error("unknown mandatory block id {0}")]
    UnknownBlock(i8),
    #[error("unexpected {found} block {context}")]
    UnexpectedBlock { found: &'static str, context: &'static str },
    #[error("malformed block: {0}")]
    Malformed(String),

    // ── Integrity ───────────────────────────────────────────────────────────
    #[error("checksum mismatch on stream {stream:?}: expected {expected}, computed {computed}")]
    ChecksumMismatch { stream: String, expected: String, computed: String },
    #[error("unexpected end of input before EOF block")]
    UnexpectedEof,

    // ── Key / AEAD ──────────────────────────────────────────────────────────
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    // ── Usage ───────────────────────────────────────────────────────────────
    #[error("usage error: {0}")]
    Usage(&'static str),

    // ── Producer ────────────────────────────────────────────────────────────
    /// Carries the message of an Error block verbatim.
    #[error("{0}")]
    Producer(String),

    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnsupportedVersion { .. }
            | Error::UnknownBlock(_)
            | Error::UnexpectedBlock { .. }
            | Error::Malformed(_) => ErrorKind::Format,
            Error::ChecksumMismatch { .. } | Error::UnexpectedEof => ErrorKind::Integrity,
            Error::Crypto(e) => e.kind(),
            Error::Usage(_) => ErrorKind::Usage,
            Error::Producer(_) => ErrorKind::Producer,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn malformed(what: impl Into<String>) -> Self {
        Error::Malformed(what.into())
    }

    /// Wrap for transport through `std::io::Read`/`Write` signatures.
    /// [`From<io::Error>`] undoes this.
    pub(crate) fn into_io(self) -> io::Error {
        match self {
            Error::Io(e) => io::Error::new(e.kind(), Error::Io(e)),
            other => io::Error::other(other),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        if let Some(own) = err.get_ref().and_then(|inner| inner.downcast_ref::<Error>()) {
            return own.clone();
        }
        if err.kind() == io::ErrorKind::UnexpectedEof {
            return Error::UnexpectedEof;
        }
        Error::Io(Arc::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_error_survives_io_round_trip() {
        let original = Error::Producer("boom".into());
        let back = Error::from(original.into_io());
        assert!(matches!(back, Error::Producer(ref m) if m == "boom"));
    }

    #[test]
    fn eof_is_integrity() {
        let err = Error::from(io::Error::new(io::ErrorKind::UnexpectedEof, "short"));
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }

    #[test]
    fn other_io_kept() {
        let err = Error::from(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert_eq!(err.kind(), ErrorKind::Io);
        let again = Error::from(err.clone().into_io());
        assert_eq!(again.kind(), ErrorKind::Io);
    }
}
