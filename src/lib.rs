pub mod header;
pub mod block;
pub mod checksum;
pub mod crypto;
pub mod keys;
pub mod io_stream;
pub mod rekey;
pub mod dump;
pub mod io_ext;
pub mod error;

pub use header::{Version, FORMAT_MAJOR, FORMAT_MINOR};
pub use checksum::ChecksumKind;
pub use crypto::CryptoError;
pub use io_stream::{Reader, ReaderOptions, Stream, StreamKind, StreamWriter, Writer, WriterOptions};
pub use rekey::{replace_keys, KeyAction, ReplaceKeysOptions};
pub use error::{Error, ErrorKind, Result};
pub use rsa::{RsaPrivateKey, RsaPublicKey};
