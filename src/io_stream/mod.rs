//! Container writer and reader.
//!
//! # Writer
//! [`Writer`] writes the version header on construction and then emits one
//! block per operation.  Each block is encoded in full before it reaches the
//! sink with a single `write_all`, so a failure never leaves a partial block
//! behind a successful call.  At most one stream is open at a time; its
//! [`StreamWriter`] borrows the writer mutably until it is dropped.
//!
//! # Reader
//! [`Reader`] pulls blocks one at a time.  Key blocks update the active
//! content key, stream-start blocks become a [`Stream`] handle, and the EOF
//! block ends iteration.  A source that ends before EOF is an
//! [`UnexpectedEof`](crate::Error::UnexpectedEof) error, never a clean end.
//!
//! # Errors
//! Both sides keep the first error they hit and return it from every later
//! call without touching the underlying sink or source again.
//!
//! # Nonces
//! Every encrypted stream gets the writer's next 56-bit counter value as its
//! 7-byte nonce (big-endian), so a nonce is never reused within one writer.

mod reader;
mod writer;

pub use reader::{Reader, ReaderOptions, Stream, StreamKind};
pub use writer::{StreamWriter, Writer, WriterOptions, DEFAULT_MAX_BLOCK_SIZE};
