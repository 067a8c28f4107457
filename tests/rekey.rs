mod common;

use common::*;
use envstream::block::{Block, BlockReader};
use envstream::crypto::CryptoError;
use envstream::{replace_keys, Error, KeyAction, Reader, ReplaceKeysOptions};

/// Raw bytes of every block after the header, tagged with whether it is a
/// key block.
fn raw_blocks(bytes: &[u8]) -> Vec<(bool, Vec<u8>)> {
    let mut blocks = BlockReader::new(&bytes[2..]);
    let mut out = Vec::new();
    loop {
        blocks.start_capture();
        let block = blocks.next_block().unwrap();
        let is_key = matches!(block, Block::PlainKey(_) | Block::EncryptedKey { .. });
        out.push((is_key, blocks.take_capture()));
        if let Block::Eof = block {
            return out;
        }
    }
}

fn payload_blocks(bytes: &[u8]) -> Vec<Vec<u8>> {
    raw_blocks(bytes).into_iter().filter(|(key, _)| !key).map(|(_, raw)| raw).collect()
}

fn several_streams() -> Vec<Item> {
    vec![
        Item::encrypted("a", &pattern(130_000, 1)),
        Item::plain("b", b"plain in between"),
        Item::encrypted("c", b""),
        Item::encrypted("d", b"tail"),
    ]
}

#[test]
fn rewrap_for_new_recipient() {
    let items = several_streams();
    let src = write_items(&items, Some(&public(alice())));

    let mut dst = Vec::new();
    replace_keys(
        &mut dst,
        &src[..],
        |old| {
            assert_eq!(old, Some(&public(alice())));
            KeyAction::Rewrap { private: Some(alice().clone()), public: public(bob()) }
        },
        ReplaceKeysOptions::default(),
    )
    .unwrap();

    assert_ne!(dst, src);
    assert_eq!(payload_blocks(&dst), payload_blocks(&src));

    let mut reader = Reader::new(&dst[..]).unwrap();
    reader.set_private_key(bob().clone());
    assert_eq!(read_items(&mut reader).unwrap(), items);

    // Alice can no longer open it.
    let mut reader = Reader::new(&dst[..]).unwrap();
    reader.set_private_key(alice().clone());
    assert!(matches!(reader.next_stream().err().unwrap(), Error::Crypto(CryptoError::NoPrivateKey)));
}

#[test]
fn same_recipient_without_private_key_passes_through() {
    let src = write_items(&several_streams(), Some(&public(alice())));
    let mut dst = Vec::new();
    replace_keys(
        &mut dst,
        &src[..],
        |_| KeyAction::Rewrap { private: None, public: public(alice()) },
        ReplaceKeysOptions::default(),
    )
    .unwrap();
    assert_eq!(dst, src);
}

#[test]
fn rewrap_without_private_key_fails() {
    let src = write_items(&several_streams(), Some(&public(alice())));
    let err = replace_keys(
        Vec::new(),
        &src[..],
        |_| KeyAction::Rewrap { private: None, public: public(bob()) },
        ReplaceKeysOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Crypto(CryptoError::NoPrivateKey)));
}

#[test]
fn unwrap_to_plain_key() {
    let items = several_streams();
    let src = write_items(&items, Some(&public(alice())));
    let mut dst = Vec::new();
    replace_keys(&mut dst, &src[..], |_| KeyAction::Unwrap(alice().clone()), ReplaceKeysOptions::default())
        .unwrap();

    assert_eq!(payload_blocks(&dst), payload_blocks(&src));
    let mut reader = Reader::new(&dst[..]).unwrap();
    assert_eq!(read_items(&mut reader).unwrap(), items);
}

#[test]
fn encrypt_all_promotes_plain_keys() {
    let items = several_streams();
    let src = write_items(&items, None);

    let mut offered = Vec::new();
    let mut dst = Vec::new();
    replace_keys(
        &mut dst,
        &src[..],
        |old| {
            offered.push(old.is_none());
            KeyAction::Rewrap { private: None, public: public(bob()) }
        },
        ReplaceKeysOptions { encrypt_all: true, ..Default::default() },
    )
    .unwrap();
    assert_eq!(offered, vec![true]);

    let blocks = raw_blocks(&dst);
    let first = BlockReader::new(&blocks[0].1[..]).next_block().unwrap();
    assert!(matches!(first, Block::EncryptedKey { .. }));

    let mut reader = Reader::new(&dst[..]).unwrap();
    assert!(reader.next_stream().is_err());

    let mut reader = Reader::new(&dst[..]).unwrap();
    reader.set_private_key(bob().clone());
    assert_eq!(read_items(&mut reader).unwrap(), items);
}
