mod common;

use common::*;
use envstream::block::{Block, BlockReader};
use envstream::crypto::aead::DecryptReader;
use envstream::crypto::CryptoError;
use envstream::{Error, ErrorKind, Reader, ReaderOptions, StreamKind, Writer};
use std::io::{Read, Write};

/// Containers where every encrypted key is wrapped for alice.
fn mixed_for_alice() -> (Vec<u8>, Vec<Item>) {
    let items = vec![
        Item::plain("p1", b"first plain"),
        Item::encrypted("e1", &pattern(90_000, 1)),
        Item::plain("p2", b""),
        Item::encrypted("e2", b"short secret"),
        Item::plain("p3", &pattern(5000, 2)),
    ];
    (write_items(&items, Some(&public(alice()))), items)
}

#[test]
fn only_latest_key_applies() {
    let mut w = Writer::new(Vec::new()).unwrap();
    w.add_key_plain().unwrap();
    w.add_key_plain().unwrap();
    for name in ["one", "two"] {
        let mut s = w.add_encrypted_stream(name, b"").unwrap();
        s.write_all(name.as_bytes()).unwrap();
        s.close().unwrap();
    }
    w.close().unwrap();
    let bytes = w.into_inner();

    // Pull both keys and both streams apart at block level.
    let mut blocks = BlockReader::new(&bytes[2..]);
    let mut keys = Vec::new();
    let mut streams: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    loop {
        match blocks.next_block().unwrap() {
            Block::PlainKey(key) => keys.push(key),
            Block::EncryptedStream(start) => streams.push((start.nonce, Vec::new())),
            Block::Data(data) => streams.last_mut().unwrap().1.extend_from_slice(&data),
            Block::Eof => break,
            _ => {}
        }
    }
    assert_eq!(keys.len(), 2);
    assert_eq!(streams.len(), 2);
    assert_ne!(streams[0].0, streams[1].0, "nonce reuse");

    for (i, (nonce, ciphertext)) in streams.iter().enumerate() {
        let mut plain = Vec::new();
        DecryptReader::new(&ciphertext[..], &keys[1], nonce)
            .unwrap()
            .read_to_end(&mut plain)
            .unwrap();
        assert_eq!(plain, ["one", "two"][i].as_bytes());

        let mut wrong = Vec::new();
        let err = DecryptReader::new(&ciphertext[..], &keys[0], nonce)
            .unwrap()
            .read_to_end(&mut wrong)
            .unwrap_err();
        assert!(matches!(Error::from(err), Error::Crypto(CryptoError::AuthFailed)));
    }

    let mut reader = Reader::new(&bytes[..]).unwrap();
    let read = read_items(&mut reader).unwrap();
    assert_eq!(read.iter().map(|i| i.payload.clone()).collect::<Vec<_>>(), vec![b"one".to_vec(), b"two".to_vec()]);
}

#[test]
fn encrypted_stream_before_any_key() {
    let mut w = Writer::new(Vec::new()).unwrap();
    let err = w.add_encrypted_stream("early", b"").err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Usage);

    // A foreign producer that skips the key block: the reader refuses.
    let mut w = Writer::new(Vec::new()).unwrap();
    w.add_key_plain().unwrap();
    w.add_encrypted_stream("early", b"").unwrap().close().unwrap();
    w.close().unwrap();
    let bytes = w.into_inner();

    let mut blocks = BlockReader::new(&bytes[2..]);
    blocks.start_capture();
    blocks.next_block().unwrap();
    let key_block = blocks.take_capture().len();
    let mut stripped = bytes[..2].to_vec();
    stripped.extend_from_slice(&bytes[2 + key_block..]);

    let mut reader = Reader::new(&stripped[..]).unwrap();
    let err = reader.next_stream().err().unwrap();
    assert!(matches!(err, Error::Crypto(CryptoError::NoActiveKey)));
    assert_eq!(err.kind(), ErrorKind::Key);
}

#[test]
fn missing_private_key_fails_by_default() {
    let (bytes, _) = mixed_for_alice();
    let mut reader = Reader::new(&bytes[..]).unwrap();
    let err = reader.next_stream().err().unwrap();
    assert!(matches!(err, Error::Crypto(CryptoError::NoPrivateKey)));
    assert_eq!(err.kind(), ErrorKind::Key);
}

#[test]
fn wrong_private_key_fails_by_default() {
    let (bytes, _) = mixed_for_alice();
    let mut reader = Reader::new(&bytes[..]).unwrap();
    reader.set_private_key(bob().clone());
    assert!(matches!(reader.next_stream().err().unwrap(), Error::Crypto(CryptoError::NoPrivateKey)));
}

#[test]
fn skip_policy_returns_only_plain_streams() {
    let (bytes, items) = mixed_for_alice();
    let opts = ReaderOptions { skip_undecryptable: true, ..Default::default() };
    let mut reader = Reader::with_options(&bytes[..], opts).unwrap();

    let read = read_items(&mut reader).unwrap();
    let plain: Vec<Item> = items.into_iter().filter(|i| !i.encrypted).collect();
    assert_eq!(read, plain);
}

#[test]
fn skip_policy_via_setter_with_resolver_miss() {
    let (bytes, items) = mixed_for_alice();
    let mut reader = Reader::new(&bytes[..]).unwrap();
    reader.set_private_key_resolver(|_| None);
    reader.set_skip_undecryptable(true);
    let read = read_items(&mut reader).unwrap();
    assert_eq!(read.len(), items.iter().filter(|i| !i.encrypted).count());
}

#[test]
fn deliver_policy_flags_encrypted_streams() {
    let (bytes, items) = mixed_for_alice();
    let mut reader = Reader::new(&bytes[..]).unwrap();
    reader.set_deliver_undecryptable(true);

    let mut seen = Vec::new();
    while let Some(mut s) = reader.next_stream().unwrap() {
        if s.sent_encrypted {
            assert_eq!(s.kind(), StreamKind::Undecryptable);
            let mut buf = [0u8; 16];
            let err = s.read(&mut buf).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Key);
            s.skip().unwrap();
        } else {
            assert_eq!(s.read_all().unwrap(), items[seen.len()].payload);
        }
        seen.push(s.name.clone());
    }
    let names: Vec<String> = items.iter().map(|i| i.name.clone()).collect();
    assert_eq!(seen, names);
}

#[test]
fn skip_policy_covers_key_that_fails_to_unwrap() {
    let (bytes, items) = mixed_for_alice();
    let opts = ReaderOptions { skip_undecryptable: true, ..Default::default() };
    let mut reader = Reader::with_options(&bytes[..], opts).unwrap();
    reader.set_private_key_resolver(|_| Some(bob().clone()));

    let read = read_items(&mut reader).unwrap();
    let plain: Vec<Item> = items.into_iter().filter(|i| !i.encrypted).collect();
    assert_eq!(read, plain);
}

#[test]
fn deliver_policy_covers_key_that_fails_to_unwrap() {
    let (bytes, items) = mixed_for_alice();
    let opts = ReaderOptions { deliver_undecryptable: true, ..Default::default() };
    let mut reader = Reader::with_options(&bytes[..], opts).unwrap();
    reader.set_private_key_resolver(|_| Some(bob().clone()));

    let mut seen = Vec::new();
    while let Some(mut s) = reader.next_stream().unwrap() {
        if s.sent_encrypted {
            assert_eq!(s.kind(), StreamKind::Undecryptable);
            s.skip().unwrap();
        } else {
            assert_eq!(s.read_all().unwrap(), items[seen.len()].payload);
        }
        seen.push(s.name.clone());
    }
    let names: Vec<String> = items.iter().map(|i| i.name.clone()).collect();
    assert_eq!(seen, names);
}

#[test]
fn key_that_fails_to_unwrap_is_fatal_without_policy() {
    let (bytes, _) = mixed_for_alice();
    let mut reader = Reader::new(&bytes[..]).unwrap();
    reader.set_private_key_resolver(|_| Some(bob().clone()));
    let err = reader.next_stream().err().unwrap();
    assert!(matches!(err, Error::Crypto(CryptoError::Unwrap(_))));
    assert_eq!(err.kind(), ErrorKind::Key);
}
