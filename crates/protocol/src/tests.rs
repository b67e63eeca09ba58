use super::*;
use ident::{fingerprint, Checksum};
use std::io::{self, Cursor, Read};

// -------------------- Helpers --------------------

fn roundtrip(m: &Message) -> Message {
    let bytes = m.to_bytes().unwrap();
    Message::read_from(&mut Cursor::new(bytes)).unwrap()
}

/// Reader that hands out at most one byte per `read` call.
struct Trickle<R>(R);

impl<R: Read> Read for Trickle<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(1);
        self.0.read(&mut buf[..n])
    }
}

// -------------------- Header layout --------------------

#[test]
fn decodes_concrete_frame() {
    let mut frame = vec![0x01, 0x00, 0x00, 0x03];
    frame.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 5]);
    frame.extend_from_slice(&[0u8; 8]);
    frame.extend_from_slice(b"abc");
    frame.extend_from_slice(&[1, 2, 3, 4, 5]);

    let m = Message::read_from(&mut Cursor::new(frame)).unwrap();
    assert_eq!(
        m,
        Message {
            op: 1,
            status: 0,
            expires: 0,
            key: "abc".to_string(),
            value: vec![1, 2, 3, 4, 5],
        }
    );
}

#[test]
fn header_fields_are_big_endian() {
    let m = Message {
        op: 0xAA,
        status: 0xBB,
        expires: 0x0102_0304_0506_0708,
        key: "k".repeat(0x0102),
        value: vec![7; 0x0304],
    };
    let bytes = m.to_bytes().unwrap();
    assert_eq!(bytes[0], 0xAA);
    assert_eq!(bytes[1], 0xBB);
    assert_eq!(&bytes[2..4], &[0x01, 0x02]);
    assert_eq!(&bytes[4..12], &[0, 0, 0, 0, 0, 0, 0x03, 0x04]);
    assert_eq!(&bytes[12..20], &[1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(bytes.len(), HEADER_LEN + 0x0102 + 0x0304);
}

#[test]
fn header_encode_decode_agree() {
    let h = Header {
        op: 3,
        status: 2,
        key_len: u16::MAX,
        value_len: u64::MAX,
        expires: u64::MAX,
    };
    assert_eq!(Header::decode(&h.encode()), h);
}

// -------------------- Zero-length fields --------------------

#[test]
fn empty_message_is_header_only() {
    let m = Message::response(Op::Ping as u8, Status::Ok);
    let bytes = m.to_bytes().unwrap();
    assert_eq!(bytes.len(), HEADER_LEN);
    assert_eq!(&bytes[2..20], &[0u8; 18]);
    assert_eq!(bytes[0], Op::Ping as u8);

    let back = roundtrip(&m);
    assert!(back.key.is_empty());
    assert!(back.value.is_empty());
}

#[test]
fn empty_key_with_value() {
    let m = Message::request(Op::Set, "", vec![9, 9]);
    let back = roundtrip(&m);
    assert_eq!(back, m);
}

#[test]
fn key_without_value() {
    let m = Message::request(Op::Get, "only-key", Vec::new());
    let bytes = m.to_bytes().unwrap();
    assert_eq!(bytes.len(), HEADER_LEN + "only-key".len());
    assert_eq!(roundtrip(&m), m);
}

// -------------------- Round trips --------------------

#[test]
fn max_key_and_large_value_roundtrip() {
    let m = Message {
        op: 255,
        status: 255,
        expires: u64::MAX,
        key: "x".repeat(MAX_KEY_LEN),
        value: (0..(1u32 << 20)).map(|i| i as u8).collect(),
    };
    assert_eq!(roundtrip(&m), m);
}

#[test]
fn utf8_key_roundtrip() {
    let m = Message::request(Op::Set, "clé-ключ-鍵", b"v".to_vec());
    assert_eq!(roundtrip(&m), m);
}

#[test]
fn consecutive_messages_on_one_stream() {
    let a = Message::request(Op::Set, "a", b"1".to_vec());
    let b = Message::request(Op::Del, "b", Vec::new());
    let mut wire = Vec::new();
    a.write_to(&mut wire).unwrap();
    b.write_to(&mut wire).unwrap();

    let mut cur = Cursor::new(wire);
    assert_eq!(Message::read_from(&mut cur).unwrap(), a);
    assert_eq!(Message::read_from(&mut cur).unwrap(), b);
    assert!(matches!(
        Message::read_from(&mut cur),
        Err(ProtocolError::ConnectionClosed)
    ));
}

#[test]
fn short_reads_are_reassembled() {
    let m = Message::request(Op::Set, "trickle", vec![1, 2, 3, 4, 5, 6]);
    let bytes = m.to_bytes().unwrap();
    let back = Message::read_from(&mut Trickle(Cursor::new(bytes))).unwrap();
    assert_eq!(back, m);
}

// -------------------- Framing errors --------------------

#[test]
fn empty_stream_is_connection_closed() {
    let err = Message::read_from(&mut Cursor::new(Vec::new())).unwrap_err();
    assert!(matches!(err, ProtocolError::ConnectionClosed));
}

#[test]
fn partial_header_is_an_error_not_an_empty_message() {
    let bytes = Message::request(Op::Get, "k", Vec::new()).to_bytes().unwrap();
    let err = Message::read_from(&mut Cursor::new(bytes[..7].to_vec())).unwrap_err();
    assert!(matches!(err, ProtocolError::TruncatedHeader { read: 7 }));
}

#[test]
fn truncated_key_is_an_error() {
    let bytes = Message::request(Op::Get, "abcdef", Vec::new()).to_bytes().unwrap();
    let err = Message::read_from(&mut Cursor::new(bytes[..HEADER_LEN + 2].to_vec())).unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::TruncatedPayload {
            expected: 6,
            read: 2
        }
    ));
}

#[test]
fn truncated_value_is_an_error() {
    let bytes = Message::request(Op::Set, "k", vec![0; 100]).to_bytes().unwrap();
    let cut = bytes.len() - 1;
    let err = Message::read_from(&mut Cursor::new(bytes[..cut].to_vec())).unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::TruncatedPayload {
            expected: 100,
            read: 99
        }
    ));
}

#[test]
fn huge_announced_value_does_not_preallocate() {
    let h = Header {
        op: Op::Set as u8,
        value_len: u64::MAX / 2,
        ..Header::default()
    };
    let mut frame = h.encode().to_vec();
    frame.extend_from_slice(b"tiny");
    let err = Message::read_from(&mut Cursor::new(frame)).unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::TruncatedPayload { .. } | ProtocolError::ValueTooLarge(_)
    ));
}

#[test]
fn invalid_utf8_key_is_rejected() {
    let h = Header {
        key_len: 2,
        ..Header::default()
    };
    let mut frame = h.encode().to_vec();
    frame.extend_from_slice(&[0xff, 0xfe]);
    let err = Message::read_from(&mut Cursor::new(frame)).unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidKey));
}

#[test]
fn oversized_key_is_rejected_before_writing() {
    let m = Message::request(Op::Set, "k".repeat(MAX_KEY_LEN + 1), Vec::new());
    let mut sink = Vec::new();
    let err = m.write_to(&mut sink).unwrap_err();
    assert!(matches!(err, ProtocolError::KeyTooLong(n) if n == MAX_KEY_LEN + 1));
    assert!(sink.is_empty());
}

#[test]
fn write_failure_surfaces_as_io_error() {
    struct Broken;
    impl io::Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
    let err = Message::request(Op::Ping, "", Vec::new())
        .write_to(&mut Broken)
        .unwrap_err();
    assert!(matches!(err, ProtocolError::Io(ref e) if e.kind() == io::ErrorKind::BrokenPipe));
}

// -------------------- Codes --------------------

#[test]
fn op_and_status_codes_decode() {
    for op in [Op::Close, Op::Set, Op::Get, Op::Del, Op::List, Op::Count, Op::Ping] {
        assert_eq!(Op::from_u8(op as u8), Some(op));
    }
    assert_eq!(Op::from_u8(200), None);
    for st in [Status::Ok, Status::Error, Status::NotFound, Status::StreamEnd] {
        assert_eq!(Status::from_u8(st as u8), Some(st));
    }
    assert_eq!(Status::from_u8(9), None);
}

#[test]
fn count_value_roundtrip() {
    let m = Message::response(Op::Count as u8, Status::Ok).with_count(42);
    assert_eq!(m.value, vec![0, 0, 0, 0, 0, 0, 0, 42]);
    assert_eq!(roundtrip(&m).count(), Some(42));
    assert_eq!(Message::default().count(), None);

    // replaces any value already present
    let mut m = Message::response(Op::Count as u8, Status::Ok);
    m.value = b"previous".to_vec();
    let m = m.with_count(u64::MAX);
    assert_eq!(m.value, vec![0xFF; 8]);
    assert_eq!(m.count(), Some(u64::MAX));
}

// -------------------- Manifest --------------------

fn sample_manifest() -> Manifest {
    Manifest {
        parts: vec![
            PartManifest {
                part_id: fingerprint("p1"),
                blocks: vec![
                    BlockManifest {
                        block_id: fingerprint("b1"),
                        hash: Checksum::from_bytes([1; 32]),
                    },
                    BlockManifest {
                        block_id: fingerprint("b2"),
                        hash: Checksum::from_bytes([2; 32]),
                    },
                ],
            },
            PartManifest {
                part_id: fingerprint("p2"),
                blocks: vec![BlockManifest {
                    block_id: fingerprint("b3"),
                    hash: Checksum::from_bytes([3; 32]),
                }],
            },
        ],
    }
}

#[test]
fn manifest_counts_and_lookup() {
    let m = sample_manifest();
    assert_eq!(m.block_count(), 3);
    assert_eq!(m.part_ids().count(), 2);
    assert_eq!(
        m.block_hash(&fingerprint("b3")),
        Some(Checksum::from_bytes([3; 32]))
    );
    assert_eq!(m.block_hash(&fingerprint("nope")), None);
}

#[test]
fn manifest_json_preserves_order() {
    let m = sample_manifest();
    let json = serde_json::to_string(&m).unwrap();
    assert!(json.contains(&fingerprint("p1").slot_key()));
    let back: Manifest = serde_json::from_str(&json).unwrap();
    assert_eq!(back, m);
}
