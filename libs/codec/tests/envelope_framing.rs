//! Transport envelope integration tests
//!
//! Exercise the public codec API the way the network layer uses it: build a
//! body, frame it, then decode header and body from raw bytes.

use codec::{
    connect_message, frame_application, BinaryMessage, BlobSegment, BodyType, CodecError,
    MessageReader, MessageType, ProtocolVersion, RawSegment, Segment, TransportBody,
    TransportHeaderSegment, U32Segment, HEADER_SIZE,
};
use proptest::prelude::*;

fn framed_bytes(body_len: usize) -> Vec<u8> {
    let body = BinaryMessage::new().with(RawSegment::new(vec![0xA5u8; body_len]));
    frame_application(body).unwrap().to_bytes().unwrap()
}

#[test]
fn test_application_message_of_37_bytes() {
    let bytes = framed_bytes(37);
    assert_eq!(bytes.len(), 12 + 37);

    let mut header = TransportHeaderSegment::default();
    header.read(&bytes[..HEADER_SIZE], 0).unwrap();
    assert_eq!(header.packet_length, 12 + 37);
    assert_eq!(header.message_type, MessageType::Application);

    // The receive path allocates exactly PacketLength - 12 bytes for the body
    let mut body = vec![0u8; header.body_len().unwrap()];
    assert_eq!(body.len(), 37);
    body.copy_from_slice(&bytes[HEADER_SIZE..]);
    assert!(body.iter().all(|&b| b == 0xA5));
}

#[test]
fn test_empty_application_body() {
    let bytes = framed_bytes(0);
    let mut reader = MessageReader::new(&bytes);
    let header = reader.read::<TransportHeaderSegment>().unwrap();
    assert_eq!(header.body_len().unwrap(), 0);
    assert!(reader.is_exhausted());
}

#[test]
fn test_handshake_reply_decodes() {
    let bytes = connect_message(BodyType::ConnectionAccepted, ProtocolVersion::new(1, 4))
        .unwrap()
        .to_bytes()
        .unwrap();

    let mut reader = MessageReader::new(&bytes);
    let header = reader.read::<TransportHeaderSegment>().unwrap();
    assert_eq!(header.message_type, MessageType::Transport);
    assert_eq!(header.body_len().unwrap(), reader.remaining());

    match TransportBody::decode(reader.remaining_bytes()).unwrap() {
        TransportBody::ConnectionAccepted(version) => assert_eq!(version, ProtocolVersion::new(1, 4)),
        other => panic!("unexpected body {other:?}"),
    }
}

#[test]
fn test_overflow_reports_every_segment_type() {
    let message = BinaryMessage::new()
        .with(U32Segment::new(1))
        .with(BlobSegment::new(&b"payload"[..]));
    let mut buffer = [0u8; 8];

    match message.write(&mut buffer, 0).unwrap_err() {
        CodecError::Overflow {
            required_size,
            available_bytes,
            segment_types,
        } => {
            assert_eq!(required_size, 4 + 4 + 7);
            assert_eq!(available_bytes, 8);
            assert_eq!(segment_types, vec!["U32Segment", "BlobSegment"]);
        }
        other => panic!("expected overflow, got {other:?}"),
    }
}

#[test]
fn test_truncated_header_is_underflow() {
    let bytes = framed_bytes(4);
    let mut header = TransportHeaderSegment::default();
    let err = header.read(&bytes[..HEADER_SIZE - 1], 0).unwrap_err();
    assert_eq!(err.required_size(), Some(HEADER_SIZE));
    assert_eq!(err.available_bytes(), Some(HEADER_SIZE - 1));
}

proptest! {
    /// Flipping any bit pattern in the CRC-covered bytes is always detected
    #[test]
    fn prop_header_corruption_detected(
        body_len in 0usize..512,
        position in 0usize..8,
        mask in 1u8..=255,
    ) {
        let mut bytes = framed_bytes(body_len);
        bytes[position] ^= mask;

        let mut header = TransportHeaderSegment::default();
        let result = header.read(&bytes, 0);
        let is_crc_error = matches!(result, Err(CodecError::MessageCrc { .. }));
        prop_assert!(is_crc_error);
    }

    /// An untouched header always validates and reports the framed size
    #[test]
    fn prop_intact_header_validates(body_len in 0usize..4096) {
        let bytes = framed_bytes(body_len);
        let mut header = TransportHeaderSegment::default();
        prop_assert!(header.read(&bytes, 0).is_ok());
        prop_assert_eq!(header.packet_length as usize, HEADER_SIZE + body_len);
    }
}
