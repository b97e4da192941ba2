//! CRC32 Checksum Helpers
//!
//! The transport header CRC covers only the network-order encoding of
//! `PacketLength‖MessageType` (8 bytes), never the CRC field itself.

use byteorder::{BigEndian, ByteOrder};

/// CRC over the header fields that precede the CRC slot
pub fn header_crc(packet_length: u32, message_type: i32) -> u32 {
    let mut covered = [0u8; 8];
    BigEndian::write_u32(&mut covered[..4], packet_length);
    BigEndian::write_i32(&mut covered[4..], message_type);
    crc32fast::hash(&covered)
}

/// CRC over the network-order encoding of a monetary amount
pub fn amount_crc(value: i64) -> u32 {
    let mut covered = [0u8; 8];
    BigEndian::write_i64(&mut covered, value);
    crc32fast::hash(&covered)
}
