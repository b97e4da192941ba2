//! # Transport Envelope
//!
//! Concrete segments that frame every message on the socket:
//!
//! ```text
//! TransportHeader    : u32 PacketLength | i32 MessageType | u32 Crc   (12 bytes)
//! TransportBody      : i32 BodyType                (MessageType = Transport)
//! ConnectSegment     : u8 VersionMajor | u8 VersionMinor
//! ApplicationPayload : PacketLength - 12 opaque bytes
//! ```
//!
//! `PacketLength` counts the header itself. The CRC covers the first 8 header
//! bytes only; a mismatch means the stream can no longer be trusted.

use crate::checksum::header_crc;
use crate::error::{CodecError, CodecResult};
use crate::message::BinaryMessage;
use crate::reader::MessageReader;
use crate::segment::{read_window, write_window, Segment};
use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Size of the transport header on the wire
pub const HEADER_SIZE: usize = TransportHeaderSegment::SIZE;

/// Top-level message discriminator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum MessageType {
    /// Transport housekeeping (handshake, information)
    #[default]
    Transport = 0,
    /// Payload for the registered application handler
    Application = 1,
}

impl TryFrom<i32> for MessageType {
    type Error = CodecError;

    fn try_from(value: i32) -> CodecResult<Self> {
        match value {
            0 => Ok(Self::Transport),
            1 => Ok(Self::Application),
            other => Err(CodecError::invalid_message(format!(
                "unknown message type {other}"
            ))),
        }
    }
}

/// Transport body discriminator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum BodyType {
    #[default]
    ConnectionRequested = 0,
    ConnectionAccepted = 1,
    TransportInformation = 2,
}

impl TryFrom<i32> for BodyType {
    type Error = CodecError;

    fn try_from(value: i32) -> CodecResult<Self> {
        match value {
            0 => Ok(Self::ConnectionRequested),
            1 => Ok(Self::ConnectionAccepted),
            2 => Ok(Self::TransportInformation),
            other => Err(CodecError::invalid_message(format!(
                "unknown transport body type {other}"
            ))),
        }
    }
}

/// Transport protocol version exchanged during the handshake
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Majors must match; minors may differ freely
    pub fn is_compatible_with(&self, other: &ProtocolVersion) -> bool {
        self.major == other.major
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// CRC-protected transport header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportHeaderSegment {
    pub packet_length: u32,
    pub message_type: MessageType,
    pub crc: u32,
}

impl TransportHeaderSegment {
    pub const SIZE: usize = 12;

    pub fn new(packet_length: u32, message_type: MessageType) -> Self {
        Self {
            packet_length,
            message_type,
            crc: header_crc(packet_length, message_type as i32),
        }
    }

    /// Header for a body of `body_size` bytes
    pub fn for_body(body_size: usize, message_type: MessageType) -> CodecResult<Self> {
        let packet_length = u32::try_from(body_size + Self::SIZE).map_err(|_| {
            CodecError::invalid_message(format!("message body of {body_size} bytes is too large"))
        })?;
        Ok(Self::new(packet_length, message_type))
    }

    /// Bytes that follow the header
    pub fn body_len(&self) -> CodecResult<usize> {
        (self.packet_length as usize)
            .checked_sub(Self::SIZE)
            .ok_or_else(|| {
                CodecError::invalid_message(format!(
                    "packet length {} is shorter than the {}-byte header",
                    self.packet_length,
                    Self::SIZE
                ))
            })
    }
}

impl Segment for TransportHeaderSegment {
    fn size(&self) -> usize {
        Self::SIZE
    }

    fn write(&self, buffer: &mut [u8], offset: usize) -> CodecResult<()> {
        let window = write_window(buffer, offset, Self::SIZE, "TransportHeaderSegment")?;
        let message_type = self.message_type as i32;
        BigEndian::write_u32(&mut window[0..4], self.packet_length);
        BigEndian::write_i32(&mut window[4..8], message_type);
        BigEndian::write_u32(&mut window[8..12], header_crc(self.packet_length, message_type));
        Ok(())
    }

    fn read(&mut self, buffer: &[u8], offset: usize) -> CodecResult<()> {
        let window = read_window(buffer, offset, Self::SIZE, "TransportHeaderSegment")?;
        let packet_length = BigEndian::read_u32(&window[0..4]);
        let raw_type = BigEndian::read_i32(&window[4..8]);
        let crc = BigEndian::read_u32(&window[8..12]);

        let calculated = header_crc(packet_length, raw_type);
        if crc != calculated {
            debug!(packet_length, raw_type, expected = crc, calculated, "Transport header CRC mismatch");
            return Err(CodecError::MessageCrc {
                expected: crc,
                calculated,
            });
        }

        self.message_type = MessageType::try_from(raw_type)?;
        self.packet_length = packet_length;
        self.crc = crc;
        Ok(())
    }

    fn type_name(&self) -> &'static str {
        "TransportHeaderSegment"
    }
}

/// Body discriminator of a `Transport` message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportBodyHeaderSegment {
    pub body_type: BodyType,
}

impl TransportBodyHeaderSegment {
    pub const SIZE: usize = 4;

    pub fn new(body_type: BodyType) -> Self {
        Self { body_type }
    }
}

impl Segment for TransportBodyHeaderSegment {
    fn size(&self) -> usize {
        Self::SIZE
    }

    fn write(&self, buffer: &mut [u8], offset: usize) -> CodecResult<()> {
        let window = write_window(buffer, offset, Self::SIZE, "TransportBodyHeaderSegment")?;
        BigEndian::write_i32(window, self.body_type as i32);
        Ok(())
    }

    fn read(&mut self, buffer: &[u8], offset: usize) -> CodecResult<()> {
        let window = read_window(buffer, offset, Self::SIZE, "TransportBodyHeaderSegment")?;
        self.body_type = BodyType::try_from(BigEndian::read_i32(window))?;
        Ok(())
    }

    fn type_name(&self) -> &'static str {
        "TransportBodyHeaderSegment"
    }
}

/// Version payload of the connection handshake
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectSegment {
    pub version_major: u8,
    pub version_minor: u8,
}

impl ConnectSegment {
    pub const SIZE: usize = 2;

    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            version_major: version.major,
            version_minor: version.minor,
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        ProtocolVersion::new(self.version_major, self.version_minor)
    }
}

impl Segment for ConnectSegment {
    fn size(&self) -> usize {
        Self::SIZE
    }

    fn write(&self, buffer: &mut [u8], offset: usize) -> CodecResult<()> {
        let window = write_window(buffer, offset, Self::SIZE, "ConnectSegment")?;
        window[0] = self.version_major;
        window[1] = self.version_minor;
        Ok(())
    }

    fn read(&mut self, buffer: &[u8], offset: usize) -> CodecResult<()> {
        let window = read_window(buffer, offset, Self::SIZE, "ConnectSegment")?;
        self.version_major = window[0];
        self.version_minor = window[1];
        Ok(())
    }

    fn type_name(&self) -> &'static str {
        "ConnectSegment"
    }
}

/// Decoded body of a `Transport` message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportBody {
    ConnectionRequested(ProtocolVersion),
    ConnectionAccepted(ProtocolVersion),
    TransportInformation(Bytes),
}

impl TransportBody {
    /// Decode the bytes following a `Transport` header
    pub fn decode(body: &[u8]) -> CodecResult<Self> {
        let mut reader = MessageReader::new(body);
        let body_header = reader.read::<TransportBodyHeaderSegment>()?;
        let decoded = match body_header.body_type {
            BodyType::ConnectionRequested => {
                Self::ConnectionRequested(reader.read::<ConnectSegment>()?.version())
            }
            BodyType::ConnectionAccepted => {
                Self::ConnectionAccepted(reader.read::<ConnectSegment>()?.version())
            }
            BodyType::TransportInformation => {
                return Ok(Self::TransportInformation(reader.read_remaining().data));
            }
        };
        reader.expect_exhausted("transport connect body")?;
        Ok(decoded)
    }

    pub fn body_type(&self) -> BodyType {
        match self {
            Self::ConnectionRequested(_) => BodyType::ConnectionRequested,
            Self::ConnectionAccepted(_) => BodyType::ConnectionAccepted,
            Self::TransportInformation(_) => BodyType::TransportInformation,
        }
    }
}

/// Prepend a header sized for `body` and tagged with `message_type`
pub fn frame(mut body: BinaryMessage, message_type: MessageType) -> CodecResult<BinaryMessage> {
    let header = TransportHeaderSegment::for_body(body.size(), message_type)?;
    body.prepend(header);
    Ok(body)
}

/// Frame an application payload for the socket
pub fn frame_application(body: BinaryMessage) -> CodecResult<BinaryMessage> {
    frame(body, MessageType::Application)
}

/// Bytes following `header`, i.e. `PacketLength - HEADER_SIZE`
pub fn application_body_len(header: &TransportHeaderSegment) -> CodecResult<usize> {
    header.body_len()
}

/// Complete connection handshake message: header, body type, version
pub fn connect_message(body_type: BodyType, version: ProtocolVersion) -> CodecResult<BinaryMessage> {
    let body = BinaryMessage::new()
        .with(TransportBodyHeaderSegment::new(body_type))
        .with(ConnectSegment::new(version));
    frame(body, MessageType::Transport)
}
