//! # Foundation Link Codec
//!
//! ## Purpose
//!
//! The "rules" layer of the foundation link: how bytes on the socket become
//! messages and back again.
//! - Bounds-checked segment framing ([`Segment`])
//! - Ordered segment composition ([`BinaryMessage`])
//! - Sequential decoding ([`MessageReader`])
//! - The CRC-protected transport envelope ([`envelope`])
//!
//! ## Architecture Role
//!
//! ```text
//!  codec  →  network  →  link
//!    ↑          ↓          ↓
//! Segments   Sockets    Roles, categories,
//! Envelope   Framing    negotiation
//! ```
//!
//! ## What This Crate Does NOT Contain
//! - Socket management or connection handling (belongs in `network`)
//! - Category or negotiation messages (belongs in `link`)
//!
//! All multi-byte integers are network byte order.

pub mod amount;
pub mod checksum;
pub mod envelope;
pub mod error;
pub mod message;
pub mod reader;
pub mod segment;

pub use amount::AmountSegment;
pub use checksum::{amount_crc, header_crc};
pub use envelope::{
    application_body_len, connect_message, frame, frame_application, BodyType, ConnectSegment, MessageType,
    ProtocolVersion, TransportBody, TransportBodyHeaderSegment, TransportHeaderSegment,
    HEADER_SIZE,
};
pub use error::{CodecError, CodecResult};
pub use message::BinaryMessage;
pub use reader::MessageReader;
pub use segment::{
    read_window, write_window, BlobSegment, BoolSegment, I32Segment, RawSegment, Segment, U16Segment, U32Segment,
    U64Segment, U8Segment,
};
