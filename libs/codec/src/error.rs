//! Codec-level errors for segment framing
//!
//! Every framing fault carries enough context to tell a short buffer apart
//! from corrupted data: overflow/underflow report the required and available
//! byte counts plus the segment type(s) involved, integrity faults report both
//! checksums.

use thiserror::Error;

/// Segment framing, integrity and protocol errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Buffer too small to write a segment (or a whole message)
    #[error("Binary message overflow: need {required_size} bytes, {available_bytes} available (segments: {})", .segment_types.join(", "))]
    Overflow {
        required_size: usize,
        available_bytes: usize,
        segment_types: Vec<&'static str>,
    },

    /// Buffer too small to read a segment
    #[error("Binary message underflow: need {required_size} bytes, {available_bytes} available (segments: {})", .segment_types.join(", "))]
    Underflow {
        required_size: usize,
        available_bytes: usize,
        segment_types: Vec<&'static str>,
    },

    /// Transport header CRC mismatch - the connection cannot be trusted
    #[error("Message CRC mismatch: header carries {expected:#010x}, calculated {calculated:#010x}")]
    MessageCrc { expected: u32, calculated: u32 },

    /// Amount CRC mismatch - the monetary value was corrupted
    #[error("Amount CRC mismatch: segment carries {expected:#010x}, calculated {calculated:#010x}")]
    AmountCrc { expected: u32, calculated: u32 },

    /// Well-formed bytes that make no sense at this point of the protocol
    #[error("Invalid message: {reason}")]
    InvalidMessage { reason: String },

    /// A reply arrived, but not the one the exchange was waiting for
    #[error("Unexpected reply type: expected {expected}, got {actual}")]
    UnexpectedReplyType { expected: String, actual: String },
}

impl CodecError {
    /// Create an overflow error for a single segment type
    pub fn overflow(required_size: usize, available_bytes: usize, segment_type: &'static str) -> Self {
        Self::Overflow {
            required_size,
            available_bytes,
            segment_types: vec![segment_type],
        }
    }

    /// Create an underflow error for a single segment type
    pub fn underflow(required_size: usize, available_bytes: usize, segment_type: &'static str) -> Self {
        Self::Underflow {
            required_size,
            available_bytes,
            segment_types: vec![segment_type],
        }
    }

    /// Create an invalid message error
    pub fn invalid_message(reason: impl Into<String>) -> Self {
        Self::InvalidMessage {
            reason: reason.into(),
        }
    }

    /// Create an unexpected reply error
    pub fn unexpected_reply(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::UnexpectedReplyType {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Required size for overflow/underflow errors
    pub fn required_size(&self) -> Option<usize> {
        match self {
            Self::Overflow { required_size, .. } | Self::Underflow { required_size, .. } => {
                Some(*required_size)
            }
            _ => None,
        }
    }

    /// Available byte count for overflow/underflow errors
    pub fn available_bytes(&self) -> Option<usize> {
        match self {
            Self::Overflow { available_bytes, .. } | Self::Underflow { available_bytes, .. } => {
                Some(*available_bytes)
            }
            _ => None,
        }
    }

    /// Integrity faults mean the peer's data can no longer be trusted
    pub fn is_integrity_fault(&self) -> bool {
        matches!(self, Self::MessageCrc { .. } | Self::AmountCrc { .. })
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Overflow { .. } | Self::Underflow { .. } => "framing",
            Self::MessageCrc { .. } | Self::AmountCrc { .. } => "integrity",
            Self::InvalidMessage { .. } | Self::UnexpectedReplyType { .. } => "protocol",
        }
    }
}

/// Result type for codec operations
pub type CodecResult<T> = std::result::Result<T, CodecError>;
