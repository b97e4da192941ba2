//! # Binary Message
//!
//! An ordered, appendable/prependable list of segments. The total size is the
//! sum of the segment sizes, so it is known without a trial serialization
//! pass - this is what lets the transport compute the header's packet length
//! and prepend the header after the body has been assembled.

use crate::error::{CodecError, CodecResult};
use crate::segment::Segment;

/// Ordered sequence of segments; pure data, no I/O state
#[derive(Debug, Default)]
pub struct BinaryMessage {
    segments: Vec<Box<dyn Segment>>,
}

impl BinaryMessage {
    /// Create an empty message
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a segment after all existing segments
    pub fn append(&mut self, segment: impl Segment + 'static) -> &mut Self {
        self.segments.push(Box::new(segment));
        self
    }

    /// Builder-style append
    pub fn with(mut self, segment: impl Segment + 'static) -> Self {
        self.append(segment);
        self
    }

    /// Insert a segment before all existing segments
    pub fn prepend(&mut self, segment: impl Segment + 'static) -> &mut Self {
        self.segments.insert(0, Box::new(segment));
        self
    }

    /// Total size in bytes of all segments
    pub fn size(&self) -> usize {
        self.segments.iter().map(|segment| segment.size()).sum()
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segment type names in order, for diagnostics
    pub fn segment_types(&self) -> Vec<&'static str> {
        self.segments.iter().map(|segment| segment.type_name()).collect()
    }

    /// Serialize every segment into `buffer` starting at `offset`
    ///
    /// Capacity is checked for the whole message up front so a short buffer
    /// never ends up holding a partially written message.
    pub fn write(&self, buffer: &mut [u8], offset: usize) -> CodecResult<usize> {
        let required = self.size();
        let available = buffer.len().saturating_sub(offset);
        if available < required {
            return Err(CodecError::Overflow {
                required_size: required,
                available_bytes: available,
                segment_types: self.segment_types(),
            });
        }

        let mut position = offset;
        for segment in &self.segments {
            segment.write(buffer, position)?;
            position += segment.size();
        }
        Ok(position - offset)
    }

    /// Serialize into a freshly allocated buffer of exactly `size()` bytes
    pub fn to_bytes(&self) -> CodecResult<Vec<u8>> {
        let mut buffer = vec![0u8; self.size()];
        self.write(&mut buffer, 0)?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{BlobSegment, U16Segment, U32Segment, U8Segment};

    #[test]
    fn test_size_is_sum_of_segments() {
        let message = BinaryMessage::new()
            .with(U8Segment::new(1))
            .with(U32Segment::new(2))
            .with(BlobSegment::new(vec![0u8; 5]));
        assert_eq!(message.size(), 1 + 4 + 9);
        assert_eq!(message.len(), 3);
    }

    #[test]
    fn test_prepend_goes_first() {
        let mut message = BinaryMessage::new().with(U8Segment::new(0xBB));
        message.prepend(U16Segment::new(0xAAAA));
        assert_eq!(message.to_bytes().unwrap(), vec![0xAA, 0xAA, 0xBB]);
        assert_eq!(message.segment_types(), vec!["U16Segment", "U8Segment"]);
    }

    #[test]
    fn test_write_at_offset_returns_bytes_written() {
        let message = BinaryMessage::new().with(U16Segment::new(0x0102));
        let mut buffer = [0u8; 4];
        let written = message.write(&mut buffer, 2).unwrap();
        assert_eq!(written, 2);
        assert_eq!(buffer, [0, 0, 1, 2]);
    }

    #[test]
    fn test_overflow_lists_every_segment_and_writes_nothing() {
        let message = BinaryMessage::new()
            .with(U8Segment::new(1))
            .with(U32Segment::new(2));
        let mut buffer = [0xEEu8; 4];
        let err = message.write(&mut buffer, 0).unwrap_err();
        assert_eq!(
            err,
            CodecError::Overflow {
                required_size: 5,
                available_bytes: 4,
                segment_types: vec!["U8Segment", "U32Segment"],
            }
        );
        assert_eq!(buffer, [0xEE; 4]);
    }

    #[test]
    fn test_empty_message() {
        let message = BinaryMessage::new();
        assert!(message.is_empty());
        assert_eq!(message.to_bytes().unwrap(), Vec::<u8>::new());
    }
}
