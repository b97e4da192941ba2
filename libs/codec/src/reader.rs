//! Cursor over a received buffer that extracts segments in order

use crate::error::{CodecError, CodecResult};
use crate::segment::{RawSegment, Segment};

/// Sequential segment reader over a borrowed buffer
#[derive(Debug, Clone)]
pub struct MessageReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> MessageReader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    /// Read the next segment of type `S`
    pub fn read<S: Segment + Default>(&mut self) -> CodecResult<S> {
        let mut segment = S::default();
        self.read_into(&mut segment)?;
        Ok(segment)
    }

    /// Fill a pre-sized segment (e.g. a [`RawSegment`] of known length)
    pub fn read_into(&mut self, segment: &mut dyn Segment) -> CodecResult<()> {
        segment.read(self.buffer, self.position)?;
        self.position += segment.size();
        Ok(())
    }

    /// Consume everything left as an opaque segment
    pub fn read_remaining(&mut self) -> RawSegment {
        let raw = RawSegment::new(bytes::Bytes::copy_from_slice(self.remaining_bytes()));
        self.position = self.buffer.len();
        raw
    }

    /// Current cursor position
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    pub fn remaining_bytes(&self) -> &'a [u8] {
        &self.buffer[self.position.min(self.buffer.len())..]
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Fail unless the whole buffer has been consumed
    pub fn expect_exhausted(&self, context: &str) -> CodecResult<()> {
        if self.is_exhausted() {
            Ok(())
        } else {
            Err(CodecError::invalid_message(format!(
                "{context}: {} trailing bytes",
                self.remaining()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::BinaryMessage;
    use crate::segment::{BlobSegment, BoolSegment, U16Segment, U32Segment};

    #[test]
    fn test_reads_segments_in_order() {
        let bytes = BinaryMessage::new()
            .with(U16Segment::new(513))
            .with(BlobSegment::new(&b"xyz"[..]))
            .with(BoolSegment::new(true))
            .to_bytes()
            .unwrap();

        let mut reader = MessageReader::new(&bytes);
        assert_eq!(reader.read::<U16Segment>().unwrap().value, 513);
        assert_eq!(&reader.read::<BlobSegment>().unwrap().data[..], b"xyz");
        assert!(reader.read::<BoolSegment>().unwrap().value);
        assert!(reader.is_exhausted());
        assert!(reader.expect_exhausted("test").is_ok());
    }

    #[test]
    fn test_failed_read_does_not_advance() {
        let bytes = [0u8, 1];
        let mut reader = MessageReader::new(&bytes);
        assert!(reader.read::<U32Segment>().is_err());
        assert_eq!(reader.position(), 0);
        assert_eq!(reader.read::<U16Segment>().unwrap().value, 1);
    }

    #[test]
    fn test_read_remaining_and_trailing_check() {
        let bytes = [1u8, 2, 3, 4];
        let mut reader = MessageReader::new(&bytes);
        reader.read::<U16Segment>().unwrap();
        assert!(reader.expect_exhausted("header").is_err());
        let rest = reader.read_remaining();
        assert_eq!(&rest.data[..], &[3, 4]);
        assert_eq!(reader.remaining(), 0);
    }
}
