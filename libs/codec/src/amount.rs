//! Monetary amount segment with its own integrity check
//!
//! Amounts (credits, bets, wins) carry a CRC over their value so a corrupted
//! amount is rejected even when the surrounding transport header was fine.

use crate::checksum::amount_crc;
use crate::error::{CodecError, CodecResult};
use crate::segment::{read_window, write_window, Segment};
use byteorder::{BigEndian, ByteOrder};
use tracing::debug;

/// `i64 value | u32 crc`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AmountSegment {
    pub value: i64,
}

impl AmountSegment {
    pub const SIZE: usize = 12;

    pub fn new(value: i64) -> Self {
        Self { value }
    }
}

impl Segment for AmountSegment {
    fn size(&self) -> usize {
        Self::SIZE
    }

    fn write(&self, buffer: &mut [u8], offset: usize) -> CodecResult<()> {
        let window = write_window(buffer, offset, Self::SIZE, "AmountSegment")?;
        BigEndian::write_i64(&mut window[..8], self.value);
        BigEndian::write_u32(&mut window[8..], amount_crc(self.value));
        Ok(())
    }

    fn read(&mut self, buffer: &[u8], offset: usize) -> CodecResult<()> {
        let window = read_window(buffer, offset, Self::SIZE, "AmountSegment")?;
        let value = BigEndian::read_i64(&window[..8]);
        let expected = BigEndian::read_u32(&window[8..]);
        let calculated = amount_crc(value);
        if expected != calculated {
            debug!(expected, calculated, "Amount CRC mismatch");
            return Err(CodecError::AmountCrc {
                expected,
                calculated,
            });
        }
        self.value = value;
        Ok(())
    }

    fn type_name(&self) -> &'static str {
        "AmountSegment"
    }
}
