//! # Segment Framing
//!
//! A segment is the atomic unit of the wire format: a self-describing byte
//! range whose exact size is known before it is written. Segments are value
//! objects created per message; they own no I/O state.
//!
//! ## Bounds Contract
//!
//! - `write` never touches bytes outside `[offset, offset + size)` and fails
//!   with [`CodecError::Overflow`] instead of truncating
//! - `read` never reads past the end of the buffer and fails with
//!   [`CodecError::Underflow`] instead of producing a partial value
//!
//! All multi-byte integers are network byte order.

use crate::error::{CodecError, CodecResult};
use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use std::fmt;

/// Fixed-size, self-describing unit of the binary wire format
pub trait Segment: fmt::Debug + Send + Sync {
    /// Exact number of bytes this segment occupies on the wire
    fn size(&self) -> usize;

    /// Serialize into `buffer` starting at `offset`
    fn write(&self, buffer: &mut [u8], offset: usize) -> CodecResult<()>;

    /// Deserialize from `buffer` starting at `offset`
    fn read(&mut self, buffer: &[u8], offset: usize) -> CodecResult<()>;

    /// Name used in overflow/underflow diagnostics
    fn type_name(&self) -> &'static str;
}

/// Borrow the writable window `[offset, offset + size)` or fail with Overflow
pub fn write_window<'a>(
    buffer: &'a mut [u8],
    offset: usize,
    size: usize,
    segment_type: &'static str,
) -> CodecResult<&'a mut [u8]> {
    let available = buffer.len().saturating_sub(offset);
    if available < size {
        return Err(CodecError::overflow(size, available, segment_type));
    }
    Ok(&mut buffer[offset..offset + size])
}

/// Borrow the readable window `[offset, offset + size)` or fail with Underflow
pub fn read_window<'a>(
    buffer: &'a [u8],
    offset: usize,
    size: usize,
    segment_type: &'static str,
) -> CodecResult<&'a [u8]> {
    let available = buffer.len().saturating_sub(offset);
    if available < size {
        return Err(CodecError::underflow(size, available, segment_type));
    }
    Ok(&buffer[offset..offset + size])
}

macro_rules! numeric_segment {
    ($(#[$doc:meta])* $name:ident, $ty:ty, $size:expr, $read:path, $write:path) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $name {
            pub value: $ty,
        }

        impl $name {
            pub const SIZE: usize = $size;

            pub fn new(value: $ty) -> Self {
                Self { value }
            }
        }

        impl Segment for $name {
            fn size(&self) -> usize {
                Self::SIZE
            }

            fn write(&self, buffer: &mut [u8], offset: usize) -> CodecResult<()> {
                let window = write_window(buffer, offset, Self::SIZE, stringify!($name))?;
                $write(window, self.value);
                Ok(())
            }

            fn read(&mut self, buffer: &[u8], offset: usize) -> CodecResult<()> {
                let window = read_window(buffer, offset, Self::SIZE, stringify!($name))?;
                self.value = $read(window);
                Ok(())
            }

            fn type_name(&self) -> &'static str {
                stringify!($name)
            }
        }
    };
}

numeric_segment!(
    /// Unsigned 16-bit integer, network order
    U16Segment, u16, 2, BigEndian::read_u16, BigEndian::write_u16
);
numeric_segment!(
    /// Unsigned 32-bit integer, network order
    U32Segment, u32, 4, BigEndian::read_u32, BigEndian::write_u32
);
numeric_segment!(
    /// Signed 32-bit integer, network order
    I32Segment, i32, 4, BigEndian::read_i32, BigEndian::write_i32
);
numeric_segment!(
    /// Unsigned 64-bit integer, network order
    U64Segment, u64, 8, BigEndian::read_u64, BigEndian::write_u64
);

/// Single byte
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct U8Segment {
    pub value: u8,
}

impl U8Segment {
    pub const SIZE: usize = 1;

    pub fn new(value: u8) -> Self {
        Self { value }
    }
}

impl Segment for U8Segment {
    fn size(&self) -> usize {
        Self::SIZE
    }

    fn write(&self, buffer: &mut [u8], offset: usize) -> CodecResult<()> {
        write_window(buffer, offset, Self::SIZE, "U8Segment")?[0] = self.value;
        Ok(())
    }

    fn read(&mut self, buffer: &[u8], offset: usize) -> CodecResult<()> {
        self.value = read_window(buffer, offset, Self::SIZE, "U8Segment")?[0];
        Ok(())
    }

    fn type_name(&self) -> &'static str {
        "U8Segment"
    }
}

/// Boolean encoded as a single 0/1 byte
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoolSegment {
    pub value: bool,
}

impl BoolSegment {
    pub const SIZE: usize = 1;

    pub fn new(value: bool) -> Self {
        Self { value }
    }
}

impl Segment for BoolSegment {
    fn size(&self) -> usize {
        Self::SIZE
    }

    fn write(&self, buffer: &mut [u8], offset: usize) -> CodecResult<()> {
        write_window(buffer, offset, Self::SIZE, "BoolSegment")?[0] = u8::from(self.value);
        Ok(())
    }

    fn read(&mut self, buffer: &[u8], offset: usize) -> CodecResult<()> {
        self.value = match read_window(buffer, offset, Self::SIZE, "BoolSegment")?[0] {
            0 => false,
            1 => true,
            other => {
                return Err(CodecError::invalid_message(format!(
                    "boolean byte must be 0 or 1, got {other}"
                )))
            }
        };
        Ok(())
    }

    fn type_name(&self) -> &'static str {
        "BoolSegment"
    }
}

/// Length-prefixed opaque bytes: `u32 length | bytes`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobSegment {
    pub data: Bytes,
}

impl BlobSegment {
    const PREFIX_SIZE: usize = 4;

    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl Segment for BlobSegment {
    fn size(&self) -> usize {
        Self::PREFIX_SIZE + self.data.len()
    }

    fn write(&self, buffer: &mut [u8], offset: usize) -> CodecResult<()> {
        let len = u32::try_from(self.data.len()).map_err(|_| {
            CodecError::invalid_message(format!("blob of {} bytes exceeds u32 length", self.data.len()))
        })?;
        let window = write_window(buffer, offset, self.size(), "BlobSegment")?;
        BigEndian::write_u32(&mut window[..Self::PREFIX_SIZE], len);
        window[Self::PREFIX_SIZE..].copy_from_slice(&self.data);
        Ok(())
    }

    fn read(&mut self, buffer: &[u8], offset: usize) -> CodecResult<()> {
        let prefix = read_window(buffer, offset, Self::PREFIX_SIZE, "BlobSegment")?;
        let len = BigEndian::read_u32(prefix) as usize;
        let window = read_window(buffer, offset, Self::PREFIX_SIZE + len, "BlobSegment")?;
        self.data = Bytes::copy_from_slice(&window[Self::PREFIX_SIZE..]);
        Ok(())
    }

    fn type_name(&self) -> &'static str {
        "BlobSegment"
    }
}

/// Unprefixed opaque bytes whose length is fixed at construction
///
/// Used to carry application payloads, where the length is implied by the
/// transport header rather than encoded in the payload itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawSegment {
    pub data: Bytes,
}

impl RawSegment {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// Zeroed placeholder of `len` bytes, to be filled by `read`
    pub fn with_len(len: usize) -> Self {
        Self {
            data: Bytes::from(vec![0u8; len]),
        }
    }
}

impl Segment for RawSegment {
    fn size(&self) -> usize {
        self.data.len()
    }

    fn write(&self, buffer: &mut [u8], offset: usize) -> CodecResult<()> {
        write_window(buffer, offset, self.data.len(), "RawSegment")?.copy_from_slice(&self.data);
        Ok(())
    }

    fn read(&mut self, buffer: &[u8], offset: usize) -> CodecResult<()> {
        let window = read_window(buffer, offset, self.data.len(), "RawSegment")?;
        self.data = Bytes::copy_from_slice(window);
        Ok(())
    }

    fn type_name(&self) -> &'static str {
        "RawSegment"
    }
}
