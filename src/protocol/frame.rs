//! Emulator response frame construction.
//!
//! Disk responses carry an 8-bit additive checksum. A sealed frame is
//! `[0x00] ++ payload ++ checksum`, where the checksum covers the leading
//! zero and the payload. Larger transfers embed checksummed blocks, each
//! block carrying its own sum.

use bytes::{BufMut, Bytes, BytesMut};

/// Single-byte success response.
pub const RESULT_OK: &[u8] = &[0x00];
/// Single-byte failure response.
pub const RESULT_FAIL: &[u8] = &[0xFF];
/// Two-byte error frame for queries with nothing to return.
pub const ERROR_FRAME: &[u8] = &[0xFF, 0x00];

/// 8-bit running sum of a byte slice.
pub fn additive_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// Incremental builder for emulator response payloads.
#[derive(Default)]
pub struct FrameBuilder {
    payload: BytesMut,
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one byte.
    pub fn push(&mut self, byte: u8) -> &mut Self {
        self.payload.put_u8(byte);
        self
    }

    /// Append a byte slice.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> &mut Self {
        self.payload.put_slice(bytes);
        self
    }

    /// Append the bytes of an ASCII string.
    pub fn push_ascii(&mut self, text: &str) -> &mut Self {
        self.payload.put_slice(text.as_bytes());
        self
    }

    /// Append a 3-byte little-endian size.
    pub fn push_size(&mut self, size: u32) -> &mut Self {
        self.payload.put_slice(&size.to_le_bytes()[..3]);
        self
    }

    /// Append a data block followed by its own additive checksum.
    pub fn push_block(&mut self, data: &[u8]) -> &mut Self {
        self.payload.put_slice(data);
        self.payload.put_u8(additive_checksum(data));
        self
    }

    /// Prefix with 0x00 and append the checksum of prefix plus payload.
    pub fn seal(self) -> Bytes {
        let mut framed = BytesMut::with_capacity(self.payload.len() + 2);
        framed.put_u8(0x00);
        framed.put_slice(&self.payload);
        let checksum = additive_checksum(&framed);
        framed.put_u8(checksum);
        framed.freeze()
    }

    /// The raw payload without sealing.
    pub fn into_bytes(self) -> Bytes {
        self.payload.freeze()
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
