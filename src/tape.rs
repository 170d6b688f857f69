//! Tape image preparation.
//!
//! Tape images carry a format byte at offset 0 followed by a header. The
//! relay expects a handful of header bytes nibble-swapped before the image
//! goes on the wire; password-protected formats swap an extra run.

use crate::error::{BridgeError, Result};

/// Bytes of header metadata announced alongside a tape upload.
pub const HEADER_SIZE: u8 = 10;

/// Tape image formats, from the image's first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapeFormat {
    Basic,
    BasicPassword,
    ExtBasic,
    ExtBasicPassword,
    Data,
    Binary,
    /// A format byte outside the known set, passed through untouched.
    Unknown(u8),
}

impl TapeFormat {
    pub fn from_byte(value: u8) -> Self {
        match value {
            0x70 => TapeFormat::Basic,
            0x71 => TapeFormat::BasicPassword,
            0x72 => TapeFormat::ExtBasic,
            0x73 => TapeFormat::ExtBasicPassword,
            0x74 => TapeFormat::Data,
            0x76 => TapeFormat::Binary,
            other => TapeFormat::Unknown(other),
        }
    }

    /// Whether the header carries a password block.
    pub fn has_password(self) -> bool {
        matches!(self, TapeFormat::BasicPassword | TapeFormat::ExtBasicPassword)
    }
}

/// Swap the high and low nibbles of a byte. Self-inverse.
pub fn swap_nibbles(value: u8) -> u8 {
    value.rotate_left(4)
}

/// Prepare a tape image for upload to the relay.
///
/// Header bytes 1..=7 are always nibble-swapped; bytes 10..=17 additionally
/// when the format carries a password. The input is not modified.
pub fn encode_for_relay(image: &[u8]) -> Result<Vec<u8>> {
    if image.len() < 8 {
        return Err(BridgeError::Protocol(format!(
            "tape image too short: {} bytes",
            image.len()
        )));
    }
    let format = TapeFormat::from_byte(image[0]);
    let mut encoded = image.to_vec();
    for byte in &mut encoded[1..=7] {
        *byte = swap_nibbles(*byte);
    }
    if format.has_password() {
        if encoded.len() < 18 {
            return Err(BridgeError::Protocol(format!(
                "tape image too short for password header: {} bytes",
                encoded.len()
            )));
        }
        for byte in &mut encoded[10..=17] {
            *byte = swap_nibbles(*byte);
        }
    }
    Ok(encoded)
}
