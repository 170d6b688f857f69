//! ASCII control bytes used by the relay protocol.
//!
//! The wire protocol is built entirely from classic ASCII control codes:
//! SYN for resynchronization, SOH to start a command, STX/ETX to delimit
//! escaped data runs, ACK/NAK for handshakes, DLE as the escape prefix and
//! CAN to abort a transfer.

/// Null.
pub const NUL: u8 = 0x00;
/// Start of Heading - begins every command packet.
pub const SOH: u8 = 0x01;
/// Start of Text - begins an escaped data run.
pub const STX: u8 = 0x02;
/// End of Text - ends an escaped data run.
pub const ETX: u8 = 0x03;
/// Acknowledge.
pub const ACK: u8 = 0x06;
/// Line feed.
pub const LF: u8 = 0x0A;
/// Carriage return.
pub const CR: u8 = 0x0D;
/// Data Link Escape - the next byte is literal payload.
pub const DLE: u8 = 0x10;
/// Negative acknowledge - followed by one error-code byte.
pub const NAK: u8 = 0x15;
/// Synchronous idle - resynchronization byte.
pub const SYN: u8 = 0x16;
/// Cancel - aborts an in-flight transfer.
pub const CAN: u8 = 0x18;
/// Substitute - used by the disk protocol as the end-of-file sentinel.
pub const SUB: u8 = 0x1A;

/// Whether a byte renders as text on the host console.
pub fn is_printable(value: u8) -> bool {
    (0x20..=0x7F).contains(&value) || (0x08..=CR).contains(&value)
}
