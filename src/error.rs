//! Error types for sharplink.

use std::fmt;

use thiserror::Error;

/// Error codes shared with the relay firmware.
///
/// The numeric assignments match the firmware's result table; a NAK on the
/// wire is always followed by one of these as a single byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Ok,
    Timeout,
    Cancelled,
    Unexpected,
    Overflow,
    SyncError,
    End,
    /// A code outside the known table, preserved verbatim.
    Unknown(u8),
}

impl ErrorCode {
    /// Decode a wire byte into an error code.
    pub fn from_byte(value: u8) -> Self {
        match value {
            0 => ErrorCode::Ok,
            1 => ErrorCode::Timeout,
            2 => ErrorCode::Cancelled,
            3 => ErrorCode::Unexpected,
            4 => ErrorCode::Overflow,
            5 => ErrorCode::SyncError,
            0xFF => ErrorCode::End,
            other => ErrorCode::Unknown(other),
        }
    }

    /// Encode the error code as a wire byte.
    pub fn as_byte(self) -> u8 {
        match self {
            ErrorCode::Ok => 0,
            ErrorCode::Timeout => 1,
            ErrorCode::Cancelled => 2,
            ErrorCode::Unexpected => 3,
            ErrorCode::Overflow => 4,
            ErrorCode::SyncError => 5,
            ErrorCode::End => 0xFF,
            ErrorCode::Unknown(value) => value,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Ok => write!(f, "no error"),
            ErrorCode::Timeout => write!(f, "timeout occurred"),
            ErrorCode::Cancelled => write!(f, "request cancelled"),
            ErrorCode::Unexpected => write!(f, "unexpected command received"),
            ErrorCode::Overflow => write!(f, "buffer overflow occurred"),
            ErrorCode::SyncError => write!(f, "synchronization error"),
            ErrorCode::End => write!(f, "end of stream"),
            ErrorCode::Unknown(value) => write!(f, "unknown error code 0x{value:02X}"),
        }
    }
}

/// Main error type for all bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// I/O error on the underlying transport or host filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A timed read expired without producing a byte.
    #[error("read timed out")]
    Timeout,

    /// The peer answered NAK with the given error code.
    #[error("peer reported failure: {0}")]
    Peer(ErrorCode),

    /// A byte arrived that the protocol state does not allow.
    #[error("unexpected byte 0x{0:02X}")]
    UnexpectedByte(u8),

    /// Protocol violation that does not fit a more specific variant.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The operation was cancelled. A distinct outcome, not a failure.
    #[error("operation cancelled")]
    Cancelled,

    /// Synchronization gave up after the maximum number of attempts.
    #[error("synchronization failed")]
    SyncFailed,

    /// The relay reported a firmware version this crate does not speak.
    #[error("unsupported relay version {actual_major}.{actual_minor} (expected {expected_major}.{expected_minor})")]
    VersionMismatch {
        expected_major: u8,
        expected_minor: u8,
        actual_major: u8,
        actual_minor: u8,
    },

    /// The relay advertised a transfer buffer below the workable minimum.
    #[error("relay buffer size {0} is too small")]
    BufferTooSmall(u8),

    /// The session has been disconnected.
    #[error("not connected")]
    NotConnected,
}

/// Result type alias using BridgeError.
pub type Result<T> = std::result::Result<T, BridgeError>;
