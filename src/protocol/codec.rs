//! Escaped frame decoding.
//!
//! Inbound data runs are delimited STX..ETX with DLE as an escape prefix:
//! a byte following DLE is literal payload regardless of its value. NAK
//! anywhere aborts the frame with the peer's error code, CAN aborts it as a
//! cancellation. No checksum is verified at this layer.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::ascii;
use crate::error::{BridgeError, ErrorCode, Result};
use crate::transport::ByteStream;

/// Read one escaped frame off the stream.
///
/// The wait for the opening byte is unbounded (the peer may take arbitrarily
/// long to start sending); each subsequent byte must arrive within
/// `byte_timeout`. When a cancellation token is supplied and fires, a CAN
/// byte is written to the peer before returning [`BridgeError::Cancelled`].
pub async fn read_frame<T: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut ByteStream<T>,
    byte_timeout: Duration,
    cancel: Option<&CancellationToken>,
) -> Result<Bytes> {
    let first = match cancel {
        Some(token) => match stream.read_byte_cancel(token).await {
            Err(BridgeError::Cancelled) => {
                stream.write_byte(ascii::CAN).await?;
                return Err(BridgeError::Cancelled);
            }
            other => other?,
        },
        None => stream.read_byte().await?,
    };

    match first {
        ascii::STX => {}
        ascii::NAK => {
            let code = stream.read_byte_timeout(byte_timeout).await?;
            return Err(BridgeError::Peer(ErrorCode::from_byte(code)));
        }
        other => return Err(BridgeError::UnexpectedByte(other)),
    }

    let mut payload = BytesMut::new();
    loop {
        if let Some(token) = cancel {
            if token.is_cancelled() {
                stream.write_byte(ascii::CAN).await?;
                return Err(BridgeError::Cancelled);
            }
        }
        match stream.read_byte_timeout(byte_timeout).await? {
            ascii::DLE => {
                let literal = stream.read_byte_timeout(byte_timeout).await?;
                payload.put_u8(literal);
            }
            ascii::ETX => break,
            ascii::NAK => {
                let code = stream.read_byte_timeout(byte_timeout).await?;
                return Err(BridgeError::Peer(ErrorCode::from_byte(code)));
            }
            ascii::CAN => return Err(BridgeError::Cancelled),
            byte => payload.put_u8(byte),
        }
    }

    Ok(payload.freeze())
}
