//! Line resynchronization.
//!
//! Before a command is issued both ends must agree the line is idle. The
//! host sends SYN and expects SYN back; a NAK means the relay is still
//! flushing a previous error (the trailing code byte is discarded and the
//! exchange retried); silence or anything else burns one attempt.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::ascii;
use crate::error::Result;
use crate::transport::ByteStream;

/// Attempt to synchronize with the relay.
///
/// Returns `Ok(true)` once the relay echoes SYN, `Ok(false)` after
/// `max_attempts` consecutive failures. Never an error except for transport
/// I/O failure.
pub async fn synchronize<T: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut ByteStream<T>,
    reply_timeout: Duration,
    max_attempts: u32,
) -> Result<bool> {
    let mut attempts = 0;
    while attempts < max_attempts {
        stream.write_byte(ascii::SYN).await?;
        match stream.try_read_byte(reply_timeout).await? {
            Some(ascii::SYN) => return Ok(true),
            Some(ascii::NAK) => {
                // Relay is reporting a stale error; swallow the code byte
                // and retry without counting an attempt.
                let _ = stream.try_read_byte(reply_timeout).await?;
            }
            Some(other) => {
                tracing::debug!(byte = other, "unexpected reply during sync");
                attempts += 1;
            }
            None => {
                attempts += 1;
            }
        }
    }
    Ok(false)
}
