//! Byte-level transport wrapper.
//!
//! The relay protocol is strictly stop-and-wait, so everything above this
//! layer works one byte (or one small word) at a time. [`ByteStream`] wraps
//! any ordered byte transport — a serial-port adapter in production, a
//! `tokio::io::duplex` pipe in tests — and provides the timed, cancellable
//! read primitives the protocol needs.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, Result};

/// Byte-oriented view of an ordered transport.
pub struct ByteStream<T> {
    inner: T,
}

impl<T: AsyncRead + AsyncWrite + Unpin> ByteStream<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Consume the wrapper and return the underlying transport.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Read one byte, waiting indefinitely.
    ///
    /// EOF surfaces as the underlying `UnexpectedEof` I/O error.
    pub async fn read_byte(&mut self) -> Result<u8> {
        Ok(self.inner.read_u8().await?)
    }

    /// Read one byte, racing against a cancellation token.
    pub async fn read_byte_cancel(&mut self, cancel: &CancellationToken) -> Result<u8> {
        tokio::select! {
            byte = self.inner.read_u8() => Ok(byte?),
            _ = cancel.cancelled() => Err(BridgeError::Cancelled),
        }
    }

    /// Read one byte within the given timeout.
    pub async fn read_byte_timeout(&mut self, timeout: Duration) -> Result<u8> {
        match tokio::time::timeout(timeout, self.inner.read_u8()).await {
            Ok(byte) => Ok(byte?),
            Err(_) => Err(BridgeError::Timeout),
        }
    }

    /// Read one byte within the given timeout, `None` if the line stays quiet.
    pub async fn try_read_byte(&mut self, timeout: Duration) -> Result<Option<u8>> {
        match tokio::time::timeout(timeout, self.inner.read_u8()).await {
            Ok(byte) => Ok(Some(byte?)),
            Err(_) => Ok(None),
        }
    }

    /// Read one byte and require it to equal `expected`.
    pub async fn expect_byte(&mut self, expected: u8, timeout: Duration) -> Result<()> {
        let byte = self.read_byte_timeout(timeout).await?;
        if byte != expected {
            return Err(BridgeError::UnexpectedByte(byte));
        }
        Ok(())
    }

    /// Read a little-endian u16.
    pub async fn read_word_le(&mut self, timeout: Duration) -> Result<u16> {
        let low = self.read_byte_timeout(timeout).await?;
        let high = self.read_byte_timeout(timeout).await?;
        Ok(u16::from_le_bytes([low, high]))
    }

    /// Write one byte and flush.
    pub async fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.inner.write_u8(byte).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Write a little-endian u16 and flush.
    pub async fn write_word_le(&mut self, word: u16) -> Result<()> {
        self.inner.write_all(&word.to_le_bytes()).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Write a buffer and flush.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write_all(data).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Discard pending input until the line stays quiet for `poll`.
    ///
    /// Returns the number of bytes discarded.
    pub async fn drain(&mut self, poll: Duration) -> Result<usize> {
        let mut discarded = 0;
        while self.try_read_byte(poll).await?.is_some() {
            discarded += 1;
        }
        if discarded > 0 {
            tracing::debug!(discarded, "drained stale input");
        }
        Ok(discarded)
    }
}
