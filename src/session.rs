//! Command session over the relay link.
//!
//! One [`Session`] owns the transport, the disk emulator and all protocol
//! state. Outbound commands (init, ping, tape transfers) run the host side
//! of the stop-and-wait exchange; [`Session::run`] services the inbound
//! direction, where the pocket computer initiates prints, data bytes and
//! disk exchanges through the relay.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::ascii;
use crate::emulator::{DiskDrive, DiskResponse};
use crate::error::{BridgeError, ErrorCode, Result};
use crate::log::MessageSink;
use crate::protocol::{codec, sync};
use crate::tape;
use crate::transport::ByteStream;

/// Relay transfer window. Each window is acknowledged before the next.
pub const WINDOW_SIZE: usize = 64;
/// Firmware protocol version this crate speaks. Exact match required.
pub const VERSION_MAJOR: u8 = 1;
pub const VERSION_MINOR: u8 = 1;
/// Smallest relay transfer buffer the protocol can work with.
pub const MIN_BUFFER_SIZE: u8 = 16;

/// Top-level command opcodes, shared with the relay firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Init = 1,
    Ping = 2,
    DeviceSelect = 3,
    Print = 4,
    Data = 5,
    LoadTape = 6,
    SaveTape = 7,
    Disk = 8,
}

impl Command {
    pub fn from_byte(value: u8) -> Option<Self> {
        Some(match value {
            1 => Command::Init,
            2 => Command::Ping,
            3 => Command::DeviceSelect,
            4 => Command::Print,
            5 => Command::Data,
            6 => Command::LoadTape,
            7 => Command::SaveTape,
            8 => Command::Disk,
            _ => return None,
        })
    }
}

/// Protocol timeouts. Defaults match the relay firmware; tests shrink them.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Per-byte timeout inside a framed exchange.
    pub byte_timeout: Duration,
    /// Wait for an ACK/NAK handshake.
    pub handshake_timeout: Duration,
    /// Wait for the init header / ping reply.
    pub ping_timeout: Duration,
    /// Wait for the SYN echo during synchronization.
    pub sync_reply_timeout: Duration,
    /// Failed sync rounds before giving up.
    pub max_sync_attempts: u32,
    /// Quiet period that ends a pre-command drain.
    pub drain_poll: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            byte_timeout: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(5),
            ping_timeout: Duration::from_millis(2500),
            sync_reply_timeout: Duration::from_secs(1),
            max_sync_attempts: 10,
            drain_poll: Duration::from_millis(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Decrements the active-command counter when the outermost scope drops.
struct CommandScope {
    counter: Arc<AtomicUsize>,
}

impl CommandScope {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self {
            counter: Arc::clone(counter),
        }
    }
}

impl Drop for CommandScope {
    fn drop(&mut self) {
        let _ = self
            .counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                count.checked_sub(1)
            });
    }
}

/// Clonable handle for cancelling an in-flight tape read from outside the
/// session (the session itself is busy awaiting bytes while one runs).
#[derive(Clone)]
pub struct CancelHandle {
    slot: Arc<Mutex<Option<CancellationToken>>>,
}

impl CancelHandle {
    /// Fire the current operation's token, if one is running.
    pub fn cancel(&self) {
        if let Some(token) = self.slot.lock().unwrap().take() {
            token.cancel();
        }
    }

    /// Whether a cancellable operation is in flight.
    pub fn can_cancel(&self) -> bool {
        self.slot.lock().unwrap().is_some()
    }
}

/// Protocol session over one relay connection.
pub struct Session<T> {
    stream: ByteStream<T>,
    disk: DiskDrive,
    log: Arc<dyn MessageSink>,
    config: SessionConfig,
    active: Arc<AtomicUsize>,
    cancel_slot: Arc<Mutex<Option<CancellationToken>>>,
    state: ConnectionState,
}

impl<T: AsyncRead + AsyncWrite + Unpin> Session<T> {
    pub fn new(transport: T, config: SessionConfig, log: Arc<dyn MessageSink>) -> Self {
        Self {
            stream: ByteStream::new(transport),
            disk: DiskDrive::new(Arc::clone(&log)),
            log,
            config,
            active: Arc::new(AtomicUsize::new(0)),
            cancel_slot: Arc::new(Mutex::new(None)),
            state: ConnectionState::Connected,
        }
    }

    pub fn disk(&self) -> &DiskDrive {
        &self.disk
    }

    pub fn disk_mut(&mut self) -> &mut DiskDrive {
        &mut self.disk
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether a command exchange is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.active.load(Ordering::SeqCst) > 0
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            slot: Arc::clone(&self.cancel_slot),
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.state == ConnectionState::Disconnected {
            return Err(BridgeError::NotConnected);
        }
        Ok(())
    }

    /// Drain stale input and synchronize before a command.
    ///
    /// When `require_sync` is false a failed synchronization is only logged,
    /// so diagnostics like ping still go out on a wedged line.
    async fn prepare(&mut self, require_sync: bool) -> Result<()> {
        self.stream.drain(self.config.drain_poll).await?;
        let synced = sync::synchronize(
            &mut self.stream,
            self.config.sync_reply_timeout,
            self.config.max_sync_attempts,
        )
        .await?;
        if !synced {
            if require_sync {
                return Err(BridgeError::SyncFailed);
            }
            self.log.write_line("Synchronization failed.");
        }
        Ok(())
    }

    /// Read one ACK/NAK handshake byte.
    async fn read_handshake(&mut self) -> Result<()> {
        match self
            .stream
            .read_byte_timeout(self.config.handshake_timeout)
            .await?
        {
            ascii::ACK => Ok(()),
            ascii::NAK => {
                let code = self.stream.read_byte_timeout(self.config.byte_timeout).await?;
                Err(BridgeError::Peer(ErrorCode::from_byte(code)))
            }
            other => Err(BridgeError::UnexpectedByte(other)),
        }
    }

    /// Send a buffer in acknowledged windows.
    async fn send_windowed(&mut self, data: &[u8]) -> Result<()> {
        for window in data.chunks(WINDOW_SIZE) {
            tracing::debug!(len = window.len(), "sending window");
            self.stream.write_all(window).await?;
            self.read_handshake().await?;
        }
        Ok(())
    }

    /// Handshake with the relay and read its init header and banner.
    ///
    /// A version or buffer-size mismatch is fatal; the relay firmware must
    /// be upgraded in lockstep with this crate.
    pub async fn initialize(&mut self) -> Result<()> {
        self.ensure_connected()?;
        let _scope = CommandScope::new(&self.active);
        self.prepare(false).await?;

        self.stream
            .write_all(&[ascii::SOH, Command::Init as u8])
            .await?;
        self.stream
            .expect_byte(ascii::SOH, self.config.ping_timeout)
            .await?;

        let major = self.stream.read_byte_timeout(self.config.byte_timeout).await?;
        let minor = self.stream.read_byte_timeout(self.config.byte_timeout).await?;
        if major != VERSION_MAJOR || minor != VERSION_MINOR {
            return Err(BridgeError::VersionMismatch {
                expected_major: VERSION_MAJOR,
                expected_minor: VERSION_MINOR,
                actual_major: major,
                actual_minor: minor,
            });
        }

        let buffer_size = self.stream.read_byte_timeout(self.config.byte_timeout).await?;
        if buffer_size < MIN_BUFFER_SIZE {
            return Err(BridgeError::BufferTooSmall(buffer_size));
        }
        tracing::debug!(buffer_size, "relay header accepted");

        // Banner text follows, one character at a time until ETX.
        self.stream
            .expect_byte(ascii::STX, self.config.byte_timeout)
            .await?;
        loop {
            let byte = self.stream.read_byte_timeout(self.config.byte_timeout).await?;
            match byte {
                ascii::ETX => break,
                ascii::CR => self.log.write_line(""),
                ascii::LF => {}
                byte if ascii::is_printable(byte) => {
                    self.log.write(&(byte as char).to_string());
                }
                _ => {}
            }
        }
        self.log.write_line("");
        Ok(())
    }

    /// Ping the relay and report the outcome.
    pub async fn ping(&mut self) -> Result<()> {
        self.ensure_connected()?;
        let _scope = CommandScope::new(&self.active);
        self.prepare(false).await?;

        self.log.write("Pinging... ");
        self.stream
            .write_all(&[ascii::SOH, Command::Ping as u8])
            .await?;
        match self.stream.try_read_byte(self.config.ping_timeout).await? {
            Some(ascii::ACK) => {
                self.log.write_line("Success.");
                Ok(())
            }
            Some(ascii::NAK) => {
                let code = self
                    .stream
                    .try_read_byte(self.config.ping_timeout)
                    .await?
                    .map(ErrorCode::from_byte)
                    .unwrap_or(ErrorCode::Timeout);
                self.log.write_line(&format!("Failure: {code}"));
                Err(BridgeError::Peer(code))
            }
            Some(other) => {
                self.log.write_line("No response.");
                Err(BridgeError::UnexpectedByte(other))
            }
            None => {
                self.log.write_line("No response.");
                Err(BridgeError::Timeout)
            }
        }
    }

    /// Upload a tape image for CLOAD on the pocket computer.
    pub async fn send_tape_file(&mut self, image: &[u8]) -> Result<()> {
        self.ensure_connected()?;
        let encoded = tape::encode_for_relay(image)?;
        if encoded.len() > u16::MAX as usize {
            return Err(BridgeError::Protocol(format!(
                "tape image of {} bytes exceeds the transfer limit",
                encoded.len()
            )));
        }

        let _scope = CommandScope::new(&self.active);
        self.prepare(true).await?;

        self.log
            .write_line(&format!("Sending tape file; length: {}", encoded.len()));
        self.stream
            .write_all(&[ascii::SOH, Command::LoadTape as u8])
            .await?;
        self.stream.write_word_le(encoded.len() as u16).await?;
        self.stream.write_byte(tape::HEADER_SIZE).await?;
        self.read_handshake().await?;

        self.send_windowed(&encoded).await?;
        self.log.write_line("Done.");
        Ok(())
    }

    /// Wait for CSAVE on the pocket computer and receive the tape image.
    ///
    /// The wait is unbounded; use the [`CancelHandle`] to abort it.
    pub async fn read_tape_file(&mut self) -> Result<Bytes> {
        self.ensure_connected()?;
        let _scope = CommandScope::new(&self.active);
        self.prepare(true).await?;

        self.log
            .write_line("Waiting for CSAVE on the pocket computer...");
        self.stream
            .write_all(&[ascii::SOH, Command::SaveTape as u8])
            .await?;
        self.read_handshake().await?;

        let token = CancellationToken::new();
        *self.cancel_slot.lock().unwrap() = Some(token.clone());
        let result =
            codec::read_frame(&mut self.stream, self.config.byte_timeout, Some(&token)).await;
        *self.cancel_slot.lock().unwrap() = None;

        let frame = result?;
        self.log
            .write_line(&format!("Received {} bytes.", frame.len()));
        self.log.dump(&frame);
        Ok(frame)
    }

    /// Service inbound traffic until the peer disconnects.
    pub async fn run(&mut self) -> Result<()> {
        while self.poll_incoming().await? {}
        Ok(())
    }

    /// Wait for and handle one inbound event.
    ///
    /// Returns `Ok(false)` once the transport reaches end of stream, after
    /// marking the session disconnected.
    pub async fn poll_incoming(&mut self) -> Result<bool> {
        self.ensure_connected()?;
        let byte = match self.stream.read_byte().await {
            Ok(byte) => byte,
            Err(BridgeError::Io(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.disconnect();
                return Ok(false);
            }
            Err(err) => return Err(err),
        };
        self.handle_idle_byte(byte).await?;
        Ok(true)
    }

    async fn handle_idle_byte(&mut self, byte: u8) -> Result<()> {
        match byte {
            ascii::SYN => self.stream.write_byte(ascii::SYN).await,
            ascii::SOH => self.process_incoming().await,
            other => {
                tracing::debug!(byte = other, "unexpected idle byte");
                self.stream
                    .write_all(&[ascii::NAK, ErrorCode::Unexpected.as_byte()])
                    .await
            }
        }
    }

    /// Handle one inbound command packet; the SOH has been consumed.
    ///
    /// Disk exchanges whose response arms a capture are followed by another
    /// leg immediately, so this loops until the exchange quiesces.
    async fn process_incoming(&mut self) -> Result<()> {
        let _scope = CommandScope::new(&self.active);
        loop {
            let Some(opcode) = self.stream.try_read_byte(self.config.byte_timeout).await? else {
                // Lone SOH; drop back to idle.
                return Ok(());
            };
            match Command::from_byte(opcode) {
                Some(Command::Ping) => {
                    self.stream.write_byte(ascii::ACK).await?;
                    return Ok(());
                }
                Some(Command::DeviceSelect) => {
                    let Some(device) =
                        self.stream.try_read_byte(self.config.byte_timeout).await?
                    else {
                        return Ok(());
                    };
                    self.log.debug(&format!("Device select: 0x{device:02X}"));
                    return Ok(());
                }
                Some(Command::Print) => {
                    let Some(character) =
                        self.stream.try_read_byte(self.config.byte_timeout).await?
                    else {
                        return Ok(());
                    };
                    if character == ascii::CR {
                        self.log.write_line("");
                    } else if ascii::is_printable(character) {
                        self.log.write(&(character as char).to_string());
                    }
                    return Ok(());
                }
                Some(Command::Data) => {
                    let Some(value) =
                        self.stream.try_read_byte(self.config.byte_timeout).await?
                    else {
                        return Ok(());
                    };
                    self.log.write_line(&format!("Data: {value:02X}"));
                    return Ok(());
                }
                Some(Command::Disk) => {
                    self.log.debug("Reading disk command");
                    let frame =
                        codec::read_frame(&mut self.stream, self.config.byte_timeout, None).await?;
                    let response = self.disk.process(&frame);
                    self.send_disk_response(&response).await?;
                    if response.continuation {
                        self.stream
                            .expect_byte(ascii::SOH, self.config.handshake_timeout)
                            .await?;
                        continue;
                    }
                    return Ok(());
                }
                _ => {
                    tracing::debug!(opcode, "unexpected command opcode");
                    return Ok(());
                }
            }
        }
    }

    /// Send a disk response envelope followed by the acknowledged payload.
    async fn send_disk_response(&mut self, response: &DiskResponse) -> Result<()> {
        if response.data.len() > u16::MAX as usize {
            return Err(BridgeError::Protocol(format!(
                "disk response of {} bytes exceeds the transfer limit",
                response.data.len()
            )));
        }
        let flag = if response.continuation { 0xFF } else { 0x00 };
        self.stream
            .write_all(&[ascii::SOH, Command::Disk as u8, flag])
            .await?;
        self.stream.write_word_le(response.data.len() as u16).await?;
        self.read_handshake().await?;
        self.send_windowed(&response.data).await
    }

    /// Drop the link state: reset the emulator and refuse further commands.
    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        self.disk.reset();
        self.state = ConnectionState::Disconnected;
        self.log.write_line("Disconnected.");
    }
}
