//! # sharplink
//!
//! Serial bridge and CE-140F disk drive emulator for Sharp pocket
//! computers, speaking the framed command protocol of a microcontroller
//! relay wired to the pocket computer's cassette/disk bus.
//!
//! ## Architecture
//!
//! - **Outbound**: the host drives init, ping and tape transfers toward the
//!   relay (CLOAD/CSAVE on the pocket computer).
//! - **Inbound**: the pocket computer initiates print, data and disk
//!   exchanges; the session answers them, including a full software
//!   emulation of the CE-140F floppy drive backed by a host directory.
//!
//! ## Example
//!
//! ```ignore
//! use sharplink::{Session, SessionConfig, TracingSink};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> sharplink::Result<()> {
//!     let port = open_serial_port()?;
//!     let mut session = Session::new(port, SessionConfig::default(), Arc::new(TracingSink::new()));
//!     session.disk_mut().set_directory(Some("./disk".into()));
//!     session.initialize().await?;
//!     session.run().await
//! }
//! ```

pub mod ascii;
pub mod emulator;
pub mod error;
pub mod log;
pub mod protocol;
pub mod tape;
pub mod transport;

mod session;

pub use emulator::{DiskDrive, DiskResponse};
pub use error::{BridgeError, ErrorCode, Result};
pub use log::{MemorySink, MessageSink, NullSink, TracingSink};
pub use session::{
    CancelHandle, Command, ConnectionState, Session, SessionConfig, MIN_BUFFER_SIZE,
    VERSION_MAJOR, VERSION_MINOR, WINDOW_SIZE,
};
pub use transport::ByteStream;
