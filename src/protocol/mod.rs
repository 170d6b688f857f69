//! Wire protocol building blocks.
//!
//! Three layers that do not know about each other:
//! - [`sync`]: SYN-based line resynchronization before a command.
//! - [`codec`]: decoding DLE-escaped STX..ETX frames off the wire.
//! - [`frame`]: building checksummed emulator response payloads.

pub mod codec;
pub mod frame;
pub mod sync;
