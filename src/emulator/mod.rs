//! CE-140F floppy drive emulation.
//!
//! The pocket computer talks to the drive through small command payloads
//! relayed by the session layer. Each payload's first byte selects an
//! operation; a handful of operations arm a capture mode so that the NEXT
//! payload is treated as data (save streams, print lines) instead of a
//! command. The [`DiskResponse::continuation`] flag mirrors that armed
//! state so the session knows another leg follows immediately.
//!
//! Host filesystem failures never abort the protocol: they are logged and
//! reported to the pocket computer as failure responses.

mod cursor;

pub use cursor::{format_entry_name, DirectoryCursor};

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

use crate::ascii;
use crate::log::MessageSink;
use crate::protocol::frame::{FrameBuilder, ERROR_FRAME, RESULT_FAIL, RESULT_OK};

/// Number of file-handle slots the drive exposes (file numbers 2..=7).
const MAX_HANDLES: usize = 6;

/// Free space reported by DSKF, in bytes. The real drive reports the
/// remaining capacity of a 2.5" disk; the emulated drive always claims
/// plenty.
const DISK_FREE: u32 = 65_000;

/// Response to one disk command payload.
#[derive(Debug, Clone)]
pub struct DiskResponse {
    /// Raw response bytes, already framed/checksummed as required.
    pub data: Bytes,
    /// Another payload follows immediately as part of this exchange.
    pub continuation: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CaptureMode {
    None,
    BinarySave,
    TextSave,
    Print,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum OpenMode {
    Read,
    Write,
    Append,
}

impl OpenMode {
    fn readable(self) -> bool {
        self == OpenMode::Read
    }

    fn writable(self) -> bool {
        !self.readable()
    }
}

struct SlotHandle {
    file: File,
    mode: OpenMode,
}

/// Where captured data is written: the streaming LOAD/SAVE file or one of
/// the numbered handle slots. At most one target is active per exchange.
enum ActiveTarget {
    None,
    Streaming(File),
    Slot(usize),
}

/// Software stand-in for the CE-140F floppy drive.
///
/// A host directory plays the role of the disk. All state lives here;
/// nothing survives [`DiskDrive::reset`].
pub struct DiskDrive {
    dir: Option<PathBuf>,
    cursor: DirectoryCursor,
    target: ActiveTarget,
    expected_size: u64,
    written: u64,
    handles: [Option<SlotHandle>; MAX_HANDLES],
    capture: CaptureMode,
    log: Arc<dyn MessageSink>,
}

impl DiskDrive {
    pub fn new(log: Arc<dyn MessageSink>) -> Self {
        Self {
            dir: None,
            cursor: DirectoryCursor::new(),
            target: ActiveTarget::None,
            expected_size: 0,
            written: 0,
            handles: std::array::from_fn(|_| None),
            capture: CaptureMode::None,
            log,
        }
    }

    /// Set (or clear) the host directory backing the drive.
    pub fn set_directory(&mut self, dir: Option<PathBuf>) {
        self.dir = dir;
    }

    pub fn directory(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Close everything and forget all cursor/capture state.
    pub fn reset(&mut self) {
        self.cursor.clear();
        self.target = ActiveTarget::None;
        self.expected_size = 0;
        self.written = 0;
        for slot in &mut self.handles {
            *slot = None;
        }
        self.capture = CaptureMode::None;
    }

    /// Handle one command payload and produce the response.
    pub fn process(&mut self, data: &[u8]) -> DiskResponse {
        let payload = self.handle(data);
        DiskResponse {
            data: payload,
            continuation: self.capture != CaptureMode::None,
        }
    }

    fn handle(&mut self, data: &[u8]) -> Bytes {
        // An armed capture consumes the payload as data; the handler may
        // re-arm for the next leg.
        let capture = std::mem::replace(&mut self.capture, CaptureMode::None);
        match capture {
            CaptureMode::BinarySave => return self.write_binary_chunk(data),
            CaptureMode::TextSave => return self.write_text_line(data),
            CaptureMode::Print => return self.write_print_line(data),
            CaptureMode::None => {}
        }

        let Some(&op) = data.first() else {
            self.log.write_line("Empty disk command");
            return error_frame();
        };
        self.log.write(&format!("[Command #{op:02X}] "));

        match op {
            0x03 => self.open_slot(data),
            0x04 => self.close_slot(data),
            0x05 => self.files_init(),
            0x06 => self.files_item(false),
            0x07 => self.files_item(true),
            0x0A => self.kill(data),
            0x0E => self.load_open(data),
            0x0F => self.load_binary(),
            0x10 => self.save_open(data),
            0x11 => self.save_binary(data),
            0x12 => self.load_read_line(),
            0x13 | 0x14 | 0x20 => self.input_line(data),
            0x15 => self.print_open(data),
            0x16 => self.save_text(),
            0x17 => self.load_read_byte(),
            0x1D => self.disk_free(data),
            _ => {
                self.log.write_line("Unknown");
                error_frame()
            }
        }
    }

    fn files_init(&mut self) -> Bytes {
        self.log.write_line("FILES");
        match &self.dir {
            Some(dir) => {
                if let Err(err) = self.cursor.rescan(dir) {
                    self.log.write_line(&format!("Directory scan failed: {err}"));
                    self.cursor.clear();
                }
            }
            None => self.cursor.clear(),
        }
        let mut builder = FrameBuilder::new();
        builder.push(self.cursor.count().min(255) as u8);
        builder.seal()
    }

    fn files_item(&mut self, previous: bool) -> Bytes {
        self.log
            .write_line(if previous { "FILES Up" } else { "FILES Down" });
        let Some(name) = self.cursor.current().map(str::to_owned) else {
            return error_frame();
        };
        let mut builder = FrameBuilder::new();
        builder.push_ascii(&format_entry_name(&name));
        if previous {
            self.cursor.retreat();
        } else {
            self.cursor.advance();
        }
        builder.seal()
    }

    fn load_open(&mut self, data: &[u8]) -> Bytes {
        let Some(name) = parse_name(data) else {
            return fail();
        };
        self.log.write_line(&format!("LOAD \"{name}\""));

        let mut builder = FrameBuilder::new();
        builder.push_ascii(" ");
        let size = match &self.dir {
            None => {
                self.log.write_line("No directory selected for drive.");
                0
            }
            Some(dir) => {
                let path = dir.join(&name);
                self.log.write_line(&format!("  {}", path.display()));
                match File::open(&path) {
                    Ok(file) => {
                        let size = file.metadata().map(|m| m.len()).unwrap_or(0) as u32;
                        self.target = ActiveTarget::Streaming(file);
                        size
                    }
                    Err(err) => {
                        self.log.write_line(&format!("Error: {err}"));
                        0
                    }
                }
            }
        };
        builder.push_size(size);
        builder.seal()
    }

    fn load_read_byte(&mut self) -> Bytes {
        let ActiveTarget::Streaming(file) = &mut self.target else {
            return error_frame();
        };
        match read_one(file) {
            Some(byte) => {
                let mut builder = FrameBuilder::new();
                builder.push(byte);
                builder.seal()
            }
            None => error_frame(),
        }
    }

    fn load_read_line(&mut self) -> Bytes {
        self.log.write_line("Load file line");
        let mut line = Vec::new();
        loop {
            let value = match &mut self.target {
                ActiveTarget::Streaming(file) => read_one(file),
                _ => None,
            };
            match value {
                // Line feeds are not part of the line format.
                Some(ascii::LF) => continue,
                Some(byte) => {
                    line.push(byte);
                    if byte == ascii::CR {
                        break;
                    }
                }
                None => {
                    line.push(ascii::SUB);
                    self.target = ActiveTarget::None;
                    break;
                }
            }
        }
        let mut builder = FrameBuilder::new();
        builder.extend_from_slice(&line);
        sealed_with_trailing_zero(builder)
    }

    fn load_binary(&mut self) -> Bytes {
        self.log.write_line("Load file data");
        let mut builder = FrameBuilder::new();
        builder.push(0);
        if let ActiveTarget::Streaming(file) = &mut self.target {
            let mut buf = [0u8; 256];
            loop {
                match file.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        builder.push_block(&buf[..n]);
                    }
                    Err(err) => {
                        self.log.write_line(&format!("Error: {err}"));
                        break;
                    }
                }
            }
        }
        builder.push(0);
        self.target = ActiveTarget::None;
        builder.into_bytes()
    }

    fn save_open(&mut self, data: &[u8]) -> Bytes {
        let Some(name) = parse_name(data) else {
            return fail();
        };
        self.log.write_line(&format!("SAVE \"{name}\""));

        let Some(dir) = &self.dir else {
            self.log.write_line("No directory selected for drive.");
            return fail();
        };
        let path = dir.join(&name);
        self.log.write_line(&format!("  {}", path.display()));
        match File::create(&path) {
            Ok(file) => {
                self.target = ActiveTarget::Streaming(file);
                ok()
            }
            Err(err) => {
                self.log.write_line(&format!("Error: {err}"));
                fail()
            }
        }
    }

    fn save_binary(&mut self, data: &[u8]) -> Bytes {
        let Some(size) = data.get(2..5) else {
            return fail();
        };
        self.expected_size = u32::from_le_bytes([size[0], size[1], size[2], 0]) as u64;
        self.written = 0;
        self.log
            .write_line(&format!("Save binary file (size {})", self.expected_size));
        self.capture = CaptureMode::BinarySave;
        ok()
    }

    fn save_text(&mut self) -> Bytes {
        self.log.write_line("Save text file");
        self.capture = CaptureMode::TextSave;
        ok()
    }

    fn write_binary_chunk(&mut self, data: &[u8]) -> Bytes {
        let ActiveTarget::Streaming(file) = &mut self.target else {
            return fail();
        };
        // Last byte is the block checksum.
        let Some((_, chunk)) = data.split_last() else {
            return fail();
        };
        if let Err(err) = file.write_all(chunk) {
            self.log.write_line(&format!("Error: {err}"));
            self.target = ActiveTarget::None;
            return fail();
        }
        self.written += chunk.len() as u64;
        if self.written >= self.expected_size {
            self.log.write_line("Done.");
            self.target = ActiveTarget::None;
        } else {
            self.capture = CaptureMode::BinarySave;
        }
        ok()
    }

    fn write_text_line(&mut self, data: &[u8]) -> Bytes {
        let ActiveTarget::Streaming(file) = &mut self.target else {
            return fail();
        };
        if data.first() == Some(&ascii::SUB) {
            self.log.write_line("Done.");
            self.target = ActiveTarget::None;
            return ok();
        }
        // Last byte is the line checksum.
        let Some((_, chunk)) = data.split_last() else {
            return fail();
        };
        if let Err(err) = file.write_all(chunk) {
            self.log.write_line(&format!("Error: {err}"));
            self.target = ActiveTarget::None;
            return fail();
        }
        self.capture = CaptureMode::TextSave;
        ok()
    }

    fn write_print_line(&mut self, data: &[u8]) -> Bytes {
        let slot = match &self.target {
            ActiveTarget::Slot(slot) => *slot,
            _ => return fail(),
        };
        let Some(handle) = self.handles[slot].as_mut() else {
            return fail();
        };
        // A bare CRLF is an empty print statement.
        if data.len() >= 2 && data[0] == ascii::CR && data[1] == ascii::LF {
            return ok();
        }
        if data.len() < 3 {
            return ok();
        }
        // Last two bytes are terminator and checksum.
        let chunk = &data[..data.len() - 2];
        if let Err(err) = handle.file.write_all(chunk) {
            self.log.write_line(&format!("Error: {err}"));
            return fail();
        }
        if data[data.len() - 3] != ascii::LF {
            self.log.write_line("  Appending CRLF");
            if let Err(err) = handle.file.write_all(&[ascii::CR, ascii::LF]) {
                self.log.write_line(&format!("Error: {err}"));
                return fail();
            }
        }
        ok()
    }

    fn open_slot(&mut self, data: &[u8]) -> Bytes {
        let Some(dir) = self.dir.clone() else {
            self.log.write_line("No directory selected for drive.");
            return fail();
        };
        let Some(name) = parse_name(data) else {
            return fail();
        };
        let (Some(&mode_byte), Some(&file_number)) = (data.get(15), data.get(16)) else {
            return fail();
        };
        self.log.write_line(&format!(
            "OPEN \"{name}\" FOR '{mode_byte}' AS #{file_number}"
        ));

        let Some(index) = slot_index(file_number) else {
            self.log.write_line(&format!("Invalid file #{file_number}"));
            return fail();
        };
        let mode = match mode_byte {
            1 => OpenMode::Read,
            2 => OpenMode::Write,
            3 => OpenMode::Append,
            other => {
                self.log.write_line(&format!("Invalid file mode {other}"));
                return fail();
            }
        };

        // Opening over an occupied slot closes the old handle first.
        self.handles[index] = None;

        let path = dir.join(&name);
        let opened = match mode {
            OpenMode::Read => File::open(&path),
            OpenMode::Write => File::create(&path),
            OpenMode::Append => OpenOptions::new().append(true).create(true).open(&path),
        };
        match opened {
            Ok(file) => {
                self.handles[index] = Some(SlotHandle { file, mode });
                ok()
            }
            Err(err) => {
                self.log.write_line(&format!("Error: {err}"));
                fail()
            }
        }
    }

    fn close_slot(&mut self, data: &[u8]) -> Bytes {
        let Some(&file_number) = data.get(1) else {
            return fail();
        };
        if file_number == 0xFF {
            self.log.write_line("CLOSE ALL");
            for slot in &mut self.handles {
                *slot = None;
            }
            return ok();
        }
        self.log.write_line(&format!("CLOSE #{file_number:02X}"));
        let Some(index) = slot_index(file_number) else {
            self.log.write_line(&format!("Invalid file #{file_number}"));
            return fail();
        };
        self.handles[index] = None;
        ok()
    }

    fn print_open(&mut self, data: &[u8]) -> Bytes {
        let Some(&file_number) = data.get(1) else {
            return fail();
        };
        self.log.write_line(&format!("PRINT #{file_number}"));
        let Some(index) = slot_index(file_number) else {
            self.log.write_line(&format!("Invalid file #{file_number}"));
            return fail();
        };
        let Some(handle) = &self.handles[index] else {
            self.log.write_line(&format!("File #{file_number} not open"));
            return fail();
        };
        if !handle.mode.writable() {
            self.log
                .write_line(&format!("File #{file_number} not writable"));
            return fail();
        }
        self.capture = CaptureMode::Print;
        self.target = ActiveTarget::Slot(index);
        ok()
    }

    fn input_line(&mut self, data: &[u8]) -> Bytes {
        let Some(&file_number) = data.get(1) else {
            return fail();
        };
        self.log.write_line(&format!("INPUT #{file_number}"));
        let Some(index) = slot_index(file_number) else {
            self.log.write_line(&format!("Invalid file #{file_number}"));
            return fail();
        };
        let Some(handle) = self.handles[index].as_mut() else {
            self.log.write_line(&format!("File #{file_number} not open"));
            return fail();
        };
        if !handle.mode.readable() {
            self.log
                .write_line(&format!("File #{file_number} not readable"));
            return fail();
        }

        let mut line = Vec::new();
        while let Some(byte) = read_one(&mut handle.file) {
            line.push(byte);
            if byte == ascii::LF {
                break;
            }
        }
        let mut builder = FrameBuilder::new();
        builder.extend_from_slice(&line);
        builder.push(0);
        sealed_with_trailing_zero(builder)
    }

    fn kill(&mut self, data: &[u8]) -> Bytes {
        let Some(name) = parse_name(data) else {
            return fail();
        };
        // Deliberately not acted on; deleting host files over the wire is
        // not supported.
        self.log.write_line(&format!("KILL \"{name}\""));
        fail()
    }

    fn disk_free(&mut self, data: &[u8]) -> Bytes {
        let drive_number = data.get(1).copied().unwrap_or(0);
        self.log.write_line(&format!("DSKF({drive_number})"));
        let mut builder = FrameBuilder::new();
        builder.push_size(DISK_FREE);
        builder.seal()
    }
}

/// Map a protocol file number (2..=7) to a handle-slot index.
fn slot_index(file_number: u8) -> Option<usize> {
    let index = (file_number as i32) - 2;
    if (0..MAX_HANDLES as i32).contains(&index) {
        Some(index as usize)
    } else {
        None
    }
}

/// File name from payload bytes 3..15, spaces removed.
fn parse_name(data: &[u8]) -> Option<String> {
    let raw = data.get(3..15)?;
    Some(
        String::from_utf8_lossy(raw)
            .chars()
            .filter(|c| *c != ' ')
            .collect(),
    )
}

fn read_one(file: &mut File) -> Option<u8> {
    let mut buf = [0u8; 1];
    match file.read(&mut buf) {
        Ok(1) => Some(buf[0]),
        _ => None,
    }
}

fn sealed_with_trailing_zero(builder: FrameBuilder) -> Bytes {
    let sealed = builder.seal();
    let mut framed = BytesMut::with_capacity(sealed.len() + 1);
    framed.put_slice(&sealed);
    framed.put_u8(0);
    framed.freeze()
}

fn ok() -> Bytes {
    Bytes::from_static(RESULT_OK)
}

fn fail() -> Bytes {
    Bytes::from_static(RESULT_FAIL)
}

fn error_frame() -> Bytes {
    Bytes::from_static(ERROR_FRAME)
}
