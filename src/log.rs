//! Injected log-sink capability.
//!
//! The pocket computer pushes human-readable output through the protocol:
//! the Init banner, PRINT characters, the disk-command trace. The session
//! forwards all of it to a [`MessageSink`] supplied by the embedder instead
//! of owning any presentation itself.

use std::sync::Mutex;

/// Receiver for user-facing text produced by the protocol.
///
/// `write` may deliver partial lines (the banner arrives one character at a
/// time); `write_line` terminates the current line. `debug` carries
/// diagnostic text that is not part of the console transcript.
pub trait MessageSink: Send + Sync {
    /// Append text to the current line.
    fn write(&self, text: &str);

    /// Append text and terminate the line.
    fn write_line(&self, text: &str);

    /// Diagnostic text, outside the console transcript.
    fn debug(&self, text: &str);

    /// Hex dump of a buffer through the diagnostic channel.
    fn dump(&self, data: &[u8]) {
        for chunk in data.chunks(16) {
            let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02X}")).collect();
            self.debug(&hex.join(" "));
        }
    }
}

/// Sink that routes everything to the `tracing` facade.
///
/// Partial writes are buffered until a line terminator arrives so that the
/// character-by-character banner does not produce one event per byte.
#[derive(Default)]
pub struct TracingSink {
    partial: Mutex<String>,
}

impl TracingSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageSink for TracingSink {
    fn write(&self, text: &str) {
        self.partial.lock().unwrap().push_str(text);
    }

    fn write_line(&self, text: &str) {
        let mut partial = self.partial.lock().unwrap();
        partial.push_str(text);
        tracing::info!("{}", partial.as_str());
        partial.clear();
    }

    fn debug(&self, text: &str) {
        tracing::debug!("{}", text);
    }
}

/// Sink that discards all output.
pub struct NullSink;

impl MessageSink for NullSink {
    fn write(&self, _text: &str) {}
    fn write_line(&self, _text: &str) {}
    fn debug(&self, _text: &str) {}
}

/// Sink that captures output in memory, for tests.
#[derive(Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
    partial: Mutex<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completed lines captured so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    /// The full transcript, including any unterminated partial line.
    pub fn text(&self) -> String {
        let mut text = self.lines.lock().unwrap().join("\n");
        let partial = self.partial.lock().unwrap();
        if !partial.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&partial);
        }
        text
    }

    /// Whether any captured line contains the needle.
    pub fn contains(&self, needle: &str) -> bool {
        self.text().contains(needle)
    }
}

impl MessageSink for MemorySink {
    fn write(&self, text: &str) {
        self.partial.lock().unwrap().push_str(text);
    }

    fn write_line(&self, text: &str) {
        let mut partial = self.partial.lock().unwrap();
        partial.push_str(text);
        self.lines.lock().unwrap().push(std::mem::take(&mut partial));
    }

    fn debug(&self, text: &str) {
        self.lines.lock().unwrap().push(text.to_string());
    }
}
