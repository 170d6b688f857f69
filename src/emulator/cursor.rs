//! Directory listing cursor for the FILES command family.
//!
//! FILES takes a snapshot of the drive directory; the pocket computer then
//! walks it one entry at a time with next/previous commands. The cursor is
//! only refreshed by a new FILES, never implicitly.

use std::path::Path;

/// Snapshot of directory entries plus the walk position.
#[derive(Default)]
pub struct DirectoryCursor {
    names: Vec<String>,
    index: usize,
}

impl DirectoryCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-scan the directory and rewind to the first entry.
    ///
    /// Only plain files are listed. Entries are sorted so the walk order is
    /// stable across platforms.
    pub fn rescan(&mut self, dir: &Path) -> std::io::Result<()> {
        self.names.clear();
        self.index = 0;
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                self.names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        self.names.sort();
        Ok(())
    }

    /// Forget the snapshot.
    pub fn clear(&mut self) {
        self.names.clear();
        self.index = 0;
    }

    pub fn count(&self) -> usize {
        self.names.len()
    }

    /// The entry under the cursor, if the snapshot is non-empty.
    pub fn current(&self) -> Option<&str> {
        self.names.get(self.index).map(String::as_str)
    }

    /// Move the cursor forward, clamping at the last entry.
    pub fn advance(&mut self) {
        if self.index + 1 < self.names.len() {
            self.index += 1;
        }
    }

    /// Move the cursor backward, clamping at the first entry.
    pub fn retreat(&mut self) {
        self.index = self.index.saturating_sub(1);
    }
}

/// Render a directory entry the way the drive reports it: `X:` drive
/// prefix, 8-character name, dot, 3-character extension, trailing space.
/// Long components are truncated, short ones space-padded.
pub fn format_entry_name(file_name: &str) -> String {
    let (name, extension) = match file_name.rsplit_once('.') {
        Some((name, ext)) => (name, ext),
        None => (file_name, ""),
    };
    let name: String = name.chars().take(8).collect();
    let extension: String = extension.chars().take(3).collect();
    format!("X:{name:<8}.{extension:<3} ")
}
