//! Offset-tracking reader for an append-only log file.
//!
//! Each poll reads whatever was appended since the previous poll and hands
//! back the complete lines. A file that shrank below the tracked offset was
//! truncated or rotated, so reading restarts at byte 0. A missing file is
//! simply "nothing new yet".

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::types::TrackerError;

/// Tails one file by byte offset.
#[derive(Debug)]
pub struct LogTail {
    path: PathBuf,
    offset: u64,
}

impl LogTail {
    /// Start tailing at the current end of the file, so history written
    /// before the tracker started is not replayed. A missing file starts
    /// at offset 0.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let offset = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        info!(path = %path.display(), offset, "Tailing client log");
        Self { path, offset }
    }

    /// Start tailing at byte 0 (replays the whole file on first poll).
    pub fn from_start(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            offset: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read the lines appended since the last poll.
    ///
    /// Only newline-terminated lines are returned; a trailing partial line
    /// stays unread until the writer finishes it.
    pub fn poll_new_lines(&mut self) -> Result<NewLines, TrackerError> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(NewLines::empty()),
            Err(e) => return Err(e.into()),
        };

        let len = file.metadata()?.len();
        if len < self.offset {
            debug!(
                path = %self.path.display(),
                previous_offset = self.offset,
                len,
                "Log shrank below offset, treating as rotated"
            );
            self.offset = 0;
        }
        if len == self.offset {
            return Ok(NewLines::empty());
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::new();
        file.take(len - self.offset).read_to_end(&mut buf)?;

        let Some(last_newline) = buf.iter().rposition(|&b| b == b'\n') else {
            return Ok(NewLines::empty());
        };
        buf.truncate(last_newline + 1);
        self.offset += buf.len() as u64;

        Ok(NewLines::new(String::from_utf8_lossy(&buf).into_owned()))
    }
}

/// Lines produced by one poll. Lazily split; empty lines are skipped.
#[derive(Debug)]
pub struct NewLines {
    text: String,
    pos: usize,
}

impl NewLines {
    fn new(text: String) -> Self {
        Self { text, pos: 0 }
    }

    fn empty() -> Self {
        Self::new(String::new())
    }
}

impl Iterator for NewLines {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        while self.pos < self.text.len() {
            let rest = &self.text[self.pos..];
            let (line, consumed) = match rest.find('\n') {
                Some(i) => (&rest[..i], i + 1),
                None => (rest, rest.len()),
            };
            self.pos += consumed;
            let line = line.trim_end_matches('\r');
            if !line.is_empty() {
                return Some(line.to_string());
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
