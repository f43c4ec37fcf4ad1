use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use logdog_types::FileId;

use crate::dog::Dog;

/// Bytes requested from the file per read call
const READ_CHUNK: usize = 64 * 1024;

/// Upper bound on bytes consumed by one `read_new_lines` call
pub const DEFAULT_READ_LIMIT: usize = 16 * 1024 * 1024;

/// Where a newly tracked log starts reading
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartAt {
    /// Skip existing content (files present when the manager starts)
    End,
    /// Replay the whole file (files that appeared while running)
    Beginning,
}

/// A log file being tailed
///
/// Owns the open handle, the device/inode identity captured when it was
/// opened and any incomplete trailing line. Once the path stops naming the
/// same file the log is retired: the handle stays open so bytes written
/// before the writer reopened its file can still be drained.
pub struct TrackedLog {
    path: PathBuf,
    consumers: Vec<Arc<Dog>>,
    file: File,
    identity: FileId,
    position: u64,
    total_lines: u64,
    partial: Vec<u8>,
    retired: bool,
    at_eof: bool,
    read_limit: usize,
}

impl TrackedLog {
    /// Open `path` for tailing
    pub fn open(path: impl Into<PathBuf>, start_at: StartAt) -> io::Result<Self> {
        let path = path.into();
        let mut file = File::open(&path)?;
        let identity = FileId::from_file(&file)?;
        let position = match start_at {
            StartAt::End => file.seek(SeekFrom::End(0))?,
            StartAt::Beginning => 0,
        };

        tracing::info!(path = %path.display(), %identity, position, "watch log");

        Ok(Self {
            path,
            consumers: Vec::new(),
            file,
            identity,
            position,
            total_lines: 0,
            partial: Vec::new(),
            retired: false,
            at_eof: false,
            read_limit: DEFAULT_READ_LIMIT,
        })
    }

    /// Cap the bytes one `read_new_lines` call may consume (at least one)
    pub fn with_read_limit(mut self, bytes: usize) -> Self {
        self.read_limit = bytes.max(1);
        self
    }

    /// Keep tailing the same open file under the name it was renamed to.
    ///
    /// Position and held partial line carry over; consumers are reset so the
    /// dogs matching the new name can register.
    pub fn relocate(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        tracing::info!(
            from = %self.path.display(),
            to = %path.display(),
            identity = %self.identity,
            position = self.position,
            "follow renamed log"
        );
        self.path = path;
        self.consumers.clear();
        self.retired = false;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn identity(&self) -> FileId {
        self.identity
    }

    /// Current read offset in bytes
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn total_lines(&self) -> u64 {
        self.total_lines
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// Whether the last read reached the end of the file
    pub fn is_at_eof(&self) -> bool {
        self.at_eof
    }

    /// Bytes of an incomplete line waiting for its newline
    pub fn pending_partial(&self) -> &[u8] {
        &self.partial
    }

    pub fn consumers(&self) -> &[Arc<Dog>] {
        &self.consumers
    }

    /// Record `dog` as a consumer. Returns false if it already was one.
    pub fn add_consumer(&mut self, dog: &Arc<Dog>) -> bool {
        if self.consumers.iter().any(|d| Arc::ptr_eq(d, dog)) {
            return false;
        }
        self.consumers.push(Arc::clone(dog));
        true
    }

    /// Read the complete lines appended since the last call.
    ///
    /// Lines keep their trailing `\n`. A trailing fragment without a newline
    /// is held back until a later call completes it. The file is read in
    /// chunks and one call consumes at most the read limit; [`is_at_eof`]
    /// tells whether it caught up. Afterwards the path is stat'ed by name; if
    /// it no longer names the opened file (or is gone, or cannot be read) the
    /// log is retired.
    ///
    /// [`is_at_eof`]: TrackedLog::is_at_eof
    pub fn read_new_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Err(e) = self.read_available(&mut lines) {
            tracing::warn!(path = %self.path.display(), error = %e, "read failed, retiring log");
            self.retired = true;
            self.at_eof = true;
        }
        self.total_lines += lines.len() as u64;

        tracing::debug!(
            path = %self.path.display(),
            lines = lines.len(),
            total = self.total_lines,
            at_eof = self.at_eof,
            "read log"
        );

        if !self.retired {
            self.check_rotation();
        }

        lines
    }

    fn read_available(&mut self, lines: &mut Vec<String>) -> io::Result<()> {
        self.at_eof = false;

        let len = self.file.metadata()?.len();
        if len < self.position {
            tracing::warn!(
                path = %self.path.display(),
                position = self.position,
                len,
                "log truncated, reading from the start"
            );
            self.file.seek(SeekFrom::Start(0))?;
            self.position = 0;
            self.partial.clear();
        }

        let mut chunk = vec![0u8; READ_CHUNK.min(self.read_limit.max(1))];
        let mut budget = self.read_limit;
        while budget > 0 {
            let want = chunk.len().min(budget);
            let n = match self.file.read(&mut chunk[..want]) {
                Ok(0) => {
                    self.at_eof = true;
                    break;
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            self.position += n as u64;
            budget -= n;
            self.split_lines(&chunk[..n], lines);
        }
        Ok(())
    }

    fn split_lines(&mut self, mut bytes: &[u8], lines: &mut Vec<String>) {
        while let Some(i) = bytes.iter().position(|b| *b == b'\n') {
            let (line, rest) = bytes.split_at(i + 1);
            if self.partial.is_empty() {
                lines.push(String::from_utf8_lossy(line).into_owned());
            } else {
                self.partial.extend_from_slice(line);
                lines.push(String::from_utf8_lossy(&self.partial).into_owned());
                self.partial.clear();
            }
            bytes = rest;
        }
        self.partial.extend_from_slice(bytes);
    }

    fn check_rotation(&mut self) {
        match FileId::from_path(&self.path) {
            Ok(current) if current == self.identity => {}
            Ok(current) => {
                tracing::warn!(
                    path = %self.path.display(),
                    old = %self.identity,
                    new = %current,
                    "log rotated"
                );
                self.retired = true;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(path = %self.path.display(), "log moved away");
                self.retired = true;
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "stat failed, treating log as rotated");
                self.retired = true;
            }
        }
    }

    /// Close the handle
    pub fn close(self) {
        tracing::info!(
            path = %self.path.display(),
            identity = %self.identity,
            total = self.total_lines,
            "close log"
        );
    }
}

impl std::fmt::Debug for TrackedLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedLog")
            .field("path", &self.path)
            .field("identity", &self.identity)
            .field("position", &self.position)
            .field("consumers", &self.consumers.iter().map(|d| d.name()).collect::<Vec<_>>())
            .field("retired", &self.retired)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;

    fn append(path: &Path, s: &str) {
        let mut f = OpenOptions::new().create(true).append(true).open(path).unwrap();
        f.write_all(s.as_bytes()).unwrap();
    }

    #[test]
    fn test_skip_existing_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        append(&path, "old line\n");

        let mut log = TrackedLog::open(&path, StartAt::End).unwrap();
        assert_eq!(log.position(), 9);
        assert!(log.read_new_lines().is_empty());

        append(&path, "new line\n");
        assert_eq!(log.read_new_lines(), vec!["new line\n"]);
    }

    #[test]
    fn test_replay_from_beginning() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        append(&path, "one\ntwo\n");

        let mut log = TrackedLog::open(&path, StartAt::Beginning).unwrap();
        assert_eq!(log.read_new_lines(), vec!["one\n", "two\n"]);
        assert_eq!(log.total_lines(), 2);
    }

    #[test]
    fn test_half_line_held_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        append(&path, "");

        let mut log = TrackedLog::open(&path, StartAt::End).unwrap();
        append(&path, "abc");
        assert!(log.read_new_lines().is_empty());
        assert_eq!(log.pending_partial(), b"abc");

        append(&path, "def\nghi");
        assert_eq!(log.read_new_lines(), vec!["abcdef\n"]);
        assert_eq!(log.pending_partial(), b"ghi");
    }

    #[test]
    fn test_rotation_retires() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        append(&path, "");

        let mut log = TrackedLog::open(&path, StartAt::End).unwrap();
        std::fs::rename(&path, dir.path().join("b.log")).unwrap();
        append(&dir.path().join("b.log"), "late\n");
        append(&path, "fresh\n");

        // The old handle still sees the renamed file
        assert_eq!(log.read_new_lines(), vec!["late\n"]);
        assert!(log.is_retired());
    }

    #[test]
    fn test_deleted_file_retires() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        append(&path, "");

        let mut log = TrackedLog::open(&path, StartAt::End).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(log.read_new_lines().is_empty());
        assert!(log.is_retired());
    }

    #[test]
    fn test_truncation_restarts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        append(&path, "a fairly long line of history\n");

        let mut log = TrackedLog::open(&path, StartAt::End).unwrap();
        std::fs::write(&path, "short\n").unwrap();

        assert_eq!(log.read_new_lines(), vec!["short\n"]);
        assert!(!log.is_retired());
    }

    #[test]
    fn test_read_limit_spreads_large_backlog() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        append(&path, "aaaa\nbbbb\ncc");

        let mut log = TrackedLog::open(&path, StartAt::Beginning)
            .unwrap()
            .with_read_limit(7);
        assert_eq!(log.read_new_lines(), vec!["aaaa\n"]);
        assert!(!log.is_at_eof());
        assert_eq!(log.pending_partial(), b"bb");

        assert_eq!(log.read_new_lines(), vec!["bbbb\n"]);
        assert_eq!(log.pending_partial(), b"cc");

        assert!(log.read_new_lines().is_empty());
        assert!(log.is_at_eof());
        assert_eq!(log.position(), 12);
    }

    #[test]
    fn test_line_split_across_chunks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        let long = format!("{}\n", "x".repeat(READ_CHUNK + 10));
        append(&path, &long);
        append(&path, "short\n");

        let mut log = TrackedLog::open(&path, StartAt::Beginning).unwrap();
        assert_eq!(log.read_new_lines(), vec![long, "short\n".to_string()]);
        assert!(log.is_at_eof());
        assert!(log.pending_partial().is_empty());
    }

    #[test]
    fn test_relocate_keeps_position() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        let renamed = dir.path().join("a-1.log");
        append(&path, "old\n");

        let mut log = TrackedLog::open(&path, StartAt::End).unwrap();
        std::fs::rename(&path, &renamed).unwrap();
        assert!(log.read_new_lines().is_empty());
        assert!(log.is_retired());

        log.relocate(&renamed);
        assert!(!log.is_retired());
        assert!(log.consumers().is_empty());

        append(&renamed, "late\n");
        assert_eq!(log.read_new_lines(), vec!["late\n"]);
        assert!(!log.is_retired());
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, b"bad \xff byte\n").unwrap();

        let mut log = TrackedLog::open(&path, StartAt::Beginning).unwrap();
        assert_eq!(log.read_new_lines(), vec!["bad \u{fffd} byte\n"]);
    }
}
