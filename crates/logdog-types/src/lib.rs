//! Shared types for logdog
//!
//! This crate contains the data structures and capabilities used across the
//! logdog crates: file identity, the handler trait and tick reports.

use std::fmt;
use std::fs::{File, Metadata};
use std::io;
use std::path::Path;

// ============================================================================
// File Identity
// ============================================================================

/// A platform-independent identifier for a file.
///
/// On Unix systems this is the device ID + inode number, which stays the same
/// when a file is renamed. Rotation is detected by comparing the identity of
/// an open handle with the identity of whatever the path currently names.
///
/// Other platforms have no stable inode through the standard library, so the
/// identity degrades to the file creation time. Two files created within the
/// same clock tick can collide there, and renames are still detected only as
/// long as the replacement file is created later than the original.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    /// Device ID (Unix), zero elsewhere
    dev: u64,
    /// Inode number (Unix) or creation time in nanoseconds
    ino: u64,
}

impl FileId {
    pub fn new(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }

    /// Identity of an open file handle.
    pub fn from_file(file: &File) -> io::Result<Self> {
        Self::from_metadata(&file.metadata()?)
    }

    /// Identity of the file the path currently names (follows symlinks).
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::from_metadata(&std::fs::metadata(path)?)
    }

    #[cfg(unix)]
    fn from_metadata(metadata: &Metadata) -> io::Result<Self> {
        use std::os::unix::fs::MetadataExt;

        Ok(Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        })
    }

    #[cfg(not(unix))]
    fn from_metadata(metadata: &Metadata) -> io::Result<Self> {
        let created = metadata
            .created()?
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();

        Ok(Self {
            dev: 0,
            ino: created.as_nanos() as u64,
        })
    }

    pub fn dev(&self) -> u64 {
        self.dev
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

// ============================================================================
// Handler
// ============================================================================

/// Receives batches of matching lines.
///
/// `lines` is never empty and every line keeps its trailing newline exactly
/// as it was read from disk. The call blocks the tick that produced the
/// batch, so slow handlers should be wrapped to run off-thread.
pub trait Handler: Send + Sync {
    /// Handle one batch of lines read from `path`.
    fn handle(&self, path: &Path, lines: &[String]) -> anyhow::Result<()>;

    /// Short human readable description for diagnostics.
    fn describe(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

impl<F> Handler for F
where
    F: Fn(&Path, &[String]) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, path: &Path, lines: &[String]) -> anyhow::Result<()> {
        self(path, lines)
    }

    fn describe(&self) -> String {
        "closure".to_string()
    }
}

// ============================================================================
// Reports
// ============================================================================

/// Summary of one reconciliation tick
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tick number, starting at 1
    pub tick: u64,
    /// Complete lines read across all tracked logs
    pub lines_read: usize,
    /// Handler invocations (one per dog per non-empty filtered batch)
    pub batches_delivered: usize,
    /// Files adopted by discovery during this tick
    pub adopted: usize,
    /// Logs that moved from live to retired
    pub retired: usize,
    /// Retired logs that were drained and closed
    pub removed: usize,
}

/// Point-in-time view of what a log set manager is tracking
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogSetStats {
    pub live: usize,
    pub retired: usize,
    pub ticks: u64,
    pub total_lines: u64,
}

impl LogSetStats {
    /// Total number of open handles
    pub fn tracked(&self) -> usize {
        self.live + self.retired
    }
}
