//! PID file management

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

/// A PID file that is removed again when dropped
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Write the current process id to `path`.
    ///
    /// Fails if the file names a process that is still running (checked on
    /// Linux only; elsewhere a leftover file is overwritten).
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(pid) = read_pid(&path) {
            if is_running(pid) {
                bail!("already running with pid {} ({})", pid, path.display());
            }
            tracing::warn!(pid, path = %path.display(), "removing stale pid file");
        }

        fs::write(&path, format!("{}\n", std::process::id()))
            .with_context(|| format!("Failed to write pid file {}", path.display()))?;

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove pid file");
        }
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(target_os = "linux")]
fn is_running(pid: u32) -> bool {
    pid != std::process::id() && Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn is_running(_pid: u32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_written_and_removed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logdog.pid");

        let pid_file = PidFile::create(&path).unwrap();
        assert_eq!(read_pid(&path), Some(std::process::id()));
        assert_eq!(pid_file.path(), path);

        drop(pid_file);
        assert!(!path.exists());
    }

    #[test]
    fn test_stale_file_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logdog.pid");
        // pid_max on Linux is at most 2^22
        fs::write(&path, "4294967\n").unwrap();

        let _pid_file = PidFile::create(&path).unwrap();
        assert_eq!(read_pid(&path), Some(std::process::id()));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_running_process_refused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logdog.pid");
        // pid 1 always exists
        fs::write(&path, "1\n").unwrap();

        assert!(PidFile::create(&path).is_err());
    }
}
