use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use logdog_types::{FileId, LogSetStats, TickReport};

use crate::dog::Dog;
use crate::tracked::{StartAt, TrackedLog};

/// Owns every dog and tracked log and reconciles them on each tick
///
/// A tick runs three steps in a fixed order:
///
/// 1. read every live log and dispatch its lines to the log's dogs; logs
///    whose path now names a different file are moved to the retired set
/// 2. drain every retired log once more; a retired log that reaches the end
///    of its file without yielding a line is drained
/// 3. re-resolve every dog's patterns; paths not live yet are opened from
///    the beginning and read immediately, paths already live gain any new
///    consuming dog. A new path naming the same file as a drained log (the
///    old file renamed to a name that still matches) takes over that log's
///    handle and position instead of being replayed. Drained logs nobody
///    took over are closed and forgotten.
///
/// The manager is not safe to tick concurrently; all calls go through
/// `&mut self`.
pub struct LogSetManager {
    dogs: Vec<Arc<Dog>>,
    live: BTreeMap<PathBuf, TrackedLog>,
    retired: BTreeMap<PathBuf, TrackedLog>,
    ticks: u64,
    total_lines: u64,
}

impl LogSetManager {
    /// Create a manager and start tracking every file the dogs match now.
    ///
    /// Existing content of those files is skipped.
    pub fn new(dogs: impl IntoIterator<Item = Dog>) -> Self {
        let mut manager = Self {
            dogs: dogs.into_iter().map(Arc::new).collect(),
            live: BTreeMap::new(),
            retired: BTreeMap::new(),
            ticks: 0,
            total_lines: 0,
        };

        for dog in &manager.dogs {
            tracing::info!(dog = %dog.name(), patterns = ?dog.patterns(), "init dog");

            for path in dog.resolve_paths() {
                if let Some(log) = manager.live.get_mut(&path) {
                    log.add_consumer(dog);
                    continue;
                }

                match TrackedLog::open(&path, StartAt::End) {
                    Ok(mut log) => {
                        log.add_consumer(dog);
                        manager.live.insert(path, log);
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "failed to open log");
                    }
                }
            }
        }

        manager
    }

    /// Run one reconciliation tick
    pub fn process(&mut self) -> TickReport {
        self.ticks += 1;
        let mut report = TickReport {
            tick: self.ticks,
            ..Default::default()
        };
        tracing::info!(tick = self.ticks, "loop");

        // 1. live logs
        let mut moved = Vec::new();
        for (path, log) in self.live.iter_mut() {
            Self::pump(log, &mut report);
            if log.is_retired() {
                moved.push(path.clone());
            }
        }
        for path in moved {
            if let Some(log) = self.live.remove(&path) {
                self.retire(log, &mut report);
            }
        }

        // 2. retired logs
        let mut drained_paths = Vec::new();
        for (path, log) in self.retired.iter_mut() {
            if Self::pump(log, &mut report) == 0 && log.is_at_eof() {
                drained_paths.push(path.clone());
            }
        }
        let mut drained: Vec<TrackedLog> = drained_paths
            .iter()
            .filter_map(|path| self.retired.remove(path))
            .collect();

        // 3. discovery
        self.discover_into(&mut report, &mut drained);

        for log in drained {
            tracing::warn!(path = %log.path().display(), identity = %log.identity(), "remove retired log");
            log.close();
            report.removed += 1;
        }

        self.total_lines += report.lines_read as u64;
        tracing::info!(
            tick = report.tick,
            lines = report.lines_read,
            batches = report.batches_delivered,
            adopted = report.adopted,
            retired = report.retired,
            removed = report.removed,
            "tick done"
        );

        report
    }

    /// Re-resolve every dog and adopt the files that are not live yet.
    ///
    /// New files are read from the beginning and their lines dispatched
    /// before this returns. Returns the number of files adopted. Calling it
    /// again without filesystem changes adopts nothing.
    pub fn discover(&mut self) -> usize {
        let mut report = TickReport::default();
        self.discover_into(&mut report, &mut Vec::new());
        self.total_lines += report.lines_read as u64;
        report.adopted
    }

    fn discover_into(&mut self, report: &mut TickReport, drained: &mut Vec<TrackedLog>) {
        let mut adopted: BTreeMap<PathBuf, TrackedLog> = BTreeMap::new();

        for dog in &self.dogs {
            for path in dog.resolve_paths() {
                if let Some(log) = self.live.get_mut(&path) {
                    if log.add_consumer(dog) {
                        tracing::info!(dog = %dog.name(), path = %path.display(), "dog joins log");
                    }
                    continue;
                }
                if let Some(log) = adopted.get_mut(&path) {
                    log.add_consumer(dog);
                    continue;
                }

                match Self::open_candidate(&self.live, &self.retired, drained, &path) {
                    Ok(Some(mut log)) => {
                        log.add_consumer(dog);
                        adopted.insert(path, log);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "failed to open new log");
                    }
                }
            }
        }

        // Every matching dog is registered before the first read so none
        // of them misses the replayed lines.
        for (path, mut log) in adopted {
            Self::pump(&mut log, report);
            report.adopted += 1;
            if log.is_retired() {
                self.retire(log, report);
            } else {
                self.live.insert(path, log);
            }
        }
    }

    /// Start tracking a path that is not live yet.
    ///
    /// Files already tracked under another name are not replayed: a drained
    /// log is moved over to the new name, a file whose old generation is
    /// still draining is left for a later tick, and a second name for a live
    /// file starts at its end.
    fn open_candidate(
        live: &BTreeMap<PathBuf, TrackedLog>,
        retired: &BTreeMap<PathBuf, TrackedLog>,
        drained: &mut Vec<TrackedLog>,
        path: &Path,
    ) -> io::Result<Option<TrackedLog>> {
        let identity = FileId::from_path(path)?;

        if let Some(index) = drained.iter().position(|log| log.identity() == identity) {
            let mut log = drained.swap_remove(index);
            log.relocate(path);
            return Ok(Some(log));
        }
        if retired.values().any(|log| log.identity() == identity) {
            tracing::debug!(path = %path.display(), %identity, "renamed log still draining");
            return Ok(None);
        }

        let start_at = if live.values().any(|log| log.identity() == identity) {
            StartAt::End
        } else {
            StartAt::Beginning
        };
        TrackedLog::open(path, start_at).map(Some)
    }

    /// Read one log and dispatch to its consumers. Returns lines read.
    fn pump(log: &mut TrackedLog, report: &mut TickReport) -> usize {
        let lines = log.read_new_lines();
        report.lines_read += lines.len();

        if !lines.is_empty() {
            for dog in log.consumers() {
                if dog.dispatch(log.path(), &lines) > 0 {
                    report.batches_delivered += 1;
                }
            }
        }

        lines.len()
    }

    fn retire(&mut self, log: TrackedLog, report: &mut TickReport) {
        report.retired += 1;
        let path = log.path().to_path_buf();

        // An older generation still draining under the same path gets one
        // last read before it is superseded.
        if let Some(mut older) = self.retired.remove(&path) {
            Self::pump(&mut older, report);
            tracing::warn!(
                path = %path.display(),
                identity = %older.identity(),
                "superseded retired log"
            );
            older.close();
            report.removed += 1;
        }

        self.retired.insert(path, log);
    }

    /// Close every live and retired log
    pub fn close_all(&mut self) {
        if self.live.is_empty() && self.retired.is_empty() {
            return;
        }

        tracing::info!(
            live = self.live.len(),
            retired = self.retired.len(),
            "close files"
        );
        for (_, log) in std::mem::take(&mut self.live) {
            log.close();
        }
        for (_, log) in std::mem::take(&mut self.retired) {
            log.close();
        }
    }

    pub fn dogs(&self) -> impl Iterator<Item = &Dog> {
        self.dogs.iter().map(|d| d.as_ref())
    }

    pub fn live_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.live.keys()
    }

    pub fn retired_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.retired.keys()
    }

    /// The live log for `path`, if any
    pub fn live_log(&self, path: &Path) -> Option<&TrackedLog> {
        self.live.get(path)
    }

    pub fn stats(&self) -> LogSetStats {
        LogSetStats {
            live: self.live.len(),
            retired: self.retired.len(),
            ticks: self.ticks,
            total_lines: self.total_lines,
        }
    }
}

impl Drop for LogSetManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

impl std::fmt::Debug for LogSetManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSetManager")
            .field("dogs", &self.dogs.iter().map(|d| d.name()).collect::<Vec<_>>())
            .field("live", &self.live.keys().collect::<Vec<_>>())
            .field("retired", &self.retired.keys().collect::<Vec<_>>())
            .field("ticks", &self.ticks)
            .finish()
    }
}
