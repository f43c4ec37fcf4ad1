use std::collections::BTreeSet;
use std::path::{MAIN_SEPARATOR, Path, PathBuf};
use std::sync::Arc;

use logdog_types::Handler;

use crate::error::{EngineError, Result};
use crate::filter::CompiledFilter;
use crate::unwind;

/// A named watch rule: glob patterns, a line filter and a handler
pub struct Dog {
    name: String,
    /// Absolute glob patterns, in configuration order
    patterns: Vec<String>,
    filter: CompiledFilter,
    handler: Arc<dyn Handler>,
}

impl Dog {
    pub fn builder(name: impl Into<String>) -> DogBuilder {
        DogBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn filter(&self) -> &CompiledFilter {
        &self.filter
    }

    /// Expand every pattern into the files it matches right now.
    ///
    /// Nothing is cached, so files created or removed between calls are
    /// picked up or dropped. Directories are skipped.
    pub fn resolve_paths(&self) -> BTreeSet<PathBuf> {
        let mut paths = BTreeSet::new();

        for pattern in &self.patterns {
            let entries = match glob::glob(pattern) {
                Ok(entries) => entries,
                Err(e) => {
                    // Patterns are validated by the builder
                    tracing::error!(dog = %self.name, pattern = %pattern, error = %e, "invalid glob pattern");
                    continue;
                }
            };

            for entry in entries {
                match entry {
                    Ok(path) if path.is_file() => {
                        paths.insert(path);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(dog = %self.name, pattern = %pattern, error = %e, "skipping unreadable path");
                    }
                }
            }
        }

        paths
    }

    /// Filter `lines` and hand the survivors to the handler as one batch.
    ///
    /// Returns the number of lines delivered. Handler errors and panics are
    /// logged here and never propagate.
    pub fn dispatch(&self, path: &Path, lines: &[String]) -> usize {
        let batch: Vec<String> = lines
            .iter()
            .filter(|line| self.filter.matches(line))
            .cloned()
            .collect();

        tracing::debug!(
            dog = %self.name,
            path = %path.display(),
            lines = batch.len(),
            "process lines"
        );

        if batch.is_empty() {
            return 0;
        }

        match unwind::catch(|| self.handler.handle(path, &batch)) {
            Ok(Ok(())) => batch.len(),
            Ok(Err(e)) => {
                tracing::error!(
                    dog = %self.name,
                    path = %path.display(),
                    handler = %self.handler.describe(),
                    "handler failed: {:#}",
                    e
                );
                0
            }
            Err(panic) => {
                tracing::error!(
                    dog = %self.name,
                    path = %path.display(),
                    handler = %self.handler.describe(),
                    "handler panicked: {}",
                    panic
                );
                0
            }
        }
    }
}

impl std::fmt::Debug for Dog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dog")
            .field("name", &self.name)
            .field("patterns", &self.patterns)
            .field("filter", &self.filter)
            .field("handler", &self.handler.describe())
            .finish()
    }
}

/// Builds a [`Dog`], compiling and validating every pattern up front
pub struct DogBuilder {
    name: String,
    paths: Vec<String>,
    includes: Vec<String>,
    excludes: Vec<String>,
    case_insensitive: bool,
    base_dir: Option<PathBuf>,
    handler: Option<Arc<dyn Handler>>,
}

impl DogBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            paths: Vec::new(),
            includes: Vec::new(),
            excludes: Vec::new(),
            case_insensitive: false,
            base_dir: None,
            handler: None,
        }
    }

    /// Glob patterns (`*`, `?`, `[...]` and recursive `**`)
    pub fn paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn includes<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.includes.extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn excludes<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excludes.extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn case_insensitive(mut self, yes: bool) -> Self {
        self.case_insensitive = yes;
        self
    }

    /// Directory relative patterns are anchored to (default: the current directory)
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn build(self) -> Result<Dog> {
        if self.paths.is_empty() {
            return Err(EngineError::NoPaths(self.name));
        }

        let filter = if self.case_insensitive {
            CompiledFilter::new_case_insensitive(&self.includes, &self.excludes)
        } else {
            CompiledFilter::new(&self.includes, &self.excludes)
        };
        let filter = filter.map_err(|source| EngineError::InvalidRegex {
            dog: self.name.clone(),
            pattern: first_invalid(&self.includes, &self.excludes),
            source,
        })?;

        let base_dir = match self.base_dir {
            Some(dir) => dir,
            None => std::env::current_dir().map_err(|source| EngineError::Io {
                path: PathBuf::from("."),
                source,
            })?,
        };

        let mut patterns = Vec::with_capacity(self.paths.len());
        for path in &self.paths {
            let pattern = absolute_pattern(&base_dir, path);
            glob::Pattern::new(&pattern).map_err(|source| EngineError::InvalidGlob {
                dog: self.name.clone(),
                pattern: path.clone(),
                source,
            })?;
            patterns.push(pattern);
        }

        let handler = self.handler.ok_or(EngineError::NoHandler(self.name.clone()))?;

        Ok(Dog {
            name: self.name,
            patterns,
            filter,
            handler,
        })
    }
}

/// The first pattern that fails to compile, for error messages
fn first_invalid(includes: &[String], excludes: &[String]) -> String {
    includes
        .iter()
        .chain(excludes)
        .find(|p| regex::Regex::new(p).is_err())
        .cloned()
        .unwrap_or_default()
}

/// Anchor a relative pattern to `base_dir`, escaping glob metacharacters in
/// the directory part so only the user's pattern is interpreted.
fn absolute_pattern(base_dir: &Path, pattern: &str) -> String {
    if Path::new(pattern).is_absolute() {
        return pattern.to_string();
    }

    let base = glob::Pattern::escape(&base_dir.to_string_lossy());
    let base = base.trim_end_matches(MAIN_SEPARATOR);
    let pattern = pattern.strip_prefix("./").unwrap_or(pattern);
    format!("{base}{MAIN_SEPARATOR}{pattern}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::fs;
    use tempfile::TempDir;

    type Batches = Arc<Mutex<Vec<Vec<String>>>>;

    fn collector() -> (Arc<dyn Handler>, Batches) {
        let batches: Batches = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&batches);
        let handler = move |_: &Path, lines: &[String]| -> anyhow::Result<()> {
            sink.lock().push(lines.to_vec());
            Ok(())
        };
        (Arc::new(handler), batches)
    }

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_dispatch_filters_into_one_batch() {
        let (handler, batches) = collector();
        let dog = Dog::builder("test")
            .paths(["a.log"])
            .includes(["wrong"])
            .excludes(["long"])
            .handler(handler)
            .build()
            .unwrap();

        let delivered = dog.dispatch(
            Path::new("/tmp/a.log"),
            &lines(&["hello world\n", "something wrong\n", "a long wrong answer\n", "whats wrong\n"]),
        );

        assert_eq!(delivered, 2);
        assert_eq!(
            *batches.lock(),
            vec![lines(&["something wrong\n", "whats wrong\n"])]
        );
    }

    #[test]
    fn test_anchored_include_delivers_line_unchanged() {
        let (handler, batches) = collector();
        let dog = Dog::builder("test")
            .paths(["a.log"])
            .includes(["wrong$"])
            .handler(handler)
            .build()
            .unwrap();

        let delivered = dog.dispatch(
            Path::new("a.log"),
            &lines(&["something wrong\n", "wrong turn\n", "dos wrong\r\n"]),
        );

        assert_eq!(delivered, 2);
        assert_eq!(*batches.lock(), vec![lines(&["something wrong\n", "dos wrong\r\n"])]);
    }

    #[test]
    fn test_dispatch_skips_empty_batch() {
        let (handler, batches) = collector();
        let dog = Dog::builder("test")
            .paths(["a.log"])
            .includes(["wrong"])
            .handler(handler)
            .build()
            .unwrap();

        assert_eq!(dog.dispatch(Path::new("a.log"), &lines(&["fine\n"])), 0);
        assert!(batches.lock().is_empty());
    }

    #[test]
    fn test_handler_error_is_contained() {
        let failing = |_: &Path, _: &[String]| -> anyhow::Result<()> { anyhow::bail!("smtp down") };
        let dog = Dog::builder("test")
            .paths(["a.log"])
            .handler(Arc::new(failing))
            .build()
            .unwrap();

        assert_eq!(dog.dispatch(Path::new("a.log"), &lines(&["x\n"])), 0);
    }

    #[test]
    fn test_handler_panic_is_contained() {
        let panicking = |_: &Path, _: &[String]| -> anyhow::Result<()> { panic!("boom") };
        let dog = Dog::builder("test")
            .paths(["a.log"])
            .handler(Arc::new(panicking))
            .build()
            .unwrap();

        assert_eq!(dog.dispatch(Path::new("a.log"), &lines(&["x\n"])), 0);
    }

    #[test]
    fn test_invalid_regex_fails_at_build() {
        let (handler, _) = collector();
        let err = Dog::builder("bad")
            .paths(["a.log"])
            .includes(["ok", "(unclosed"])
            .handler(handler)
            .build()
            .unwrap_err();

        match err {
            EngineError::InvalidRegex { dog, pattern, .. } => {
                assert_eq!(dog, "bad");
                assert_eq!(pattern, "(unclosed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_glob_fails_at_build() {
        let (handler, _) = collector();
        let result = Dog::builder("bad")
            .paths(["logs/***/a.log"])
            .handler(handler)
            .build();

        assert!(matches!(result, Err(EngineError::InvalidGlob { .. })));
    }

    #[test]
    fn test_missing_paths_or_handler() {
        let (handler, _) = collector();
        assert!(matches!(
            Dog::builder("empty").handler(handler).build(),
            Err(EngineError::NoPaths(_))
        ));
        assert!(matches!(
            Dog::builder("silent").paths(["a.log"]).build(),
            Err(EngineError::NoHandler(_))
        ));
    }

    #[test]
    fn test_resolve_paths_recursive() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("logs/b/deep")).unwrap();
        fs::write(dir.path().join("logs/a.log"), "").unwrap();
        fs::write(dir.path().join("logs/b/b.log"), "").unwrap();
        fs::write(dir.path().join("logs/b/deep/c.log"), "").unwrap();
        fs::write(dir.path().join("logs/b/notes.txt"), "").unwrap();
        fs::create_dir_all(dir.path().join("logs/dir.log")).unwrap();

        let (handler, _) = collector();
        let dog = Dog::builder("glob")
            .paths(["logs/**/*.log"])
            .base_dir(dir.path())
            .handler(handler)
            .build()
            .unwrap();

        let found: Vec<PathBuf> = dog.resolve_paths().into_iter().collect();
        assert_eq!(
            found,
            vec![
                dir.path().join("logs/a.log"),
                dir.path().join("logs/b/b.log"),
                dir.path().join("logs/b/deep/c.log"),
            ]
        );
    }

    #[test]
    fn test_resolve_paths_not_cached() {
        let dir = TempDir::new().unwrap();
        let (handler, _) = collector();
        let dog = Dog::builder("test")
            .paths(["*.log"])
            .base_dir(dir.path())
            .handler(handler)
            .build()
            .unwrap();

        assert!(dog.resolve_paths().is_empty());

        fs::write(dir.path().join("a.log"), "").unwrap();
        assert_eq!(dog.resolve_paths().len(), 1);

        fs::remove_file(dir.path().join("a.log")).unwrap();
        assert!(dog.resolve_paths().is_empty());
    }

    #[test]
    fn test_overlapping_patterns_dedupe() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.log"), "").unwrap();
        fs::write(dir.path().join("b.log"), "").unwrap();

        let (handler, _) = collector();
        let dog = Dog::builder("test")
            .paths(["*.log", "a.log", "./b.log"])
            .base_dir(dir.path())
            .handler(handler)
            .build()
            .unwrap();

        assert_eq!(dog.resolve_paths().len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_absolute_pattern_escapes_base() {
        let pattern = absolute_pattern(Path::new("/srv/[prod]"), "*.log");
        assert_eq!(pattern, "/srv/[[]prod[]]/*.log");
        assert_eq!(absolute_pattern(Path::new("/srv"), "/var/log/*.log"), "/var/log/*.log");
    }
}
