use regex::{Regex, RegexBuilder};

/// Compiled include/exclude filter for log lines
///
/// A line passes when it matches at least one include pattern (or there are
/// none) and no exclude pattern. Matching searches anywhere in the line; use
/// `^`/`$` in a pattern to anchor it. The line terminator is not part of the
/// searched text, so `$` anchors before a trailing `\n` or `\r\n`.
#[derive(Clone)]
pub struct CompiledFilter {
    includes: Vec<Regex>,
    excludes: Vec<Regex>,

    /// Case sensitivity
    case_insensitive: bool,
}

impl CompiledFilter {
    /// Compile a filter from include and exclude pattern strings
    pub fn new<S: AsRef<str>>(includes: &[S], excludes: &[S]) -> Result<Self, regex::Error> {
        Self::build(includes, excludes, false)
    }

    /// Create a case-insensitive filter
    pub fn new_case_insensitive<S: AsRef<str>>(
        includes: &[S],
        excludes: &[S],
    ) -> Result<Self, regex::Error> {
        Self::build(includes, excludes, true)
    }

    fn build<S: AsRef<str>>(
        includes: &[S],
        excludes: &[S],
        case_insensitive: bool,
    ) -> Result<Self, regex::Error> {
        let compile = |patterns: &[S]| -> Result<Vec<Regex>, regex::Error> {
            patterns
                .iter()
                .map(|p| {
                    RegexBuilder::new(p.as_ref())
                        .case_insensitive(case_insensitive)
                        .build()
                })
                .collect()
        };

        Ok(Self {
            includes: compile(includes)?,
            excludes: compile(excludes)?,
            case_insensitive,
        })
    }

    /// Check if a line passes this filter
    pub fn matches(&self, line: &str) -> bool {
        let line = strip_terminator(line);

        if !self.includes.is_empty() && !self.includes.iter().any(|re| re.is_match(line)) {
            return false;
        }

        !self.excludes.iter().any(|re| re.is_match(line))
    }

    /// Original include patterns
    pub fn includes(&self) -> impl Iterator<Item = &str> {
        self.includes.iter().map(Regex::as_str)
    }

    /// Original exclude patterns
    pub fn excludes(&self) -> impl Iterator<Item = &str> {
        self.excludes.iter().map(Regex::as_str)
    }

    /// Check if filter is empty (matches everything)
    pub fn is_empty(&self) -> bool {
        self.includes.is_empty() && self.excludes.is_empty()
    }

    /// Check if filter is case insensitive
    pub fn is_case_insensitive(&self) -> bool {
        self.case_insensitive
    }
}

fn strip_terminator(line: &str) -> &str {
    match line.strip_suffix('\n') {
        Some(body) => body.strip_suffix('\r').unwrap_or(body),
        None => line,
    }
}

impl Default for CompiledFilter {
    fn default() -> Self {
        Self {
            includes: Vec::new(),
            excludes: Vec::new(),
            case_insensitive: false,
        }
    }
}

impl std::fmt::Debug for CompiledFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledFilter")
            .field("includes", &self.includes().collect::<Vec<_>>())
            .field("excludes", &self.excludes().collect::<Vec<_>>())
            .field("case_insensitive", &self.case_insensitive)
            .finish()
    }
}
