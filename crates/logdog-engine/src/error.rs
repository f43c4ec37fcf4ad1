use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid regex {pattern:?} in dog '{dog}'")]
    InvalidRegex {
        dog: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid glob pattern {pattern:?} in dog '{dog}'")]
    InvalidGlob {
        dog: String,
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("dog '{0}' has no path patterns")]
    NoPaths(String),

    #[error("dog '{0}' has no handler")]
    NoHandler(String),

    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("interval must be a positive number of seconds, got {0}")]
    InvalidInterval(f64),
}

pub type Result<T> = std::result::Result<T, EngineError>;
