//! Log set reconciliation and tailing engine for logdog
//!
//! This crate tracks groups of log files selected by glob patterns, reads
//! the lines appended to them on every tick, follows rotation by
//! device/inode identity and dispatches filtered batches to handlers.

mod dog;
mod error;
mod filter;
mod manager;
mod scheduler;
mod tracked;
mod unwind;

pub use dog::{Dog, DogBuilder};
pub use error::{EngineError, Result};
pub use filter::CompiledFilter;
pub use manager::LogSetManager;
pub use scheduler::Scheduler;
pub use tracked::{DEFAULT_READ_LIMIT, StartAt, TrackedLog};

// Re-export types used in our public API
pub use logdog_types::{FileId, Handler, LogSetStats, TickReport};
