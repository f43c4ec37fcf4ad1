//! Built-in handlers for logdog
//!
//! Every handler here implements [`logdog_types::Handler`]. [`Detached`]
//! wraps any handler so batches are processed on a worker thread instead of
//! blocking the tick.

mod command;
mod detached;
mod mail;
mod print;
mod webhook;

pub use command::CommandHandler;
pub use detached::Detached;
pub use mail::{MailHandler, MailHandlerBuilder};
pub use print::PrintHandler;
pub use webhook::{WebhookHandler, WebhookPayload};

// Re-export types used in our public API
pub use logdog_types::Handler;
