//! Channel abstraction for message I/O.

pub mod channel;
pub mod cli;
pub mod slack;

pub use channel::*;
pub use cli::CliChannel;
pub use slack::SlackChannel;
